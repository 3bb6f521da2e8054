pub mod binder;
pub mod cache;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod executor;
pub mod mapping;
pub mod results;
pub mod xml;

pub use catalog::{Catalog, CatalogBuilder};
pub use executor::Executor;
pub use mapping::RowBounds;

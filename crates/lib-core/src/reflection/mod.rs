pub mod factory;
pub mod meta;
pub mod navigator;
pub mod property;
pub mod shape;

pub use factory::ObjectFactory;
pub use meta::{MetaProperty, MetaType};
pub use navigator::Navigator;
pub use property::{PropertySegment, tokenize};
pub use shape::{Getter, Setter, ShapeBuilder, ShapeRegistry, TypeShape};

use smol_str::SmolStr;
use sqlmapper_helpers::IndexMap;
use sqlmapper_lib_core::errors::{MapperError, Result};
use sqlmapper_lib_core::nodes::SqlSource;
use sqlmapper_lib_core::types::JdbcType;

#[derive(
    strum_macros::EnumString, strum_macros::AsRefStr, Debug, Clone, Copy, PartialEq, Eq,
)]
#[strum(serialize_all = "lowercase")]
pub enum SqlCommandKind {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(
    strum_macros::EnumString, strum_macros::AsRefStr, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum StatementType {
    Statement,
    #[default]
    Prepared,
    Callable,
}

#[derive(strum_macros::EnumString, strum_macros::AsRefStr, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSetType {
    #[strum(serialize = "FORWARD_ONLY")]
    ForwardOnly,
    #[strum(serialize = "SCROLL_INSENSITIVE")]
    ScrollInsensitive,
    #[strum(serialize = "SCROLL_SENSITIVE")]
    ScrollSensitive,
}

/// In-memory pagination window applied while consuming the row cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBounds {
    pub offset: usize,
    pub limit: usize,
}

impl Default for RowBounds {
    fn default() -> Self {
        RowBounds {
            offset: 0,
            limit: usize::MAX,
        }
    }
}

impl RowBounds {
    pub fn new(offset: usize, limit: usize) -> Self {
        RowBounds { offset, limit }
    }

    pub fn is_default(&self) -> bool {
        *self == RowBounds::default()
    }
}

/// Driver-generated key write-back configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGeneratorConfig {
    pub key_property: String,
    pub key_column: Option<String>,
}

/// One compiled statement of the catalog.
#[derive(Debug, Clone)]
pub struct MappedStatement {
    pub id: SmolStr,
    pub namespace: SmolStr,
    pub kind: SqlCommandKind,
    pub source: SqlSource,
    pub parameter_type: Option<SmolStr>,
    pub result_maps: Vec<SmolStr>,
    pub flush_cache: bool,
    pub use_cache: bool,
    pub timeout: Option<u64>,
    pub fetch_size: Option<u32>,
    pub statement_type: StatementType,
    pub result_set_type: Option<ResultSetType>,
    pub database_id: Option<String>,
    pub key_generator: Option<KeyGeneratorConfig>,
}

impl MappedStatement {
    /// A statement's result map list is non-empty iff it is a SELECT.
    pub fn check_result_map_invariant(&self) -> Result<()> {
        let is_select = self.kind == SqlCommandKind::Select;
        if is_select != !self.result_maps.is_empty() {
            return Err(MapperError::config(format!(
                "statement '{}' is a {} but declares {} result map(s)",
                self.id,
                self.kind.as_ref(),
                self.result_maps.len()
            )));
        }
        Ok(())
    }
}

/// One entry of a result map: where the value comes from (column), where it
/// goes (property path) and how it converts. Exactly one of nested select,
/// nested result map, or leaf codec conversion applies.
#[derive(Debug, Clone, Default)]
pub struct ResultMapping {
    pub property: String,
    pub column: Option<String>,
    pub app_type: Option<SmolStr>,
    pub jdbc_type: Option<JdbcType>,
    /// Named codec override.
    pub codec: Option<SmolStr>,
    pub is_id: bool,
    pub is_constructor: bool,
    pub nested_select: Option<SmolStr>,
    pub nested_result_map: Option<SmolStr>,
    pub column_prefix: Option<String>,
    pub not_null_columns: Vec<String>,
    /// Declared by `<collection>` rather than `<association>`.
    pub is_collection: bool,
}

impl ResultMapping {
    pub fn validate(&self) -> Result<()> {
        if self.nested_select.is_some() && self.nested_result_map.is_some() {
            return Err(MapperError::config(format!(
                "result mapping for property '{}' declares both a nested select and a nested result map",
                self.property
            )));
        }
        Ok(())
    }

    pub fn is_nested(&self) -> bool {
        self.nested_select.is_some() || self.nested_result_map.is_some()
    }
}

/// Discriminator: routes a row to a case-specific result map based on one
/// decoded column value.
#[derive(Debug, Clone)]
pub struct Discriminator {
    pub column: String,
    pub app_type: Option<SmolStr>,
    pub jdbc_type: Option<JdbcType>,
    pub codec: Option<SmolStr>,
    /// Case value (textual form) to qualified result map name.
    pub cases: IndexMap<String, SmolStr>,
}

#[derive(Debug, Clone)]
pub struct ResultMap {
    pub id: SmolStr,
    pub type_name: SmolStr,
    pub mappings: Vec<ResultMapping>,
    pub constructor_mappings: Vec<ResultMapping>,
    pub discriminator: Option<Discriminator>,
    pub auto_mapping: Option<bool>,
}

impl ResultMap {
    pub fn id_mappings(&self) -> impl Iterator<Item = &ResultMapping> {
        self.mappings.iter().filter(|m| m.is_id)
    }

    pub fn has_nested_result_maps(&self) -> bool {
        self.mappings.iter().any(|m| m.nested_result_map.is_some())
    }

    /// Every column this map mentions, after optional prefix stripping has
    /// been applied by the caller.
    pub fn mapped_columns(&self) -> impl Iterator<Item = &str> {
        self.constructor_mappings
            .iter()
            .chain(&self.mappings)
            .filter_map(|m| m.column.as_deref())
    }
}

#[derive(
    strum_macros::EnumString, strum_macros::AsRefStr, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Eviction {
    #[default]
    Lru,
    Fifo,
    Weak,
}

/// Parsed `<cache>` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub eviction: Eviction,
    pub flush_interval_ms: Option<u64>,
    pub size: usize,
    pub read_only: bool,
    pub blocking: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            eviction: Eviction::Lru,
            flush_interval_ms: None,
            size: 1024,
            read_only: false,
            blocking: false,
        }
    }
}

/// `namespace.localId`; names already containing a dot are absolute.
pub fn qualify(namespace: &str, id: &str) -> SmolStr {
    if id.contains('.') {
        SmolStr::new(id)
    } else {
        SmolStr::new(format!("{namespace}.{id}"))
    }
}

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock};

use itertools::Itertools;
use smol_str::SmolStr;
use sqlmapper_helpers::IndexMap;

use crate::errors::{MapperError, Result};

/// The dynamic application value the mapping core moves between parameter
/// objects, evaluation scopes, database cells and result graphs.
///
/// Rust has no runtime reflection, so typed application objects appear here
/// as [`Object`] values tagged with a registered shape name; see
/// [`crate::reflection`].
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
    Object(Object),
    /// A lazily loaded slot; resolving it the first time runs the attached
    /// loader, afterwards it delegates to the loaded value forever.
    Deferred(Arc<Deferred>),
}

/// A shaped application object: a type tag plus insertion-ordered fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Object {
    pub type_name: SmolStr,
    pub fields: IndexMap<String, Value>,
}

impl Object {
    pub fn new(type_name: impl Into<SmolStr>) -> Self {
        Object {
            type_name: type_name.into(),
            fields: IndexMap::default(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

pub type Loader = Box<dyn FnOnce() -> Result<Value> + Send>;

/// One-shot lazy-load cell. The loader runs at most once; concurrent access
/// is not expected (sessions are single-threaded) but the cell converges to
/// a single published value regardless.
pub struct Deferred {
    cell: OnceLock<Value>,
    loader: Mutex<Option<Loader>>,
    aggressive: bool,
}

impl Deferred {
    pub fn new(aggressive: bool, loader: Loader) -> Self {
        Deferred {
            cell: OnceLock::new(),
            loader: Mutex::new(Some(loader)),
            aggressive,
        }
    }

    pub fn aggressive(&self) -> bool {
        self.aggressive
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn resolve(&self) -> Result<Value> {
        if let Some(value) = self.cell.get() {
            return Ok(value.clone());
        }
        let loader = self.loader.lock().unwrap().take();
        if let Some(loader) = loader {
            let loaded = loader()?;
            let _ = self.cell.set(loaded);
        }
        Ok(self.cell.get().cloned().unwrap_or(Value::Null))
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(value) => f.debug_tuple("Deferred").field(value).finish(),
            None => f.write_str("Deferred(<unresolved>)"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Double(v) => write!(f, "Double({v})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::Bytes(v) => write!(f, "Bytes(<{} bytes>)", v.len()),
            Value::Array(v) => f.debug_tuple("Array").field(v).finish(),
            Value::Map(v) => f.debug_tuple("Map").field(v).finish(),
            Value::Object(v) => v.fmt(f),
            Value::Deferred(v) => v.fmt(f),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Int(a), Value::Double(b)) | (Value::Double(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Deferred(a), Value::Deferred(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Deferred(_) => "deferred",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Double(v) => *v != 0.0,
            Value::String(v) => !v.is_empty(),
            Value::Bytes(v) => !v.is_empty(),
            Value::Array(v) => !v.is_empty(),
            Value::Map(v) => !v.is_empty(),
            Value::Object(_) => true,
            Value::Deferred(_) => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Text form used for `${…}` interpolation: raw, unquoted, empty for
    /// null.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::String(v) => v.clone(),
            Value::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
            Value::Array(v) => v.iter().map(Value::to_text).join(","),
            Value::Map(_) | Value::Object(_) | Value::Deferred(_) => format!("{self:?}"),
        }
    }

    /// If this is a deferred slot, force it; otherwise return a clone.
    pub fn resolved(&self) -> Result<Value> {
        match self {
            Value::Deferred(deferred) => deferred.resolve(),
            other => Ok(other.clone()),
        }
    }
}

impl FromStr for Value {
    type Err = MapperError;

    /// Literal coercion used for XML attribute values: integer, then float,
    /// then boolean, otherwise the raw string.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(value) = s.parse() {
            return Ok(Value::Int(value));
        }
        if let Ok(value) = s.parse() {
            return Ok(Value::Double(value));
        }
        let value = match () {
            _ if s.eq_ignore_ascii_case("true") => Value::Bool(true),
            _ if s.eq_ignore_ascii_case("false") => Value::Bool(false),
            _ if s.eq_ignore_ascii_case("null") => Value::Null,
            _ => Value::String(s.to_string()),
        };
        Ok(value)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Convenience for map-shaped parameter objects.
pub fn param_map<I, K, V>(entries: I) -> Value
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}

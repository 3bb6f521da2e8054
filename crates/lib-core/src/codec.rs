use std::sync::Arc;

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::driver::{ColumnRef, Cursor, DbCell, DbValue, Statement};
use crate::errors::{MapperError, Result};
use crate::reflection::ShapeRegistry;
use crate::types::{
    JdbcType, TYPE_BOOLEAN, TYPE_BYTES, TYPE_DOUBLE, TYPE_INT, TYPE_LONG, TYPE_STRING,
};
use crate::value::Value;

fn column_label(column: ColumnRef<'_>) -> String {
    match column {
        ColumnRef::Name(name) => name.to_string(),
        ColumnRef::Ordinal(ordinal) => format!("#{ordinal}"),
    }
}

fn decode_error(column: &str, expected: &str, cell: &DbCell) -> MapperError {
    MapperError::Mapping {
        statement: String::new(),
        column: column.to_string(),
        detail: format!("cannot decode {:?} as {expected}", cell.value),
    }
}

fn encode_error(expected: &str, value: &Value) -> MapperError {
    MapperError::Binding {
        statement: String::new(),
        property: String::new(),
        detail: format!("cannot encode {} value as {expected}", value.kind()),
    }
}

/// A bidirectional converter between an application value and a database
/// cell. `set_parameter`/`get_result` carry the driver plumbing; codecs
/// implement the two scalar conversions.
pub trait TypeCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<DbValue>;

    fn decode(&self, cell: &DbCell, column: &str) -> Result<Value>;

    /// The database type bound alongside an encoded value when the
    /// descriptor declares none.
    fn default_jdbc_type(&self) -> JdbcType {
        JdbcType::Other
    }

    fn set_parameter(
        &self,
        statement: &mut dyn Statement,
        ordinal: usize,
        value: &Value,
        jdbc_type: Option<JdbcType>,
    ) -> Result<()> {
        let db_value = match value {
            Value::Null => DbValue::Null,
            other => self.encode(other)?,
        };
        let jdbc_type = jdbc_type.unwrap_or_else(|| self.default_jdbc_type());
        statement.bind(ordinal, db_value, jdbc_type)?;
        Ok(())
    }

    fn get_result(&self, cursor: &dyn Cursor, column: ColumnRef<'_>) -> Result<Value> {
        let cell = cursor.cell(column)?;
        if cell.value.is_null() {
            return Ok(Value::Null);
        }
        self.decode(&cell, &column_label(column))
    }
}

pub struct IntCodec;

impl TypeCodec for IntCodec {
    fn encode(&self, value: &Value) -> Result<DbValue> {
        match value {
            Value::Int(v) => Ok(DbValue::Int(*v)),
            Value::Bool(v) => Ok(DbValue::Int(i64::from(*v))),
            _ => Err(encode_error("an integer", value)),
        }
    }

    fn decode(&self, cell: &DbCell, column: &str) -> Result<Value> {
        match &cell.value {
            DbValue::Int(v) => Ok(Value::Int(*v)),
            DbValue::Text(v) => v
                .trim()
                .parse()
                .map(Value::Int)
                .map_err(|_| decode_error(column, "an integer", cell)),
            _ => Err(decode_error(column, "an integer", cell)),
        }
    }

    fn default_jdbc_type(&self) -> JdbcType {
        JdbcType::Bigint
    }
}

pub struct DoubleCodec;

impl TypeCodec for DoubleCodec {
    fn encode(&self, value: &Value) -> Result<DbValue> {
        match value.as_f64() {
            Some(v) => Ok(DbValue::Double(v)),
            None => Err(encode_error("a number", value)),
        }
    }

    fn decode(&self, cell: &DbCell, column: &str) -> Result<Value> {
        match &cell.value {
            DbValue::Int(v) => Ok(Value::Double(*v as f64)),
            DbValue::Double(v) => Ok(Value::Double(*v)),
            DbValue::Text(v) => v
                .trim()
                .parse()
                .map(Value::Double)
                .map_err(|_| decode_error(column, "a number", cell)),
            _ => Err(decode_error(column, "a number", cell)),
        }
    }

    fn default_jdbc_type(&self) -> JdbcType {
        JdbcType::Double
    }
}

pub struct BoolCodec;

impl TypeCodec for BoolCodec {
    fn encode(&self, value: &Value) -> Result<DbValue> {
        match value {
            Value::Bool(v) => Ok(DbValue::Bool(*v)),
            Value::Int(v) => Ok(DbValue::Bool(*v != 0)),
            _ => Err(encode_error("a boolean", value)),
        }
    }

    fn decode(&self, cell: &DbCell, column: &str) -> Result<Value> {
        match &cell.value {
            DbValue::Bool(v) => Ok(Value::Bool(*v)),
            DbValue::Int(v) => Ok(Value::Bool(*v != 0)),
            DbValue::Text(v) if v.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            DbValue::Text(v) if v.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(decode_error(column, "a boolean", cell)),
        }
    }

    fn default_jdbc_type(&self) -> JdbcType {
        JdbcType::Boolean
    }
}

pub struct StringCodec;

impl TypeCodec for StringCodec {
    fn encode(&self, value: &Value) -> Result<DbValue> {
        match value {
            Value::String(v) => Ok(DbValue::Text(v.clone())),
            Value::Int(_) | Value::Double(_) | Value::Bool(_) => Ok(DbValue::Text(value.to_text())),
            _ => Err(encode_error("a string", value)),
        }
    }

    fn decode(&self, cell: &DbCell, _column: &str) -> Result<Value> {
        match &cell.value {
            DbValue::Text(v) => Ok(Value::String(v.clone())),
            DbValue::Int(v) => Ok(Value::String(v.to_string())),
            DbValue::Double(v) => Ok(Value::String(v.to_string())),
            DbValue::Bool(v) => Ok(Value::String(v.to_string())),
            DbValue::Bytes(v) => Ok(Value::String(String::from_utf8_lossy(v).into_owned())),
            DbValue::Null => Ok(Value::Null),
        }
    }

    fn default_jdbc_type(&self) -> JdbcType {
        JdbcType::Varchar
    }
}

pub struct BytesCodec;

impl TypeCodec for BytesCodec {
    fn encode(&self, value: &Value) -> Result<DbValue> {
        match value {
            Value::Bytes(v) => Ok(DbValue::Bytes(v.clone())),
            _ => Err(encode_error("bytes", value)),
        }
    }

    fn decode(&self, cell: &DbCell, column: &str) -> Result<Value> {
        match &cell.value {
            DbValue::Bytes(v) => Ok(Value::Bytes(v.clone())),
            DbValue::Text(v) => Ok(Value::Bytes(v.clone().into_bytes())),
            _ => Err(decode_error(column, "bytes", cell)),
        }
    }

    fn default_jdbc_type(&self) -> JdbcType {
        JdbcType::Varbinary
    }
}

/// Name-based enum codec, the default for registered enum shapes.
pub struct EnumCodec {
    type_name: SmolStr,
    variants: Vec<SmolStr>,
}

impl EnumCodec {
    pub fn new(type_name: SmolStr, variants: Vec<SmolStr>) -> Self {
        EnumCodec {
            type_name,
            variants,
        }
    }

    fn check(&self, name: &str) -> bool {
        self.variants.iter().any(|v| v == name)
    }
}

impl TypeCodec for EnumCodec {
    fn encode(&self, value: &Value) -> Result<DbValue> {
        match value {
            Value::String(name) if self.check(name) => Ok(DbValue::Text(name.clone())),
            _ => Err(encode_error(&format!("a {} variant", self.type_name), value)),
        }
    }

    fn decode(&self, cell: &DbCell, column: &str) -> Result<Value> {
        match &cell.value {
            DbValue::Text(name) if self.check(name) => Ok(Value::String(name.clone())),
            _ => Err(decode_error(
                column,
                &format!("a {} variant", self.type_name),
                cell,
            )),
        }
    }

    fn default_jdbc_type(&self) -> JdbcType {
        JdbcType::Varchar
    }
}

/// Fallback for opaque descriptors: converts by runtime kind alone.
pub struct OpaqueCodec;

impl TypeCodec for OpaqueCodec {
    fn encode(&self, value: &Value) -> Result<DbValue> {
        match value {
            Value::Null => Ok(DbValue::Null),
            Value::Bool(v) => Ok(DbValue::Bool(*v)),
            Value::Int(v) => Ok(DbValue::Int(*v)),
            Value::Double(v) => Ok(DbValue::Double(*v)),
            Value::String(v) => Ok(DbValue::Text(v.clone())),
            Value::Bytes(v) => Ok(DbValue::Bytes(v.clone())),
            _ => Err(encode_error("a scalar", value)),
        }
    }

    fn decode(&self, cell: &DbCell, _column: &str) -> Result<Value> {
        Ok(match &cell.value {
            DbValue::Null => Value::Null,
            DbValue::Bool(v) => Value::Bool(*v),
            DbValue::Int(v) => Value::Int(*v),
            DbValue::Double(v) => Value::Double(*v),
            DbValue::Text(v) => Value::String(v.clone()),
            DbValue::Bytes(v) => Value::Bytes(v.clone()),
        })
    }
}

/// Codec resolution table. Lookup order: exact (application type, database
/// type) pair, application type alone, the name-based default for enum
/// shapes, database type alone, then the opaque fallback.
pub struct CodecRegistry {
    by_pair: AHashMap<(SmolStr, JdbcType), Arc<dyn TypeCodec>>,
    by_app: AHashMap<SmolStr, Arc<dyn TypeCodec>>,
    by_jdbc: AHashMap<JdbcType, Arc<dyn TypeCodec>>,
    named: AHashMap<SmolStr, Arc<dyn TypeCodec>>,
    opaque: Arc<dyn TypeCodec>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CodecRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = CodecRegistry {
            by_pair: AHashMap::new(),
            by_app: AHashMap::new(),
            by_jdbc: AHashMap::new(),
            named: AHashMap::new(),
            opaque: Arc::new(OpaqueCodec),
        };

        let int: Arc<dyn TypeCodec> = Arc::new(IntCodec);
        let double: Arc<dyn TypeCodec> = Arc::new(DoubleCodec);
        let boolean: Arc<dyn TypeCodec> = Arc::new(BoolCodec);
        let string: Arc<dyn TypeCodec> = Arc::new(StringCodec);
        let bytes: Arc<dyn TypeCodec> = Arc::new(BytesCodec);

        registry.register_app(TYPE_INT, int.clone());
        registry.register_app(TYPE_LONG, int.clone());
        registry.register_app(TYPE_DOUBLE, double.clone());
        registry.register_app(TYPE_BOOLEAN, boolean.clone());
        registry.register_app(TYPE_STRING, string.clone());
        registry.register_app(TYPE_BYTES, bytes.clone());

        for jdbc in [
            JdbcType::Tinyint,
            JdbcType::Smallint,
            JdbcType::Integer,
            JdbcType::Bigint,
        ] {
            registry.register_jdbc(jdbc, int.clone());
        }
        for jdbc in [
            JdbcType::Float,
            JdbcType::Real,
            JdbcType::Double,
            JdbcType::Numeric,
            JdbcType::Decimal,
        ] {
            registry.register_jdbc(jdbc, double.clone());
        }
        for jdbc in [
            JdbcType::Char,
            JdbcType::Varchar,
            JdbcType::Longvarchar,
            JdbcType::Clob,
        ] {
            registry.register_jdbc(jdbc, string.clone());
        }
        for jdbc in [JdbcType::Bit, JdbcType::Boolean] {
            registry.register_jdbc(jdbc, boolean.clone());
        }
        for jdbc in [
            JdbcType::Binary,
            JdbcType::Varbinary,
            JdbcType::Longvarbinary,
            JdbcType::Blob,
        ] {
            registry.register_jdbc(jdbc, bytes.clone());
        }

        registry
    }

    pub fn register_pair(&mut self, app: &str, jdbc: JdbcType, codec: Arc<dyn TypeCodec>) {
        self.by_pair.insert((SmolStr::new(app), jdbc), codec);
    }

    pub fn register_app(&mut self, app: &str, codec: Arc<dyn TypeCodec>) {
        self.by_app.insert(SmolStr::new(app), codec);
    }

    pub fn register_jdbc(&mut self, jdbc: JdbcType, codec: Arc<dyn TypeCodec>) {
        self.by_jdbc.insert(jdbc, codec);
    }

    /// Register a codec under a name usable from `typeHandler=` options and
    /// result map attributes.
    pub fn register_named(&mut self, name: &str, codec: Arc<dyn TypeCodec>) {
        self.named.insert(SmolStr::new(name), codec);
    }

    pub fn named(&self, name: &str) -> Option<Arc<dyn TypeCodec>> {
        self.named.get(name).cloned()
    }

    pub fn opaque(&self) -> Arc<dyn TypeCodec> {
        self.opaque.clone()
    }

    pub fn resolve(
        &self,
        shapes: &ShapeRegistry,
        app_type: Option<&str>,
        jdbc_type: Option<JdbcType>,
    ) -> Arc<dyn TypeCodec> {
        if let (Some(app), Some(jdbc)) = (app_type, jdbc_type) {
            if let Some(codec) = self.by_pair.get(&(SmolStr::new(app), jdbc)) {
                return codec.clone();
            }
        }
        if let Some(app) = app_type {
            if let Some(codec) = self.by_app.get(app) {
                return codec.clone();
            }
            if let Some(variants) = shapes.enum_variants(app) {
                return Arc::new(EnumCodec::new(SmolStr::new(app), variants));
            }
        }
        if let Some(jdbc) = jdbc_type {
            if let Some(codec) = self.by_jdbc.get(&jdbc) {
                return codec.clone();
            }
        }
        self.opaque.clone()
    }
}

use sqlmapper_lib_core::value::Value;

/// Hash-list cache key: equality is over the ordered list of folded parts,
/// so an array and a sequence with equal elements produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CacheKey {
    parts: Vec<KeyPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    /// Bit pattern of a double, so NaN folds consistently.
    Bits(u64),
    Str(String),
    Bytes(Vec<u8>),
}

impl CacheKey {
    pub fn new() -> Self {
        CacheKey::default()
    }

    pub fn update_text(&mut self, text: &str) {
        self.parts.push(KeyPart::Str(text.to_string()));
    }

    pub fn update_int(&mut self, value: i64) {
        self.parts.push(KeyPart::Int(value));
    }

    /// Fold a bound value into the key. Sequences and mappings destructure
    /// elementwise.
    pub fn update(&mut self, value: &Value) {
        match value {
            Value::Null => self.parts.push(KeyPart::Null),
            Value::Bool(v) => self.parts.push(KeyPart::Bool(*v)),
            Value::Int(v) => self.parts.push(KeyPart::Int(*v)),
            Value::Double(v) => self.parts.push(KeyPart::Bits(v.to_bits())),
            Value::String(v) => self.parts.push(KeyPart::Str(v.clone())),
            Value::Bytes(v) => self.parts.push(KeyPart::Bytes(v.clone())),
            Value::Array(items) => {
                for item in items {
                    self.update(item);
                }
            }
            Value::Map(map) => {
                for (key, item) in map {
                    self.update_text(key);
                    self.update(item);
                }
            }
            Value::Object(object) => {
                self.update_text(&object.type_name);
                for (key, item) in &object.fields {
                    self.update_text(key);
                    self.update(item);
                }
            }
            Value::Deferred(deferred) => match deferred.resolve() {
                Ok(resolved) => self.update(&resolved),
                Err(_) => self.parts.push(KeyPart::Null),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

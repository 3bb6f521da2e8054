use smol_str::SmolStr;

use crate::errors::{MapperError, Result};
use crate::reflection::shape::ShapeRegistry;
use crate::types::{TYPE_LIST, TYPE_MAP, is_scalar_type, normalize_type_name, sequence_element, split_container};
use crate::value::{Object, Value};

/// Constructs application values by declared type name: empty containers
/// for the collection types, shaped objects through their registered
/// constructors, and open objects for unregistered names.
pub struct ObjectFactory<'a> {
    registry: &'a ShapeRegistry,
}

impl<'a> ObjectFactory<'a> {
    pub fn new(registry: &'a ShapeRegistry) -> Self {
        ObjectFactory { registry }
    }

    /// Nullary construction, used to materialize intermediate nulls and
    /// result objects without constructor mappings.
    pub fn create_default(&self, type_name: &str) -> Result<Value> {
        let name = normalize_type_name(type_name);
        if name == TYPE_MAP || split_container(&name).is_some_and(|(c, _)| c.eq_ignore_ascii_case("map")) {
            return Ok(Value::Map(Default::default()));
        }
        if name == TYPE_LIST || sequence_element(&name).is_some() {
            return Ok(Value::Array(Vec::new()));
        }
        if is_scalar_type(&name) {
            return Err(MapperError::NoDefaultConstructor(name.to_string()));
        }
        match self.registry.shape(&name) {
            Some(shape) if shape.is_enum() => {
                Err(MapperError::NoDefaultConstructor(name.to_string()))
            }
            Some(shape) if shape.has_nullary_constructor() => {
                Ok(Value::Object(Object::new(shape.name().to_string())))
            }
            Some(_) => Err(MapperError::NoDefaultConstructor(name.to_string())),
            // Unregistered types behave as open field bags.
            None => Ok(Value::Object(Object::new(name))),
        }
    }

    /// Positional construction: selects the declared constructor matching
    /// the argument arity whose parameter types accept the argument values,
    /// in declaration order.
    pub fn create(&self, type_name: &str, args: Vec<Value>) -> Result<Value> {
        if args.is_empty() {
            return self.create_default(type_name);
        }
        let name = normalize_type_name(type_name);
        let Some(shape) = self.registry.shape(&name) else {
            return Err(MapperError::NoMatchingConstructor {
                type_name: name.to_string(),
                arity: args.len(),
            });
        };
        let constructor = shape
            .constructors
            .iter()
            .filter(|c| c.params.len() == args.len())
            .find(|c| {
                c.params
                    .iter()
                    .zip(&args)
                    .all(|((_, declared), arg)| self.accepts(declared, arg))
            })
            .ok_or_else(|| MapperError::NoMatchingConstructor {
                type_name: name.to_string(),
                arity: args.len(),
            })?;

        let mut object = Object::new(shape.name().to_string());
        for ((property, _), arg) in constructor.params.iter().zip(args) {
            object.fields.insert(property.to_string(), arg);
        }
        Ok(Value::Object(object))
    }

    /// Whether a runtime value is acceptable where `declared` is expected.
    pub fn accepts(&self, declared: &SmolStr, value: &Value) -> bool {
        match value {
            Value::Null | Value::Deferred(_) => true,
            Value::Bool(_) => declared == "boolean",
            Value::Int(_) => matches!(declared.as_str(), "int" | "long" | "double"),
            Value::Double(_) => declared == "double",
            Value::String(_) => declared == "string" || self.registry.is_enum(declared),
            Value::Bytes(_) => declared == "bytes",
            Value::Array(_) => declared == TYPE_LIST || sequence_element(declared).is_some(),
            Value::Map(_) => declared == TYPE_MAP || !self.registry.contains(declared),
            Value::Object(object) => self.registry.is_assignable(declared, &object.type_name),
        }
    }
}

use crate::errors::{MapperError, Result};
use crate::reflection::factory::ObjectFactory;
use crate::reflection::property::{PropertySegment, segments, tokenize};
use crate::reflection::shape::ShapeRegistry;
use crate::value::Value;

/// Reads and writes nested values through property expressions, using the
/// metamodel for shaped objects and direct access for maps and sequences.
///
/// Reads are side-effect-free apart from forcing deferred slots; writes
/// mutate only the target leaf, materializing intermediate nulls on the
/// way down.
pub struct Navigator<'a> {
    registry: &'a ShapeRegistry,
}

impl<'a> Navigator<'a> {
    pub fn new(registry: &'a ShapeRegistry) -> Self {
        Navigator { registry }
    }

    pub fn registry(&self) -> &'a ShapeRegistry {
        self.registry
    }

    /// Read the value at `path`. An intermediate null yields `Null` for the
    /// whole expression.
    pub fn get(&self, root: &Value, path: &str) -> Result<Value> {
        let mut iter = tokenize(path);
        let mut current = match iter.next() {
            None => root.clone(),
            Some(seg) => self.read_segment(root, &seg?, path)?,
        };
        for seg in iter {
            if current.is_null() {
                // Drain the iterator so malformed tails still fail.
                seg?;
                continue;
            }
            current = self.read_segment(&current, &seg?, path)?;
        }
        current.resolved()
    }

    /// Write `value` at `path`, materializing intermediate nulls through
    /// their declared types.
    pub fn set(&self, root: &mut Value, path: &str, value: Value) -> Result<()> {
        let segs = segments(path)?;
        if segs.is_empty() {
            return Err(MapperError::MalformedPath {
                path: path.to_string(),
                detail: "empty path".to_string(),
            });
        }
        self.set_segments(root, &segs, value, path)
    }

    fn set_segments(
        &self,
        container: &mut Value,
        segs: &[PropertySegment<'_>],
        value: Value,
        path: &str,
    ) -> Result<()> {
        if let Value::Deferred(deferred) = container {
            *container = deferred.resolve()?;
        }
        let (seg, rest) = segs.split_first().expect("set_segments requires a segment");
        if rest.is_empty() {
            return self.write_segment(container, seg, value, path);
        }
        let mut child = self.read_segment(container, seg, path)?;
        if child.is_null() {
            child = self.materialize_child(container, seg, path)?;
        }
        self.set_segments(&mut child, rest, value, path)?;
        self.write_segment(container, seg, child, path)
    }

    fn read_segment(
        &self,
        container: &Value,
        seg: &PropertySegment<'_>,
        path: &str,
    ) -> Result<Value> {
        let forced;
        let container = if let Value::Deferred(deferred) = container {
            forced = deferred.resolve()?;
            &forced
        } else {
            container
        };
        if container.is_null() {
            return Ok(Value::Null);
        }
        // Touching any property of an object forces its aggressive slots.
        if let Value::Object(object) = container {
            for field in object.fields.values() {
                if let Value::Deferred(deferred) = field {
                    if deferred.aggressive() && !deferred.is_resolved() {
                        deferred.resolve()?;
                    }
                }
            }
        }
        let base = self.read_name(container, seg.name, path)?;
        match seg.index {
            None => Ok(base),
            Some(index) => self.read_index(&base, index, path),
        }
    }

    fn read_name(&self, container: &Value, name: &str, path: &str) -> Result<Value> {
        match container {
            Value::Map(map) => Ok(map.get(name).cloned().unwrap_or_default()),
            Value::Object(object) => {
                let meta = self.registry.meta_type(&object.type_name)?;
                if meta.is_open() {
                    return Ok(object.fields.get(name).cloned().unwrap_or_default());
                }
                match meta.property(name) {
                    Some(property) if property.readable => Ok(property.read(container)),
                    _ => Err(MapperError::UnknownProperty {
                        type_name: object.type_name.to_string(),
                        access: "readable",
                        property: name.to_string(),
                    }),
                }
            }
            other => Err(MapperError::UnknownProperty {
                type_name: format!("{} (at '{path}')", other.kind()),
                access: "readable",
                property: name.to_string(),
            }),
        }
    }

    fn read_index(&self, base: &Value, index: &str, path: &str) -> Result<Value> {
        let forced;
        let base = if let Value::Deferred(deferred) = base {
            forced = deferred.resolve()?;
            &forced
        } else {
            base
        };
        match base {
            Value::Null => Ok(Value::Null),
            Value::Array(items) => {
                let i = parse_sequence_index(index, path)?;
                Ok(items.get(i).cloned().unwrap_or_default())
            }
            Value::Map(map) => Ok(map.get(index).cloned().unwrap_or_default()),
            other => Err(MapperError::UnindexableNode {
                kind: other.kind(),
                path: path.to_string(),
            }),
        }
    }

    fn write_segment(
        &self,
        container: &mut Value,
        seg: &PropertySegment<'_>,
        value: Value,
        path: &str,
    ) -> Result<()> {
        let Some(index) = seg.index else {
            return self.write_name(container, seg.name, value, path);
        };
        let mut base = self.read_name(container, seg.name, path)?;
        if let Value::Deferred(deferred) = &base {
            base = deferred.resolve()?;
        }
        if base.is_null() {
            base = if index.trim().parse::<usize>().is_ok() {
                Value::Array(Vec::new())
            } else {
                Value::Map(Default::default())
            };
        }
        match &mut base {
            Value::Array(items) => {
                let i = parse_sequence_index(index, path)?;
                if i >= items.len() {
                    items.resize(i + 1, Value::Null);
                }
                items[i] = value;
            }
            Value::Map(map) => {
                map.insert(index.to_string(), value);
            }
            other => {
                return Err(MapperError::UnindexableNode {
                    kind: other.kind(),
                    path: path.to_string(),
                });
            }
        }
        self.write_name(container, seg.name, base, path)
    }

    fn write_name(&self, container: &mut Value, name: &str, value: Value, path: &str) -> Result<()> {
        match container {
            Value::Map(map) => {
                map.insert(name.to_string(), value);
                return Ok(());
            }
            Value::Object(_) => {}
            other => {
                return Err(MapperError::UnknownProperty {
                    type_name: format!("{} (at '{path}')", other.kind()),
                    access: "writable",
                    property: name.to_string(),
                });
            }
        }
        let type_name = match container {
            Value::Object(object) => object.type_name.clone(),
            _ => unreachable!(),
        };
        let meta = self.registry.meta_type(&type_name)?;
        if meta.is_open() {
            if let Value::Object(object) = container {
                object.fields.insert(name.to_string(), value);
            }
            return Ok(());
        }
        match meta.property(name) {
            Some(property) if property.writable => {
                property.write(container, value);
                Ok(())
            }
            _ => Err(MapperError::UnknownProperty {
                type_name: type_name.to_string(),
                access: "writable",
                property: name.to_string(),
            }),
        }
    }

    /// Construct the intermediate value a write descends into when the
    /// stored one is null, using the declared property type.
    fn materialize_child(
        &self,
        container: &Value,
        seg: &PropertySegment<'_>,
        path: &str,
    ) -> Result<Value> {
        let factory = ObjectFactory::new(self.registry);
        let declared = self.declared_child_type(container, seg);
        match declared {
            Some(type_name) => factory.create_default(&type_name),
            None => Ok(Value::Map(Default::default())),
        }
        .map_err(|err| match err {
            MapperError::NoDefaultConstructor(_) => MapperError::NoDefaultConstructor(format!(
                "{} (materializing '{}' in '{path}')",
                self.declared_child_type(container, seg).unwrap_or_default(),
                seg.name
            )),
            other => other,
        })
    }

    fn declared_child_type(
        &self,
        container: &Value,
        seg: &PropertySegment<'_>,
    ) -> Option<smol_str::SmolStr> {
        let object = container.as_object()?;
        let meta = self.registry.meta_type(&object.type_name).ok()?;
        let property = meta.property(seg.name)?;
        if seg.index.is_some() {
            property.element_type.clone()
        } else {
            Some(property.declared_type.clone())
        }
    }
}

fn parse_sequence_index(index: &str, path: &str) -> Result<usize> {
    index.trim().parse().map_err(|_| MapperError::MalformedPath {
        path: path.to_string(),
        detail: format!("sequence index '{index}' is not an integer"),
    })
}

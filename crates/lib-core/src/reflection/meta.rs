use std::sync::Arc;

use ahash::AHashMap;
use smol_str::SmolStr;
use sqlmapper_helpers::{IndexMap, canonical_name};

use crate::errors::{MapperError, Result};
use crate::reflection::shape::{
    AccessorDecl, ConstructorDecl, Getter, Setter, ShapeRegistry, TypeShape,
};
use crate::types::sequence_element;
use crate::value::Value;

/// Resolved accessor pair and declared types for one property of a type.
#[derive(Clone)]
pub struct MetaProperty {
    pub name: SmolStr,
    pub declared_type: SmolStr,
    /// Element type when the declared type is a single-parameter generic
    /// sequence, e.g. `Address` for `list<Address>`.
    pub element_type: Option<SmolStr>,
    pub readable: bool,
    pub writable: bool,
    getter: Getter,
    setter: Setter,
}

impl MetaProperty {
    pub fn read(&self, instance: &Value) -> Value {
        (self.getter)(instance)
    }

    pub fn write(&self, instance: &mut Value, value: Value) {
        (self.setter)(instance, value)
    }
}

impl std::fmt::Debug for MetaProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaProperty")
            .field("name", &self.name)
            .field("declared_type", &self.declared_type)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .finish()
    }
}

/// The analyzed, immutable metamodel entry for one application type:
/// readable/writable property sets, canonical-name lookup and resolved
/// accessor pairs. Built once per type and cached by the [`ShapeRegistry`].
pub struct MetaType {
    name: SmolStr,
    /// Types with no registered shape behave as open field bags.
    open: bool,
    properties: IndexMap<SmolStr, MetaProperty>,
    by_lower: AHashMap<String, SmolStr>,
    by_folded: AHashMap<String, SmolStr>,
    constructors: Vec<ConstructorDecl>,
    has_nullary: bool,
    variants: Option<Vec<SmolStr>>,
}

impl MetaType {
    pub(crate) fn build(registry: &ShapeRegistry, name: &str) -> Result<MetaType> {
        let Some(shape) = registry.shape(name) else {
            return Ok(MetaType {
                name: SmolStr::new(name),
                open: true,
                properties: IndexMap::default(),
                by_lower: AHashMap::new(),
                by_folded: AHashMap::new(),
                constructors: Vec::new(),
                has_nullary: true,
                variants: None,
            });
        };

        // Supertype-first so the derived type's declarations win silently
        // where they agree or refine.
        let chain = supertype_chain(registry, &shape)?;
        let mut resolved: IndexMap<SmolStr, ResolvedProperty> = IndexMap::default();
        for link in &chain {
            for decl in &link.accessors {
                resolve_accessor(registry, name, &mut resolved, decl)?;
            }
        }

        let mut properties = IndexMap::default();
        let mut by_lower = AHashMap::new();
        let mut by_folded = AHashMap::new();
        for (prop_name, candidate) in resolved {
            by_lower.insert(canonical_name(&prop_name, false), prop_name.clone());
            by_folded.insert(canonical_name(&prop_name, true), prop_name.clone());
            properties.insert(prop_name.clone(), candidate.into_property());
        }

        Ok(MetaType {
            name: shape.name.clone(),
            open: false,
            properties,
            by_lower,
            by_folded,
            constructors: shape.constructors.clone(),
            has_nullary: shape.has_nullary_constructor(),
            variants: shape.variants.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_enum(&self) -> bool {
        self.variants.is_some()
    }

    pub fn variants(&self) -> Option<&[SmolStr]> {
        self.variants.as_deref()
    }

    pub fn has_nullary_constructor(&self) -> bool {
        self.has_nullary
    }

    pub fn constructors(&self) -> &[ConstructorDecl] {
        &self.constructors
    }

    pub fn readable_names(&self) -> impl Iterator<Item = &str> {
        self.properties
            .values()
            .filter(|p| p.readable)
            .map(|p| p.name.as_str())
    }

    pub fn writable_names(&self) -> impl Iterator<Item = &str> {
        self.properties
            .values()
            .filter(|p| p.writable)
            .map(|p| p.name.as_str())
    }

    pub fn property(&self, name: &str) -> Option<&MetaProperty> {
        self.properties.get(name)
    }

    /// Case-insensitive canonical lookup used to map column-derived names
    /// to property names; `fold_underscores` additionally matches
    /// `user_name` to `userName`.
    pub fn find_property(&self, name: &str, fold_underscores: bool) -> Option<&MetaProperty> {
        if let Some(property) = self.properties.get(name) {
            return Some(property);
        }
        let table = if fold_underscores {
            &self.by_folded
        } else {
            &self.by_lower
        };
        let actual = table.get(&canonical_name(name, fold_underscores))?;
        self.properties.get(actual)
    }
}

impl std::fmt::Debug for MetaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaType")
            .field("name", &self.name)
            .field("open", &self.open)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct ResolvedProperty {
    name: SmolStr,
    read_type: Option<SmolStr>,
    write_type: Option<SmolStr>,
    boolean_flavor: bool,
    getter: Option<Getter>,
    setter: Option<Setter>,
}

impl ResolvedProperty {
    fn into_property(self) -> MetaProperty {
        let declared_type = self
            .read_type
            .clone()
            .or_else(|| self.write_type.clone())
            .unwrap_or_else(|| SmolStr::new_static("map"));
        let element_type = sequence_element(&declared_type);
        let name = self.name.clone();
        let getter = self.getter.unwrap_or_else(|| default_getter(name.clone()));
        let setter = self.setter.unwrap_or_else(|| default_setter(name.clone()));
        MetaProperty {
            name: self.name,
            declared_type,
            element_type,
            readable: self.read_type.is_some(),
            writable: self.write_type.is_some(),
            getter,
            setter,
        }
    }
}

fn default_getter(name: SmolStr) -> Getter {
    Arc::new(move |instance| match instance {
        Value::Object(object) => object.fields.get(name.as_str()).cloned().unwrap_or_default(),
        Value::Map(map) => map.get(name.as_str()).cloned().unwrap_or_default(),
        _ => Value::Null,
    })
}

fn default_setter(name: SmolStr) -> Setter {
    Arc::new(move |instance, value| match instance {
        Value::Object(object) => {
            object.fields.insert(name.to_string(), value);
        }
        Value::Map(map) => {
            map.insert(name.to_string(), value);
        }
        _ => {}
    })
}

fn supertype_chain(
    registry: &ShapeRegistry,
    shape: &Arc<TypeShape>,
) -> Result<Vec<Arc<TypeShape>>> {
    let mut chain = vec![shape.clone()];
    let mut current = shape.clone();
    while let Some(parent_name) = current.extends.clone() {
        if chain.iter().any(|s| s.name == parent_name) {
            return Err(MapperError::config(format!(
                "cyclic shape inheritance through '{parent_name}'"
            )));
        }
        let Some(parent) = registry.shape(&parent_name) else {
            return Err(MapperError::config(format!(
                "shape '{}' extends unregistered type '{parent_name}'",
                current.name
            )));
        };
        chain.push(parent.clone());
        current = parent;
    }
    chain.reverse();
    Ok(chain)
}

/// Fold one accessor declaration into the property being resolved,
/// applying the conflict rules: a more specific declared type wins, an
/// `is`-style boolean reader wins at identical types, unrelated types are
/// ambiguous.
fn resolve_accessor(
    registry: &ShapeRegistry,
    type_name: &str,
    resolved: &mut IndexMap<SmolStr, ResolvedProperty>,
    decl: &AccessorDecl,
) -> Result<()> {
    let entry = resolved
        .entry(decl.property.clone())
        .or_insert_with(|| ResolvedProperty {
            name: decl.property.clone(),
            read_type: None,
            write_type: None,
            boolean_flavor: false,
            getter: None,
            setter: None,
        });

    if decl.readable {
        match &entry.read_type {
            None => {
                entry.read_type = Some(decl.declared_type.clone());
                entry.boolean_flavor = decl.boolean_flavor;
                entry.getter = decl.getter.clone();
            }
            Some(current) => {
                if *current == decl.declared_type {
                    // `isX` beats `getX` at identical return types.
                    if decl.boolean_flavor || !entry.boolean_flavor {
                        entry.boolean_flavor = entry.boolean_flavor || decl.boolean_flavor;
                        if decl.getter.is_some() || !decl.boolean_flavor {
                            entry.getter = decl.getter.clone().or(entry.getter.take());
                        }
                    }
                } else if registry.is_assignable(current, &decl.declared_type) {
                    entry.read_type = Some(decl.declared_type.clone());
                    entry.boolean_flavor = decl.boolean_flavor;
                    entry.getter = decl.getter.clone();
                } else if !registry.is_assignable(&decl.declared_type, current) {
                    return Err(MapperError::AmbiguousAccessor {
                        type_name: type_name.to_string(),
                        property: decl.property.to_string(),
                    });
                }
            }
        }
    }

    if decl.writable {
        match &entry.write_type {
            None => {
                entry.write_type = Some(decl.declared_type.clone());
                entry.setter = decl.setter.clone();
            }
            Some(current) => {
                if *current == decl.declared_type {
                    entry.setter = decl.setter.clone().or(entry.setter.take());
                } else if registry.is_assignable(current, &decl.declared_type) {
                    entry.write_type = Some(decl.declared_type.clone());
                    entry.setter = decl.setter.clone();
                } else if !registry.is_assignable(&decl.declared_type, current) {
                    return Err(MapperError::AmbiguousAccessor {
                        type_name: type_name.to_string(),
                        property: decl.property.to_string(),
                    });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::reflection::shape::TypeShape;

    fn registry() -> ShapeRegistry {
        let registry = ShapeRegistry::new();
        registry.register(
            TypeShape::builder("Entity")
                .field("id", "long")
                .read_only("label", "string")
                .build(),
        );
        registry.register(
            TypeShape::builder("Person")
                .extends("Entity")
                .field("name", "string")
                .field("addresses", "list<Address>")
                .build(),
        );
        registry.register(TypeShape::builder("Address").field("street", "string").build());
        registry
    }

    #[test]
    fn inherits_supertype_properties() {
        let registry = registry();
        let meta = registry.meta_type("Person").unwrap();
        let mut readable: Vec<_> = meta.readable_names().collect();
        readable.sort_unstable();
        assert_eq!(readable, vec!["addresses", "id", "label", "name"]);
        assert!(meta.property("label").is_some_and(|p| !p.writable));
    }

    #[test]
    fn collection_element_type_is_resolved() {
        let registry = registry();
        let meta = registry.meta_type("Person").unwrap();
        let property = meta.property("addresses").unwrap();
        assert_eq!(property.element_type.as_deref(), Some("Address"));
    }

    #[test]
    fn canonical_lookup_is_case_insensitive() {
        let registry = registry();
        let meta = registry.meta_type("Person").unwrap();
        assert!(meta.find_property("NAME", false).is_some());
        assert!(meta.find_property("nAmE", false).is_some());
        assert!(meta.find_property("missing", false).is_none());
    }

    #[test]
    fn underscore_folding_matches_camel_case() {
        let registry = ShapeRegistry::new();
        registry.register(TypeShape::builder("User").field("userName", "string").build());
        let meta = registry.meta_type("User").unwrap();
        assert!(meta.find_property("user_name", true).is_some());
        assert!(meta.find_property("USER_NAME", true).is_some());
        assert!(meta.find_property("user_name", false).is_none());
    }

    #[test]
    fn boolean_reader_wins_at_identical_types() {
        let registry = ShapeRegistry::new();
        registry.register(
            TypeShape::builder("Flagged")
                .reader("active", "boolean")
                .boolean_reader("active")
                .writer("active", "boolean")
                .build(),
        );
        let meta = registry.meta_type("Flagged").unwrap();
        let property = meta.property("active").unwrap();
        assert!(property.readable && property.writable);
        assert_eq!(property.declared_type, "boolean");
    }

    #[test]
    fn more_specific_reader_type_wins() {
        let registry = registry();
        registry.register(
            TypeShape::builder("Holder")
                .reader("owner", "Entity")
                .reader("owner", "Person")
                .build(),
        );
        let meta = registry.meta_type("Holder").unwrap();
        assert_eq!(meta.property("owner").unwrap().declared_type, "Person");
    }

    #[test]
    fn unrelated_reader_types_are_ambiguous() {
        let registry = registry();
        registry.register(
            TypeShape::builder("Broken")
                .reader("owner", "Address")
                .reader("owner", "Person")
                .build(),
        );
        let err = registry.meta_type("Broken").unwrap_err();
        assert!(matches!(err, MapperError::AmbiguousAccessor { .. }));
    }

    #[test]
    fn concurrent_population_converges() {
        let registry = registry();
        let first = registry.meta_type("Person").unwrap();
        let second = registry.meta_type("Person").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}

use std::sync::{Arc, RwLock};

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::errors::Result;
use crate::reflection::meta::MetaType;
use crate::types::{is_scalar_type, normalize_type_name};
use crate::value::Value;

/// Reads a property value off a live instance.
pub type Getter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
/// Writes a property value onto a live instance.
pub type Setter = Arc<dyn Fn(&mut Value, Value) + Send + Sync>;

/// A registered accessor declaration. A shape may declare several accessors
/// for the same property (inherited or overloaded readers); the metamodel
/// resolves them when it is built.
#[derive(Clone)]
pub struct AccessorDecl {
    pub property: SmolStr,
    pub declared_type: SmolStr,
    pub readable: bool,
    pub writable: bool,
    /// The `is`-style boolean reader form, preferred over a plain reader of
    /// the same type.
    pub boolean_flavor: bool,
    pub getter: Option<Getter>,
    pub setter: Option<Setter>,
}

impl std::fmt::Debug for AccessorDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessorDecl")
            .field("property", &self.property)
            .field("declared_type", &self.declared_type)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("boolean_flavor", &self.boolean_flavor)
            .finish()
    }
}

/// A positional constructor: ordered (property, declared type) parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorDecl {
    pub params: Vec<(SmolStr, SmolStr)>,
}

/// The registered description of an application type: the "shape" the
/// metamodel analyzes in place of runtime reflection.
#[derive(Clone)]
pub struct TypeShape {
    pub(crate) name: SmolStr,
    pub(crate) extends: Option<SmolStr>,
    pub(crate) variants: Option<Vec<SmolStr>>,
    pub(crate) accessors: Vec<AccessorDecl>,
    pub(crate) constructors: Vec<ConstructorDecl>,
}

impl TypeShape {
    pub fn builder(name: &str) -> ShapeBuilder {
        ShapeBuilder {
            shape: TypeShape {
                name: SmolStr::new(name),
                extends: None,
                variants: None,
                accessors: Vec::new(),
                constructors: Vec::new(),
            },
        }
    }

    /// An enum shape; values are `Value::String` variant names and the
    /// default codec for the type is name-based.
    pub fn enumeration(name: &str, variants: &[&str]) -> TypeShape {
        TypeShape {
            name: SmolStr::new(name),
            extends: None,
            variants: Some(variants.iter().map(|v| SmolStr::new(v)).collect()),
            accessors: Vec::new(),
            constructors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enum(&self) -> bool {
        self.variants.is_some()
    }

    /// A nullary constructor exists when none is declared (the implicit
    /// default) or when an empty parameter list was declared explicitly.
    pub fn has_nullary_constructor(&self) -> bool {
        self.constructors.is_empty() || self.constructors.iter().any(|c| c.params.is_empty())
    }
}

pub struct ShapeBuilder {
    shape: TypeShape,
}

impl ShapeBuilder {
    pub fn extends(mut self, parent: &str) -> Self {
        self.shape.extends = Some(SmolStr::new(parent));
        self
    }

    /// A plain readable + writable field.
    pub fn field(self, name: &str, declared_type: &str) -> Self {
        self.accessor(name, declared_type, true, true, false, None, None)
    }

    pub fn read_only(self, name: &str, declared_type: &str) -> Self {
        self.accessor(name, declared_type, true, false, false, None, None)
    }

    /// An additional reader declaration for a property; several readers of
    /// the same property are resolved when the metamodel is built.
    pub fn reader(self, name: &str, declared_type: &str) -> Self {
        self.accessor(name, declared_type, true, false, false, None, None)
    }

    /// An `is`-style boolean reader.
    pub fn boolean_reader(self, name: &str) -> Self {
        self.accessor(name, "boolean", true, false, true, None, None)
    }

    pub fn writer(self, name: &str, declared_type: &str) -> Self {
        self.accessor(name, declared_type, false, true, false, None, None)
    }

    /// A field backed by custom accessor closures instead of the default
    /// field storage.
    pub fn field_with(
        self,
        name: &str,
        declared_type: &str,
        getter: Getter,
        setter: Setter,
    ) -> Self {
        self.accessor(name, declared_type, true, true, false, Some(getter), Some(setter))
    }

    fn accessor(
        mut self,
        name: &str,
        declared_type: &str,
        readable: bool,
        writable: bool,
        boolean_flavor: bool,
        getter: Option<Getter>,
        setter: Option<Setter>,
    ) -> Self {
        self.shape.accessors.push(AccessorDecl {
            property: SmolStr::new(name),
            declared_type: normalize_type_name(declared_type),
            readable,
            writable,
            boolean_flavor,
            getter,
            setter,
        });
        self
    }

    /// Declare a positional constructor over (property, declared type)
    /// pairs. Declaring any constructor removes the implicit nullary one;
    /// pass an empty slice to keep it.
    pub fn constructor(mut self, params: &[(&str, &str)]) -> Self {
        self.shape.constructors.push(ConstructorDecl {
            params: params
                .iter()
                .map(|(p, t)| (SmolStr::new(p), normalize_type_name(t)))
                .collect(),
        });
        self
    }

    pub fn build(self) -> TypeShape {
        self.shape
    }
}

/// Process-wide registry of type shapes and the metamodel cache over them.
///
/// Shapes are registered during bootstrap; the metamodel cache is populated
/// on first use and is safe for concurrent reads. Concurrent first
/// population of the same type may redundantly analyze but converges to a
/// single published entry.
#[derive(Default)]
pub struct ShapeRegistry {
    shapes: RwLock<AHashMap<SmolStr, Arc<TypeShape>>>,
    metas: RwLock<AHashMap<SmolStr, Arc<MetaType>>>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, shape: TypeShape) {
        let mut shapes = self.shapes.write().unwrap();
        shapes.insert(shape.name.clone(), Arc::new(shape));
    }

    pub fn shape(&self, name: &str) -> Option<Arc<TypeShape>> {
        self.shapes.read().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.shapes.read().unwrap().contains_key(name)
    }

    pub fn is_enum(&self, name: &str) -> bool {
        self.shape(name).is_some_and(|s| s.is_enum())
    }

    pub fn enum_variants(&self, name: &str) -> Option<Vec<SmolStr>> {
        self.shape(name).and_then(|s| s.variants.clone())
    }

    /// Whether a value of type `actual` can stand where `expected` is
    /// declared: identical names, or `actual`'s extends chain reaches
    /// `expected`.
    pub fn is_assignable(&self, expected: &str, actual: &str) -> bool {
        if expected == actual {
            return true;
        }
        if is_scalar_type(expected) || is_scalar_type(actual) {
            return false;
        }
        let shapes = self.shapes.read().unwrap();
        let mut current = actual;
        let mut hops = 0;
        while let Some(shape) = shapes.get(current) {
            match &shape.extends {
                Some(parent) if hops < 64 => {
                    if parent == expected {
                        return true;
                    }
                    current = parent;
                    hops += 1;
                }
                _ => break,
            }
        }
        false
    }

    /// The cached metamodel entry for a type, built on first access and
    /// published under compare-and-set so concurrent builders converge.
    pub fn meta_type(&self, name: &str) -> Result<Arc<MetaType>> {
        if let Some(meta) = self.metas.read().unwrap().get(name) {
            return Ok(meta.clone());
        }
        log::trace!("analyzing type shape '{name}'");
        let built = Arc::new(MetaType::build(self, name)?);
        let mut metas = self.metas.write().unwrap();
        Ok(metas.entry(SmolStr::new(name)).or_insert(built).clone())
    }
}

impl std::fmt::Debug for ShapeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shapes = self.shapes.read().unwrap();
        f.debug_struct("ShapeRegistry")
            .field("types", &shapes.keys().collect::<Vec<_>>())
            .finish()
    }
}

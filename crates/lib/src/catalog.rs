use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use smol_str::SmolStr;
use sqlmapper_lib_core::codec::{CodecRegistry, TypeCodec};
use sqlmapper_lib_core::driver::Connection;
use sqlmapper_lib_core::errors::{MapperError, Result};
use sqlmapper_lib_core::reflection::{ShapeRegistry, TypeShape};

use crate::cache::SharedCacheHandle;
use crate::compiler::Compiler;
use crate::config::Settings;
use crate::executor::Executor;
use crate::mapping::{MappedStatement, ResultMap};
use crate::xml::{XmlElement, parse_document};

/// Mutable bootstrap-phase registry. `build()` runs the mapping compiler
/// and produces the immutable [`Catalog`]; the phase transition is the type
/// change, there is no runtime flag.
pub struct CatalogBuilder {
    settings: Settings,
    environment_id: String,
    database_id: Option<String>,
    shapes: Arc<ShapeRegistry>,
    codecs: CodecRegistry,
    documents: Vec<XmlElement>,
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogBuilder {
    pub fn new() -> Self {
        CatalogBuilder {
            settings: Settings::default(),
            environment_id: "default".to_string(),
            database_id: None,
            shapes: Arc::new(ShapeRegistry::new()),
            codecs: CodecRegistry::with_defaults(),
            documents: Vec::new(),
        }
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn environment(&mut self, id: &str) -> &mut Self {
        self.environment_id = id.to_string();
        self
    }

    pub fn database_id(&mut self, id: &str) -> &mut Self {
        self.database_id = Some(id.to_string());
        self
    }

    pub fn register_shape(&mut self, shape: TypeShape) -> &mut Self {
        self.shapes.register(shape);
        self
    }

    pub fn register_codec(&mut self, name: &str, codec: Arc<dyn TypeCodec>) -> &mut Self {
        self.codecs.register_named(name, codec);
        self
    }

    /// Apply a `<configuration>` document: settings, the default
    /// environment id, and inline `<mappers>` are recognized.
    pub fn load_config_xml(&mut self, source: &str) -> Result<&mut Self> {
        let root = parse_document(source)?;
        if root.name != "configuration" {
            return Err(MapperError::config(format!(
                "expected <configuration> root, found <{}>",
                root.name
            )));
        }
        for child in root.elements() {
            match child.name.as_str() {
                "settings" => self.settings = Settings::from_settings_element(child)?,
                "environments" => {
                    let default = child.required_attr("default")?;
                    if !child
                        .elements()
                        .any(|env| env.name == "environment" && env.attr("id") == Some(default))
                    {
                        return Err(MapperError::config(format!(
                            "default environment '{default}' is not declared"
                        )));
                    }
                    self.environment_id = default.to_string();
                }
                "databaseIdProvider" => {
                    if let Some(value) = child.attr("value") {
                        self.database_id = Some(value.to_string());
                    }
                }
                "mappers" => {
                    for mapper in child.elements() {
                        let resource = mapper.required_attr("resource")?;
                        self.add_mapper_file(resource)?;
                    }
                }
                other => {
                    return Err(MapperError::config(format!(
                        "unknown <configuration> element <{other}>"
                    )));
                }
            }
        }
        Ok(self)
    }

    pub fn add_mapper_xml(&mut self, source: &str) -> Result<&mut Self> {
        let root = parse_document(source)?;
        if root.name != "mapper" {
            return Err(MapperError::config(format!(
                "expected <mapper> root, found <{}>",
                root.name
            )));
        }
        root.required_attr("namespace")?;
        self.documents.push(root);
        Ok(self)
    }

    pub fn add_mapper_file(&mut self, path: &str) -> Result<&mut Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|err| MapperError::config(format!("cannot read mapper '{path}': {err}")))?;
        self.add_mapper_xml(&source)
    }

    /// Run both compilation passes and seal the catalog. This is the
    /// "bootstrap complete" transition; the result is read-only.
    pub fn build(self) -> Result<Arc<Catalog>> {
        let mut compiler = Compiler::new(
            &self.settings,
            self.database_id.as_deref(),
            self.shapes.clone(),
        );
        for document in &self.documents {
            compiler.emit(document)?;
        }
        let compiled = compiler.resolve()?;

        tracing::debug!(
            statements = compiled.statements.len(),
            result_maps = compiled.result_maps.len(),
            caches = compiled.caches.len(),
            "mapping compilation complete"
        );

        Ok(Arc::new(Catalog {
            settings: self.settings,
            environment_id: self.environment_id,
            database_id: self.database_id,
            shapes: self.shapes,
            codecs: Arc::new(self.codecs),
            statements: compiled.statements,
            result_maps: compiled.result_maps,
            caches: compiled.caches,
        }))
    }
}

/// The process-wide read-only registry every invocation consults.
pub struct Catalog {
    settings: Settings,
    environment_id: String,
    #[allow(dead_code)]
    database_id: Option<String>,
    shapes: Arc<ShapeRegistry>,
    codecs: Arc<CodecRegistry>,
    statements: AHashMap<SmolStr, Arc<MappedStatement>>,
    result_maps: AHashMap<SmolStr, Arc<ResultMap>>,
    caches: AHashMap<SmolStr, SharedCacheHandle>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn environment_id(&self) -> &str {
        &self.environment_id
    }

    pub fn shapes(&self) -> &Arc<ShapeRegistry> {
        &self.shapes
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Look a statement up by qualified name, or by unambiguous short name.
    pub fn statement(&self, name: &str) -> Result<Arc<MappedStatement>> {
        if let Some(statement) = self.statements.get(name) {
            return Ok(statement.clone());
        }
        if !name.contains('.') {
            let suffix = format!(".{name}");
            let mut matches = self
                .statements
                .values()
                .filter(|s| s.id.ends_with(&suffix));
            if let Some(first) = matches.next() {
                if matches.next().is_some() {
                    return Err(MapperError::config(format!(
                        "short statement name '{name}' is ambiguous"
                    )));
                }
                return Ok(first.clone());
            }
        }
        Err(MapperError::config(format!("unknown statement '{name}'")))
    }

    pub fn result_map(&self, name: &str) -> Result<Arc<ResultMap>> {
        self.result_maps
            .get(name)
            .cloned()
            .ok_or_else(|| MapperError::config(format!("unknown result map '{name}'")))
    }

    pub fn has_result_map(&self, name: &str) -> bool {
        self.result_maps.contains_key(name)
    }

    /// The effective second-tier cache of a namespace, following
    /// `<cache-ref>` indirection resolved at compile time.
    pub fn cache(&self, namespace: &str) -> Option<&SharedCacheHandle> {
        self.caches.get(namespace)
    }

    pub fn statement_names(&self) -> impl Iterator<Item = &str> {
        self.statements.keys().map(SmolStr::as_str)
    }

    /// Open a single-threaded session executor over a driver connection.
    pub fn open_session(self: &Arc<Self>, connection: Box<dyn Connection>) -> Executor {
        Executor::new(self.clone(), Arc::new(Mutex::new(connection)))
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("environment_id", &self.environment_id)
            .field("statements", &self.statements.len())
            .field("result_maps", &self.result_maps.len())
            .field("caches", &self.caches.len())
            .finish()
    }
}

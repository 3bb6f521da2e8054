mod include;
mod result_map;
mod script;
mod statement;

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use smol_str::SmolStr;
use sqlmapper_lib_core::errors::{MapperError, Result};
use sqlmapper_lib_core::reflection::ShapeRegistry;

use crate::cache::{SharedCache, SharedCacheHandle};
use crate::config::Settings;
use crate::mapping::{CacheConfig, Eviction, MappedStatement, ResultMap, qualify};
use crate::xml::XmlElement;

pub(crate) use include::resolve_includes;
pub(crate) use script::build_sql_source;

/// Output of a completed compilation.
#[derive(Debug)]
pub(crate) struct CompiledUnits {
    pub statements: AHashMap<SmolStr, Arc<MappedStatement>>,
    pub result_maps: AHashMap<SmolStr, Arc<ResultMap>>,
    pub caches: AHashMap<SmolStr, SharedCacheHandle>,
}

/// An element pass 1 registered but could not finish; pass 2 retries these
/// in a fixed-point loop until the set empties or stops shrinking.
enum Pending {
    ResultMap {
        namespace: SmolStr,
        element: XmlElement,
    },
    Statement {
        namespace: SmolStr,
        element: XmlElement,
    },
    CacheRef {
        namespace: SmolStr,
        target: SmolStr,
    },
}

impl Pending {
    fn describe(&self) -> (&'static str, String) {
        match self {
            Pending::ResultMap { namespace, element } => (
                "result map",
                qualify(namespace, element.attr("id").unwrap_or("?")).to_string(),
            ),
            Pending::Statement { namespace, element } => (
                "statement",
                qualify(namespace, element.attr("id").unwrap_or("?")).to_string(),
            ),
            Pending::CacheRef { namespace, target } => {
                ("cache-ref", format!("{namespace} -> {target}"))
            }
        }
    }
}

enum Resolution {
    Done,
    NotReady(Pending),
}

/// The two-pass mapping compiler. `emit` is pass 1 (parse, register
/// namespaces, collect fragments and skeletons); `resolve` is pass 2
/// (includes, inheritance, cache references) with fixed-point retries.
pub(crate) struct Compiler<'a> {
    settings: &'a Settings,
    database_id: Option<&'a str>,
    shapes: Arc<ShapeRegistry>,
    namespaces: AHashSet<SmolStr>,
    fragments: AHashMap<SmolStr, XmlElement>,
    caches: AHashMap<SmolStr, SharedCacheHandle>,
    statements: AHashMap<SmolStr, Arc<MappedStatement>>,
    result_maps: AHashMap<SmolStr, Arc<ResultMap>>,
    pending: Vec<Pending>,
}

impl<'a> Compiler<'a> {
    pub fn new(
        settings: &'a Settings,
        database_id: Option<&'a str>,
        shapes: Arc<ShapeRegistry>,
    ) -> Self {
        Compiler {
            settings,
            database_id,
            shapes,
            namespaces: AHashSet::new(),
            fragments: AHashMap::new(),
            caches: AHashMap::new(),
            statements: AHashMap::new(),
            result_maps: AHashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Pass 1 over one `<mapper>` document.
    pub fn emit(&mut self, document: &XmlElement) -> Result<()> {
        let namespace = SmolStr::new(document.required_attr("namespace")?);
        if !self.namespaces.insert(namespace.clone()) {
            return Err(MapperError::config(format!(
                "namespace '{namespace}' is declared by more than one mapper"
            )));
        }

        for child in document.elements() {
            match child.name.as_str() {
                "cache" => {
                    let config = parse_cache_config(child)?;
                    self.caches
                        .insert(namespace.clone(), SharedCache::build(&namespace, &config));
                }
                "cache-ref" => {
                    let target = SmolStr::new(child.required_attr("namespace")?);
                    self.pending.push(Pending::CacheRef {
                        namespace: namespace.clone(),
                        target,
                    });
                }
                "sql" => {
                    let id = qualify(&namespace, child.required_attr("id")?);
                    if self.fragments.insert(id.clone(), child.clone()).is_some() {
                        return Err(MapperError::config(format!(
                            "sql fragment '{id}' is declared twice"
                        )));
                    }
                }
                "resultMap" => {
                    child.required_attr("id")?;
                    self.pending.push(Pending::ResultMap {
                        namespace: namespace.clone(),
                        element: child.clone(),
                    });
                }
                "select" | "insert" | "update" | "delete" => {
                    child.required_attr("id")?;
                    self.pending.push(Pending::Statement {
                        namespace: namespace.clone(),
                        element: child.clone(),
                    });
                }
                other => {
                    return Err(MapperError::config(format!(
                        "unknown mapper element <{other}> in namespace '{namespace}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Pass 2: retry pending elements until the queue empties. A round with
    /// no progress reports the leftover set as fatal.
    pub fn resolve(mut self) -> Result<CompiledUnits> {
        let mut pending = std::mem::take(&mut self.pending);
        while !pending.is_empty() {
            let mut next = Vec::new();
            let mut progressed = false;
            for item in pending {
                match self.try_resolve(item)? {
                    Resolution::Done => progressed = true,
                    Resolution::NotReady(item) => next.push(item),
                }
            }
            if !next.is_empty() && !progressed {
                return Err(self.report_incomplete(&next));
            }
            pending = next;
        }

        Ok(CompiledUnits {
            statements: self.statements,
            result_maps: self.result_maps,
            caches: self.caches,
        })
    }

    fn try_resolve(&mut self, item: Pending) -> Result<Resolution> {
        match item {
            Pending::CacheRef { namespace, target } => {
                match self.caches.get(&target) {
                    Some(cache) => {
                        let cache = cache.clone();
                        self.caches.insert(namespace, cache);
                        Ok(Resolution::Done)
                    }
                    None => Ok(Resolution::NotReady(Pending::CacheRef { namespace, target })),
                }
            }
            Pending::ResultMap { namespace, element } => {
                match result_map::try_build_result_map(self, &namespace, &element)? {
                    true => Ok(Resolution::Done),
                    false => Ok(Resolution::NotReady(Pending::ResultMap { namespace, element })),
                }
            }
            Pending::Statement { namespace, element } => {
                match statement::try_build_statement(self, &namespace, &element)? {
                    true => Ok(Resolution::Done),
                    false => Ok(Resolution::NotReady(Pending::Statement { namespace, element })),
                }
            }
        }
    }

    /// The queue stopped shrinking: distinguish inheritance cycles from
    /// plain unresolved references.
    fn report_incomplete(&self, leftovers: &[Pending]) -> MapperError {
        let mut extends: AHashMap<SmolStr, SmolStr> = AHashMap::new();
        for item in leftovers {
            if let Pending::ResultMap { namespace, element } = item {
                if let (Some(id), Some(parent)) = (element.attr("id"), element.attr("extends")) {
                    extends.insert(
                        qualify(namespace, id),
                        qualify(namespace, parent),
                    );
                }
            }
        }
        for start in extends.keys() {
            let mut seen = AHashSet::new();
            let mut current = start.clone();
            while let Some(parent) = extends.get(&current) {
                if !seen.insert(current.clone()) {
                    return MapperError::CyclicResultMapExtension(start.to_string());
                }
                current = parent.clone();
            }
        }

        let (kind, name) = leftovers[0].describe();
        MapperError::IncompleteElement {
            kind,
            name: format!(
                "{name}{}",
                if leftovers.len() > 1 {
                    format!(" (and {} more)", leftovers.len() - 1)
                } else {
                    String::new()
                }
            ),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        self.settings
    }

    pub(crate) fn database_id(&self) -> Option<&str> {
        self.database_id
    }

    pub(crate) fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    pub(crate) fn fragments(&self) -> &AHashMap<SmolStr, XmlElement> {
        &self.fragments
    }

    pub(crate) fn has_result_map(&self, name: &str) -> bool {
        self.result_maps.contains_key(name)
    }

    pub(crate) fn result_map(&self, name: &str) -> Option<&Arc<ResultMap>> {
        self.result_maps.get(name)
    }

    pub(crate) fn insert_result_map(&mut self, map: ResultMap) -> Result<()> {
        let id = map.id.clone();
        if self.result_maps.insert(id.clone(), Arc::new(map)).is_some() {
            return Err(MapperError::config(format!(
                "result map '{id}' is declared twice"
            )));
        }
        Ok(())
    }

    pub(crate) fn insert_statement(&mut self, statement: MappedStatement) -> Result<()> {
        let id = statement.id.clone();
        match self.statements.get(&id) {
            None => {
                self.statements.insert(id, Arc::new(statement));
                Ok(())
            }
            Some(existing) => {
                // A databaseId-specific statement displaces the generic
                // one; the generic one never displaces a specific match.
                if existing.database_id.is_none() && statement.database_id.is_some() {
                    self.statements.insert(id, Arc::new(statement));
                    Ok(())
                } else if existing.database_id.is_some() && statement.database_id.is_none() {
                    Ok(())
                } else {
                    Err(MapperError::config(format!(
                        "statement '{id}' is declared twice"
                    )))
                }
            }
        }
    }
}

fn parse_cache_config(element: &XmlElement) -> Result<CacheConfig> {
    let mut config = CacheConfig::default();
    if let Some(eviction) = element.attr("eviction") {
        config.eviction = eviction.parse().map_err(|_| {
            MapperError::config(format!("unknown cache eviction policy '{eviction}'"))
        })?;
    }
    config.flush_interval_ms = element.numeric_attr("flushInterval")?;
    if let Some(size) = element.numeric_attr("size")? {
        config.size = size;
    } else if config.eviction == Eviction::Weak {
        // Weak eviction pins far fewer entries by default.
        config.size = 256;
    }
    config.read_only = element.bool_attr("readOnly", false)?;
    config.blocking = element.bool_attr("blocking", false)?;
    let _ = element.attr("type");
    Ok(config)
}

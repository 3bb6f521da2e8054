use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use itertools::Itertools;
use sqlmapper_lib_core::driver::{ColumnRef, Connection, DriverError, Statement};
use sqlmapper_lib_core::errors::{MapperError, Result};
use sqlmapper_lib_core::nodes::BoundSql;
use sqlmapper_lib_core::reflection::Navigator;
use sqlmapper_lib_core::tokens::resolve_property_type;
use sqlmapper_lib_core::value::Value;

use crate::binder::ParameterBinder;
use crate::cache::transactional::TransactionalCacheManager;
use crate::cache::{CacheKey, CachedValue};
use crate::catalog::Catalog;
use crate::config::LocalCacheScope;
use crate::mapping::{MappedStatement, RowBounds, SqlCommandKind};
use crate::results::ResultMapper;

pub(crate) type SharedConnection = Arc<Mutex<Box<dyn Connection>>>;

/// The per-session invocation engine: first-tier local cache, transactional
/// staging over the shared second tier, parameter binding and row mapping.
/// A session is single-threaded by construction and must not be shared.
pub struct Executor {
    catalog: Arc<Catalog>,
    connection: SharedConnection,
    local_cache: AHashMap<CacheKey, CachedValue>,
    tcm: TransactionalCacheManager,
    closed: bool,
}

impl Executor {
    pub(crate) fn new(catalog: Arc<Catalog>, connection: SharedConnection) -> Self {
        Executor {
            catalog,
            connection,
            local_cache: AHashMap::new(),
            tcm: TransactionalCacheManager::new(),
            closed: false,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn query(&mut self, statement: &str, parameter: Value) -> Result<Vec<Value>> {
        self.query_bounded(statement, parameter, RowBounds::default())
    }

    pub fn query_bounded(
        &mut self,
        statement: &str,
        parameter: Value,
        bounds: RowBounds,
    ) -> Result<Vec<Value>> {
        let result = self.do_query(statement, &parameter, bounds);
        self.note_broken_connection(&result);
        result
    }

    pub fn select_one(&mut self, statement: &str, parameter: Value) -> Result<Option<Value>> {
        let mut rows = self.query(statement, parameter)?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(rows.remove(0))),
            n => Err(MapperError::config(format!(
                "statement '{statement}' returned {n} rows where one was expected"
            ))),
        }
    }

    pub fn update(&mut self, statement: &str, parameter: &mut Value) -> Result<u64> {
        let result = self.do_update(statement, parameter);
        self.note_broken_connection(&result);
        result
    }

    /// Commit the driver transaction and flush staged cache writes to the
    /// shared store.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.connection.lock().unwrap().commit()?;
        self.tcm.commit();
        self.local_cache.clear();
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.connection.lock().unwrap().rollback()?;
        self.tcm.rollback();
        self.local_cache.clear();
        Ok(())
    }

    /// Close the session, discarding uncommitted cache staging. Safe to
    /// call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.connection.lock().unwrap().rollback();
        self.tcm.rollback();
        self.local_cache.clear();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(MapperError::config("session is closed".to_string()));
        }
        Ok(())
    }

    fn note_broken_connection<T>(&mut self, result: &Result<T>) {
        let broken = match result {
            Err(MapperError::Execution { source, .. }) => source.connection_broken,
            Err(MapperError::Driver(source)) => source.connection_broken,
            _ => false,
        };
        if broken {
            self.closed = true;
        }
    }

    fn do_query(&mut self, name: &str, parameter: &Value, bounds: RowBounds) -> Result<Vec<Value>> {
        self.ensure_open()?;
        let statement = self.catalog.statement(name)?;
        if statement.kind != SqlCommandKind::Select {
            return Err(MapperError::config(format!(
                "statement '{}' is not a SELECT",
                statement.id
            )));
        }

        let bound = statement
            .source
            .bound_sql(self.catalog.shapes(), parameter)?;
        let values =
            ParameterBinder::new(&self.catalog).collect_values(&statement.id, &bound, parameter)?;

        if self.catalog.settings().safe_row_bounds_enabled && !bounds.is_default() {
            let map = self.catalog.result_map(&statement.result_maps[0])?;
            if map.has_nested_result_maps() {
                return Err(MapperError::config(format!(
                    "safeRowBoundsEnabled forbids row bounds on '{}' (nested result maps)",
                    statement.id
                )));
            }
        }

        let key = self.cache_key(&statement, &bound.sql, &values, bounds);
        let second_tier = if self.catalog.settings().cache_enabled {
            self.catalog.cache(&statement.namespace).cloned()
        } else {
            None
        };

        if statement.flush_cache {
            self.local_cache.clear();
            if let Some(cache) = &second_tier {
                self.tcm.clear(cache);
            }
        }

        if statement.use_cache {
            if let Some(cache) = &second_tier {
                if let Some(hit) = self.tcm.get(cache, &key) {
                    tracing::trace!(statement = %statement.id, "second-tier cache hit");
                    return Ok(hit.as_ref().clone());
                }
                let rows = self.query_from_local(&statement, &bound, &values, bounds, &key)?;
                self.tcm.put(cache, key, Arc::new(rows.clone()));
                return Ok(rows);
            }
        }
        self.query_from_local(&statement, &bound, &values, bounds, &key)
    }

    fn query_from_local(
        &mut self,
        statement: &Arc<MappedStatement>,
        bound: &BoundSql,
        values: &[Value],
        bounds: RowBounds,
        key: &CacheKey,
    ) -> Result<Vec<Value>> {
        if let Some(hit) = self.local_cache.get(key) {
            tracing::trace!(statement = %statement.id, "local cache hit");
            return Ok(hit.as_ref().clone());
        }
        let rows = execute_bound_select(
            &self.catalog,
            &self.connection,
            statement,
            bound,
            values,
            bounds,
        )?;
        match self.catalog.settings().local_cache_scope {
            LocalCacheScope::Session => {
                self.local_cache.insert(key.clone(), Arc::new(rows.clone()));
            }
            LocalCacheScope::Statement => self.local_cache.clear(),
        }
        Ok(rows)
    }

    fn do_update(&mut self, name: &str, parameter: &mut Value) -> Result<u64> {
        self.ensure_open()?;
        let statement = self.catalog.statement(name)?;
        if statement.kind == SqlCommandKind::Select {
            return Err(MapperError::config(format!(
                "statement '{}' is a SELECT; use query()",
                statement.id
            )));
        }

        self.local_cache.clear();
        if self.catalog.settings().cache_enabled && statement.flush_cache {
            if let Some(cache) = self.catalog.cache(&statement.namespace) {
                let cache = cache.clone();
                self.tcm.clear(&cache);
            }
        }

        let bound = statement
            .source
            .bound_sql(self.catalog.shapes(), parameter)?;
        let binder = ParameterBinder::new(&self.catalog);
        let values = binder.collect_values(&statement.id, &bound, parameter)?;

        let mut guard = self.connection.lock().unwrap();
        let mut driver_stmt = guard
            .prepare(&bound.sql)
            .map_err(|err| execution_error(statement.id.as_str(), &bound.sql, &values, err))?;
        apply_statement_options(&self.catalog, &statement, driver_stmt.as_mut());
        binder.bind(&statement.id, &bound, &values, driver_stmt.as_mut())?;
        let affected = driver_stmt
            .execute_update()
            .map_err(|err| execution_error(statement.id.as_str(), &bound.sql, &values, err))?;

        if let Some(generator) = &statement.key_generator {
            if let Some(mut keys) = driver_stmt.generated_keys() {
                if keys.next()? {
                    let column = match generator.key_column.as_deref() {
                        Some(name) => ColumnRef::Name(name),
                        None => ColumnRef::Ordinal(1),
                    };
                    let cell = keys.cell(column)?;
                    let app_type = match &statement.parameter_type {
                        Some(declared) => resolve_property_type(
                            self.catalog.shapes(),
                            declared,
                            &generator.key_property,
                        )?,
                        None => None,
                    };
                    let codec = self.catalog.codecs().resolve(
                        self.catalog.shapes(),
                        app_type.as_deref(),
                        Some(cell.jdbc_type),
                    );
                    let value = if cell.value.is_null() {
                        Value::Null
                    } else {
                        codec.decode(&cell, &generator.key_property)?
                    };
                    Navigator::new(self.catalog.shapes()).set(
                        parameter,
                        &generator.key_property,
                        value,
                    )?;
                }
            }
        }

        binder.apply_out_parameters(&statement.id, &bound, driver_stmt.as_ref(), parameter)?;
        driver_stmt.close();
        Ok(affected)
    }

    fn cache_key(
        &self,
        statement: &MappedStatement,
        sql: &str,
        values: &[Value],
        bounds: RowBounds,
    ) -> CacheKey {
        let mut key = CacheKey::new();
        key.update_text(&statement.id);
        key.update_text(sql);
        for value in values {
            key.update(value);
        }
        key.update_int(bounds.offset as i64);
        key.update_int(bounds.limit.min(i64::MAX as usize) as i64);
        key.update_text(self.catalog.environment_id());
        key
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn apply_statement_options(
    catalog: &Catalog,
    statement: &MappedStatement,
    driver_stmt: &mut dyn Statement,
) {
    let settings = catalog.settings();
    if let Some(timeout) = statement.timeout.or(settings.default_statement_timeout) {
        driver_stmt.set_timeout(timeout);
    }
    if let Some(fetch_size) = statement.fetch_size.or(settings.default_fetch_size) {
        driver_stmt.set_fetch_size(fetch_size);
    }
}

pub(crate) fn execution_error(
    statement: &str,
    sql: &str,
    values: &[Value],
    source: DriverError,
) -> MapperError {
    MapperError::Execution {
        statement: statement.to_string(),
        sql: sql.to_string(),
        parameters: values.iter().map(|v| format!("{v:?}")).join(", "),
        source,
    }
}

/// Prepare, bind and execute a SELECT, then map its rows. The connection
/// lock is released before mapping so nested sub-selects can reacquire it.
pub(crate) fn execute_bound_select(
    catalog: &Arc<Catalog>,
    connection: &SharedConnection,
    statement: &Arc<MappedStatement>,
    bound: &BoundSql,
    values: &[Value],
    bounds: RowBounds,
) -> Result<Vec<Value>> {
    let (mut driver_stmt, mut cursor) = {
        let mut guard = connection.lock().unwrap();
        let mut driver_stmt = guard
            .prepare(&bound.sql)
            .map_err(|err| execution_error(&statement.id, &bound.sql, values, err))?;
        apply_statement_options(catalog, statement, driver_stmt.as_mut());
        ParameterBinder::new(catalog).bind(&statement.id, bound, values, driver_stmt.as_mut())?;
        let cursor = driver_stmt
            .execute_query()
            .map_err(|err| execution_error(&statement.id, &bound.sql, values, err))?;
        (driver_stmt, cursor)
    };

    let rows = ResultMapper::new(catalog, connection, statement).map_results(cursor.as_mut(), bounds);
    driver_stmt.close();
    rows
}

/// One full sub-select invocation, used by nested queries and deferred
/// loaders. Bypasses both cache tiers.
pub(crate) fn run_select(
    catalog: &Arc<Catalog>,
    connection: &SharedConnection,
    statement: &Arc<MappedStatement>,
    parameter: &Value,
    bounds: RowBounds,
) -> Result<Vec<Value>> {
    let bound = statement.source.bound_sql(catalog.shapes(), parameter)?;
    let values = ParameterBinder::new(catalog).collect_values(&statement.id, &bound, parameter)?;
    execute_bound_select(catalog, connection, statement, &bound, &values, bounds)
}

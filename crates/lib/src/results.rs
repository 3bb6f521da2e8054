use std::cell::Cell;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use sqlmapper_helpers::IndexMap;
use sqlmapper_lib_core::codec::TypeCodec;
use sqlmapper_lib_core::driver::{ColumnRef, Cursor};
use sqlmapper_lib_core::errors::{MapperError, Result};
use sqlmapper_lib_core::reflection::{Navigator, ObjectFactory};
use sqlmapper_lib_core::tokens::resolve_property_type;
use sqlmapper_lib_core::types::{TYPE_LIST, is_scalar_type, sequence_element};
use sqlmapper_lib_core::value::{Deferred, Value};

use crate::catalog::Catalog;
use crate::config::{AutoMappingBehavior, UnknownColumnBehavior};
use crate::executor::{SharedConnection, run_select};
use crate::cache::CacheKey;
use crate::mapping::{MappedStatement, ResultMap, ResultMapping, RowBounds};

/// Case-insensitive view of the columns present in the current result.
struct ColumnsIndex {
    originals: Vec<String>,
    by_lower: AHashMap<String, String>,
}

impl ColumnsIndex {
    fn new(cursor: &dyn Cursor) -> Self {
        let originals: Vec<String> = cursor.columns().to_vec();
        let by_lower = originals
            .iter()
            .map(|label| (label.to_ascii_lowercase(), label.clone()))
            .collect();
        ColumnsIndex {
            originals,
            by_lower,
        }
    }

    fn find(&self, name: &str) -> Option<&str> {
        self.by_lower
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Walks result rows and builds the object graph a result map describes:
/// constructor selection, leaf codecs, auto-mapping, discriminators,
/// nested result maps with parent identity tracking, and nested queries.
pub(crate) struct ResultMapper<'a> {
    catalog: &'a Arc<Catalog>,
    connection: &'a SharedConnection,
    statement: &'a Arc<MappedStatement>,
    row_counter: Cell<i64>,
}

type ChildPositions = AHashMap<(CacheKey, String, CacheKey), usize>;

const ASSOCIATION_SLOT: usize = usize::MAX;

impl<'a> ResultMapper<'a> {
    pub fn new(
        catalog: &'a Arc<Catalog>,
        connection: &'a SharedConnection,
        statement: &'a Arc<MappedStatement>,
    ) -> Self {
        ResultMapper {
            catalog,
            connection,
            statement,
            row_counter: Cell::new(0),
        }
    }

    pub fn map_results(&self, cursor: &mut dyn Cursor, bounds: RowBounds) -> Result<Vec<Value>> {
        let map = self.catalog.result_map(&self.statement.result_maps[0])?;
        let columns = ColumnsIndex::new(cursor);

        let mut skipped = 0;
        while skipped < bounds.offset {
            if !cursor.next()? {
                return Ok(Vec::new());
            }
            skipped += 1;
        }

        if map.has_nested_result_maps() {
            self.map_grouped(&map, cursor, &columns, bounds.limit)
        } else {
            self.map_flat(&map, cursor, &columns, bounds.limit)
        }
    }

    fn map_flat(
        &self,
        map: &Arc<ResultMap>,
        cursor: &mut dyn Cursor,
        columns: &ColumnsIndex,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        while rows.len() < limit && cursor.next()? {
            let map = self.discriminate(map.clone(), cursor, columns, "")?;
            rows.push(self.map_row(&map, cursor, columns, "", false)?);
        }
        Ok(rows)
    }

    /// Nested result maps: successive rows with matching id-flagged columns
    /// attach to the same parent instead of duplicating it.
    fn map_grouped(
        &self,
        map: &Arc<ResultMap>,
        cursor: &mut dyn Cursor,
        columns: &ColumnsIndex,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let mut parents: IndexMap<CacheKey, Value> = IndexMap::default();
        let mut seen: ChildPositions = AHashMap::new();

        while cursor.next()? {
            let row_map = self.discriminate(map.clone(), cursor, columns, "")?;
            let key = self.row_key(&row_map, cursor, columns, "")?;

            if let Some(parent) = parents.get_mut(&key) {
                let mut current = std::mem::take(parent);
                self.apply_nested(&row_map, cursor, columns, &mut current, "", &key, &mut seen)?;
                *parent = current;
            } else {
                if parents.len() >= limit {
                    break;
                }
                let mut parent = self.map_row(&row_map, cursor, columns, "", false)?;
                if !parent.is_null() {
                    self.apply_nested(&row_map, cursor, columns, &mut parent, "", &key, &mut seen)?;
                }
                parents.insert(key, parent);
            }
        }
        Ok(parents.into_values().collect())
    }

    fn map_row(
        &self,
        map: &Arc<ResultMap>,
        cursor: &mut dyn Cursor,
        columns: &ColumnsIndex,
        prefix: &str,
        nested: bool,
    ) -> Result<Value> {
        let shapes = self.catalog.shapes();
        let settings = self.catalog.settings();
        let navigator = Navigator::new(shapes);
        let factory = ObjectFactory::new(shapes);

        // Scalar targets decode the single result column directly.
        if is_scalar_type(&map.type_name) || shapes.is_enum(&map.type_name) {
            let Some(label) = columns.originals.first() else {
                return Ok(Value::Null);
            };
            let codec = self
                .catalog
                .codecs()
                .resolve(shapes, Some(&map.type_name), None);
            return self.checked(codec.get_result(cursor, ColumnRef::Name(label)), label);
        }

        let meta = shapes.meta_type(&map.type_name)?;

        let mut found = false;

        // Construct the target: positional constructor when constructor
        // mappings exist, nullary otherwise.
        let mut instance = if map.constructor_mappings.is_empty() {
            factory.create_default(&map.type_name)?
        } else {
            let mut args = Vec::with_capacity(map.constructor_mappings.len());
            for mapping in &map.constructor_mappings {
                let value = match &mapping.column {
                    Some(column) => {
                        let full = format!("{prefix}{column}");
                        match columns.find(&full) {
                            Some(label) => {
                                let codec = self.leaf_codec(map, mapping);
                                self.checked(codec.get_result(cursor, ColumnRef::Name(label)), &full)?
                            }
                            None => Value::Null,
                        }
                    }
                    None => Value::Null,
                };
                found |= !value.is_null();
                args.push(value);
            }
            factory.create(&map.type_name, args).map_err(|err| {
                self.mapping_error(&map.type_name, &err.to_string())
            })?
        };

        for mapping in &map.mappings {
            if mapping.nested_result_map.is_some() {
                continue;
            }
            if let Some(select_name) = &mapping.nested_select {
                found |= self.apply_nested_select(
                    map, mapping, select_name, cursor, columns, prefix, &navigator, &mut instance,
                )?;
                continue;
            }

            let Some(column) = &mapping.column else { continue };
            let full = format!("{prefix}{column}");
            let Some(label) = columns.find(&full) else {
                continue;
            };
            let codec = self.leaf_codec(map, mapping);
            let value = self.checked(codec.get_result(cursor, ColumnRef::Name(label)), &full)?;
            let non_null = !value.is_null();
            if non_null || settings.call_setters_on_nulls {
                navigator.set(&mut instance, &mapping.property, value)?;
            }
            found |= non_null;
        }

        if self.should_auto_map(map, nested) {
            let mapped = self.mapped_columns_lower(map, prefix);
            for label in &columns.originals {
                let lower = label.to_ascii_lowercase();
                if mapped.contains(&lower) {
                    continue;
                }
                let candidate: &str = if prefix.is_empty() {
                    label
                } else if lower.starts_with(&prefix.to_ascii_lowercase()) {
                    &label[prefix.len()..]
                } else {
                    continue;
                };

                if meta.is_open() {
                    let codec = self.catalog.codecs().opaque();
                    let value =
                        self.checked(codec.get_result(cursor, ColumnRef::Name(label)), label)?;
                    let non_null = !value.is_null();
                    if non_null || settings.call_setters_on_nulls {
                        navigator.set(&mut instance, candidate, value)?;
                    }
                    found |= non_null;
                    continue;
                }

                let target = meta
                    .find_property(candidate, settings.map_underscore_to_camel_case)
                    .filter(|p| p.writable)
                    .map(|p| (p.name.clone(), p.declared_type.clone()));
                match target {
                    Some((property, declared_type)) => {
                        let codec =
                            self.catalog
                                .codecs()
                                .resolve(shapes, Some(declared_type.as_str()), None);
                        let value =
                            self.checked(codec.get_result(cursor, ColumnRef::Name(label)), label)?;
                        let non_null = !value.is_null();
                        if non_null || settings.call_setters_on_nulls {
                            navigator.set(&mut instance, &property, value)?;
                        }
                        found |= non_null;
                    }
                    None => match settings.auto_mapping_unknown_column_behavior {
                        UnknownColumnBehavior::None => {}
                        UnknownColumnBehavior::Warning => {
                            tracing::warn!(
                                statement = %self.statement.id,
                                column = %label,
                                target = %map.type_name,
                                "unmapped column matches no writable property"
                            );
                        }
                        UnknownColumnBehavior::Failing => {
                            return Err(self.mapping_error(
                                label,
                                &format!(
                                    "unmapped column matches no writable property of '{}'",
                                    map.type_name
                                ),
                            ));
                        }
                    },
                }
            }
        }

        if !found && !settings.return_instance_for_empty_row {
            return Ok(Value::Null);
        }
        Ok(instance)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_nested_select(
        &self,
        map: &Arc<ResultMap>,
        mapping: &ResultMapping,
        select_name: &str,
        cursor: &mut dyn Cursor,
        columns: &ColumnsIndex,
        prefix: &str,
        navigator: &Navigator<'_>,
        instance: &mut Value,
    ) -> Result<bool> {
        let Some(raw_column) = mapping.column.as_deref() else {
            return Ok(false);
        };
        let Some(parameter) = self.nested_select_parameter(raw_column, prefix, cursor, columns)?
        else {
            return Ok(false);
        };
        let target = self.catalog.statement(select_name)?;
        let collection = self.is_collection_property(map, mapping);
        let settings = self.catalog.settings();

        let value = if settings.lazy_loading_enabled {
            // Deferred resolver: the first property access through the
            // navigator triggers the sub-select on the owning session's
            // connection.
            let catalog = self.catalog.clone();
            let connection = self.connection.clone();
            let loader = Box::new(move || {
                let rows = run_select(&catalog, &connection, &target, &parameter, RowBounds::default())?;
                Ok(collapse_rows(rows, collection))
            });
            Value::Deferred(Arc::new(Deferred::new(
                settings.aggressive_lazy_loading,
                loader,
            )))
        } else {
            let rows = run_select(
                self.catalog,
                self.connection,
                &target,
                &parameter,
                RowBounds::default(),
            )?;
            collapse_rows(rows, collection)
        };
        navigator.set(instance, &mapping.property, value)?;
        Ok(true)
    }

    /// Key columns of a nested select: either one plain column or a
    /// composite `{property=column, …}` list.
    fn nested_select_parameter(
        &self,
        raw_column: &str,
        prefix: &str,
        cursor: &mut dyn Cursor,
        columns: &ColumnsIndex,
    ) -> Result<Option<Value>> {
        let opaque = self.catalog.codecs().opaque();
        if let Some(inner) = raw_column
            .strip_prefix('{')
            .and_then(|r| r.strip_suffix('}'))
        {
            let mut composite = IndexMap::default();
            for pair in inner.split(',') {
                let Some((property, column)) = pair.split_once('=') else {
                    return Err(self.mapping_error(
                        raw_column,
                        "composite column must be {property=column, …}",
                    ));
                };
                let full = format!("{prefix}{}", column.trim());
                let value = match columns.find(&full) {
                    Some(label) => {
                        self.checked(opaque.get_result(cursor, ColumnRef::Name(label)), &full)?
                    }
                    None => Value::Null,
                };
                composite.insert(property.trim().to_string(), value);
            }
            if composite.values().all(Value::is_null) {
                return Ok(None);
            }
            return Ok(Some(Value::Map(composite)));
        }

        let full = format!("{prefix}{raw_column}");
        let Some(label) = columns.find(&full) else {
            return Ok(None);
        };
        let value = self.checked(opaque.get_result(cursor, ColumnRef::Name(label)), &full)?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(value))
    }

    fn apply_nested(
        &self,
        map: &Arc<ResultMap>,
        cursor: &mut dyn Cursor,
        columns: &ColumnsIndex,
        parent: &mut Value,
        prefix: &str,
        parent_key: &CacheKey,
        seen: &mut ChildPositions,
    ) -> Result<()> {
        let navigator = Navigator::new(self.catalog.shapes());
        for mapping in &map.mappings {
            let Some(nested_name) = &mapping.nested_result_map else {
                continue;
            };
            let child_map = self.catalog.result_map(nested_name)?;
            let child_prefix = format!(
                "{prefix}{}",
                mapping.column_prefix.as_deref().unwrap_or_default()
            );

            if !self.nested_row_present(&child_map, mapping, cursor, columns, &child_prefix)? {
                continue;
            }

            let child_map = self.discriminate(child_map, cursor, columns, &child_prefix)?;
            let child_key = self.row_key(&child_map, cursor, columns, &child_prefix)?;
            let slot_key = (parent_key.clone(), mapping.property.clone(), child_key.clone());

            if let Some(&position) = seen.get(&slot_key) {
                // Same child again: only merge its own nested rows.
                let mut existing = navigator.get(parent, &mapping.property)?;
                if position == ASSOCIATION_SLOT {
                    self.apply_nested(
                        &child_map, cursor, columns, &mut existing, &child_prefix, &child_key, seen,
                    )?;
                    navigator.set(parent, &mapping.property, existing)?;
                } else if let Value::Array(items) = &mut existing {
                    if let Some(slot) = items.get_mut(position) {
                        let mut child = std::mem::take(slot);
                        self.apply_nested(
                            &child_map, cursor, columns, &mut child, &child_prefix, &child_key,
                            seen,
                        )?;
                        *slot = child;
                    }
                    navigator.set(parent, &mapping.property, existing)?;
                }
                continue;
            }

            let mut child = self.map_row(&child_map, cursor, columns, &child_prefix, true)?;
            if child.is_null() {
                continue;
            }
            self.apply_nested(
                &child_map, cursor, columns, &mut child, &child_prefix, &child_key, seen,
            )?;

            if self.is_collection_property(map, mapping) {
                let position = match navigator.get(parent, &mapping.property)? {
                    Value::Null => {
                        navigator.set(parent, &mapping.property, Value::Array(vec![child]))?;
                        0
                    }
                    Value::Array(mut items) => {
                        items.push(child);
                        let position = items.len() - 1;
                        navigator.set(parent, &mapping.property, Value::Array(items))?;
                        position
                    }
                    _ => {
                        return Err(self.mapping_error(
                            &mapping.property,
                            "collection property holds a non-sequence value",
                        ));
                    }
                };
                seen.insert(slot_key, position);
            } else {
                if navigator.get(parent, &mapping.property)?.is_null() {
                    navigator.set(parent, &mapping.property, child)?;
                }
                seen.insert(slot_key, ASSOCIATION_SLOT);
            }
        }
        Ok(())
    }

    /// Decide whether the current row carries this nested mapping at all:
    /// any declared not-null guard column with a value, or, without
    /// guards, any mapped child column with a value.
    fn nested_row_present(
        &self,
        child_map: &Arc<ResultMap>,
        mapping: &ResultMapping,
        cursor: &mut dyn Cursor,
        columns: &ColumnsIndex,
        child_prefix: &str,
    ) -> Result<bool> {
        if !mapping.not_null_columns.is_empty() {
            for guard in &mapping.not_null_columns {
                let full = format!("{child_prefix}{guard}");
                if let Some(label) = columns.find(&full) {
                    if !cursor.cell(ColumnRef::Name(label))?.value.is_null() {
                        return Ok(true);
                    }
                }
            }
            return Ok(false);
        }
        for column in child_map.mapped_columns() {
            let full = format!("{child_prefix}{column}");
            if let Some(label) = columns.find(&full) {
                if !cursor.cell(ColumnRef::Name(label))?.value.is_null() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Identity of the row under a result map: the id-flagged columns, or
    /// every leaf column when no id is declared, falling back to a per-row
    /// counter so unkeyed rows never merge.
    fn row_key(
        &self,
        map: &Arc<ResultMap>,
        cursor: &mut dyn Cursor,
        columns: &ColumnsIndex,
        prefix: &str,
    ) -> Result<CacheKey> {
        let opaque = self.catalog.codecs().opaque();
        let mut key = CacheKey::new();
        key.update_text(&map.id);
        let mut parts = 0;

        let id_mappings: Vec<&ResultMapping> = map.id_mappings().collect();
        let chosen: Vec<&ResultMapping> = if id_mappings.is_empty() {
            map.mappings
                .iter()
                .filter(|m| !m.is_nested() && m.column.is_some())
                .collect()
        } else {
            id_mappings
        };

        for mapping in chosen {
            let Some(column) = &mapping.column else { continue };
            let full = format!("{prefix}{column}");
            let Some(label) = columns.find(&full) else {
                continue;
            };
            let value = self.checked(opaque.get_result(cursor, ColumnRef::Name(label)), &full)?;
            key.update_text(column);
            key.update(&value);
            parts += 1;
        }

        if parts == 0 {
            let counter = self.row_counter.get();
            self.row_counter.set(counter + 1);
            key.update_int(counter);
        }
        Ok(key)
    }

    /// Resolve the effective result map for the current row through the
    /// discriminator chain; cases may themselves discriminate.
    fn discriminate(
        &self,
        map: Arc<ResultMap>,
        cursor: &mut dyn Cursor,
        columns: &ColumnsIndex,
        prefix: &str,
    ) -> Result<Arc<ResultMap>> {
        let mut current = map;
        let mut visited = AHashSet::new();
        while let Some(discriminator) = current.discriminator.clone() {
            if !visited.insert(current.id.clone()) {
                break;
            }
            let full = format!("{prefix}{}", discriminator.column);
            let Some(label) = columns.find(&full) else {
                break;
            };
            let codec = match &discriminator.codec {
                Some(name) => self.catalog.codecs().named(name).ok_or_else(|| {
                    self.mapping_error(&full, &format!("no codec registered under '{name}'"))
                })?,
                None => self.catalog.codecs().resolve(
                    self.catalog.shapes(),
                    discriminator.app_type.as_deref(),
                    discriminator.jdbc_type,
                ),
            };
            let value = self.checked(codec.get_result(cursor, ColumnRef::Name(label)), &full)?;
            match discriminator.cases.get(&value.to_text()) {
                Some(target) => current = self.catalog.result_map(target)?,
                None => break,
            }
        }
        Ok(current)
    }

    fn should_auto_map(&self, map: &ResultMap, nested: bool) -> bool {
        if let Some(declared) = map.auto_mapping {
            return declared;
        }
        match self.catalog.settings().auto_mapping_behavior {
            AutoMappingBehavior::None => false,
            AutoMappingBehavior::Partial => !nested,
            AutoMappingBehavior::Full => true,
        }
    }

    fn is_collection_property(&self, map: &ResultMap, mapping: &ResultMapping) -> bool {
        if mapping.is_collection {
            return true;
        }
        match resolve_property_type(self.catalog.shapes(), &map.type_name, &mapping.property) {
            Ok(Some(declared)) => {
                declared == TYPE_LIST || sequence_element(&declared).is_some()
            }
            _ => false,
        }
    }

    fn leaf_codec(&self, map: &ResultMap, mapping: &ResultMapping) -> Arc<dyn TypeCodec> {
        if let Some(name) = &mapping.codec {
            if let Some(codec) = self.catalog.codecs().named(name) {
                return codec;
            }
        }
        let declared = mapping.app_type.clone().or_else(|| {
            resolve_property_type(self.catalog.shapes(), &map.type_name, &mapping.property)
                .ok()
                .flatten()
        });
        self.catalog.codecs().resolve(
            self.catalog.shapes(),
            declared.as_deref(),
            mapping.jdbc_type,
        )
    }

    fn checked(&self, value: Result<Value>, column: &str) -> Result<Value> {
        value.map_err(|err| match err {
            MapperError::Mapping {
                statement, detail, ..
            } if statement.is_empty() => MapperError::Mapping {
                statement: self.statement.id.to_string(),
                column: column.to_string(),
                detail,
            },
            MapperError::Driver(err) => MapperError::Mapping {
                statement: self.statement.id.to_string(),
                column: column.to_string(),
                detail: err.to_string(),
            },
            other => other,
        })
    }

    fn mapping_error(&self, column: &str, detail: &str) -> MapperError {
        MapperError::Mapping {
            statement: self.statement.id.to_string(),
            column: column.to_string(),
            detail: detail.to_string(),
        }
    }

    fn mapped_columns_lower(&self, map: &ResultMap, prefix: &str) -> AHashSet<String> {
        let mut mapped: AHashSet<String> = map
            .mapped_columns()
            .map(|column| format!("{prefix}{column}").to_ascii_lowercase())
            .collect();
        if let Some(discriminator) = &map.discriminator {
            mapped.insert(format!("{prefix}{}", discriminator.column).to_ascii_lowercase());
        }
        mapped
    }
}

fn collapse_rows(rows: Vec<Value>, collection: bool) -> Value {
    if collection {
        Value::Array(rows)
    } else {
        rows.into_iter().next().unwrap_or_default()
    }
}

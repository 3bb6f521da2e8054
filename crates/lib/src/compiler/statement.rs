use smol_str::SmolStr;
use sqlmapper_lib_core::errors::{MapperError, Result};
use sqlmapper_lib_core::types::normalize_type_name;

use crate::compiler::{Compiler, build_sql_source, resolve_includes};
use crate::mapping::{
    KeyGeneratorConfig, MappedStatement, ResultMap, SqlCommandKind, qualify,
};
use crate::xml::XmlElement;

/// Build one statement. Returns `false` (not ready) while a referenced
/// `<sql>` fragment or result map is still unregistered.
pub(crate) fn try_build_statement(
    compiler: &mut Compiler<'_>,
    namespace: &str,
    element: &XmlElement,
) -> Result<bool> {
    let id = qualify(namespace, element.required_attr("id")?);
    let kind: SqlCommandKind = element
        .name
        .parse()
        .map_err(|_| MapperError::config(format!("unknown statement element <{}>", element.name)))?;

    // databaseId selection: a mismatching statement is dropped entirely.
    let database_id = element.attr("databaseId").map(ToString::to_string);
    if let Some(declared) = &database_id {
        if compiler.database_id() != Some(declared.as_str()) {
            return Ok(true);
        }
    }

    let Some(body) = resolve_includes(
        &element.children,
        namespace,
        compiler.fragments(),
        &mut Vec::new(),
    )?
    else {
        return Ok(false);
    };

    // Declared result maps must exist before the statement seals.
    let mut result_maps: Vec<SmolStr> = Vec::new();
    if let Some(declared) = element.attr("resultMap") {
        for name in declared.split(',') {
            let name = qualify(namespace, name.trim());
            if !compiler.has_result_map(&name) {
                return Ok(false);
            }
            result_maps.push(name);
        }
    }

    // `resultType` synthesizes an inline result map driven purely by
    // auto-mapping.
    if let Some(result_type) = element.attr("resultType") {
        if !result_maps.is_empty() {
            return Err(MapperError::config(format!(
                "statement '{id}' declares both resultMap and resultType"
            )));
        }
        let inline_id = SmolStr::new(format!("{id}-Inline"));
        compiler.insert_result_map(ResultMap {
            id: inline_id.clone(),
            type_name: normalize_type_name(result_type),
            mappings: Vec::new(),
            constructor_mappings: Vec::new(),
            discriminator: None,
            auto_mapping: None,
        })?;
        result_maps.push(inline_id);
    }

    let parameter_type = element.attr("parameterType").map(normalize_type_name);
    let source = build_sql_source(compiler.shapes(), &body, parameter_type.as_ref())?;

    let is_select = kind == SqlCommandKind::Select;
    let use_generated_keys = element.bool_attr(
        "useGeneratedKeys",
        compiler.settings().use_generated_keys && kind == SqlCommandKind::Insert,
    )?;
    let key_generator = match (use_generated_keys, element.attr("keyProperty")) {
        (true, Some(key_property)) => Some(KeyGeneratorConfig {
            key_property: key_property.to_string(),
            key_column: element.attr("keyColumn").map(ToString::to_string),
        }),
        (true, None) => {
            return Err(MapperError::config(format!(
                "statement '{id}' uses generated keys but declares no keyProperty"
            )));
        }
        _ => None,
    };

    let statement = MappedStatement {
        id: id.clone(),
        namespace: SmolStr::new(namespace),
        kind,
        source,
        parameter_type,
        result_maps,
        flush_cache: element.bool_attr("flushCache", !is_select)?,
        use_cache: element.bool_attr("useCache", is_select)?,
        timeout: element.numeric_attr("timeout")?,
        fetch_size: element.numeric_attr("fetchSize")?,
        statement_type: match element.attr("statementType") {
            None => Default::default(),
            Some(raw) => raw.parse().map_err(|_| {
                MapperError::config(format!("unknown statementType '{raw}' on '{id}'"))
            })?,
        },
        result_set_type: match element.attr("resultSetType") {
            None => None,
            Some(raw) => Some(raw.parse().map_err(|_| {
                MapperError::config(format!("unknown resultSetType '{raw}' on '{id}'"))
            })?),
        },
        database_id,
        key_generator,
    };
    statement.check_result_map_invariant()?;
    compiler.insert_statement(statement)?;
    Ok(true)
}

use std::str::FromStr;

use smol_str::SmolStr;

use crate::errors::{MapperError, Result};
use crate::reflection::{ShapeRegistry, tokenize};
use crate::types::{JdbcType, ParameterMode, TYPE_CURSOR, normalize_type_name};

/// The compile-time record behind one `?` placeholder: where its value
/// comes from, how it is typed on both sides, and which codec applies. The
/// ordered descriptor list is the contract between the SQL text and the
/// parameter binder.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterDescriptor {
    pub property: String,
    pub mode: ParameterMode,
    pub app_type: Option<SmolStr>,
    pub jdbc_type: Option<JdbcType>,
    pub jdbc_type_name: Option<String>,
    pub numeric_scale: Option<u32>,
    pub result_map: Option<String>,
    /// Named codec override (`typeHandler=`).
    pub codec: Option<SmolStr>,
}

/// Scan `text` for `open…close` tokens and replace each with the handler's
/// output. Single pass; a backslash escapes an open token (and a close
/// token inside one), the backslash itself is dropped.
pub fn parse_tokens(
    text: &str,
    open: &str,
    close: &str,
    handler: &mut dyn FnMut(&str) -> Result<String>,
) -> Result<String> {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(open) {
        if start > 0 && rest.as_bytes()[start - 1] == b'\\' {
            result.push_str(&rest[..start - 1]);
            result.push_str(open);
            rest = &rest[start + open.len()..];
            continue;
        }
        result.push_str(&rest[..start]);
        rest = &rest[start + open.len()..];

        let mut expression = String::new();
        let mut closed = false;
        while let Some(end) = rest.find(close) {
            if end > 0 && rest.as_bytes()[end - 1] == b'\\' {
                expression.push_str(&rest[..end - 1]);
                expression.push_str(close);
                rest = &rest[end + close.len()..];
            } else {
                expression.push_str(&rest[..end]);
                rest = &rest[end + close.len()..];
                closed = true;
                break;
            }
        }
        if !closed {
            // No closing token: keep the open token literally.
            log::warn!("unclosed '{open}' token in: {text}");
            result.push_str(open);
            result.push_str(&expression);
            result.push_str(rest);
            return Ok(result);
        }
        result.push_str(&handler(&expression)?);
    }

    result.push_str(rest);
    Ok(result)
}

/// Parse the inside of a `#{…}` placeholder: a property path followed by
/// `option=value` pairs.
pub fn parse_placeholder(expression: &str) -> Result<ParameterDescriptor> {
    let mut parts = expression.split(',');
    let property = parts
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| MapperError::config(format!("empty parameter placeholder '{expression}'")))?;

    let mut descriptor = ParameterDescriptor {
        property: property.to_string(),
        ..Default::default()
    };

    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').ok_or_else(|| {
            MapperError::config(format!(
                "malformed option '{part}' in placeholder '{expression}'"
            ))
        })?;
        let value = value.trim();
        match key.trim() {
            "javaType" => descriptor.app_type = Some(normalize_type_name(value)),
            "jdbcType" => {
                descriptor.jdbc_type = Some(JdbcType::from_str(value).map_err(|_| {
                    MapperError::config(format!(
                        "unknown jdbcType '{value}' in placeholder '{expression}'"
                    ))
                })?);
            }
            "mode" => {
                descriptor.mode = ParameterMode::from_str(value).map_err(|_| {
                    MapperError::config(format!(
                        "unknown mode '{value}' in placeholder '{expression}'"
                    ))
                })?;
            }
            "numericScale" => {
                descriptor.numeric_scale = Some(value.parse().map_err(|_| {
                    MapperError::config(format!(
                        "invalid numericScale '{value}' in placeholder '{expression}'"
                    ))
                })?);
            }
            "resultMap" => descriptor.result_map = Some(value.to_string()),
            "typeHandler" => descriptor.codec = Some(SmolStr::new(value)),
            "jdbcTypeName" => descriptor.jdbc_type_name = Some(value.to_string()),
            unknown => {
                return Err(MapperError::UnknownParameterOption {
                    option: unknown.to_string(),
                    placeholder: expression.to_string(),
                });
            }
        }
    }

    Ok(descriptor)
}

/// Replace every `#{…}` with `?` and collect the ordered descriptor list,
/// resolving each descriptor's application type against the declared
/// parameter type. This runs once at compile time for static statements
/// and per evaluation for dynamic ones.
pub fn build_static_sql(
    sql: &str,
    registry: &ShapeRegistry,
    parameter_type: Option<&str>,
) -> Result<(String, Vec<ParameterDescriptor>)> {
    let mut descriptors = Vec::new();
    let parsed = parse_tokens(sql, "#{", "}", &mut |expression| {
        let mut descriptor = parse_placeholder(expression)?;
        if descriptor.app_type.is_none() {
            descriptor.app_type = infer_app_type(registry, parameter_type, &descriptor)?;
        }
        descriptors.push(descriptor);
        Ok("?".to_string())
    })?;
    Ok((parsed, descriptors))
}

/// Application type priority: explicit `javaType`, then the declared
/// parameter type's property type, then the cursor type for OUT cursors,
/// otherwise opaque.
fn infer_app_type(
    registry: &ShapeRegistry,
    parameter_type: Option<&str>,
    descriptor: &ParameterDescriptor,
) -> Result<Option<SmolStr>> {
    if let Some(declared) = parameter_type {
        if let Some(resolved) = resolve_property_type(registry, declared, &descriptor.property)? {
            return Ok(Some(resolved));
        }
    }
    if descriptor.mode != ParameterMode::In && descriptor.jdbc_type == Some(JdbcType::Cursor) {
        return Ok(Some(SmolStr::new_static(TYPE_CURSOR)));
    }
    Ok(None)
}

/// Walk a property path through declared types: each plain segment moves to
/// the property's declared type, each indexed segment to the container's
/// element type. Returns `None` when the walk leaves known territory.
pub fn resolve_property_type(
    registry: &ShapeRegistry,
    root_type: &str,
    path: &str,
) -> Result<Option<SmolStr>> {
    let mut current = normalize_type_name(root_type);
    for segment in tokenize(path) {
        let segment = segment?;
        let meta = registry.meta_type(&current)?;
        if meta.is_open() {
            return Ok(None);
        }
        let Some(property) = meta.property(segment.name) else {
            return Ok(None);
        };
        current = if segment.index.is_some() {
            match &property.element_type {
                Some(element) => element.clone(),
                None => return Ok(None),
            }
        } else {
            property.declared_type.clone()
        };
    }
    Ok(Some(current))
}

use std::sync::Arc;

use sqlmapper_lib_core::codec::TypeCodec;
use sqlmapper_lib_core::driver::Statement;
use sqlmapper_lib_core::errors::{MapperError, Result};
use sqlmapper_lib_core::nodes::BoundSql;
use sqlmapper_lib_core::reflection::{Navigator, tokenize};
use sqlmapper_lib_core::tokens::ParameterDescriptor;
use sqlmapper_lib_core::types::ParameterMode;
use sqlmapper_lib_core::value::Value;

use crate::catalog::Catalog;

/// Walks a statement's ordered descriptor list, reads each value off the
/// parameter object (or the evaluation's exported bindings), resolves the
/// codec and applies it onto the driver statement. Ordinals are 1-based
/// and contiguous.
pub(crate) struct ParameterBinder<'a> {
    catalog: &'a Catalog,
}

impl<'a> ParameterBinder<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        ParameterBinder { catalog }
    }

    /// Read every descriptor's value without touching the driver. Used for
    /// cache key construction and kept for error reports.
    pub fn collect_values(
        &self,
        statement_id: &str,
        bound: &BoundSql,
        parameter: &Value,
    ) -> Result<Vec<Value>> {
        let additional = Value::Map(bound.additional.clone());
        bound
            .descriptors
            .iter()
            .map(|descriptor| {
                if descriptor.mode == ParameterMode::Out {
                    return Ok(Value::Null);
                }
                self.read_value(statement_id, bound, &additional, parameter, descriptor)
            })
            .collect()
    }

    /// Bind `values` (as collected by [`Self::collect_values`]) onto the
    /// driver statement, registering OUT parameters where declared.
    pub fn bind(
        &self,
        statement_id: &str,
        bound: &BoundSql,
        values: &[Value],
        driver: &mut dyn Statement,
    ) -> Result<()> {
        let settings = self.catalog.settings();
        for (index, (descriptor, value)) in bound.descriptors.iter().zip(values).enumerate() {
            let ordinal = index + 1;
            if descriptor.mode != ParameterMode::In {
                driver
                    .register_out(ordinal, descriptor.jdbc_type.unwrap_or_default())
                    .map_err(|err| self.binding_error(statement_id, descriptor, err.to_string()))?;
            }
            if descriptor.mode == ParameterMode::Out {
                continue;
            }
            let codec = self.resolve_codec(statement_id, descriptor, value)?;
            let jdbc_type = descriptor.jdbc_type.or_else(|| {
                value.is_null().then_some(settings.jdbc_type_for_null)
            });
            codec
                .set_parameter(driver, ordinal, value, jdbc_type)
                .map_err(|err| match err {
                    MapperError::Binding {
                        statement, property, detail,
                    } if statement.is_empty() => MapperError::Binding {
                        statement: statement_id.to_string(),
                        property: if property.is_empty() {
                            descriptor.property.clone()
                        } else {
                            property
                        },
                        detail,
                    },
                    other => other,
                })?;
        }
        Ok(())
    }

    /// Write OUT/INOUT parameter cells back into the parameter object after
    /// execution.
    pub fn apply_out_parameters(
        &self,
        statement_id: &str,
        bound: &BoundSql,
        driver: &dyn Statement,
        parameter: &mut Value,
    ) -> Result<()> {
        let navigator = Navigator::new(self.catalog.shapes());
        for (index, descriptor) in bound.descriptors.iter().enumerate() {
            if descriptor.mode == ParameterMode::In {
                continue;
            }
            let Some(cell) = driver.out_value(index + 1) else {
                continue;
            };
            let codec = self.resolve_codec(statement_id, descriptor, &Value::Null)?;
            let value = if cell.value.is_null() {
                Value::Null
            } else {
                codec.decode(&cell, &descriptor.property)?
            };
            navigator
                .set(parameter, &descriptor.property, value)
                .map_err(|err| self.binding_error(statement_id, descriptor, err.to_string()))?;
        }
        Ok(())
    }

    fn read_value(
        &self,
        statement_id: &str,
        bound: &BoundSql,
        additional: &Value,
        parameter: &Value,
        descriptor: &ParameterDescriptor,
    ) -> Result<Value> {
        let navigator = Navigator::new(self.catalog.shapes());
        let property = descriptor.property.as_str();

        let head = match tokenize(property).next() {
            Some(segment) => segment
                .map_err(|err| self.binding_error(statement_id, descriptor, err.to_string()))?
                .name
                .to_string(),
            None => property.to_string(),
        };
        let value = if bound.additional.contains_key(&head) {
            navigator.get(additional, property)
        } else if is_scalar(parameter) && !property.contains('.') && !property.contains('[') {
            Ok(parameter.clone())
        } else {
            navigator.get(parameter, property)
        };
        value.map_err(|err| match err {
            err @ (MapperError::MalformedPath { .. } | MapperError::UnindexableNode { .. }) => err,
            other => self.binding_error(statement_id, descriptor, other.to_string()),
        })
    }

    fn resolve_codec(
        &self,
        statement_id: &str,
        descriptor: &ParameterDescriptor,
        value: &Value,
    ) -> Result<Arc<dyn TypeCodec>> {
        if let Some(name) = &descriptor.codec {
            return self.catalog.codecs().named(name).ok_or_else(|| {
                self.binding_error(
                    statement_id,
                    descriptor,
                    format!("no codec registered under '{name}'"),
                )
            });
        }
        // Opaque descriptors resolve lazily from the runtime value.
        let app_type = descriptor
            .app_type
            .as_deref()
            .or_else(|| runtime_type(value));
        Ok(self
            .catalog
            .codecs()
            .resolve(self.catalog.shapes(), app_type, descriptor.jdbc_type))
    }

    fn binding_error(
        &self,
        statement_id: &str,
        descriptor: &ParameterDescriptor,
        detail: String,
    ) -> MapperError {
        MapperError::Binding {
            statement: statement_id.to_string(),
            property: descriptor.property.clone(),
            detail,
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Map(_) | Value::Object(_) | Value::Array(_))
}

fn runtime_type(value: &Value) -> Option<&str> {
    match value {
        Value::Int(_) => Some("long"),
        Value::Double(_) => Some("double"),
        Value::Bool(_) => Some("boolean"),
        Value::String(_) => Some("string"),
        Value::Bytes(_) => Some("bytes"),
        Value::Object(object) => Some(&object.type_name),
        _ => None,
    }
}

use std::str::FromStr;

use sqlmapper_lib_core::errors::{MapperError, Result};
use sqlmapper_lib_core::types::JdbcType;

use crate::xml::{XmlElement, parse_bool};

#[derive(
    strum_macros::EnumString, strum_macros::AsRefStr, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum AutoMappingBehavior {
    None,
    #[default]
    Partial,
    Full,
}

#[derive(
    strum_macros::EnumString, strum_macros::AsRefStr, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum UnknownColumnBehavior {
    #[default]
    None,
    Warning,
    Failing,
}

#[derive(
    strum_macros::EnumString, strum_macros::AsRefStr, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ExecutorType {
    #[default]
    Simple,
    Reuse,
    Batch,
}

#[derive(
    strum_macros::EnumString, strum_macros::AsRefStr, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum LocalCacheScope {
    #[default]
    Session,
    Statement,
}

/// The recognized configuration options and their defaults. Unknown option
/// names fail bootstrap.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_enabled: bool,
    pub lazy_loading_enabled: bool,
    pub aggressive_lazy_loading: bool,
    pub multiple_result_sets_enabled: bool,
    pub use_column_label: bool,
    pub use_generated_keys: bool,
    pub auto_mapping_behavior: AutoMappingBehavior,
    pub auto_mapping_unknown_column_behavior: UnknownColumnBehavior,
    pub default_executor_type: ExecutorType,
    pub default_statement_timeout: Option<u64>,
    pub default_fetch_size: Option<u32>,
    pub map_underscore_to_camel_case: bool,
    pub safe_row_bounds_enabled: bool,
    pub local_cache_scope: LocalCacheScope,
    pub jdbc_type_for_null: JdbcType,
    pub lazy_load_trigger_methods: Vec<String>,
    pub use_actual_param_name: bool,
    pub return_instance_for_empty_row: bool,
    pub call_setters_on_nulls: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            cache_enabled: true,
            lazy_loading_enabled: false,
            aggressive_lazy_loading: false,
            multiple_result_sets_enabled: true,
            use_column_label: true,
            use_generated_keys: false,
            auto_mapping_behavior: AutoMappingBehavior::Partial,
            auto_mapping_unknown_column_behavior: UnknownColumnBehavior::None,
            default_executor_type: ExecutorType::Simple,
            default_statement_timeout: None,
            default_fetch_size: None,
            map_underscore_to_camel_case: false,
            safe_row_bounds_enabled: false,
            local_cache_scope: LocalCacheScope::Session,
            jdbc_type_for_null: JdbcType::Other,
            lazy_load_trigger_methods: ["equals", "clone", "hashCode", "toString"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            use_actual_param_name: true,
            return_instance_for_empty_row: false,
            call_setters_on_nulls: false,
        }
    }
}

impl Settings {
    pub fn from_settings_element(element: &XmlElement) -> Result<Settings> {
        let mut settings = Settings::default();
        for setting in element.elements() {
            if setting.name != "setting" {
                return Err(MapperError::config(format!(
                    "unexpected <{}> inside <settings>",
                    setting.name
                )));
            }
            let name = setting.required_attr("name")?;
            let value = setting.required_attr("value")?;
            settings.apply(name, value)?;
        }
        Ok(settings)
    }

    pub fn apply(&mut self, name: &str, value: &str) -> Result<()> {
        let bool_value = || {
            parse_bool(value).ok_or_else(|| {
                MapperError::config(format!("option '{name}' expects true or false, got '{value}'"))
            })
        };
        match name {
            "cacheEnabled" => self.cache_enabled = bool_value()?,
            "lazyLoadingEnabled" => self.lazy_loading_enabled = bool_value()?,
            "aggressiveLazyLoading" => self.aggressive_lazy_loading = bool_value()?,
            "multipleResultSetsEnabled" => self.multiple_result_sets_enabled = bool_value()?,
            "useColumnLabel" => self.use_column_label = bool_value()?,
            "useGeneratedKeys" => self.use_generated_keys = bool_value()?,
            "autoMappingBehavior" => {
                self.auto_mapping_behavior = parse_enum(name, value)?;
            }
            "autoMappingUnknownColumnBehavior" => {
                self.auto_mapping_unknown_column_behavior = parse_enum(name, value)?;
            }
            "defaultExecutorType" => {
                self.default_executor_type = parse_enum(name, value)?;
            }
            "defaultStatementTimeout" => {
                self.default_statement_timeout = Some(parse_number(name, value)?);
            }
            "defaultFetchSize" => {
                self.default_fetch_size = Some(parse_number(name, value)?);
            }
            "mapUnderscoreToCamelCase" => self.map_underscore_to_camel_case = bool_value()?,
            "safeRowBoundsEnabled" => self.safe_row_bounds_enabled = bool_value()?,
            "localCacheScope" => {
                self.local_cache_scope = parse_enum(name, value)?;
            }
            "jdbcTypeForNull" => {
                self.jdbc_type_for_null = JdbcType::from_str(value).map_err(|_| {
                    MapperError::config(format!("unknown jdbcTypeForNull '{value}'"))
                })?;
            }
            "lazyLoadTriggerMethods" => {
                self.lazy_load_trigger_methods =
                    value.split(',').map(|m| m.trim().to_string()).collect();
            }
            "useActualParamName" => self.use_actual_param_name = bool_value()?,
            "returnInstanceForEmptyRow" => self.return_instance_for_empty_row = bool_value()?,
            "callSettersOnNulls" => self.call_setters_on_nulls = bool_value()?,
            unknown => {
                return Err(MapperError::config(format!(
                    "unknown configuration option '{unknown}'"
                )));
            }
        }
        Ok(())
    }
}

fn parse_enum<T: FromStr>(name: &str, value: &str) -> Result<T> {
    T::from_str(value.trim())
        .map_err(|_| MapperError::config(format!("invalid value '{value}' for option '{name}'")))
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MapperError::config(format!("option '{name}' is not numeric: '{value}'")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::xml::parse_document;

    #[test]
    fn defaults_match_the_documented_table() {
        let settings = Settings::default();
        assert!(settings.cache_enabled);
        assert!(!settings.lazy_loading_enabled);
        assert!(settings.multiple_result_sets_enabled);
        assert_eq!(settings.auto_mapping_behavior, AutoMappingBehavior::Partial);
        assert_eq!(
            settings.auto_mapping_unknown_column_behavior,
            UnknownColumnBehavior::None
        );
        assert_eq!(settings.local_cache_scope, LocalCacheScope::Session);
        assert_eq!(settings.jdbc_type_for_null, JdbcType::Other);
        assert_eq!(
            settings.lazy_load_trigger_methods,
            vec!["equals", "clone", "hashCode", "toString"]
        );
    }

    #[test]
    fn settings_element_applies_values() {
        let element = parse_document(
            r#"<settings>
                 <setting name="mapUnderscoreToCamelCase" value="true"/>
                 <setting name="localCacheScope" value="STATEMENT"/>
                 <setting name="defaultStatementTimeout" value="30"/>
               </settings>"#,
        )
        .unwrap();
        let settings = Settings::from_settings_element(&element).unwrap();
        assert!(settings.map_underscore_to_camel_case);
        assert_eq!(settings.local_cache_scope, LocalCacheScope::Statement);
        assert_eq!(settings.default_statement_timeout, Some(30));
    }

    #[test]
    fn unknown_options_fail_bootstrap() {
        let mut settings = Settings::default();
        let err = settings.apply("cacheDisabled", "true").unwrap_err();
        assert!(matches!(err, MapperError::Config(_)));
    }
}

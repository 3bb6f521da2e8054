use smol_str::SmolStr;

/// Database-side type names as they appear in `jdbcType=` options and
/// `<result jdbcType="…">` attributes.
#[derive(
    strum_macros::EnumString,
    strum_macros::AsRefStr,
    strum_macros::Display,
    Debug,
    Clone,
    Copy,
    Default,
    Eq,
    PartialEq,
    Hash,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum JdbcType {
    Bit,
    Tinyint,
    Smallint,
    Integer,
    Bigint,
    Float,
    Real,
    Double,
    Numeric,
    Decimal,
    Char,
    Varchar,
    Longvarchar,
    Date,
    Time,
    Timestamp,
    Binary,
    Varbinary,
    Longvarbinary,
    Blob,
    Clob,
    Boolean,
    Cursor,
    Array,
    Null,
    #[default]
    Other,
}

/// Direction of a `?` placeholder.
#[derive(
    strum_macros::EnumString,
    strum_macros::AsRefStr,
    Debug,
    Clone,
    Copy,
    Default,
    Eq,
    PartialEq,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    #[strum(serialize = "INOUT")]
    InOut,
}

/// Application type names used by shapes, codecs and declared attribute
/// types. Scalars use the canonical lowercase names below; everything else
/// refers to a registered shape.
pub const TYPE_INT: &str = "int";
pub const TYPE_LONG: &str = "long";
pub const TYPE_DOUBLE: &str = "double";
pub const TYPE_BOOLEAN: &str = "boolean";
pub const TYPE_STRING: &str = "string";
pub const TYPE_BYTES: &str = "bytes";
pub const TYPE_MAP: &str = "map";
pub const TYPE_LIST: &str = "list";
pub const TYPE_CURSOR: &str = "cursor";

/// Normalize a declared type name: trims whitespace and folds the common
/// aliases of the scalar types onto their canonical names.
pub fn normalize_type_name(name: &str) -> SmolStr {
    let name = name.trim();
    match name.to_ascii_lowercase().as_str() {
        "int" | "integer" | "short" => SmolStr::new_static(TYPE_INT),
        "long" => SmolStr::new_static(TYPE_LONG),
        "double" | "float" => SmolStr::new_static(TYPE_DOUBLE),
        "bool" | "boolean" => SmolStr::new_static(TYPE_BOOLEAN),
        "string" | "str" => SmolStr::new_static(TYPE_STRING),
        "bytes" | "byte[]" => SmolStr::new_static(TYPE_BYTES),
        "map" | "hashmap" => SmolStr::new_static(TYPE_MAP),
        "list" | "collection" | "arraylist" => SmolStr::new_static(TYPE_LIST),
        _ => SmolStr::new(name),
    }
}

pub fn is_scalar_type(name: &str) -> bool {
    matches!(
        name,
        TYPE_INT | TYPE_LONG | TYPE_DOUBLE | TYPE_BOOLEAN | TYPE_STRING | TYPE_BYTES
    )
}

/// Split a single-parameter generic container name, e.g. `list<Address>`
/// into `("list", "Address")`. Returns `None` for non-generic names.
pub fn split_container(name: &str) -> Option<(&str, &str)> {
    let open = name.find('<')?;
    let close = name.rfind('>')?;
    if close != name.len() - 1 || close <= open {
        return None;
    }
    Some((&name[..open], name[open + 1..close].trim()))
}

/// The element type of a declared sequence container, if the declared type
/// is one.
pub fn sequence_element(declared: &str) -> Option<SmolStr> {
    let (container, element) = split_container(declared)?;
    matches!(
        container.trim().to_ascii_lowercase().as_str(),
        "list" | "collection" | "set" | "vec" | "array"
    )
    .then(|| normalize_type_name(element))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn jdbc_type_parses_uppercase_names() {
        assert_eq!(JdbcType::from_str("VARCHAR").unwrap(), JdbcType::Varchar);
        assert_eq!(JdbcType::from_str("BIGINT").unwrap(), JdbcType::Bigint);
        assert!(JdbcType::from_str("varchar2").is_err());
    }

    #[test]
    fn parameter_mode_parses() {
        assert_eq!(ParameterMode::from_str("OUT").unwrap(), ParameterMode::Out);
        assert_eq!(
            ParameterMode::from_str("INOUT").unwrap(),
            ParameterMode::InOut
        );
    }

    #[test]
    fn container_splitting() {
        assert_eq!(
            sequence_element("list<Address>"),
            Some(SmolStr::new("Address"))
        );
        assert_eq!(sequence_element("list<int>"), Some(SmolStr::new("int")));
        assert_eq!(sequence_element("Address"), None);
        assert_eq!(sequence_element("map<string>"), None);
    }

    #[test]
    fn type_name_normalization() {
        assert_eq!(normalize_type_name("Integer"), "int");
        assert_eq!(normalize_type_name("Person"), "Person");
    }
}

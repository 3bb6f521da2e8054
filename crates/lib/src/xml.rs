use roxmltree::{Document, Node, NodeType};
use smol_str::SmolStr;
use sqlmapper_helpers::IndexMap;
use sqlmapper_lib_core::errors::{MapperError, Result};
use sqlmapper_lib_core::tokens::parse_tokens;

/// An owned element tree built over the roxmltree tokenizer, so the
/// compiler can clone and splice subtrees during `<include>` resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub name: SmolStr,
    pub attrs: IndexMap<String, String>,
    pub children: Vec<XmlContent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlContent {
    Element(XmlElement),
    Text(String),
}

pub fn parse_document(source: &str) -> Result<XmlElement> {
    let document = Document::parse(source)
        .map_err(|err| MapperError::config(format!("malformed XML document: {err}")))?;
    Ok(convert(document.root_element()))
}

fn convert(node: Node<'_, '_>) -> XmlElement {
    let mut attrs = IndexMap::default();
    for attr in node.attributes() {
        attrs.insert(attr.name().to_string(), attr.value().to_string());
    }
    let mut children = Vec::new();
    for child in node.children() {
        match child.node_type() {
            NodeType::Element => children.push(XmlContent::Element(convert(child))),
            NodeType::Text => {
                if let Some(text) = child.text() {
                    if !text.trim().is_empty() {
                        children.push(XmlContent::Text(text.to_string()));
                    }
                }
            }
            _ => {}
        }
    }
    XmlElement {
        name: SmolStr::new(node.tag_name().name()),
        attrs,
        children,
    }
}

impl XmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn required_attr(&self, name: &str) -> Result<&str> {
        self.attr(name).ok_or_else(|| {
            MapperError::config(format!(
                "missing required attribute '{name}' on <{}>",
                self.name
            ))
        })
    }

    pub fn bool_attr(&self, name: &str, default: bool) -> Result<bool> {
        match self.attr(name) {
            None => Ok(default),
            Some(value) => parse_bool(value).ok_or_else(|| {
                MapperError::config(format!(
                    "attribute '{name}' on <{}> must be true or false, got '{value}'",
                    self.name
                ))
            }),
        }
    }

    pub fn numeric_attr<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.attr(name) {
            None => Ok(None),
            Some(value) => value.trim().parse().map(Some).map_err(|_| {
                MapperError::config(format!(
                    "attribute '{name}' on <{}> is not numeric: '{value}'",
                    self.name
                ))
            }),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|content| match content {
            XmlContent::Element(element) => Some(element),
            XmlContent::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|element| element.name == name)
    }

    /// Concatenated text content of this element only.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for content in &self.children {
            if let XmlContent::Text(text) = content {
                out.push_str(text);
            }
        }
        out
    }

    /// Apply `${…}` substitutions from `properties` to every attribute
    /// value and text node of the subtree. Unknown names are left verbatim.
    pub fn substitute_properties(&mut self, properties: &IndexMap<String, String>) -> Result<()> {
        let mut substitute = |raw: &str| -> Result<String> {
            parse_tokens(raw, "${", "}", &mut |name| {
                Ok(match properties.get(name.trim()) {
                    Some(value) => value.clone(),
                    None => format!("${{{name}}}"),
                })
            })
        };
        for value in self.attrs.values_mut() {
            *value = substitute(value)?;
        }
        for content in &mut self.children {
            match content {
                XmlContent::Text(text) => *text = substitute(text)?,
                XmlContent::Element(element) => element.substitute_properties(properties)?,
            }
        }
        Ok(())
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_attributes_text_and_nesting() {
        let root = parse_document(
            r#"<mapper namespace="app">
                 <sql id="cols">id, name</sql>
                 <select id="find">SELECT <include refid="cols"/> FROM t</select>
               </mapper>"#,
        )
        .unwrap();
        assert_eq!(root.name, "mapper");
        assert_eq!(root.attr("namespace"), Some("app"));
        let select = root.child("select").unwrap();
        assert_eq!(select.attr("id"), Some("find"));
        assert!(select.child("include").is_some());
        assert_eq!(root.child("sql").unwrap().text(), "id, name");
    }

    #[test]
    fn malformed_documents_fail_with_config_errors() {
        let err = parse_document("<mapper><select></mapper>").unwrap_err();
        assert!(matches!(err, MapperError::Config(_)));
    }

    #[test]
    fn property_substitution_applies_to_attrs_and_text() {
        let mut element = parse_document(r#"<sql id="cols">${alias}.id, ${alias}.name</sql>"#).unwrap();
        let mut properties = IndexMap::default();
        properties.insert("alias".to_string(), "p".to_string());
        element.substitute_properties(&properties).unwrap();
        assert_eq!(element.text(), "p.id, p.name");
    }

    #[test]
    fn unknown_properties_stay_verbatim() {
        let mut element = parse_document("<sql>${missing}.id</sql>").unwrap();
        element.substitute_properties(&IndexMap::default()).unwrap();
        assert_eq!(element.text(), "${missing}.id");
    }
}

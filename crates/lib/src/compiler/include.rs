use ahash::AHashMap;
use smol_str::SmolStr;
use sqlmapper_helpers::IndexMap;
use sqlmapper_lib_core::errors::{MapperError, Result};

use crate::mapping::qualify;
use crate::xml::{XmlContent, XmlElement};

/// Substitute every `<include refid="…">` with the referenced `<sql>`
/// fragment's children, applying `<property>` bindings as `${…}`
/// substitutions over the spliced subtree. Recursive includes are
/// followed; a cycle is fatal.
///
/// Returns `None` when a referenced fragment is not registered yet, so the
/// caller can retry in the fixed-point loop.
pub(crate) fn resolve_includes(
    contents: &[XmlContent],
    namespace: &str,
    fragments: &AHashMap<SmolStr, XmlElement>,
    visiting: &mut Vec<SmolStr>,
) -> Result<Option<Vec<XmlContent>>> {
    let mut resolved = Vec::with_capacity(contents.len());
    for content in contents {
        match content {
            XmlContent::Text(text) => resolved.push(XmlContent::Text(text.clone())),
            XmlContent::Element(element) if element.name == "include" => {
                let refid = qualify(namespace, element.required_attr("refid")?);
                if visiting.contains(&refid) {
                    return Err(MapperError::CyclicInclude(refid.to_string()));
                }
                let Some(fragment) = fragments.get(&refid) else {
                    return Ok(None);
                };

                let mut properties = IndexMap::default();
                for property in element.elements() {
                    if property.name != "property" {
                        return Err(MapperError::config(format!(
                            "unexpected <{}> inside <include refid=\"{refid}\">",
                            property.name
                        )));
                    }
                    properties.insert(
                        property.required_attr("name")?.to_string(),
                        property.required_attr("value")?.to_string(),
                    );
                }

                let mut fragment = fragment.clone();
                fragment.substitute_properties(&properties)?;

                visiting.push(refid);
                let inner = resolve_includes(&fragment.children, namespace, fragments, visiting)?;
                visiting.pop();
                match inner {
                    Some(children) => resolved.extend(children),
                    None => return Ok(None),
                }
            }
            XmlContent::Element(element) => {
                let inner = resolve_includes(&element.children, namespace, fragments, visiting)?;
                match inner {
                    Some(children) => {
                        let mut element = element.clone();
                        element.children = children;
                        resolved.push(XmlContent::Element(element));
                    }
                    None => return Ok(None),
                }
            }
        }
    }
    Ok(Some(resolved))
}

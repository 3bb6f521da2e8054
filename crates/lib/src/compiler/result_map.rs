use std::str::FromStr;

use ahash::AHashSet;
use smol_str::SmolStr;
use sqlmapper_helpers::IndexMap;
use sqlmapper_lib_core::errors::{MapperError, Result};
use sqlmapper_lib_core::types::{JdbcType, normalize_type_name};

use crate::compiler::Compiler;
use crate::mapping::{Discriminator, ResultMap, ResultMapping, qualify};
use crate::xml::XmlElement;

/// Build one `<resultMap>`. Returns `false` (not ready) while an `extends`
/// parent is still unregistered.
pub(crate) fn try_build_result_map(
    compiler: &mut Compiler<'_>,
    namespace: &str,
    element: &XmlElement,
) -> Result<bool> {
    let id = qualify(namespace, element.required_attr("id")?);
    let parent = match element.attr("extends") {
        Some(parent) => {
            let parent_id = qualify(namespace, parent);
            match compiler.result_map(&parent_id) {
                Some(parent) => Some(parent.clone()),
                None => return Ok(false),
            }
        }
        None => None,
    };

    let mut map = build_result_map(compiler, namespace, id, element)?;
    if let Some(parent) = parent {
        merge_parent(&mut map, &parent);
    }
    compiler.insert_result_map(map)?;
    Ok(true)
}

fn build_result_map(
    compiler: &mut Compiler<'_>,
    namespace: &str,
    id: SmolStr,
    element: &XmlElement,
) -> Result<ResultMap> {
    let type_name = element
        .attr("type")
        .or_else(|| element.attr("javaType"))
        .or_else(|| element.attr("ofType"))
        .or_else(|| element.attr("resultType"))
        .map(normalize_type_name)
        .unwrap_or_else(|| SmolStr::new_static("map"));
    let auto_mapping = match element.attr("autoMapping") {
        None => None,
        Some(raw) => Some(element.bool_attr("autoMapping", false).map_err(|_| {
            MapperError::config(format!("invalid autoMapping value '{raw}' on '{id}'"))
        })?),
    };

    let mut mappings = Vec::new();
    let mut constructor_mappings = Vec::new();
    let mut discriminator_element = None;

    for child in element.elements() {
        match child.name.as_str() {
            "constructor" => {
                for (ordinal, arg) in child.elements().enumerate() {
                    let is_id = match arg.name.as_str() {
                        "idArg" => true,
                        "arg" => false,
                        other => {
                            return Err(MapperError::config(format!(
                                "unexpected <{other}> inside <constructor> of '{id}'"
                            )));
                        }
                    };
                    let mut mapping = leaf_mapping(arg, &id)?;
                    if mapping.property.is_empty() {
                        mapping.property = format!("arg{ordinal}");
                    }
                    mapping.is_constructor = true;
                    mapping.is_id = is_id;
                    constructor_mappings.push(mapping);
                }
            }
            "id" | "result" => {
                let mut mapping = leaf_mapping(child, &id)?;
                if mapping.property.is_empty() {
                    return Err(MapperError::config(format!(
                        "<{}> in '{id}' declares no property",
                        child.name
                    )));
                }
                mapping.is_id = child.name == "id";
                mapping.validate()?;
                mappings.push(mapping);
            }
            "association" | "collection" => {
                let mapping = nested_mapping(compiler, namespace, &id, child)?;
                mapping.validate()?;
                mappings.push(mapping);
            }
            "discriminator" => {
                if discriminator_element.is_some() {
                    return Err(MapperError::config(format!(
                        "result map '{id}' declares more than one discriminator"
                    )));
                }
                discriminator_element = Some(child.clone());
            }
            other => {
                return Err(MapperError::config(format!(
                    "unexpected <{other}> inside result map '{id}'"
                )));
            }
        }
    }

    // Inline discriminator cases inherit the sibling mappings collected
    // above.
    let discriminator = match discriminator_element {
        Some(element) => Some(build_discriminator(
            compiler,
            namespace,
            &id,
            &type_name,
            &element,
            &mappings,
            &constructor_mappings,
        )?),
        None => None,
    };

    Ok(ResultMap {
        id,
        type_name,
        mappings,
        constructor_mappings,
        discriminator,
        auto_mapping,
    })
}

fn leaf_mapping(element: &XmlElement, map_id: &str) -> Result<ResultMapping> {
    Ok(ResultMapping {
        property: element.attr("property").or(element.attr("name")).unwrap_or_default().to_string(),
        column: element.attr("column").map(ToString::to_string),
        app_type: element.attr("javaType").map(normalize_type_name),
        jdbc_type: parse_jdbc_attr(element, map_id)?,
        codec: element.attr("typeHandler").map(SmolStr::new),
        ..Default::default()
    })
}

fn nested_mapping(
    compiler: &mut Compiler<'_>,
    namespace: &str,
    map_id: &str,
    element: &XmlElement,
) -> Result<ResultMapping> {
    let property = element.required_attr("property")?.to_string();
    let mut mapping = ResultMapping {
        property: property.clone(),
        column: element.attr("column").map(ToString::to_string),
        app_type: element
            .attr("javaType")
            .or_else(|| element.attr("ofType"))
            .map(normalize_type_name),
        jdbc_type: parse_jdbc_attr(element, map_id)?,
        codec: element.attr("typeHandler").map(SmolStr::new),
        column_prefix: element.attr("columnPrefix").map(ToString::to_string),
        not_null_columns: element
            .attr("notNullColumn")
            .map(|raw| raw.split(',').map(|c| c.trim().to_string()).collect())
            .unwrap_or_default(),
        is_collection: element.name == "collection",
        ..Default::default()
    };

    if let Some(select) = element.attr("select") {
        mapping.nested_select = Some(qualify(namespace, select));
    } else if let Some(result_map) = element.attr("resultMap") {
        mapping.nested_result_map = Some(qualify(namespace, result_map));
    } else {
        // Inline nested map, registered under a synthesized name.
        let nested_id = SmolStr::new(format!("{map_id}_{}_{property}", element.name));
        let nested = build_result_map(compiler, namespace, nested_id.clone(), element)?;
        compiler.insert_result_map(nested)?;
        mapping.nested_result_map = Some(nested_id);
    }
    Ok(mapping)
}

#[allow(clippy::too_many_arguments)]
fn build_discriminator(
    compiler: &mut Compiler<'_>,
    namespace: &str,
    map_id: &str,
    type_name: &SmolStr,
    element: &XmlElement,
    sibling_mappings: &[ResultMapping],
    sibling_constructor_mappings: &[ResultMapping],
) -> Result<Discriminator> {
    let column = element.required_attr("column")?.to_string();
    let mut cases = IndexMap::default();
    for case in element.elements() {
        if case.name != "case" {
            return Err(MapperError::config(format!(
                "unexpected <{}> inside <discriminator> of '{map_id}'",
                case.name
            )));
        }
        let value = case.required_attr("value")?.to_string();
        let target = match case.attr("resultMap") {
            Some(result_map) => qualify(namespace, result_map),
            None => {
                let case_id = SmolStr::new(format!("{map_id}_case_{value}"));
                let mut case_element = case.clone();
                if case_element.attr("type").is_none() && case_element.attr("resultType").is_none()
                {
                    case_element
                        .attrs
                        .insert("type".to_string(), type_name.to_string());
                }
                let mut case_map =
                    build_result_map(compiler, namespace, case_id.clone(), &case_element)?;
                inherit_siblings(&mut case_map, sibling_mappings, sibling_constructor_mappings);
                compiler.insert_result_map(case_map)?;
                case_id
            }
        };
        cases.insert(value, target);
    }

    Ok(Discriminator {
        column,
        app_type: element.attr("javaType").map(normalize_type_name),
        jdbc_type: parse_jdbc_attr(element, map_id)?,
        codec: element.attr("typeHandler").map(SmolStr::new),
        cases,
    })
}

fn parse_jdbc_attr(element: &XmlElement, map_id: &str) -> Result<Option<JdbcType>> {
    match element.attr("jdbcType") {
        None => Ok(None),
        Some(raw) => JdbcType::from_str(raw).map(Some).map_err(|_| {
            MapperError::config(format!("unknown jdbcType '{raw}' in result map '{map_id}'"))
        }),
    }
}

fn mapping_key(mapping: &ResultMapping) -> (Option<String>, String) {
    (mapping.column.clone(), mapping.property.clone())
}

/// `extends` merge: parent mappings not overridden by the child's
/// (column, property) tuples are appended; if the child declares any
/// constructor mapping, the parent's constructor mappings are dropped.
fn merge_parent(child: &mut ResultMap, parent: &ResultMap) {
    let declared: AHashSet<_> = child.mappings.iter().map(mapping_key).collect();
    for mapping in &parent.mappings {
        if !declared.contains(&mapping_key(mapping)) {
            child.mappings.push(mapping.clone());
        }
    }
    if child.constructor_mappings.is_empty() {
        child.constructor_mappings = parent.constructor_mappings.clone();
    }
    if child.discriminator.is_none() {
        child.discriminator = parent.discriminator.clone();
    }
}

fn inherit_siblings(
    case_map: &mut ResultMap,
    mappings: &[ResultMapping],
    constructor_mappings: &[ResultMapping],
) {
    let declared: AHashSet<_> = case_map.mappings.iter().map(mapping_key).collect();
    for mapping in mappings {
        if !declared.contains(&mapping_key(mapping)) {
            case_map.mappings.push(mapping.clone());
        }
    }
    if case_map.constructor_mappings.is_empty() {
        case_map.constructor_mappings = constructor_mappings.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use sqlmapper_lib_core::reflection::ShapeRegistry;

    use super::*;
    use crate::config::Settings;
    use crate::xml::parse_document;

    fn compiler_for(settings: &Settings) -> Compiler<'_> {
        Compiler::new(settings, None, Arc::new(ShapeRegistry::new()))
    }

    fn build(compiler: &mut Compiler<'_>, source: &str) -> Result<bool> {
        let element = parse_document(source).unwrap();
        try_build_result_map(compiler, "app", &element)
    }

    #[test]
    fn child_overrides_parent_by_column_property_tuple() {
        let settings = Settings::default();
        let mut compiler = compiler_for(&settings);
        assert!(
            build(
                &mut compiler,
                r#"<resultMap id="parent" type="Person">
                     <id property="id" column="id"/>
                     <result property="name" column="name"/>
                   </resultMap>"#,
            )
            .unwrap()
        );
        assert!(
            build(
                &mut compiler,
                r#"<resultMap id="child" type="Person" extends="parent">
                     <result property="name" column="nick_name"/>
                   </resultMap>"#,
            )
            .unwrap()
        );

        let child = compiler.result_map("app.child").unwrap();
        let columns: Vec<_> = child
            .mappings
            .iter()
            .map(|m| (m.property.as_str(), m.column.as_deref().unwrap()))
            .collect();
        // Child's own mapping first, parent's non-overridden ones appended.
        assert_eq!(
            columns,
            vec![("name", "nick_name"), ("id", "id"), ("name", "name")]
        );
        assert!(child.mappings.iter().any(|m| m.is_id));
    }

    #[test]
    fn extends_waits_for_the_parent() {
        let settings = Settings::default();
        let mut compiler = compiler_for(&settings);
        let ready = build(
            &mut compiler,
            r#"<resultMap id="child" type="Person" extends="missing"/>"#,
        )
        .unwrap();
        assert!(!ready);
    }

    #[test]
    fn child_constructor_mappings_drop_the_parents() {
        let settings = Settings::default();
        let mut compiler = compiler_for(&settings);
        build(
            &mut compiler,
            r#"<resultMap id="parent" type="Person">
                 <constructor><idArg column="id" javaType="long"/></constructor>
               </resultMap>"#,
        )
        .unwrap();
        build(
            &mut compiler,
            r#"<resultMap id="child" type="Person" extends="parent">
                 <constructor>
                   <idArg column="id" javaType="long"/>
                   <arg column="name" javaType="string"/>
                 </constructor>
               </resultMap>"#,
        )
        .unwrap();

        let child = compiler.result_map("app.child").unwrap();
        assert_eq!(child.constructor_mappings.len(), 2);
    }

    #[test]
    fn inline_collections_register_a_synthesized_map() {
        let settings = Settings::default();
        let mut compiler = compiler_for(&settings);
        build(
            &mut compiler,
            r#"<resultMap id="person" type="Person">
                 <id property="id" column="person_id"/>
                 <collection property="addresses" ofType="Address" columnPrefix="addr_">
                   <id property="id" column="id"/>
                   <result property="street" column="street"/>
                 </collection>
               </resultMap>"#,
        )
        .unwrap();

        let person = compiler.result_map("app.person").unwrap();
        let nested = person.mappings.iter().find(|m| m.property == "addresses").unwrap();
        assert_eq!(
            nested.nested_result_map.as_deref(),
            Some("app.person_collection_addresses")
        );
        assert_eq!(nested.column_prefix.as_deref(), Some("addr_"));
        let child = compiler
            .result_map("app.person_collection_addresses")
            .unwrap();
        assert_eq!(child.type_name, "Address");
        assert_eq!(child.mappings.len(), 2);
    }

    #[test]
    fn discriminator_cases_inherit_sibling_mappings() {
        let settings = Settings::default();
        let mut compiler = compiler_for(&settings);
        build(
            &mut compiler,
            r#"<resultMap id="vehicle" type="Vehicle">
                 <id property="id" column="id"/>
                 <discriminator column="kind" javaType="string">
                   <case value="car"><result property="doors" column="doors"/></case>
                   <case value="bike" resultMap="bare"/>
                 </discriminator>
               </resultMap>"#,
        )
        .unwrap();

        let vehicle = compiler.result_map("app.vehicle").unwrap();
        let discriminator = vehicle.discriminator.as_ref().unwrap();
        assert_eq!(discriminator.cases.get("car").map(SmolStr::as_str), Some("app.vehicle_case_car"));
        assert_eq!(discriminator.cases.get("bike").map(SmolStr::as_str), Some("app.bare"));

        let car = compiler.result_map("app.vehicle_case_car").unwrap();
        let properties: Vec<_> = car.mappings.iter().map(|m| m.property.as_str()).collect();
        assert_eq!(properties, vec!["doors", "id"]);
    }
}

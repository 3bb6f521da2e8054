use smol_str::SmolStr;
use sqlmapper_lib_core::errors::{MapperError, Result};
use sqlmapper_lib_core::expr;
use sqlmapper_lib_core::nodes::{
    ChooseNode, DynamicSqlSource, ForEachNode, IfNode, SetNode, SqlNode, SqlNodeBehavior,
    SqlSource, StaticSqlSource, TrimNode, VarDeclNode, WhereNode,
};
use sqlmapper_lib_core::reflection::ShapeRegistry;
use sqlmapper_lib_core::scope::DynamicContext;
use sqlmapper_lib_core::tokens::build_static_sql;
use sqlmapper_lib_core::value::Value;

use crate::xml::{XmlContent, XmlElement};

/// Turn a statement body (after include resolution) into its executable
/// source: a dynamic node tree when any dynamic tag or `${…}` interpolation
/// is present, otherwise the token parser runs once now and the result is a
/// pre-parsed static source.
pub(crate) fn build_sql_source(
    shapes: &ShapeRegistry,
    contents: &[XmlContent],
    parameter_type: Option<&SmolStr>,
) -> Result<SqlSource> {
    let root = parse_node_contents(contents)?;
    if root.is_dynamic() {
        return Ok(SqlSource::Dynamic(DynamicSqlSource {
            root,
            parameter_type: parameter_type.cloned(),
        }));
    }

    // Static: evaluation cannot depend on parameters, so render once.
    let parameter = Value::Null;
    let mut ctx = DynamicContext::new(shapes, &parameter);
    root.apply(&mut ctx)?;
    let (sql, descriptors) =
        build_static_sql(ctx.sql(), shapes, parameter_type.map(SmolStr::as_str))?;
    Ok(SqlSource::Static(StaticSqlSource { sql, descriptors }))
}

pub(crate) fn parse_node_contents(contents: &[XmlContent]) -> Result<SqlNode> {
    let mut children = Vec::with_capacity(contents.len());
    for content in contents {
        match content {
            XmlContent::Text(text) => {
                if !text.trim().is_empty() {
                    children.push(SqlNode::text(text));
                }
            }
            XmlContent::Element(element) => children.push(parse_dynamic_element(element)?),
        }
    }
    Ok(SqlNode::mixed(children))
}

fn parse_dynamic_element(element: &XmlElement) -> Result<SqlNode> {
    match element.name.as_str() {
        "if" => Ok(SqlNode::If(parse_if(element)?)),
        "choose" => {
            let mut whens = Vec::new();
            let mut otherwise = None;
            for child in element.elements() {
                match child.name.as_str() {
                    "when" => whens.push(parse_if(child)?),
                    "otherwise" => {
                        if otherwise.is_some() {
                            return Err(MapperError::config(
                                "<choose> declares more than one <otherwise>".to_string(),
                            ));
                        }
                        otherwise = Some(Box::new(parse_node_contents(&child.children)?));
                    }
                    other => {
                        return Err(MapperError::config(format!(
                            "unexpected <{other}> inside <choose>"
                        )));
                    }
                }
            }
            Ok(SqlNode::Choose(ChooseNode { whens, otherwise }))
        }
        "where" => Ok(SqlNode::Where(WhereNode::new(parse_node_contents(
            &element.children,
        )?))),
        "set" => Ok(SqlNode::Set(SetNode::new(parse_node_contents(
            &element.children,
        )?))),
        "trim" => Ok(SqlNode::Trim(TrimNode {
            contents: Box::new(parse_node_contents(&element.children)?),
            prefix: element.attr("prefix").map(|p| format!("{p} ")),
            suffix: element.attr("suffix").map(|s| format!(" {s}")),
            prefix_overrides: split_overrides(element.attr("prefixOverrides")),
            suffix_overrides: split_overrides(element.attr("suffixOverrides")),
        })),
        "foreach" => {
            let collection_text = element.required_attr("collection")?.to_string();
            Ok(SqlNode::ForEach(ForEachNode {
                collection: expr::parse(&collection_text)?,
                collection_text,
                item: element.attr("item").map(ToString::to_string),
                index: element.attr("index").map(ToString::to_string),
                open: element.attr("open").unwrap_or_default().to_string(),
                close: element.attr("close").unwrap_or_default().to_string(),
                separator: element.attr("separator").unwrap_or_default().to_string(),
                contents: Box::new(parse_node_contents(&element.children)?),
            }))
        }
        "bind" => Ok(SqlNode::VarDecl(VarDeclNode {
            name: element.required_attr("name")?.to_string(),
            expression: expr::parse(element.required_attr("value")?)?,
        })),
        other => Err(MapperError::config(format!(
            "unknown dynamic SQL element <{other}>"
        ))),
    }
}

fn parse_if(element: &XmlElement) -> Result<IfNode> {
    Ok(IfNode {
        test: expr::parse(element.required_attr("test")?)?,
        contents: Box::new(parse_node_contents(&element.children)?),
    })
}

fn split_overrides(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| raw.split('|').map(ToString::to_string).collect())
        .unwrap_or_default()
}

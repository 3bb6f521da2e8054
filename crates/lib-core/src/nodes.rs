use enum_dispatch::enum_dispatch;
use smol_str::SmolStr;
use sqlmapper_helpers::IndexMap;

use crate::errors::{MapperError, Result};
use crate::expr::{self, Expr};
use crate::reflection::ShapeRegistry;
use crate::scope::DynamicContext;
use crate::tokens::{ParameterDescriptor, build_static_sql, parse_tokens};
use crate::value::Value;

/// The polymorphic SQL fragment tree. Every variant evaluates into the
/// shared accumulator; the enum is closed so a missing case is a compile
/// error.
#[enum_dispatch(SqlNodeBehavior)]
#[derive(Debug, Clone)]
pub enum SqlNode {
    StaticText(StaticTextNode),
    InterpolatedText(InterpolatedTextNode),
    If(IfNode),
    Choose(ChooseNode),
    Trim(TrimNode),
    Where(WhereNode),
    Set(SetNode),
    ForEach(ForEachNode),
    VarDecl(VarDeclNode),
    Mixed(MixedNode),
}

#[enum_dispatch]
pub trait SqlNodeBehavior {
    /// Evaluate into the accumulator; the return value reports whether the
    /// node contributed (drives `<choose>`).
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> Result<bool>;
}

impl SqlNode {
    pub fn text(text: &str) -> SqlNode {
        let trimmed = text.trim();
        if trimmed.contains("${") {
            SqlNode::InterpolatedText(InterpolatedTextNode {
                text: trimmed.to_string(),
            })
        } else {
            SqlNode::StaticText(StaticTextNode {
                text: trimmed.to_string(),
            })
        }
    }

    pub fn mixed(children: Vec<SqlNode>) -> SqlNode {
        SqlNode::Mixed(MixedNode { children })
    }

    /// Whether evaluation of this node can depend on the invocation's
    /// parameter object. A tree without dynamic nodes compiles to a static
    /// source.
    pub fn is_dynamic(&self) -> bool {
        match self {
            SqlNode::StaticText(_) => false,
            SqlNode::Mixed(mixed) => mixed.children.iter().any(SqlNode::is_dynamic),
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaticTextNode {
    pub text: String,
}

impl SqlNodeBehavior for StaticTextNode {
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> Result<bool> {
        ctx.append(&self.text);
        Ok(true)
    }
}

/// Literal text containing `${…}` segments resolved against the scope at
/// evaluation time. Substitution is textual; no binding is produced.
#[derive(Debug, Clone)]
pub struct InterpolatedTextNode {
    pub text: String,
}

impl SqlNodeBehavior for InterpolatedTextNode {
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> Result<bool> {
        let rendered = parse_tokens(&self.text, "${", "}", &mut |expression| {
            let parsed = expr::parse(expression)?;
            let value = expr::evaluate(&parsed, &ctx.scope)?;
            Ok(value.resolved()?.to_text())
        })?;
        ctx.append(&rendered);
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct IfNode {
    pub test: Expr,
    pub contents: Box<SqlNode>,
}

impl SqlNodeBehavior for IfNode {
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> Result<bool> {
        if expr::evaluate_bool(&self.test, &ctx.scope)? {
            self.contents.apply(ctx)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[derive(Debug, Clone)]
pub struct ChooseNode {
    pub whens: Vec<IfNode>,
    pub otherwise: Option<Box<SqlNode>>,
}

impl SqlNodeBehavior for ChooseNode {
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> Result<bool> {
        for when in &self.whens {
            if when.apply(ctx)? {
                return Ok(true);
            }
        }
        if let Some(otherwise) = &self.otherwise {
            otherwise.apply(ctx)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[derive(Debug, Clone)]
pub struct TrimNode {
    pub contents: Box<SqlNode>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub prefix_overrides: Vec<String>,
    pub suffix_overrides: Vec<String>,
}

impl TrimNode {
    fn render(&self, captured: &str) -> String {
        let text = captured.trim();
        if text.is_empty() {
            return String::new();
        }

        let mut start = 0;
        for over in &self.prefix_overrides {
            if let Some(head) = text.get(..over.len()) {
                if head.eq_ignore_ascii_case(over) {
                    start = over.len();
                    break;
                }
            }
        }
        let mut end = text.len();
        for over in &self.suffix_overrides {
            if end >= start + over.len() {
                if let Some(tail) = text.get(end - over.len()..end) {
                    if tail.eq_ignore_ascii_case(over) {
                        end -= over.len();
                        break;
                    }
                }
            }
        }

        let body = &text[start..end];
        if body.trim().is_empty() {
            return String::new();
        }
        let mut rendered = String::new();
        if let Some(prefix) = &self.prefix {
            rendered.push_str(prefix);
        }
        rendered.push_str(body);
        if let Some(suffix) = &self.suffix {
            rendered.push_str(suffix);
        }
        rendered
    }
}

impl SqlNodeBehavior for TrimNode {
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> Result<bool> {
        let captured = ctx.capture(|ctx| self.contents.apply(ctx).map(|_| ()))?;
        let rendered = self.render(&captured);
        let applied = !rendered.is_empty();
        ctx.append(&rendered);
        Ok(applied)
    }
}

/// `<where>`: a trim stripping a leading AND/OR and prefixing WHERE.
#[derive(Debug, Clone)]
pub struct WhereNode {
    trim: TrimNode,
}

impl WhereNode {
    pub fn new(contents: SqlNode) -> Self {
        WhereNode {
            trim: TrimNode {
                contents: Box::new(contents),
                prefix: Some("WHERE ".to_string()),
                suffix: None,
                prefix_overrides: ["AND ", "OR ", "AND\t", "OR\t", "AND\n", "OR\n"]
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                suffix_overrides: Vec::new(),
            },
        }
    }
}

impl SqlNodeBehavior for WhereNode {
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> Result<bool> {
        self.trim.apply(ctx)
    }
}

/// `<set>`: a trim stripping a trailing comma and prefixing SET.
#[derive(Debug, Clone)]
pub struct SetNode {
    trim: TrimNode,
}

impl SetNode {
    pub fn new(contents: SqlNode) -> Self {
        SetNode {
            trim: TrimNode {
                contents: Box::new(contents),
                prefix: Some("SET ".to_string()),
                suffix: None,
                prefix_overrides: Vec::new(),
                suffix_overrides: vec![",".to_string()],
            },
        }
    }
}

impl SqlNodeBehavior for SetNode {
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> Result<bool> {
        self.trim.apply(ctx)
    }
}

#[derive(Debug, Clone)]
pub struct ForEachNode {
    pub collection: Expr,
    pub collection_text: String,
    pub item: Option<String>,
    pub index: Option<String>,
    pub open: String,
    pub close: String,
    pub separator: String,
    pub contents: Box<SqlNode>,
}

impl ForEachNode {
    /// Rewrite `#{item…}`/`#{index…}` placeholders of one iteration onto
    /// the uniquified binding names so every iteration binds its own value.
    fn uniquify(&self, fragment: &str, unique: u32) -> Result<String> {
        parse_tokens(fragment, "#{", "}", &mut |expression| {
            let (property, options) = match expression.find(',') {
                Some(at) => (&expression[..at], &expression[at..]),
                None => (expression, ""),
            };
            let head_len = property
                .find(['.', '['])
                .unwrap_or(property.len());
            let head = property[..head_len].trim();
            let renamed = [self.item.as_deref(), self.index.as_deref()]
                .into_iter()
                .flatten()
                .any(|name| name == head);
            if renamed {
                Ok(format!(
                    "#{{__frch_{head}_{unique}{}{options}}}",
                    &property[head_len..]
                ))
            } else {
                Ok(format!("#{{{expression}}}"))
            }
        })
    }

    fn entries(&self, value: Value) -> Result<Vec<(Value, Value)>> {
        match value {
            Value::Null => Err(MapperError::NullForEachCollection(
                self.collection_text.clone(),
            )),
            Value::Array(items) => Ok(items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::Int(i as i64), item))
                .collect()),
            Value::Map(map) => Ok(map
                .into_iter()
                .map(|(key, item)| (Value::String(key), item))
                .collect()),
            other => Err(MapperError::UnindexableNode {
                kind: other.kind(),
                path: self.collection_text.clone(),
            }),
        }
    }
}

impl SqlNodeBehavior for ForEachNode {
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> Result<bool> {
        let collection = expr::evaluate(&self.collection, &ctx.scope)?.resolved()?;
        let entries = self.entries(collection)?;

        let mut body = String::new();
        for (key, item) in entries {
            let unique = ctx.next_unique();
            ctx.scope.push_frame();
            if let Some(name) = &self.item {
                ctx.scope.bind(name, item.clone());
                ctx.scope.bind(&format!("__frch_{name}_{unique}"), item);
            }
            if let Some(name) = &self.index {
                ctx.scope.bind(name, key.clone());
                ctx.scope.bind(&format!("__frch_{name}_{unique}"), key);
            }
            let fragment = ctx.capture(|ctx| self.contents.apply(ctx).map(|_| ()))?;
            ctx.scope.pop_frame();

            let fragment = self.uniquify(fragment.trim(), unique)?;
            if fragment.is_empty() {
                continue;
            }
            if !body.is_empty() {
                body.push_str(&self.separator);
            }
            body.push_str(&fragment);
        }

        let mut rendered = String::with_capacity(self.open.len() + body.len() + self.close.len());
        rendered.push_str(&self.open);
        rendered.push_str(&body);
        rendered.push_str(&self.close);
        ctx.append(&rendered);
        Ok(true)
    }
}

/// `<bind>`: evaluates an expression and binds the result into the scope
/// for subsequent nodes.
#[derive(Debug, Clone)]
pub struct VarDeclNode {
    pub name: String,
    pub expression: Expr,
}

impl SqlNodeBehavior for VarDeclNode {
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> Result<bool> {
        let value = expr::evaluate(&self.expression, &ctx.scope)?;
        ctx.scope.bind(&self.name, value);
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct MixedNode {
    pub children: Vec<SqlNode>,
}

impl SqlNodeBehavior for MixedNode {
    fn apply(&self, ctx: &mut DynamicContext<'_>) -> Result<bool> {
        for child in &self.children {
            child.apply(ctx)?;
        }
        Ok(true)
    }
}

/// The executable form of a statement body: either a node tree evaluated
/// per invocation or the pre-parsed static text produced at compile time.
#[derive(Debug, Clone)]
pub enum SqlSource {
    Dynamic(DynamicSqlSource),
    Static(StaticSqlSource),
}

#[derive(Debug, Clone)]
pub struct DynamicSqlSource {
    pub root: SqlNode,
    pub parameter_type: Option<SmolStr>,
}

#[derive(Debug, Clone)]
pub struct StaticSqlSource {
    pub sql: String,
    pub descriptors: Vec<ParameterDescriptor>,
}

/// The final SQL of one invocation plus the ordered descriptor list and
/// the scope bindings that outlived evaluation.
#[derive(Debug, Clone)]
pub struct BoundSql {
    pub sql: String,
    pub descriptors: Vec<ParameterDescriptor>,
    pub additional: IndexMap<String, Value>,
}

impl SqlSource {
    pub fn bound_sql(&self, registry: &ShapeRegistry, parameter: &Value) -> Result<BoundSql> {
        match self {
            SqlSource::Static(source) => Ok(BoundSql {
                sql: source.sql.clone(),
                descriptors: source.descriptors.clone(),
                additional: IndexMap::default(),
            }),
            SqlSource::Dynamic(source) => {
                let mut ctx = DynamicContext::new(registry, parameter);
                source.root.apply(&mut ctx)?;
                let (raw_sql, additional) = ctx.into_parts();

                let runtime_type = parameter.as_object().map(|o| o.type_name.clone());
                let parameter_type = source.parameter_type.clone().or(runtime_type);
                let (sql, descriptors) =
                    build_static_sql(&raw_sql, registry, parameter_type.as_deref())?;
                Ok(BoundSql {
                    sql,
                    descriptors,
                    additional,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::value::param_map;

    fn if_node(test: &str, text: &str) -> SqlNode {
        SqlNode::If(IfNode {
            test: expr::parse(test).unwrap(),
            contents: Box::new(SqlNode::text(text)),
        })
    }

    fn eval(root: &SqlNode, parameter: &Value) -> BoundSql {
        let registry = ShapeRegistry::new();
        let source = SqlSource::Dynamic(DynamicSqlSource {
            root: root.clone(),
            parameter_type: None,
        });
        source.bound_sql(&registry, parameter).unwrap()
    }

    fn bound_properties(bound: &BoundSql) -> Vec<&str> {
        bound
            .descriptors
            .iter()
            .map(|d| d.property.as_str())
            .collect()
    }

    #[test]
    fn where_trims_a_leading_and() {
        let root = SqlNode::mixed(vec![
            SqlNode::text("SELECT * FROM t"),
            SqlNode::Where(WhereNode::new(SqlNode::mixed(vec![
                if_node("a != null", "AND a = #{a}"),
                if_node("b != null", "AND b = #{b}"),
            ]))),
        ]);

        let bound = eval(&root, &param_map([("a", Value::Int(1)), ("b", Value::Null)]));
        assert_eq!(bound.sql, "SELECT * FROM t WHERE a = ?");
        assert_eq!(bound_properties(&bound), vec!["a"]);

        let bound = eval(&root, &param_map([("a", Value::Null), ("b", Value::Null)]));
        assert_eq!(bound.sql, "SELECT * FROM t");
        assert!(bound.descriptors.is_empty());

        let bound = eval(&root, &param_map([("a", Value::Int(1)), ("b", Value::Int(2))]));
        assert_eq!(bound.sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(bound_properties(&bound), vec!["a", "b"]);
    }

    #[test]
    fn where_keeps_and_without_trailing_whitespace() {
        let root = SqlNode::Where(WhereNode::new(SqlNode::text("ANDfoo = 1")));
        let bound = eval(&root, &Value::Null);
        assert_eq!(bound.sql, "WHERE ANDfoo = 1");
    }

    #[test]
    fn set_trims_a_trailing_comma() {
        let root = SqlNode::mixed(vec![
            SqlNode::text("UPDATE t"),
            SqlNode::Set(SetNode::new(SqlNode::mixed(vec![
                if_node("a != null", "a = #{a},"),
                if_node("b != null", "b = #{b},"),
            ]))),
        ]);
        let bound = eval(&root, &param_map([("a", Value::Int(1)), ("b", Value::Null)]));
        assert_eq!(bound.sql, "UPDATE t SET a = ?");
    }

    #[test]
    fn foreach_uniquifies_bindings_per_iteration() {
        let root = SqlNode::mixed(vec![
            SqlNode::text("SELECT * FROM t WHERE id IN"),
            SqlNode::ForEach(ForEachNode {
                collection: expr::parse("ids").unwrap(),
                collection_text: "ids".to_string(),
                item: Some("i".to_string()),
                index: None,
                open: "(".to_string(),
                close: ")".to_string(),
                separator: ",".to_string(),
                contents: Box::new(SqlNode::text("#{i}")),
            }),
        ]);

        let bound = eval(
            &root,
            &param_map([("ids", Value::from(vec![3i64, 4, 5]))]),
        );
        assert_eq!(bound.sql, "SELECT * FROM t WHERE id IN (?,?,?)");
        assert_eq!(
            bound_properties(&bound),
            vec!["__frch_i_0", "__frch_i_1", "__frch_i_2"]
        );
        assert_eq!(bound.additional.get("__frch_i_1"), Some(&Value::Int(4)));

        let bound = eval(&root, &param_map([("ids", Value::Array(vec![]))]));
        assert_eq!(bound.sql, "SELECT * FROM t WHERE id IN ()");
        assert!(bound.descriptors.is_empty());
    }

    #[test]
    fn foreach_over_a_null_collection_fails() {
        let root = SqlNode::ForEach(ForEachNode {
            collection: expr::parse("ids").unwrap(),
            collection_text: "ids".to_string(),
            item: Some("i".to_string()),
            index: None,
            open: String::new(),
            close: String::new(),
            separator: ",".to_string(),
            contents: Box::new(SqlNode::text("#{i}")),
        });
        let registry = ShapeRegistry::new();
        let parameter = param_map([("ids", Value::Null)]);
        let source = SqlSource::Dynamic(DynamicSqlSource {
            root,
            parameter_type: None,
        });
        let err = source.bound_sql(&registry, &parameter).unwrap_err();
        assert!(matches!(err, MapperError::NullForEachCollection(_)));
    }

    #[test]
    fn foreach_over_a_map_binds_keys_and_values() {
        let root = SqlNode::ForEach(ForEachNode {
            collection: expr::parse("cols").unwrap(),
            collection_text: "cols".to_string(),
            item: Some("v".to_string()),
            index: Some("k".to_string()),
            open: String::new(),
            close: String::new(),
            separator: " AND ".to_string(),
            contents: Box::new(SqlNode::text("${k} = #{v}")),
        });
        let bound = eval(
            &root,
            &param_map([(
                "cols",
                param_map([("a", Value::Int(1)), ("b", Value::Int(2))]),
            )]),
        );
        assert_eq!(bound.sql, "a = ? AND b = ?");
        assert_eq!(bound_properties(&bound), vec!["__frch_v_0", "__frch_v_1"]);
    }

    #[test]
    fn choose_stops_at_the_first_truthy_when() {
        let root = SqlNode::Choose(ChooseNode {
            whens: vec![
                IfNode {
                    test: expr::parse("a != null").unwrap(),
                    contents: Box::new(SqlNode::text("BY_A")),
                },
                IfNode {
                    test: expr::parse("b != null").unwrap(),
                    contents: Box::new(SqlNode::text("BY_B")),
                },
            ],
            otherwise: Some(Box::new(SqlNode::text("BY_DEFAULT"))),
        });

        let bound = eval(&root, &param_map([("a", Value::Null), ("b", Value::Int(1))]));
        assert_eq!(bound.sql, "BY_B");
        let bound = eval(&root, &param_map([("a", Value::Null), ("b", Value::Null)]));
        assert_eq!(bound.sql, "BY_DEFAULT");
    }

    #[test]
    fn bind_declares_a_scope_local() {
        let root = SqlNode::mixed(vec![
            SqlNode::VarDecl(VarDeclNode {
                name: "key".to_string(),
                expression: expr::parse("id").unwrap(),
            }),
            SqlNode::text("SELECT * FROM t WHERE k = #{key}"),
        ]);
        let bound = eval(&root, &param_map([("id", Value::Int(9))]));
        assert_eq!(bound.sql, "SELECT * FROM t WHERE k = ?");
        assert_eq!(bound.additional.get("key"), Some(&Value::Int(9)));
    }

    #[test]
    fn interpolation_substitutes_text_without_binding() {
        let root = SqlNode::text("SELECT * FROM ${table} WHERE id = #{id}");
        assert!(root.is_dynamic());
        let bound = eval(
            &root,
            &param_map([("table", Value::from("person")), ("id", Value::Int(1))]),
        );
        assert_eq!(bound.sql, "SELECT * FROM person WHERE id = ?");
        assert_eq!(bound_properties(&bound), vec!["id"]);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let root = SqlNode::mixed(vec![
            SqlNode::Where(WhereNode::new(SqlNode::mixed(vec![
                if_node("a != null", "AND a = #{a}"),
                if_node("b != null", "OR b = #{b}"),
            ]))),
        ]);
        let parameter = param_map([("a", Value::Int(1)), ("b", Value::Int(2))]);
        let first = eval(&root, &parameter);
        let second = eval(&root, &parameter);
        assert_eq!(first.sql, second.sql);
        assert_eq!(first.descriptors, second.descriptors);
    }
}

use std::cmp::Ordering;

use logos::Logos;

use crate::errors::{MapperError, Result};
use crate::value::Value;

/// Anything the expression language can read property paths from; the
/// evaluation scope implements this.
pub trait ValueSource {
    fn lookup(&self, path: &str) -> Result<Value>;
}

/// The `test="…"` expression grammar: dotted/indexed property access,
/// comparisons, boolean connectives and string/number literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Property(String),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("==")]
    Eq,
    #[token("!=")]
    #[token("<>")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("and")]
    #[token("&&")]
    And,
    #[token("or")]
    #[token("||")]
    Or,
    #[token("not")]
    #[token("!")]
    Not,
    #[token("null")]
    Null,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[regex(r"-?[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
    #[regex(r"'[^']*'", |lex| lex.slice().trim_matches('\'').to_string())]
    #[regex(r#""[^"]*""#, |lex| lex.slice().trim_matches('"').to_string())]
    Str(String),
    #[regex(
        r"[A-Za-z_$][A-Za-z0-9_$]*(\[[^\]\[]*\])?(\.[A-Za-z_$][A-Za-z0-9_$]*(\[[^\]\[]*\])?)*",
        |lex| lex.slice().to_string()
    )]
    Property(String),
}

pub fn parse(input: &str) -> Result<Expr> {
    let mut tokens = Vec::new();
    for token in Token::lexer(input) {
        match token {
            Ok(token) => tokens.push(token),
            Err(()) => {
                return Err(MapperError::config(format!(
                    "invalid test expression '{input}'"
                )));
            }
        }
    }
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(MapperError::config(format!(
            "trailing input in test expression '{input}'"
        )));
    }
    Ok(expr)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, detail: &str) -> MapperError {
        MapperError::config(format!(
            "invalid test expression '{}': {detail}",
            self.input
        ))
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.not_expr()?;
        while self.eat(&Token::And) {
            let right = self.not_expr()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.primary()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(self.error("expected ')'"));
                }
                Ok(inner)
            }
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Int(v)) => Ok(Expr::Literal(Value::Int(v))),
            Some(Token::Float(v)) => Ok(Expr::Literal(Value::Double(v))),
            Some(Token::Str(v)) => Ok(Expr::Literal(Value::String(v))),
            Some(Token::Property(path)) => Ok(Expr::Property(path)),
            _ => Err(self.error("expected a value")),
        }
    }
}

pub fn evaluate(expr: &Expr, source: &dyn ValueSource) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Property(path) => source.lookup(path),
        Expr::Not(inner) => Ok(Value::Bool(!evaluate(inner, source)?.truthy())),
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let left = evaluate(left, source)?;
                if !left.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(evaluate(right, source)?.truthy()))
            }
            BinaryOp::Or => {
                let left = evaluate(left, source)?;
                if left.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(evaluate(right, source)?.truthy()))
            }
            op => {
                let left = evaluate(left, source)?;
                let right = evaluate(right, source)?;
                Ok(Value::Bool(compare(*op, &left, &right)))
            }
        },
    }
}

pub fn evaluate_bool(expr: &Expr, source: &dyn ValueSource) -> Result<bool> {
    Ok(evaluate(expr, source)?.truthy())
}

/// Equality coerces across the numeric variants; ordering comparisons
/// against null or across unrelated kinds are false.
fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    match op {
        BinaryOp::Eq => left == right,
        BinaryOp::Ne => left != right,
        _ => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => match (left.as_f64(), right.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                BinaryOp::Ge => ordering != Ordering::Less,
                _ => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::value::param_map;

    struct MapSource(Value);

    impl ValueSource for MapSource {
        fn lookup(&self, path: &str) -> Result<Value> {
            use crate::reflection::{Navigator, ShapeRegistry};
            let registry = ShapeRegistry::new();
            Navigator::new(&registry).get(&self.0, path)
        }
    }

    fn eval(input: &str, source: &MapSource) -> bool {
        evaluate_bool(&parse(input).unwrap(), source).unwrap()
    }

    #[test]
    fn null_checks() {
        let source = MapSource(param_map([("a", Value::Int(1)), ("b", Value::Null)]));
        assert!(eval("a != null", &source));
        assert!(eval("b == null", &source));
        assert!(!eval("a == null and b == null", &source));
        assert!(eval("a == null or b == null", &source));
    }

    #[test]
    fn comparisons_coerce_numbers() {
        let source = MapSource(param_map([
            ("n", Value::Int(7)),
            ("d", Value::Double(7.5)),
        ]));
        assert!(eval("n == 7", &source));
        assert!(eval("n < d", &source));
        assert!(eval("d >= 7.5", &source));
        assert!(!eval("n > d", &source));
    }

    #[test]
    fn string_literals_and_ordering() {
        let source = MapSource(param_map([("name", Value::from("John"))]));
        assert!(eval("name == 'John'", &source));
        assert!(eval("name != \"Jane\"", &source));
        assert!(eval("name > 'Jane'", &source));
    }

    #[test]
    fn ordering_against_null_is_false() {
        let source = MapSource(param_map([("b", Value::Null)]));
        assert!(!eval("b < 3", &source));
        assert!(!eval("b >= 3", &source));
    }

    #[test]
    fn not_and_grouping() {
        let source = MapSource(param_map([("flag", Value::Bool(false))]));
        assert!(eval("not flag", &source));
        assert!(eval("!(flag or flag)", &source));
    }

    #[test]
    fn nested_property_paths() {
        let source = MapSource(param_map([(
            "user",
            param_map([("age", Value::Int(40))]),
        )]));
        assert!(eval("user.age >= 40", &source));
    }

    #[test]
    fn malformed_expressions_fail_at_parse_time() {
        assert!(parse("a ==").is_err());
        assert!(parse("(a == 1").is_err());
        assert!(parse("a == 1 banana'").is_err());
    }
}

//! Default condition language for policies.
//!
//! A condition is a boolean expression over a JSON document describing the
//! request (see [`ConditionInput::to_document`]):
//!
//! ```text
//! context.hour >= 9 && context.hour < 17
//! resource.page in ["orders", "invoices"] || !context.readonly
//! principal == "alice"
//! ```
//!
//! Operators by increasing precedence: `||`, `&&`, comparisons
//! (`== != < <= > >= in`), unary `!`. Operands are dot paths, integers,
//! floats, `"strings"`, `true`, `false`, `null`, list literals and
//! parenthesised expressions. A missing path evaluates to `null`.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;
use std::sync::Arc;

use serde_json::Value;

use crate::authz::errors::AuthzError;
use crate::authz::resolver::{ConditionEvaluator, ConditionInput};

/// Parenthesis, list and `!` nesting accepted by the parser.
const MAX_NESTING: usize = 64;

/// Condition attached to a policy, parsed once when the policy is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Option<Arc<Expr>>,
}

impl Condition {
    /// A condition kept as source text, for evaluators with their own language.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            expr: None,
        }
    }

    /// Parse `source` in the default expression language.
    pub fn parse(source: impl Into<String>) -> Result<Self, AuthzError> {
        let source = source.into();
        let expr = parse_expression(&source)?;
        Ok(Self {
            source,
            expr: Some(Arc::new(expr)),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expression(&self) -> Option<&Expr> {
        self.expr.as_deref()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),
    Path(Vec<String>),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Member(Box<Expr>, Box<Expr>),
    All(Vec<Expr>),
    Any(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Name(String),
    Lit(Value),
    Text(String),
    Dot,
    Comma,
    Open,
    Close,
    OpenList,
    CloseList,
    Bang,
    AndAnd,
    OrOr,
    In,
    Cmp(CmpOp),
}

struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.chars.next_if(|&(_, c)| c == expected).is_some()
    }

    fn tokens(mut self) -> Result<Vec<Tok>, AuthzError> {
        let mut out = Vec::new();
        while let Some((start, c)) = self.chars.next() {
            let tok = match c {
                c if c.is_whitespace() => continue,
                '.' => Tok::Dot,
                ',' => Tok::Comma,
                '(' => Tok::Open,
                ')' => Tok::Close,
                '[' => Tok::OpenList,
                ']' => Tok::CloseList,
                '=' if self.eat('=') => Tok::Cmp(CmpOp::Eq),
                '!' if self.eat('=') => Tok::Cmp(CmpOp::Ne),
                '!' => Tok::Bang,
                '<' if self.eat('=') => Tok::Cmp(CmpOp::Le),
                '<' => Tok::Cmp(CmpOp::Lt),
                '>' if self.eat('=') => Tok::Cmp(CmpOp::Ge),
                '>' => Tok::Cmp(CmpOp::Gt),
                '&' if self.eat('&') => Tok::AndAnd,
                '|' if self.eat('|') => Tok::OrOr,
                '"' => Tok::Text(self.string()?),
                c if c.is_ascii_digit() => self.number(start)?,
                c if c.is_alphabetic() || c == '_' => {
                    let mut end = start + c.len_utf8();
                    while let Some((i, c)) = self
                        .chars
                        .next_if(|&(_, c)| c.is_alphanumeric() || c == '_' || c == '-')
                    {
                        end = i + c.len_utf8();
                    }
                    match &self.src[start..end] {
                        "in" => Tok::In,
                        "true" => Tok::Lit(Value::Bool(true)),
                        "false" => Tok::Lit(Value::Bool(false)),
                        "null" => Tok::Lit(Value::Null),
                        word => Tok::Name(word.to_string()),
                    }
                }
                other => {
                    return Err(AuthzError::InvalidCondition(format!(
                        "unexpected character `{other}` at offset {start}"
                    )))
                }
            };
            out.push(tok);
        }
        Ok(out)
    }

    fn string(&mut self) -> Result<String, AuthzError> {
        let mut text = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(text),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => text.push('\n'),
                    Some((_, 't')) => text.push('\t'),
                    Some((_, c)) => text.push(c),
                    None => break,
                },
                Some((_, c)) => text.push(c),
                None => break,
            }
        }
        Err(AuthzError::InvalidCondition(
            "unterminated string literal".into(),
        ))
    }

    fn number(&mut self, start: usize) -> Result<Tok, AuthzError> {
        let mut end = start + 1;
        let mut fractional = false;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                end = i + 1;
            } else if c == '.' && !fractional {
                // Only a fraction if a digit follows; `1.x` is not a number.
                let rest = &self.src[i + 1..];
                if !rest.starts_with(|d: char| d.is_ascii_digit()) {
                    break;
                }
                fractional = true;
                end = i + 1;
            } else {
                break;
            }
            self.chars.next();
        }
        let text = &self.src[start..end];
        let value = if fractional {
            text.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
        } else {
            text.parse::<i64>().ok().map(Value::from)
        };
        value
            .map(Tok::Lit)
            .ok_or_else(|| AuthzError::InvalidCondition(format!("invalid number `{text}`")))
    }
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn accept(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), AuthzError> {
        if self.accept(&tok) {
            Ok(())
        } else {
            Err(AuthzError::InvalidCondition(format!("expected {what}")))
        }
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, AuthzError>,
    ) -> Result<T, AuthzError> {
        if self.depth >= MAX_NESTING {
            return Err(AuthzError::InvalidCondition(format!(
                "expression nested deeper than {MAX_NESTING} levels"
            )));
        }
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    fn disjunction(&mut self) -> Result<Expr, AuthzError> {
        let mut terms = vec![self.conjunction()?];
        while self.accept(&Tok::OrOr) {
            terms.push(self.conjunction()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Any(terms)
        })
    }

    fn conjunction(&mut self) -> Result<Expr, AuthzError> {
        let mut terms = vec![self.comparison()?];
        while self.accept(&Tok::AndAnd) {
            terms.push(self.comparison()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::All(terms)
        })
    }

    fn comparison(&mut self) -> Result<Expr, AuthzError> {
        let left = self.unary()?;
        match self.peek() {
            Some(Tok::Cmp(op)) => {
                let op = *op;
                self.pos += 1;
                let right = self.unary()?;
                Ok(Expr::Compare(Box::new(left), op, Box::new(right)))
            }
            Some(Tok::In) => {
                self.pos += 1;
                let right = self.unary()?;
                Ok(Expr::Member(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn unary(&mut self) -> Result<Expr, AuthzError> {
        if self.accept(&Tok::Bang) {
            let inner = self.nested(Self::unary)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.operand()
    }

    fn operand(&mut self) -> Result<Expr, AuthzError> {
        match self.next() {
            Some(Tok::Lit(value)) => Ok(Expr::Const(value)),
            Some(Tok::Text(text)) => Ok(Expr::Const(Value::String(text))),
            Some(Tok::Name(head)) => {
                let mut path = vec![head];
                while self.accept(&Tok::Dot) {
                    match self.next() {
                        Some(Tok::Name(seg)) => path.push(seg),
                        _ => {
                            return Err(AuthzError::InvalidCondition(
                                "expected a name after `.`".into(),
                            ))
                        }
                    }
                }
                Ok(Expr::Path(path))
            }
            Some(Tok::Open) => {
                let inner = self.nested(Self::disjunction)?;
                self.expect(Tok::Close, "closing parenthesis `)`")?;
                Ok(inner)
            }
            Some(Tok::OpenList) => self.nested(|parser| {
                let mut items = Vec::new();
                if !parser.accept(&Tok::CloseList) {
                    loop {
                        items.push(parser.disjunction()?);
                        if parser.accept(&Tok::CloseList) {
                            break;
                        }
                        parser.expect(Tok::Comma, "`,` or `]` in list")?;
                    }
                }
                Ok(Expr::List(items))
            }),
            Some(other) => Err(AuthzError::InvalidCondition(format!(
                "unexpected token {other:?}"
            ))),
            None => Err(AuthzError::InvalidCondition(
                "unexpected end of expression".into(),
            )),
        }
    }
}

/// Parse a condition expression.
pub fn parse_expression(source: &str) -> Result<Expr, AuthzError> {
    let tokens = Lexer::new(source).tokens()?;
    if tokens.is_empty() {
        return Err(AuthzError::InvalidCondition("empty expression".into()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.disjunction()?;
    if let Some(extra) = parser.peek() {
        return Err(AuthzError::InvalidCondition(format!(
            "unexpected trailing token {extra:?}"
        )));
    }
    Ok(expr)
}

/// Evaluate a parsed expression against a JSON document; the result must be boolean.
pub fn evaluate(expr: &Expr, doc: &Value) -> Result<bool, AuthzError> {
    match value_of(expr, doc)? {
        Value::Bool(b) => Ok(b),
        other => Err(AuthzError::Condition(format!(
            "condition must be boolean, got `{other}`"
        ))),
    }
}

fn value_of(expr: &Expr, doc: &Value) -> Result<Value, AuthzError> {
    Ok(match expr {
        Expr::Const(v) => v.clone(),
        Expr::Path(path) => path
            .iter()
            .try_fold(doc, |cur, seg| cur.get(seg.as_str()))
            .cloned()
            .unwrap_or(Value::Null),
        Expr::List(items) => Value::Array(
            items
                .iter()
                .map(|item| value_of(item, doc))
                .collect::<Result<_, _>>()?,
        ),
        Expr::Not(inner) => Value::Bool(!truth(inner, doc, "!")?),
        Expr::All(terms) => {
            for term in terms {
                if !truth(term, doc, "&&")? {
                    return Ok(Value::Bool(false));
                }
            }
            Value::Bool(true)
        }
        Expr::Any(terms) => {
            for term in terms {
                if truth(term, doc, "||")? {
                    return Ok(Value::Bool(true));
                }
            }
            Value::Bool(false)
        }
        Expr::Member(needle, haystack) => {
            let needle = value_of(needle, doc)?;
            match value_of(haystack, doc)? {
                Value::Array(items) => Value::Bool(items.iter().any(|i| loose_eq(i, &needle))),
                Value::String(s) => match needle {
                    Value::String(n) => Value::Bool(s.contains(n.as_str())),
                    _ => return Err(type_error("`in` on a string needs a string operand")),
                },
                Value::Null => Value::Bool(false),
                _ => return Err(type_error("`in` needs a list or string on the right side")),
            }
        }
        Expr::Compare(left, op, right) => {
            let l = value_of(left, doc)?;
            let r = value_of(right, doc)?;
            Value::Bool(match op {
                CmpOp::Eq => loose_eq(&l, &r),
                CmpOp::Ne => !loose_eq(&l, &r),
                ordered => {
                    let ord = order(&l, &r).ok_or_else(|| {
                        type_error(&format!("cannot order `{l}` against `{r}`"))
                    })?;
                    match ordered {
                        CmpOp::Lt => ord == Ordering::Less,
                        CmpOp::Le => ord != Ordering::Greater,
                        CmpOp::Gt => ord == Ordering::Greater,
                        _ => ord != Ordering::Less,
                    }
                }
            })
        }
    })
}

fn truth(expr: &Expr, doc: &Value, op: &str) -> Result<bool, AuthzError> {
    match value_of(expr, doc)? {
        Value::Bool(b) => Ok(b),
        other => Err(type_error(&format!("`{op}` needs booleans, got `{other}`"))),
    }
}

/// Equality with numbers compared by value, so `1 == 1.0`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_error(msg: &str) -> AuthzError {
    AuthzError::Condition(msg.to_string())
}

/// [`ConditionEvaluator`] for the expression language above.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ConditionEvaluator for ExpressionEvaluator {
    fn compile(&self, source: &str) -> Result<Condition, AuthzError> {
        Condition::parse(source)
    }

    fn evaluate(&self, condition: &Condition, input: &ConditionInput<'_>) -> Result<bool, AuthzError> {
        match condition.expression() {
            Some(expr) => evaluate(expr, &input.to_document()),
            None => evaluate(&parse_expression(condition.source())?, &input.to_document()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(src: &str, doc: Value) -> Result<bool, AuthzError> {
        evaluate(&parse_expression(src)?, &doc)
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_expression("a || b && !c").unwrap();
        assert_eq!(
            expr,
            Expr::Any(vec![
                Expr::Path(vec!["a".into()]),
                Expr::All(vec![
                    Expr::Path(vec!["b".into()]),
                    Expr::Not(Box::new(Expr::Path(vec!["c".into()]))),
                ]),
            ])
        );
    }

    #[test]
    fn test_parse_dot_path_and_numbers() {
        let expr = parse_expression("context.time.hour >= 9.5").unwrap();
        assert_eq!(
            expr,
            Expr::Compare(
                Box::new(Expr::Path(vec!["context".into(), "time".into(), "hour".into()])),
                CmpOp::Ge,
                Box::new(Expr::Const(json!(9.5))),
            )
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("   ").is_err());
        assert!(parse_expression(r#"name == "open"#).is_err());
        assert!(parse_expression("(a && b").is_err());
        assert!(parse_expression("a b").is_err());
        assert!(parse_expression("a.").is_err());
        assert!(parse_expression("[1, 2").is_err());
        assert!(matches!(
            parse_expression("a # b"),
            Err(AuthzError::InvalidCondition(_))
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let ok = format!("{}a{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert!(parse_expression(&ok).is_ok());

        let deep = format!("{}a{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(matches!(
            parse_expression(&deep),
            Err(AuthzError::InvalidCondition(_))
        ));
        let negations = format!("{}true", "!".repeat(100_000));
        assert!(parse_expression(&negations).is_err());
        let lists = format!("{}1{}", "[".repeat(100_000), "]".repeat(100_000));
        assert!(parse_expression(&lists).is_err());
    }

    #[test]
    fn test_compiled_condition_keeps_expression() {
        let condition = ExpressionEvaluator.compile("context.hour < 8").unwrap();
        assert_eq!(condition.source(), "context.hour < 8");
        assert!(matches!(condition.expression(), Some(Expr::Compare(..))));
        assert!(ExpressionEvaluator.compile("context.hour <").is_err());
        assert!(Condition::new("context.hour <").expression().is_none());
    }

    #[test]
    fn test_business_hours() {
        let src = "context.hour >= 9 && context.hour < 17";
        assert!(eval(src, json!({ "context": { "hour": 14 } })).unwrap());
        assert!(!eval(src, json!({ "context": { "hour": 20 } })).unwrap());
    }

    #[test]
    fn test_membership() {
        let doc = json!({ "resource": { "page": "orders" }, "context": { "pages": ["a", "orders"] } });
        assert!(eval(r#"resource.page in ["orders", "invoices"]"#, doc.clone()).unwrap());
        assert!(eval("resource.page in context.pages", doc.clone()).unwrap());
        assert!(!eval(r#"resource.page in []"#, doc.clone()).unwrap());
        assert!(eval(r#""ord" in resource.page"#, doc.clone()).unwrap());
        assert!(!eval("resource.page in context.missing", doc).unwrap());
    }

    #[test]
    fn test_missing_path_is_null() {
        assert!(eval("context.nothing == null", json!({})).unwrap());
        assert!(eval("context.flag != true", json!({ "context": {} })).unwrap());
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert!(eval("x == 1.0", json!({ "x": 1 })).unwrap());
        assert!(eval("x < 2", json!({ "x": 1.5 })).unwrap());
    }

    #[test]
    fn test_string_escapes_and_ordering() {
        assert!(eval(r#"name == "say \"hi\"""#, json!({ "name": "say \"hi\"" })).unwrap());
        assert!(eval(r#"name > "alpha""#, json!({ "name": "beta" })).unwrap());
    }

    #[test]
    fn test_type_errors_are_evaluation_errors() {
        let err = eval("x", json!({ "x": 3 })).unwrap_err();
        assert!(matches!(err, AuthzError::Condition(_)));
        assert!(eval("x && true", json!({ "x": "yes" })).is_err());
        assert!(eval("x > 1", json!({ "x": "one" })).is_err());
        assert!(eval("1 in x", json!({ "x": 5 })).is_err());
    }

    #[test]
    fn test_short_circuit() {
        // The right-hand side would be a type error if evaluated.
        assert!(!eval("false && x", json!({ "x": 1 })).unwrap());
        assert!(eval("true || x", json!({ "x": 1 })).unwrap());
    }
}

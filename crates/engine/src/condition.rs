//! Boolean conditions over the execution data context.
//!
//! Expressions are parsed by a small recursive-descent parser and evaluated
//! against the context bound to the single root identifier `data`:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | compare
//! compare := primary ( op primary )?          op: == != === !== < <= > >=
//! primary := number | string | true | false | null | path | "(" expr ")"
//! path    := "data" ( "." ident | "[" (string | integer) "]" )*
//! ```
//!
//! [`evaluate`] never fails: any lexing, parsing or lookup error yields
//! `false`. `&&` / `||` chains are stored flat and only parentheses and `!`
//! nest, so the nesting bound also bounds evaluation depth.

use std::cmp::Ordering;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use effects::DataMap;

/// Parenthesis / negation nesting bound.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("cannot read '{key}' of {kind}")]
    BadAccess { key: String, kind: &'static str },
    #[error("expression nested too deeply")]
    TooDeep,
}

/// Evaluate `expression` against `context`, failing closed.
pub fn evaluate(expression: &str, context: &DataMap) -> bool {
    match try_evaluate(expression, context) {
        Ok(result) => result,
        Err(e) => {
            debug!(expression, error = %e, "condition evaluated to false");
            false
        }
    }
}

/// Like [`evaluate`] but reports why an expression could not be evaluated.
pub fn try_evaluate(expression: &str, context: &DataMap) -> Result<bool, ConditionError> {
    let tokens = lex(expression)?;
    let expr = Parser { tokens, pos: 0, depth: 0 }.parse()?;
    Ok(truthy(&expr.eval(context)?))
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Minus,
    Not,
    And,
    Or,
    Cmp(CmpOp),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn lex(src: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |at: usize| chars.get(at).copied();

    while let Some(c) = peek(i) {
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '&' if peek(i + 1) == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if peek(i + 1) == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if peek(i + 1) == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += if peek(i + 2) == Some('=') { 3 } else { 2 };
            }
            '!' if peek(i + 1) == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += if peek(i + 2) == Some('=') { 3 } else { 2 };
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let inclusive = peek(i + 1) == Some('=');
                tokens.push(Token::Cmp(match (c, inclusive) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    (_, false) => CmpOp::Gt,
                    (_, true) => CmpOp::Ge,
                }));
                i += if inclusive { 2 } else { 1 };
            }
            '\'' | '"' => {
                let (s, next) = lex_string(&chars, i)?;
                tokens.push(Token::Str(s));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while peek(i).is_some_and(|c| c.is_ascii_digit() || c == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ConditionError::InvalidNumber(text.clone()))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while peek(i).is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ConditionError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

/// Lex a quoted string starting at `start`; returns the value and the index
/// just past the closing quote.
fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), ConditionError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None => return Err(ConditionError::UnterminatedString),
            Some(&c) if c == quote => return Ok((out, i + 1)),
            Some('\\') => {
                let escaped = chars.get(i + 1).ok_or(ConditionError::UnterminatedString)?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            Some(&c) => {
                out.push(c);
                i += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Expr {
    Literal(Value),
    /// `data` followed by member keys; array indices are kept as strings.
    Path(Vec<String>),
    Not(Box<Expr>),
    /// Operand chains stay flat so a long `a && b && ...` does not nest.
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn parse(mut self) -> Result<Expr, ConditionError> {
        let expr = self.or()?;
        match self.tokens.get(self.pos) {
            None => Ok(expr),
            Some(t) => Err(ConditionError::UnexpectedToken(format!("{t:?}"))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ConditionError> {
        let token = self.tokens.get(self.pos).cloned().ok_or(ConditionError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, want: Token) -> Result<(), ConditionError> {
        match self.next()? {
            t if t == want => Ok(()),
            t => Err(ConditionError::UnexpectedToken(format!("{t:?}"))),
        }
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConditionError::TooDeep);
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, ConditionError> {
        let mut operands = vec![self.and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            operands.push(self.and()?);
        }
        Ok(flatten(operands, Expr::Or))
    }

    fn and(&mut self) -> Result<Expr, ConditionError> {
        let mut operands = vec![self.unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            operands.push(self.unary()?);
        }
        Ok(flatten(operands, Expr::And))
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.primary()?;
        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.primary()?;
            return Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr, ConditionError> {
        match self.next()? {
            Token::Num(n) => Ok(Expr::Literal(json!(n))),
            Token::Minus => match self.next()? {
                Token::Num(n) => Ok(Expr::Literal(json!(-n))),
                t => Err(ConditionError::UnexpectedToken(format!("{t:?}"))),
            },
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::LParen => {
                self.descend()?;
                let inner = self.or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Token::Ident(id) => match id.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "data" => self.path(),
                _ => Err(ConditionError::UnknownIdentifier(id)),
            },
            t => Err(ConditionError::UnexpectedToken(format!("{t:?}"))),
        }
    }

    fn path(&mut self) -> Result<Expr, ConditionError> {
        let mut keys = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next()? {
                        Token::Ident(key) => keys.push(key),
                        t => return Err(ConditionError::UnexpectedToken(format!("{t:?}"))),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    match self.next()? {
                        Token::Str(key) => keys.push(key),
                        Token::Num(n) if n.fract() == 0.0 && n >= 0.0 => keys.push(format!("{}", n as u64)),
                        t => return Err(ConditionError::UnexpectedToken(format!("{t:?}"))),
                    }
                    self.expect(Token::RBracket)?;
                }
                _ => return Ok(Expr::Path(keys)),
            }
        }
    }
}

fn flatten(mut operands: Vec<Expr>, chain: fn(Vec<Expr>) -> Expr) -> Expr {
    if operands.len() == 1 {
        operands.remove(0)
    } else {
        chain(operands)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Expr {
    fn eval(&self, ctx: &DataMap) -> Result<Value, ConditionError> {
        Ok(match self {
            Expr::Literal(v) => v.clone(),
            Expr::Path(keys) => resolve(ctx, keys)?,
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(ctx)?)),
            Expr::And(operands) => {
                for operand in operands {
                    if !truthy(&operand.eval(ctx)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                Value::Bool(true)
            }
            Expr::Or(operands) => {
                for operand in operands {
                    if truthy(&operand.eval(ctx)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Value::Bool(false)
            }
            Expr::Compare(op, l, r) => Value::Bool(compare(*op, &l.eval(ctx)?, &r.eval(ctx)?)),
        })
    }
}

#[derive(Clone, Copy)]
enum Node<'a> {
    Root(&'a DataMap),
    Value(&'a Value),
}

fn resolve(ctx: &DataMap, keys: &[String]) -> Result<Value, ConditionError> {
    let mut node = Node::Root(ctx);
    for (i, key) in keys.iter().enumerate() {
        let last = i + 1 == keys.len();
        let next = match node {
            Node::Root(map) => map.get(key),
            Node::Value(Value::Object(map)) => map.get(key),
            Node::Value(Value::Array(items)) if key == "length" => {
                return length_at_end(items.len(), key, last);
            }
            Node::Value(Value::Array(items)) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            Node::Value(Value::String(s)) if key == "length" => {
                return length_at_end(s.chars().count(), key, last);
            }
            Node::Value(other) => {
                return Err(ConditionError::BadAccess { key: key.clone(), kind: kind(other) })
            }
        };
        match next {
            Some(v) => node = Node::Value(v),
            None if last => return Ok(Value::Null),
            None => {
                return Err(ConditionError::BadAccess { key: keys[i + 1].clone(), kind: "null" })
            }
        }
    }
    Ok(match node {
        Node::Root(map) => Value::Object(map.clone()),
        Node::Value(v) => v.clone(),
    })
}

fn length_at_end(len: usize, key: &str, last: bool) -> Result<Value, ConditionError> {
    if last {
        Ok(json!(len))
    } else {
        Err(ConditionError::BadAccess { key: key.to_owned(), kind: "number" })
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> bool {
    match op {
        CmpOp::Eq => strict_eq(l, r),
        CmpOp::Ne => !strict_eq(l, r),
        _ => {
            let ordering = match (l, r) {
                (Value::Number(a), Value::Number(b)) => {
                    a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match (op, ordering) {
                (CmpOp::Lt, Some(o)) => o == Ordering::Less,
                (CmpOp::Le, Some(o)) => o != Ordering::Greater,
                (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
                (CmpOp::Ge, Some(o)) => o != Ordering::Less,
                _ => false,
            }
        }
    }
}

fn strict_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => l == r,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(v: Value) -> DataMap {
        v.as_object().cloned().unwrap()
    }

    fn sample() -> DataMap {
        ctx(json!({
            "birthdays_found": 2,
            "sentiment": "negative",
            "score": 0.25,
            "people": [{ "name": "Ada" }, { "name": "Grace" }],
            "flags": { "urgent": true, "muted": false },
            "empty": "",
            "nothing": null
        }))
    }

    #[test]
    fn comparisons() {
        let c = sample();
        assert!(evaluate("data.birthdays_found > 0", &c));
        assert!(evaluate("data.birthdays_found === 2", &c));
        assert!(evaluate("data.birthdays_found == 2.0", &c));
        assert!(!evaluate("data.birthdays_found != 2", &c));
        assert!(evaluate("data.sentiment == 'negative'", &c));
        assert!(evaluate("data.sentiment !== \"positive\"", &c));
        assert!(evaluate("data.score <= 0.25 && data.score >= -1", &c));
        assert!(evaluate("data.sentiment < 'positive'", &c));
    }

    #[test]
    fn boolean_logic_and_precedence() {
        let c = sample();
        assert!(evaluate("data.flags.urgent && !data.flags.muted", &c));
        assert!(evaluate("data.flags.muted || data.birthdays_found > 1", &c));
        assert!(evaluate("!(data.flags.muted || data.empty)", &c));
        assert!(evaluate("false && true || true", &c));
        assert!(!evaluate("!!data.nothing", &c));
    }

    #[test]
    fn paths_and_length() {
        let c = sample();
        assert!(evaluate("data.people.length == 2", &c));
        assert!(evaluate("data.people[1].name == 'Grace'", &c));
        assert!(evaluate("data['flags']['urgent']", &c));
        assert!(evaluate("data.sentiment.length === 8", &c));
        assert!(evaluate("data.missing == null", &c));
        assert!(!evaluate("data.people[5]", &c));
    }

    #[test]
    fn truthiness() {
        let c = sample();
        assert!(evaluate("data.birthdays_found", &c));
        assert!(!evaluate("data.empty", &c));
        assert!(!evaluate("data.nothing", &c));
        assert!(!evaluate("0", &c));
        assert!(evaluate("data", &c));
    }

    #[test]
    fn mixed_type_ordering_is_false() {
        let c = sample();
        assert!(!evaluate("data.sentiment > 1", &c));
        assert!(!evaluate("data.nothing < 1", &c));
        assert!(!evaluate("data.birthdays_found == '2'", &c));
    }

    #[test]
    fn malformed_expressions_fail_closed() {
        let empty = DataMap::new();
        assert!(!evaluate("not valid js ((", &empty));
        assert!(!evaluate("", &empty));
        assert!(!evaluate("data.x ==", &empty));
        assert!(!evaluate("'unterminated", &empty));
        assert!(!evaluate("1 2", &empty));
        assert!(!evaluate("process.exit(1)", &empty));
        assert!(!evaluate("data.a.b", &empty));
        assert!(!evaluate(&"(".repeat(500), &empty));
    }

    #[test]
    fn errors_are_reported_by_try_evaluate() {
        let empty = DataMap::new();
        assert_eq!(
            try_evaluate("window.x", &empty),
            Err(ConditionError::UnknownIdentifier("window".into()))
        );
        assert!(matches!(
            try_evaluate("data.a.b", &empty),
            Err(ConditionError::BadAccess { .. })
        ));
        assert_eq!(try_evaluate("data.x ==", &empty), Err(ConditionError::UnexpectedEnd));
        assert_eq!(try_evaluate(&"!".repeat(100), &empty), Err(ConditionError::TooDeep));
    }

    #[test]
    fn long_operator_chains_evaluate_without_nesting() {
        let empty = DataMap::new();
        assert!(!evaluate(&vec!["data.x"; 20_000].join(" && "), &empty));
        assert!(!evaluate(&vec!["data.x"; 20_000].join(" || "), &empty));

        let c = ctx(json!({ "x": 1 }));
        assert!(evaluate(&vec!["data.x"; 20_000].join(" && "), &c));
        let last_matches = format!("{} || data.x == 1", vec!["data.x == 0"; 20_000].join(" || "));
        assert!(evaluate(&last_matches, &c));
    }

    #[test]
    fn chains_short_circuit_left_to_right() {
        let c = sample();
        // The right-hand access would error; it is never reached.
        assert!(!evaluate("data.flags.muted && data.nothing.deep", &c));
        assert!(evaluate("data.flags.urgent || data.nothing.deep", &c));
        assert!(!evaluate("data.flags.urgent && data.nothing.deep", &c));
    }
}

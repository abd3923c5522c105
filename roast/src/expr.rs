//! The embedded expression language and string interpolation.
//!
//! Two forms are recognized anywhere a string appears in a step definition or
//! prompt:
//!
//! - `{{ expr }}` is evaluated by the small evaluator in this module against
//!   a [`Scope`]. Deliberately not a general template language: the grammar
//!   is limited to property access, indexing, arithmetic, comparisons,
//!   boolean operators, the ternary, and the `env` / `basename` / `json`
//!   builtins.
//! - `$( cmd )` is executed by the system shell; stdout is the value.
//!
//! Within one string, `{{…}}` is evaluated before `$(…)`, so expressions may
//! expand into command lines.

use std::collections::HashMap;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::shell;

/// Name lookup for expression evaluation.
///
/// The engine exposes `output` (a read-only view of the Output Map), loop
/// bindings under their `as` names, and `workflow` (the workflow object with
/// `file`, `name`, `verbose`, `concise`, and any configured fields).
pub trait Scope: Sync {
    /// Resolve a bare identifier to a value.
    fn resolve(&self, name: &str) -> Option<Value>;
}

impl Scope for HashMap<String, Value> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// Evaluate one expression against a scope.
pub fn evaluate(expr: &str, scope: &dyn Scope) -> Result<Value> {
    let tokens = lex(expr).map_err(|message| Error::Expression {
        expr: expr.to_string(),
        message,
    })?;
    let mut parser = Parser::new(tokens);
    let ast = parser
        .parse_ternary()
        .and_then(|ast| parser.expect_end().map(|()| ast))
        .map_err(|message| Error::Expression {
            expr: expr.to_string(),
            message,
        })?;
    eval(&ast, scope).map_err(|message| Error::Expression {
        expr: expr.to_string(),
        message,
    })
}

/// Truthiness used by conditions and the boolean coercions.
///
/// `null`, `false`, `0`, the empty string, the literal string `"false"`, and
/// empty collections are false; everything else is true.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let trimmed = s.trim();
            !trimmed.is_empty() && trimmed != "false"
        }
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a value into a string for interpolation.
///
/// Strings are substituted verbatim, `null` becomes empty, and compound
/// values are JSON-encoded.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// If the whole (trimmed) string is a single `{{…}}`, return the inner
/// expression.
#[must_use]
pub fn as_expression(s: &str) -> Option<&str> {
    let t = s.trim();
    let inner = t.strip_prefix("{{")?.strip_suffix("}}")?;
    // A string like "{{a}} and {{b}}" is interpolation, not one expression.
    if inner.contains("{{") || inner.contains("}}") {
        None
    } else {
        Some(inner.trim())
    }
}

/// If the whole (trimmed) string is a single `$(…)`, return the inner
/// command.
#[must_use]
pub fn as_shell(s: &str) -> Option<&str> {
    let t = s.trim();
    let inner = t.strip_prefix("$(")?.strip_suffix(')')?;
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then(|| inner.trim())
}

/// Substitute every `{{…}}` in `input` against `scope`.
pub fn interpolate_exprs(input: &str, scope: &dyn Scope) -> Result<String> {
    if !input.contains("{{") {
        return Ok(input.to_string());
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(Error::Expression {
                expr: rest[start..].to_string(),
                message: "unterminated '{{'".to_string(),
            });
        };
        let value = evaluate(&after[..end], scope)?;
        out.push_str(&value_to_string(&value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Full interpolation pass: `{{…}}` first, then `$(…)`.
///
/// Command substitutions strip one trailing newline, mirroring shell
/// behavior. A non-zero exit raises [`Error::Shell`] unless `exit_on_error`
/// is false, in which case stdout is substituted as-is.
pub async fn interpolate(
    input: &str,
    scope: &dyn Scope,
    cancel: &CancellationToken,
    exit_on_error: bool,
) -> Result<String> {
    let expanded = interpolate_exprs(input, scope)?;
    if !expanded.contains("$(") {
        return Ok(expanded);
    }

    let mut out = String::with_capacity(expanded.len());
    let mut rest = expanded.as_str();
    while let Some(start) = rest.find("$(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(len) = balanced_len(after) else {
            return Err(Error::Expression {
                expr: rest[start..].to_string(),
                message: "unterminated '$('".to_string(),
            });
        };
        let command = &after[..len];
        let outcome = shell::run(command, cancel).await?;
        if !outcome.success() && exit_on_error {
            return Err(Error::Shell {
                command: command.to_string(),
                status: outcome.status,
                stderr: outcome.stderr,
            });
        }
        out.push_str(outcome.stdout.strip_suffix('\n').unwrap_or(&outcome.stdout));
        rest = &after[len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Length of the command inside `$(`, up to the matching `)`.
fn balanced_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,
    Question,
    Colon,
}

fn lex(input: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '\'' | '"' => {
                chars.next();
                let quote = c;
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, ch)) if ch == quote => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, esc)) => s.push(esc),
                            None => return Err("unterminated string".to_string()),
                        },
                        Some((_, ch)) => s.push(ch),
                        None => return Err("unterminated string".to_string()),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let start = i;
                let mut end = i;
                while let Some(&(j, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = j + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &input[start..end];
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number `{text}`"))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while let Some(&(j, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        end = j + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match &input[start..end] {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    ident => Token::Ident(ident.to_string()),
                });
            }
            _ => {
                chars.next();
                let token = match c {
                    '.' => Token::Dot,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '?' => Token::Question,
                    ':' => Token::Colon,
                    '=' => match chars.peek() {
                        Some(&(_, '=')) => {
                            chars.next();
                            Token::EqEq
                        }
                        _ => return Err("expected '=='".to_string()),
                    },
                    '!' => match chars.peek() {
                        Some(&(_, '=')) => {
                            chars.next();
                            Token::NotEq
                        }
                        _ => Token::Not,
                    },
                    '<' => match chars.peek() {
                        Some(&(_, '=')) => {
                            chars.next();
                            Token::Le
                        }
                        _ => Token::Lt,
                    },
                    '>' => match chars.peek() {
                        Some(&(_, '=')) => {
                            chars.next();
                            Token::Ge
                        }
                        _ => Token::Gt,
                    },
                    '&' => match chars.peek() {
                        Some(&(_, '&')) => {
                            chars.next();
                            Token::AndAnd
                        }
                        _ => return Err("expected '&&'".to_string()),
                    },
                    '|' => match chars.peek() {
                        Some(&(_, '|')) => {
                            chars.next();
                            Token::OrOr
                        }
                        _ => return Err("expected '||'".to_string()),
                    },
                    other => return Err(format!("unexpected character `{other}`")),
                };
                tokens.push(token);
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type ParseResult<T> = std::result::Result<T, String>;

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
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

    fn expect(&mut self, token: &Token) -> ParseResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(format!("expected {token:?}, found {:?}", self.peek()))
        }
    }

    fn expect_end(&mut self) -> ParseResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(format!("trailing input at {token:?}")),
        }
    }

    fn parse_ternary(&mut self) -> ParseResult<Expr> {
        let cond = self.parse_or()?;
        if self.eat(&Token::Question) {
            let then = self.parse_ternary()?;
            self.expect(&Token::Colon)?;
            let otherwise = self.parse_ternary()?;
            Ok(Expr::Ternary(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ))
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinOp::Eq,
                Some(Token::NotEq) => BinOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.eat(&Token::Not) {
            Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
        } else if self.eat(&Token::Minus) {
            Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.next() {
                    Some(Token::Ident(name)) => {
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    other => return Err(format!("expected field name, found {other:?}")),
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_ternary()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.parse_ternary()?);
                            if self.eat(&Token::RParen) {
                                break;
                            }
                            self.expect(&Token::Comma)?;
                        }
                    }
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_ternary()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

type EvalResult = std::result::Result<Value, String>;

fn eval(expr: &Expr, scope: &dyn Scope) -> EvalResult {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => scope
            .resolve(name)
            .ok_or_else(|| format!("unknown name `{name}`")),
        Expr::Member(base, field) => {
            let base = eval(base, scope)?;
            Ok(lookup_key(&base, field))
        }
        Expr::Index(base, index) => {
            let base = eval(base, scope)?;
            let index = eval(index, scope)?;
            Ok(match (&base, &index) {
                (Value::Array(items), Value::Number(n)) => n
                    .as_u64()
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| items.get(i))
                    .cloned()
                    .unwrap_or(Value::Null),
                (_, Value::String(key)) => lookup_key(&base, key),
                _ => Value::Null,
            })
        }
        Expr::Unary(op, inner) => {
            let value = eval(inner, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => value
                    .as_f64()
                    .map(|f| number_value(-f))
                    .ok_or_else(|| "cannot negate a non-number".to_string()),
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, scope),
        Expr::Ternary(cond, then, otherwise) => {
            if truthy(&eval(cond, scope)?) {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
        Expr::Call(name, args) => eval_call(name, args, scope),
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, scope: &dyn Scope) -> EvalResult {
    // Short-circuit forms first.
    match op {
        BinOp::And => {
            let l = eval(lhs, scope)?;
            if !truthy(&l) {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(truthy(&eval(rhs, scope)?)));
        }
        BinOp::Or => {
            let l = eval(lhs, scope)?;
            if truthy(&l) {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(truthy(&eval(rhs, scope)?)));
        }
        _ => {}
    }

    let l = eval(lhs, scope)?;
    let r = eval(rhs, scope)?;
    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(&l, &r)?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinOp::Add => match (&l, &r) {
            (Value::String(a), _) => Ok(Value::String(format!("{a}{}", value_to_string(&r)))),
            (_, Value::String(b)) => Ok(Value::String(format!("{}{b}", value_to_string(&l)))),
            _ => arithmetic(&l, &r, |a, b| a + b),
        },
        BinOp::Sub => arithmetic(&l, &r, |a, b| a - b),
        BinOp::Mul => arithmetic(&l, &r, |a, b| a * b),
        BinOp::Div => {
            let b = r.as_f64().ok_or("arithmetic on a non-number")?;
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            arithmetic(&l, &r, |a, b| a / b)
        }
        BinOp::Rem => {
            let b = r.as_f64().ok_or("arithmetic on a non-number")?;
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            arithmetic(&l, &r, |a, b| a % b)
        }
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn eval_call(name: &str, args: &[Expr], scope: &dyn Scope) -> EvalResult {
    let values: Vec<Value> = args
        .iter()
        .map(|a| eval(a, scope))
        .collect::<std::result::Result<_, _>>()?;
    match (name, values.as_slice()) {
        ("env", [Value::String(var)]) => Ok(std::env::var(var)
            .map(Value::String)
            .unwrap_or(Value::Null)),
        ("basename", [Value::String(path)]) => Ok(Value::String(
            std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )),
        ("json", [value]) => serde_json::to_string(value)
            .map(Value::String)
            .map_err(|e| e.to_string()),
        ("env" | "basename" | "json", _) => Err(format!("invalid arguments for `{name}`")),
        _ => Err(format!("unknown function `{name}`")),
    }
}

fn lookup_key(base: &Value, key: &str) -> Value {
    match base {
        Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn arithmetic(l: &Value, r: &Value, op: impl Fn(f64, f64) -> f64) -> EvalResult {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok(number_value(op(a, b))),
        _ => Err("arithmetic on a non-number".to_string()),
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> std::result::Result<std::cmp::Ordering, String> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| "incomparable values".to_string()),
            _ => Err("incomparable values".to_string()),
        },
    }
}

/// Build a JSON number, collapsing integral floats to integers.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        #[allow(clippy::cast_possible_truncation)]
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

//! The embedded scripting language evaluated by the sandbox runtime.
//!
//! No general-purpose scripting VM crate appears anywhere in the retrieval
//! pack this crate was grounded on, so the sandbox language here is a small,
//! purpose-built expression/table-literal DSL: a tokenizer and recursive
//! descent parser producing an AST, evaluated directly against a JSON
//! `context` and a narrow `helpers` surface. It is generalized from the
//! recursive `eq`/`and`/`or` JSON-expression evaluator pattern used for
//! request-level policy checks elsewhere in the corpus, extended with
//! comparison operators, dotted field access, and table-literal return
//! values so it can express both ABAC policies (`return context.resource.amount
//! < 1000`) and pipeline hook results (`return {allowed = true, reason = "ok"}`).
//!
//! Grammar (informal):
//! ```text
//! script      := "return" expr
//! expr        := or_expr
//! or_expr     := and_expr ("or" and_expr)*
//! and_expr    := not_expr ("and" not_expr)*
//! not_expr    := "not" not_expr | cmp_expr
//! cmp_expr    := primary (("==" | "!=" | "<" | "<=" | ">" | ">=") primary)?
//! primary     := NUMBER | STRING | "true" | "false" | "nil"
//!              | path | "(" expr ")" | table_literal | helper_call
//! path        := IDENT ("." IDENT)*
//! table_literal := "{" (IDENT "=" expr ("," IDENT "=" expr)* ","?)? "}"
//! helper_call := "helpers" "." IDENT "(" (expr ("," expr)*)? ")"
//! ```

use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptError {
    Parse(String),
    UnknownIdentifier(String),
    UnknownHelper(String),
    TypeError(String),
    ScriptTooLarge { size: usize, max: usize },
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Parse(msg) => write!(f, "parse error: {msg}"),
            ScriptError::UnknownIdentifier(id) => write!(f, "unknown identifier: {id}"),
            ScriptError::UnknownHelper(name) => write!(f, "unknown helper: {name}"),
            ScriptError::TypeError(msg) => write!(f, "type error: {msg}"),
            ScriptError::ScriptTooLarge { size, max } => {
                write!(f, "script size {size} exceeds max {max}")
            }
        }
    }
}

impl std::error::Error for ScriptError {}

#[derive(Debug, Clone)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Symbol(&'static str),
    Eof,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ScriptError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(&c) = self.chars.peek() else {
                tokens.push(Token::Eof);
                break;
            };
            if c.is_ascii_digit() {
                tokens.push(self.read_number());
            } else if c == '"' || c == '\'' {
                tokens.push(self.read_string(c)?);
            } else if c.is_alphabetic() || c == '_' {
                tokens.push(self.read_ident());
            } else {
                tokens.push(self.read_symbol()?);
            }
        }
        Ok(tokens)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn read_number(&mut self) -> Token {
        let mut buf = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
            buf.push(self.chars.next().unwrap());
        }
        Token::Number(buf.parse().unwrap_or(0.0))
    }

    fn read_string(&mut self, quote: char) -> Result<Token, ScriptError> {
        self.chars.next();
        let mut buf = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => break,
                Some(c) => buf.push(c),
                None => return Err(ScriptError::Parse("unterminated string".into())),
            }
        }
        Ok(Token::Str(buf))
    }

    fn read_ident(&mut self) -> Token {
        let mut buf = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
            buf.push(self.chars.next().unwrap());
        }
        Token::Ident(buf)
    }

    fn read_symbol(&mut self) -> Result<Token, ScriptError> {
        let c = self.chars.next().unwrap();
        let two = |this: &mut Self, next: char, sym: &'static str, fallback: &'static str| {
            if this.chars.peek() == Some(&next) {
                this.chars.next();
                sym
            } else {
                fallback
            }
        };
        let sym = match c {
            '=' => two(self, '=', "==", "="),
            '!' => two(self, '=', "!=", "!"),
            '<' => two(self, '=', "<=", "<"),
            '>' => two(self, '=', ">=", ">"),
            '.' => ".",
            ',' => ",",
            '(' => "(",
            ')' => ")",
            '{' => "{",
            '}' => "}",
            _ => return Err(ScriptError::Parse(format!("unexpected character `{c}`"))),
        };
        Ok(Token::Symbol(sym))
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Nil,
    Path(Vec<String>),
    Not(Box<Expr>),
    BinOp(&'static str, Box<Expr>, Box<Expr>),
    Table(Vec<(String, Expr)>),
    HelperCall(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_ident(&mut self, expected: &str) -> Result<(), ScriptError> {
        match self.advance() {
            Token::Ident(id) if id == expected => Ok(()),
            other => Err(ScriptError::Parse(format!(
                "expected `{expected}`, got {other:?}"
            ))),
        }
    }

    fn expect_symbol(&mut self, expected: &str) -> Result<(), ScriptError> {
        match self.advance() {
            Token::Symbol(s) if s == expected => Ok(()),
            other => Err(ScriptError::Parse(format!(
                "expected `{expected}`, got {other:?}"
            ))),
        }
    }

    fn parse_script(&mut self) -> Result<Expr, ScriptError> {
        self.expect_ident("return")?;
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_and()?;
        while let Token::Ident(id) = self.peek() {
            if id == "or" {
                self.advance();
                let rhs = self.parse_and()?;
                lhs = Expr::BinOp("or", Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_not()?;
        while let Token::Ident(id) = self.peek() {
            if id == "and" {
                self.advance();
                let rhs = self.parse_not()?;
                lhs = Expr::BinOp("and", Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ScriptError> {
        if let Token::Ident(id) = self.peek() {
            if id == "not" {
                self.advance();
                return Ok(Expr::Not(Box::new(self.parse_not()?)));
            }
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, ScriptError> {
        let lhs = self.parse_primary()?;
        if let Token::Symbol(sym @ ("==" | "!=" | "<" | "<=" | ">" | ">=")) = self.peek() {
            let op: &'static str = sym;
            self.advance();
            let rhs = self.parse_primary()?;
            return Ok(Expr::BinOp(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, ScriptError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Symbol("(") => {
                let inner = self.parse_or()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            Token::Symbol("{") => self.parse_table(),
            Token::Ident(id) if id == "true" => Ok(Expr::Bool(true)),
            Token::Ident(id) if id == "false" => Ok(Expr::Bool(false)),
            Token::Ident(id) if id == "nil" => Ok(Expr::Nil),
            Token::Ident(id) if id == "helpers" => self.parse_helper_call(),
            Token::Ident(id) => self.parse_path(id),
            other => Err(ScriptError::Parse(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_path(&mut self, first: String) -> Result<Expr, ScriptError> {
        let mut segments = vec![first];
        while matches!(self.peek(), Token::Symbol(".")) {
            self.advance();
            match self.advance() {
                Token::Ident(id) => segments.push(id),
                other => return Err(ScriptError::Parse(format!("expected field name, got {other:?}"))),
            }
        }
        Ok(Expr::Path(segments))
    }

    fn parse_helper_call(&mut self) -> Result<Expr, ScriptError> {
        self.expect_symbol(".")?;
        let name = match self.advance() {
            Token::Ident(id) => id,
            other => return Err(ScriptError::Parse(format!("expected helper name, got {other:?}"))),
        };
        self.expect_symbol("(")?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Token::Symbol(")")) {
            loop {
                args.push(self.parse_or()?);
                if matches!(self.peek(), Token::Symbol(",")) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_symbol(")")?;
        Ok(Expr::HelperCall(name, args))
    }

    fn parse_table(&mut self) -> Result<Expr, ScriptError> {
        let mut fields = Vec::new();
        if !matches!(self.peek(), Token::Symbol("}")) {
            loop {
                let key = match self.advance() {
                    Token::Ident(id) => id,
                    other => return Err(ScriptError::Parse(format!("expected field name, got {other:?}"))),
                };
                self.expect_symbol("=")?;
                let value = self.parse_or()?;
                fields.push((key, value));
                match self.peek() {
                    Token::Symbol(",") => {
                        self.advance();
                        if matches!(self.peek(), Token::Symbol("}")) {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
        self.expect_symbol("}")?;
        Ok(Expr::Table(fields))
    }
}

/// The narrow host surface exposed to scripts as `helpers`. `fetch` is a
/// suspension point per the design notes; this sandbox evaluates scripts
/// synchronously against already-resolved context, so callers that need
/// `helpers.fetch` resolve it before invocation and inject the result into
/// `context` rather than reaching out to the network from inside the
/// evaluator. `secret` resolves synchronously against an injected vault —
/// name lookup and AEAD decryption are both CPU-bound, so there is no
/// suspension to model for it.
pub trait Helpers: Send + Sync {
    fn matches(&self, value: &str, pattern: &str) -> bool;
    fn hash(&self, value: &str) -> String;

    /// Resolves a platform secret by name (§4.7). Returns `None` when the
    /// secret is missing or the implementation doesn't back one (the
    /// default for helpers built without a vault).
    fn secret(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Default helpers implementation: glob-style `matches` (`*` wildcard,
/// otherwise exact) and SHA-256 hex `hash`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHelpers;

impl Helpers for DefaultHelpers {
    fn matches(&self, value: &str, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return value.starts_with(prefix);
        }
        value == pattern
    }

    fn hash(&self, value: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Helpers backed by a [`crate::secrets::SecretsVault`], so scripts can call
/// `helpers.secret(name)` and reach real vault-managed values (§4.1, §4.7).
/// `matches`/`hash` delegate to [`DefaultHelpers`].
#[derive(Clone)]
pub struct VaultHelpers {
    vault: std::sync::Arc<crate::secrets::SecretsVault>,
}

impl VaultHelpers {
    pub fn new(vault: std::sync::Arc<crate::secrets::SecretsVault>) -> Self {
        Self { vault }
    }
}

impl Helpers for VaultHelpers {
    fn matches(&self, value: &str, pattern: &str) -> bool {
        DefaultHelpers.matches(value, pattern)
    }

    fn hash(&self, value: &str) -> String {
        DefaultHelpers.hash(value)
    }

    fn secret(&self, name: &str) -> Option<String> {
        self.vault.get_secret_value(name)
    }
}

/// Compile a script's source into an AST once so repeated evaluation (e.g.
/// the same condition checked across many tuples) doesn't re-tokenize.
#[derive(Clone)]
pub struct CompiledScript {
    ast: Expr,
}

pub fn compile(source: &str, max_size: usize) -> Result<CompiledScript, ScriptError> {
    if source.len() > max_size {
        return Err(ScriptError::ScriptTooLarge {
            size: source.len(),
            max: max_size,
        });
    }
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    let ast = parser.parse_script()?;
    Ok(CompiledScript { ast })
}

impl CompiledScript {
    pub fn evaluate(&self, context: &Value, helpers: &dyn Helpers) -> Result<Value, ScriptError> {
        eval(&self.ast, context, helpers)
    }
}

fn eval(expr: &Expr, context: &Value, helpers: &dyn Helpers) -> Result<Value, ScriptError> {
    match expr {
        Expr::Number(n) => Ok(Value::from(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Nil => Ok(Value::Null),
        Expr::Path(segments) => Ok(resolve_path(context, segments)),
        Expr::Not(inner) => {
            let v = eval(inner, context, helpers)?;
            Ok(Value::Bool(!truthy(&v)))
        }
        Expr::BinOp(op, lhs, rhs) => eval_binop(op, lhs, rhs, context, helpers),
        Expr::Table(fields) => {
            let mut map = Map::new();
            for (key, value_expr) in fields {
                map.insert(key.clone(), eval(value_expr, context, helpers)?);
            }
            Ok(Value::Object(map))
        }
        Expr::HelperCall(name, args) => eval_helper(name, args, context, helpers),
    }
}

fn eval_binop(
    op: &str,
    lhs: &Expr,
    rhs: &Expr,
    context: &Value,
    helpers: &dyn Helpers,
) -> Result<Value, ScriptError> {
    if op == "and" {
        let l = eval(lhs, context, helpers)?;
        if !truthy(&l) {
            return Ok(Value::Bool(false));
        }
        let r = eval(rhs, context, helpers)?;
        return Ok(Value::Bool(truthy(&r)));
    }
    if op == "or" {
        let l = eval(lhs, context, helpers)?;
        if truthy(&l) {
            return Ok(Value::Bool(true));
        }
        let r = eval(rhs, context, helpers)?;
        return Ok(Value::Bool(truthy(&r)));
    }

    let l = eval(lhs, context, helpers)?;
    let r = eval(rhs, context, helpers)?;
    match op {
        "==" => Ok(Value::Bool(values_equal(&l, &r))),
        "!=" => Ok(Value::Bool(!values_equal(&l, &r))),
        "<" | "<=" | ">" | ">=" => {
            let (Some(lf), Some(rf)) = (as_f64(&l), as_f64(&r)) else {
                return Err(ScriptError::TypeError(format!(
                    "cannot compare {l:?} {op} {r:?}"
                )));
            };
            let result = match op {
                "<" => lf < rf,
                "<=" => lf <= rf,
                ">" => lf > rf,
                ">=" => lf >= rf,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        _ => Err(ScriptError::Parse(format!("unknown operator {op}"))),
    }
}

fn eval_helper(
    name: &str,
    args: &[Expr],
    context: &Value,
    helpers: &dyn Helpers,
) -> Result<Value, ScriptError> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(arg, context, helpers)?);
    }
    match name {
        "matches" => {
            let [Value::String(v), Value::String(p)] = values.as_slice() else {
                return Err(ScriptError::TypeError(
                    "helpers.matches expects two strings".into(),
                ));
            };
            Ok(Value::Bool(helpers.matches(v, p)))
        }
        "hash" => {
            let [Value::String(v)] = values.as_slice() else {
                return Err(ScriptError::TypeError(
                    "helpers.hash expects one string".into(),
                ));
            };
            Ok(Value::String(helpers.hash(v)))
        }
        "secret" => {
            let [Value::String(name)] = values.as_slice() else {
                return Err(ScriptError::TypeError(
                    "helpers.secret expects one string".into(),
                ));
            };
            Ok(match helpers.secret(name) {
                Some(value) => Value::String(value),
                None => Value::Null,
            })
        }
        other => Err(ScriptError::UnknownHelper(other.to_string())),
    }
}

fn resolve_path(context: &Value, segments: &[String]) -> Value {
    let mut current = context;
    for segment in segments {
        match current.get(segment) {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        _ => true,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evaluates_boolean_comparison_against_context() {
        let script = compile("return context.resource.amount < 1000", 1024).unwrap();
        let low = script
            .evaluate(&json!({"resource": {"amount": 500}}), &DefaultHelpers)
            .unwrap();
        assert_eq!(low, Value::Bool(true));

        let high = script
            .evaluate(&json!({"resource": {"amount": 1500}}), &DefaultHelpers)
            .unwrap();
        assert_eq!(high, Value::Bool(false));
    }

    #[test]
    fn evaluates_table_literal_return() {
        let script = compile("return {allowed = true, reason = \"ok\"}", 1024).unwrap();
        let result = script.evaluate(&json!({}), &DefaultHelpers).unwrap();
        assert_eq!(result["allowed"], json!(true));
        assert_eq!(result["reason"], json!("ok"));
    }

    #[test]
    fn evaluates_blocking_denial_from_context_flag() {
        let script = compile("return {allowed = context.flag}", 1024).unwrap();
        let result = script
            .evaluate(&json!({"flag": false}), &DefaultHelpers)
            .unwrap();
        assert_eq!(result["allowed"], json!(false));
    }

    #[test]
    fn rejects_scripts_over_the_size_cap() {
        let oversized = "return ".to_string() + &"1".repeat(20);
        let err = compile(&oversized, 10).unwrap_err();
        assert!(matches!(err, ScriptError::ScriptTooLarge { .. }));
    }

    #[test]
    fn helper_matches_supports_wildcard_suffix() {
        let script = compile("return helpers.matches(context.path, \"/admin/*\")", 1024).unwrap();
        let result = script
            .evaluate(&json!({"path": "/admin/users"}), &DefaultHelpers)
            .unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn default_helpers_secret_resolves_to_nil() {
        let script = compile("return helpers.secret(\"STRIPE_KEY\")", 1024).unwrap();
        let result = script.evaluate(&json!({}), &DefaultHelpers).unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn vault_helpers_secret_resolves_a_stored_value() {
        let vault = crate::secrets::SecretsVault::new(b"platform-secret".to_vec());
        vault.create_secret("STRIPE_KEY", "sk_live_abc", None).unwrap();
        let helpers = VaultHelpers::new(vault);

        let script = compile("return helpers.secret(\"STRIPE_KEY\")", 1024).unwrap();
        let result = script.evaluate(&json!({}), &helpers).unwrap();
        assert_eq!(result, Value::String("sk_live_abc".to_string()));

        let missing = compile("return helpers.secret(\"MISSING\")", 1024).unwrap();
        assert_eq!(missing.evaluate(&json!({}), &helpers).unwrap(), Value::Null);
    }
}

//! Closed expression evaluator for eligibility and flag rules.
//!
//! Rules are boolean/arithmetic expressions over a fixed fact record, with an
//! allow-listed function set and no side effects. Expressions are compiled to
//! an AST once and can be executed against many fact records.
//!
//! Grammar, loosest binding first: `or`, `and`, `not`, comparisons
//! (`== != < <= > >= in`), `+ -`, `* /`, unary `-`, parentheses, calls.
//! Literals: integers, floats, quoted strings, `true`, `false`, `null`.
//! Bare identifiers resolve against the fact record; unknown facts are
//! evaluation errors, not silent nulls.

use crate::error::{Error, Result};
use serde_json::{Map, Number, Value};

/// The fact record a rule executes against.
pub type Facts = Map<String, Value>;

const ALLOWED_FUNCTIONS: &[&str] = &["len", "min", "max", "abs", "pluck"];

/// A compiled rule: the AST plus its source text for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    source: String,
    expr: Expr,
}

impl Rule {
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
}

/// Compile an expression to a reusable [`Rule`].
pub fn compile(source: &str) -> Result<Rule> {
    let tokens = tokenize(source).map_err(|message| Error::Rule {
        expression: source.to_string(),
        message,
    })?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr().map_err(|message| Error::Rule {
        expression: source.to_string(),
        message,
    })?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::Rule {
            expression: source.to_string(),
            message: "unexpected trailing input".to_string(),
        });
    }
    Ok(Rule {
        source: source.to_string(),
        expr,
    })
}

/// Execute a compiled rule against a fact record.
pub fn execute(rule: &Rule, facts: &Facts) -> Result<Value> {
    eval(&rule.expr, facts).map_err(|message| Error::Rule {
        expression: rule.source.clone(),
        message,
    })
}

/// Python-style truthiness over the value domain: `false`, `null`, zero and
/// empty collections/strings are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Tokenizer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Keyword(&'static str), // or, and, not, in, true, false, null
    Op(&'static str),      // == != < <= > >= + - * /
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Op("+"));
            }
            '-' => {
                chars.next();
                tokens.push(Token::Op("-"));
            }
            '*' => {
                chars.next();
                tokens.push(Token::Op("*"));
            }
            '/' => {
                chars.next();
                tokens.push(Token::Op("/"));
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op("=="));
                } else {
                    return Err("single '=' is not an operator (use '==')".to_string());
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op("!="));
                } else {
                    return Err("single '!' is not an operator (use 'not')".to_string());
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op("<="));
                } else {
                    tokens.push(Token::Op("<"));
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(">="));
                } else {
                    tokens.push(Token::Op(">"));
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('\'' | '"' | '\\')) => text.push(escaped),
                            Some(other) => {
                                return Err(format!("unknown escape '\\{other}'"));
                            }
                            None => return Err("unterminated string".to_string()),
                        },
                        Some(ch) if ch == quote => break,
                        Some(ch) => text.push(ch),
                        None => return Err("unterminated string".to_string()),
                    }
                }
                tokens.push(Token::Str(text));
            }
            '0'..='9' => {
                let mut text = String::new();
                let mut is_float = false;
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        text.push(d);
                        chars.next();
                    } else if d == '.' && !is_float {
                        is_float = true;
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if is_float {
                    let value: f64 = text
                        .parse()
                        .map_err(|_| format!("bad number literal {text:?}"))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value: i64 = text
                        .parse()
                        .map_err(|_| format!("bad number literal {text:?}"))?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        word.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "or" => tokens.push(Token::Keyword("or")),
                    "and" => tokens.push(Token::Keyword("and")),
                    "not" => tokens.push(Token::Keyword("not")),
                    "in" => tokens.push(Token::Keyword("in")),
                    "true" => tokens.push(Token::Keyword("true")),
                    "false" => tokens.push(Token::Keyword("false")),
                    "null" => tokens.push(Token::Keyword("null")),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser (precedence climbing)

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
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

    fn eat(&mut self, wanted: &Token) -> bool {
        if self.peek() == Some(wanted) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn parse_expr(&mut self) -> std::result::Result<Expr, String> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Keyword("or")) {
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::Keyword("and")) {
            let right = self.parse_not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> std::result::Result<Expr, String> {
        if self.eat(&Token::Keyword("not")) {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.parse_sum()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op("==")) => BinaryOp::Eq,
                Some(Token::Op("!=")) => BinaryOp::Ne,
                Some(Token::Op("<")) => BinaryOp::Lt,
                Some(Token::Op("<=")) => BinaryOp::Le,
                Some(Token::Op(">")) => BinaryOp::Gt,
                Some(Token::Op(">=")) => BinaryOp::Ge,
                Some(Token::Keyword("in")) => BinaryOp::In,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_sum()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_sum(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op("+")) => BinaryOp::Add,
                Some(Token::Op("-")) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op("*")) => BinaryOp::Mul,
                Some(Token::Op("/")) => BinaryOp::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> std::result::Result<Expr, String> {
        if self.eat(&Token::Op("-")) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> std::result::Result<Expr, String> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::from(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Keyword("true")) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::Keyword("false")) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Keyword("null")) => Ok(Expr::Literal(Value::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err("expected ')'".to_string());
                }
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    if !ALLOWED_FUNCTIONS.contains(&name.as_str()) {
                        return Err(format!("function {name:?} is not allowed"));
                    }
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.eat(&Token::Comma) {
                                continue;
                            }
                            if self.eat(&Token::RParen) {
                                break;
                            }
                            return Err("expected ',' or ')' in argument list".to_string());
                        }
                    }
                    return Ok(Expr::Call(name, args));
                }
                Ok(Expr::Ident(name))
            }
            Some(other) => Err(format!("unexpected token {other:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator

fn eval(expr: &Expr, facts: &Facts) -> std::result::Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => facts
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown fact {name:?}")),
        Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!truthy(&eval(inner, facts)?))),
        Expr::Unary(UnaryOp::Neg, inner) => {
            let value = eval(inner, facts)?;
            match &value {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        i.checked_neg()
                            .map(Value::from)
                            .ok_or_else(|| "integer overflow".to_string())
                    } else {
                        Ok(Value::from(-n.as_f64().unwrap_or(0.0)))
                    }
                }
                other => Err(format!("cannot negate {}", type_name(other))),
            }
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            let left = eval(left, facts)?;
            if truthy(&left) {
                Ok(left)
            } else {
                eval(right, facts)
            }
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            let left = eval(left, facts)?;
            if truthy(&left) {
                eval(right, facts)
            } else {
                Ok(left)
            }
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, facts)?;
            let right = eval(right, facts)?;
            apply_binary(*op, &left, &right)
        }
        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, facts)?);
            }
            call(name, &values)
        }
    }
}

fn apply_binary(
    op: BinaryOp,
    left: &Value,
    right: &Value,
) -> std::result::Result<Value, String> {
    use std::cmp::Ordering;
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare_values(left, right).ok_or_else(|| {
                format!(
                    "cannot compare {} with {}",
                    type_name(left),
                    type_name(right)
                )
            })?;
            let passed = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                BinaryOp::Ge => ordering != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Bool(passed))
        }
        BinaryOp::In => match right {
            Value::Array(items) => Ok(Value::Bool(
                items.iter().any(|item| values_equal(left, item)),
            )),
            Value::String(haystack) => match left {
                Value::String(needle) => Ok(Value::Bool(haystack.contains(needle.as_str()))),
                other => Err(format!("cannot search string for {}", type_name(other))),
            },
            Value::Object(map) => match left {
                Value::String(key) => Ok(Value::Bool(map.contains_key(key))),
                other => Err(format!("cannot search mapping for {}", type_name(other))),
            },
            other => Err(format!("'in' needs a collection, got {}", type_name(other))),
        },
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => arith(a, b, op),
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::Array(a), Value::Array(b)) => {
                let mut items = a.clone();
                items.extend(b.iter().cloned());
                Ok(Value::Array(items))
            }
            _ => Err(format!(
                "cannot add {} and {}",
                type_name(left),
                type_name(right)
            )),
        },
        BinaryOp::Sub | BinaryOp::Mul => match (left, right) {
            (Value::Number(a), Value::Number(b)) => arith(a, b, op),
            _ => Err(format!(
                "arithmetic needs numbers, got {} and {}",
                type_name(left),
                type_name(right)
            )),
        },
        BinaryOp::Div => match (left, right) {
            (Value::Number(a), Value::Number(b)) => {
                let denominator = b.as_f64().unwrap_or(0.0);
                if denominator == 0.0 {
                    return Err("division by zero".to_string());
                }
                Ok(Value::from(a.as_f64().unwrap_or(0.0) / denominator))
            }
            _ => Err(format!(
                "arithmetic needs numbers, got {} and {}",
                type_name(left),
                type_name(right)
            )),
        },
        BinaryOp::Or | BinaryOp::And => unreachable!("short-circuit ops handled in eval"),
    }
}

fn arith(a: &Number, b: &Number, op: BinaryOp) -> std::result::Result<Value, String> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            _ => unreachable!(),
        };
        return result
            .map(Value::from)
            .ok_or_else(|| "integer overflow".to_string());
    }
    let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
    Ok(match op {
        BinaryOp::Add => Value::from(a + b),
        BinaryOp::Sub => Value::from(a - b),
        BinaryOp::Mul => Value::from(a * b),
        _ => unreachable!(),
    })
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Value::Number(a), Value::Number(b)) = (left, right) {
        return a.as_f64() == b.as_f64();
    }
    left == right
}

fn compare_values(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn call(name: &str, args: &[Value]) -> std::result::Result<Value, String> {
    match name {
        "len" => match args {
            [Value::String(s)] => Ok(Value::from(s.chars().count() as i64)),
            [Value::Array(items)] => Ok(Value::from(items.len() as i64)),
            [Value::Object(map)] => Ok(Value::from(map.len() as i64)),
            _ => Err("len() takes one string, list or mapping".to_string()),
        },
        "min" | "max" => match args {
            [Value::Array(items)] if !items.is_empty() => {
                let mut best: Option<f64> = None;
                for item in items {
                    let Value::Number(n) = item else {
                        return Err(format!("{name}() needs a list of numbers"));
                    };
                    let f = n.as_f64().unwrap_or(0.0);
                    best = Some(match best {
                        None => f,
                        Some(current) if name == "min" => current.min(f),
                        Some(current) => current.max(f),
                    });
                }
                Ok(Value::from(best.unwrap_or(0.0)))
            }
            [Value::Array(_)] => Err(format!("{name}() of an empty list")),
            _ => Err(format!("{name}() takes one list of numbers")),
        },
        "abs" => match args {
            [Value::Number(n)] => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::from(i.abs()))
                } else {
                    Ok(Value::from(n.as_f64().unwrap_or(0.0).abs()))
                }
            }
            _ => Err("abs() takes one number".to_string()),
        },
        "pluck" => match args {
            [Value::Array(items), Value::String(key)] => {
                let plucked = items
                    .iter()
                    .map(|item| item.get(key.as_str()).cloned().unwrap_or(Value::Null))
                    .collect();
                Ok(Value::Array(plucked))
            }
            _ => Err("pluck() takes a list of mappings and a key".to_string()),
        },
        _ => Err(format!("function {name:?} is not allowed")),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

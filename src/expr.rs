//! Expression parser and evaluator for calculated columns and filters.
//!
//! Supports expressions like:
//! - `Amount * 2`
//! - `FirstName + ' ' + Family.LastName`
//! - `SUM(Pledges.Amount) - SUM(Payments.Amount)`
//! - `COUNT(Members) > 2 AND Family.City == 'Lakewood'`
//! - `Email IS NOT NULL`
//!
//! Dotted names navigate foreign keys to parent rows. Aggregates take a child
//! relation of the current row, optionally followed by a path evaluated on
//! each child. Comparisons involving NULL are false; arithmetic with NULL
//! yields NULL.

use crate::dependency::{DependencySpec, HopSpec};
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use std::cmp::Ordering;

/// A parsed expression that can be evaluated against a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Foreign-key hops followed by a column name.
    Column(Vec<String>),
    /// Aggregate over the rows of a child relation.
    Aggregate {
        func: AggregateFn,
        relation: String,
        path: Vec<String>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Negate(Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq, // ==
    Ne, // !=
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateFn {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

impl AggregateFn {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "SUM" => Some(AggregateFn::Sum),
            "COUNT" => Some(AggregateFn::Count),
            "MIN" => Some(AggregateFn::Min),
            "MAX" => Some(AggregateFn::Max),
            "AVG" => Some(AggregateFn::Avg),
            _ => None,
        }
    }
}

/// Token types for lexing
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
    // Operators
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Dot,
    And,
    Or,
    Not,
    Is,
    LParen,
    RParen,
    Eof,
}

/// Lexer for tokenizing expression strings
struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        ident
    }

    /// `[Name With Spaces]` quotes an identifier.
    fn read_bracketed(&mut self) -> Result<Token> {
        self.advance();
        let mut ident = String::new();
        while let Some(c) = self.advance() {
            if c == ']' {
                return Ok(Token::Ident(ident));
            }
            ident.push(c);
        }
        Err(Error::Expression("unterminated [identifier]".to_string()))
    }

    fn read_number(&mut self) -> Result<Token> {
        let mut num_str = String::new();
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                num_str.push(c);
                self.advance();
            } else if c == '.' && !is_float {
                is_float = true;
                num_str.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let bad = || Error::Expression(format!("invalid number '{}'", num_str));
        if is_float {
            num_str.parse().map(Token::Float).map_err(|_| bad())
        } else {
            num_str.parse().map(Token::Int).map_err(|_| bad())
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token> {
        self.advance(); // opening quote
        let mut s = String::new();

        while let Some(c) = self.peek() {
            if c == quote {
                self.advance();
                // SQL style doubled quote
                if self.peek() == Some(quote) {
                    self.advance();
                    s.push(quote);
                    continue;
                }
                return Ok(Token::String(s));
            } else if c == '\\' {
                self.advance();
                if let Some(escaped) = self.advance() {
                    match escaped {
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        _ => s.push(escaped),
                    }
                }
            } else {
                s.push(c);
                self.advance();
            }
        }

        Err(Error::Expression("unterminated string".to_string()))
    }

    fn two_char(&mut self, next: char, matched: Token, single: Token) -> Token {
        self.advance();
        if self.peek() == Some(next) {
            self.advance();
            matched
        } else {
            single
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        let Some(c) = self.peek() else {
            return Ok(Token::Eof);
        };
        match c {
            '(' => {
                self.advance();
                Ok(Token::LParen)
            }
            ')' => {
                self.advance();
                Ok(Token::RParen)
            }
            '+' => {
                self.advance();
                Ok(Token::Plus)
            }
            '-' => {
                self.advance();
                Ok(Token::Minus)
            }
            '*' => {
                self.advance();
                Ok(Token::Star)
            }
            '/' => {
                self.advance();
                Ok(Token::Slash)
            }
            // Single = also means ==
            '=' => Ok(self.two_char('=', Token::Eq, Token::Eq)),
            '!' => Ok(self.two_char('=', Token::Ne, Token::Not)),
            '<' => {
                self.advance();
                match self.peek() {
                    Some('=') => {
                        self.advance();
                        Ok(Token::Le)
                    }
                    Some('>') => {
                        self.advance();
                        Ok(Token::Ne)
                    }
                    _ => Ok(Token::Lt),
                }
            }
            '>' => Ok(self.two_char('=', Token::Ge, Token::Gt)),
            '\'' | '"' => self.read_string(c),
            '[' => self.read_bracketed(),
            '.' if self.input.get(self.pos + 1).map_or(false, |d| d.is_ascii_digit()) => self.read_number(),
            '.' => {
                self.advance();
                Ok(Token::Dot)
            }
            _ if c.is_ascii_digit() => self.read_number(),
            _ if c.is_alphabetic() || c == '_' => {
                let ident = self.read_ident();
                match ident.to_uppercase().as_str() {
                    "AND" => Ok(Token::And),
                    "OR" => Ok(Token::Or),
                    "NOT" => Ok(Token::Not),
                    "IS" => Ok(Token::Is),
                    "NULL" => Ok(Token::Null),
                    "TRUE" => Ok(Token::Bool(true)),
                    "FALSE" => Ok(Token::Bool(false)),
                    _ => Ok(Token::Ident(ident)),
                }
            }
            _ => Err(Error::Expression(format!("unexpected character: {}", c))),
        }
    }
}

/// Parser for building expression AST
struct Parser {
    lexer: Lexer,
    current: Token,
}

impl Parser {
    fn new(input: &str) -> Result<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Parser { lexer, current })
    }

    fn advance(&mut self) -> Result<()> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if &self.current == expected {
            self.advance()
        } else {
            Err(Error::Expression(format!("expected {:?}, got {:?}", expected, self.current)))
        }
    }

    fn parse(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    /// Lowest precedence.
    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.current == Token::Or {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.current == Token::And {
            self.advance()?;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.current == Token::Not {
            self.advance()?;
            let expr = self.parse_not()?;
            Ok(Expr::Not(Box::new(expr)))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;

        if self.current == Token::Is {
            self.advance()?;
            let negated = if self.current == Token::Not {
                self.advance()?;
                true
            } else {
                false
            };
            self.expect(&Token::Null)?;
            let inner = Box::new(left);
            return Ok(if negated {
                Expr::IsNotNull(inner)
            } else {
                Expr::IsNull(inner)
            });
        }

        let op = match &self.current {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.advance()?;
        let right = self.parse_additive()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current {
                Token::Plus => ArithmeticOp::Add,
                Token::Minus => ArithmeticOp::Sub,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current {
                Token::Star => ArithmeticOp::Mul,
                Token::Slash => ArithmeticOp::Div,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.current == Token::Minus {
            self.advance()?;
            return Ok(match self.parse_unary()? {
                Expr::Literal(Value::Int32(v)) => Expr::Literal(Value::Int32(-v)),
                Expr::Literal(Value::Int64(v)) => Expr::Literal(literal_int(-v)),
                Expr::Literal(Value::Float64(v)) => Expr::Literal(Value::Float64(-v)),
                other => Expr::Negate(Box::new(other)),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let literal = match &self.current {
            Token::Int(n) => Some(literal_int(*n)),
            Token::Float(f) => Some(Value::Float64(*f)),
            Token::String(s) => Some(Value::String(s.clone())),
            Token::Bool(b) => Some(Value::Bool(*b)),
            Token::Null => Some(Value::Null),
            _ => None,
        };
        if let Some(value) = literal {
            self.advance()?;
            return Ok(Expr::Literal(value));
        }

        match self.current.clone() {
            Token::LParen => {
                self.advance()?;
                let expr = self.parse()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::Ident(name) => {
                self.advance()?;
                if self.current == Token::LParen {
                    let func = AggregateFn::from_name(&name)
                        .ok_or_else(|| Error::Expression(format!("unknown function '{}'", name)))?;
                    self.advance()?;
                    let mut segments = self.parse_path()?;
                    self.expect(&Token::RParen)?;
                    let relation = segments.remove(0);
                    if segments.is_empty() && func != AggregateFn::Count {
                        return Err(Error::Expression(format!(
                            "{:?} needs a column: {}(Relation.Column)",
                            func, name
                        )));
                    }
                    return Ok(Expr::Aggregate {
                        func,
                        relation,
                        path: segments,
                    });
                }
                let mut path = vec![name];
                path.extend(self.parse_path_tail()?);
                Ok(Expr::Column(path))
            }
            other => Err(Error::Expression(format!("expected a value or column, got {:?}", other))),
        }
    }

    fn parse_path(&mut self) -> Result<Vec<String>> {
        match self.current.clone() {
            Token::Ident(first) => {
                self.advance()?;
                let mut path = vec![first];
                path.extend(self.parse_path_tail()?);
                Ok(path)
            }
            other => Err(Error::Expression(format!("expected a name, got {:?}", other))),
        }
    }

    fn parse_path_tail(&mut self) -> Result<Vec<String>> {
        let mut tail = Vec::new();
        while self.current == Token::Dot {
            self.advance()?;
            match self.current.clone() {
                Token::Ident(segment) => {
                    tail.push(segment);
                    self.advance()?;
                }
                other => return Err(Error::Expression(format!("expected a name after '.', got {:?}", other))),
            }
        }
        Ok(tail)
    }
}

fn literal_int(n: i64) -> Value {
    i32::try_from(n).map(Value::Int32).unwrap_or(Value::Int64(n))
}

/// Parse an expression string into an Expr AST.
pub fn parse_expr(input: &str) -> Result<Expr> {
    let mut parser = Parser::new(input)?;
    let expr = parser.parse()?;

    if parser.current != Token::Eof {
        return Err(Error::Expression(format!(
            "unexpected token after expression: {:?}",
            parser.current
        )));
    }

    Ok(expr)
}

impl Expr {
    /// Everything this expression reads, relative to the row it runs on.
    pub fn dependencies(&self) -> DependencySpec {
        let mut spec = DependencySpec::new();
        self.collect_dependencies(&mut spec);
        spec
    }

    fn collect_dependencies(&self, spec: &mut DependencySpec) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column(path) => {
                let (column, fks) = split_path(path);
                let hops = fks.iter().map(|fk| HopSpec::Parent(fk.clone())).collect();
                *spec = std::mem::take(spec).path(hops, column.cloned());
            }
            Expr::Aggregate { relation, path, .. } => {
                let mut hops = vec![HopSpec::Children(relation.clone())];
                let (column, fks) = split_path(path);
                hops.extend(fks.iter().map(|fk| HopSpec::Parent(fk.clone())));
                *spec = std::mem::take(spec).path(hops, column.cloned());
            }
            Expr::Arithmetic { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::And(left, right)
            | Expr::Or(left, right) => {
                left.collect_dependencies(spec);
                right.collect_dependencies(spec);
            }
            Expr::Negate(inner) | Expr::IsNull(inner) | Expr::IsNotNull(inner) | Expr::Not(inner) => {
                inner.collect_dependencies(spec)
            }
        }
    }

    /// Evaluates the expression against `row`.
    pub fn eval(&self, row: &Row) -> Result<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Column(path) => eval_path(row, path),
            Expr::Aggregate { func, relation, path } => {
                let children = row.children_by_name(relation)?.rows();
                let mut values = Vec::with_capacity(children.len());
                for child in &children {
                    values.push(if path.is_empty() {
                        Value::Bool(true)
                    } else {
                        eval_path(child, path)?
                    });
                }
                aggregate(*func, values)
            }
            Expr::Arithmetic { op, left, right } => arithmetic(*op, left.eval(row)?, right.eval(row)?),
            Expr::Negate(inner) => match inner.eval(row)? {
                Value::Null => Ok(Value::Null),
                Value::Int32(v) => Ok(v.checked_neg().map(Value::Int32).unwrap_or(Value::Int64(-(v as i64)))),
                Value::Int64(v) => Ok(Value::Int64(-v)),
                Value::Float64(v) => Ok(Value::Float64(-v)),
                other => Err(Error::Expression(format!("cannot negate {:?}", other))),
            },
            Expr::Compare { op, left, right } => {
                let ordering = left.eval(row)?.compare(&right.eval(row)?);
                Ok(Value::Bool(ordering.map_or(false, |ord| compare_ord(ord, *op))))
            }
            Expr::IsNull(inner) => Ok(Value::Bool(inner.eval(row)?.is_null())),
            Expr::IsNotNull(inner) => Ok(Value::Bool(!inner.eval(row)?.is_null())),
            Expr::And(left, right) => Ok(Value::Bool(left.matches(row)? && right.matches(row)?)),
            Expr::Or(left, right) => Ok(Value::Bool(left.matches(row)? || right.matches(row)?)),
            Expr::Not(inner) => Ok(Value::Bool(!inner.matches(row)?)),
        }
    }

    /// Evaluates as a predicate; anything but `true` fails it.
    pub fn matches(&self, row: &Row) -> Result<bool> {
        Ok(self.eval(row)? == Value::Bool(true))
    }
}

fn split_path(path: &[String]) -> (Option<&String>, &[String]) {
    match path.split_last() {
        Some((column, fks)) => (Some(column), fks),
        None => (None, &[]),
    }
}

fn eval_path(row: &Row, path: &[String]) -> Result<Value> {
    let (Some(column), fks) = split_path(path) else {
        return Ok(Value::Null);
    };
    let mut current = row.clone();
    for fk in fks {
        match current.get(fk.as_str())? {
            Value::Row(parent) => current = parent,
            Value::Null => return Ok(Value::Null),
            _ => {
                return Err(Error::Expression(format!(
                    "'{}' is not a foreign key of '{}'",
                    fk,
                    current.schema().name()
                )))
            }
        }
    }
    current.get(column.as_str())
}

fn compare_ord(ordering: Ordering, op: CompareOp) -> bool {
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

fn arithmetic(op: ArithmeticOp, left: Value, right: Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if op == ArithmeticOp::Add && (matches!(left, Value::String(_)) || matches!(right, Value::String(_))) {
        return Ok(Value::String(format!(
            "{}{}",
            left.to_text().unwrap_or_default(),
            right.to_text().unwrap_or_default()
        )));
    }
    let overflow = || Error::Expression(format!("integer overflow in {:?}", op));
    match (&left, &right) {
        (Value::Int32(a), Value::Int32(b)) if op != ArithmeticOp::Div => {
            let (a, b) = (*a as i64, *b as i64);
            let result = match op {
                ArithmeticOp::Add => a + b,
                ArithmeticOp::Sub => a - b,
                _ => a * b,
            };
            Ok(literal_int(result))
        }
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) if op != ArithmeticOp::Div => {
            let (a, b) = (left.as_i64().unwrap_or_default(), right.as_i64().unwrap_or_default());
            let result = match op {
                ArithmeticOp::Add => a.checked_add(b),
                ArithmeticOp::Sub => a.checked_sub(b),
                _ => a.checked_mul(b),
            };
            result.map(Value::Int64).ok_or_else(overflow)
        }
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => {
                if op == ArithmeticOp::Div && b == 0.0 {
                    return Err(Error::Expression("division by zero".to_string()));
                }
                Ok(Value::Float64(match op {
                    ArithmeticOp::Add => a + b,
                    ArithmeticOp::Sub => a - b,
                    ArithmeticOp::Mul => a * b,
                    ArithmeticOp::Div => a / b,
                }))
            }
            _ => Err(Error::Expression(format!(
                "cannot apply {:?} to {:?} and {:?}",
                op, left, right
            ))),
        },
    }
}

fn aggregate(func: AggregateFn, values: Vec<Value>) -> Result<Value> {
    let present: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    match func {
        AggregateFn::Count => Ok(literal_int(present.len() as i64)),
        AggregateFn::Sum => present.into_iter().try_fold(Value::Int32(0), |total, v| {
            if v.as_f64().is_none() {
                return Err(Error::Expression(format!("cannot sum {:?}", v)));
            }
            arithmetic(ArithmeticOp::Add, total, v)
        }),
        AggregateFn::Avg => {
            if present.is_empty() {
                return Ok(Value::Null);
            }
            let mut sum = 0.0;
            for v in &present {
                sum += v
                    .as_f64()
                    .ok_or_else(|| Error::Expression(format!("cannot average {:?}", v)))?;
            }
            Ok(Value::Float64(sum / present.len() as f64))
        }
        AggregateFn::Min | AggregateFn::Max => {
            let wanted = if func == AggregateFn::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<Value> = None;
            for v in present {
                best = match best {
                    None => Some(v),
                    Some(current) => match v.compare(&current) {
                        Some(ord) if ord == wanted => Some(v),
                        Some(_) => Some(current),
                        None => return Err(Error::Expression(format!("cannot order {:?}", v))),
                    },
                };
            }
            Ok(best.unwrap_or(Value::Null))
        }
    }
}

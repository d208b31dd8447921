//! Formula evaluator: a tiny arithmetic language over operand aliases.
//!
//! Grammar (usual precedence, left associative):
//!   expr   := term   (('+' | '-') term)*
//!   term   := factor (('*' | '/') factor)*
//!   factor := '-' factor | NUMBER | ALIAS | '(' expr ')'
//!
//! ALIAS is a single uppercase letter (`A`, `B`, ...) bound by the caller
//! to a resolved numeric value. Parsing happens once, evaluation is pure.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Operand alias, e.g. `A`.
pub type Alias = char;

/// Resolved operand values keyed by alias.
pub type Operands = BTreeMap<Alias, f64>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("Unrecognised formula '{formula}': {reason}")]
    UnknownFormula { formula: String, reason: String },

    #[error("Operand '{alias}' has no value")]
    MissingOperand { alias: Alias },

    #[error("Division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Operand(Alias),
    Neg(Box<Expr>),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Alias(Alias),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

/// A parsed formula. Keeps its source text for display and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr:   Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens: &tokens, pos: 0, source };
        let expr = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self { source: source.trim().to_string(), expr })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every alias the formula references, in alphabetical order.
    pub fn aliases(&self) -> BTreeSet<Alias> {
        let mut out = BTreeSet::new();
        collect_aliases(&self.expr, &mut out);
        out
    }

    /// Aliases that appear anywhere inside the right-hand side of a division.
    /// These are the formula's denominators.
    pub fn divisor_aliases(&self) -> BTreeSet<Alias> {
        let mut out = BTreeSet::new();
        collect_divisors(&self.expr, false, &mut out);
        out
    }

    pub fn evaluate(&self, operands: &Operands) -> Result<f64, FormulaError> {
        eval(&self.expr, operands)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Formula {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Formula {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Formula::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn eval(expr: &Expr, operands: &Operands) -> Result<f64, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Operand(alias) => operands
            .get(alias)
            .copied()
            .ok_or(FormulaError::MissingOperand { alias: *alias }),
        Expr::Neg(inner) => Ok(-eval(inner, operands)?),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval(lhs, operands)?;
            let r = eval(rhs, operands)?;
            match op {
                BinOp::Add => Ok(l + r),
                BinOp::Sub => Ok(l - r),
                BinOp::Mul => Ok(l * r),
                BinOp::Div => {
                    if r == 0.0 {
                        Err(FormulaError::DivisionByZero)
                    } else {
                        Ok(l / r)
                    }
                }
            }
        }
    }
}

fn collect_aliases(expr: &Expr, out: &mut BTreeSet<Alias>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Operand(a) => {
            out.insert(*a);
        }
        Expr::Neg(inner) => collect_aliases(inner, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_aliases(lhs, out);
            collect_aliases(rhs, out);
        }
    }
}

fn collect_divisors(expr: &Expr, under_divisor: bool, out: &mut BTreeSet<Alias>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Operand(a) => {
            if under_divisor {
                out.insert(*a);
            }
        }
        Expr::Neg(inner) => collect_divisors(inner, under_divisor, out),
        Expr::Binary { op, lhs, rhs } => {
            collect_divisors(lhs, under_divisor, out);
            collect_divisors(rhs, under_divisor || *op == BinOp::Div, out);
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, FormulaError> {
    let unknown = |reason: String| FormulaError::UnknownFormula {
        formula: source.to_string(),
        reason,
    };
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => {}
            '+' => tokens.push(Token::Plus),
            '-' => tokens.push(Token::Minus),
            '*' => tokens.push(Token::Star),
            '/' => tokens.push(Token::Slash),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            'A'..='Z' => {
                if chars.get(i + 1).is_some_and(|n| n.is_ascii_alphanumeric()) {
                    return Err(unknown(format!("operand names are single letters (at {i})")));
                }
                tokens.push(Token::Alias(c));
            }
            '0'..='9' | '.' => {
                let start = i;
                while i + 1 < chars.len() && (chars[i + 1].is_ascii_digit() || chars[i + 1] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..=i].iter().collect();
                let n: f64 = literal
                    .parse()
                    .map_err(|_| unknown(format!("bad number '{literal}'")))?;
                tokens.push(Token::Number(n));
            }
            other => return Err(unknown(format!("unexpected character '{other}' at {i}"))),
        }
        i += 1;
    }
    if tokens.is_empty() {
        return Err(unknown("empty formula".into()));
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos:    usize,
    source: &'a str,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> FormulaError {
        FormulaError::UnknownFormula {
            formula: self.source.to_string(),
            reason:  format!("{reason} (token {})", self.pos),
        }
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        while let Some(tok) = self.peek() {
            let op = match tok {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.factor()?;
        while let Some(tok) = self.peek() {
            let op = match tok {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, FormulaError> {
        let tok = self.peek().ok_or_else(|| self.error("unexpected end of formula"))?;
        self.pos += 1;
        match tok {
            Token::Minus => Ok(Expr::Neg(Box::new(self.factor()?))),
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Alias(a) => Ok(Expr::Operand(a)),
            Token::LParen => {
                let inner = self.expr()?;
                if self.peek() != Some(Token::RParen) {
                    return Err(self.error("missing ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            _ => {
                self.pos -= 1;
                Err(self.error("expected a number, operand or '('"))
            }
        }
    }
}

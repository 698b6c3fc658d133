//! Derived columns from arithmetic over existing ones.
//!
//! Expressions reference columns as `[Name]` and combine them with `+ - * /`,
//! parentheses, unary minus and numeric literals, e.g. `([Price] - [Cost]) / [Price]`.
//! Referenced columns are read through numeric coercion, so `$1,200` and `45%`
//! participate as numbers. Non-finite results (division by zero) become null.

use crate::error::{Result, TabulaError};
use crate::service::AnalysisService;
use crate::store::convert::column_numbers;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::iter::Peekable;
use std::str::Chars;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedColumnInfo {
    pub column: String,
    pub expression: String,
    pub referenced_columns: Vec<String>,
    /// Rows where the expression produced no value.
    pub null_values: usize,
    /// Whether an existing column of the same name was overwritten.
    pub replaced: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Column(String),
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let mut chars: Peekable<Chars> = expression.chars().peekable();
    let mut tokens = Vec::new();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '[' => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(ch) => name.push(ch),
                        None => return Err(invalid("unterminated column reference")),
                    }
                }
                if name.is_empty() {
                    return Err(invalid("empty column reference"));
                }
                tokens.push(Token::Column(name));
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| invalid(&format!("bad number '{}'", literal)))?;
                tokens.push(Token::Number(value));
            }
            _ => {
                chars.next();
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    other => return Err(invalid(&format!("unexpected character '{}'", other))),
                });
            }
        }
    }
    Ok(tokens)
}

/// Recursive-descent parser producing a polars expression.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse(tokens: Vec<Token>) -> Result<Expr> {
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.sum()?;
        match parser.tokens.get(parser.pos) {
            None => Ok(expr),
            Some(token) => Err(invalid(&format!("unexpected {:?}", token))),
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn sum(&mut self) -> Result<Expr> {
        let mut expr = self.product()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    expr = expr + self.product()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    expr = expr - self.product()?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn product(&mut self) -> Result<Expr> {
        let mut expr = self.factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    expr = expr * self.factor()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    expr = expr / self.factor()?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn factor(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Minus) => Ok(lit(0.0) - self.factor()?),
            Some(Token::Column(name)) => Ok(col(&name)),
            Some(Token::Number(value)) => Ok(lit(value)),
            Some(Token::LParen) => {
                let expr = self.sum()?;
                match self.next() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err(invalid("missing closing parenthesis")),
                }
            }
            Some(token) => Err(invalid(&format!("unexpected {:?}", token))),
            None => Err(invalid("expression ends early")),
        }
    }
}

fn invalid(reason: &str) -> TabulaError {
    TabulaError::Validation(format!("invalid expression: {}", reason))
}

/// Referenced column names in first-appearance order.
fn referenced_columns(tokens: &[Token]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for token in tokens {
        if let Token::Column(name) = token {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    names
}

/// Evaluate `expression` over `df` and add (or overwrite) `new_column` with the result.
pub fn derive_column(df: &DataFrame, new_column: &str, expression: &str) -> Result<(DataFrame, DerivedColumnInfo)> {
    let new_column = new_column.trim();
    if new_column.is_empty() {
        return Err(TabulaError::Validation("new column name is empty".to_string()));
    }

    let tokens = tokenize(expression)?;
    let referenced = referenced_columns(&tokens);
    if referenced.is_empty() {
        return Err(TabulaError::Validation(
            "no column references found in expression; use [ColumnName]".to_string(),
        ));
    }
    let existing = df.get_column_names();
    let missing: Vec<&str> = referenced
        .iter()
        .map(String::as_str)
        .filter(|name| !existing.contains(name))
        .collect();
    if !missing.is_empty() {
        return Err(TabulaError::Validation(format!("columns not found: {}", missing.join(", "))));
    }
    let expr = Parser::parse(tokens)?;

    let mut inputs = Vec::with_capacity(referenced.len());
    for name in &referenced {
        inputs.push(Series::new(name, column_numbers(df, name)?));
    }
    let evaluated = DataFrame::new(inputs)?
        .lazy()
        .select([expr.cast(DataType::Float64).alias(new_column)])
        .collect()?;
    let values: Vec<Option<f64>> = evaluated
        .column(new_column)?
        .f64()?
        .into_iter()
        .map(|v| v.filter(|n| n.is_finite()))
        .collect();
    let derived = Series::new(new_column, values);

    let info = DerivedColumnInfo {
        column: new_column.to_string(),
        expression: expression.to_string(),
        referenced_columns: referenced,
        null_values: derived.null_count(),
        replaced: existing.contains(&new_column),
    };
    let mut out = df.clone();
    out.with_column(derived)?;
    Ok((out, info))
}

impl AnalysisService {
    pub fn create_derived_column(
        &self,
        session_id: &str,
        new_column: &str,
        expression: &str,
    ) -> Result<DerivedColumnInfo> {
        let (frame, derived) = self
            .registry()
            .with_store(session_id, |store| derive_column(store.frame()?, new_column, expression))?;
        self.replace_dataset(session_id, frame);
        info!(
            session_id,
            column = %derived.column,
            expression,
            nulls = derived.null_values,
            "Created derived column"
        );
        Ok(derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            Series::new("Unit Price", &[Some("$1,000"), Some("2"), None, Some("4")]),
            Series::new("units", &[Some(2.0), Some(3.0), Some(4.0), Some(0.0)]),
        ])
        .unwrap()
    }

    fn values(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        column_numbers(df, name).unwrap()
    }

    #[test]
    fn test_multiplies_coerced_columns() {
        let (out, info) = derive_column(&frame(), "revenue", "[Unit Price] * [units]").unwrap();
        assert_eq!(values(&out, "revenue"), vec![Some(2000.0), Some(6.0), None, Some(0.0)]);
        assert_eq!(info.referenced_columns, vec!["Unit Price", "units"]);
        assert_eq!(info.null_values, 1);
        assert!(!info.replaced);
        assert_eq!(out.width(), 3);
    }

    #[test]
    fn test_precedence_parentheses_and_unary_minus() {
        let (out, _) = derive_column(&frame(), "a", "[units] + [units] * 2").unwrap();
        assert_eq!(values(&out, "a")[0], Some(6.0));

        let (out, _) = derive_column(&frame(), "b", "([units] + 1) / 2").unwrap();
        assert_eq!(values(&out, "b")[1], Some(2.0));

        let (out, _) = derive_column(&frame(), "c", "-[units] - 1").unwrap();
        assert_eq!(values(&out, "c")[0], Some(-3.0));
    }

    #[test]
    fn test_division_by_zero_is_null() {
        let (out, info) = derive_column(&frame(), "per_unit", "[Unit Price] / [units]").unwrap();
        assert_eq!(values(&out, "per_unit"), vec![Some(500.0), Some(2.0 / 3.0), None, None]);
        assert_eq!(info.null_values, 2);
    }

    #[test]
    fn test_overwrites_existing_column() {
        let (out, info) = derive_column(&frame(), "units", "[units] * 10").unwrap();
        assert!(info.replaced);
        assert_eq!(out.width(), 2);
        assert_eq!(values(&out, "units")[1], Some(30.0));
    }

    #[test]
    fn test_rejects_bad_expressions() {
        for (name, expression) in [
            ("x", "[missing] + [units]"),
            ("x", "2 + 3"),
            ("x", "([units] + 1"),
            ("x", "[units] +"),
            ("x", "[units] % 2"),
            ("x", "[units"),
            ("  ", "[units]"),
        ] {
            assert!(
                matches!(derive_column(&frame(), name, expression), Err(TabulaError::Validation(_))),
                "expected rejection for {:?}",
                expression
            );
        }
    }

    #[test]
    fn test_missing_columns_are_named() {
        let err = derive_column(&frame(), "x", "[a] + [units] + [b]").unwrap_err();
        assert_eq!(err.to_string(), "Validation error: columns not found: a, b");
    }

    #[tokio::test]
    async fn test_derived_column_replaces_session_dataset() {
        let service = AnalysisService::default();
        service.registry().replace("s1", frame());
        assert!(!service.get_metadata("s1").unwrap().numeric_columns.contains(&"total".to_string()));

        let info = service
            .create_derived_column("s1", "total", "[units] * 2")
            .unwrap();
        assert_eq!(info.column, "total");
        let metadata = service.get_metadata("s1").unwrap();
        assert_eq!(metadata.column_count, 3);
        assert!(metadata.numeric_columns.contains(&"total".to_string()));
        assert!(matches!(
            service.create_derived_column("nope", "total", "[units]"),
            Err(TabulaError::NotFound(_))
        ));
    }
}

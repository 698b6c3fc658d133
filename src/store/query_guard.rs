//! Read-only query guard
//!
//! Every statement is checked here before it reaches the columnar engine,
//! independent of whatever the engine itself would permit. Only a single
//! `SELECT` (optionally behind `WITH`) is accepted.

use crate::error::{Result, TabulaError};
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

pub fn ensure_read_only(sql: &str) -> Result<()> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(reject("query is empty"));
    }

    let leading = trimmed
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|word| !word.is_empty())
        .unwrap_or("")
        .to_ascii_uppercase();
    if leading != "SELECT" && leading != "WITH" {
        return Err(reject(&format!("only SELECT queries are allowed, got {}", leading)));
    }

    let dialect = GenericDialect {};
    let statements = Parser::parse_sql(&dialect, trimmed)
        .map_err(|e| reject(&format!("could not parse query: {}", e)))?;

    match statements.as_slice() {
        [Statement::Query(query)] => check_query(query),
        [_] => Err(reject("only SELECT queries are allowed")),
        _ => Err(reject("exactly one statement is allowed")),
    }
}

fn check_query(query: &Query) -> Result<()> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_query(&cte.query)?;
        }
    }
    check_set_expr(&query.body)
}

fn check_set_expr(body: &SetExpr) -> Result<()> {
    match body {
        SetExpr::Select(select) => {
            if select.into.is_some() {
                return Err(reject("SELECT INTO is not allowed"));
            }
            Ok(())
        }
        SetExpr::Query(query) => check_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            check_set_expr(left)?;
            check_set_expr(right)
        }
        SetExpr::Values(_) => Ok(()),
        _ => Err(reject("statement modifies data")),
    }
}

fn reject(reason: &str) -> TabulaError {
    TabulaError::Validation(format!("read-only query rejected: {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_selects() {
        assert!(ensure_read_only("SELECT * FROM dataset").is_ok());
        assert!(ensure_read_only("  select a, avg(b) from dataset group by a;").is_ok());
        assert!(ensure_read_only("WITH t AS (SELECT a FROM dataset) SELECT * FROM t").is_ok());
        assert!(ensure_read_only("SELECT a FROM dataset UNION SELECT b FROM dataset").is_ok());
    }

    #[test]
    fn test_rejects_writes() {
        for sql in [
            "DELETE FROM dataset",
            "DROP TABLE dataset",
            "INSERT INTO dataset VALUES (1)",
            "UPDATE dataset SET a = 1",
            "SELECT * INTO copy FROM dataset",
            "SELECT 1; DROP TABLE dataset",
            "",
        ] {
            assert!(
                matches!(ensure_read_only(sql), Err(TabulaError::Validation(_))),
                "expected rejection for {:?}",
                sql
            );
        }
    }
}

//! SQL-parser collaborator.
//!
//! The gateway forwards statements verbatim after its light rewrites; the
//! parser is only consulted as an advisory check, never as a gate. Kept as a
//! thin adapter so the underlying parser can be swapped without touching the
//! engines.

use sqlparser::ast::Statement;
use sqlparser::dialect::{MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::{Parser, ParserError};

use crate::config::DbKind;

pub fn parse(kind: DbKind, sql: &str) -> Result<Vec<Statement>, ParserError> {
    match kind {
        DbKind::MySql => Parser::parse_sql(&MySqlDialect {}, sql),
        DbKind::Postgres => Parser::parse_sql(&PostgreSqlDialect {}, sql),
    }
}

pub fn validate(kind: DbKind, sql: &str) -> bool {
    parse(kind, sql).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_select() {
        assert!(validate(DbKind::MySql, "SELECT id, name FROM users WHERE id = 1"));
        assert!(validate(DbKind::Postgres, "SELECT 1"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(!validate(DbKind::MySql, "SELEKT * FORM users"));
        assert!(!validate(DbKind::Postgres, "THIS IS NOT SQL ;;;"));
    }

    #[test]
    fn parse_returns_statements() {
        let stmts = parse(DbKind::Postgres, "SELECT 1; SELECT 2").unwrap();
        assert_eq!(stmts.len(), 2);
    }
}

//! Row-level statement text
//!
//! Builds parametrized INSERT / UPDATE / DELETE statements from ordered
//! column maps. Values are converted to their storage representation.

use crate::sql::sanitize::quote_identifier;
use crate::types::{Record, Value};

/// A statement with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// `INSERT INTO table (...) VALUES (...)`
///
/// An empty record inserts a row of defaults.
pub fn insert(table: &str, values: &Record) -> Statement {
    if values.is_empty() {
        return Statement {
            sql: format!("INSERT INTO {} DEFAULT VALUES", quote_identifier(table)),
            params: Vec::new(),
        };
    }

    let columns: Vec<String> = values.columns().map(quote_identifier).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");

    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(table),
            columns.join(", "),
            placeholders
        ),
        params: values.values().map(Value::to_storage).collect(),
    }
}

/// `UPDATE table SET ... WHERE ...` with equality conditions
pub fn update(table: &str, values: &Record, where_equals: &Record) -> Statement {
    let assignments: Vec<String> = values
        .columns()
        .map(|column| format!("{} = ?", quote_identifier(column)))
        .collect();

    let mut params: Vec<Value> = values.values().map(Value::to_storage).collect();
    let (where_clause, where_params) = equality_clause(where_equals);
    params.extend(where_params);

    Statement {
        sql: format!(
            "UPDATE {} SET {}{}",
            quote_identifier(table),
            assignments.join(", "),
            where_clause
        ),
        params,
    }
}

/// `DELETE FROM table WHERE ...` with equality conditions
pub fn delete(table: &str, where_equals: &Record) -> Statement {
    let (where_clause, params) = equality_clause(where_equals);
    Statement {
        sql: format!("DELETE FROM {}{}", quote_identifier(table), where_clause),
        params,
    }
}

fn equality_clause(where_equals: &Record) -> (String, Vec<Value>) {
    if where_equals.is_empty() {
        return (String::new(), Vec::new());
    }

    let mut parts = Vec::with_capacity(where_equals.len());
    let mut params = Vec::new();
    for (column, value) in where_equals.iter() {
        if value.is_null() {
            parts.push(format!("{} IS NULL", quote_identifier(column)));
        } else {
            parts.push(format!("{} = ?", quote_identifier(column)));
            params.push(value.to_storage());
        }
    }

    (format!(" WHERE {}", parts.join(" AND ")), params)
}

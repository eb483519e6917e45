//! Error types for mapper operations

use thiserror::Error;

/// Errors that can occur while mapping, querying or persisting entities
#[derive(Debug, Error)]
pub enum Error {
    #[error("Column \"{column}\" does not exist for table \"{table}\"")]
    UnknownColumn { table: String, column: String },

    #[error("Table \"{0}\" does not exist")]
    UnknownTable(String),

    #[error("Relation type mismatch: expected table \"{expected}\", \"{given}\" given")]
    RelationTypeMismatch { expected: String, given: String },

    #[error("No relation \"{relation}\" for table \"{table}\"")]
    NoRelation { table: String, relation: String },

    #[error("Table mismatch: \"{left}\" and \"{right}\"")]
    TableMismatch { left: String, right: String },

    #[error("Cannot infer join condition between \"{table}\" and \"{joined}\"")]
    JoinCondition { table: String, joined: String },

    #[error("Invalid query state: {0}")]
    QueryState(String),

    #[error("Invalid value for \"{table}.{column}\": {message}")]
    InvalidValue {
        table: String,
        column: String,
        message: String,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session has been dropped")]
    SessionClosed,

    #[error("Callback error: {0}")]
    Callback(String),
}

impl Error {
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable(table.into())
    }

    pub fn relation_mismatch(expected: impl Into<String>, given: impl Into<String>) -> Self {
        Self::RelationTypeMismatch {
            expected: expected.into(),
            given: given.into(),
        }
    }

    pub fn no_relation(table: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::NoRelation {
            table: table.into(),
            relation: relation.into(),
        }
    }

    pub fn table_mismatch(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self::TableMismatch {
            left: left.into(),
            right: right.into(),
        }
    }

    pub fn join_condition(table: impl Into<String>, joined: impl Into<String>) -> Self {
        Self::JoinCondition {
            table: table.into(),
            joined: joined.into(),
        }
    }

    pub fn query_state(msg: impl Into<String>) -> Self {
        Self::QueryState(msg.into())
    }

    pub fn invalid_value(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            table: table.into(),
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn callback(msg: impl Into<String>) -> Self {
        Self::Callback(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

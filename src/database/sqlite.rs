//! SQLite backend
//!
//! Wraps a single sqlx [`SqliteConnection`] and drives it on a private
//! current-thread tokio runtime, so every call blocks until the statement
//! completes.

use std::str::FromStr;

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row, Sqlite, SqliteConnection, TypeInfo, ValueRef};
use tokio::runtime::{Builder, Runtime};

use super::Database;
use crate::error::{Error, Result};
use crate::sql::quote_identifier;
use crate::types::{ColumnInfo, ColumnType, Record, Value};

/// Blocking SQLite connection
pub struct SqliteDatabase {
    runtime: Runtime,
    conn: SqliteConnection,
    last_insert_id: i64,
}

impl SqliteDatabase {
    /// Open a connection from a URL such as `sqlite::memory:` or `sqlite://app.db`
    ///
    /// Database files are created when missing.
    pub fn connect(url: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Connection(format!("Invalid database URL '{}': {}", url, e)))?
            .create_if_missing(true);

        let conn = runtime
            .block_on(options.connect())
            .map_err(|e| Error::Connection(format!("Database connection failed: {}", e)))?;

        Ok(Self {
            runtime,
            conn,
            last_insert_id: 0,
        })
    }

    /// Close the connection, flushing any pending work
    pub fn close(self) -> Result<()> {
        let Self { runtime, conn, .. } = self;
        runtime.block_on(conn.close())?;
        Ok(())
    }

    fn run_control(&mut self, sql: &'static str) -> Result<()> {
        let conn = &mut self.conn;
        self.runtime
            .block_on(async move { sqlx::query(sql).execute(&mut *conn).await })?;
        Ok(())
    }
}

impl Database for SqliteDatabase {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let conn = &mut self.conn;
        let query = bind_params(sql, params);
        let result = self
            .runtime
            .block_on(async move { query.execute(&mut *conn).await })?;

        if result.last_insert_rowid() != 0 {
            self.last_insert_id = result.last_insert_rowid();
        }
        Ok(result.rows_affected())
    }

    fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        let conn = &mut self.conn;
        let query = bind_params(sql, params);
        let rows = self
            .runtime
            .block_on(async move { query.fetch_all(&mut *conn).await })?;

        rows.iter().map(row_to_record).collect()
    }

    fn last_insert_id(&mut self) -> Result<i64> {
        Ok(self.last_insert_id)
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.run_control("BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.run_control("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.run_control("ROLLBACK")
    }

    fn list_tables(&mut self) -> Result<Vec<String>> {
        let conn = &mut self.conn;
        let rows = self.runtime.block_on(async move {
            sqlx::query(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .fetch_all(&mut *conn)
            .await
        })?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(Error::from))
            .collect()
    }

    fn list_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(table));
        let conn = &mut self.conn;
        let rows = self
            .runtime
            .block_on(async move { sqlx::query(&sql).fetch_all(&mut *conn).await })?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let default: Option<String> = row.try_get("dflt_value")?;
            let pk: i64 = row.try_get("pk")?;

            let mut column = ColumnInfo::new(name, declared);
            column.default = parse_default(default.as_deref(), column.column_type);
            if not_null != 0 {
                column = column.not_null();
            }
            if pk != 0 {
                column = column.primary_key();
            }
            columns.push(column);
        }

        Ok(columns)
    }
}

fn bind_params<'q>(sql: &'q str, params: &[Value]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, value| match value.to_storage() {
            Value::Null => query.bind(None::<i64>),
            Value::Integer(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s),
            Value::Bytes(b) => query.bind(b),
            other => query.bind(other.to_string()),
        })
}

fn row_to_record(row: &SqliteRow) -> Result<Record> {
    let mut record = Record::new();

    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage_type = raw.type_info().name().to_string();
            match storage_type.as_str() {
                "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get::<i64, _>(index)?),
                "REAL" => Value::Float(row.try_get::<f64, _>(index)?),
                "BLOB" => Value::Bytes(row.try_get::<Vec<u8>, _>(index)?),
                _ => Value::Text(row.try_get::<String, _>(index)?),
            }
        };
        record.insert(column.name(), value);
    }

    Ok(record)
}

/// Interpret a `dflt_value` expression from `PRAGMA table_info`
///
/// Literals are converted to the column type; expressions such as
/// `CURRENT_TIMESTAMP` have no static value and yield `Null`.
fn parse_default(expr: Option<&str>, column_type: ColumnType) -> Value {
    let Some(expr) = expr.map(str::trim) else {
        return Value::Null;
    };

    let literal = if expr.len() >= 2 && expr.starts_with('\'') && expr.ends_with('\'') {
        Value::Text(expr[1..expr.len() - 1].replace("''", "'"))
    } else if let Ok(i) = expr.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(f) = expr.parse::<f64>() {
        Value::Float(f)
    } else {
        match expr.to_uppercase().as_str() {
            "TRUE" => Value::Integer(1),
            "FALSE" => Value::Integer(0),
            _ => return Value::Null,
        }
    };

    column_type.to_application(&literal).unwrap_or(literal)
}

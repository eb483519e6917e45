//! Database capability
//!
//! The mapper talks to storage only through the [`Database`] trait: parametrized
//! statements, rows as ordered [`Record`]s, transaction control, last-insert-id
//! and schema introspection. [`SqliteDatabase`] is the bundled backend and
//! [`LoggingDatabase`] decorates any backend with statement timing and a
//! query log.

mod logging;
mod sqlite;

pub use logging::{LoggedQuery, LoggingDatabase, QueryLog};
pub use sqlite::SqliteDatabase;

use crate::error::Result;
use crate::sql::statement;
use crate::types::{ColumnInfo, Record, Value};

/// Blocking connection to a relational database
///
/// Placeholders in `sql` are positional (`?`).
pub trait Database {
    /// Execute a statement and return the number of affected rows
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a query and return every row
    fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>>;

    /// Execute a query and return the first row, if any
    fn fetch_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Record>> {
        Ok(self.fetch_all(sql, params)?.into_iter().next())
    }

    /// Insert one row; read the generated id with [`Database::last_insert_id`]
    fn insert(&mut self, table: &str, values: &Record) -> Result<u64> {
        let stmt = statement::insert(table, values);
        self.execute(&stmt.sql, &stmt.params)
    }

    /// Id generated by the most recent insert on this connection
    fn last_insert_id(&mut self) -> Result<i64>;

    /// Update rows matching every `where_equals` pair
    fn update(&mut self, table: &str, values: &Record, where_equals: &Record) -> Result<u64> {
        let stmt = statement::update(table, values, where_equals);
        self.execute(&stmt.sql, &stmt.params)
    }

    /// Delete rows matching every `where_equals` pair
    fn delete(&mut self, table: &str, where_equals: &Record) -> Result<u64> {
        let stmt = statement::delete(table, where_equals);
        self.execute(&stmt.sql, &stmt.params)
    }

    fn begin_transaction(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Names of all user tables
    fn list_tables(&mut self) -> Result<Vec<String>>;

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.list_tables()?.iter().any(|name| name == table))
    }

    /// Ordered column metadata for `table` (empty when the table is missing)
    fn list_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>>;
}

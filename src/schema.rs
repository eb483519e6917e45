//! Schema catalog
//!
//! Memoizes the table list and per-table column metadata introspected from
//! the database. Cached entries never change until [`SchemaCatalog::invalidate`].

use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::types::{ColumnInfo, Record};

/// Introspected columns of one table
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// One entry per column holding its declared default (or `NULL`)
    pub fn defaults(&self) -> Record {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.default.clone()))
            .collect()
    }
}

/// Memoized table and column metadata
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    tables: Option<Vec<String>>,
    columns: HashMap<String, Rc<TableSchema>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All table names, introspected on first use
    pub fn tables(&mut self, db: &mut dyn Database) -> Result<&[String]> {
        if self.tables.is_none() {
            let tables = db.list_tables()?;
            tracing::trace!(count = tables.len(), "Loaded table list");
            self.tables = Some(tables);
        }
        Ok(self.tables.as_deref().unwrap_or_default())
    }

    pub fn has_table(&mut self, db: &mut dyn Database, table: &str) -> Result<bool> {
        Ok(self.tables(db)?.iter().any(|t| t == table))
    }

    /// Columns of `table`; fails with `UnknownTable` when it does not exist
    pub fn table(&mut self, db: &mut dyn Database, table: &str) -> Result<Rc<TableSchema>> {
        if let Some(schema) = self.columns.get(table) {
            return Ok(Rc::clone(schema));
        }

        if !self.has_table(db, table)? {
            return Err(Error::unknown_table(table));
        }

        let columns = db.list_columns(table)?;
        tracing::trace!(table = %table, columns = columns.len(), "Loaded table columns");

        let schema = Rc::new(TableSchema::new(table, columns));
        self.columns.insert(table.to_string(), Rc::clone(&schema));
        Ok(schema)
    }

    /// Whether `table` exists and has `column`
    pub fn has_column(&mut self, db: &mut dyn Database, table: &str, column: &str) -> Result<bool> {
        if !self.has_table(db, table)? {
            return Ok(false);
        }
        Ok(self.table(db, table)?.has_column(column))
    }

    /// Drop every memoized entry; the next lookup introspects again
    pub fn invalidate(&mut self) {
        self.tables = None;
        self.columns.clear();
    }
}

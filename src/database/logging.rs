//! Statement logging decorator

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::Database;
use crate::error::Result;
use crate::types::{ColumnInfo, Record, Value};

/// One executed statement
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub elapsed: Duration,
}

/// Bounded history of executed statements plus a running total
///
/// The total counts every statement; entries are only kept while logging is
/// enabled.
#[derive(Debug, Clone)]
pub struct QueryLog {
    enabled: bool,
    capacity: usize,
    entries: VecDeque<LoggedQuery>,
    total: u64,
}

impl QueryLog {
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
            total: 0,
        }
    }

    pub fn record(&mut self, sql: &str, params: &[Value], elapsed: Duration) {
        self.total += 1;
        if !self.enabled || self.capacity == 0 {
            return;
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LoggedQuery {
            sql: sql.to_string(),
            params: params.to_vec(),
            elapsed,
        });
    }

    /// Number of statements executed since creation or the last [`QueryLog::clear`]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// The most recent `n` entries, oldest first
    pub fn last(&self, n: usize) -> Vec<LoggedQuery> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total = 0;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.entries.clear();
        }
    }
}

/// Wraps a [`Database`], timing and recording every statement
///
/// Only `execute` and `fetch_all` (and the defaults built on them) are
/// counted. Transaction control and schema introspection pass straight
/// through.
pub struct LoggingDatabase {
    inner: Box<dyn Database>,
    log: QueryLog,
}

impl LoggingDatabase {
    pub fn new(inner: Box<dyn Database>, log: QueryLog) -> Self {
        Self { inner, log }
    }

    pub fn log(&self) -> &QueryLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut QueryLog {
        &mut self.log
    }

    fn finish(&mut self, sql: &str, params: &[Value], started: Instant) {
        let elapsed = started.elapsed();
        tracing::debug!(
            sql = %sql,
            params = ?params,
            elapsed_us = elapsed.as_micros() as u64,
            "Executed statement"
        );
        self.log.record(sql, params, elapsed);
    }
}

impl Database for LoggingDatabase {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let started = Instant::now();
        let result = self.inner.execute(sql, params);
        self.finish(sql, params, started);
        result
    }

    fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        let started = Instant::now();
        let result = self.inner.fetch_all(sql, params);
        self.finish(sql, params, started);
        result
    }

    fn last_insert_id(&mut self) -> Result<i64> {
        self.inner.last_insert_id()
    }

    fn begin_transaction(&mut self) -> Result<()> {
        tracing::trace!("BEGIN");
        self.inner.begin_transaction()
    }

    fn commit(&mut self) -> Result<()> {
        tracing::trace!("COMMIT");
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        tracing::warn!("Rolling back transaction");
        self.inner.rollback()
    }

    fn list_tables(&mut self) -> Result<Vec<String>> {
        self.inner.list_tables()
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.inner.table_exists(table)
    }

    fn list_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        tracing::trace!(table = %table, "Introspecting columns");
        self.inner.list_columns(table)
    }
}

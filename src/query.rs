//! QueryBuilder - filters, joins and ordering against one table
//!
//! A builder accumulates clauses and is consumed by an executor. Rows come
//! back through the session, so every executor that yields entities goes
//! through the identity cache.
//!
//! ```no_run
//! # use activerow::{Direction, Session};
//! # fn demo(session: &Session) -> activerow::Result<()> {
//! let books = session
//!     .query("book")
//!     .filter_by("author_id", 1)
//!     .order_by("title", Direction::Asc)
//!     .limit(10)
//!     .find()?;
//! # Ok(())
//! # }
//! ```

use crate::collection::EntitySet;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::pager::Pager;
use crate::relation;
use crate::session::Session;
use crate::sql::{
    Comparison, Direction, Filter, FilterValue, build_condition_clause, build_order_by_clause,
    quote_identifier, quote_qualified, validate_identifier,
};
use crate::types::{Record, Value};

/// SQL join flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    table: String,
    alias: Option<String>,
    condition: String,
}

/// What a rendered SELECT returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    /// Own columns plus computed columns
    Rows,
    /// Own id only (bulk statement scope)
    Ids,
}

/// Builder for queries against one table
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    session: Session,
    table: String,
    alias: Option<String>,
    filters: Vec<Filter>,
    joins: Vec<Join>,
    order: Vec<(String, Direction)>,
    group: Vec<String>,
    having: Vec<Filter>,
    limit: Option<u64>,
    offset: Option<u64>,
    columns: Vec<(String, String)>,
    distinct: bool,
}

impl QueryBuilder {
    pub(crate) fn new(session: Session, table: &str) -> Self {
        Self {
            session,
            table: relation::normalize(table),
            alias: None,
            filters: Vec::new(),
            joins: Vec::new(),
            order: Vec::new(),
            group: Vec::new(),
            having: Vec::new(),
            limit: None,
            offset: None,
            columns: Vec::new(),
            distinct: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name the own table is referenced by: its alias, else its name
    fn reference(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Qualify a bare column with the own table reference
    fn qualify(&self, column: &str) -> String {
        if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{}", self.reference(), relation::normalize(column))
        }
    }

    /// Own column name when `column` is bare or qualified by the own reference
    fn own_column(&self, column: &str) -> Option<String> {
        match column.split_once('.') {
            None => Some(relation::normalize(column)),
            Some((prefix, name)) if prefix == self.reference() => Some(name.to_string()),
            Some(_) => None,
        }
    }

    // ========================================================================
    // Building
    // ========================================================================

    /// Reference the own table by `alias`
    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Equality filter
    ///
    /// `Null` matches `IS NULL`, a list matches membership. Unqualified
    /// columns belong to the own table.
    pub fn filter_by(mut self, column: &str, value: impl Into<FilterValue>) -> Self {
        let value = value.into();
        let mut filter = Filter::equals(&self.qualify(column), value.clone());

        if let FilterValue::Single(value) = value {
            if let Some(own) = self.own_column(column) {
                if !value.is_null() {
                    filter = filter.with_exact(own, value);
                }
            }
        }

        self.filters.push(filter);
        self
    }

    /// Filter with an explicit comparison
    pub fn filter_by_cmp(
        mut self,
        column: &str,
        value: impl Into<FilterValue>,
        comparison: Comparison,
    ) -> Result<Self> {
        if comparison == Comparison::Eq {
            return Ok(self.filter_by(column, value));
        }
        let filter = Filter::compare(&self.qualify(column), value.into(), comparison)?;
        self.filters.push(filter);
        Ok(self)
    }

    pub fn filter_by_id(self, id: impl Into<FilterValue>) -> Self {
        self.filter_by("id", id)
    }

    /// Raw predicate with positional `?` parameters, ANDed with the rest
    pub fn where_raw(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.filters.push(Filter::raw(sql, params));
        self
    }

    /// Join `table`, optionally aliased
    ///
    /// Without an explicit `condition`, the ON clause is inferred from the
    /// foreign key naming convention in either direction.
    pub fn join(
        mut self,
        kind: JoinKind,
        table: &str,
        alias: Option<&str>,
        condition: Option<&str>,
    ) -> Result<Self> {
        let table = relation::normalize(table);
        validate_identifier(&table).map_err(Error::query_state)?;
        if let Some(alias) = alias {
            validate_identifier(alias).map_err(Error::query_state)?;
        }

        let joined_reference = alias.unwrap_or(&table);
        let condition = match condition {
            Some(condition) => condition.to_string(),
            None => relation::join_condition(
                &self.session,
                &self.table,
                self.reference(),
                &table,
                joined_reference,
            )?
            .ok_or_else(|| Error::join_condition(&self.table, &table))?,
        };

        self.joins.push(Join {
            kind,
            table,
            alias: alias.map(str::to_string),
            condition,
        });
        Ok(self)
    }

    pub fn inner_join(self, table: &str, alias: Option<&str>, condition: Option<&str>) -> Result<Self> {
        self.join(JoinKind::Inner, table, alias, condition)
    }

    pub fn left_join(self, table: &str, alias: Option<&str>, condition: Option<&str>) -> Result<Self> {
        self.join(JoinKind::Left, table, alias, condition)
    }

    pub fn right_join(self, table: &str, alias: Option<&str>, condition: Option<&str>) -> Result<Self> {
        self.join(JoinKind::Right, table, alias, condition)
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order.push((column.to_string(), direction));
        self
    }

    pub fn group_by(mut self, column: &str) -> Self {
        self.group.push(column.to_string());
        self
    }

    /// Raw HAVING predicate
    pub fn having(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.having.push(Filter::raw(sql, params));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Select a computed expression as a virtual column named `alias`
    pub fn with_column(mut self, sql: impl Into<String>, alias: &str) -> Self {
        self.columns.push((sql.into(), alias.to_string()));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    // ========================================================================
    // SQL Rendering
    // ========================================================================

    /// SELECT text and parameters for the current state
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        self.render(Projection::Rows, true)
    }

    fn render(&self, projection: Projection, windowed: bool) -> (String, Vec<Value>) {
        let reference = quote_identifier(self.reference());

        let select = match projection {
            Projection::Rows => std::iter::once(format!("{}.*", reference))
                .chain(
                    self.columns
                        .iter()
                        .map(|(sql, alias)| format!("({}) AS {}", sql, quote_identifier(alias))),
                )
                .collect::<Vec<_>>()
                .join(", "),
            Projection::Ids => format!("{}.\"id\"", reference),
        };

        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if self.distinct { "DISTINCT " } else { "" },
            select,
            quote_identifier(&self.table)
        );
        if self.alias.is_some() {
            sql.push_str(&format!(" AS {}", reference));
        }

        for join in &self.joins {
            sql.push_str(&format!(" {} {}", join.kind.as_sql(), quote_identifier(&join.table)));
            if let Some(alias) = &join.alias {
                sql.push_str(&format!(" AS {}", quote_identifier(alias)));
            }
            sql.push_str(&format!(" ON {}", join.condition));
        }

        let mut params = Vec::new();

        if let Some((clause, where_params)) = build_condition_clause(&self.filters) {
            sql.push_str(&format!(" WHERE {}", clause));
            params.extend(where_params);
        }

        if !self.group.is_empty() {
            let group = self
                .group
                .iter()
                .map(|column| quote_qualified(column))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" GROUP BY {}", group));
        }

        if let Some((clause, having_params)) = build_condition_clause(&self.having) {
            sql.push_str(&format!(" HAVING {}", clause));
            params.extend(having_params);
        }

        if windowed {
            if let Some(order) = build_order_by_clause(&self.order) {
                sql.push_str(&format!(" ORDER BY {}", order));
            }
            // SQLite reads LIMIT and OFFSET as signed 64-bit integers
            let clamp = |n: u64| n.min(i64::MAX as u64);
            match (self.limit.map(clamp), self.offset.map(clamp)) {
                (Some(limit), Some(offset)) => {
                    sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
                }
                (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
                (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
                (None, None) => {}
            }
        }

        (sql, params)
    }

    /// Whether bulk statements need a WHERE scope
    fn is_scoped(&self) -> bool {
        !self.filters.is_empty()
            || !self.joins.is_empty()
            || !self.having.is_empty()
            || self.limit.is_some()
            || self.offset.is_some()
    }

    /// `WHERE "id" IN (...)` scope for bulk statements, empty when unscoped
    fn bulk_scope(&self) -> (String, Vec<Value>) {
        if !self.is_scoped() {
            return (String::new(), Vec::new());
        }
        let (select, params) = self.render(Projection::Ids, true);
        (format!(" WHERE \"id\" IN ({})", select), params)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Every matching row as an entity, in query order
    pub fn find(self) -> Result<EntitySet> {
        let schema = self.session.schema(&self.table)?;
        let (sql, params) = self.to_sql();
        let rows = self.session.with_db(|db| db.fetch_all(&sql, &params))?;

        let entities = rows
            .into_iter()
            .map(|row| self.session.materialize(&schema, row))
            .collect::<Result<Vec<_>>>()?;

        tracing::trace!(table = %self.table, rows = entities.len(), "Materialized rows");
        Ok(EntitySet::from_entities(&self.table, entities))
    }

    /// First matching row, if any
    pub fn find_one(self) -> Result<Option<Entity>> {
        Ok(self.limit(1).find()?.into_iter().next())
    }

    /// First matching row, or a new unsaved entity seeded from the exact
    /// equality filters
    ///
    /// Membership, range and raw filters do not seed the new entity, nor
    /// does an `id` filter.
    pub fn find_one_or_create(self) -> Result<Entity> {
        let session = self.session.clone();
        let schema = session.schema(&self.table)?;

        let seed: Record = self
            .filters
            .iter()
            .filter_map(Filter::exact)
            .filter(|(column, _)| *column != "id" && schema.has_column(column))
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect();

        let table = self.table.clone();
        match self.find_one()? {
            Some(entity) => Ok(entity),
            None => session.create(&table, seed),
        }
    }

    /// Number of matching rows; order, limit and offset are ignored
    pub fn count(self) -> Result<u64> {
        let (inner, params) = self.render(Projection::Rows, false);
        let sql = format!("SELECT COUNT(*) AS \"count\" FROM ({}) AS \"counted\"", inner);

        let row = self.session.with_db(|db| db.fetch_one(&sql, &params))?;
        let count = row
            .as_ref()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Whether at least one row matches
    pub fn exists(self) -> Result<bool> {
        let query = self.limit(1);
        let (inner, params) = query.render(Projection::Ids, true);
        let sql = format!("SELECT EXISTS ({}) AS \"found\"", inner);
        let row = query.session.with_db(|db| db.fetch_one(&sql, &params))?;
        Ok(row
            .as_ref()
            .and_then(|row| row.get("found"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Bulk UPDATE of every matching row; returns the affected row count
    ///
    /// Entities already loaded are neither refreshed nor evicted.
    pub fn update(self, values: Record) -> Result<u64> {
        if values.is_empty() {
            return Err(Error::query_state("Bulk update requires at least one column"));
        }

        let assignments = values
            .columns()
            .map(|column| format!("{} = ?", quote_identifier(&relation::normalize(column))))
            .collect::<Vec<_>>()
            .join(", ");
        let mut params: Vec<Value> = values.values().map(Value::to_storage).collect();

        let (scope, scope_params) = self.bulk_scope();
        params.extend(scope_params);

        let sql = format!(
            "UPDATE {} SET {}{}",
            quote_identifier(&self.table),
            assignments,
            scope
        );
        let affected = self.session.with_db(|db| db.execute(&sql, &params))?;
        tracing::debug!(table = %self.table, affected, "Bulk update");
        Ok(affected)
    }

    /// Bulk DELETE of every matching row; returns the affected row count
    ///
    /// Entities already loaded stay in the identity cache.
    pub fn delete(self) -> Result<u64> {
        let (scope, params) = self.bulk_scope();
        let sql = format!("DELETE FROM {}{}", quote_identifier(&self.table), scope);
        let affected = self.session.with_db(|db| db.execute(&sql, &params))?;
        tracing::debug!(table = %self.table, affected, "Bulk delete");
        Ok(affected)
    }

    /// Delete every row of the table, ignoring filters, and evict its cached entities
    pub fn truncate(self) -> Result<u64> {
        let sql = format!("DELETE FROM {}", quote_identifier(&self.table));
        let affected = self.session.with_db(|db| db.execute(&sql, &[]))?;
        let evicted = self.session.evict_table(&self.table);
        tracing::debug!(table = %self.table, affected, evicted, "Truncated table");
        Ok(affected)
    }

    /// Visit matching rows in batches of `size`
    ///
    /// The callback receives each non-empty batch and its 1-based index.
    /// Iteration stops at the first empty batch. Returns the number of
    /// batches visited.
    pub fn chunk(
        self,
        size: u64,
        callback: impl FnMut(&EntitySet, usize) -> Result<()>,
    ) -> Result<usize> {
        self.run_chunks(size, true, callback)
    }

    /// Like [`QueryBuilder::chunk`], but every batch reads the same window
    ///
    /// For callbacks that delete or alter the rows they receive so that
    /// they stop matching. A callback that does neither never terminates.
    pub fn chunk_without_offset_increase(
        self,
        size: u64,
        callback: impl FnMut(&EntitySet, usize) -> Result<()>,
    ) -> Result<usize> {
        self.run_chunks(size, false, callback)
    }

    fn run_chunks(
        self,
        size: u64,
        advance: bool,
        mut callback: impl FnMut(&EntitySet, usize) -> Result<()>,
    ) -> Result<usize> {
        if size == 0 {
            return Err(Error::query_state("Chunk size must be greater than zero"));
        }

        let start = self.offset.unwrap_or(0);
        let mut index = 0usize;
        loop {
            let offset = if advance {
                (index as u64).saturating_mul(size).saturating_add(start)
            } else {
                start
            };
            let batch = self.clone().offset(offset).limit(size).find()?;
            if batch.is_empty() {
                break;
            }
            index += 1;
            callback(&batch, index)?;
        }
        Ok(index)
    }

    /// One page of results plus the total count
    ///
    /// `page` is 1-based. A page past the end has no results.
    pub fn paginate(self, page: u64, per_page: u64) -> Result<Pager> {
        if page < 1 {
            return Err(Error::query_state("Page numbers start at 1"));
        }
        if per_page == 0 {
            return Err(Error::query_state("Page size must be greater than zero"));
        }

        let total = self.clone().count()?;
        let results = self
            .offset((page - 1).saturating_mul(per_page))
            .limit(per_page).find()?;
        Ok(Pager::new(page, per_page, total, results))
    }
}

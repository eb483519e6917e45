//! Session - the mapper context
//!
//! A [`Session`] owns the database connection, the schema catalog, the
//! identity cache and the class registry. Entities and query builders hold
//! a handle back to the session that produced them; there is no global
//! state, and two sessions never share cached entities.

use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::cache::IdentityCache;
use crate::collection::EntitySet;
use crate::config::SessionConfig;
use crate::database::{Database, LoggedQuery, LoggingDatabase, QueryLog, SqliteDatabase};
use crate::entity::{Entity, EntityInner};
use crate::error::{Error, Result};
use crate::query::QueryBuilder;
use crate::registry::{EntityClass, QueryClass, Registry};
use crate::relation::{self, SchemaView};
use crate::schema::{SchemaCatalog, TableSchema};
use crate::types::{Record, Value};

pub(crate) struct SessionInner {
    config: SessionConfig,
    db: RefCell<LoggingDatabase>,
    catalog: RefCell<SchemaCatalog>,
    cache: RefCell<IdentityCache>,
    registry: RefCell<Registry>,
    pooling: Cell<bool>,
    depth: Cell<u32>,
    /// Every entity built by this session, pooled or not
    tracked: RefCell<Vec<Weak<EntityInner>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        // Loaded relations can link entities to each other in cycles
        self.cache.get_mut().drain();
        let tracked = std::mem::take(self.tracked.get_mut());
        let live: Vec<Entity> = tracked.iter().filter_map(Entity::upgrade).collect();
        for entity in &live {
            entity.release();
        }
        tracing::trace!(entities = live.len(), "Released session entities");
    }
}

/// Shared handle to a mapper session
///
/// Cloning is cheap; all clones share the same connection and caches.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("database_url", &self.inner.config.database_url)
            .field("instance_pooling", &self.inner.pooling.get())
            .field("transaction_depth", &self.inner.depth.get())
            .finish()
    }
}

impl Session {
    /// Open the SQLite database named by `config.database_url`
    pub fn connect(config: SessionConfig) -> Result<Self> {
        let db = SqliteDatabase::connect(&config.database_url)?;
        tracing::info!(url = %config.database_url, "Connected");
        Ok(Self::with_database(Box::new(db), config))
    }

    /// Session over an already open connection
    pub fn with_database(db: Box<dyn Database>, config: SessionConfig) -> Self {
        let log = QueryLog::new(config.query_logging, config.query_log_capacity);
        let registry = Registry::new(config.namespace.clone());

        Self {
            inner: Rc::new(SessionInner {
                pooling: Cell::new(config.instance_pooling),
                db: RefCell::new(LoggingDatabase::new(db, log)),
                catalog: RefCell::new(SchemaCatalog::new()),
                cache: RefCell::new(IdentityCache::new()),
                registry: RefCell::new(registry),
                depth: Cell::new(0),
                tracked: RefCell::new(Vec::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub(crate) fn from_inner(inner: Rc<SessionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Rc::downgrade(&self.inner)
    }

    fn db(&self) -> Result<RefMut<'_, LoggingDatabase>> {
        self.inner
            .db
            .try_borrow_mut()
            .map_err(|_| Error::database("Connection is already in use"))
    }

    /// Run `f` against the connection
    pub(crate) fn with_db<T>(&self, f: impl FnOnce(&mut dyn Database) -> Result<T>) -> Result<T> {
        let mut db = self.db()?;
        f(&mut *db)
    }

    // ========================================================================
    // Entry Points
    // ========================================================================

    /// New entity of `table` from column values
    ///
    /// With instance pooling on, values carrying the id of a cached row
    /// return that cached entity unchanged.
    pub fn create(&self, table: &str, data: Record) -> Result<Entity> {
        let table = relation::normalize(table);
        let schema = self.schema(&table)?;

        if self.instance_pooling() {
            if let Some(id) = data.get("id").and_then(Value::as_id) {
                if let Some(cached) = self.cached(&table, id) {
                    return Ok(cached);
                }
            }
        }

        let entity = Entity::new(self, schema, data)?;
        if self.instance_pooling() {
            self.register(&entity);
        }
        self.initialize(&entity)?;
        Ok(entity)
    }

    /// New entity of `table` from a JSON object
    pub fn create_from_json(&self, table: &str, data: serde_json::Value) -> Result<Entity> {
        let record = Record::from_json(data).map_err(|message| Error::invalid_value(table, "*", message))?;
        self.create(table, record)
    }

    /// Empty set bound to `table`
    pub fn collection(&self, table: &str) -> Result<EntitySet> {
        let table = relation::normalize(table);
        self.schema(&table)?;
        Ok(EntitySet::new(table))
    }

    /// Set of new entities, one per record
    pub fn collection_from(&self, table: &str, records: Vec<Record>) -> Result<EntitySet> {
        let mut set = self.collection(table)?;
        for record in records {
            set.add(self.create(table, record)?)?;
        }
        Ok(set)
    }

    /// Query builder for `table`, with its registered query scope applied
    pub fn query(&self, table: &str) -> QueryBuilder {
        let builder = QueryBuilder::new(self.clone(), table);
        let class = self.inner.registry.borrow().query_class(builder.table());
        match class {
            Some(class) => class.prepare(builder),
            None => builder,
        }
    }

    /// Run `f` inside a transaction
    ///
    /// Nested calls join the outermost transaction. The outermost call
    /// commits when `f` succeeds and rolls back when it fails.
    pub fn transaction<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let depth = self.inner.depth.get();
        if depth == 0 {
            self.db()?.begin_transaction()?;
        }

        self.inner.depth.set(depth + 1);
        let result = f();
        self.inner.depth.set(depth);

        if depth > 0 {
            return result;
        }

        match result {
            Ok(value) => {
                self.db()?.commit()?;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Transaction failed, rolling back");
                if let Err(rollback_err) = self.db().and_then(|mut db| db.rollback()) {
                    tracing::error!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Column metadata of `table`
    pub fn schema(&self, table: &str) -> Result<Rc<TableSchema>> {
        let mut db = self.db()?;
        self.inner
            .catalog
            .borrow_mut()
            .table(&mut *db, &relation::normalize(table))
    }

    pub fn tables(&self) -> Result<Vec<String>> {
        let mut db = self.db()?;
        Ok(self.inner.catalog.borrow_mut().tables(&mut *db)?.to_vec())
    }

    /// Forget introspected metadata, e.g. after DDL
    pub fn invalidate_schema(&self) {
        self.inner.catalog.borrow_mut().invalidate();
    }

    /// Execute a raw statement through the logged connection
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.db()?.execute(sql, params)
    }

    /// Run a raw query through the logged connection
    pub fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        self.db()?.fetch_all(sql, params)
    }

    // ========================================================================
    // Identity Cache
    // ========================================================================

    pub fn cache_len(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    /// Drop every cached entity; later loads build fresh instances
    pub fn clear_cache(&self) {
        let drained = self.inner.cache.borrow_mut().drain();
        tracing::debug!(entities = drained.len(), "Cleared identity cache");
    }

    pub fn instance_pooling(&self) -> bool {
        self.inner.pooling.get()
    }

    /// Switch the identity cache on or off for later loads
    ///
    /// Unpooled entities are still released when the session is dropped.
    pub fn set_instance_pooling(&self, enabled: bool) {
        self.inner.pooling.set(enabled);
    }

    /// Remember `entity` so dropping the session can break its relation cycles
    pub(crate) fn track(&self, entity: &Entity) {
        let mut tracked = self.inner.tracked.borrow_mut();
        if tracked.len() == tracked.capacity() {
            tracked.retain(|inner| inner.strong_count() > 0);
        }
        tracked.push(entity.downgrade());
    }

    pub(crate) fn cached(&self, table: &str, id: i64) -> Option<Entity> {
        self.inner.cache.borrow().get(table, id)
    }

    pub(crate) fn register(&self, entity: &Entity) {
        if self.instance_pooling() {
            self.inner.cache.borrow_mut().insert(entity);
        }
    }

    pub(crate) fn evict(&self, table: &str, id: i64) {
        self.inner.cache.borrow_mut().evict(table, id);
    }

    pub(crate) fn evict_table(&self, table: &str) -> usize {
        self.inner.cache.borrow_mut().evict_table(table)
    }

    /// Entity for a fetched row, reusing the cached instance when pooling
    ///
    /// A reused entity keeps its in-memory column values; computed columns
    /// it does not have yet are added.
    pub(crate) fn materialize(&self, schema: &Rc<TableSchema>, row: Record) -> Result<Entity> {
        if self.instance_pooling() {
            if let Some(id) = row.get("id").and_then(Value::as_id) {
                if let Some(cached) = self.cached(&schema.name, id) {
                    let computed: Record = row
                        .into_iter()
                        .filter(|(column, _)| !schema.has_column(column))
                        .collect();
                    cached.fill_virtual(computed);
                    return Ok(cached);
                }
            }
        }

        let entity = Entity::hydrate(self, Rc::clone(schema), row);
        self.register(&entity);
        self.initialize(&entity)?;
        Ok(entity)
    }

    // ========================================================================
    // Registry
    // ========================================================================

    pub fn register_entity_class(&self, name: impl Into<String>, class: impl EntityClass + 'static) {
        self.inner
            .registry
            .borrow_mut()
            .register_entity_class(name, Rc::new(class));
    }

    pub fn register_query_class(&self, name: impl Into<String>, class: impl QueryClass + 'static) {
        self.inner
            .registry
            .borrow_mut()
            .register_query_class(name, Rc::new(class));
    }

    pub(crate) fn entity_class(&self, table: &str) -> Option<Rc<dyn EntityClass>> {
        self.inner.registry.borrow().entity_class(table)
    }

    fn initialize(&self, entity: &Entity) -> Result<()> {
        match self.entity_class(entity.table()) {
            Some(class) => class.initialize(entity),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Query Log
    // ========================================================================

    /// Statements executed since the session opened or the log was cleared
    pub fn total_queries(&self) -> u64 {
        self.inner.db.borrow().log().total()
    }

    /// The last `n` logged statements, oldest first
    pub fn last_queries(&self, n: usize) -> Vec<LoggedQuery> {
        self.inner.db.borrow().log().last(n)
    }

    pub fn clear_query_log(&self) {
        self.inner.db.borrow_mut().log_mut().clear();
    }

    pub fn set_query_logging(&self, enabled: bool) {
        self.inner.db.borrow_mut().log_mut().set_enabled(enabled);
    }
}

impl SchemaView for Session {
    fn has_table(&self, table: &str) -> Result<bool> {
        let mut db = self.db()?;
        self.inner.catalog.borrow_mut().has_table(&mut *db, table)
    }

    fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let mut db = self.db()?;
        self.inner
            .catalog
            .borrow_mut()
            .has_column(&mut *db, table, column)
    }
}

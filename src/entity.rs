//! Entity - dynamically typed row proxy
//!
//! An [`Entity`] is a shared handle to one row of one table. Column values
//! live in an ordered [`Record`]; relations (parent, children, peers) are
//! discovered by naming convention and memoized on first access. Related
//! rows touched by relation mutators are queued on the owning entity and
//! written by the next [`Entity::save`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};

use crate::collection::EntitySet;
use crate::error::{Error, Result};
use crate::relation::{self, Relation};
use crate::schema::TableSchema;
use crate::session::{Session, SessionInner};
use crate::sql::{Comparison, FilterValue};
use crate::types::{ColumnInfo, Record, Value};
use crate::unit_of_work::{Identity, UnitOfWork};

// ============================================================================
// Field
// ============================================================================

/// What a name resolves to on an entity
#[derive(Debug, Clone)]
pub enum Field {
    /// A real or virtual column value
    Value(Value),
    /// The parent row, if the foreign key is set
    Parent(Option<Entity>),
    /// Rows of a child table referencing this one
    Children(EntitySet),
    /// Rows linked through a junction table
    Peers(EntitySet),
}

impl Field {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Field::Parent(parent) => parent,
            _ => None,
        }
    }

    pub fn into_set(self) -> Option<EntitySet> {
        match self {
            Field::Children(set) | Field::Peers(set) => Some(set),
            _ => None,
        }
    }
}

macro_rules! field_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Field {
                fn from(v: $ty) -> Self {
                    Field::Value(Value::from(v))
                }
            }
        )*
    };
}

field_from_value!(
    Value,
    i64,
    i32,
    u32,
    f64,
    bool,
    &str,
    String,
    &String,
    NaiveDate,
    NaiveDateTime,
    Vec<u8>
);

impl<T: Into<Value>> From<Option<T>> for Field {
    fn from(v: Option<T>) -> Self {
        Field::Value(Value::from(v))
    }
}

impl From<Entity> for Field {
    fn from(entity: Entity) -> Self {
        Field::Parent(Some(entity))
    }
}

impl From<&Entity> for Field {
    fn from(entity: &Entity) -> Self {
        Field::Parent(Some(entity.clone()))
    }
}

impl From<EntitySet> for Field {
    fn from(set: EntitySet) -> Self {
        Field::Children(set)
    }
}

impl From<&EntitySet> for Field {
    fn from(set: &EntitySet) -> Self {
        Field::Children(set.clone())
    }
}

// ============================================================================
// Entity State
// ============================================================================

enum ParentSlot {
    /// Resolved: the foreign key is null or points nowhere
    Empty,
    /// Back reference; reloaded from the foreign key if the parent was dropped
    Linked(Weak<EntityInner>),
}

/// Loaded peers of one junction relation, each with its junction row
#[derive(Default)]
struct PeerMemo {
    members: Vec<(Entity, Entity)>,
}

impl PeerMemo {
    fn position(&self, peer: &Entity) -> Option<usize> {
        self.members
            .iter()
            .position(|(member, _)| member.ptr_eq(peer))
            .or_else(|| {
                self.members
                    .iter()
                    .position(|(member, _)| member.same_row(peer))
            })
    }
}

#[derive(Default)]
struct EntityState {
    data: Record,
    persisted: Option<Record>,
    virtual_data: Record,
    parents: HashMap<String, ParentSlot>,
    children: HashMap<String, EntitySet>,
    peers: HashMap<String, PeerMemo>,
    pending: UnitOfWork<Entity>,
}

pub(crate) struct EntityInner {
    session: Weak<SessionInner>,
    table: String,
    schema: Rc<TableSchema>,
    state: RefCell<EntityState>,
}

/// Shared handle to one row
///
/// Cloning the handle does not copy the row: every clone observes the same
/// state. Equality is reference identity.
#[derive(Clone)]
pub struct Entity(Rc<EntityInner>);

impl Identity for Entity {
    fn is_same(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Entity {}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Entity");
        s.field("table", &self.0.table);
        match self.0.state.try_borrow() {
            Ok(state) => s.field("data", &state.data),
            Err(_) => s.field("data", &"<borrowed>"),
        };
        s.finish()
    }
}

impl Entity {
    // ========================================================================
    // Construction
    // ========================================================================

    /// New entity: column defaults first, then `data` on top
    pub(crate) fn new(session: &Session, schema: Rc<TableSchema>, data: Record) -> Result<Entity> {
        let entity = Entity(Rc::new(EntityInner {
            session: session.downgrade(),
            table: schema.name.clone(),
            state: RefCell::new(EntityState {
                data: schema.defaults(),
                ..EntityState::default()
            }),
            schema,
        }));
        session.track(&entity);

        for (column, value) in data {
            let column = relation::normalize(&column);
            if !entity.0.schema.has_column(&column) {
                return Err(Error::unknown_column(entity.table(), column));
            }
            entity.set_column(&column, value)?;
        }

        // Rows supplied with an id are taken as already persisted
        if entity.id().is_some() {
            entity.mark_persisted();
        }

        Ok(entity)
    }

    /// Entity for a row read from storage
    ///
    /// Columns outside the table schema (computed select expressions) land in
    /// the virtual column bag. A stored value that does not convert to its
    /// column type is kept as read, with a warning.
    pub(crate) fn hydrate(session: &Session, schema: Rc<TableSchema>, row: Record) -> Entity {
        let mut data = Record::new();
        let mut virtual_data = Record::new();

        for (column, value) in row {
            match schema.column(&column) {
                Some(info) => {
                    let converted = from_storage(&schema.name, info, value);
                    data.insert(column, converted);
                }
                None => {
                    virtual_data.insert(column, value);
                }
            }
        }

        let entity = Entity(Rc::new(EntityInner {
            session: session.downgrade(),
            table: schema.name.clone(),
            state: RefCell::new(EntityState {
                persisted: Some(data.clone()),
                data,
                virtual_data,
                ..EntityState::default()
            }),
            schema,
        }));
        session.track(&entity);
        entity
    }

    pub(crate) fn downgrade(&self) -> Weak<EntityInner> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(inner: &Weak<EntityInner>) -> Option<Entity> {
        inner.upgrade().map(Entity)
    }

    fn mark_persisted(&self) {
        let mut state = self.0.state.borrow_mut();
        state.persisted = Some(state.data.clone());
    }

    // ========================================================================
    // Identity & State
    // ========================================================================

    pub fn table(&self) -> &str {
        &self.0.table
    }

    /// Column metadata of the entity's table
    pub fn schema(&self) -> &TableSchema {
        &self.0.schema
    }

    pub fn session(&self) -> Result<Session> {
        self.0
            .session
            .upgrade()
            .map(Session::from_inner)
            .ok_or(Error::SessionClosed)
    }

    /// Row id; `None` until persisted
    pub fn id(&self) -> Option<i64> {
        self.0
            .state
            .borrow()
            .data
            .get("id")
            .and_then(Value::as_id)
    }

    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    /// True when new, or when a column differs from the last persisted value
    pub fn is_modified(&self) -> bool {
        let state = self.0.state.borrow();
        match &state.persisted {
            None => true,
            Some(_) if self.is_new_in(&state) => true,
            Some(persisted) => state
                .data
                .iter()
                .any(|(column, value)| persisted.get(column) != Some(value)),
        }
    }

    fn is_new_in(&self, state: &EntityState) -> bool {
        state.data.get("id").and_then(Value::as_id).is_none()
    }

    /// Same in-memory instance
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Same persisted row (table and id), possibly a different instance
    pub fn same_row(&self, other: &Entity) -> bool {
        self.ptr_eq(other)
            || (self.table() == other.table() && self.id().is_some() && self.id() == other.id())
    }

    /// Number of queued cascade operations
    pub fn pending_operations(&self) -> usize {
        self.0.state.borrow().pending.len()
    }

    // ========================================================================
    // Field Access
    // ========================================================================

    /// Resolve `name` as a column, virtual column, parent, children or peers
    pub fn get(&self, name: &str) -> Result<Field> {
        let name = relation::normalize(name);

        if let Some(value) = self.column_value(&name) {
            return Ok(Field::Value(value));
        }

        let session = self.session()?;
        match relation::resolve(&session, self.table(), &name)? {
            Some(Relation::Parent { table, .. }) => Ok(Field::Parent(self.parent(&table)?)),
            Some(Relation::Children { table, .. }) => Ok(Field::Children(self.children(&table)?)),
            Some(Relation::Peers { table, .. }) => Ok(Field::Peers(self.foreign_objects(&table)?)),
            None => Err(Error::unknown_column(self.table(), name)),
        }
    }

    /// Value of a real or virtual column
    pub fn value(&self, name: &str) -> Result<Value> {
        let name = relation::normalize(name);
        self.column_value(&name)
            .ok_or_else(|| Error::unknown_column(self.table(), name))
    }

    fn column_value(&self, column: &str) -> Option<Value> {
        let state = self.0.state.borrow();
        state
            .data
            .get(column)
            .or_else(|| state.virtual_data.get(column))
            .cloned()
    }

    /// Value of a computed column attached by a query
    pub fn virtual_value(&self, name: &str) -> Option<Value> {
        self.0.state.borrow().virtual_data.get(name).cloned()
    }

    pub fn virtual_data(&self) -> Record {
        self.0.state.borrow().virtual_data.clone()
    }

    pub(crate) fn fill_virtual(&self, values: Record) {
        let mut state = self.0.state.borrow_mut();
        for (column, value) in values {
            if !state.virtual_data.contains(&column) {
                state.virtual_data.insert(column, value);
            }
        }
    }

    /// Whether `name` is a column, virtual column or resolvable relation
    pub fn has(&self, name: &str) -> Result<bool> {
        let name = relation::normalize(name);
        if self.column_value(&name).is_some() {
            return Ok(true);
        }
        let session = self.session()?;
        Ok(relation::resolve(&session, self.table(), &name)?.is_some())
    }

    /// Assign a column, or link a relation
    ///
    /// A `Null` value (or `Field::Parent(None)`) on a parent relation clears
    /// the parent; an entity links it. A set assigned to a children relation
    /// adds its members; assigned to a peer relation it replaces the peers.
    pub fn set(&self, name: &str, value: impl Into<Field>) -> Result<()> {
        let name = relation::normalize(name);
        let field = value.into();

        if self.0.schema.has_column(&name) {
            return match field {
                Field::Value(value) => self.set_column(&name, value),
                _ => Err(Error::invalid_value(
                    self.table(),
                    name,
                    "a column only accepts a scalar value",
                )),
            };
        }

        let session = self.session()?;
        let relation = relation::resolve(&session, self.table(), &name)?
            .ok_or_else(|| Error::unknown_column(self.table(), &name))?;

        match (relation, field) {
            (Relation::Parent { table, .. }, Field::Value(Value::Null))
            | (Relation::Parent { table, .. }, Field::Parent(None)) => self.remove_parent(&table),
            (Relation::Parent { table, .. }, Field::Parent(Some(parent))) => {
                if parent.table() != table {
                    return Err(Error::relation_mismatch(table, parent.table()));
                }
                self.set_parent(&parent)
            }
            (Relation::Children { table, .. }, Field::Children(mut set) | Field::Peers(mut set)) => {
                if set.table() != table {
                    return Err(Error::relation_mismatch(table, set.table()));
                }
                self.set_children(&mut set)
            }
            (Relation::Peers { table, .. }, Field::Children(set) | Field::Peers(set)) => {
                if set.table() != table {
                    return Err(Error::relation_mismatch(table, set.table()));
                }
                self.set_foreign_objects(&set)
            }
            (relation, _) => Err(Error::invalid_value(
                self.table(),
                name,
                format!("relation to \"{}\" does not accept this value", relation.table()),
            )),
        }
    }

    /// Store a converted column value
    fn set_column(&self, column: &str, value: Value) -> Result<()> {
        let info = self
            .0
            .schema
            .column(column)
            .ok_or_else(|| Error::unknown_column(self.table(), column))?;

        let converted = info
            .column_type
            .to_application(&value)
            .map_err(|message| Error::invalid_value(self.table(), column, message))?;

        if column == "id" {
            if let Some(current) = self.id() {
                if converted.as_id() != Some(current) {
                    return Err(Error::invalid_value(
                        self.table(),
                        column,
                        "id of a persisted row cannot change",
                    ));
                }
            }
        }

        // A changed foreign key invalidates the memoized parent
        if let Some(parent_table) = column.strip_suffix("_id") {
            if self.parent_slot_is_stale(parent_table, &converted) {
                self.0.state.borrow_mut().parents.remove(parent_table);
            }
        }

        self.0.state.borrow_mut().data.insert(column, converted);
        Ok(())
    }

    fn parent_slot_is_stale(&self, parent_table: &str, foreign_key: &Value) -> bool {
        let linked = match self.0.state.borrow().parents.get(parent_table) {
            Some(ParentSlot::Linked(weak)) => weak.upgrade().map(Entity),
            Some(ParentSlot::Empty) => return !foreign_key.is_null(),
            None => return false,
        };
        linked.is_none_or(|parent| parent.id() != foreign_key.as_id())
    }

    /// Reset a column to its declared default
    pub fn unset(&self, name: &str) -> Result<()> {
        let name = relation::normalize(name);
        let default = self
            .0
            .schema
            .column(&name)
            .map(|c| c.default.clone())
            .ok_or_else(|| Error::unknown_column(self.table(), &name))?;
        self.set_column(&name, default)
    }

    /// Assign several columns at once
    pub fn from_record(&self, values: Record) -> Result<()> {
        for (column, value) in values {
            self.set(&column, value)?;
        }
        Ok(())
    }

    /// Copy of the real column values
    pub fn to_record(&self) -> Record {
        self.0.state.borrow().data.clone()
    }

    /// Columns and virtual columns as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let state = self.0.state.borrow();
        let mut json = state.data.to_json();
        if let (Some(object), serde_json::Value::Object(extra)) =
            (json.as_object_mut(), state.virtual_data.to_json())
        {
            for (key, value) in extra {
                object.entry(key).or_insert(value);
            }
        }
        json
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Persist this row and cascade queued operations, in one transaction
    ///
    /// The own row is written first. The cascade then runs breadth-first:
    /// for each entity, its queued deletes run before its queued saves, and
    /// each saved entity's own queue is processed in turn. Every entity is
    /// written at most once per call.
    pub fn save(&self) -> Result<Entity> {
        let session = self.session()?;

        session.transaction(|| {
            let mut written: HashSet<*const EntityInner> = HashSet::new();
            let mut queue = VecDeque::new();

            self.write_row(&session)?;
            written.insert(Rc::as_ptr(&self.0));
            queue.push_back(self.clone());

            while let Some(entity) = queue.pop_front() {
                let (deletes, saves) = entity.0.state.borrow_mut().pending.take();
                if !deletes.is_empty() || !saves.is_empty() {
                    tracing::trace!(
                        table = %entity.table(),
                        id = ?entity.id(),
                        deletes = deletes.len(),
                        saves = saves.len(),
                        "Cascading"
                    );
                }

                for target in deletes {
                    target.delete()?;
                }

                for target in saves {
                    if written.insert(Rc::as_ptr(&target.0)) {
                        target.write_row(&session)?;
                        queue.push_back(target);
                    }
                }
            }

            Ok(self.clone())
        })
    }

    /// Insert or update the own row only
    fn write_row(&self, session: &Session) -> Result<()> {
        if let Some(class) = session.entity_class(self.table()) {
            class.before_save(self)?;
        }

        let auto = session.config().auto_columns.clone();
        let now = now();

        if self.is_new() {
            if auto.created_at {
                self.stamp("created_at", now)?;
            }
            if auto.updated_at {
                self.stamp("updated_at", now)?;
            }

            let mut values = self.to_record();
            values.remove("id");

            let id = session.with_db(|db| {
                db.insert(self.table(), &values)?;
                db.last_insert_id()
            })?;

            self.0.state.borrow_mut().data.insert("id", id);
            self.mark_persisted();
            session.register(self);
            tracing::debug!(table = %self.table(), id, "Inserted row");
        } else if self.is_modified() {
            if auto.updated_at {
                self.stamp("updated_at", now)?;
            }

            let (changes, id) = {
                let state = self.0.state.borrow();
                let persisted = state.persisted.clone().unwrap_or_default();
                let changes: Record = state
                    .data
                    .iter()
                    .filter(|(column, value)| persisted.get(column) != Some(*value))
                    .map(|(column, value)| (column, value.clone()))
                    .collect();
                (changes, state.data.get("id").cloned().unwrap_or_default())
            };

            session.with_db(|db| db.update(self.table(), &changes, &Record::new().with("id", id)))?;
            self.mark_persisted();
            tracing::debug!(table = %self.table(), id = ?self.id(), columns = changes.len(), "Updated row");
        }

        Ok(())
    }

    fn stamp(&self, column: &str, now: NaiveDateTime) -> Result<()> {
        if self.0.schema.has_column(column) {
            self.set_column(column, Value::DateTime(now))?;
        }
        Ok(())
    }

    /// Delete the backing row and evict it from the identity cache
    ///
    /// Does nothing for a new entity.
    pub fn delete(&self) -> Result<()> {
        let Some(id) = self.id() else {
            return Ok(());
        };

        let session = self.session()?;
        session.with_db(|db| db.delete(self.table(), &Record::new().with("id", id)))?;
        session.evict(self.table(), id);
        tracing::debug!(table = %self.table(), id, "Deleted row");
        Ok(())
    }

    /// Re-read the own row from storage, discarding unsaved changes
    pub fn reload(&self) -> Result<()> {
        let Some(id) = self.id() else {
            return Ok(());
        };

        let session = self.session()?;
        let sql = format!(
            "SELECT * FROM {} WHERE \"id\" = ?",
            crate::sql::quote_identifier(self.table())
        );
        let row = session
            .with_db(|db| db.fetch_one(&sql, &[Value::Integer(id)]))?
            .ok_or_else(|| {
                Error::query_state(format!(
                    "Row {} of \"{}\" no longer exists",
                    id,
                    self.table()
                ))
            })?;

        let mut state = self.0.state.borrow_mut();
        for (column, value) in row {
            if let Some(info) = self.0.schema.column(&column) {
                let converted = from_storage(self.table(), info, value);
                state.data.insert(column, converted);
            }
        }
        state.persisted = Some(state.data.clone());
        state.parents.clear();
        Ok(())
    }

    /// Drop memoized relations and queued operations
    pub(crate) fn release(&self) {
        if let Ok(mut state) = self.0.state.try_borrow_mut() {
            state.parents.clear();
            state.children.clear();
            state.peers.clear();
            state.pending.clear();
        }
    }

    // ========================================================================
    // Parent Relation
    // ========================================================================

    fn require_parent_column(&self, table: &str) -> Result<String> {
        let column = relation::parent_column(table);
        if !self.0.schema.has_column(&column) {
            return Err(Error::no_relation(self.table(), table));
        }
        Ok(column)
    }

    /// The parent row in `table`, loaded through the foreign key on first access
    pub fn parent(&self, table: &str) -> Result<Option<Entity>> {
        let table = relation::normalize(table);
        let column = self.require_parent_column(&table)?;

        let foreign_key = {
            let state = self.0.state.borrow();
            match state.parents.get(&table) {
                Some(ParentSlot::Empty) => return Ok(None),
                Some(ParentSlot::Linked(weak)) => {
                    if let Some(inner) = weak.upgrade() {
                        return Ok(Some(Entity(inner)));
                    }
                }
                None => {}
            }
            state.data.get(&column).and_then(Value::as_id)
        };

        let parent = match foreign_key {
            Some(id) => self.session()?.query(&table).filter_by_id(id).find_one()?,
            None => None,
        };

        let slot = match &parent {
            Some(parent) => ParentSlot::Linked(Rc::downgrade(&parent.0)),
            None => ParentSlot::Empty,
        };
        self.0.state.borrow_mut().parents.insert(table, slot);
        Ok(parent)
    }

    /// Link `parent`, persisting it first when new
    ///
    /// The entity is detached from its previous parent's loaded children and
    /// registered as a child of the new parent.
    pub fn set_parent(&self, parent: &Entity) -> Result<()> {
        let table = parent.table().to_string();
        let column = self.require_parent_column(&table)?;

        if parent.is_new() {
            parent.save()?;
        }

        if let Some(current) = self.parent(&table)? {
            if !current.ptr_eq(parent) {
                current.detach_child(self);
            }
        }

        self.set_column(&column, parent.id().into())?;
        self.0
            .state
            .borrow_mut()
            .parents
            .insert(table, ParentSlot::Linked(Rc::downgrade(&parent.0)));

        if !parent.has_child(self)? {
            parent.add_child(self)?;
        }
        Ok(())
    }

    /// Forget the memoized parent without touching the foreign key
    pub fn clear_parent(&self, table: &str) -> Result<()> {
        let table = relation::normalize(table);
        self.require_parent_column(&table)?;
        self.0
            .state
            .borrow_mut()
            .parents
            .insert(table, ParentSlot::Empty);
        Ok(())
    }

    /// Clear the parent and its foreign key
    pub fn remove_parent(&self, table: &str) -> Result<()> {
        let table = relation::normalize(table);
        let column = self.require_parent_column(&table)?;

        if let Some(current) = self.parent(&table)? {
            current.detach_child(self);
        }

        self.set_column(&column, Value::Null)?;
        self.clear_parent(&table)
    }

    // ========================================================================
    // Children Relation
    // ========================================================================

    fn children_relation(&self, table: &str) -> Result<(String, String)> {
        let session = self.session()?;
        match relation::resolve_children(&session, self.table(), table)? {
            Some(Relation::Children { table, column }) => Ok((table, column)),
            _ => Err(Error::no_relation(self.table(), relation::normalize(table))),
        }
    }

    /// Rows of `table` referencing this entity, loaded on first access
    pub fn children(&self, table: &str) -> Result<EntitySet> {
        let (child_table, column) = self.children_relation(table)?;
        self.load_children(&child_table, &column)
    }

    fn load_children(&self, child_table: &str, column: &str) -> Result<EntitySet> {
        if let Some(children) = self.0.state.borrow().children.get(child_table) {
            return Ok(children.clone());
        }

        let loaded = match self.id() {
            Some(id) => self
                .session()?
                .query(child_table)
                .filter_by(column, id)
                .find()?,
            None => EntitySet::new(child_table),
        };

        Ok(self
            .0
            .state
            .borrow_mut()
            .children
            .entry(child_table.to_string())
            .or_insert(loaded)
            .clone())
    }

    pub fn has_child(&self, child: &Entity) -> Result<bool> {
        let children = self.children(child.table())?;
        Ok(children.contains(child) || children.contains_row(child))
    }

    /// Adopt `child`: it is queued for save and its parent set to this entity
    ///
    /// A new parent is persisted first so the child's foreign key can be
    /// assigned. The child's previous parent is queued too.
    pub fn add_child(&self, child: &Entity) -> Result<()> {
        let (child_table, column) = self.children_relation(child.table())?;

        if self.is_new() {
            self.save()?;
        }

        if self.has_child(child)? {
            return Ok(());
        }

        let previous = child.parent(self.table())?;
        self.load_children(&child_table, &column)?;
        {
            let mut state = self.0.state.borrow_mut();
            if let Some(children) = state.children.get_mut(&child_table) {
                children.push(child.clone());
            }
            state.pending.queue_save(child);
        }

        match previous {
            Some(previous) if previous.ptr_eq(self) => {}
            previous => {
                child.set_parent(self)?;
                if let Some(previous) = previous {
                    self.0.state.borrow_mut().pending.queue_save(&previous);
                }
            }
        }
        Ok(())
    }

    /// Release `child`: its foreign key is cleared
    ///
    /// A child that was never persisted is simply unqueued; otherwise it is
    /// queued so the cleared key reaches storage.
    pub fn remove_child(&self, child: &Entity) -> Result<()> {
        let (child_table, column) = self.children_relation(child.table())?;
        self.load_children(&child_table, &column)?;
        self.detach_child(child);

        child.set_column(&column, Value::Null)?;
        child.clear_parent(self.table())?;

        let mut state = self.0.state.borrow_mut();
        if child.is_new() {
            state.pending.unqueue(child);
        } else {
            state.pending.queue_save(child);
        }
        Ok(())
    }

    /// Remove `child` from the loaded children and the queue only
    fn detach_child(&self, child: &Entity) {
        let mut state = self.0.state.borrow_mut();
        if let Some(children) = state.children.get_mut(child.table()) {
            children.retain(|member| !member.same_row(child));
        }
        state.pending.unqueue(child);
    }

    /// Adopt every member of `children`, leaving the set empty
    ///
    /// Existing children are kept.
    pub fn set_children(&self, children: &mut EntitySet) -> Result<()> {
        self.children_relation(children.table())?;
        for child in children.take() {
            self.add_child(&child)?;
        }
        Ok(())
    }

    // ========================================================================
    // Peer (Many-to-Many) Relation
    // ========================================================================

    fn peer_relation(&self, table: &str) -> Result<Relation> {
        let session = self.session()?;
        relation::resolve_peers(&session, self.table(), table)?
            .ok_or_else(|| Error::no_relation(self.table(), relation::normalize(table)))
    }

    /// Rows of `table` linked through the junction table
    pub fn foreign_objects(&self, table: &str) -> Result<EntitySet> {
        let relation = self.peer_relation(table)?;
        self.load_peers(&relation)?;

        let state = self.0.state.borrow();
        let peers = state
            .peers
            .get(relation.table())
            .map(|memo| memo.members.iter().map(|(peer, _)| peer.clone()).collect())
            .unwrap_or_default();
        Ok(EntitySet::from_entities(relation.table(), peers))
    }

    fn load_peers(&self, relation: &Relation) -> Result<()> {
        let Relation::Peers {
            table,
            junction,
            own_column,
            peer_column,
        } = relation
        else {
            return Err(Error::no_relation(self.table(), relation.table()));
        };

        if self.0.state.borrow().peers.contains_key(table) {
            return Ok(());
        }

        let mut memo = PeerMemo::default();
        if let Some(id) = self.id() {
            let session = self.session()?;
            let links = session.query(junction).filter_by(own_column, id).find()?;
            let peer_ids = links.to_column_values(peer_column)?;
            let peers = if peer_ids.is_empty() {
                EntitySet::new(table)
            } else {
                session
                    .query(table)
                    .filter_by_cmp("id", FilterValue::List(peer_ids), Comparison::In)?
                    .find()?
            };

            for link in links.iter() {
                let peer_id = link.value(peer_column)?.as_id();
                if let Some(peer) = peers.iter().find(|peer| peer.id() == peer_id) {
                    memo.members.push((peer.clone(), link.clone()));
                }
            }
        }

        self.0
            .state
            .borrow_mut()
            .peers
            .entry(table.clone())
            .or_insert(memo);
        Ok(())
    }

    /// Link `peer` through a new junction row
    ///
    /// Both sides are persisted first when new. The junction row is queued
    /// for save; the peer's loaded peer set is kept in sync.
    pub fn add_foreign_object(&self, peer: &Entity) -> Result<()> {
        let relation = self.peer_relation(peer.table())?;
        let Relation::Peers {
            junction,
            own_column,
            peer_column,
            ..
        } = &relation
        else {
            return Err(Error::no_relation(self.table(), peer.table()));
        };

        if self.is_new() {
            self.save()?;
        }
        if peer.is_new() {
            peer.save()?;
        }

        self.load_peers(&relation)?;
        let already_linked = self
            .0
            .state
            .borrow()
            .peers
            .get(relation.table())
            .is_some_and(|memo| memo.position(peer).is_some());
        if already_linked {
            return Ok(());
        }

        let link = self.session()?.create(
            junction,
            Record::new()
                .with(own_column.as_str(), self.id())
                .with(peer_column.as_str(), peer.id()),
        )?;

        {
            let mut state = self.0.state.borrow_mut();
            state
                .peers
                .entry(relation.table().to_string())
                .or_default()
                .members
                .push((peer.clone(), link.clone()));
            state.pending.queue_save(&link);
        }

        if !peer.ptr_eq(self) {
            let mut peer_state = peer.0.state.borrow_mut();
            if let Some(memo) = peer_state.peers.get_mut(self.table()) {
                if memo.position(self).is_none() {
                    memo.members.push((self.clone(), link));
                }
            }
        }
        Ok(())
    }

    /// Unlink `peer`; its junction row is queued for deletion
    ///
    /// A junction row that was never persisted is unqueued instead, from
    /// whichever side queued it.
    pub fn remove_foreign_object(&self, peer: &Entity) -> Result<()> {
        let relation = self.peer_relation(peer.table())?;
        self.load_peers(&relation)?;

        let own_link = {
            let mut state = self.0.state.borrow_mut();
            let link = state.peers.get_mut(relation.table()).and_then(|memo| {
                let position = memo.position(peer)?;
                Some(memo.members.remove(position).1)
            });
            if let Some(link) = &link {
                if link.is_new() {
                    state.pending.unqueue(link);
                } else {
                    state.pending.queue_delete(link);
                }
            }
            link
        };

        if peer.ptr_eq(self) {
            return Ok(());
        }

        // The link may have been created from the peer's side
        let mut peer_state = peer.0.state.borrow_mut();
        let mirrored = peer_state.peers.get_mut(self.table()).and_then(|memo| {
            let position = match &own_link {
                Some(link) => memo.members.iter().position(|(_, l)| l.ptr_eq(link)),
                None => memo.position(self),
            }?;
            Some(memo.members.remove(position).1)
        });

        match (own_link, mirrored) {
            (Some(link), _) | (None, Some(link)) if link.is_new() => {
                peer_state.pending.unqueue(&link);
            }
            (None, Some(link)) => {
                self.0.state.borrow_mut().pending.queue_delete(&link);
            }
            _ => {}
        }
        Ok(())
    }

    /// Make `peers` the complete set of linked rows
    pub fn set_foreign_objects(&self, peers: &EntitySet) -> Result<()> {
        let relation = self.peer_relation(peers.table())?;
        if relation.table() != peers.table() {
            return Err(Error::relation_mismatch(relation.table(), peers.table()));
        }

        let current = self.foreign_objects(peers.table())?;
        for existing in current.iter() {
            if !peers.contains(existing) && !peers.contains_row(existing) {
                self.remove_foreign_object(existing)?;
            }
        }
        for peer in peers.iter() {
            self.add_foreign_object(peer)?;
        }
        Ok(())
    }
}

/// Application value of a stored cell; unconvertible cells are kept as read
fn from_storage(table: &str, info: &ColumnInfo, value: Value) -> Value {
    match info.column_type.to_application(&value) {
        Ok(converted) => converted,
        Err(message) => {
            tracing::warn!(
                table = %table,
                column = %info.name,
                error = %message,
                "Keeping stored value that does not match the column type"
            );
            value
        }
    }
}

fn now() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

//! Identity cache
//!
//! At most one in-memory [`Entity`] per persisted `(table, id)`. The cache is
//! unbounded; entries live until evicted or the cache is cleared.

use std::collections::HashMap;

use crate::entity::Entity;

#[derive(Default)]
pub struct IdentityCache {
    entries: HashMap<(String, i64), Entity>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str, id: i64) -> Option<Entity> {
        let entity = self.entries.get(&(table.to_string(), id)).cloned();
        if entity.is_some() {
            tracing::trace!(table = %table, id, "Identity cache hit");
        }
        entity
    }

    /// Register a persisted entity; entities without an id are ignored
    pub fn insert(&mut self, entity: &Entity) {
        if let Some(id) = entity.id() {
            self.entries
                .insert((entity.table().to_string(), id), entity.clone());
        }
    }

    pub fn evict(&mut self, table: &str, id: i64) -> Option<Entity> {
        self.entries.remove(&(table.to_string(), id))
    }

    /// Drop every entry of `table`
    pub fn evict_table(&mut self, table: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(t, _), _| t != table);
        before - self.entries.len()
    }

    /// Remove and return every cached entity
    pub fn drain(&mut self) -> Vec<Entity> {
        self.entries.drain().map(|(_, entity)| entity).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

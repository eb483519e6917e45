//! EntitySet - ordered entities of one table
//!
//! A plain container: membership is by reference identity, duplicates are
//! allowed, and bulk persistence runs every member inside one transaction.

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::types::{Record, Value};

/// Ordered collection of entities bound to one table
#[derive(Debug, Clone)]
pub struct EntitySet {
    table: String,
    items: Vec<Entity>,
}

impl EntitySet {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            items: Vec::new(),
        }
    }

    pub(crate) fn from_entities(table: impl Into<String>, items: Vec<Entity>) -> Self {
        Self {
            table: table.into(),
            items,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.items.iter()
    }

    pub fn first(&self) -> Option<&Entity> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&Entity> {
        self.items.last()
    }

    pub fn get(&self, index: usize) -> Option<&Entity> {
        self.items.get(index)
    }

    fn check_table(&self, entity: &Entity) -> Result<()> {
        if entity.table() != self.table {
            return Err(Error::table_mismatch(&self.table, entity.table()));
        }
        Ok(())
    }

    /// Append an entity of this set's table
    pub fn add(&mut self, entity: Entity) -> Result<()> {
        self.check_table(&entity)?;
        self.items.push(entity);
        Ok(())
    }

    /// Insert an entity at the front
    pub fn prepend(&mut self, entity: Entity) -> Result<()> {
        self.check_table(&entity)?;
        self.items.insert(0, entity);
        Ok(())
    }

    pub(crate) fn push(&mut self, entity: Entity) {
        self.items.push(entity);
    }

    /// Remove the first occurrence of `entity` (by identity)
    pub fn remove(&mut self, entity: &Entity) -> bool {
        match self.items.iter().position(|e| e.ptr_eq(entity)) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    /// Same instance is a member
    pub fn contains(&self, entity: &Entity) -> bool {
        self.items.iter().any(|e| e.ptr_eq(entity))
    }

    /// A member represents the same persisted row
    pub fn contains_row(&self, entity: &Entity) -> bool {
        self.items.iter().any(|e| e.same_row(entity))
    }

    pub fn retain(&mut self, f: impl FnMut(&Entity) -> bool) {
        self.items.retain(f);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Move every member out, leaving the set empty
    pub fn take(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.items)
    }

    /// Members from `offset`, at most `length` of them
    pub fn slice(&self, offset: usize, length: Option<usize>) -> EntitySet {
        let items = self
            .items
            .iter()
            .skip(offset)
            .take(length.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        EntitySet::from_entities(&self.table, items)
    }

    /// Split into `(matching, rest)`, preserving order
    pub fn partition(&self, mut f: impl FnMut(&Entity) -> bool) -> (EntitySet, EntitySet) {
        let (matching, rest): (Vec<_>, Vec<_>) = self.items.iter().cloned().partition(|e| f(e));
        (
            EntitySet::from_entities(&self.table, matching),
            EntitySet::from_entities(&self.table, rest),
        )
    }

    /// Members whose `column` equals `value`
    pub fn filter_by_value(&self, column: &str, value: impl Into<Value>) -> Result<EntitySet> {
        let value = value.into();
        let mut matching = Vec::new();
        for entity in &self.items {
            if entity.value(column)? == value {
                matching.push(entity.clone());
            }
        }
        Ok(EntitySet::from_entities(&self.table, matching))
    }

    /// First member whose `column` equals `value`
    pub fn find_by_value(&self, column: &str, value: impl Into<Value>) -> Result<Option<Entity>> {
        let value = value.into();
        for entity in &self.items {
            if entity.value(column)? == value {
                return Ok(Some(entity.clone()));
            }
        }
        Ok(None)
    }

    /// Ids of the persisted members
    pub fn ids(&self) -> Vec<i64> {
        self.items.iter().filter_map(Entity::id).collect()
    }

    /// Save every member in one transaction
    pub fn save(&self) -> Result<()> {
        let Some(first) = self.items.first() else {
            return Ok(());
        };
        let session = first.session()?;
        session.transaction(|| {
            for entity in &self.items {
                entity.save()?;
            }
            Ok(())
        })
    }

    /// Delete every member in one transaction
    pub fn delete(&self) -> Result<()> {
        let Some(first) = self.items.first() else {
            return Ok(());
        };
        let session = first.session()?;
        session.transaction(|| {
            for entity in &self.items {
                entity.delete()?;
            }
            Ok(())
        })
    }

    /// One column across all members
    pub fn to_column_values(&self, column: &str) -> Result<Vec<Value>> {
        self.items.iter().map(|e| e.value(column)).collect()
    }

    /// Several columns across all members, one record per member
    pub fn to_column_maps(&self, columns: &[&str]) -> Result<Vec<Record>> {
        self.items
            .iter()
            .map(|entity| {
                columns
                    .iter()
                    .map(|column| Ok((column.to_string(), entity.value(column)?)))
                    .collect::<Result<Record>>()
            })
            .collect()
    }

    /// Members absent (by identity) from `other`, in original order
    pub fn diff(&self, other: &EntitySet) -> Result<EntitySet> {
        if self.table != other.table {
            return Err(Error::table_mismatch(&self.table, &other.table));
        }
        let items = self
            .items
            .iter()
            .filter(|e| !other.contains(e))
            .cloned()
            .collect();
        Ok(EntitySet::from_entities(&self.table, items))
    }

    /// Members as a JSON array of objects
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.items.iter().map(Entity::to_json).collect())
    }
}

impl<'a> IntoIterator for &'a EntitySet {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl IntoIterator for EntitySet {
    type Item = Entity;
    type IntoIter = std::vec::IntoIter<Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

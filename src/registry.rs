//! Per-table class resolution
//!
//! Custom behaviour for a table is registered under a class name. A table
//! resolves to `{namespace}::{UpperCamelTable}` (entity hooks) and
//! `{namespace}::{UpperCamelTable}Query` (query scopes); without a
//! namespace the bare names are used. Tables with nothing registered get
//! the generic behaviour.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use heck::ToUpperCamelCase;

use crate::entity::Entity;
use crate::error::Result;
use crate::query::QueryBuilder;

/// Lifecycle hooks for entities of one table
pub trait EntityClass {
    /// Runs once after an entity is constructed or first materialized
    fn initialize(&self, _entity: &Entity) -> Result<()> {
        Ok(())
    }

    /// Runs before the row is inserted or updated; an error aborts the save
    fn before_save(&self, _entity: &Entity) -> Result<()> {
        Ok(())
    }
}

/// Default scope for queries against one table
pub trait QueryClass {
    /// Adjust every builder handed out for the table
    fn prepare(&self, query: QueryBuilder) -> QueryBuilder;
}

/// Registered classes keyed by class name
#[derive(Default)]
pub struct Registry {
    namespace: Option<String>,
    entities: HashMap<String, Rc<dyn EntityClass>>,
    queries: HashMap<String, Rc<dyn QueryClass>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entities: Vec<_> = self.entities.keys().collect();
        entities.sort();
        let mut queries: Vec<_> = self.queries.keys().collect();
        queries.sort();
        f.debug_struct("Registry")
            .field("namespace", &self.namespace)
            .field("entities", &entities)
            .field("queries", &queries)
            .finish()
    }
}

impl Registry {
    pub fn new(namespace: Option<String>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()),
            ..Self::default()
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Class name entity hooks for `table` are registered under
    pub fn entity_class_name(&self, table: &str) -> String {
        let name = table.to_upper_camel_case();
        match &self.namespace {
            Some(namespace) => format!("{}::{}", namespace, name),
            None => name,
        }
    }

    /// Class name the query scope for `table` is registered under
    pub fn query_class_name(&self, table: &str) -> String {
        format!("{}Query", self.entity_class_name(table))
    }

    pub fn register_entity_class(&mut self, name: impl Into<String>, class: Rc<dyn EntityClass>) {
        let name = name.into();
        tracing::debug!(class = %name, "Registered entity class");
        self.entities.insert(name, class);
    }

    pub fn register_query_class(&mut self, name: impl Into<String>, class: Rc<dyn QueryClass>) {
        let name = name.into();
        tracing::debug!(class = %name, "Registered query class");
        self.queries.insert(name, class);
    }

    pub fn entity_class(&self, table: &str) -> Option<Rc<dyn EntityClass>> {
        self.entities.get(&self.entity_class_name(table)).cloned()
    }

    pub fn query_class(&self, table: &str) -> Option<Rc<dyn QueryClass>> {
        self.queries.get(&self.query_class_name(table)).cloned()
    }
}

//! Naming-convention relation discovery
//!
//! Relations are never declared. They are inferred from table and column
//! names against live schema metadata:
//!
//! - parent: table `book` with column `author_id` has an `author` parent
//! - children: `author` has `books` when table `book` has an `author_id` column
//! - peers: `book` and `tag` are linked through `book_tag` (or `tag_book`)
//!   when that table has both `book_id` and `tag_id`
//!
//! Everything here is a pure function over a [`SchemaView`].

use heck::ToSnakeCase;

use crate::error::Result;
use crate::sql::quote_qualified;

/// Table/column existence checks the resolver needs
pub trait SchemaView {
    fn has_table(&self, table: &str) -> Result<bool>;

    /// False when the table itself does not exist
    fn has_column(&self, table: &str, column: &str) -> Result<bool>;
}

/// A resolved relation from one table to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// Own `column` references `table.id`
    Parent { table: String, column: String },
    /// `table.column` references own id
    Children { table: String, column: String },
    /// Linked through `junction (own_column, peer_column)`
    Peers {
        table: String,
        junction: String,
        own_column: String,
        peer_column: String,
    },
}

impl Relation {
    /// The related table
    pub fn table(&self) -> &str {
        match self {
            Relation::Parent { table, .. }
            | Relation::Children { table, .. }
            | Relation::Peers { table, .. } => table,
        }
    }
}

/// Canonical snake_case form of a column, table or relation name
///
/// `normalize(normalize(x)) == normalize(x)` for every input.
pub fn normalize(name: &str) -> String {
    name.to_snake_case()
}

/// Strip one trailing pluralizing `s`
pub fn singularize(name: &str) -> &str {
    match name.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Foreign key column that references `table`
pub fn parent_column(table: &str) -> String {
    format!("{}_id", table)
}

/// `name` as a parent of `table`: own column `{name}_id` must exist
pub fn resolve_parent(schema: &dyn SchemaView, table: &str, name: &str) -> Result<Option<Relation>> {
    let parent = normalize(name);
    let column = parent_column(&parent);

    if schema.has_column(table, &column)? {
        return Ok(Some(Relation::Parent {
            table: parent,
            column,
        }));
    }
    Ok(None)
}

/// `name` as children of `table`: table `singular(name)` must have `{table}_id`
pub fn resolve_children(
    schema: &dyn SchemaView,
    table: &str,
    name: &str,
) -> Result<Option<Relation>> {
    let normalized = normalize(name);
    let child = singularize(&normalized);
    let column = parent_column(table);

    if schema.has_table(child)? && schema.has_column(child, &column)? {
        return Ok(Some(Relation::Children {
            table: child.to_string(),
            column,
        }));
    }
    Ok(None)
}

/// `name` as peers of `table` through a junction table
///
/// `{table}_{peer}` is tried before `{peer}_{table}`; the junction must
/// carry both id columns.
pub fn resolve_peers(schema: &dyn SchemaView, table: &str, name: &str) -> Result<Option<Relation>> {
    let normalized = normalize(name);
    let peer = singularize(&normalized);
    if !schema.has_table(peer)? {
        return Ok(None);
    }

    let own_column = parent_column(table);
    let peer_column = parent_column(peer);

    for junction in [format!("{}_{}", table, peer), format!("{}_{}", peer, table)] {
        if schema.has_table(&junction)?
            && schema.has_column(&junction, &own_column)?
            && schema.has_column(&junction, &peer_column)?
        {
            return Ok(Some(Relation::Peers {
                table: peer.to_string(),
                junction,
                own_column,
                peer_column,
            }));
        }
    }
    Ok(None)
}

/// First matching relation, tried as parent, children, then peers
pub fn resolve(schema: &dyn SchemaView, table: &str, name: &str) -> Result<Option<Relation>> {
    if let Some(relation) = resolve_parent(schema, table, name)? {
        return Ok(Some(relation));
    }
    if let Some(relation) = resolve_children(schema, table, name)? {
        return Ok(Some(relation));
    }
    resolve_peers(schema, table, name)
}

/// Infer the ON clause for joining `joined` (as `joined_alias`) onto `table` (as `alias`)
///
/// Tries the parent direction first (`alias.{joined}_id = joined_alias.id`),
/// then the child direction (`joined_alias.{table}_id = alias.id`).
pub fn join_condition(
    schema: &dyn SchemaView,
    table: &str,
    alias: &str,
    joined: &str,
    joined_alias: &str,
) -> Result<Option<String>> {
    let parent_fk = parent_column(joined);
    if schema.has_column(table, &parent_fk)? {
        return Ok(Some(format!(
            "{} = {}",
            quote_qualified(&format!("{}.{}", alias, parent_fk)),
            quote_qualified(&format!("{}.id", joined_alias))
        )));
    }

    let child_fk = parent_column(table);
    if schema.has_column(joined, &child_fk)? {
        return Ok(Some(format!(
            "{} = {}",
            quote_qualified(&format!("{}.{}", joined_alias, child_fk)),
            quote_qualified(&format!("{}.id", alias))
        )));
    }

    Ok(None)
}

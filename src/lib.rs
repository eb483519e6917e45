//! # activerow
//!
//! A convention-driven ActiveRecord mapper over SQLite.
//!
//! Tables are never declared in Rust. Column metadata is introspected from
//! the live database, and relations between tables are inferred from their
//! names: a `book` table with an `author_id` column belongs to `author`,
//! `author` therefore has `books`, and a `book_tag` table carrying `book_id`
//! and `tag_id` links books and tags.
//!
//! ## Features
//!
//! - **Dynamic Entities**: Rows are shared [`Entity`] handles over an ordered column map
//! - **Identity Cache**: One in-memory instance per persisted row, per session
//! - **Lazy Relations**: Parents, children and junction-linked peers load on first access
//! - **Cascading Saves**: Relation changes are queued and written by the next `save()`, in one transaction
//! - **Query Builder**: Filters, joins, grouping, computed columns, chunking and pagination
//! - **Query Log**: Optional capture of executed SQL, parameters and timing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use activerow::{Record, Session, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::connect(SessionConfig::builder("sqlite://library.db").build())?;
//!
//!     // Create and persist a row
//!     let author = session.create("author", Record::new().with("name", "Ursula"))?;
//!     author.save()?;
//!
//!     // Link a child; the book is written by the author's next save
//!     let book = session.create("book", Record::new().with("title", "The Dispossessed"))?;
//!     author.add_child(&book)?;
//!     author.save()?;
//!
//!     // Query it back: the same instance comes out of the identity cache
//!     let found = session.query("book").filter_by("title", "The Dispossessed").find_one()?;
//!     assert_eq!(found.as_ref(), Some(&book));
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use activerow::SessionConfig;
//!
//! let config = SessionConfig::builder("sqlite::memory:")
//!     .namespace("app::models")   // Class names for per-table hooks
//!     .query_logging(true)        // Keep executed statements
//!     .query_log_capacity(50)     // ...the last 50 of them
//!     .instance_pooling(true)     // Deduplicate loaded rows (default)
//!     .auto_updated_at(true)      // Stamp updated_at on writes (default)
//!     .build();
//! ```
//!
//! ## Threading
//!
//! A session and its entities are single-threaded (`Rc`/`RefCell`); every
//! call blocks until the database answers.

pub mod cache;
pub mod collection;
pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod pager;
pub mod query;
pub mod registry;
pub mod relation;
pub mod schema;
pub mod session;
pub mod sql;
pub mod types;
pub mod unit_of_work;

// Re-export main types for convenience
pub use collection::EntitySet;
pub use config::{AutoColumns, SessionConfig, SessionConfigBuilder};
pub use database::{Database, LoggedQuery, SqliteDatabase};
pub use entity::{Entity, Field};
pub use error::{Error, Result};
pub use pager::Pager;
pub use query::{JoinKind, QueryBuilder};
pub use registry::{EntityClass, QueryClass};
pub use relation::Relation;
pub use schema::TableSchema;
pub use session::Session;
pub use types::{ColumnInfo, ColumnType, Record, Value};

// Re-export SQL utilities for advanced users
pub use sql::{Comparison, Direction, FilterValue};

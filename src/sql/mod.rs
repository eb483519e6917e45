//! SQL utilities
//!
//! Provides identifier sanitization, filter predicates and row-level
//! statement text.

pub mod condition;
pub mod sanitize;
pub mod statement;

pub use condition::{
    Comparison, Direction, Filter, FilterValue, build_condition_clause, build_order_by_clause,
};
pub use sanitize::{quote_identifier, quote_qualified, validate_identifier};
pub use statement::Statement;

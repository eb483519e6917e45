//! Condition building for SQL WHERE clauses
//!
//! Converts column comparisons into parametrized predicate fragments.
//! Placeholders are positional (`?`); parameters are returned in the order
//! their placeholders appear.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};
use crate::sql::sanitize::quote_qualified;
use crate::types::Value;

/// Comparison operator for a column filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Comparison {
    fn operator(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::NotEq => "!=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Like => "LIKE",
            Comparison::NotLike => "NOT LIKE",
            Comparison::In => "IN",
            Comparison::NotIn => "NOT IN",
            Comparison::IsNull => "IS NULL",
            Comparison::IsNotNull => "IS NOT NULL",
        }
    }
}

impl FromStr for Comparison {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        let comparison = match normalized.as_str() {
            "=" | "==" | "eq" => Comparison::Eq,
            "!=" | "<>" | "ne" => Comparison::NotEq,
            ">" | "gt" => Comparison::Gt,
            ">=" | "gte" => Comparison::Gte,
            "<" | "lt" => Comparison::Lt,
            "<=" | "lte" => Comparison::Lte,
            "like" => Comparison::Like,
            "not like" => Comparison::NotLike,
            "in" => Comparison::In,
            "not in" => Comparison::NotIn,
            "null" | "is null" => Comparison::IsNull,
            "not null" | "is not null" => Comparison::IsNotNull,
            _ => {
                return Err(Error::query_state(format!(
                    "Unknown comparison operator '{}'",
                    s
                )));
            }
        };
        Ok(comparison)
    }
}

/// Sort direction for ORDER BY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "ASC" => Ok(Direction::Asc),
            "DESC" => Ok(Direction::Desc),
            _ => Err(Error::query_state(format!(
                "Invalid sort order: '{}'. Must be 'asc' or 'desc'.",
                s
            ))),
        }
    }
}

/// Right-hand side of a column filter: one value or a list (for `IN`)
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Single(Value),
    List(Vec<Value>),
}

impl FilterValue {
    /// Flatten into a list; a comma-separated text value becomes one item per element
    fn into_list(self) -> Vec<Value> {
        match self {
            FilterValue::List(values) => values,
            FilterValue::Single(Value::Text(text)) if text.contains(',') => text
                .split(',')
                .map(|part| Value::Text(part.trim().to_string()))
                .collect(),
            FilterValue::Single(Value::Null) => Vec::new(),
            FilterValue::Single(value) => vec![value],
        }
    }
}

macro_rules! filter_value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for FilterValue {
                fn from(v: $ty) -> Self {
                    FilterValue::Single(Value::from(v))
                }
            }
        )*
    };
}

filter_value_from!(
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
    NaiveDateTime
);

impl<T: Into<Value>> From<Option<T>> for FilterValue {
    fn from(v: Option<T>) -> Self {
        FilterValue::Single(Value::from(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for FilterValue {
    fn from(v: Vec<T>) -> Self {
        FilterValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// A single predicate fragment with its bound parameters
///
/// Filters are ANDed together by the query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    sql: String,
    params: Vec<Value>,
    exact: Option<(String, Value)>,
}

impl Filter {
    /// Raw SQL fragment with positional parameters
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
            exact: None,
        }
    }

    /// Equality against a (possibly qualified) column reference
    ///
    /// `NULL` becomes `IS NULL`; a list becomes an `IN` membership test.
    pub fn equals(column: &str, value: FilterValue) -> Self {
        let column_sql = quote_qualified(column);
        match value {
            FilterValue::Single(Value::Null) => {
                Filter::raw(format!("{} IS NULL", column_sql), Vec::new())
            }
            FilterValue::Single(value) => {
                Filter::raw(format!("{} = ?", column_sql), vec![value.to_storage()])
            }
            FilterValue::List(values) => Self::membership(&column_sql, values, false),
        }
    }

    /// Column comparison against a (possibly qualified) column reference
    ///
    /// `NULL` with `=` becomes `IS NULL`, `NULL` with `!=` becomes
    /// `IS NOT NULL`. An `IN` list binds one placeholder per element; an
    /// empty list matches nothing.
    pub fn compare(column: &str, value: FilterValue, comparison: Comparison) -> Result<Self> {
        if comparison == Comparison::Eq {
            return Ok(Self::equals(column, value));
        }

        let column_sql = quote_qualified(column);

        let filter = match (comparison, value) {
            (Comparison::IsNull | Comparison::IsNotNull, _) => Filter::raw(
                format!("{} {}", column_sql, comparison.operator()),
                Vec::new(),
            ),
            (Comparison::NotEq, FilterValue::Single(Value::Null)) => {
                Filter::raw(format!("{} IS NOT NULL", column_sql), Vec::new())
            }
            (Comparison::In, value) => Self::membership(&column_sql, value.into_list(), false),
            (Comparison::NotIn | Comparison::NotEq, value @ FilterValue::List(_))
            | (Comparison::NotIn, value) => Self::membership(&column_sql, value.into_list(), true),
            (_, FilterValue::List(_)) => {
                return Err(Error::query_state(format!(
                    "{} comparison does not accept a list value",
                    comparison.operator()
                )));
            }
            (_, FilterValue::Single(Value::Null)) => {
                return Err(Error::query_state(format!(
                    "{} comparison with NULL is not supported",
                    comparison.operator()
                )));
            }
            (_, FilterValue::Single(value)) => Filter::raw(
                format!("{} {} ?", column_sql, comparison.operator()),
                vec![value.to_storage()],
            ),
        };

        Ok(filter)
    }

    fn membership(column_sql: &str, values: Vec<Value>, negate: bool) -> Self {
        if values.is_empty() {
            let sql = if negate { "1 = 1" } else { "0 = 1" };
            return Filter::raw(sql, Vec::new());
        }

        let placeholders = vec!["?"; values.len()].join(", ");
        let operator = if negate { "NOT IN" } else { "IN" };
        Filter::raw(
            format!("{} {} ({})", column_sql, operator, placeholders),
            values.iter().map(Value::to_storage).collect(),
        )
    }

    /// Mark this filter as an exact `column = value` match
    pub fn with_exact(mut self, column: impl Into<String>, value: Value) -> Self {
        self.exact = Some((column.into(), value));
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// The `(column, value)` pair when this is an exact equality filter
    pub fn exact(&self) -> Option<(&str, &Value)> {
        self.exact
            .as_ref()
            .map(|(column, value)| (column.as_str(), value))
    }
}

/// Combine filters into one AND clause (without the `WHERE` keyword)
///
/// Returns `None` when there are no filters.
pub fn build_condition_clause(filters: &[Filter]) -> Option<(String, Vec<Value>)> {
    if filters.is_empty() {
        return None;
    }

    let clause = filters
        .iter()
        .map(|filter| format!("({})", filter.sql()))
        .collect::<Vec<_>>()
        .join(" AND ");
    let params = filters
        .iter()
        .flat_map(|filter| filter.params().iter().cloned())
        .collect();

    Some((clause, params))
}

/// Build ORDER BY clause body from `(column reference, direction)` pairs
pub fn build_order_by_clause(order: &[(String, Direction)]) -> Option<String> {
    if order.is_empty() {
        return None;
    }

    Some(
        order
            .iter()
            .map(|(column, direction)| format!("{} {}", quote_qualified(column), direction.as_sql()))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Comparison Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_comparisons() {
        assert_eq!("=".parse::<Comparison>().unwrap(), Comparison::Eq);
        assert_eq!("<>".parse::<Comparison>().unwrap(), Comparison::NotEq);
        assert_eq!(" IN ".parse::<Comparison>().unwrap(), Comparison::In);
        assert_eq!("not null".parse::<Comparison>().unwrap(), Comparison::IsNotNull);
        assert_eq!("Not Like".parse::<Comparison>().unwrap(), Comparison::NotLike);
        assert!("~=".parse::<Comparison>().is_err());
    }

    #[test]
    fn test_parse_direction() {
        assert_eq!("desc".parse::<Direction>().unwrap(), Direction::Desc);
        assert_eq!("ASC".parse::<Direction>().unwrap(), Direction::Asc);
        assert!("up".parse::<Direction>().is_err());
    }

    // =========================================================================
    // Null Rewrite Tests
    // =========================================================================

    #[test]
    fn test_eq_null_rewrites_to_is_null() {
        let filter = Filter::compare("author.name", Value::Null.into(), Comparison::Eq).unwrap();
        assert_eq!(filter.sql(), "\"author\".\"name\" IS NULL");
        assert!(filter.params().is_empty());
    }

    #[test]
    fn test_not_null_comparator() {
        let filter =
            Filter::compare("name", FilterValue::from("ignored"), Comparison::IsNotNull).unwrap();
        assert_eq!(filter.sql(), "\"name\" IS NOT NULL");
        assert!(filter.params().is_empty());
    }

    #[test]
    fn test_not_eq_null_rewrites_to_is_not_null() {
        let filter = Filter::compare("name", Value::Null.into(), Comparison::NotEq).unwrap();
        assert_eq!(filter.sql(), "\"name\" IS NOT NULL");
    }

    #[test]
    fn test_ordering_with_null_is_rejected() {
        assert!(Filter::compare("age", Value::Null.into(), Comparison::Gt).is_err());
    }

    // =========================================================================
    // Scalar Comparison Tests
    // =========================================================================

    #[test]
    fn test_scalar_comparison_binds_storage_value() {
        let filter = Filter::compare("active", true.into(), Comparison::Eq).unwrap();
        assert_eq!(filter.sql(), "\"active\" = ?");
        assert_eq!(filter.params(), &[Value::Integer(1)]);

        let filter = Filter::compare("b.price", 10.5.into(), Comparison::Gte).unwrap();
        assert_eq!(filter.sql(), "\"b\".\"price\" >= ?");
    }

    // =========================================================================
    // IN Tests
    // =========================================================================

    #[test]
    fn test_in_list_binds_each_element() {
        let filter = Filter::compare("id", vec![1, 2, 3].into(), Comparison::In).unwrap();
        assert_eq!(filter.sql(), "\"id\" IN (?, ?, ?)");
        assert_eq!(
            filter.params(),
            &[Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
    }

    #[test]
    fn test_in_comma_joined_text_is_split() {
        let filter = Filter::compare("id", "4, 5".into(), Comparison::In).unwrap();
        assert_eq!(filter.sql(), "\"id\" IN (?, ?)");
        assert_eq!(filter.params(), &[Value::from("4"), Value::from("5")]);
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let filter =
            Filter::compare("id", FilterValue::List(Vec::new()), Comparison::In).unwrap();
        assert_eq!(filter.sql(), "0 = 1");

        let filter =
            Filter::compare("id", FilterValue::List(Vec::new()), Comparison::NotIn).unwrap();
        assert_eq!(filter.sql(), "1 = 1");
    }

    #[test]
    fn test_eq_with_list_is_membership() {
        let filter = Filter::compare("id", vec![7].into(), Comparison::Eq).unwrap();
        assert_eq!(filter.sql(), "\"id\" IN (?)");
    }

    #[test]
    fn test_list_with_ordering_is_rejected() {
        assert!(Filter::compare("id", vec![1, 2].into(), Comparison::Lt).is_err());
    }

    // =========================================================================
    // Clause Assembly Tests
    // =========================================================================

    #[test]
    fn test_build_condition_clause() {
        let filters = vec![
            Filter::compare("name", "Plato".into(), Comparison::Eq).unwrap(),
            Filter::raw("length(name) > ?", vec![Value::Integer(3)]),
        ];

        let (clause, params) = build_condition_clause(&filters).unwrap();
        assert_eq!(clause, "(\"name\" = ?) AND (length(name) > ?)");
        assert_eq!(params, vec![Value::from("Plato"), Value::Integer(3)]);
        assert!(build_condition_clause(&[]).is_none());
    }

    #[test]
    fn test_build_order_by_clause() {
        let order = vec![
            ("author.name".to_string(), Direction::Asc),
            ("id".to_string(), Direction::Desc),
        ];
        assert_eq!(
            build_order_by_clause(&order).unwrap(),
            "\"author\".\"name\" ASC, \"id\" DESC"
        );
        assert!(build_order_by_clause(&[]).is_none());
    }

    #[test]
    fn test_exact_marker() {
        let filter = Filter::compare("name", "Plato".into(), Comparison::Eq)
            .unwrap()
            .with_exact("name", Value::from("Plato"));
        assert_eq!(filter.exact(), Some(("name", &Value::from("Plato"))));
    }
}

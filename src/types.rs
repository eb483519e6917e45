//! Core type definitions
//!
//! Includes the dynamic [`Value`], column types with their conversion
//! hooks, introspected column metadata and the ordered [`Record`] map.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Storage format for `DateTime` columns
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Storage format for `Date` columns
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Dynamic Values
// ============================================================================

/// A dynamically typed column value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Interpret the value as a row identifier.
    ///
    /// Null, zero and anything non-numeric mean "no id".
    pub fn as_id(&self) -> Option<i64> {
        self.as_i64().filter(|id| *id != 0)
    }

    /// Representation bound to SQL: booleans as 0/1, dates as text
    pub fn to_storage(&self) -> Value {
        match self {
            Value::Bool(b) => Value::Integer(i64::from(*b)),
            Value::Date(d) => Value::Text(d.format(DATE_FORMAT).to_string()),
            Value::DateTime(dt) => Value::Text(dt.format(DATETIME_FORMAT).to_string()),
            other => other.clone(),
        }
    }

    /// Convert to a JSON value (dates are rendered in storage format)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => serde_json::Value::String(d.format(DATE_FORMAT).to_string()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format(DATETIME_FORMAT).to_string())
            }
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::Text(s),
            // Nested structures are stored as their JSON text
            other => Value::Text(other.to_string()),
        }
    }
}

// ============================================================================
// Column Types
// ============================================================================

/// Application-level column type, derived from the declared SQL type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Integer field (INTEGER, BIGINT, ...)
    Integer,

    /// Floating point field (REAL, DOUBLE, NUMERIC, DECIMAL)
    Float,

    /// Text field (TEXT, VARCHAR, CHAR, CLOB)
    String,

    /// Boolean field, stored as 0/1
    Boolean,

    /// Calendar date, stored as `YYYY-MM-DD`
    Date,

    /// Date and time, stored as `YYYY-MM-DD HH:MM:SS`
    DateTime,

    /// Binary field
    Blob,
}

impl ColumnType {
    /// Map a declared SQL type onto a column type using SQLite affinity rules
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_uppercase();

        if upper.starts_with("BOOL") {
            ColumnType::Boolean
        } else if upper.contains("INT") {
            ColumnType::Integer
        } else if upper.contains("DATETIME") || upper.contains("TIMESTAMP") {
            ColumnType::DateTime
        } else if upper.contains("DATE") {
            ColumnType::Date
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnType::String
        } else if upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper.contains("NUMERIC")
            || upper.contains("DECIMAL")
        {
            ColumnType::Float
        } else if upper.contains("BLOB") {
            ColumnType::Blob
        } else {
            ColumnType::String
        }
    }

    /// Convert a value into its application representation for this type
    ///
    /// Accepts the usual string coercions (e.g. values read back from text
    /// columns or supplied from form input).
    pub fn to_application(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match (self, value) {
            (ColumnType::Integer, Value::Integer(_)) => Ok(value.clone()),
            (ColumnType::Integer, Value::Bool(b)) => Ok(Value::Integer(i64::from(*b))),
            (ColumnType::Integer, Value::Float(f)) if f.fract() == 0.0 => {
                Ok(Value::Integer(*f as i64))
            }
            (ColumnType::Integer, Value::Text(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| format!("Cannot convert '{}' to integer", s)),

            (ColumnType::Float, Value::Float(_)) => Ok(value.clone()),
            (ColumnType::Float, Value::Integer(i)) => Ok(Value::Float(*i as f64)),
            (ColumnType::Float, Value::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("Cannot convert '{}' to float", s)),

            (ColumnType::String, Value::Text(_)) => Ok(value.clone()),
            (ColumnType::String, Value::Bytes(b)) => String::from_utf8(b.clone())
                .map(Value::Text)
                .map_err(|_| "Cannot convert binary data to text".to_string()),
            (ColumnType::String, other) => Ok(Value::Text(other.to_string())),

            (ColumnType::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (ColumnType::Boolean, Value::Integer(i)) => Ok(Value::Bool(*i != 0)),
            (ColumnType::Boolean, Value::Text(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "" => Ok(Value::Bool(false)),
                _ => Err(format!("Cannot convert '{}' to boolean", s)),
            },

            (ColumnType::Date, Value::Date(_)) => Ok(value.clone()),
            (ColumnType::Date, Value::DateTime(dt)) => Ok(Value::Date(dt.date())),
            (ColumnType::Date, Value::Text(s)) => parse_date(s)
                .map(Value::Date)
                .ok_or_else(|| format!("Invalid date format: '{}'", s)),

            (ColumnType::DateTime, Value::DateTime(_)) => Ok(value.clone()),
            (ColumnType::DateTime, Value::Date(d)) => Ok(Value::DateTime(
                d.and_hms_opt(0, 0, 0).unwrap_or_default(),
            )),
            (ColumnType::DateTime, Value::Text(s)) => parse_datetime(s)
                .map(Value::DateTime)
                .ok_or_else(|| format!("Invalid datetime format: '{}'", s)),

            (ColumnType::Blob, Value::Bytes(_)) => Ok(value.clone()),
            (ColumnType::Blob, Value::Text(s)) => Ok(Value::Bytes(s.as_bytes().to_vec())),

            _ => Err(format!("Type mismatch: expected {:?}, got {:?}", self, value)),
        }
    }

    /// Convert an application value into the representation bound to SQL
    pub fn to_storage(&self, value: &Value) -> Value {
        value.to_storage()
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// ============================================================================
// Column Metadata
// ============================================================================

/// Introspected column metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// Application column type
    pub column_type: ColumnType,

    /// Declared SQL type as reported by the database
    #[serde(rename = "declaredType")]
    pub declared_type: String,

    /// Default value, already converted to the column type
    #[serde(default)]
    pub default: Value,

    /// Whether the column allows NULL values (default: true)
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Whether the column is part of the primary key
    #[serde(default, rename = "primaryKey")]
    pub primary_key: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnInfo {
    /// Create column metadata from a name and declared SQL type
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        let declared_type = declared_type.into();
        Self {
            name: name.into(),
            column_type: ColumnType::from_declared(&declared_type),
            declared_type,
            default: Value::Null,
            nullable: true,
            primary_key: false,
        }
    }

    /// Set the default value
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    /// Set the column as non-nullable
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as primary key
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

// ============================================================================
// Records
// ============================================================================

/// Insertion-ordered mapping of column name to value
///
/// Rows returned by the database and entity column data both use this
/// shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == column)
    }

    /// Insert or replace a value, keeping the original position on replace
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((column, value));
                None
            }
        }
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(name, _)| name == column)?;
        Some(self.entries.remove(index).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Render as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }

    /// Build a record from a JSON object; other JSON values yield an error
    pub fn from_json(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(name, value)| (name, Value::from(value)))
                .collect()),
            serde_json::Value::Null => Ok(Record::new()),
            other => Err(format!("Expected a JSON object, got {}", other)),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (column, value) in iter {
            record.insert(column, value);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

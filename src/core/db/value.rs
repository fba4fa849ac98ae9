/// Decoded Values Module
///
/// Every driver value is decoded once, at the query boundary, into the closed
/// `Value` variant. Downstream formatting only ever sees `Value` and `Record`.
use rusqlite::types::ValueRef;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// A dynamically typed scalar taken from one result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Anything the shell has no dedicated rendering for (BLOBs).
    Raw(Vec<u8>),
}

impl Value {
    /// Decodes a SQLite cell. `decl_type` is the column's declared type, which
    /// is the only way SQLite marks an integer column as boolean.
    pub fn from_sqlite(value: ValueRef<'_>, decl_type: Option<&str>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) if is_boolean_decl(decl_type) => Value::Boolean(i != 0),
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Raw(b.to_vec()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

fn is_boolean_decl(decl_type: Option<&str>) -> bool {
    decl_type
        .map(|t| matches!(t.trim().to_ascii_uppercase().as_str(), "BOOL" | "BOOLEAN"))
        .unwrap_or(false)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            // Debug form keeps `1.0` distinct from `1`
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Raw(bytes) => write!(f, "x'{}'", hex(bytes)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Raw(bytes) => serializer.serialize_str(&hex(bytes)),
        }
    }
}

/// One decoded row: lower-cased column name to value, in column order.
///
/// Null cells are not stored, so a column whose value is NULL is simply
/// absent from the record. Names are unique; a repeated column name keeps
/// its first position and takes the later value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Record { fields: Vec::new() }
    }

    /// Sets a column. The name is lower-cased; null values are dropped.
    pub fn insert(&mut self, column: &str, value: Value) {
        if value.is_null() {
            return;
        }
        let column = column.to_lowercase();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

//! Cache values and atomic-map deltas

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value stored under a key
///
/// `Map` values can be updated field-by-field with a [`Delta`], which is how
/// atomic-map writes are expressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Raw bytes
    Bytes(Vec<u8>),
    /// UTF-8 string
    String(String),
    /// Signed integer
    Int(i64),
    /// Field map, target of deltas
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Borrow the map, if this is a map value
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow the string, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer, if this is an integer value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

/// Field-level change set for a map value
///
/// `Some(v)` sets a field, `None` removes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    changes: BTreeMap<String, Option<Value>>,
}

impl Delta {
    /// Create an empty delta
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes.insert(field.into(), Some(value.into()));
        self
    }

    /// Remove a field
    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.changes.insert(field.into(), None);
        self
    }

    /// Check if the delta changes nothing
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Fold another delta into this one, later changes winning
    pub fn merge(&mut self, other: &Delta) {
        for (field, change) in &other.changes {
            self.changes.insert(field.clone(), change.clone());
        }
    }

    /// Apply to the current value
    ///
    /// A missing or non-map current value is treated as an empty map.
    pub fn apply(&self, current: Option<&Value>) -> Value {
        let mut map = current
            .and_then(Value::as_map)
            .cloned()
            .unwrap_or_default();
        for (field, change) in &self.changes {
            match change {
                Some(v) => {
                    map.insert(field.clone(), v.clone());
                }
                None => {
                    map.remove(field);
                }
            }
        }
        Value::Map(map)
    }
}

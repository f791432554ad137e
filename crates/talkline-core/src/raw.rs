//! Unvalidated records as received from the API.
//!
//! Expansion rewrites a [`RawRecord`] in place; [`RawRecord::validate`] is the
//! only way from here to a typed entity.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// A JSON object as delivered by the upstream, before expansion and validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    /// Wrap a JSON value; anything but an object is rejected.
    pub fn from_value(entity: &'static str, value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ValidationError::new(
                entity,
                None,
                format!("expected an object, got {other}"),
            )),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert<V: Into<Value>>(&mut self, field: &str, value: V) {
        self.0.insert(field.to_string(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Remove every listed field; absent fields are ignored.
    pub fn strip(&mut self, fields: &[&str]) {
        for field in fields {
            self.0.remove(*field);
        }
    }

    /// Identity used in log lines: `code`, then `id`, then `slug`.
    pub fn key(&self) -> Option<String> {
        ["code", "id", "slug"]
            .iter()
            .find_map(|field| match self.0.get(*field)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    pub fn id_field(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Value::as_i64)
    }

    /// The field as a list of bare string codes, if its first entry is a string.
    pub fn code_list(&self, field: &str) -> Option<Vec<String>> {
        let items = self.non_empty_list(field)?;
        if !items[0].is_string() {
            return None;
        }
        Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        )
    }

    /// The field as a list of bare numeric ids, if its first entry is a number.
    pub fn id_list(&self, field: &str) -> Option<Vec<i64>> {
        let items = self.non_empty_list(field)?;
        if !items[0].is_number() {
            return None;
        }
        Some(items.iter().filter_map(Value::as_i64).collect())
    }

    fn non_empty_list(&self, field: &str) -> Option<&Vec<Value>> {
        match self.0.get(field)? {
            Value::Array(items) if !items.is_empty() => Some(items),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Parse into a typed entity. The record is consumed either way.
    pub fn validate<T: DeserializeOwned>(self, entity: &'static str) -> Result<T, ValidationError> {
        let key = self.key();
        serde_json::from_value(Value::Object(self.0))
            .map_err(|err| ValidationError::new(entity, key, err.to_string()))
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

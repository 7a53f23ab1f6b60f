//! Opaque attribute mappings exchanged with the adapter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identifiers::Id;
use crate::value::Value;

/// An attribute name → value mapping.
///
/// This is what the adapter hands back from a create or a find. The `id`
/// key, when present, is the record's external identity; every other key is
/// merged verbatim into the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes {
    values: BTreeMap<String, Value>,
}

impl Attributes {
    /// Create an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a mapping holding only an id.
    #[must_use]
    pub fn with_id(id: impl Into<Id>) -> Self {
        Self::new().with("id", id.into().to_value())
    }

    /// Add a key (builder pattern).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Whether the mapping holds `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The external id carried by this mapping, if any.
    pub fn id(&self) -> Result<Option<Id>> {
        match self.values.get("id") {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Id::try_from(v).map(Some),
        }
    }

    /// Iterate over every key except `id`.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values
            .iter()
            .filter(|(k, _)| k.as_str() != "id")
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Number of keys, `id` included.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build a mapping from a JSON object payload.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, Value::from_json(v)))
                .collect()),
            other => Err(Error::TypeMismatch {
                expected: "json object",
                actual: Value::from_json(other).type_name(),
            }),
        }
    }

    /// Parse a mapping from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|_| Error::TypeMismatch {
                expected: "json object",
                actual: "malformed json",
            })?;
        Self::from_json(value)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl IntoIterator for Attributes {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_id() {
        let attrs = Attributes::with_id(1);
        assert_eq!(attrs.id().unwrap(), Some(Id::Int(1)));
        assert_eq!(attrs.fields().count(), 0);
    }

    #[test]
    fn test_missing_and_null_id() {
        assert_eq!(Attributes::new().id().unwrap(), None);
        let attrs = Attributes::new().with("id", Value::Null);
        assert_eq!(attrs.id().unwrap(), None);
    }

    #[test]
    fn test_invalid_id() {
        let attrs = Attributes::new().with("id", true);
        assert_eq!(attrs.id(), Err(Error::InvalidId { actual: "bool" }));
    }

    #[test]
    fn test_fields_skip_id() {
        let attrs = Attributes::with_id("a").with("body", "hello");
        let fields: Vec<_> = attrs.fields().collect();
        assert_eq!(fields, vec![("body", &Value::Text("hello".into()))]);
    }

    #[test]
    fn test_from_json() {
        let attrs =
            Attributes::from_json(serde_json::json!({"id": 3, "body": "x", "meta": {"k": 1}}))
                .unwrap();
        assert_eq!(attrs.id().unwrap(), Some(Id::Int(3)));
        assert_eq!(attrs.get("body"), Some(&Value::Text("x".into())));
        assert!(matches!(attrs.get("meta"), Some(Value::Json(_))));
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        assert!(Attributes::from_json(serde_json::json!([1, 2])).is_err());
        assert!(Attributes::from_json_str("{not json").is_err());
        assert_eq!(
            Attributes::from_json_str(r#"{"id":"c1"}"#)
                .unwrap()
                .id()
                .unwrap(),
            Some(Id::Text("c1".into()))
        );
    }

    #[test]
    fn test_serde_is_transparent() {
        let attrs = Attributes::with_id(7);
        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"id":{"Int":7}}"#);
    }
}

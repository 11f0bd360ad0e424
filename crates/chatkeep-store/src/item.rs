use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single attribute value. Strings and signed integers cover every record
/// Chatkeep persists; timestamps travel as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String attribute.
    S(String),
    /// Number attribute.
    N(i64),
}

impl AttributeValue {
    /// The string payload, if this is a string.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            AttributeValue::N(_) => None,
        }
    }

    /// The numeric payload, if this is a number.
    pub fn as_n(&self) -> Option<i64> {
        match self {
            AttributeValue::N(n) => Some(*n),
            AttributeValue::S(_) => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::S(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::S(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::N(value)
    }
}

/// An attribute map, the unit of storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(BTreeMap<String, AttributeValue>);

impl Item {
    /// An empty item.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Item::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or replace an attribute.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Look up an attribute.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    /// Look up a string attribute.
    pub fn get_s(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttributeValue::as_s)
    }

    /// Look up a number attribute.
    pub fn get_n(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(AttributeValue::as_n)
    }

    /// Whether the attribute is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Remove an attribute, returning it.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.0.remove(name)
    }

    /// Iterate attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the item has no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Primary key of an item: partition key plus optional sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    /// Partition key value.
    pub partition: String,
    /// Sort key value, for tables that declare one.
    pub sort: Option<String>,
}

impl Key {
    /// Key of a table without a sort key.
    pub fn partition(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: None,
        }
    }

    /// Key of a table with a sort key.
    pub fn composite(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: Some(sort.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let item = Item::new().with("user_id", "u1").with("token_usage", 42i64);
        assert_eq!(item.get_s("user_id"), Some("u1"));
        assert_eq!(item.get_n("token_usage"), Some(42));
        assert_eq!(item.get_n("user_id"), None);
        assert_eq!(item.get_s("missing"), None);
        assert_eq!(item.len(), 2);
    }

    #[test]
    fn test_item_json_is_a_flat_map() {
        let item = Item::new().with("a", "x").with("b", 1i64);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json, serde_json::json!({"a": {"S": "x"}, "b": {"N": 1}}));
    }
}

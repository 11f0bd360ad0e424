use crate::item::{Item, Key};
use chatkeep_core::{ChatkeepError, ChatkeepResult};
use serde::{Deserialize, Serialize};

/// Declares a table: its key attributes and optional TTL attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Name of the partition key attribute (string valued).
    pub partition_key: String,
    /// Name of the sort key attribute (string valued), if any.
    pub sort_key: Option<String>,
    /// Number attribute holding an epoch-millisecond expiry, if any.
    pub ttl_attribute: Option<String>,
}

impl TableSchema {
    /// A table keyed by partition only.
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
            ttl_attribute: None,
        }
    }

    /// Add a sort key attribute.
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    /// Enable TTL expiry on the given number attribute.
    pub fn with_ttl_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.ttl_attribute = Some(attribute.into());
        self
    }

    /// Extract the primary key of an item.
    pub fn key_of(&self, item: &Item) -> ChatkeepResult<Key> {
        let partition = item.get_s(&self.partition_key).ok_or_else(|| {
            ChatkeepError::Store(format!(
                "item for table '{}' lacks string key attribute '{}'",
                self.name, self.partition_key
            ))
        })?;
        let sort = match &self.sort_key {
            Some(name) => Some(
                item.get_s(name)
                    .ok_or_else(|| {
                        ChatkeepError::Store(format!(
                            "item for table '{}' lacks string sort key '{}'",
                            self.name, name
                        ))
                    })?
                    .to_string(),
            ),
            None => None,
        };
        Ok(Key {
            partition: partition.to_string(),
            sort,
        })
    }

    /// Check a key's shape against the schema.
    pub fn check_key(&self, key: &Key) -> ChatkeepResult<()> {
        match (&self.sort_key, &key.sort) {
            (Some(_), Some(_)) | (None, None) => Ok(()),
            (Some(name), None) => Err(ChatkeepError::Store(format!(
                "key for table '{}' is missing sort key '{}'",
                self.name, name
            ))),
            (None, Some(_)) => Err(ChatkeepError::Store(format!(
                "table '{}' has no sort key",
                self.name
            ))),
        }
    }

    /// The key attributes as an item, used when an update creates an item.
    pub fn key_item(&self, key: &Key) -> Item {
        let mut item = Item::new().with(self.partition_key.clone(), key.partition.clone());
        if let (Some(name), Some(sort)) = (&self.sort_key, &key.sort) {
            item.set(name.clone(), sort.clone());
        }
        item
    }

    /// Whether an attribute is part of the primary key.
    pub fn is_key_attribute(&self, name: &str) -> bool {
        name == self.partition_key || self.sort_key.as_deref() == Some(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_extraction() {
        let schema = TableSchema::new("Messages", "user_id").with_sort_key("sort_key");
        let item = Item::new().with("user_id", "u1").with("sort_key", "s#1");
        assert_eq!(schema.key_of(&item).unwrap(), Key::composite("u1", "s#1"));

        let missing = Item::new().with("user_id", "u1");
        assert!(schema.key_of(&missing).is_err());
    }

    #[test]
    fn test_key_shape_checked() {
        let schema = TableSchema::new("Active", "user_id");
        assert!(schema.check_key(&Key::partition("u1")).is_ok());
        assert!(schema.check_key(&Key::composite("u1", "x")).is_err());
        assert!(schema.is_key_attribute("user_id"));
        assert!(!schema.is_key_attribute("session_id"));
    }
}

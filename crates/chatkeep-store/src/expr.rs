use crate::item::{AttributeValue, Item};
use chatkeep_core::{ChatkeepError, ChatkeepResult};
use serde::{Deserialize, Serialize};

/// Predicate over the current state of an item, evaluated atomically with
/// the write it guards. A missing item has no attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// The attribute is present.
    AttributeExists(String),
    /// The attribute is absent (or the whole item is).
    AttributeNotExists(String),
    /// The attribute is present and equal to the value.
    Equals(String, AttributeValue),
    /// Every inner condition holds.
    All(Vec<Condition>),
}

impl Condition {
    /// Shorthand for [`Condition::AttributeExists`].
    pub fn exists(name: impl Into<String>) -> Self {
        Condition::AttributeExists(name.into())
    }

    /// Shorthand for [`Condition::AttributeNotExists`].
    pub fn not_exists(name: impl Into<String>) -> Self {
        Condition::AttributeNotExists(name.into())
    }

    /// Shorthand for [`Condition::Equals`].
    pub fn equals(name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Condition::Equals(name.into(), value.into())
    }

    /// Evaluate against the stored item, if any.
    pub fn evaluate(&self, item: Option<&Item>) -> bool {
        match self {
            Condition::AttributeExists(name) => item.is_some_and(|i| i.contains(name)),
            Condition::AttributeNotExists(name) => !item.is_some_and(|i| i.contains(name)),
            Condition::Equals(name, expected) => {
                item.and_then(|i| i.get(name)) == Some(expected)
            }
            Condition::All(conditions) => conditions.iter().all(|c| c.evaluate(item)),
        }
    }
}

/// One clause of an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateAction {
    /// Overwrite the attribute.
    Set(String, AttributeValue),
    /// Write the attribute only when it is absent.
    SetIfAbsent(String, AttributeValue),
    /// Add to a number attribute, treating an absent one as zero.
    Add(String, i64),
}

impl UpdateAction {
    /// Name of the attribute the clause touches.
    pub fn attribute(&self) -> &str {
        match self {
            UpdateAction::Set(name, _)
            | UpdateAction::SetIfAbsent(name, _)
            | UpdateAction::Add(name, _) => name,
        }
    }

    pub(crate) fn apply(&self, item: &mut Item) -> ChatkeepResult<()> {
        match self {
            UpdateAction::Set(name, value) => item.set(name.clone(), value.clone()),
            UpdateAction::SetIfAbsent(name, value) => {
                if !item.contains(name) {
                    item.set(name.clone(), value.clone());
                }
            }
            UpdateAction::Add(name, delta) => {
                let current = match item.get(name) {
                    None => 0,
                    Some(AttributeValue::N(n)) => *n,
                    Some(AttributeValue::S(_)) => {
                        return Err(ChatkeepError::Store(format!(
                            "cannot ADD to string attribute '{name}'"
                        )))
                    }
                };
                item.set(name.clone(), current.saturating_add(*delta));
            }
        }
        Ok(())
    }
}

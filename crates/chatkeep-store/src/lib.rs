//! Storage layer for Chatkeep.
//!
//! Models the subset of a managed key-value store that session coordination
//! relies on: items keyed by partition and sort key, conditional writes,
//! atomic update clauses, range queries with cursors, per-table change
//! streams, and TTL expiry.
//!
//! # Main types
//!
//! - [`KeyValueStore`]: Item-level contract every backend implements.
//! - [`StoreHost`]: Change feeds and TTL sweeps offered by a hosted store.
//! - [`InMemoryKvStore`]: Process-local store used in tests and embedding.
//! - [`FileKvStore`]: Journal-backed persistent store.
//! - [`ChangeFeed`]: Receiving end of a table's change stream.

/// Change events, feeds, and their fan-out.
pub mod change;
/// Condition expressions and update clauses.
pub mod expr;
/// Journal-backed persistent store.
pub mod file;
/// Attribute values, items, and primary keys.
pub mod item;
/// Store traits, query types, and the in-memory store.
pub mod store;
/// Table schemas.
pub mod table;

pub use change::{ChangeEvent, ChangeEventType, ChangeFeed};
pub use expr::{Condition, UpdateAction};
pub use file::FileKvStore;
pub use item::{AttributeValue, Item, Key};
pub use store::{
    spawn_ttl_reaper, InMemoryKvStore, KeyValueStore, QueryOptions, QueryPage, StoreHost,
    WriteOutcome,
};
pub use table::TableSchema;

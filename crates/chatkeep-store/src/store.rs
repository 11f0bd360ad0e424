use crate::change::{ChangeEvent, ChangeEventType, ChangeFeed, ChangePublisher};
use crate::expr::{Condition, UpdateAction};
use crate::item::{Item, Key};
use crate::table::TableSchema;
use async_trait::async_trait;
use chatkeep_core::{ChatkeepError, ChatkeepResult, Clock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The condition held (or there was none) and the write happened.
    Applied,
    /// The condition did not hold; nothing was written.
    ConditionFailed,
}

impl WriteOutcome {
    /// Whether the write happened.
    pub fn is_applied(self) -> bool {
        self == WriteOutcome::Applied
    }
}

/// Options of a range query within one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Sort key of the last item of the previous page; results start after it.
    pub exclusive_start: Option<String>,
    /// Maximum number of items; `None` means no limit.
    pub limit: Option<usize>,
    /// Newest (greatest sort key) first.
    pub descending: bool,
    /// Only sort keys starting with this prefix.
    pub sort_key_prefix: Option<String>,
}

impl QueryOptions {
    /// Ascending query without a limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the page size.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Greatest sort key first.
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Resume after the given sort key.
    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.exclusive_start = cursor;
        self
    }

    /// Restrict to sort keys with the given prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_key_prefix = Some(prefix.into());
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPage {
    /// Items in query order.
    pub items: Vec<Item>,
    /// Sort key to resume from, present only when more items match.
    pub last_key: Option<String>,
}

/// The item-level contract of a remote key-value store.
///
/// Every call is a potentially slow network operation. Transient failures
/// surface as [`ChatkeepError::StoreUnavailable`]; failed conditions are
/// reported through [`WriteOutcome`], never as errors.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch one item by primary key.
    async fn get_item(&self, table: &str, key: &Key) -> ChatkeepResult<Option<Item>>;

    /// Write a whole item, replacing any existing one, if the condition holds.
    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: Option<Condition>,
    ) -> ChatkeepResult<WriteOutcome>;

    /// Apply update clauses if the condition holds. A missing item is
    /// created from its key, so unguarded updates upsert.
    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        updates: Vec<UpdateAction>,
        condition: Option<Condition>,
    ) -> ChatkeepResult<WriteOutcome>;

    /// Delete an item if the condition holds. Deleting a missing item
    /// without a condition succeeds.
    async fn delete_item(
        &self,
        table: &str,
        key: &Key,
        condition: Option<Condition>,
    ) -> ChatkeepResult<WriteOutcome>;

    /// Range query over one partition, ordered by sort key.
    async fn query(
        &self,
        table: &str,
        partition: &str,
        options: QueryOptions,
    ) -> ChatkeepResult<QueryPage>;
}

/// Facilities of a hosted store beyond the item contract: change streams
/// and the store's own TTL process.
#[async_trait]
pub trait StoreHost: KeyValueStore {
    /// Follow mutations of `table`.
    fn subscribe(&self, table: &str) -> ChangeFeed;

    /// Delete every TTL'd item whose expiry is at or before `now`, emitting
    /// REMOVE events identical to explicit deletes. Returns how many went.
    async fn expire_due(&self, now: DateTime<Utc>) -> ChatkeepResult<usize>;

    /// End every feed. Events already queued are still delivered; later
    /// mutations are not published to feeds subscribed before the call.
    fn close_feeds(&self);
}

/// Run the TTL sweep of `store` every `every` until the task is aborted.
pub fn spawn_ttl_reaper(
    store: Arc<dyn StoreHost>,
    clock: Arc<dyn Clock>,
    every: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.expire_due(clock.now()).await {
                Ok(0) => {}
                Ok(reaped) => debug!(reaped, "Expired items removed"),
                Err(e) => warn!(error = %e, "TTL sweep failed"),
            }
        }
    })
}

/// A durable record of one applied mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub(crate) enum JournalEntry {
    Put { table: String, item: Item },
    Delete { table: String, key: Key },
}

/// Sink that must accept a mutation before it becomes visible.
#[async_trait]
pub(crate) trait Journal: Send + Sync {
    async fn record(&self, entry: &JournalEntry) -> ChatkeepResult<()>;
}

struct TableState {
    schema: TableSchema,
    items: BTreeMap<Key, Item>,
}

/// In-memory store with DynamoDB-like semantics.
///
/// Each operation runs under one write lock, so conditions are evaluated
/// atomically with their write. TTL'd items stay visible until
/// [`StoreHost::expire_due`] reaps them, as in a real store.
pub struct InMemoryKvStore {
    tables: RwLock<HashMap<String, TableState>>,
    changes: ChangePublisher,
    journal: Option<Arc<dyn Journal>>,
}

impl InMemoryKvStore {
    /// A store with no tables.
    pub fn new() -> Self {
        Self::with_tables(Vec::new())
    }

    /// A store with the given tables.
    pub fn with_tables(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        let tables = schemas
            .into_iter()
            .map(|schema| {
                (
                    schema.name.clone(),
                    TableState {
                        schema,
                        items: BTreeMap::new(),
                    },
                )
            })
            .collect();
        Self {
            tables: RwLock::new(tables),
            changes: ChangePublisher::default(),
            journal: None,
        }
    }

    pub(crate) fn with_journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Declare a table. Re-declaring an identical schema is a no-op.
    pub async fn create_table(&self, schema: TableSchema) -> ChatkeepResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.get(&schema.name) {
            if existing.schema == schema {
                return Ok(());
            }
            return Err(ChatkeepError::Store(format!(
                "table '{}' already exists with a different schema",
                schema.name
            )));
        }
        tables.insert(
            schema.name.clone(),
            TableState {
                schema,
                items: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Number of items in a table.
    pub async fn item_count(&self, table: &str) -> ChatkeepResult<usize> {
        let tables = self.tables.read().await;
        Ok(table_ref(&tables, table)?.items.len())
    }

    /// Apply a journal entry directly: no condition, no event, no journal write.
    pub(crate) async fn replay(&self, entry: JournalEntry) -> ChatkeepResult<()> {
        let mut tables = self.tables.write().await;
        match entry {
            JournalEntry::Put { table, item } => {
                let state = table_mut(&mut tables, &table)?;
                let key = state.schema.key_of(&item)?;
                state.items.insert(key, item);
            }
            JournalEntry::Delete { table, key } => {
                table_mut(&mut tables, &table)?.items.remove(&key);
            }
        }
        Ok(())
    }

    /// Every stored item as a put entry, for journal compaction.
    pub(crate) async fn snapshot(&self) -> Vec<JournalEntry> {
        let tables = self.tables.read().await;
        let mut names: Vec<&String> = tables.keys().collect();
        names.sort();
        names
            .into_iter()
            .flat_map(|name| {
                tables[name].items.values().map(|item| JournalEntry::Put {
                    table: name.clone(),
                    item: item.clone(),
                })
            })
            .collect()
    }

    /// Journal, apply and publish one mutation. Caller holds the write lock.
    async fn commit(
        &self,
        table_name: &str,
        table: &mut TableState,
        key: Key,
        old: Option<Item>,
        new: Option<Item>,
    ) -> ChatkeepResult<()> {
        if let Some(journal) = &self.journal {
            let entry = match &new {
                Some(item) => JournalEntry::Put {
                    table: table_name.to_string(),
                    item: item.clone(),
                },
                None => JournalEntry::Delete {
                    table: table_name.to_string(),
                    key: key.clone(),
                },
            };
            journal.record(&entry).await?;
        }

        match &new {
            Some(item) => {
                table.items.insert(key, item.clone());
            }
            None => {
                table.items.remove(&key);
            }
        }

        let event_type = match (&old, &new) {
            (None, Some(_)) => ChangeEventType::Insert,
            (Some(_), Some(_)) => ChangeEventType::Modify,
            (Some(_), None) => ChangeEventType::Remove,
            (None, None) => return Ok(()),
        };
        self.changes.publish(ChangeEvent {
            table: table_name.to_string(),
            event_type,
            old_image: old,
            new_image: new,
        });
        Ok(())
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

fn table_ref<'a>(
    tables: &'a HashMap<String, TableState>,
    name: &str,
) -> ChatkeepResult<&'a TableState> {
    tables
        .get(name)
        .ok_or_else(|| ChatkeepError::Store(format!("unknown table '{name}'")))
}

fn table_mut<'a>(
    tables: &'a mut HashMap<String, TableState>,
    name: &str,
) -> ChatkeepResult<&'a mut TableState> {
    tables
        .get_mut(name)
        .ok_or_else(|| ChatkeepError::Store(format!("unknown table '{name}'")))
}

fn passes(condition: Option<&Condition>, current: Option<&Item>) -> bool {
    condition.map_or(true, |c| c.evaluate(current))
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn get_item(&self, table: &str, key: &Key) -> ChatkeepResult<Option<Item>> {
        let tables = self.tables.read().await;
        let state = table_ref(&tables, table)?;
        state.schema.check_key(key)?;
        Ok(state.items.get(key).cloned())
    }

    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: Option<Condition>,
    ) -> ChatkeepResult<WriteOutcome> {
        let mut tables = self.tables.write().await;
        let state = table_mut(&mut tables, table)?;
        let key = state.schema.key_of(&item)?;
        let current = state.items.get(&key).cloned();
        if !passes(condition.as_ref(), current.as_ref()) {
            return Ok(WriteOutcome::ConditionFailed);
        }
        self.commit(table, state, key, current, Some(item)).await?;
        Ok(WriteOutcome::Applied)
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        updates: Vec<UpdateAction>,
        condition: Option<Condition>,
    ) -> ChatkeepResult<WriteOutcome> {
        let mut tables = self.tables.write().await;
        let state = table_mut(&mut tables, table)?;
        state.schema.check_key(key)?;
        if let Some(action) = updates
            .iter()
            .find(|a| state.schema.is_key_attribute(a.attribute()))
        {
            return Err(ChatkeepError::Store(format!(
                "cannot update key attribute '{}'",
                action.attribute()
            )));
        }

        let current = state.items.get(key).cloned();
        if !passes(condition.as_ref(), current.as_ref()) {
            return Ok(WriteOutcome::ConditionFailed);
        }

        let mut next = current
            .clone()
            .unwrap_or_else(|| state.schema.key_item(key));
        for action in &updates {
            action.apply(&mut next)?;
        }
        self.commit(table, state, key.clone(), current, Some(next))
            .await?;
        Ok(WriteOutcome::Applied)
    }

    async fn delete_item(
        &self,
        table: &str,
        key: &Key,
        condition: Option<Condition>,
    ) -> ChatkeepResult<WriteOutcome> {
        let mut tables = self.tables.write().await;
        let state = table_mut(&mut tables, table)?;
        state.schema.check_key(key)?;
        let current = state.items.get(key).cloned();
        if !passes(condition.as_ref(), current.as_ref()) {
            return Ok(WriteOutcome::ConditionFailed);
        }
        if current.is_some() {
            self.commit(table, state, key.clone(), current, None).await?;
        }
        Ok(WriteOutcome::Applied)
    }

    async fn query(
        &self,
        table: &str,
        partition: &str,
        options: QueryOptions,
    ) -> ChatkeepResult<QueryPage> {
        let tables = self.tables.read().await;
        let state = table_ref(&tables, table)?;
        let sort_of = |key: &Key| key.sort.clone().unwrap_or_default();

        let mut matching: Vec<(&Key, &Item)> = state
            .items
            .range(Key::partition(partition)..)
            .take_while(|(key, _)| key.partition == partition)
            .filter(|(key, _)| match &options.sort_key_prefix {
                Some(prefix) => sort_of(key).starts_with(prefix.as_str()),
                None => true,
            })
            .collect();

        if options.descending {
            matching.reverse();
        }
        if let Some(start) = &options.exclusive_start {
            matching.retain(|(key, _)| {
                let sort = sort_of(key);
                if options.descending {
                    sort < *start
                } else {
                    sort > *start
                }
            });
        }

        let limit = options.limit.unwrap_or(usize::MAX);
        let has_more = matching.len() > limit;
        matching.truncate(limit);

        let last_key = if has_more {
            matching.last().map(|(key, _)| sort_of(key))
        } else {
            None
        };
        Ok(QueryPage {
            items: matching.into_iter().map(|(_, item)| item.clone()).collect(),
            last_key,
        })
    }
}

#[async_trait]
impl StoreHost for InMemoryKvStore {
    fn subscribe(&self, table: &str) -> ChangeFeed {
        self.changes.subscribe(table)
    }

    fn close_feeds(&self) {
        self.changes.close();
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> ChatkeepResult<usize> {
        let now_ms = now.timestamp_millis();
        let mut tables = self.tables.write().await;
        let mut reaped = 0;

        for (name, state) in tables.iter_mut() {
            let Some(ttl) = state.schema.ttl_attribute.clone() else {
                continue;
            };
            let due: Vec<Key> = state
                .items
                .iter()
                .filter(|(_, item)| item.get_n(&ttl).is_some_and(|at| at <= now_ms))
                .map(|(key, _)| key.clone())
                .collect();
            for key in due {
                let old = state.items.get(&key).cloned();
                self.commit(name, state, key, old, None).await?;
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn active_schema() -> TableSchema {
        TableSchema::new("Active", "user_id").with_ttl_attribute("expires_at")
    }

    fn messages_schema() -> TableSchema {
        TableSchema::new("Messages", "user_id").with_sort_key("sort_key")
    }

    fn store() -> InMemoryKvStore {
        InMemoryKvStore::with_tables([active_schema(), messages_schema()])
    }

    fn message(user: &str, sort: &str) -> Item {
        Item::new().with("user_id", user).with("sort_key", sort)
    }

    #[tokio::test]
    async fn test_conditional_put_only_once() {
        let store = store();
        let first = Item::new().with("user_id", "u1").with("session_id", "s1");
        let second = Item::new().with("user_id", "u1").with("session_id", "s2");

        let cond = || Some(Condition::not_exists("user_id"));
        assert_eq!(
            store.put_item("Active", first, cond()).await.unwrap(),
            WriteOutcome::Applied
        );
        assert_eq!(
            store.put_item("Active", second, cond()).await.unwrap(),
            WriteOutcome::ConditionFailed
        );

        let stored = store
            .get_item("Active", &Key::partition("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get_s("session_id"), Some("s1"));
    }

    #[tokio::test]
    async fn test_guarded_update_and_upsert() {
        let store = store();
        let key = Key::partition("u1");

        let guarded = store
            .update_item(
                "Active",
                &key,
                vec![UpdateAction::Add("token_usage".into(), 5)],
                Some(Condition::equals("session_id", "s1")),
            )
            .await
            .unwrap();
        assert_eq!(guarded, WriteOutcome::ConditionFailed);
        assert!(store.get_item("Active", &key).await.unwrap().is_none());

        store
            .update_item(
                "Active",
                &key,
                vec![UpdateAction::Set("session_id".into(), "s1".into())],
                None,
            )
            .await
            .unwrap();
        let created = store.get_item("Active", &key).await.unwrap().unwrap();
        assert_eq!(created.get_s("user_id"), Some("u1"));
        assert_eq!(created.get_s("session_id"), Some("s1"));
    }

    #[tokio::test]
    async fn test_key_attributes_are_immutable() {
        let store = store();
        let result = store
            .update_item(
                "Active",
                &Key::partition("u1"),
                vec![UpdateAction::Set("user_id".into(), "u2".into())],
                None,
            )
            .await;
        assert!(matches!(result, Err(ChatkeepError::Store(_))));
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let store = store();
        let result = store.get_item("Nope", &Key::partition("u1")).await;
        assert!(matches!(result, Err(ChatkeepError::Store(_))));
    }

    #[tokio::test]
    async fn test_query_descending_with_cursor() {
        let store = store();
        for sort in ["a", "b", "c", "d", "e"] {
            store
                .put_item("Messages", message("u1", sort), None)
                .await
                .unwrap();
        }
        store
            .put_item("Messages", message("u2", "z"), None)
            .await
            .unwrap();

        let page = store
            .query("Messages", "u1", QueryOptions::new().descending().limit(2))
            .await
            .unwrap();
        let sorts: Vec<_> = page.items.iter().map(|i| i.get_s("sort_key").unwrap()).collect();
        assert_eq!(sorts, ["e", "d"]);
        assert_eq!(page.last_key.as_deref(), Some("d"));

        let page = store
            .query(
                "Messages",
                "u1",
                QueryOptions::new().descending().limit(3).after(page.last_key),
            )
            .await
            .unwrap();
        let sorts: Vec<_> = page.items.iter().map(|i| i.get_s("sort_key").unwrap()).collect();
        assert_eq!(sorts, ["c", "b", "a"]);
        assert_eq!(page.last_key, None);
    }

    #[tokio::test]
    async fn test_query_prefix_ascending() {
        let store = store();
        for sort in ["s1#1", "s1#2", "s2#1"] {
            store
                .put_item("Messages", message("u1", sort), None)
                .await
                .unwrap();
        }
        let page = store
            .query("Messages", "u1", QueryOptions::new().prefix("s1#"))
            .await
            .unwrap();
        let sorts: Vec<_> = page.items.iter().map(|i| i.get_s("sort_key").unwrap()).collect();
        assert_eq!(sorts, ["s1#1", "s1#2"]);
    }

    #[tokio::test]
    async fn test_events_for_every_mutation() {
        let store = store();
        let mut feed = store.subscribe("Active");
        let key = Key::partition("u1");

        store
            .put_item("Active", Item::new().with("user_id", "u1"), None)
            .await
            .unwrap();
        store
            .update_item(
                "Active",
                &key,
                vec![UpdateAction::Add("token_usage".into(), 3)],
                None,
            )
            .await
            .unwrap();
        store.delete_item("Active", &key, None).await.unwrap();
        store.delete_item("Active", &key, None).await.unwrap();

        let kinds: Vec<_> = feed.drain(10).into_iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            [
                ChangeEventType::Insert,
                ChangeEventType::Modify,
                ChangeEventType::Remove
            ]
        );
    }

    #[tokio::test]
    async fn test_expire_due_emits_remove_with_old_image() {
        let store = store();
        let mut feed = store.subscribe("Active");
        let now = Utc.timestamp_opt(1_000, 0).unwrap();
        let item = Item::new()
            .with("user_id", "u1")
            .with("session_id", "s1")
            .with("expires_at", now.timestamp_millis());
        store.put_item("Active", item.clone(), None).await.unwrap();
        feed.drain(10);

        let early = Utc.timestamp_opt(999, 0).unwrap();
        assert_eq!(store.expire_due(early).await.unwrap(), 0);
        assert_eq!(store.expire_due(now).await.unwrap(), 1);
        assert!(store
            .get_item("Active", &Key::partition("u1"))
            .await
            .unwrap()
            .is_none());

        let events = feed.drain(10);
        assert_eq!(events, vec![ChangeEvent::remove("Active", item)]);
    }
}

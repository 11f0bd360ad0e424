use crate::change::ChangeFeed;
use crate::expr::{Condition, UpdateAction};
use crate::item::{Item, Key};
use crate::store::{
    InMemoryKvStore, Journal, JournalEntry, KeyValueStore, QueryOptions, QueryPage, StoreHost,
    WriteOutcome,
};
use crate::table::TableSchema;
use async_trait::async_trait;
use chatkeep_core::{ChatkeepError, ChatkeepResult};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Append-only JSONL journal of applied mutations.
struct FileJournal {
    file: Mutex<tokio::fs::File>,
}

#[async_trait]
impl Journal for FileJournal {
    async fn record(&self, entry: &JournalEntry) -> ChatkeepResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| ChatkeepError::StoreUnavailable(format!("Failed to append journal: {e}")))?;
        file.flush()
            .await
            .map_err(|e| ChatkeepError::StoreUnavailable(format!("Failed to flush journal: {e}")))?;
        Ok(())
    }
}

/// A store persisted to a single JSONL journal.
///
/// Every mutation is appended to the journal before it becomes visible.
/// On open the journal is replayed and rewritten as one put per live item.
pub struct FileKvStore {
    path: PathBuf,
    inner: InMemoryKvStore,
}

impl FileKvStore {
    /// Open (or create) the journal at `path` with the given tables.
    pub async fn open(
        path: impl AsRef<Path>,
        schemas: impl IntoIterator<Item = TableSchema>,
    ) -> ChatkeepResult<Self> {
        let path = path.as_ref().to_path_buf();
        let replayed = InMemoryKvStore::with_tables(schemas);

        let mut applied = 0usize;
        if path.exists() {
            let data = tokio::fs::read_to_string(&path).await.map_err(|e| {
                ChatkeepError::Store(format!("Failed to read journal {}: {e}", path.display()))
            })?;
            let lines: Vec<&str> = data.lines().filter(|l| !l.trim().is_empty()).collect();
            for (index, line) in lines.iter().enumerate() {
                match serde_json::from_str::<JournalEntry>(line) {
                    Ok(entry) => {
                        replayed.replay(entry).await?;
                        applied += 1;
                    }
                    // A torn final line is an append that never completed.
                    Err(e) if index + 1 == lines.len() => {
                        warn!(path = %path.display(), error = %e, "Dropping torn journal tail");
                    }
                    Err(e) => {
                        return Err(ChatkeepError::Store(format!(
                            "Invalid journal entry at line {}: {e}",
                            index + 1
                        )))
                    }
                }
            }
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ChatkeepError::Store(format!("Failed to create dir: {e}")))?;
        }

        compact(&path, &replayed.snapshot().await).await?;
        info!(path = %path.display(), replayed = applied, "Opened file store");

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| ChatkeepError::Store(format!("Failed to open journal: {e}")))?;
        let inner = replayed.with_journal(Arc::new(FileJournal {
            file: Mutex::new(file),
        }));
        Ok(Self { path, inner })
    }

    /// Location of the journal.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of items in a table.
    pub async fn item_count(&self, table: &str) -> ChatkeepResult<usize> {
        self.inner.item_count(table).await
    }
}

/// Rewrite the journal as a snapshot via a temp file and rename.
async fn compact(path: &Path, entries: &[JournalEntry]) -> ChatkeepResult<()> {
    let mut data = String::new();
    for entry in entries {
        data.push_str(&serde_json::to_string(entry)?);
        data.push('\n');
    }
    let tmp = path.with_extension("jsonl.tmp");
    tokio::fs::write(&tmp, data.as_bytes())
        .await
        .map_err(|e| ChatkeepError::Store(format!("Failed to write snapshot: {e}")))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| ChatkeepError::Store(format!("Failed to replace journal: {e}")))?;
    Ok(())
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn get_item(&self, table: &str, key: &Key) -> ChatkeepResult<Option<Item>> {
        self.inner.get_item(table, key).await
    }

    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: Option<Condition>,
    ) -> ChatkeepResult<WriteOutcome> {
        self.inner.put_item(table, item, condition).await
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        updates: Vec<UpdateAction>,
        condition: Option<Condition>,
    ) -> ChatkeepResult<WriteOutcome> {
        self.inner.update_item(table, key, updates, condition).await
    }

    async fn delete_item(
        &self,
        table: &str,
        key: &Key,
        condition: Option<Condition>,
    ) -> ChatkeepResult<WriteOutcome> {
        self.inner.delete_item(table, key, condition).await
    }

    async fn query(
        &self,
        table: &str,
        partition: &str,
        options: QueryOptions,
    ) -> ChatkeepResult<QueryPage> {
        self.inner.query(table, partition, options).await
    }
}

#[async_trait]
impl StoreHost for FileKvStore {
    fn subscribe(&self, table: &str) -> ChangeFeed {
        self.inner.subscribe(table)
    }

    fn close_feeds(&self) {
        self.inner.close_feeds();
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> ChatkeepResult<usize> {
        self.inner.expire_due(now).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn schemas() -> Vec<TableSchema> {
        vec![TableSchema::new("Messages", "user_id").with_sort_key("sort_key")]
    }

    fn message(sort: &str, content: &str) -> Item {
        Item::new()
            .with("user_id", "u1")
            .with("sort_key", sort)
            .with("content", content)
    }

    #[tokio::test]
    async fn test_reopen_restores_items() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.jsonl");

        {
            let store = FileKvStore::open(&path, schemas()).await.unwrap();
            store
                .put_item("Messages", message("a", "hello"), None)
                .await
                .unwrap();
            store
                .put_item("Messages", message("b", "world"), None)
                .await
                .unwrap();
            store
                .delete_item("Messages", &Key::composite("u1", "a"), None)
                .await
                .unwrap();
        }

        let store = FileKvStore::open(&path, schemas()).await.unwrap();
        assert_eq!(store.item_count("Messages").await.unwrap(), 1);
        let item = store
            .get_item("Messages", &Key::composite("u1", "b"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.get_s("content"), Some("world"));
    }

    #[tokio::test]
    async fn test_open_compacts_journal() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.jsonl");

        {
            let store = FileKvStore::open(&path, schemas()).await.unwrap();
            for i in 0..5 {
                store
                    .put_item("Messages", message("a", &format!("v{i}")), None)
                    .await
                    .unwrap();
            }
        }
        let before = std::fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(before, 5);

        let _store = FileKvStore::open(&path, schemas()).await.unwrap();
        let after = std::fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(after, 1);
    }

    #[tokio::test]
    async fn test_torn_tail_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.jsonl");
        {
            let store = FileKvStore::open(&path, schemas()).await.unwrap();
            store
                .put_item("Messages", message("a", "kept"), None)
                .await
                .unwrap();
        }
        let mut data = std::fs::read_to_string(&path).unwrap();
        data.push_str("{\"op\":\"put\",\"table\":\"Mess");
        std::fs::write(&path, data).unwrap();

        let store = FileKvStore::open(&path, schemas()).await.unwrap();
        assert_eq!(store.item_count("Messages").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.jsonl");
        std::fs::write(
            &path,
            "garbage\n{\"op\":\"delete\",\"table\":\"Messages\",\"key\":{\"partition\":\"u1\",\"sort\":\"a\"}}\n",
        )
        .unwrap();
        assert!(FileKvStore::open(&path, schemas()).await.is_err());
    }
}

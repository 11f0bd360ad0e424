use crate::item::Item;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of mutation a [`ChangeEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEventType {
    /// A new item was written.
    Insert,
    /// An existing item was replaced or updated.
    Modify,
    /// An item was deleted, explicitly or by TTL expiry.
    Remove,
}

/// One entry of a table's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the mutation happened in.
    pub table: String,
    /// What happened.
    pub event_type: ChangeEventType,
    /// Item state before the mutation (MODIFY, REMOVE).
    pub old_image: Option<Item>,
    /// Item state after the mutation (INSERT, MODIFY).
    pub new_image: Option<Item>,
}

impl ChangeEvent {
    /// A REMOVE event carrying the last known image.
    pub fn remove(table: impl Into<String>, old_image: Item) -> Self {
        Self {
            table: table.into(),
            event_type: ChangeEventType::Remove,
            old_image: Some(old_image),
            new_image: None,
        }
    }
}

/// Receiving end of a table's change stream.
///
/// Events are held in memory only. Nothing is redelivered: an event that is
/// still queued when the process exits is lost, so consumers that must not
/// miss a removal reconcile against the tables on startup.
pub struct ChangeFeed {
    table: String,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl ChangeFeed {
    /// A feed fed by the returned sender. Used by hosts that bridge an
    /// external stream, and by tests.
    pub fn channel(table: impl Into<String>) -> (mpsc::UnboundedSender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                table: table.into(),
                rx,
            },
        )
    }

    /// Table this feed follows.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Wait for at least one event, then drain up to `max` without waiting.
    /// Returns `None` once every sender is gone and the feed is empty.
    pub async fn next_batch(&mut self, max: usize) -> Option<Vec<ChangeEvent>> {
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        while batch.len() < max.max(1) {
            match self.rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        Some(batch)
    }

    /// Drain up to `max` already-queued events without waiting.
    pub fn drain(&mut self, max: usize) -> Vec<ChangeEvent> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        batch
    }
}

/// Fans store mutations out to the feeds subscribed to each table.
#[derive(Default)]
pub(crate) struct ChangePublisher {
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<ChangeEvent>)>>,
}

impl ChangePublisher {
    pub(crate) fn subscribe(&self, table: &str) -> ChangeFeed {
        let (tx, feed) = ChangeFeed::channel(table);
        self.subscribers.lock().push((table.to_string(), tx));
        feed
    }

    /// Drop every sender. Feeds end once their queued events are consumed.
    pub(crate) fn close(&self) {
        self.subscribers.lock().clear();
    }

    pub(crate) fn publish(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(table, tx)| {
            if *table != event.table {
                return !tx.is_closed();
            }
            tx.send(event.clone()).is_ok()
        });
    }
}

//! The ChatMessages table: every turn of every session, ordered per user
//! by `{session_id}#{millis}` sort keys.

use crate::codec::{ItemCodec, SORT_KEY};
use chatkeep_core::{
    validate_user_id, ChatkeepError, ChatkeepResult, MessageRecord, SenderType, SessionId,
};
use chatkeep_store::{Condition, KeyValueStore, QueryOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Largest history page a caller may ask for.
pub const MAX_PAGE_SIZE: usize = 100;

/// How many successive millisecond slots an append tries before giving up.
const MAX_SLOT_ATTEMPTS: u32 = 16;

/// One page of a user's history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Newest first.
    pub messages: Vec<MessageRecord>,
    /// Sort key to pass back for the next (older) page.
    pub next_cursor: Option<String>,
}

/// Append-only log of chat turns, partitioned by user.
#[derive(Clone)]
pub struct MessageLog {
    store: Arc<dyn KeyValueStore>,
    table: String,
}

impl MessageLog {
    /// Messages kept in `table` of `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Persist one turn. If its millisecond slot is taken, the turn moves to
    /// the next free one, so stored turns are never overwritten.
    pub async fn append(
        &self,
        user_id: &str,
        session_id: SessionId,
        sender_type: SenderType,
        content: &str,
        at: DateTime<Utc>,
    ) -> ChatkeepResult<MessageRecord> {
        let mut at = at;
        for _ in 0..MAX_SLOT_ATTEMPTS {
            let record = MessageRecord::new(user_id, session_id, sender_type, content, at)?;
            let outcome = self
                .store
                .put_item(
                    &self.table,
                    record.to_item(),
                    Some(Condition::not_exists(SORT_KEY)),
                )
                .await?;
            if outcome.is_applied() {
                return Ok(record);
            }
            debug!(user_id, sort_key = %record.sort_key, "Message slot taken, bumping");
            at = record.created_at + chrono::Duration::milliseconds(1);
        }
        Err(ChatkeepError::ConcurrencyConflict(format!(
            "no free message slot for user {user_id} in session {session_id}"
        )))
    }

    /// A page of the user's turns across all sessions, newest first.
    pub async fn query(
        &self,
        user_id: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> ChatkeepResult<HistoryPage> {
        validate_user_id(user_id)?;
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ChatkeepError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}, got {limit}"
            )));
        }
        let page = self
            .store
            .query(
                &self.table,
                user_id,
                QueryOptions::new().descending().limit(limit).after(cursor),
            )
            .await?;
        let messages = page
            .items
            .iter()
            .map(MessageRecord::from_item)
            .collect::<ChatkeepResult<Vec<_>>>()?;
        Ok(HistoryPage {
            messages,
            next_cursor: page.last_key,
        })
    }

    /// Every turn of one session, oldest first.
    pub async fn transcript(
        &self,
        user_id: &str,
        session_id: SessionId,
    ) -> ChatkeepResult<Vec<MessageRecord>> {
        let prefix = MessageRecord::session_prefix(session_id);
        let mut records = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .store
                .query(
                    &self.table,
                    user_id,
                    QueryOptions::new()
                        .prefix(prefix.clone())
                        .limit(MAX_PAGE_SIZE)
                        .after(cursor),
                )
                .await?;
            for item in &page.items {
                records.push(MessageRecord::from_item(item)?);
            }
            match page.last_key {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(records)
    }
}

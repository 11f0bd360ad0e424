//! The SessionMetadata table: one record per session, open until finalized.

use crate::codec::{
    self, ItemCodec, CREATED_AT, FINISHED_AT, SESSION_ID, SESSION_SUMMARY, TOKEN_USAGE,
};
use chatkeep_core::{ActiveSessionRecord, ChatkeepResult, SessionId, SessionMetadataRecord};
use chatkeep_store::{Condition, KeyValueStore, QueryOptions, UpdateAction};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Durable per-session records, keyed by user and session id.
#[derive(Clone)]
pub struct SessionMetadataStore {
    store: Arc<dyn KeyValueStore>,
    table: String,
}

impl SessionMetadataStore {
    /// Records kept in `table` of `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Write the open record once. Returns `false` if it already existed.
    pub async fn create(
        &self,
        user_id: &str,
        session_id: SessionId,
        created_at: DateTime<Utc>,
    ) -> ChatkeepResult<bool> {
        let record = SessionMetadataRecord::open(user_id, session_id, created_at)?;
        let outcome = self
            .store
            .put_item(
                &self.table,
                record.to_item(),
                Some(Condition::not_exists(SESSION_ID)),
            )
            .await?;
        Ok(outcome.is_applied())
    }

    /// Record the end of the session described by `ended`.
    ///
    /// The first finalize wins; later calls return `Ok(false)` and change
    /// nothing. A metadata record missing at this point is recreated, with
    /// `created_at` taken from the ended session.
    pub async fn finalize(
        &self,
        ended: &ActiveSessionRecord,
        summary: &str,
    ) -> ChatkeepResult<bool> {
        let key = codec::metadata_key(&ended.user_id, ended.session_id);
        let updates = vec![
            UpdateAction::Set(SESSION_SUMMARY.into(), summary.into()),
            UpdateAction::Set(FINISHED_AT.into(), codec::millis(ended.updated_at).into()),
            UpdateAction::Set(TOKEN_USAGE.into(), codec::tokens(ended.token_usage).into()),
            UpdateAction::SetIfAbsent(CREATED_AT.into(), codec::millis(ended.created_at).into()),
        ];
        let outcome = self
            .store
            .update_item(
                &self.table,
                &key,
                updates,
                Some(Condition::not_exists(FINISHED_AT)),
            )
            .await?;

        if outcome.is_applied() {
            info!(
                user_id = %ended.user_id,
                session_id = %ended.session_id,
                token_usage = ended.token_usage,
                "Session finalized"
            );
        } else {
            debug!(
                user_id = %ended.user_id,
                session_id = %ended.session_id,
                "Session already finalized"
            );
        }
        Ok(outcome.is_applied())
    }

    /// One session's record, if it exists.
    pub async fn get(
        &self,
        user_id: &str,
        session_id: SessionId,
    ) -> ChatkeepResult<Option<SessionMetadataRecord>> {
        let key = codec::metadata_key(user_id, session_id);
        self.store
            .get_item(&self.table, &key)
            .await?
            .map(|item| SessionMetadataRecord::from_item(&item))
            .transpose()
    }

    /// Every session of a user, newest first.
    pub async fn list_by_user(&self, user_id: &str) -> ChatkeepResult<Vec<SessionMetadataRecord>> {
        let mut records = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .store
                .query(
                    &self.table,
                    user_id,
                    QueryOptions::new().descending().limit(100).after(cursor),
                )
                .await?;
            for item in &page.items {
                records.push(SessionMetadataRecord::from_item(item)?);
            }
            match page.last_key {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(records)
    }

    /// Summaries of the `window` most recently finished sessions, oldest first.
    pub async fn recent_summaries(
        &self,
        user_id: &str,
        window: usize,
    ) -> ChatkeepResult<Vec<String>> {
        if window == 0 {
            return Ok(Vec::new());
        }
        let mut finished: Vec<SessionMetadataRecord> = self
            .list_by_user(user_id)
            .await?
            .into_iter()
            .filter(SessionMetadataRecord::is_finished)
            .collect();
        finished.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        finished.truncate(window);
        Ok(finished
            .into_iter()
            .rev()
            .map(|record| record.session_summary)
            .collect())
    }
}

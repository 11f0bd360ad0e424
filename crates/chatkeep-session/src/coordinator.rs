//! Maintains the single-active-session invariant per user.
//!
//! The store's conditional writes are the only synchronization: every step
//! reads the active record, decides, and writes under a condition on what it
//! read. A failed condition means another writer got there first, so the
//! loop starts over from a fresh read.

use crate::codec::{self, ItemCodec, EXPIRES_AT, SESSION_ID, TOKEN_USAGE, UPDATED_AT, USER_ID};
use crate::config::SessionConfig;
use crate::metadata::SessionMetadataStore;
use chatkeep_core::{
    store_precision, validate_user_id, ActiveSessionRecord, ChatkeepError, ChatkeepResult,
    SessionId,
};
use chatkeep_store::{Condition, KeyValueStore, UpdateAction};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Why an active session is being ended ahead of a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retirement {
    Expired,
    BudgetExhausted,
}

impl Retirement {
    fn as_str(self) -> &'static str {
        match self {
            Retirement::Expired => "expired",
            Retirement::BudgetExhausted => "token budget exhausted",
        }
    }
}

/// Resolves each user's one active session, renewing or rotating it as needed.
pub struct ActiveSessionCoordinator {
    store: Arc<dyn KeyValueStore>,
    metadata: SessionMetadataStore,
    config: SessionConfig,
}

impl ActiveSessionCoordinator {
    /// Coordinator over the active-session table named in `config`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        metadata: SessionMetadataStore,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            metadata,
            config,
        }
    }

    fn table(&self) -> &str {
        &self.config.tables.active_session
    }

    /// The user's active record as stored, expired or not.
    pub async fn active_session(
        &self,
        user_id: &str,
    ) -> ChatkeepResult<Option<ActiveSessionRecord>> {
        self.store
            .get_item(self.table(), &codec::active_key(user_id))
            .await?
            .map(|item| ActiveSessionRecord::from_item(&item))
            .transpose()
    }

    /// Return the session the user's next turn belongs to, renewing,
    /// rotating, or creating the active record as needed.
    ///
    /// Concurrent callers for one user all get the same id. Fails with
    /// [`ChatkeepError::ConcurrencyConflict`] only when the loop does not
    /// converge within the configured number of attempts.
    pub async fn resolve_session(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> ChatkeepResult<SessionId> {
        validate_user_id(user_id)?;
        let now = store_precision(now);
        let mut lost_create_race = false;

        for attempt in 0..self.config.max_resolve_attempts {
            let current = self.active_session(user_id).await?;

            let retired = match current {
                None => None,
                Some(record) if record.is_expired(now) => {
                    Some((record, Retirement::Expired))
                }
                Some(record) if record.budget_exhausted(self.config.token_limit) => {
                    Some((record, Retirement::BudgetExhausted))
                }
                Some(record) => {
                    if lost_create_race {
                        self.metadata
                            .create(user_id, record.session_id, record.created_at)
                            .await?;
                    }
                    if self.renew(&record, now).await? {
                        debug!(user_id, session_id = %record.session_id, "Session renewed");
                        return Ok(record.session_id);
                    }
                    debug!(user_id, attempt, "Renewal lost a race, re-reading");
                    continue;
                }
            };

            if let Some((record, reason)) = retired {
                if !self.retire(&record, reason).await? {
                    debug!(user_id, attempt, "Retirement lost a race, re-reading");
                    continue;
                }
                info!(
                    user_id,
                    session_id = %record.session_id,
                    token_usage = record.token_usage,
                    reason = reason.as_str(),
                    "Active session ended"
                );
            }

            match self.create(user_id, now).await? {
                Some(session_id) => return Ok(session_id),
                None => {
                    debug!(user_id, attempt, "Another writer created the session");
                    lost_create_race = true;
                }
            }
        }

        Err(ChatkeepError::ConcurrencyConflict(format!(
            "could not resolve a session for user {user_id} after {} attempts",
            self.config.max_resolve_attempts
        )))
    }

    /// Add `tokens` to the session's usage if it is still the active one.
    /// Returns whether the increment applied.
    pub async fn record_token_usage(
        &self,
        user_id: &str,
        session_id: SessionId,
        tokens: u64,
    ) -> ChatkeepResult<bool> {
        let outcome = self
            .store
            .update_item(
                self.table(),
                &codec::active_key(user_id),
                vec![UpdateAction::Add(TOKEN_USAGE.into(), codec::tokens(tokens))],
                Some(Condition::equals(SESSION_ID, session_id.to_string())),
            )
            .await?;
        if !outcome.is_applied() {
            debug!(
                user_id,
                session_id = %session_id,
                tokens,
                "Session no longer active, token usage dropped"
            );
        }
        Ok(outcome.is_applied())
    }

    /// Conditionally create a fresh active record and its metadata.
    /// Returns `None` when another writer created one first.
    async fn create(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> ChatkeepResult<Option<SessionId>> {
        let session_id = SessionId::generate();
        let record = ActiveSessionRecord::new(user_id, session_id, now, self.config.ttl())?;
        let outcome = self
            .store
            .put_item(
                self.table(),
                record.to_item(),
                Some(Condition::not_exists(USER_ID)),
            )
            .await?;
        if !outcome.is_applied() {
            return Ok(None);
        }

        self.metadata.create(user_id, session_id, now).await?;
        info!(user_id, session_id = %session_id, "Session created");
        Ok(Some(session_id))
    }

    async fn renew(&self, record: &ActiveSessionRecord, now: DateTime<Utc>) -> ChatkeepResult<bool> {
        let expires_at = now + self.config.ttl();
        let outcome = self
            .store
            .update_item(
                self.table(),
                &codec::active_key(&record.user_id),
                vec![
                    UpdateAction::Set(UPDATED_AT.into(), codec::millis(now).into()),
                    UpdateAction::Set(EXPIRES_AT.into(), codec::millis(expires_at).into()),
                ],
                Some(Condition::equals(SESSION_ID, record.session_id.to_string())),
            )
            .await?;
        Ok(outcome.is_applied())
    }

    /// Delete the record if it is still exactly the one that was read. The
    /// resulting REMOVE event is what finalizes the session.
    async fn retire(
        &self,
        record: &ActiveSessionRecord,
        reason: Retirement,
    ) -> ChatkeepResult<bool> {
        let same_session = Condition::equals(SESSION_ID, record.session_id.to_string());
        let condition = match reason {
            Retirement::BudgetExhausted => same_session,
            Retirement::Expired => Condition::All(vec![
                same_session,
                Condition::equals(EXPIRES_AT, codec::millis(record.expires_at)),
            ]),
        };
        let outcome = self
            .store
            .delete_item(
                self.table(),
                &codec::active_key(&record.user_id),
                Some(condition),
            )
            .await?;
        Ok(outcome.is_applied())
    }
}

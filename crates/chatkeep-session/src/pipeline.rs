//! Turns the removal of active-session records into finalized metadata.
//!
//! The change feed is the normal path. [`SummarizationPipeline::reconcile_user`]
//! catches removals whose events were lost, since the feed is not durable.

use crate::codec::ItemCodec;
use crate::coordinator::ActiveSessionCoordinator;
use crate::log::MessageLog;
use crate::metadata::SessionMetadataStore;
use crate::summary::Summarizer;
use chatkeep_core::{ActiveSessionRecord, ChatkeepError, ChatkeepResult, RetryPolicy};
use chatkeep_store::{ChangeEvent, ChangeEventType, ChangeFeed};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Tally of one batch, or of a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Sessions finalized by this batch.
    pub finalized: usize,
    /// REMOVE events for sessions that were already finalized.
    pub duplicates: usize,
    /// INSERT and MODIFY events, which carry nothing to finalize.
    pub skipped: usize,
    /// Events that can never succeed: bad images and permanent errors.
    pub malformed: usize,
    /// Events still failing with a retryable error.
    pub failed: usize,
}

impl BatchReport {
    /// Events accounted for.
    pub fn total(&self) -> usize {
        self.finalized + self.duplicates + self.skipped + self.malformed + self.failed
    }

    fn merge(&mut self, other: &BatchReport) {
        self.finalized += other.finalized;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
        self.malformed += other.malformed;
        self.failed += other.failed;
    }
}

enum EventOutcome {
    Finalized,
    Duplicate,
    Skipped,
}

/// Finalizes sessions from the REMOVE events of the active-session table.
///
/// Every step is idempotent, so redelivered or retried events are harmless:
/// the first finalize of a session wins and later ones change nothing.
pub struct SummarizationPipeline {
    log: MessageLog,
    metadata: SessionMetadataStore,
    summarizer: Arc<dyn Summarizer>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl SummarizationPipeline {
    /// `batch_size` of zero is treated as one.
    pub fn new(
        log: MessageLog,
        metadata: SessionMetadataStore,
        summarizer: Arc<dyn Summarizer>,
        retry: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            log,
            metadata,
            summarizer,
            retry,
            batch_size: batch_size.max(1),
        }
    }

    /// Consume `feed` until it closes, returning the totals.
    pub async fn run(&self, mut feed: ChangeFeed) -> BatchReport {
        info!(
            table = feed.table(),
            batch_size = self.batch_size,
            "Summarization pipeline started"
        );
        let mut total = BatchReport::default();
        while let Some(batch) = feed.next_batch(self.batch_size).await {
            let report = self.process_with_retry(batch).await;
            debug!(?report, "Batch processed");
            total.merge(&report);
        }
        info!(?total, "Change feed closed, summarization pipeline stopped");
        total
    }

    /// Finalize every open session of `user_id` that is no longer the active
    /// one. Returns how many were finalized.
    ///
    /// Metadata is listed before the active record is read, so a session
    /// created meanwhile is never mistaken for an ended one. The final token
    /// usage of a reconciled session is unknown and recorded as zero, and
    /// its last message stands in for the last activity.
    pub async fn reconcile_user(
        &self,
        coordinator: &ActiveSessionCoordinator,
        user_id: &str,
    ) -> ChatkeepResult<usize> {
        let open: Vec<_> = self
            .metadata
            .list_by_user(user_id)
            .await?
            .into_iter()
            .filter(|m| !m.is_finished())
            .collect();
        if open.is_empty() {
            return Ok(0);
        }
        let active = coordinator
            .active_session(user_id)
            .await?
            .map(|record| record.session_id);

        let mut finalized = 0;
        for session in open.into_iter().filter(|m| Some(m.session_id) != active) {
            let transcript = self.log.transcript(user_id, session.session_id).await?;
            let last_activity = transcript
                .last()
                .map_or(session.created_at, |m| m.created_at);
            let ended = ActiveSessionRecord {
                user_id: session.user_id,
                session_id: session.session_id,
                token_usage: 0,
                created_at: session.created_at,
                updated_at: last_activity,
                expires_at: last_activity,
            };
            let summary = self.summarizer.summarize(&transcript).await?;
            if self.metadata.finalize(&ended, &summary).await? {
                finalized += 1;
            }
        }
        if finalized > 0 {
            info!(user_id, finalized, "Reconciled sessions whose removal was missed");
        }
        Ok(finalized)
    }

    /// Process each event once, independently of the others.
    pub async fn process_batch(&self, events: &[ChangeEvent]) -> BatchReport {
        self.process_events(events).await.0
    }

    async fn process_with_retry(&self, batch: Vec<ChangeEvent>) -> BatchReport {
        let (mut report, mut pending) = self.process_events(&batch).await;
        let mut attempt = 0;
        while !pending.is_empty() && attempt < self.retry.max_retries {
            let delay = self.retry.backoff_ms(attempt);
            warn!(
                attempt,
                pending = pending.len(),
                delay_ms = delay,
                "Retrying events with transient failures"
            );
            if delay > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            let (retried, still_failing) = self.process_events(&pending).await;
            report.failed = 0;
            report.merge(&retried);
            pending = still_failing;
            attempt += 1;
        }
        if !pending.is_empty() {
            error!(
                dropped = pending.len(),
                attempts = attempt + 1,
                "Dropping events after retries exhausted"
            );
        }
        report
    }

    /// Returns the report and the events that failed with a retryable error.
    async fn process_events(&self, events: &[ChangeEvent]) -> (BatchReport, Vec<ChangeEvent>) {
        let mut report = BatchReport::default();
        let mut retryable = Vec::new();
        for event in events {
            match self.process_event(event).await {
                Ok(EventOutcome::Finalized) => report.finalized += 1,
                Ok(EventOutcome::Duplicate) => report.duplicates += 1,
                Ok(EventOutcome::Skipped) => report.skipped += 1,
                Err(ChatkeepError::MalformedEvent(reason)) => {
                    warn!(table = %event.table, reason = %reason, "Dropping malformed event");
                    report.malformed += 1;
                }
                Err(e) if e.is_retryable() => {
                    warn!(table = %event.table, error = %e, "Event failed, will retry");
                    report.failed += 1;
                    retryable.push(event.clone());
                }
                Err(e) => {
                    error!(table = %event.table, error = %e, "Event failed permanently");
                    report.malformed += 1;
                }
            }
        }
        (report, retryable)
    }

    async fn process_event(&self, event: &ChangeEvent) -> ChatkeepResult<EventOutcome> {
        if event.event_type != ChangeEventType::Remove {
            return Ok(EventOutcome::Skipped);
        }
        let image = event
            .old_image
            .as_ref()
            .ok_or_else(|| ChatkeepError::MalformedEvent("REMOVE event without old image".into()))?;
        let ended = ActiveSessionRecord::from_item(image)
            .map_err(|e| ChatkeepError::MalformedEvent(e.to_string()))?;

        let transcript = self
            .log
            .transcript(&ended.user_id, ended.session_id)
            .await?;
        let summary = self.summarizer.summarize(&transcript).await?;
        if self.metadata.finalize(&ended, &summary).await? {
            Ok(EventOutcome::Finalized)
        } else {
            Ok(EventOutcome::Duplicate)
        }
    }
}

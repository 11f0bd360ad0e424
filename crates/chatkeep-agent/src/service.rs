use crate::backends::{GenerationRequest, Generator};
use crate::llm::CHAT_SYSTEM_PROMPT;
use chatkeep_core::{
    retry_with_policy, validate_user_id, ActiveSessionRecord, ChatkeepError, ChatkeepResult, Clock,
    MessageRecord, RetryPolicy, SenderType, SessionId, SessionMetadataRecord,
};
use chatkeep_session::{ActiveSessionCoordinator, MessageLog, SessionConfig, SessionMetadataStore};
use chatkeep_store::KeyValueStore;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Reply to one user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReply {
    /// The assistant's answer.
    pub content: String,
    /// Session the turn was recorded in.
    pub session_id: SessionId,
}

/// One turn as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    /// Text of the turn.
    pub content: String,
    /// Who spoke.
    pub sender_type: SenderType,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

impl From<&MessageRecord> for MessageView {
    fn from(record: &MessageRecord) -> Self {
        Self {
            content: record.content.clone(),
            sender_type: record.sender_type,
            timestamp: record
                .created_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// A page of history as shown to clients, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryView {
    /// Turns on this page.
    pub messages: Vec<MessageView>,
    /// Pass back to fetch the next (older) page; absent on the last page.
    pub cursor: Option<String>,
}

/// The chat front door: one call per user turn, plus history lookups.
///
/// Holds no per-user state. Every store mutation it makes is valid on its
/// own, so a turn that fails halfway needs no cleanup.
pub struct ChatService {
    coordinator: ActiveSessionCoordinator,
    log: MessageLog,
    metadata: SessionMetadataStore,
    generator: Arc<dyn Generator>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    retry: RetryPolicy,
}

impl ChatService {
    /// Build the service and its session components over `store`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        generator: Arc<dyn Generator>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
        retry: RetryPolicy,
    ) -> Self {
        let metadata =
            SessionMetadataStore::new(Arc::clone(&store), config.tables.session_metadata.clone());
        let log = MessageLog::new(Arc::clone(&store), config.tables.chat_messages.clone());
        let coordinator = ActiveSessionCoordinator::new(store, metadata.clone(), config.clone());
        Self {
            coordinator,
            log,
            metadata,
            generator,
            clock,
            config,
            retry,
        }
    }

    /// The session coordinator, for reconciling missed removals.
    pub fn coordinator(&self) -> &ActiveSessionCoordinator {
        &self.coordinator
    }

    /// The message log, shared with the summarization pipeline.
    pub fn message_log(&self) -> &MessageLog {
        &self.log
    }

    /// The metadata store, shared with the summarization pipeline.
    pub fn metadata(&self) -> &SessionMetadataStore {
        &self.metadata
    }

    /// Answer one user message within the user's active session.
    pub async fn handle_user_turn(&self, user_id: &str, content: &str) -> ChatkeepResult<TurnReply> {
        validate_user_id(user_id)?;
        self.validate_content(content)?;

        let session_id = retry_with_policy(&self.retry, "resolve_session", || {
            self.coordinator.resolve_session(user_id, self.clock.now())
        })
        .await?;

        let human = self
            .log
            .append(user_id, session_id, SenderType::Human, content, self.clock.now())
            .await?;

        let mut history = self.log.transcript(user_id, session_id).await?;
        history.retain(|m| m.sort_key != human.sort_key);
        let memory = self
            .metadata
            .recent_summaries(user_id, self.config.summary_window)
            .await?;

        let generation = self
            .generator
            .generate(GenerationRequest {
                system_prompt: CHAT_SYSTEM_PROMPT,
                memory: &memory,
                history: &history,
                user_text: content,
            })
            .await
            .inspect_err(|e| {
                warn!(user_id, session_id = %session_id, error = %e, "Generation failed");
            })?;

        let reply_at = self
            .clock
            .now()
            .max(human.created_at + chrono::Duration::milliseconds(1));
        self.log
            .append(
                user_id,
                session_id,
                SenderType::Assistant,
                &generation.text,
                reply_at,
            )
            .await?;

        self.coordinator
            .record_token_usage(user_id, session_id, generation.tokens_used)
            .await?;

        info!(
            user_id,
            session_id = %session_id,
            tokens_used = generation.tokens_used,
            "Turn completed"
        );
        Ok(TurnReply {
            content: generation.text,
            session_id,
        })
    }

    /// A page of the user's turns across all sessions, newest first.
    pub async fn get_history(
        &self,
        user_id: &str,
        cursor: Option<String>,
        limit: usize,
    ) -> ChatkeepResult<HistoryView> {
        let page = self.log.query(user_id, cursor, limit).await?;
        Ok(HistoryView {
            messages: page.messages.iter().map(MessageView::from).collect(),
            cursor: page.next_cursor,
        })
    }

    /// Every session of the user, newest first.
    pub async fn list_sessions(&self, user_id: &str) -> ChatkeepResult<Vec<SessionMetadataRecord>> {
        validate_user_id(user_id)?;
        self.metadata.list_by_user(user_id).await
    }

    /// The user's active record, if any.
    pub async fn active_session(&self, user_id: &str) -> ChatkeepResult<Option<ActiveSessionRecord>> {
        validate_user_id(user_id)?;
        self.coordinator.active_session(user_id).await
    }

    fn validate_content(&self, content: &str) -> ChatkeepResult<()> {
        if content.trim().is_empty() {
            return Err(ChatkeepError::Validation("message must not be empty".into()));
        }
        let length = content.chars().count();
        if length > self.config.max_message_length {
            return Err(ChatkeepError::Validation(format!(
                "message is {length} characters, limit is {}",
                self.config.max_message_length
            )));
        }
        Ok(())
    }
}

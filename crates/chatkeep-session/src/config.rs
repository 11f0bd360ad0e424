use chatkeep_core::{ChatkeepError, ChatkeepResult};
use serde::{Deserialize, Serialize};

/// Longest accepted inactivity window (one year).
pub const MAX_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Names of the three tables Chatkeep uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNames {
    /// One item per user: the live session.
    #[serde(default = "default_active_session_table")]
    pub active_session: String,
    /// One item per session, finalized when it ends.
    #[serde(default = "default_session_metadata_table")]
    pub session_metadata: String,
    /// The message log.
    #[serde(default = "default_chat_messages_table")]
    pub chat_messages: String,
}

fn default_active_session_table() -> String {
    "ActiveSession".into()
}

fn default_session_metadata_table() -> String {
    "SessionMetadata".into()
}

fn default_chat_messages_table() -> String {
    "ChatMessages".into()
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            active_session: default_active_session_table(),
            session_metadata: default_session_metadata_table(),
            chat_messages: default_chat_messages_table(),
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity window after which a session ends.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Tokens after which the next turn rotates to a fresh session.
    #[serde(default = "default_token_limit")]
    pub token_limit: u64,
    /// How many finished-session summaries feed generation.
    #[serde(default = "default_summary_window")]
    pub summary_window: usize,
    /// Cap on a truncated summary, in characters.
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    /// Longest accepted user message, in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Bound on the read/conditional-write loop of session resolution.
    #[serde(default = "default_max_resolve_attempts")]
    pub max_resolve_attempts: u32,
    /// Table names.
    #[serde(default)]
    pub tables: TableNames,
}

fn default_ttl_seconds() -> u64 {
    1_800
}

fn default_token_limit() -> u64 {
    8_000
}

fn default_summary_window() -> usize {
    3
}

fn default_summary_max_chars() -> usize {
    4_000
}

fn default_max_message_length() -> usize {
    100_000
}

fn default_max_resolve_attempts() -> u32 {
    8
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            token_limit: default_token_limit(),
            summary_window: default_summary_window(),
            summary_max_chars: default_summary_max_chars(),
            max_message_length: default_max_message_length(),
            max_resolve_attempts: default_max_resolve_attempts(),
            tables: TableNames::default(),
        }
    }
}

impl SessionConfig {
    /// The inactivity window as a duration.
    pub fn ttl(&self) -> chrono::Duration {
        let secs = self.ttl_seconds.min(MAX_TTL_SECONDS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(0))
    }

    /// Reject settings no session could run under.
    pub fn validate(&self) -> ChatkeepResult<()> {
        if self.ttl_seconds == 0 || self.ttl_seconds > MAX_TTL_SECONDS {
            return Err(ChatkeepError::Config(format!(
                "session.ttl_seconds must be in 1..={MAX_TTL_SECONDS}"
            )));
        }
        if self.token_limit == 0 {
            return Err(ChatkeepError::Config("session.token_limit must be > 0".into()));
        }
        if self.max_message_length == 0 {
            return Err(ChatkeepError::Config(
                "session.max_message_length must be > 0".into(),
            ));
        }
        if self.max_resolve_attempts == 0 {
            return Err(ChatkeepError::Config(
                "session.max_resolve_attempts must be > 0".into(),
            ));
        }
        let names = [
            &self.tables.active_session,
            &self.tables.session_metadata,
            &self.tables.chat_messages,
        ];
        if names.iter().any(|n| n.trim().is_empty()) {
            return Err(ChatkeepError::Config("table names must not be empty".into()));
        }
        if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
            return Err(ChatkeepError::Config("table names must be distinct".into()));
        }
        Ok(())
    }
}

/// Settings of the summarization consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Most events processed per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seconds between sweeps of the store's TTL process.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

fn default_batch_size() -> usize {
    100
}

fn default_reaper_interval_secs() -> u64 {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

impl PipelineConfig {
    /// Reject a zero batch size or sweep interval.
    pub fn validate(&self) -> ChatkeepResult<()> {
        if self.batch_size == 0 {
            return Err(ChatkeepError::Config("pipeline.batch_size must be > 0".into()));
        }
        if self.reaper_interval_secs == 0 {
            return Err(ChatkeepError::Config(
                "pipeline.reaper_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

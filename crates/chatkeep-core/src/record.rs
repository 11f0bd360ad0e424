use crate::error::{ChatkeepError, ChatkeepResult};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Summary stored on a metadata record until the session is finalized.
pub const SESSION_NOT_FINISHED: &str = "session not finished yet";

/// Separator between the session id and the timestamp in a message sort key.
pub const SORT_KEY_SEPARATOR: char = '#';

/// Validate a user id: non-empty after trimming and free of the sort key separator.
pub fn validate_user_id(user_id: &str) -> ChatkeepResult<()> {
    if user_id.trim().is_empty() {
        return Err(ChatkeepError::Validation("user_id must not be empty".into()));
    }
    if user_id.contains(SORT_KEY_SEPARATOR) {
        return Err(ChatkeepError::Validation(format!(
            "user_id must not contain '{SORT_KEY_SEPARATOR}'"
        )));
    }
    Ok(())
}

/// Truncate a timestamp to the millisecond precision used by the store.
pub fn store_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

/// Identifier of a conversation session.
///
/// Backed by a UUID v7, so the string form sorts in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh time-ordered session id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = ChatkeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ChatkeepError::Validation(format!("invalid session id '{s}': {e}")))
    }
}

/// Author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SenderType {
    /// The end user.
    #[serde(rename = "human")]
    Human,
    /// The generated reply.
    #[serde(rename = "ai")]
    Assistant,
}

impl SenderType {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Human => "human",
            SenderType::Assistant => "ai",
        }
    }
}

impl FromStr for SenderType {
    type Err = ChatkeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(SenderType::Human),
            "ai" | "assistant" => Ok(SenderType::Assistant),
            other => Err(ChatkeepError::Validation(format!(
                "unknown sender type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single live session of a user. Its absence means "no active session".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSessionRecord {
    /// Owner, and the record's key.
    pub user_id: String,
    /// Session this record designates as active.
    pub session_id: SessionId,
    /// Tokens consumed so far. Only ever incremented.
    pub token_usage: u64,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last activity.
    pub updated_at: DateTime<Utc>,
    /// After this instant the store may reclaim the record.
    pub expires_at: DateTime<Utc>,
}

impl ActiveSessionRecord {
    /// A fresh record with zero usage, expiring `ttl` after `now`.
    pub fn new(
        user_id: impl Into<String>,
        session_id: SessionId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> ChatkeepResult<Self> {
        let user_id = user_id.into();
        validate_user_id(&user_id)?;
        if ttl <= Duration::zero() {
            return Err(ChatkeepError::Validation("session ttl must be positive".into()));
        }
        let now = store_precision(now);
        Ok(Self {
            user_id,
            session_id,
            token_usage: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        })
    }

    /// Whether the inactivity window has elapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the token budget has been reached.
    pub fn budget_exhausted(&self, token_limit: u64) -> bool {
        self.token_usage >= token_limit
    }
}

/// Durable record of a session, open until the pipeline finalizes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadataRecord {
    /// Owner of the session.
    pub user_id: String,
    /// The session described.
    pub session_id: SessionId,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Moment of last activity, set once on finalize.
    pub finished_at: Option<DateTime<Utc>>,
    /// [`SESSION_NOT_FINISHED`] while open, then the condensed transcript.
    pub session_summary: String,
    /// Final token usage, copied from the active record when it is removed.
    pub token_usage: u64,
}

impl SessionMetadataRecord {
    /// An open metadata record.
    pub fn open(
        user_id: impl Into<String>,
        session_id: SessionId,
        created_at: DateTime<Utc>,
    ) -> ChatkeepResult<Self> {
        let user_id = user_id.into();
        validate_user_id(&user_id)?;
        Ok(Self {
            user_id,
            session_id,
            created_at: store_precision(created_at),
            finished_at: None,
            session_summary: SESSION_NOT_FINISHED.to_string(),
            token_usage: 0,
        })
    }

    /// Whether the finalize transition already happened.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// One immutable chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Partition of the log.
    pub user_id: String,
    /// `"{session_id}#{millis:013}"`, orders a user's turns across sessions.
    pub sort_key: String,
    /// Session the turn belongs to.
    pub session_id: SessionId,
    /// Who authored the turn.
    pub sender_type: SenderType,
    /// Turn text.
    pub content: String,
    /// When the turn was written.
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Build a turn; `at` is truncated to millisecond precision.
    pub fn new(
        user_id: impl Into<String>,
        session_id: SessionId,
        sender_type: SenderType,
        content: impl Into<String>,
        at: DateTime<Utc>,
    ) -> ChatkeepResult<Self> {
        let user_id = user_id.into();
        validate_user_id(&user_id)?;
        let content = content.into();
        if sender_type == SenderType::Human && content.trim().is_empty() {
            return Err(ChatkeepError::Validation(
                "human message content must not be empty".into(),
            ));
        }
        let created_at = store_precision(at);
        Ok(Self {
            sort_key: Self::sort_key_for(session_id, created_at),
            user_id,
            session_id,
            sender_type,
            content,
            created_at,
        })
    }

    /// Sort key of a turn of `session_id` written at `at`.
    pub fn sort_key_for(session_id: SessionId, at: DateTime<Utc>) -> String {
        format!(
            "{}{SORT_KEY_SEPARATOR}{:013}",
            session_id,
            at.timestamp_millis().max(0)
        )
    }

    /// Prefix shared by every sort key of `session_id`.
    pub fn session_prefix(session_id: SessionId) -> String {
        format!("{session_id}{SORT_KEY_SEPARATOR}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_session_ids_sort_by_creation() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert!(a.to_string() < b.to_string());
        assert_eq!(a.to_string().parse::<SessionId>().unwrap(), a);
    }

    #[test]
    fn test_active_record_expiry_and_budget() {
        let rec =
            ActiveSessionRecord::new("u1", SessionId::generate(), at(1_000), Duration::seconds(60))
                .unwrap();
        assert_eq!(rec.expires_at, at(1_060));
        assert!(!rec.is_expired(at(1_059)));
        assert!(rec.is_expired(at(1_060)));
        assert!(!rec.budget_exhausted(10));
        let spent = ActiveSessionRecord {
            token_usage: 10,
            ..rec
        };
        assert!(spent.budget_exhausted(10));
    }

    #[test]
    fn test_user_id_validation() {
        assert!(validate_user_id("u1").is_ok());
        assert!(validate_user_id("  ").is_err());
        assert!(validate_user_id("a#b").is_err());
    }

    #[test]
    fn test_metadata_starts_open() {
        let meta = SessionMetadataRecord::open("u1", SessionId::generate(), at(5)).unwrap();
        assert!(!meta.is_finished());
        assert_eq!(meta.session_summary, SESSION_NOT_FINISHED);
    }

    #[test]
    fn test_message_sort_key_layout() {
        let sid = SessionId::generate();
        let msg = MessageRecord::new("u1", sid, SenderType::Human, "hi", at(42)).unwrap();
        assert_eq!(msg.sort_key, format!("{sid}#0000000042000"));
        assert!(msg.sort_key.starts_with(&MessageRecord::session_prefix(sid)));
    }

    #[test]
    fn test_empty_human_message_rejected() {
        let sid = SessionId::generate();
        assert!(MessageRecord::new("u1", sid, SenderType::Human, "  ", at(1)).is_err());
        assert!(MessageRecord::new("u1", sid, SenderType::Assistant, "", at(1)).is_ok());
    }

    #[test]
    fn test_sender_type_wire_names() {
        assert_eq!(serde_json::to_string(&SenderType::Assistant).unwrap(), "\"ai\"");
        assert_eq!("human".parse::<SenderType>().unwrap(), SenderType::Human);
        assert!("robot".parse::<SenderType>().is_err());
    }
}

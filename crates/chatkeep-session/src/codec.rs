//! Conversion between typed records and store items.
//!
//! Timestamps are stored as epoch-millisecond numbers. Decoding checks every
//! attribute, so a partial item never becomes a record.

use crate::config::TableNames;
use chatkeep_core::{
    ActiveSessionRecord, ChatkeepError, ChatkeepResult, MessageRecord, SenderType, SessionId,
    SessionMetadataRecord,
};
use chatkeep_store::{Item, Key, TableSchema};
use chrono::{DateTime, TimeZone, Utc};

pub(crate) const USER_ID: &str = "user_id";
pub(crate) const SESSION_ID: &str = "session_id";
pub(crate) const SORT_KEY: &str = "sort_key";
pub(crate) const TOKEN_USAGE: &str = "token_usage";
pub(crate) const CREATED_AT: &str = "created_at";
pub(crate) const UPDATED_AT: &str = "updated_at";
pub(crate) const EXPIRES_AT: &str = "expires_at";
pub(crate) const FINISHED_AT: &str = "finished_at";
pub(crate) const SESSION_SUMMARY: &str = "session_summary";
pub(crate) const SENDER_TYPE: &str = "sender_type";
pub(crate) const CONTENT: &str = "content";

/// Declarations of the three tables under the configured names.
pub fn schemas(tables: &TableNames) -> Vec<TableSchema> {
    vec![
        TableSchema::new(tables.active_session.clone(), USER_ID).with_ttl_attribute(EXPIRES_AT),
        TableSchema::new(tables.session_metadata.clone(), USER_ID).with_sort_key(SESSION_ID),
        TableSchema::new(tables.chat_messages.clone(), USER_ID).with_sort_key(SORT_KEY),
    ]
}

/// A record with a fixed item layout.
pub trait ItemCodec: Sized {
    /// Encode into an item.
    fn to_item(&self) -> Item;

    /// Decode from an item, failing on any missing or mistyped attribute.
    fn from_item(item: &Item) -> ChatkeepResult<Self>;
}

pub(crate) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn tokens(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn malformed(name: &str, expected: &str) -> ChatkeepError {
    ChatkeepError::Store(format!("attribute '{name}' missing or not {expected}"))
}

fn string(item: &Item, name: &str) -> ChatkeepResult<String> {
    item.get_s(name)
        .map(str::to_string)
        .ok_or_else(|| malformed(name, "a string"))
}

fn number(item: &Item, name: &str) -> ChatkeepResult<i64> {
    item.get_n(name).ok_or_else(|| malformed(name, "a number"))
}

fn timestamp(item: &Item, name: &str) -> ChatkeepResult<DateTime<Utc>> {
    let ms = number(item, name)?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| malformed(name, "a valid timestamp"))
}

fn count(item: &Item, name: &str) -> ChatkeepResult<u64> {
    u64::try_from(number(item, name)?).map_err(|_| malformed(name, "non-negative"))
}

fn session_id(item: &Item) -> ChatkeepResult<SessionId> {
    string(item, SESSION_ID)?.parse()
}

pub(crate) fn active_key(user_id: &str) -> Key {
    Key::partition(user_id)
}

pub(crate) fn metadata_key(user_id: &str, session_id: SessionId) -> Key {
    Key::composite(user_id, session_id.to_string())
}

impl ItemCodec for ActiveSessionRecord {
    fn to_item(&self) -> Item {
        Item::new()
            .with(USER_ID, self.user_id.clone())
            .with(SESSION_ID, self.session_id.to_string())
            .with(TOKEN_USAGE, tokens(self.token_usage))
            .with(CREATED_AT, millis(self.created_at))
            .with(UPDATED_AT, millis(self.updated_at))
            .with(EXPIRES_AT, millis(self.expires_at))
    }

    /// `token_usage` is optional; records written before it was tracked
    /// decode with zero.
    fn from_item(item: &Item) -> ChatkeepResult<Self> {
        let token_usage = if item.contains(TOKEN_USAGE) {
            count(item, TOKEN_USAGE)?
        } else {
            0
        };
        Ok(Self {
            user_id: string(item, USER_ID)?,
            session_id: session_id(item)?,
            token_usage,
            created_at: timestamp(item, CREATED_AT)?,
            updated_at: timestamp(item, UPDATED_AT)?,
            expires_at: timestamp(item, EXPIRES_AT)?,
        })
    }
}

impl ItemCodec for SessionMetadataRecord {
    fn to_item(&self) -> Item {
        let mut item = Item::new()
            .with(USER_ID, self.user_id.clone())
            .with(SESSION_ID, self.session_id.to_string())
            .with(CREATED_AT, millis(self.created_at))
            .with(SESSION_SUMMARY, self.session_summary.clone())
            .with(TOKEN_USAGE, tokens(self.token_usage));
        if let Some(finished_at) = self.finished_at {
            item.set(FINISHED_AT, millis(finished_at));
        }
        item
    }

    fn from_item(item: &Item) -> ChatkeepResult<Self> {
        let finished_at = if item.contains(FINISHED_AT) {
            Some(timestamp(item, FINISHED_AT)?)
        } else {
            None
        };
        let token_usage = if item.contains(TOKEN_USAGE) {
            count(item, TOKEN_USAGE)?
        } else {
            0
        };
        Ok(Self {
            user_id: string(item, USER_ID)?,
            session_id: session_id(item)?,
            created_at: timestamp(item, CREATED_AT)?,
            finished_at,
            session_summary: string(item, SESSION_SUMMARY)?,
            token_usage,
        })
    }
}

impl ItemCodec for MessageRecord {
    fn to_item(&self) -> Item {
        Item::new()
            .with(USER_ID, self.user_id.clone())
            .with(SORT_KEY, self.sort_key.clone())
            .with(SESSION_ID, self.session_id.to_string())
            .with(SENDER_TYPE, self.sender_type.as_str())
            .with(CONTENT, self.content.clone())
            .with(CREATED_AT, millis(self.created_at))
    }

    fn from_item(item: &Item) -> ChatkeepResult<Self> {
        let sender_type: SenderType = string(item, SENDER_TYPE)?.parse()?;
        Ok(Self {
            user_id: string(item, USER_ID)?,
            sort_key: string(item, SORT_KEY)?,
            session_id: session_id(item)?,
            sender_type,
            content: string(item, CONTENT)?,
            created_at: timestamp(item, CREATED_AT)?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_active_record_item_layout() {
        let record = ActiveSessionRecord::new(
            "u1",
            SessionId::generate(),
            at(1_700_000_000_123),
            chrono::Duration::seconds(60),
        )
        .unwrap();
        let item = record.to_item();
        assert_eq!(item.get_n(EXPIRES_AT), Some(1_700_000_060_123));
        assert_eq!(item.get_n(TOKEN_USAGE), Some(0));
        assert_eq!(ActiveSessionRecord::from_item(&item).unwrap(), record);
    }

    #[test]
    fn test_partial_item_is_rejected() {
        let record = ActiveSessionRecord::new(
            "u1",
            SessionId::generate(),
            at(1_000),
            chrono::Duration::seconds(60),
        )
        .unwrap();
        let mut item = record.to_item();
        item.remove(UPDATED_AT);
        assert!(ActiveSessionRecord::from_item(&item).is_err());

        let mut item = record.to_item();
        item.set(SESSION_ID, "not-a-uuid");
        assert!(ActiveSessionRecord::from_item(&item).is_err());

        let mut item = record.to_item();
        item.set(TOKEN_USAGE, -1i64);
        assert!(ActiveSessionRecord::from_item(&item).is_err());
    }

    #[test]
    fn test_active_record_without_usage_decodes_as_zero() {
        let mut record = ActiveSessionRecord::new(
            "u1",
            SessionId::generate(),
            at(1_000),
            chrono::Duration::seconds(60),
        )
        .unwrap();
        record.token_usage = 42;
        let mut item = record.to_item();
        item.remove(TOKEN_USAGE);
        let decoded = ActiveSessionRecord::from_item(&item).unwrap();
        assert_eq!(decoded.token_usage, 0);
        assert_eq!(decoded.updated_at, record.updated_at);
    }

    #[test]
    fn test_open_metadata_has_no_finished_at() {
        let record = SessionMetadataRecord::open("u1", SessionId::generate(), at(5)).unwrap();
        let item = record.to_item();
        assert!(!item.contains(FINISHED_AT));
        assert_eq!(
            item.get_s(SESSION_SUMMARY),
            Some(chatkeep_core::SESSION_NOT_FINISHED)
        );
        assert_eq!(SessionMetadataRecord::from_item(&item).unwrap(), record);
    }

    #[test]
    fn test_message_sender_wire_name() {
        let record = MessageRecord::new(
            "u1",
            SessionId::generate(),
            SenderType::Assistant,
            "hi",
            at(42),
        )
        .unwrap();
        let item = record.to_item();
        assert_eq!(item.get_s(SENDER_TYPE), Some("ai"));
        assert_eq!(MessageRecord::from_item(&item).unwrap(), record);
    }
}

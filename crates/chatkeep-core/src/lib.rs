//! Core types and error definitions for Chatkeep.
//!
//! This crate provides the foundational types shared across all Chatkeep
//! crates: the error enum, the typed records persisted in the key-value store,
//! an injectable clock, and the retry policy used for transient failures.
//!
//! # Main types
//!
//! - [`ChatkeepError`]: Unified error enum for all Chatkeep subsystems.
//! - [`ChatkeepResult`]: Convenience alias for `Result<T, ChatkeepError>`.
//! - [`ActiveSessionRecord`]: The single live session of a user.
//! - [`SessionMetadataRecord`]: Durable per-session record, finalized once.
//! - [`MessageRecord`]: One immutable chat turn.
//! - [`SessionId`]: Time-ordered session identifier.
//! - [`Clock`]: Time source, with [`SystemClock`] and [`ManualClock`].
//! - [`RetryPolicy`]: Exponential backoff for retryable errors.

/// Injectable time source.
pub mod clock;
/// Error enum and result alias.
pub mod error;
/// Entity records and identifiers.
pub mod record;
/// Retry with exponential backoff.
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ChatkeepError, ChatkeepResult};
pub use record::{
    store_precision, validate_user_id, ActiveSessionRecord, MessageRecord, SenderType, SessionId,
    SessionMetadataRecord, SESSION_NOT_FINISHED, SORT_KEY_SEPARATOR,
};
pub use retry::{retry_with_policy, RetryPolicy};

//! Session lifecycle for Chatkeep.
//!
//! Keeps at most one active session per user on top of a
//! [`chatkeep_store::KeyValueStore`], logs every turn, and finalizes
//! sessions with a summary once the store removes their active record.

/// Record/item conversion and table declarations.
pub mod codec;
/// Session, table, and pipeline settings.
pub mod config;
/// The single-active-session coordinator.
pub mod coordinator;
/// The per-user message log.
pub mod log;
/// Per-session metadata records.
pub mod metadata;
/// Change-feed consumer that finalizes ended sessions.
pub mod pipeline;
/// Transcript summarizers.
pub mod summary;

pub use codec::{schemas, ItemCodec};
pub use config::{PipelineConfig, SessionConfig, TableNames};
pub use coordinator::ActiveSessionCoordinator;
pub use log::{HistoryPage, MessageLog, MAX_PAGE_SIZE};
pub use metadata::SessionMetadataStore;
pub use pipeline::{BatchReport, SummarizationPipeline};
pub use summary::{render_transcript, Summarizer, TruncatingSummarizer, EMPTY_SESSION_SUMMARY};

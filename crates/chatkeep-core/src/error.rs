use thiserror::Error;

/// A convenience `Result` alias using [`ChatkeepError`].
pub type ChatkeepResult<T> = Result<T, ChatkeepError>;

/// Top-level error type for Chatkeep.
///
/// A failed conditional write is not an error: stores report it as
/// `WriteOutcome::ConditionFailed` and callers treat it as a concurrency
/// signal. [`ChatkeepError::ConcurrencyConflict`] only surfaces when a caller
/// gave up converging after repeated conflicts.
#[derive(Error, Debug)]
pub enum ChatkeepError {
    /// Transient infrastructure failure of the key-value store.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Non-transient store failure (unknown table, missing key attribute,
    /// corrupt persisted data).
    #[error("Store error: {0}")]
    Store(String),

    /// Conditional writes kept failing past the allowed number of attempts.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// A change event whose image lacks required attributes.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// The reply generator failed.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Caller input rejected at the boundary.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatkeepError {
    /// Whether retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatkeepError::StoreUnavailable(_)
                | ChatkeepError::ConcurrencyConflict(_)
                | ChatkeepError::Generation(_)
                | ChatkeepError::Http(_)
        )
    }
}

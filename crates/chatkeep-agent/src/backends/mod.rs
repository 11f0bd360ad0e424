/// Offline generator.
pub mod echo;
/// OpenAI-compatible HTTP generator.
pub mod openai;

use async_trait::async_trait;
use chatkeep_core::{ChatkeepResult, MessageRecord};

/// Everything a generator sees for one reply.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Instructions for the model.
    pub system_prompt: &'a str,
    /// Summaries of earlier sessions, oldest first.
    pub memory: &'a [String],
    /// The current session's turns, oldest first, not including `user_text`.
    pub history: &'a [MessageRecord],
    /// The message being answered.
    pub user_text: &'a str,
}

/// A generated reply and what it cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// The reply.
    pub text: String,
    /// Tokens billed for the call, prompt included.
    pub tokens_used: u64,
}

/// Trait for reply generators.
///
/// Failures surface as `ChatkeepError::Generation`, which callers may retry.
/// To add a provider, implement `Generator` in `backends/`, add the variant to
/// `LlmProvider` in `config.rs`, and wire it up in `llm::build_generator`.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest<'_>) -> ChatkeepResult<Generation>;
}

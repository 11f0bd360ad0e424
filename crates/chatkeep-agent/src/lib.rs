//! Reply generation and the chat service for Chatkeep.
//!
//! # Main types
//!
//! - [`ChatService`]: Handles user turns and history lookups.
//! - [`Generator`]: Trait for reply generators, with [`EchoGenerator`]
//!   and [`OpenAiGenerator`].
//! - [`LlmSummarizer`]: Session summaries written by the generator.
//! - [`ModelConfig`]: Provider, model, and sampling settings.

/// Generator trait and implementations.
pub mod backends;
/// Model settings.
pub mod config;
/// Prompt assembly.
pub mod context;
/// Prompts and generator selection.
pub mod llm;
/// The chat front door.
pub mod service;
/// Generator-backed session summaries.
pub mod summarizer;

pub use backends::echo::EchoGenerator;
pub use backends::openai::OpenAiGenerator;
pub use backends::{Generation, GenerationRequest, Generator};
pub use config::{LlmProvider, ModelConfig};
pub use context::ContextWindow;
pub use llm::{build_generator, CHAT_SYSTEM_PROMPT, SUMMARY_SYSTEM_PROMPT};
pub use service::{ChatService, HistoryView, MessageView, TurnReply};
pub use summarizer::LlmSummarizer;

use crate::backends::echo::EchoGenerator;
use crate::backends::openai::OpenAiGenerator;
use crate::backends::Generator;
use crate::config::{LlmProvider, ModelConfig};
use chatkeep_core::ChatkeepResult;
use std::sync::Arc;
use tracing::info;

/// System prompt for replies to user turns.
pub const CHAT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// System prompt for condensing a finished session into long-term memory.
pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes the conversation.\n\
You will be given a conversation between a user and an AI assistant.\n\
Your summary will be used in later sessions as long-term memory.\n\
Summarize the conversation in 10 sentences or less.";

/// Build the generator the configuration selects.
pub fn build_generator(config: &ModelConfig) -> ChatkeepResult<Arc<dyn Generator>> {
    config.validate()?;
    let generator: Arc<dyn Generator> = match config.provider {
        LlmProvider::Echo => Arc::new(EchoGenerator::new(config.max_history_messages)),
        LlmProvider::OpenAi | LlmProvider::OpenRouter | LlmProvider::Groq => {
            Arc::new(OpenAiGenerator::new(config.clone()))
        }
    };
    info!(provider = ?config.provider, model = %config.model_id, "Generator ready");
    Ok(generator)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hosted_provider_without_key_is_rejected() {
        let config = ModelConfig {
            provider: LlmProvider::Groq,
            ..ModelConfig::default()
        };
        assert!(build_generator(&config).is_err());
        assert!(build_generator(&ModelConfig::default()).is_ok());
    }
}

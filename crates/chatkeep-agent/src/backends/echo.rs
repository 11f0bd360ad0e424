use super::{Generation, GenerationRequest, Generator};
use crate::context::{estimate_tokens, ContextWindow};
use async_trait::async_trait;
use chatkeep_core::ChatkeepResult;

/// Offline generator that answers with the user's own words.
///
/// Token usage is estimated at four characters per token over the whole
/// prompt plus the reply, so session budgets behave as with a real model.
#[derive(Debug, Clone)]
pub struct EchoGenerator {
    max_history_messages: usize,
}

impl EchoGenerator {
    /// Count at most `max_history_messages` turns of history.
    pub fn new(max_history_messages: usize) -> Self {
        Self {
            max_history_messages,
        }
    }
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new(50)
    }
}

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, request: GenerationRequest<'_>) -> ChatkeepResult<Generation> {
        let context = ContextWindow::for_request(&request, self.max_history_messages);
        let text = format!("You said: {}", request.user_text);
        let tokens_used = context.estimated_tokens() + estimate_tokens(text.chars().count());
        Ok(Generation { text, tokens_used })
    }
}

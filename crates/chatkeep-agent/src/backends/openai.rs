use super::{Generation, GenerationRequest, Generator};
use crate::config::{LlmProvider, ModelConfig};
use crate::context::{estimate_tokens, ContextWindow, PromptMessage};
use async_trait::async_trait;
use chatkeep_core::{ChatkeepError, ChatkeepResult};
use tracing::debug;

/// OpenAI-compatible API generator.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the OpenAI chat completions API.
pub struct OpenAiGenerator {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiGenerator {
    /// A client for the endpoint and model in `config`.
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn build_messages(&self, context: &ContextWindow) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::new();

        if let Some(sys) = context.system_prompt().filter(|s| !s.is_empty()) {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        api_messages.extend(context.messages().iter().map(|m: &PromptMessage| {
            serde_json::json!({
                "role": m.role,
                "content": m.content
            })
        }));

        api_messages
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");

        // OpenRouter requires extra headers
        if self.config.provider == LlmProvider::OpenRouter {
            request
                .header("HTTP-Referer", "https://github.com/fboiero/chatkeep")
                .header("X-Title", "Chatkeep")
        } else {
            request
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: GenerationRequest<'_>) -> ChatkeepResult<Generation> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let context = ContextWindow::for_request(&request, self.config.max_history_messages);

        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": self.build_messages(&context),
        });

        let resp = self
            .add_provider_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatkeepError::Generation(format!("request failed: {e}")))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChatkeepError::Generation(format!("invalid response body: {e}")))?;

        if !status.is_success() {
            return Err(ChatkeepError::Generation(format!(
                "OpenAI API error {status}: {resp_body}"
            )));
        }

        let generation = parse_openai_response(&resp_body, &context)?;
        debug!(
            model = %self.config.model_id,
            tokens_used = generation.tokens_used,
            "Generation completed"
        );
        Ok(generation)
    }
}

/// Extract the reply and its token cost. Without a `usage` block the cost
/// is estimated from the prompt and the reply.
pub fn parse_openai_response(
    body: &serde_json::Value,
    context: &ContextWindow,
) -> ChatkeepResult<Generation> {
    let text = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| ChatkeepError::Generation(format!("response has no message content: {body}")))?
        .to_string();

    let tokens_used = body["usage"]["total_tokens"]
        .as_u64()
        .unwrap_or_else(|| context.estimated_tokens() + estimate_tokens(text.chars().count()));

    Ok(Generation { text, tokens_used })
}

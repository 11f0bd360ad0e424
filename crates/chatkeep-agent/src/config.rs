use chatkeep_core::{ChatkeepError, ChatkeepResult};
use serde::{Deserialize, Serialize};

/// Which generator answers user turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Offline generator that echoes the user. Needs no key.
    #[default]
    Echo,
    /// api.openai.com or any compatible endpoint.
    OpenAi,
    /// OpenRouter, OpenAI-compatible API.
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible API.
    Groq,
}

/// Generator settings, the `[model]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Which generator answers.
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name sent to the provider.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Bearer key; required for hosted providers.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    /// Overrides the provider's default endpoint.
    pub api_base_url: Option<String>,
    /// Sampling temperature, 0 to 2.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Cap on reply tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Most transcript turns sent along with a user message.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
}

fn default_model_id() -> String {
    "gpt-4o-mini".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_max_history_messages() -> usize {
    50
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model_id: default_model_id(),
            api_key: String::new(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_history_messages: default_max_history_messages(),
        }
    }
}

impl ModelConfig {
    /// Endpoint root without a trailing slash.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                LlmProvider::Echo => "local://echo",
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
            }
        }
    }

    /// Hosted providers need a key; the echo generator does not.
    pub fn validate(&self) -> ChatkeepResult<()> {
        if self.provider != LlmProvider::Echo && self.api_key.trim().is_empty() {
            return Err(ChatkeepError::Config(format!(
                "model.api_key is required for provider {:?}",
                self.provider
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ChatkeepError::Config(
                "model.temperature must be within 0.0..=2.0".into(),
            ));
        }
        if self.max_tokens == 0 || self.max_history_messages == 0 {
            return Err(ChatkeepError::Config(
                "model.max_tokens and model.max_history_messages must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_names() {
        assert_eq!(serde_json::to_string(&LlmProvider::OpenAi).unwrap(), "\"openai\"");
        let groq: LlmProvider = serde_json::from_str("\"groq\"").unwrap();
        assert_eq!(groq, LlmProvider::Groq);
    }

    #[test]
    fn test_base_url_defaults_and_override() {
        let mut config = ModelConfig {
            provider: LlmProvider::OpenAi,
            ..ModelConfig::default()
        };
        assert_eq!(config.base_url(), "https://api.openai.com");
        config.api_base_url = Some("http://localhost:8080/".into());
        assert_eq!(config.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_hosted_provider_needs_key() {
        let mut config = ModelConfig {
            provider: LlmProvider::OpenAi,
            ..ModelConfig::default()
        };
        assert!(config.validate().is_err());
        config.api_key = "sk-test".into();
        assert!(config.validate().is_ok());
        assert!(ModelConfig::default().validate().is_ok());
    }
}

//! `chatkeep.toml` loading.

use anyhow::Context;
use chatkeep_agent::{LlmProvider, ModelConfig};
use chatkeep_core::RetryPolicy;
use chatkeep_session::{PipelineConfig, SessionConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable that supplies a missing `model.api_key`.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Everything the binary reads from its config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            session: SessionConfig::default(),
            model: ModelConfig::default(),
            pipeline: PipelineConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(source: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(source) => Self::from_toml(&source)
                .with_context(|| format!("Invalid config file '{}'", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config file '{}'", path.display()))
            }
        };
        config.apply_env(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    /// Fill an empty hosted-provider key from the environment.
    pub fn apply_env(&mut self, api_key: Option<String>) {
        if self.model.provider == LlmProvider::Echo || !self.model.api_key.is_empty() {
            return;
        }
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            self.model.api_key = key;
        }
    }

    /// Path of the store journal inside `data_dir`.
    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("chatkeep.jsonl")
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.session.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}

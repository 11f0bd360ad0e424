use crate::backends::{GenerationRequest, Generator};
use crate::llm::SUMMARY_SYSTEM_PROMPT;
use async_trait::async_trait;
use chatkeep_core::{ChatkeepResult, MessageRecord};
use chatkeep_session::{render_transcript, Summarizer, TruncatingSummarizer};
use std::sync::Arc;
use tracing::warn;

/// Summarizes with the generator, falling back to truncation when the
/// generator fails or returns nothing.
pub struct LlmSummarizer {
    generator: Arc<dyn Generator>,
    fallback: TruncatingSummarizer,
}

impl LlmSummarizer {
    /// `max_chars` caps the fallback summary.
    pub fn new(generator: Arc<dyn Generator>, max_chars: usize) -> Self {
        Self {
            generator,
            fallback: TruncatingSummarizer::new(max_chars),
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, transcript: &[MessageRecord]) -> ChatkeepResult<String> {
        if transcript.is_empty() {
            return Ok(self.fallback.truncate(transcript));
        }
        let rendered = render_transcript(transcript);
        let request = GenerationRequest {
            system_prompt: SUMMARY_SYSTEM_PROMPT,
            memory: &[],
            history: &[],
            user_text: &rendered,
        };
        match self.generator.generate(request).await {
            Ok(generation) if !generation.text.trim().is_empty() => {
                Ok(generation.text.trim().to_string())
            }
            Ok(_) => {
                warn!("Generator returned an empty summary, truncating instead");
                Ok(self.fallback.truncate(transcript))
            }
            Err(e) => {
                warn!(error = %e, "Summary generation failed, truncating instead");
                Ok(self.fallback.truncate(transcript))
            }
        }
    }
}

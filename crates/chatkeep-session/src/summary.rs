use async_trait::async_trait;
use chatkeep_core::{ChatkeepResult, MessageRecord};

/// Summary written for a session that ended without any turns.
pub const EMPTY_SESSION_SUMMARY: &str = "session ended without messages";

/// Condenses a finished session's transcript for long-term memory.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize turns given oldest first.
    async fn summarize(&self, transcript: &[MessageRecord]) -> ChatkeepResult<String>;
}

/// Render a transcript as `"{sender}: {content}"` lines.
pub fn render_transcript(transcript: &[MessageRecord]) -> String {
    transcript
        .iter()
        .map(|m| format!("{}: {}", m.sender_type, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Summary made of the transcript itself, cut at a character cap.
#[derive(Debug, Clone)]
pub struct TruncatingSummarizer {
    max_chars: usize,
}

impl TruncatingSummarizer {
    /// Keep at most `max_chars` characters of the rendered transcript.
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// The synchronous core, shared with summarizers that fall back to it.
    pub fn truncate(&self, transcript: &[MessageRecord]) -> String {
        if transcript.is_empty() {
            return EMPTY_SESSION_SUMMARY.to_string();
        }
        let rendered = render_transcript(transcript);
        match rendered.char_indices().nth(self.max_chars) {
            Some((cut, _)) => rendered[..cut].to_string(),
            None => rendered,
        }
    }
}

#[async_trait]
impl Summarizer for TruncatingSummarizer {
    async fn summarize(&self, transcript: &[MessageRecord]) -> ChatkeepResult<String> {
        Ok(self.truncate(transcript))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chatkeep_core::{SenderType, SessionId};
    use chrono::{TimeZone, Utc};

    fn turns() -> Vec<MessageRecord> {
        let sid = SessionId::generate();
        vec![
            MessageRecord::new("u1", sid, SenderType::Human, "héllo", Utc.timestamp_opt(1, 0).unwrap())
                .unwrap(),
            MessageRecord::new("u1", sid, SenderType::Assistant, "hi there", Utc.timestamp_opt(2, 0).unwrap())
                .unwrap(),
        ]
    }

    #[tokio::test]
    async fn test_renders_lines() {
        let summary = TruncatingSummarizer::new(1_000).summarize(&turns()).await.unwrap();
        assert_eq!(summary, "human: héllo\nai: hi there");
    }

    #[tokio::test]
    async fn test_cap_counts_characters() {
        let summary = TruncatingSummarizer::new(10).summarize(&turns()).await.unwrap();
        assert_eq!(summary, "human: hél");
        assert_eq!(summary.chars().count(), 10);
    }

    #[tokio::test]
    async fn test_empty_transcript() {
        let summary = TruncatingSummarizer::new(10).summarize(&[]).await.unwrap();
        assert_eq!(summary, EMPTY_SESSION_SUMMARY);
    }
}

use crate::backends::GenerationRequest;
use chatkeep_core::{MessageRecord, SenderType};
use serde::{Deserialize, Serialize};

/// Speaker of a prompt message, in chat-completions terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    /// Instructions.
    System,
    /// The human.
    User,
    /// The model.
    Assistant,
}

/// One message of a chat-completions prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Speaker.
    pub role: PromptRole,
    /// Text.
    pub content: String,
}

impl PromptMessage {
    /// A message from the human.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    fn from_record(record: &MessageRecord) -> Self {
        let role = match record.sender_type {
            SenderType::Human => PromptRole::User,
            SenderType::Assistant => PromptRole::Assistant,
        };
        Self {
            role,
            content: record.content.clone(),
        }
    }
}

/// Manages the context window for generator calls.
/// Keeps the newest messages and estimates their token cost.
pub struct ContextWindow {
    messages: Vec<PromptMessage>,
    system_prompt: Option<String>,
    max_messages: usize,
}

impl ContextWindow {
    /// An empty window holding at most `max_messages` (at least one).
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            system_prompt: None,
            max_messages: max_messages.max(1),
        }
    }

    /// The window for one request: the system prompt with long-term memory
    /// appended, the newest history, then the user's message.
    pub fn for_request(request: &GenerationRequest<'_>, max_messages: usize) -> Self {
        let mut context = Self::new(max_messages);
        let mut system = request.system_prompt.to_string();
        if !request.memory.is_empty() {
            system.push_str("\n\nSummaries of earlier conversations with this user:");
            for summary in request.memory {
                system.push_str("\n- ");
                system.push_str(summary);
            }
        }
        context.set_system_prompt(system);
        for record in request.history {
            context.push(PromptMessage::from_record(record));
        }
        context.push(PromptMessage::user(request.user_text));
        context
    }

    /// Replace the system prompt.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = Some(prompt.into());
    }

    /// The system prompt, if set.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Append a message, dropping the oldest beyond the limit.
    pub fn push(&mut self, message: PromptMessage) {
        self.messages.push(message);
        self.truncate();
    }

    /// Messages in order, oldest first.
    pub fn messages(&self) -> &[PromptMessage] {
        &self.messages
    }

    fn truncate(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
    }

    /// Rough token estimation (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> u64 {
        let sys_chars = self.system_prompt.as_ref().map_or(0, |s| s.chars().count());
        let msg_chars: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        estimate_tokens(sys_chars + msg_chars)
    }
}

/// Tokens for `chars` characters of text, at least one.
pub fn estimate_tokens(chars: usize) -> u64 {
    u64::try_from(chars.div_ceil(4)).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chatkeep_core::SessionId;
    use chrono::{TimeZone, Utc};

    fn record(sender: SenderType, content: &str, secs: i64) -> MessageRecord {
        MessageRecord::new(
            "u1",
            SessionId::from_uuid(Default::default()),
            sender,
            content,
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_request_layout() {
        let history = vec![
            record(SenderType::Human, "hi", 1),
            record(SenderType::Assistant, "hello", 2),
        ];
        let memory = vec!["talked about rust".to_string()];
        let request = GenerationRequest {
            system_prompt: "You are a helpful assistant.",
            memory: &memory,
            history: &history,
            user_text: "and now?",
        };
        let context = ContextWindow::for_request(&request, 10);

        let system = context.system_prompt().unwrap();
        assert!(system.starts_with("You are a helpful assistant."));
        assert!(system.ends_with("- talked about rust"));
        let roles: Vec<_> = context.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            [PromptRole::User, PromptRole::Assistant, PromptRole::User]
        );
    }

    #[test]
    fn test_oldest_history_dropped_first() {
        let history: Vec<_> = (0..5)
            .map(|i| record(SenderType::Human, &format!("m{i}"), i))
            .collect();
        let request = GenerationRequest {
            system_prompt: "",
            memory: &[],
            history: &history,
            user_text: "latest",
        };
        let context = ContextWindow::for_request(&request, 3);
        let contents: Vec<_> = context.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m3", "m4", "latest"]);
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens(0), 1);
        assert_eq!(estimate_tokens(8), 2);
        assert_eq!(estimate_tokens(9), 3);
    }
}

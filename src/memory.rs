//! Token-bounded chat memory.
//!
//! [`ChatMemoryBuffer`] keeps the complete transcript and hands the LLM only
//! the newest suffix that fits the token limit. Tokens are estimated at
//! four characters each; exact tokenization is the model's business.

use crate::models::{ChatMessage, MessageRole};

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimated token count of a message list.
pub fn estimate_message_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

#[derive(Debug, Clone)]
pub struct ChatMemoryBuffer {
    token_limit: usize,
    messages: Vec<ChatMessage>,
}

impl ChatMemoryBuffer {
    pub fn new(token_limit: usize) -> Self {
        Self {
            token_limit,
            messages: Vec::new(),
        }
    }

    pub fn put(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Every message ever stored, oldest first.
    pub fn all(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Newest messages that fit in the token limit once `initial_tokens`
    /// are already spent.
    ///
    /// The window never starts with an assistant message. If the initial
    /// tokens alone exceed the limit, the window is empty.
    pub fn window(&self, initial_tokens: usize) -> Vec<ChatMessage> {
        if initial_tokens > self.token_limit {
            return Vec::new();
        }

        let mut start = 0;
        while start < self.messages.len() {
            if self.messages[start].role == MessageRole::Assistant {
                start += 1;
                continue;
            }
            let tokens = initial_tokens + estimate_message_tokens(&self.messages[start..]);
            if tokens <= self.token_limit {
                return self.messages[start..].to_vec();
            }
            start += 1;
        }
        Vec::new()
    }
}

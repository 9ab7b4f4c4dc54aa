//! Core data models shared by the index, the chat engine and the UI.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Author of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    /// Label shown next to a message in the transcript.
    pub fn display_label(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "human",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A stored item returned by a retriever, with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedNode {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    /// Metadata keys hidden from the LLM.
    #[serde(skip)]
    pub excluded_llm_metadata_keys: Vec<String>,
    pub score: f32,
}

impl RetrievedNode {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: BTreeMap::new(),
            excluded_llm_metadata_keys: Vec::new(),
            score,
        }
    }

    /// Content as presented to the LLM: visible metadata lines, a blank
    /// line, then the text. Nodes without visible metadata yield the text.
    pub fn llm_content(&self) -> String {
        let meta: Vec<String> = self
            .metadata
            .iter()
            .filter(|(k, _)| !self.excluded_llm_metadata_keys.contains(k))
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        if meta.is_empty() {
            self.text.clone()
        } else {
            format!("{}\n\n{}", meta.join("\n"), self.text)
        }
    }
}

/// Result of one chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<RetrievedNode>,
}

//! Seams between the chat front end and the services it delegates to.
//!
//! Every piece of heavy lifting happens behind one of these traits, so the
//! chat engine, the fetcher and the HTTP layer can be exercised with
//! in-process stubs.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ArtifactSource│   │  Retriever   │   │  ChatModel   │
//! │ HTTP / stub  │   │ index / stub │   │ Groq / stub  │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        ▼                  └────────┬─────────┘
//!   fetch::ensure_artifact           ▼
//!                            engine::ChatSession
//! ```
//!
//! # Usage
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use cancerpedia::models::ChatMessage;
//! use cancerpedia::traits::ChatModel;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ChatModel for Echo {
//!     fn model_name(&self) -> &str { "echo" }
//!
//!     async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
//!         Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::models::{ChatMessage, RetrievedNode};

// ═══════════════════════════════════════════════════════════════════════
// Retriever
// ═══════════════════════════════════════════════════════════════════════

/// Query interface over a vector index.
///
/// Implementations return at most [`top_k`](Retriever::top_k) nodes,
/// most similar first.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Number of nodes returned per query.
    fn top_k(&self) -> usize;

    /// Retrieve the stored items most similar to `query`.
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedNode>>;
}

// ═══════════════════════════════════════════════════════════════════════
// ChatModel
// ═══════════════════════════════════════════════════════════════════════

/// A remote (or stubbed) chat-completion model.
///
/// One call to [`complete`](ChatModel::complete) is one outbound request;
/// nothing is cached or retried.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, e.g. `"llama3-70b-8192"`.
    fn model_name(&self) -> &str;

    /// Send the full message list and return the assistant's reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
// ArtifactSource
// ═══════════════════════════════════════════════════════════════════════

/// Where artifact archives are downloaded from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written.
    ///
    /// `dest` does not exist beforehand; on error it may be left partially
    /// written and the caller removes it.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

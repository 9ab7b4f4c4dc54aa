//! # Cancerpedia Chat
//!
//! A retrieval-augmented chatbot over a curated library of cancer
//! education material.
//!
//! At startup the embedding model archive is downloaded and unpacked once,
//! the persisted vector index is reopened, and a hosted LLM is wired into a
//! chat engine. The web page offers a chat box plus sidebar quick search and
//! FAQ shortcuts; every input becomes one retrieval-augmented turn in the
//! caller's own session.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │    fetch    │──▶│  embedding  │──▶│    index     │
//! │ zip → model │   │ fastembed / │   │ cosine top-K │
//! └─────────────┘   │   remote    │   └──────┬───────┘
//!                   └─────────────┘          │
//!                        ┌─────────┐   ┌─────▼──────┐
//!                        │   llm   │──▶│   engine   │◀── memory
//!                        │  Groq   │   │ChatSession │
//!                        └─────────┘   └─────┬──────┘
//!                                            │ app::SessionStore
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐       ┌──────────────┐
//!                 │   CLI    │       │ HTTP (axum)  │
//!                 │search/ask│       │ page + JSON  │
//!                 └──────────┘       └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cancerpedia fetch                       # download the embedding model
//! cancerpedia search "what is a tumor"    # check retrieval
//! GROQ_API_KEY=... cancerpedia serve      # start the chat page
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`models`] | Core data types |
//! | [`traits`] | Seams for retriever, LLM and archive source |
//! | [`fetch`] | One-time archive download and extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persisted vector index and retriever |
//! | [`llm`] | Chat-completions client |
//! | [`memory`] | Token-bounded chat memory |
//! | [`engine`] | Retrieval-augmented chat session |
//! | [`app`] | Application context and session store |
//! | [`router`] | Input precedence for a render cycle |
//! | [`ui`] | HTML page rendering |
//! | [`server`] | HTTP server |
//! | [`search`] | `search` command |
//! | [`ask`] | `ask` command |

pub mod app;
pub mod ask;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod fetch;
pub mod index;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod models;
pub mod router;
pub mod search;
pub mod server;
pub mod traits;
pub mod ui;

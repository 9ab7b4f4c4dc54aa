//! Application context built once at startup.
//!
//! [`AppContext`] owns everything a request needs: the configuration, the
//! shared LLM client and the per-user [`SessionStore`], whose sessions
//! share one retriever.
//! `serve` and `ask` construct it through [`AppContext::build`]; tests
//! construct it with stubs through [`AppContext::new`].

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::engine::ChatSession;
use crate::fetch::{ensure_artifact, FetchOutcome, HttpArtifactSource};
use crate::index::load_retriever;
use crate::llm::ChatCompletionsClient;
use crate::traits::{ArtifactSource, ChatModel, Retriever};

/// Shared handle to one user's chat session.
pub type SessionHandle = Arc<Mutex<ChatSession>>;

type SessionFactory = Box<dyn Fn() -> ChatSession + Send + Sync>;

struct SessionEntry {
    session: SessionHandle,
    last_used: AtomicU64,
}

/// Chat sessions keyed by session id, capped at `capacity` entries.
///
/// When full, inserting a new id drops the least recently used session.
pub struct SessionStore {
    capacity: usize,
    factory: SessionFactory,
    clock: AtomicU64,
    entries: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new(
        capacity: usize,
        factory: impl Fn() -> ChatSession + Send + Sync + 'static,
    ) -> Self {
        Self {
            capacity: capacity.max(1),
            factory: Box::new(factory),
            clock: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Session for `id`, created on first use.
    pub async fn get_or_create(&self, id: &str) -> SessionHandle {
        if let Some(session) = self.get(id).await {
            return session;
        }

        let mut entries = self.entries.write().await;
        // Another request may have created it between the two locks.
        if let Some(entry) = entries.get(id) {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            return Arc::clone(&entry.session);
        }

        if entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                tracing::debug!(session = %oldest, "evicted least recently used session");
            }
        }

        let session = Arc::new(Mutex::new((self.factory)()));
        entries.insert(
            id.to_string(),
            SessionEntry {
                session: Arc::clone(&session),
                last_used: AtomicU64::new(self.tick()),
            },
        );
        session
    }

    /// Session for `id` if it exists. Never creates one.
    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        let entries = self.entries.read().await;
        entries.get(id).map(|entry| {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            Arc::clone(&entry.session)
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Process-wide state handed to every request handler.
pub struct AppContext {
    pub config: Arc<Config>,
    pub llm: Arc<dyn ChatModel>,
    pub sessions: SessionStore,
}

impl AppContext {
    /// Assemble a context from already constructed services.
    pub fn new(config: Config, llm: Arc<dyn ChatModel>, retriever: Arc<dyn Retriever>) -> Self {
        let config = Arc::new(config);
        let factory = {
            let config = Arc::clone(&config);
            let llm = Arc::clone(&llm);
            move || ChatSession::from_config(Arc::clone(&llm), Arc::clone(&retriever), &config.chat)
        };
        let sessions = SessionStore::new(config.server.max_sessions, factory);

        Self {
            config,
            llm,
            sessions,
        }
    }

    /// Fetch the model archive, load the index and connect the LLM client.
    pub async fn build(config: Config) -> Result<Self> {
        let source = HttpArtifactSource::new()?;
        Self::build_with_source(config, &source).await
    }

    pub async fn build_with_source(config: Config, source: &dyn ArtifactSource) -> Result<Self> {
        let retriever = prepare_retriever(&config, source).await?;
        let llm = ChatCompletionsClient::from_config(&config.llm)?;
        tracing::info!(model = %config.llm.model, "LLM client ready");

        Ok(Self::new(config, Arc::new(llm), retriever))
    }

    /// Session for `id`, created on first use.
    pub async fn session(&self, id: &str) -> SessionHandle {
        self.sessions.get_or_create(id).await
    }
}

/// Fetch the embedding model if needed and open the persisted index.
pub async fn prepare_retriever(
    config: &Config,
    source: &dyn ArtifactSource,
) -> Result<Arc<dyn Retriever>> {
    match ensure_artifact(&config.artifact, source).await? {
        FetchOutcome::AlreadyPresent => {
            tracing::debug!(dir = %config.artifact.target_dir.display(), "embedding model present")
        }
        FetchOutcome::Extracted { downloaded, entries } => tracing::info!(
            downloaded,
            entries,
            dir = %config.artifact.target_dir.display(),
            "embedding model installed"
        ),
    }

    let cache_dir = config.embedding.resolved_cache_dir(&config.artifact);
    let embedder = create_provider(&config.embedding, cache_dir)
        .await
        .context("Failed to initialise embedding model")?;

    let retriever = load_retriever(
        &config.index.persist_dir,
        embedder,
        config.index.similarity_top_k,
    )
    .with_context(|| {
        format!(
            "Failed to load vector index from {}",
            config.index.persist_dir.display()
        )
    })?;
    tracing::info!(
        dir = %config.index.persist_dir.display(),
        top_k = config.index.similarity_top_k,
        "vector index loaded"
    );

    Ok(Arc::new(retriever))
}

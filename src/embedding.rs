//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **`LocalProvider`**: runs a sentence-transformer in process via
//!   fastembed. When the cache directory (the fetched artifact) holds an
//!   ONNX export with its tokenizer files, those are loaded directly;
//!   otherwise fastembed's own model cache in that directory is used.
//!   Requires the `local-embeddings` feature.
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `/embeddings`
//!   endpoint.
//!
//! Also provides [`cosine_similarity`], used by the index to rank nodes.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to build the provider named by
//! `embedding.provider`. The provider must match the model the persisted
//! index was built with, otherwise similarity scores are meaningless.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Maps text to fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }
}

// ============ OpenAI-compatible Provider ============

/// Embedding provider for OpenAI-compatible `POST /embeddings` endpoints.
///
/// The API key is read from the environment variable named by
/// `embedding.api_key_env`. Requests are not retried.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `dims` is not configured or the API key
    /// variable is unset.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for openai provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            dims,
            url,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Embedding request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Embedding API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_openai_response(&json)
    }
}

/// Parse an embeddings API response, returning vectors in input order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid embeddings response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid embeddings response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Local model files ============

/// How many directory levels below the cache directory are searched.
const MODEL_SEARCH_DEPTH: usize = 4;

/// Files of an unpacked sentence-transformers ONNX export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalModelFiles {
    pub onnx: PathBuf,
    pub tokenizer: PathBuf,
    pub config: PathBuf,
    pub tokenizer_config: PathBuf,
    pub special_tokens_map: Option<PathBuf>,
}

impl LocalModelFiles {
    /// Locate an export under `dir`: `dir` itself first, then its
    /// subdirectories in name order.
    pub fn find(dir: &Path) -> Option<Self> {
        Self::find_within(dir, MODEL_SEARCH_DEPTH)
    }

    fn find_within(dir: &Path, depth: usize) -> Option<Self> {
        if let Some(files) = Self::in_dir(dir) {
            return Some(files);
        }
        if depth == 0 {
            return None;
        }
        let mut children: Vec<PathBuf> = std::fs::read_dir(dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        children.sort();
        children
            .iter()
            .find_map(|child| Self::find_within(child, depth - 1))
    }

    fn in_dir(dir: &Path) -> Option<Self> {
        let file = |name: &str| Some(dir.join(name)).filter(|path| path.is_file());
        Some(Self {
            onnx: file("onnx/model.onnx").or_else(|| file("model.onnx"))?,
            tokenizer: file("tokenizer.json")?,
            config: file("config.json")?,
            tokenizer_config: file("tokenizer_config.json")?,
            special_tokens_map: file("special_tokens_map.json"),
        })
    }

    /// `hidden_size` from the export's `config.json`.
    pub fn hidden_size(&self) -> Option<usize> {
        let raw = std::fs::read(&self.config).ok()?;
        let json: serde_json::Value = serde_json::from_slice(&raw).ok()?;
        json.get("hidden_size")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
    }

    #[cfg(feature = "local-embeddings")]
    fn read(&self) -> Result<fastembed::UserDefinedEmbeddingModel> {
        let read = |path: &Path| {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
        };
        let special_tokens_map_file = match &self.special_tokens_map {
            Some(path) => read(path)?,
            None => b"{}".to_vec(),
        };
        let tokenizer_files = fastembed::TokenizerFiles {
            tokenizer_file: read(&self.tokenizer)?,
            config_file: read(&self.config)?,
            special_tokens_map_file,
            tokenizer_config_file: read(&self.tokenizer_config)?,
        };
        // sentence-transformers MiniLM exports are mean pooled.
        Ok(
            fastembed::UserDefinedEmbeddingModel::new(read(&self.onnx)?, tokenizer_files)
                .with_pooling(fastembed::Pooling::Mean),
        )
    }
}

// ============ Local Provider (fastembed) ============

/// Sentence-transformer embeddings computed in process.
///
/// The model is loaded once, from the ONNX export under `cache_dir` when
/// there is one and from fastembed's model cache there otherwise. It is
/// shared behind a mutex; inference runs on the blocking thread pool.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub async fn load(config: &EmbeddingConfig, cache_dir: PathBuf) -> Result<Self> {
        let files = LocalModelFiles::find(&cache_dir);
        let (model_name, mut dims) = resolve_local_model(config);
        if config.dims.is_none() {
            if let Some(hidden) = files.as_ref().and_then(LocalModelFiles::hidden_size) {
                dims = hidden;
            }
        }

        let model = match files {
            Some(files) => {
                tracing::info!(
                    model = %model_name,
                    onnx = %files.onnx.display(),
                    "loading embedding model from local export"
                );
                tokio::task::spawn_blocking(move || {
                    fastembed::TextEmbedding::try_new_from_user_defined(
                        files.read()?,
                        fastembed::InitOptionsUserDefined::default(),
                    )
                    .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))
                })
                .await??
            }
            None => {
                let fastembed_model = config_to_fastembed_model(&model_name)?;
                tracing::warn!(
                    model = %model_name,
                    cache_dir = %cache_dir.display(),
                    "no ONNX export found, using fastembed model cache"
                );
                tokio::task::spawn_blocking(move || {
                    fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(fastembed_model)
                            .with_cache_dir(cache_dir)
                            .with_show_download_progress(false),
                    )
                    .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))
                })
                .await??
            }
        };

        Ok(Self {
            model_name,
            dims,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow!("embedding model lock poisoned"))?;
            model
                .embed(texts, None)
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config.model.clone();
    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        _ => 384,
    });
    (model_name, dims)
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            Ok(fastembed::EmbeddingModel::AllMiniLML6V2)
        }
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base",
            other
        ),
    }
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"local"` | `LocalProvider` (needs the `local-embeddings` feature) |
/// | `"openai"` | [`OpenAIProvider`] |
pub async fn create_provider(
    config: &EmbeddingConfig,
    cache_dir: PathBuf,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::load(config, cache_dir).await?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => {
            let _ = cache_dir;
            bail!("Local embedding provider requires --features local-embeddings")
        }
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

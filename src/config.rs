//! TOML configuration.
//!
//! Every section and field has a default, so an empty file yields the
//! stock Cancerpedia setup: the Drive-hosted MiniLM archive, the
//! `vector_index/` directory, Groq's `llama3-70b-8192`, and the FAQ list
//! shown in the sidebar.
//!
//! ```toml
//! [artifact]
//! url = "https://drive.google.com/uc?export=download&confirm=t&id=..."
//! archive = "embedding_model_cancer.zip"
//! target_dir = "embedding_model_cancer"
//!
//! [index]
//! persist_dir = "vector_index"
//! similarity_top_k = 2
//!
//! [llm]
//! model = "llama3-70b-8192"
//! api_key_env = "GROQ_API_KEY"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub artifact: ArtifactConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Where the embedding model archive comes from and where it is unpacked.
#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_url")]
    pub url: String,
    #[serde(default = "default_archive")]
    pub archive: PathBuf,
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,
    /// Optional hex SHA-256 of the archive. Unset means no verification.
    #[serde(default)]
    pub sha256: Option<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            url: default_artifact_url(),
            archive: default_archive(),
            target_dir: default_target_dir(),
            sha256: None,
        }
    }
}

fn default_artifact_url() -> String {
    "https://drive.google.com/uc?export=download&confirm=t&id=1K6x4FU4A4aBIP7_agPKtLRXojtgbgoUq"
        .to_string()
}
fn default_archive() -> PathBuf {
    PathBuf::from("embedding_model_cancer.zip")
}
fn default_target_dir() -> PathBuf {
    PathBuf::from("embedding_model_cancer")
}

/// `[embedding]`. With `provider = "openai"` the remote `model` must be
/// the one the persisted index was embedded with.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Directory holding the ONNX export or fastembed's model cache.
    /// Defaults to `artifact.target_dir`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `openai` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            cache_dir: None,
            dims: None,
            url: None,
            api_key_env: default_embedding_key_env(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
    #[serde(default = "default_top_k")]
    pub similarity_top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist_dir: default_persist_dir(),
            similarity_top_k: default_top_k(),
        }
    }
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from("vector_index")
}
fn default_top_k() -> usize {
    2
}

/// OpenAI-compatible chat-completions endpoint. Defaults target Groq.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_key_env(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_model() -> String {
    "llama3-70b-8192".to_string()
}
fn default_llm_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Estimated tokens of history (plus prefix) sent with each turn.
    #[serde(default = "default_memory_token_limit")]
    pub memory_token_limit: usize,
    /// Ordered system instructions prepended to every exchange.
    #[serde(default = "default_system_prompts")]
    pub system_prompts: Vec<String>,
    /// Must contain `{context}`.
    #[serde(default = "default_context_template")]
    pub context_template: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            memory_token_limit: default_memory_token_limit(),
            system_prompts: default_system_prompts(),
            context_template: default_context_template(),
        }
    }
}

fn default_memory_token_limit() -> usize {
    3000
}

fn default_system_prompts() -> Vec<String> {
    vec![
        "You are a kind and helpful chatbot having a conversation with a human.".to_string(),
        "You may use background information to improve your answers. \
         You may also answer new questions on unrelated topics if asked. \
         But do not say things like 'According to the text' or refer to any document. \
         Answer naturally and directly, as if you're speaking from your own knowledge."
            .to_string(),
        "Keep your answers short, clear, and conversational.".to_string(),
    ]
}

fn default_context_template() -> String {
    crate::engine::DEFAULT_CONTEXT_TEMPLATE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UiConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_caption")]
    pub caption: String,
    /// Markdown shown above the transcript.
    #[serde(default = "default_welcome")]
    pub welcome: String,
    #[serde(default = "default_chat_placeholder")]
    pub chat_placeholder: String,
    #[serde(default = "default_faq")]
    pub faq: Vec<String>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            caption: default_caption(),
            welcome: default_welcome(),
            chat_placeholder: default_chat_placeholder(),
            faq: default_faq(),
        }
    }
}

fn default_title() -> String {
    "Cancerpedia Chat".to_string()
}
fn default_caption() -> String {
    "Your friendly, trustworthy cancer knowledge companion.".to_string()
}
fn default_welcome() -> String {
    r#"👋 **Welcome to Cancerpedia Chat!**

Curious about cancer, treatments, or medical terms you've come across?
This chatbot is here to help you explore verified cancer education materials in plain language.
Whether you're a patient, caregiver, or just learning, you're in the right place.

💡 *Try asking things like:*
- "What is chemotherapy?"
- "How do cancer cells grow?"
- "What does BRCA1 mean?"

📚 *Powered by a curated library of cancer education resources.*"#
        .to_string()
}
fn default_chat_placeholder() -> String {
    "Curious minds wanted!".to_string()
}

fn default_faq() -> Vec<String> {
    [
        "What is cancer?",
        "How does immunotherapy work?",
        "Can cancer be inherited?",
        "What are the early signs?",
        "How is cancer staged?",
        "What is palliative care?",
        "What are common cancer treatments?",
        "How can I support a loved one with cancer?",
        "What is the role of a pathologist in cancer diagnosis?",
        "What is the difference between benign and malignant tumors?",
        "What lifestyle changes can help prevent cancer?",
        "What is the role of clinical trials in cancer treatment?",
        "How can I manage side effects of cancer treatment?",
        "What is the importance of early detection?",
        "What are the most common types of cancer?",
        "What are common signs and symptoms of cancer",
        "What is the role of nutrition in cancer care?",
        "How can I cope with a cancer diagnosis?",
        "When should I see a doctor about possible cancer symptoms?",
        "What is the difference between chemotherapy and radiation therapy?",
        "What are the potential side effects of cancer treatment?",
        "Are unexplained weight loss or fatigue signs of cancer?",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Chat sessions kept in memory before the least recently used is dropped.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}
fn default_max_sessions() -> usize {
    1024
}

impl EmbeddingConfig {
    /// Cache directory for the model, falling back to the fetched artifact.
    pub fn resolved_cache_dir(&self, artifact: &ArtifactConfig) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| artifact.target_dir.clone())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.artifact.url.trim().is_empty() {
        anyhow::bail!("artifact.url must not be empty");
    }
    if config.artifact.archive.as_os_str().is_empty()
        || config.artifact.target_dir.as_os_str().is_empty()
    {
        anyhow::bail!("artifact.archive and artifact.target_dir must not be empty");
    }
    if let Some(sha) = &config.artifact.sha256 {
        if sha.len() != 64 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("artifact.sha256 must be 64 hex characters");
        }
    }

    match config.embedding.provider.as_str() {
        "local" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local or openai.",
            other
        ),
    }
    if config.embedding.provider == "openai" && config.embedding.dims.is_none() {
        anyhow::bail!("embedding.dims must be set when provider is 'openai'");
    }

    if config.index.similarity_top_k == 0 {
        anyhow::bail!("index.similarity_top_k must be >= 1");
    }

    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    if config.chat.memory_token_limit == 0 {
        anyhow::bail!("chat.memory_token_limit must be > 0");
    }
    if !config.chat.context_template.contains("{context}") {
        anyhow::bail!("chat.context_template must contain {{context}}");
    }

    if config.ui.faq.iter().any(|q| q.trim().is_empty()) {
        anyhow::bail!("ui.faq entries must not be empty");
    }

    if config.server.max_sessions == 0 {
        anyhow::bail!("server.max_sessions must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.index.similarity_top_k, 2);
        assert_eq!(cfg.llm.model, "llama3-70b-8192");
        assert_eq!(cfg.llm.api_key_env, "GROQ_API_KEY");
        assert_eq!(cfg.chat.system_prompts.len(), 3);
        assert_eq!(cfg.ui.faq.len(), 22);
        assert_eq!(cfg.server.bind, "127.0.0.1:8501");
    }

    #[test]
    fn faq_questions_are_separate() {
        let faq = default_faq();
        assert!(faq.contains(&"How can I cope with a cancer diagnosis?".to_string()));
        assert!(faq
            .contains(&"When should I see a doctor about possible cancer symptoms?".to_string()));
    }

    #[test]
    fn cache_dir_falls_back_to_artifact_dir() {
        let cfg = Config::default();
        assert_eq!(
            cfg.embedding.resolved_cache_dir(&cfg.artifact),
            PathBuf::from("embedding_model_cancer")
        );

        let cfg: Config = toml::from_str("[embedding]\ncache_dir = \"models\"\n").unwrap();
        assert_eq!(
            cfg.embedding.resolved_cache_dir(&cfg.artifact),
            PathBuf::from("models")
        );
    }

    #[test]
    fn rejects_zero_top_k() {
        let cfg: Config = toml::from_str("[index]\nsimilarity_top_k = 0\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let cfg: Config = toml::from_str("[embedding]\nprovider = \"bert\"\n").unwrap();
        let err = validate(&cfg).unwrap_err().to_string();
        assert!(err.contains("Unknown embedding provider"));
    }

    #[test]
    fn openai_embeddings_need_dims() {
        let cfg: Config = toml::from_str("[embedding]\nprovider = \"openai\"\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_blank_faq_entry() {
        let cfg: Config = toml::from_str("[ui]\nfaq = [\"What is cancer?\", \"  \"]\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_bad_checksum() {
        let cfg: Config = toml::from_str("[artifact]\nsha256 = \"abc\"\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn context_template_needs_placeholder() {
        let cfg: Config = toml::from_str("[chat]\ncontext_template = \"nothing\"\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cancerpedia.toml");
        std::fs::write(
            &path,
            "[server]\nbind = \"0.0.0.0:9000\"\n\n[index]\nsimilarity_top_k = 4\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.index.similarity_top_k, 4);
    }

    #[test]
    fn shipped_config_is_valid() {
        let cfg: Config = toml::from_str(include_str!("../config/cancerpedia.toml")).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.chat.system_prompts, default_system_prompts());
        assert_eq!(cfg.ui.faq.len(), 22);
    }

    #[test]
    fn load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/cancerpedia.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

//! Persisted vector index loading and top-K retrieval.
//!
//! The index directory is produced ahead of time by the indexing tool and
//! is never written here. Its simple JSON layout is:
//!
//! | File | Contents |
//! |------|----------|
//! | `docstore.json` | `docstore/data`: node id → `{ "__data__": { text, metadata, … } }` |
//! | `default__vector_store.json` | `embedding_dict`: node id → vector |
//! | `index_store.json` (optional) | `nodes_dict` of the vector index, restricting which nodes are searchable |
//!
//! Retrieval embeds the query with the bound [`EmbeddingProvider`] and ranks
//! every stored vector by cosine similarity. The corpus is small enough
//! that a linear scan is the whole search strategy.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::models::RetrievedNode;
use crate::traits::Retriever;

const DOCSTORE_FILE: &str = "docstore.json";
const VECTOR_STORE_FILE: &str = "default__vector_store.json";
const LEGACY_VECTOR_STORE_FILE: &str = "vector_store.json";
const INDEX_STORE_FILE: &str = "index_store.json";

#[derive(Deserialize)]
struct DocStoreFile {
    #[serde(rename = "docstore/data", default)]
    data: HashMap<String, NodeEnvelope>,
}

#[derive(Deserialize)]
struct NodeEnvelope {
    #[serde(rename = "__data__")]
    data: Value,
}

#[derive(Deserialize)]
struct VectorStoreFile {
    #[serde(default)]
    embedding_dict: HashMap<String, Vec<f32>>,
}

#[derive(Deserialize)]
struct IndexStoreFile {
    #[serde(rename = "index_store/data", default)]
    data: HashMap<String, IndexStructEnvelope>,
}

#[derive(Deserialize)]
struct IndexStructEnvelope {
    #[serde(rename = "__type__", default)]
    kind: String,
    /// Either an embedded JSON string or an object, depending on the writer.
    #[serde(rename = "__data__")]
    data: Value,
}

/// One searchable node with its vector.
#[derive(Debug, Clone)]
struct IndexedNode {
    id: String,
    text: String,
    metadata: BTreeMap<String, String>,
    excluded_llm_metadata_keys: Vec<String>,
    embedding: Vec<f32>,
}

/// A read-only similarity index bound to an embedding provider.
pub struct VectorIndex {
    nodes: Vec<IndexedNode>,
    dims: usize,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("nodes", &self.nodes.len())
            .field("dims", &self.dims)
            .field("embedder", &self.embedder.model_name())
            .finish()
    }
}

impl VectorIndex {
    /// Open the index persisted in `persist_dir`.
    ///
    /// # Errors
    ///
    /// Fails when the directory or one of the required files is missing or
    /// malformed, when no node has both text and a vector, when vectors
    /// disagree on dimensionality, or when that dimensionality differs from
    /// the embedding provider's.
    pub fn load(persist_dir: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if !persist_dir.is_dir() {
            bail!("Vector index directory not found: {}", persist_dir.display());
        }

        let docstore: DocStoreFile = read_json(&persist_dir.join(DOCSTORE_FILE))?;

        let vector_path = if persist_dir.join(VECTOR_STORE_FILE).is_file() {
            persist_dir.join(VECTOR_STORE_FILE)
        } else {
            persist_dir.join(LEGACY_VECTOR_STORE_FILE)
        };
        let vectors: VectorStoreFile = read_json(&vector_path)?;

        let index_store_path = persist_dir.join(INDEX_STORE_FILE);
        let allowed = if index_store_path.is_file() {
            let store: IndexStoreFile = read_json(&index_store_path)?;
            vector_index_node_ids(&store)?
        } else {
            None
        };

        let mut nodes = Vec::with_capacity(vectors.embedding_dict.len());
        for (id, embedding) in vectors.embedding_dict {
            if let Some(allowed) = &allowed {
                if !allowed.contains(&id) {
                    continue;
                }
            }
            let Some(envelope) = docstore.data.get(&id) else {
                tracing::warn!(node = %id, "vector has no docstore entry, skipping");
                continue;
            };
            nodes.push(parse_node(id, &envelope.data, embedding));
        }

        if nodes.is_empty() {
            bail!("Vector index at {} contains no nodes", persist_dir.display());
        }

        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let dims = nodes[0].embedding.len();
        if dims == 0 {
            bail!("Vector index at {} has empty vectors", persist_dir.display());
        }
        if let Some(bad) = nodes.iter().find(|n| n.embedding.len() != dims) {
            bail!(
                "Vector index is inconsistent: node {} has {} dims, expected {}",
                bad.id,
                bad.embedding.len(),
                dims
            );
        }
        if embedder.dims() != dims {
            bail!(
                "Vector index has {}-dim vectors but embedding model '{}' produces {} dims",
                dims,
                embedder.model_name(),
                embedder.dims()
            );
        }

        tracing::info!(
            dir = %persist_dir.display(),
            nodes = nodes.len(),
            dims,
            "loaded vector index"
        );

        Ok(Self {
            nodes,
            dims,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// A retriever over this index returning `top_k` nodes per query.
    pub fn as_retriever(self: &Arc<Self>, top_k: usize) -> IndexRetriever {
        IndexRetriever {
            index: Arc::clone(self),
            top_k,
        }
    }

    /// Rank all nodes against an already embedded query.
    ///
    /// Highest similarity first; ties break on node id so results are
    /// deterministic.
    pub fn rank(&self, query: &[f32], top_k: usize) -> Result<Vec<RetrievedNode>> {
        if query.len() != self.dims {
            bail!(
                "Query embedding has {} dims, index expects {}",
                query.len(),
                self.dims
            );
        }

        let mut scored: Vec<(&IndexedNode, f32)> = self
            .nodes
            .iter()
            .map(|n| (n, cosine_similarity(query, &n.embedding)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(n, score)| RetrievedNode {
                id: n.id.clone(),
                text: n.text.clone(),
                metadata: n.metadata.clone(),
                excluded_llm_metadata_keys: n.excluded_llm_metadata_keys.clone(),
                score,
            })
            .collect())
    }
}

/// [`Retriever`] over a [`VectorIndex`].
#[derive(Debug, Clone)]
pub struct IndexRetriever {
    index: Arc<VectorIndex>,
    top_k: usize,
}

#[async_trait]
impl Retriever for IndexRetriever {
    fn top_k(&self) -> usize {
        self.top_k
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedNode>> {
        let query_vec = self
            .index
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;
        self.index.rank(&query_vec, self.top_k)
    }
}

/// Open the index at `persist_dir` and wrap it in a retriever.
pub fn load_retriever(
    persist_dir: &Path,
    embedder: Arc<dyn EmbeddingProvider>,
    top_k: usize,
) -> Result<IndexRetriever> {
    let index = Arc::new(VectorIndex::load(persist_dir, embedder)?);
    Ok(index.as_retriever(top_k))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read index file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse index file: {}", path.display()))
}

/// Node ids of the vector-store index struct, if the index store names one.
fn vector_index_node_ids(store: &IndexStoreFile) -> Result<Option<HashSet<String>>> {
    let Some(entry) = store.data.values().find(|e| e.kind == "vector_store") else {
        return Ok(None);
    };

    let data = match &entry.data {
        Value::String(s) => serde_json::from_str::<Value>(s)
            .context("Failed to parse vector_store index struct")?,
        other => other.clone(),
    };

    Ok(data
        .get("nodes_dict")
        .and_then(|d| d.as_object())
        .map(|d| d.keys().cloned().collect()))
}

fn parse_node(id: String, data: &Value, embedding: Vec<f32>) -> IndexedNode {
    let text = data
        .get("text")
        .and_then(|t| t.as_str())
        .or_else(|| {
            data.get("text_resource")
                .and_then(|r| r.get("text"))
                .and_then(|t| t.as_str())
        })
        .unwrap_or_default()
        .to_string();

    let metadata = data
        .get("metadata")
        .and_then(|m| m.as_object())
        .map(|m| {
            m.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default();

    let excluded_llm_metadata_keys = data
        .get("excluded_llm_metadata_keys")
        .and_then(|k| k.as_array())
        .map(|keys| {
            keys.iter()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    IndexedNode {
        id,
        text,
        metadata,
        excluded_llm_metadata_keys,
        embedding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    /// Maps a handful of keywords onto fixed axes.
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keywords"
        }

        fn dims(&self) -> usize {
            3
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        t.contains("chemo") as u8 as f32,
                        t.contains("gene") as u8 as f32,
                        t.contains("diet") as u8 as f32,
                    ]
                })
                .collect())
        }
    }

    fn write_index(dir: &Path, nodes: &[(&str, &str, Vec<f32>)], index_ids: Option<&[&str]>) {
        let mut data = serde_json::Map::new();
        let mut embeddings = serde_json::Map::new();
        for (id, text, vec) in nodes {
            data.insert(
                id.to_string(),
                json!({
                    "__data__": {
                        "id_": id,
                        "text": text,
                        "metadata": { "file_name": format!("{}.pdf", id), "page": 3 },
                        "excluded_llm_metadata_keys": ["page"]
                    },
                    "__type__": "1"
                }),
            );
            embeddings.insert(id.to_string(), json!(vec));
        }
        std::fs::write(
            dir.join(DOCSTORE_FILE),
            json!({ "docstore/data": data }).to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.join(VECTOR_STORE_FILE),
            json!({ "embedding_dict": embeddings, "text_id_to_ref_doc_id": {} }).to_string(),
        )
        .unwrap();

        if let Some(ids) = index_ids {
            let nodes_dict: serde_json::Map<String, Value> =
                ids.iter().map(|id| (id.to_string(), json!(id))).collect();
            let inner = json!({ "index_id": "idx", "nodes_dict": nodes_dict }).to_string();
            std::fs::write(
                dir.join(INDEX_STORE_FILE),
                json!({
                    "index_store/data": {
                        "idx": { "__type__": "vector_store", "__data__": inner }
                    }
                })
                .to_string(),
            )
            .unwrap();
        }
    }

    fn sample_nodes() -> Vec<(&'static str, &'static str, Vec<f32>)> {
        vec![
            ("chemo", "Chemotherapy uses drugs to kill cancer cells.", vec![1.0, 0.0, 0.0]),
            ("genes", "BRCA1 is a gene linked to breast cancer.", vec![0.0, 1.0, 0.0]),
            ("diet", "A balanced diet supports treatment.", vec![0.0, 0.2, 1.0]),
        ]
    }

    #[tokio::test]
    async fn retrieves_most_similar_first() {
        let tmp = TempDir::new().unwrap();
        write_index(tmp.path(), &sample_nodes(), None);

        let retriever = load_retriever(tmp.path(), Arc::new(KeywordEmbedder), 2).unwrap();
        assert_eq!(retriever.top_k(), 2);

        let nodes = retriever.retrieve("What is a gene?").await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "genes");
        assert!((nodes[0].score - 1.0).abs() < 1e-6);
        assert_eq!(nodes[1].id, "diet");
        assert_eq!(nodes[0].metadata.get("page").map(String::as_str), Some("3"));
        assert_eq!(
            nodes[0].llm_content(),
            "file_name: genes.pdf\n\nBRCA1 is a gene linked to breast cancer."
        );
    }

    #[tokio::test]
    async fn index_store_restricts_nodes() {
        let tmp = TempDir::new().unwrap();
        write_index(tmp.path(), &sample_nodes(), Some(&["chemo", "diet"]));

        let index = VectorIndex::load(tmp.path(), Arc::new(KeywordEmbedder)).unwrap();
        assert_eq!(index.len(), 2);
        let retriever = Arc::new(index).as_retriever(5);
        let nodes = retriever.retrieve("gene").await.unwrap();
        assert!(nodes.iter().all(|n| n.id != "genes"));
    }

    #[test]
    fn ties_break_on_id() {
        let tmp = TempDir::new().unwrap();
        write_index(
            tmp.path(),
            &[
                ("b", "second", vec![1.0, 0.0, 0.0]),
                ("a", "first", vec![1.0, 0.0, 0.0]),
            ],
            None,
        );
        let index = VectorIndex::load(tmp.path(), Arc::new(KeywordEmbedder)).unwrap();
        let ranked = index.rank(&[1.0, 0.0, 0.0], 2).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn missing_directory_is_fatal() {
        let err = VectorIndex::load(
            Path::new("/nonexistent/vector_index"),
            Arc::new(KeywordEmbedder),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn missing_docstore_is_fatal() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(VECTOR_STORE_FILE), r#"{"embedding_dict": {}}"#).unwrap();
        let err = VectorIndex::load(tmp.path(), Arc::new(KeywordEmbedder)).unwrap_err();
        assert!(err.to_string().contains("docstore.json"));
    }

    #[test]
    fn malformed_json_is_fatal() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(DOCSTORE_FILE), "{ not json").unwrap();
        std::fs::write(tmp.path().join(VECTOR_STORE_FILE), "{}").unwrap();
        let err = VectorIndex::load(tmp.path(), Arc::new(KeywordEmbedder)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse index file"));
    }

    #[test]
    fn inconsistent_dims_are_fatal() {
        let tmp = TempDir::new().unwrap();
        write_index(
            tmp.path(),
            &[("a", "x", vec![1.0, 0.0, 0.0]), ("b", "y", vec![1.0, 0.0])],
            None,
        );
        let err = VectorIndex::load(tmp.path(), Arc::new(KeywordEmbedder)).unwrap_err();
        assert!(err.to_string().contains("inconsistent"));
    }

    #[test]
    fn provider_dims_must_match() {
        let tmp = TempDir::new().unwrap();
        write_index(tmp.path(), &[("a", "x", vec![1.0, 0.0])], None);
        let err = VectorIndex::load(tmp.path(), Arc::new(KeywordEmbedder)).unwrap_err();
        assert!(err.to_string().contains("produces 3 dims"));
    }

    #[test]
    fn empty_index_is_fatal() {
        let tmp = TempDir::new().unwrap();
        write_index(tmp.path(), &[], None);
        let err = VectorIndex::load(tmp.path(), Arc::new(KeywordEmbedder)).unwrap_err();
        assert!(err.to_string().contains("no nodes"));
    }

    #[test]
    fn text_resource_layout_is_read() {
        let data = json!({ "text_resource": { "text": "nested" } });
        let node = parse_node("n".to_string(), &data, vec![1.0]);
        assert_eq!(node.text, "nested");
    }
}

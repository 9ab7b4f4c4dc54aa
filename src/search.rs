//! `cancerpedia search`: print what the retriever returns for a query.
//!
//! Useful for checking the index and embedding model without spending an
//! LLM call.

use anyhow::Result;

use crate::app::prepare_retriever;
use crate::config::Config;
use crate::fetch::HttpArtifactSource;
use crate::models::RetrievedNode;
use crate::traits::Retriever;

const EXCERPT_CHARS: usize = 240;

pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let mut config = config.clone();
    if let Some(k) = top_k {
        if k == 0 {
            anyhow::bail!("--top-k must be >= 1");
        }
        config.index.similarity_top_k = k;
    }

    let source = HttpArtifactSource::new()?;
    let retriever = prepare_retriever(&config, &source).await?;
    let nodes = retriever.retrieve(query.trim()).await?;

    if nodes.is_empty() {
        println!("No results.");
        return Ok(());
    }

    print!("{}", format_results(&nodes));
    Ok(())
}

fn node_title(node: &RetrievedNode) -> &str {
    ["title", "file_name", "source"]
        .iter()
        .find_map(|key| node.metadata.get(*key))
        .map(String::as_str)
        .unwrap_or("(untitled)")
}

/// Numbered listing, one block per node.
pub fn format_results(nodes: &[RetrievedNode]) -> String {
    let mut out = String::new();
    for (i, node) in nodes.iter().enumerate() {
        let flat = node.text.replace('\n', " ");
        let flat = flat.trim();
        let excerpt: String = flat.chars().take(EXCERPT_CHARS).collect();
        let ellipsis = if flat.chars().count() > EXCERPT_CHARS {
            "…"
        } else {
            ""
        };

        out.push_str(&format!(
            "{}. [{:.2}] {}\n",
            i + 1,
            node.score,
            node_title(node)
        ));
        out.push_str(&format!("    excerpt: \"{}{}\"\n", excerpt, ellipsis));
        out.push_str(&format!("    id: {}\n\n", node.id));
    }
    out
}

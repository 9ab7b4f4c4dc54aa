//! # Cancerpedia Chat CLI (`cancerpedia`)
//!
//! ## Usage
//!
//! ```bash
//! cancerpedia --config ./config/cancerpedia.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cancerpedia fetch` | Download and unpack the embedding model archive (once) |
//! | `cancerpedia serve` | Start the chat web server |
//! | `cancerpedia search "<query>"` | Print the snippets the retriever returns |
//! | `cancerpedia ask "<question>"` | One chat turn, answer on stdout |
//!
//! ## Examples
//!
//! ```bash
//! # First run: fetch the model, then serve on 127.0.0.1:8501
//! cancerpedia fetch
//! GROQ_API_KEY=... cancerpedia serve
//!
//! # Inspect retrieval
//! cancerpedia search "what is chemotherapy" --top-k 4
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use cancerpedia::app::AppContext;
use cancerpedia::config;
use cancerpedia::fetch::{ensure_artifact, FetchOutcome, HttpArtifactSource};
use cancerpedia::{ask, logging, search, server};

/// Cancerpedia Chat: a retrieval-augmented chatbot over a curated library
/// of cancer education material.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cancerpedia.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cancerpedia",
    about = "Cancerpedia Chat, a friendly cancer knowledge companion",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cancerpedia.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and unpack the embedding model archive.
    ///
    /// Does nothing when the target directory already exists.
    Fetch,

    /// Start the chat web server.
    ///
    /// Fetches the model if needed, loads the vector index, connects the
    /// LLM client and serves the page on `[server].bind`.
    Serve,

    /// Print the top-K snippets retrieved for a query.
    Search {
        /// The search query string.
        query: String,

        /// Override `[index].similarity_top_k`.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Ask one question and print the answer.
    Ask {
        /// The question.
        question: String,

        /// Also list the retrieved sources.
        #[arg(long)]
        sources: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Secrets may live in a local .env file.
    let _ = dotenvy::dotenv();
    logging::init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Fetch => {
            let source = HttpArtifactSource::new()?;
            match ensure_artifact(&cfg.artifact, &source).await? {
                FetchOutcome::AlreadyPresent => println!(
                    "{} already present, nothing to do.",
                    cfg.artifact.target_dir.display()
                ),
                FetchOutcome::Extracted {
                    downloaded,
                    entries,
                } => println!(
                    "{} {} entries into {}",
                    if downloaded {
                        "Downloaded and extracted"
                    } else {
                        "Extracted"
                    },
                    entries,
                    cfg.artifact.target_dir.display()
                ),
            }
        }
        Commands::Serve => {
            let ctx = AppContext::build(cfg).await?;
            server::run_server(Arc::new(ctx)).await?;
        }
        Commands::Search { query, top_k } => {
            search::run_search(&cfg, &query, top_k).await?;
        }
        Commands::Ask { question, sources } => {
            ask::run_ask(&cfg, &question, sources).await?;
        }
    }

    Ok(())
}

//! `cancerpedia ask`: one chat turn from the command line.

use anyhow::Result;

use crate::app::AppContext;
use crate::config::Config;

pub async fn run_ask(config: &Config, question: &str, show_sources: bool) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        anyhow::bail!("question must not be empty");
    }

    let ctx = AppContext::build(config.clone()).await?;
    let session = ctx.session("cli").await;
    let answer = session.lock().await.chat(question).await?;

    println!("{}", answer.response);

    if show_sources && !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, node) in answer.sources.iter().enumerate() {
            println!("  {}. [{:.2}] {}", i + 1, node.score, node.id);
        }
    }
    Ok(())
}

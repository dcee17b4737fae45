use anyhow::Result;

use crate::config::MnemaConfig;
use crate::engine::MemoryEngine;

/// Ask the agent a question; the answer is shaped by its personality and
/// grounded in its memories.
pub async fn think(
    config: &MnemaConfig,
    agent_id: &str,
    question: &str,
    context: Option<&str>,
    thinking_budget: Option<u32>,
) -> Result<()> {
    let mut engine = MemoryEngine::new(config.clone()).await?;
    let outcome = engine
        .think(agent_id, question, context, thinking_budget)
        .await?;
    engine.shutdown().await;

    println!("{}", outcome.text);

    if !outcome.based_on.is_empty() {
        println!("\nBased on:");
        for fact in &outcome.based_on {
            println!(
                "  [{}] (activation: {:.3}) {}",
                fact.fact_type.as_str(),
                fact.activation,
                fact.text
            );
        }
    }

    if !outcome.new_opinions.is_empty() {
        println!("\nNew opinions formed:");
        for opinion in &outcome.new_opinions {
            println!("  - {opinion}");
        }
    }

    Ok(())
}

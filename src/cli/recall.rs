use anyhow::{Context, Result};

use crate::config::MnemaConfig;
use crate::engine::MemoryEngine;
use crate::memory::parse_flexible_date;
use crate::memory::types::{FactType, RecallRequest};

/// Run a recall query from the terminal.
#[allow(clippy::too_many_arguments)]
pub async fn recall(
    config: &MnemaConfig,
    agent_id: &str,
    query: &str,
    types: Option<&str>,
    thinking_budget: Option<u32>,
    max_tokens: Option<usize>,
    reranker: Option<String>,
    question_date: Option<&str>,
    trace: bool,
) -> Result<()> {
    let fact_types = types.map(parse_fact_types).transpose()?.unwrap_or_default();
    let question_date = question_date
        .map(|s| {
            parse_flexible_date(s).with_context(|| format!("invalid question date: {s:?}"))
        })
        .transpose()?;

    let mut engine = MemoryEngine::new(config.clone()).await?;
    let response = engine
        .recall(
            agent_id,
            RecallRequest {
                query: query.to_string(),
                fact_types,
                thinking_budget,
                max_tokens,
                reranker,
                question_date,
                trace,
            },
        )
        .await?;
    engine.shutdown().await;

    if response.results.is_empty() {
        println!("No memories found.");
        return Ok(());
    }

    println!(
        "Found {} fact(s), showing {} (token estimate: ~{})\n",
        response.total_matched,
        response.results.len(),
        response.token_estimate
    );

    for (i, result) in response.results.iter().enumerate() {
        let date = result.event_date.as_deref().unwrap_or("-");
        println!(
            "  {}. [{}] (activation: {:.3}, event: {})",
            i + 1,
            result.fact_type.as_str(),
            result.activation,
            date
        );
        println!("     {}", result.text);
        if let Some(ref ctx) = result.context {
            println!("     context: {ctx}");
        }
        println!();
    }

    if let Some(trace) = response.trace {
        println!(
            "trace: {} seed(s), {} pooled, {} hop(s), {} ms",
            trace.seed_count, trace.pooled, trace.hops, trace.elapsed_ms
        );
    }

    Ok(())
}

/// Parse a comma-separated fact type filter ("world,opinion").
fn parse_fact_types(spec: &str) -> Result<Vec<FactType>> {
    spec.split(',')
        .map(|part| {
            part.trim()
                .parse::<FactType>()
                .map_err(|e| anyhow::anyhow!(e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_filter() {
        let types = parse_fact_types("world, opinion").unwrap();
        assert_eq!(types, vec![FactType::World, FactType::Opinion]);
        assert!(parse_fact_types("world,nonsense").is_err());
    }
}

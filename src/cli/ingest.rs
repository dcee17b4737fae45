use anyhow::{bail, Result};

use crate::config::MnemaConfig;
use crate::engine::MemoryEngine;
use crate::memory::types::IngestItem;

/// Ingest one or more content items for an agent.
///
/// With `--queue` the work goes through the operations ledger and a
/// background worker; the process still drains the queue before exiting.
#[allow(clippy::too_many_arguments)]
pub async fn ingest(
    config: &MnemaConfig,
    agent_id: &str,
    texts: Vec<String>,
    document: Option<String>,
    event_date: Option<String>,
    context: Option<String>,
    queue: bool,
) -> Result<()> {
    if texts.is_empty() {
        bail!("nothing to ingest: provide at least one text");
    }

    let items: Vec<IngestItem> = texts
        .into_iter()
        .map(|content| IngestItem {
            content,
            event_date: event_date.clone(),
            context: context.clone(),
        })
        .collect();

    let mut engine = MemoryEngine::new(config.clone()).await?;

    if queue {
        let operation_id = engine.ingest_queued(agent_id, items, document).await?;
        println!("Queued operation {operation_id}");
        println!("Waiting for background ingest to finish...");
        engine.shutdown().await;
        let op = engine.get_operation(&operation_id).await?;
        println!(
            "Operation {} done ({} item(s), document: {})",
            op.id,
            op.items_count,
            op.document_id.as_deref().unwrap_or("-")
        );
    } else {
        let report = engine.ingest(agent_id, items, document).await?;
        println!(
            "Ingested: {} fact(s), {} link(s), {} item(s) failed",
            report.facts_created, report.links_created, report.items_failed
        );
        if let Some(doc) = report.document_id {
            println!("Document: {doc}");
        }
        engine.shutdown().await;
    }

    Ok(())
}

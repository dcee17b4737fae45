mod helpers;

use std::sync::Arc;

use helpers::{at_cosine, unit, KeyedEmbedder, ScriptedChat};
use mnema::memory::facts::FactFilter;
use mnema::memory::types::IngestItem;

#[tokio::test]
async fn restating_a_fact_creates_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChat::repeating(&helpers::extraction(&[(
        "The sky is blue.",
        "world",
    )])));
    let embedder = Arc::new(KeyedEmbedder::new());
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    let first = engine
        .ingest("nova", vec![IngestItem::new("The sky is blue.")], None)
        .await
        .unwrap();
    assert_eq!(first.facts_created, 1);

    let second = engine
        .ingest("nova", vec![IngestItem::new("The sky is blue.")], None)
        .await
        .unwrap();
    assert_eq!(second.facts_created, 0);
    assert_eq!(second.links_created, 0);

    let stats = engine.stats(None).await.unwrap();
    assert_eq!(stats.total_facts, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn close_paraphrase_merges_into_the_stored_fact() {
    let dir = tempfile::TempDir::new().unwrap();
    let original = "The deadline moved to Friday.";
    let paraphrase = "The deadline is now Friday.";
    let first_extraction = helpers::extraction(&[(original, "world")]);
    let second_extraction = helpers::extraction(&[(paraphrase, "world")]);
    let chat = Arc::new(ScriptedChat::new(vec![
        Some(first_extraction.as_str()),
        Some(second_extraction.as_str()),
    ]));
    let embedder = Arc::new(
        KeyedEmbedder::new()
            .with(original, unit(&[(0, 1.0)]))
            .with(paraphrase, at_cosine(0.95)),
    );
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    engine
        .ingest("nova", vec![IngestItem::new(original)], None)
        .await
        .unwrap();
    let second = engine
        .ingest("nova", vec![IngestItem::new(paraphrase)], None)
        .await
        .unwrap();
    assert_eq!(second.facts_created, 0);

    let (facts, total) = engine
        .list_facts("nova", FactFilter::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    // The stored text survives; only its freshness changes.
    assert_eq!(facts[0].text, original);
    assert_ne!(facts[0].updated_at, facts[0].created_at);

    engine.shutdown().await;
}

#[tokio::test]
async fn related_facts_get_a_semantic_link() {
    let dir = tempfile::TempDir::new().unwrap();
    let first = "The team ships on Fridays.";
    let second = "Releases happen at the end of the week.";
    let first_extraction = helpers::extraction(&[(first, "world")]);
    let second_extraction = helpers::extraction(&[(second, "world")]);
    let chat = Arc::new(ScriptedChat::new(vec![
        Some(first_extraction.as_str()),
        Some(second_extraction.as_str()),
    ]));
    let embedder = Arc::new(
        KeyedEmbedder::new()
            .with(first, unit(&[(0, 1.0)]))
            .with(second, at_cosine(0.7)),
    );
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    engine
        .ingest("nova", vec![IngestItem::new(first)], None)
        .await
        .unwrap();
    let report = engine
        .ingest("nova", vec![IngestItem::new(second)], None)
        .await
        .unwrap();
    assert_eq!(report.facts_created, 1);
    assert_eq!(report.links_created, 1);

    let stats = engine.stats(None).await.unwrap();
    assert_eq!(stats.total_facts, 2);
    assert_eq!(stats.by_link_kind.get("semantic"), Some(&1));

    engine.shutdown().await;
}

#[tokio::test]
async fn distant_facts_stay_unlinked() {
    let dir = tempfile::TempDir::new().unwrap();
    let first = "The team ships on Fridays.";
    let second = "Basil wilts in cold weather.";
    let first_extraction = helpers::extraction(&[(first, "world")]);
    let second_extraction = helpers::extraction(&[(second, "world")]);
    let chat = Arc::new(ScriptedChat::new(vec![
        Some(first_extraction.as_str()),
        Some(second_extraction.as_str()),
    ]));
    let embedder = Arc::new(
        KeyedEmbedder::new()
            .with(first, unit(&[(0, 1.0)]))
            .with(second, at_cosine(0.3)),
    );
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    engine
        .ingest("nova", vec![IngestItem::new(first)], None)
        .await
        .unwrap();
    engine
        .ingest("nova", vec![IngestItem::new(second)], None)
        .await
        .unwrap();

    let stats = engine.stats(None).await.unwrap();
    assert_eq!(stats.total_facts, 2);
    assert_eq!(stats.links, 0);

    engine.shutdown().await;
}

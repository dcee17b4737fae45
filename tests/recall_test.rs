mod helpers;

use std::sync::Arc;

use helpers::{unit, KeyedEmbedder, ScriptedChat};
use mnema::memory::types::{FactType, IngestItem, RecallRequest};

#[tokio::test]
async fn empty_store_returns_no_results_without_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChat::repeating("[]"));
    let embedder = Arc::new(KeyedEmbedder::new());
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    let response = engine
        .recall(
            "nobody",
            RecallRequest {
                query: "anything at all".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(response.results.is_empty());
    assert_eq!(response.total_matched, 0);
    assert_eq!(response.token_estimate, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn unlinked_facts_come_back_in_cosine_order() {
    let dir = tempfile::TempDir::new().unwrap();
    let near = "The keynote is on Tuesday.";
    let mid = "Lunch is catered on demo day.";
    let far = "Parking validation is at the desk.";
    let query = "when is the keynote";

    let scripts: Vec<String> = [near, mid, far]
        .iter()
        .map(|t| helpers::extraction(&[(*t, "world")]))
        .collect();
    let chat = Arc::new(ScriptedChat::new(
        scripts.iter().map(|s| Some(s.as_str())).collect(),
    ));
    let embedder = Arc::new(
        KeyedEmbedder::new()
            .with(near, unit(&[(10, 1.0)]))
            .with(mid, unit(&[(20, 1.0)]))
            .with(far, unit(&[(30, 1.0)]))
            .with(query, unit(&[(10, 0.9), (20, 0.7), (30, 0.5)])),
    );
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    // One ingest call per fact so nothing links them.
    for text in [near, mid, far] {
        engine
            .ingest("nova", vec![IngestItem::new(text)], None)
            .await
            .unwrap();
    }

    let response = engine
        .recall(
            "nova",
            RecallRequest {
                query: query.into(),
                trace: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(response.total_matched, 3);
    let texts: Vec<&str> = response.results.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec![near, mid, far]);
    // With no links the graph adds nothing; activation is pure similarity.
    assert!(response.results[0].activation > response.results[1].activation);
    assert!(response.results[1].activation > response.results[2].activation);

    let trace = response.trace.unwrap();
    assert_eq!(trace.seed_count, 3);
    assert_eq!(trace.pooled, 3);

    engine.shutdown().await;
}

#[tokio::test]
async fn graph_surfaces_a_fact_the_query_misses() {
    let dir = tempfile::TempDir::new().unwrap();
    let anchor = "The Zurich office opened in April.";
    let satellite = "Badge printers live in the Zurich office basement.";
    let query = "when did the Zurich office open";

    let anchor_extraction = format!(
        r#"[{{"text": "{anchor}", "fact_type": "world",
             "entities": [{{"name": "Zurich office", "category": "place"}}]}}]"#
    );
    let satellite_extraction = format!(
        r#"[{{"text": "{satellite}", "fact_type": "world",
             "entities": [{{"name": "Zurich office", "category": "place"}}]}}]"#
    );

    let chat = Arc::new(ScriptedChat::new(vec![
        Some(anchor_extraction.as_str()),
        Some(satellite_extraction.as_str()),
    ]));
    // The satellite is orthogonal to the query; only the entity link can
    // bring it in.
    let embedder = Arc::new(
        KeyedEmbedder::new()
            .with(anchor, unit(&[(0, 1.0)]))
            .with(satellite, unit(&[(50, 1.0)]))
            .with(query, unit(&[(0, 1.0)])),
    );
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    engine
        .ingest("nova", vec![IngestItem::new(anchor)], None)
        .await
        .unwrap();
    let report = engine
        .ingest("nova", vec![IngestItem::new(satellite)], None)
        .await
        .unwrap();
    assert_eq!(report.links_created, 1);

    let response = engine
        .recall(
            "nova",
            RecallRequest {
                query: query.into(),
                trace: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].text, anchor);
    assert_eq!(response.results[1].text, satellite);
    // One hop over a full-weight link at decay 0.5.
    assert!((response.results[1].activation - 0.5).abs() < 1e-6);

    let trace = response.trace.unwrap();
    assert_eq!(trace.seed_count, 1);
    assert_eq!(trace.pooled, 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn token_budget_truncates_whole_facts_only() {
    let dir = tempfile::TempDir::new().unwrap();
    // 400 characters estimate to 100 tokens each.
    let t1 = "a".repeat(400);
    let t2 = "b".repeat(400);
    let t3 = "c".repeat(400);
    let query = "the long ones";

    let scripts: Vec<String> = [&t1, &t2, &t3]
        .iter()
        .map(|t| helpers::extraction(&[(t.as_str(), "world")]))
        .collect();
    let chat = Arc::new(ScriptedChat::new(
        scripts.iter().map(|s| Some(s.as_str())).collect(),
    ));
    let embedder = Arc::new(
        KeyedEmbedder::new()
            .with(&t1, unit(&[(10, 1.0)]))
            .with(&t2, unit(&[(20, 1.0)]))
            .with(&t3, unit(&[(30, 1.0)]))
            .with(query, unit(&[(10, 0.9), (20, 0.7), (30, 0.5)])),
    );
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    for text in [&t1, &t2, &t3] {
        engine
            .ingest("nova", vec![IngestItem::new(text.as_str())], None)
            .await
            .unwrap();
    }

    let response = engine
        .recall(
            "nova",
            RecallRequest {
                query: query.into(),
                max_tokens: Some(250),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // The third fact would overflow the budget; it is dropped whole.
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.token_estimate, 200);
    assert_eq!(response.total_matched, 3);

    engine.shutdown().await;
}

#[tokio::test]
async fn type_filter_restricts_results() {
    let dir = tempfile::TempDir::new().unwrap();
    let fact = "The office closes at six.";
    let opinion = "I think the office closes too early.";
    let query = "office hours";

    let fact_extraction = helpers::extraction(&[(fact, "world")]);
    let opinion_extraction = helpers::extraction(&[(opinion, "opinion")]);
    let chat = Arc::new(ScriptedChat::new(vec![
        Some(fact_extraction.as_str()),
        Some(opinion_extraction.as_str()),
    ]));
    let embedder = Arc::new(
        KeyedEmbedder::new()
            .with(fact, unit(&[(0, 1.0)]))
            .with(opinion, unit(&[(0, 0.5), (1, 0.5)]))
            .with(query, unit(&[(0, 1.0)])),
    );
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    engine
        .ingest("nova", vec![IngestItem::new(fact)], None)
        .await
        .unwrap();
    engine
        .ingest("nova", vec![IngestItem::new(opinion)], None)
        .await
        .unwrap();

    let response = engine
        .recall(
            "nova",
            RecallRequest {
                query: query.into(),
                fact_types: vec![FactType::World],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    assert!(response
        .results
        .iter()
        .all(|r| r.fact_type == FactType::World));

    engine.shutdown().await;
}

#[tokio::test]
async fn cross_encoder_mode_falls_back_without_a_scorer() {
    let dir = tempfile::TempDir::new().unwrap();
    let fact = "Tea lives on the top shelf.";
    let query = "where is the tea";

    let chat = Arc::new(ScriptedChat::repeating(&helpers::extraction(&[(
        fact, "world",
    )])));
    let embedder = Arc::new(
        KeyedEmbedder::new()
            .with(fact, unit(&[(0, 1.0)]))
            .with(query, unit(&[(0, 1.0)])),
    );
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    engine
        .ingest("nova", vec![IngestItem::new(fact)], None)
        .await
        .unwrap();

    // No pair scorer is wired in; the call still answers heuristically.
    let response = engine
        .recall(
            "nova",
            RecallRequest {
                query: query.into(),
                reranker: Some("cross_encoder".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn unknown_reranker_is_a_config_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChat::repeating("[]"));
    let embedder = Arc::new(KeyedEmbedder::new());
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    let err = engine
        .recall(
            "nova",
            RecallRequest {
                query: "anything".into(),
                reranker: Some("bm25".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, mnema::error::MemoryError::Config(_)));

    engine.shutdown().await;
}

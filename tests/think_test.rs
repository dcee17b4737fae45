mod helpers;

use std::sync::Arc;

use helpers::{unit, KeyedEmbedder, ScriptedChat};
use mnema::memory::types::{FactType, IngestItem, PersonalityTraits};
use mnema::model::ChatBackend;

#[tokio::test]
async fn think_grounds_the_answer_and_persists_new_opinions() {
    let dir = tempfile::TempDir::new().unwrap();
    let memory = "The rooftop garden gets full afternoon sun.";
    let question = "Where should the tomatoes go?";

    let fact_extraction = helpers::extraction(&[(memory, "world")]);
    let answer = r#"{"answer": "Put the tomatoes on the rooftop; it gets full afternoon sun.",
                     "new_opinions": ["The rooftop is the best growing spot we have."]}"#;
    let chat = Arc::new(ScriptedChat::new(vec![
        Some(fact_extraction.as_str()),
        Some(answer),
    ]));
    let embedder = Arc::new(
        KeyedEmbedder::new()
            .with(memory, unit(&[(0, 1.0)]))
            .with(question, unit(&[(0, 1.0)])),
    );
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    engine
        .ingest("nova", vec![IngestItem::new(memory)], None)
        .await
        .unwrap();

    let outcome = engine.think("nova", question, None, None).await.unwrap();

    assert!(outcome.text.contains("rooftop"));
    assert!(outcome.based_on.iter().any(|f| f.text == memory));
    assert_eq!(outcome.new_opinions.len(), 1);

    // The freshly formed opinion is now a stored fact.
    let stats = engine.stats(Some("nova")).await.unwrap();
    assert_eq!(stats.by_fact_type.get("opinion"), Some(&1));

    engine.shutdown().await;
}

#[tokio::test]
async fn think_creates_a_missing_agent() {
    let dir = tempfile::TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChat::repeating(
        r#"{"answer": "I have no memories to draw on yet.", "new_opinions": []}"#,
    ));
    let embedder = Arc::new(KeyedEmbedder::new());
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    let outcome = engine
        .think("newborn", "What do you believe?", None, None)
        .await
        .unwrap();
    assert!(!outcome.text.is_empty());
    assert!(outcome.based_on.is_empty());

    let agent = engine.get_agent("newborn").await.unwrap();
    assert_eq!(agent.id, "newborn");

    engine.shutdown().await;
}

#[tokio::test]
async fn bias_strength_changes_the_instruction_in_the_prompt() {
    let dir = tempfile::TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChat::repeating(
        r#"{"answer": "Noted.", "new_opinions": []}"#,
    ));
    let chat_backend: Arc<dyn ChatBackend> = chat.clone();
    let embedder = Arc::new(KeyedEmbedder::new());
    let mut engine = helpers::engine_with(&dir, chat_backend, embedder).await;

    let skeptic = PersonalityTraits {
        bias_strength: 0.0,
        ..Default::default()
    };
    let zealot = PersonalityTraits {
        bias_strength: 1.0,
        ..Default::default()
    };
    engine
        .create_agent("skeptic", Some(skeptic), None)
        .await
        .unwrap();
    engine
        .create_agent("zealot", Some(zealot), None)
        .await
        .unwrap();

    engine
        .think("skeptic", "Is the plan sound?", None, None)
        .await
        .unwrap();
    engine
        .think("zealot", "Is the plan sound?", None, None)
        .await
        .unwrap();

    let prompts = chat.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("Ignore your existing opinions entirely"));
    assert!(prompts[1].contains("Strongly defend your existing opinions"));

    engine.shutdown().await;
}

#[tokio::test]
async fn unparseable_think_response_falls_back_to_raw_text() {
    let dir = tempfile::TempDir::new().unwrap();
    let raw = "The plan seems fine to me, all things considered.";
    let chat = Arc::new(ScriptedChat::repeating(raw));
    let embedder = Arc::new(KeyedEmbedder::new());
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    let outcome = engine
        .think("nova", "Is the plan sound?", None, None)
        .await
        .unwrap();
    assert_eq!(outcome.text, raw);
    assert!(outcome.new_opinions.is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn chat_failure_surfaces_as_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let chat = Arc::new(ScriptedChat::new(vec![None]));
    let embedder = Arc::new(KeyedEmbedder::new());
    let mut engine = helpers::engine_with(&dir, chat, embedder).await;

    let err = engine
        .think("nova", "Anything?", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, mnema::error::MemoryError::Backend { .. }));

    engine.shutdown().await;
}

#[tokio::test]
async fn existing_opinions_reach_the_prompt() {
    let dir = tempfile::TempDir::new().unwrap();
    let opinion = "Meetings before ten are a mistake.";
    let question = "Should we move standup to nine?";

    let opinion_extraction = helpers::extraction(&[(opinion, "opinion")]);
    let answer = r#"{"answer": "Keep standup at ten.", "new_opinions": []}"#;
    let chat = Arc::new(ScriptedChat::new(vec![
        Some(opinion_extraction.as_str()),
        Some(answer),
    ]));
    let chat_backend: Arc<dyn ChatBackend> = chat.clone();
    let embedder = Arc::new(
        KeyedEmbedder::new()
            .with(opinion, unit(&[(0, 1.0)]))
            .with(question, unit(&[(0, 1.0)])),
    );
    let mut engine = helpers::engine_with(&dir, chat_backend, embedder).await;

    engine
        .ingest("nova", vec![IngestItem::new(opinion)], None)
        .await
        .unwrap();

    let outcome = engine.think("nova", question, None, None).await.unwrap();
    // The stored opinion grounds the answer alongside world facts.
    assert!(outcome
        .based_on
        .iter()
        .any(|f| f.fact_type == FactType::Opinion && f.text == opinion));

    let prompts = chat.prompts();
    let think_prompt = prompts.last().unwrap();
    assert!(think_prompt.contains(opinion));

    engine.shutdown().await;
}

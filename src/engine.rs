//! Engine wiring: one constructor that composes the connection pool, model
//! backends, ingestion pipeline, retriever, reasoner, and task queue, plus
//! thin delegating methods for every store operation.
//!
//! This is the seam an HTTP layer or the CLI calls; nothing below it knows
//! how the pieces were assembled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task;

use crate::config::{MnemaConfig, StorageConfig};
use crate::db::{self, Pool};
use crate::error::Result;
use crate::memory::agents;
use crate::memory::facts::{self, FactFilter};
use crate::memory::ingest::Ingestor;
use crate::memory::retrieve::Retriever;
use crate::memory::stats::{self, StatsResponse};
use crate::memory::think::Reasoner;
use crate::memory::types::{
    Agent, AsyncOperation, Document, Fact, IngestItem, IngestReport, PersonalityTraits,
    RecallRequest, RecallResponse, ThinkOutcome,
};
use crate::model::{self, ChatBackend, EmbeddingBackend};
use crate::tasks::TaskQueue;

/// Attempts made to open the store before giving up.
const OPEN_ATTEMPTS: u32 = 3;

pub struct MemoryEngine {
    pool: Pool,
    chat: Arc<dyn ChatBackend>,
    ingestor: Arc<Ingestor>,
    retriever: Arc<Retriever>,
    reasoner: Reasoner,
    tasks: TaskQueue,
    db_path: PathBuf,
}

impl MemoryEngine {
    /// Build the engine from config, constructing the real model backends.
    ///
    /// Requires the embedding model files on disk (`mnema model download`)
    /// and an OpenAI-compatible chat endpoint.
    pub async fn new(cfg: MnemaConfig) -> Result<Self> {
        let embedder = model::create_embedding_backend(&cfg.embedding)?;
        let chat = model::create_chat_backend(&cfg.chat)?;
        Self::with_backends(cfg, chat, embedder).await
    }

    /// Build the engine around caller-supplied backends. Used by tests and
    /// by embedders that bring their own model stack.
    pub async fn with_backends(
        cfg: MnemaConfig,
        chat: Arc<dyn ChatBackend>,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self> {
        let db_path = cfg.resolved_db_path();
        let pool = open_pool_with_retry(&cfg.storage, &db_path).await?;

        // Vectors written by a different model are not comparable; warn early.
        {
            let conn = pool.acquire().await?;
            let configured = cfg.embedding.model.clone();
            task::spawn_blocking(move || db::check_embedding_model(&conn, &configured)).await??;
        }

        let ingestor = Arc::new(Ingestor::new(
            pool.clone(),
            chat.clone(),
            embedder.clone(),
            cfg.ingestion.clone(),
        ));
        // No local cross-encoder model ships with the store; recall in
        // cross_encoder mode falls back to the heuristic with a warning.
        let retriever = Arc::new(Retriever::new(
            pool.clone(),
            embedder,
            None,
            cfg.retrieval.clone(),
        ));
        let reasoner = Reasoner::new(
            pool.clone(),
            chat.clone(),
            retriever.clone(),
            ingestor.clone(),
            cfg.retrieval.clone(),
        );
        let tasks = TaskQueue::start(pool.clone(), ingestor.clone(), &cfg.tasks);

        Ok(Self {
            pool,
            chat,
            ingestor,
            retriever,
            reasoner,
            tasks,
            db_path,
        })
    }

    // Ingestion

    pub async fn ingest(
        &self,
        agent_id: &str,
        items: Vec<IngestItem>,
        document_id: Option<String>,
    ) -> Result<IngestReport> {
        self.ingestor.ingest(agent_id, items, document_id).await
    }

    /// Queue the same work for a background worker; returns the operation id
    /// once the ledger row is durable.
    pub async fn ingest_queued(
        &self,
        agent_id: &str,
        items: Vec<IngestItem>,
        document_id: Option<String>,
    ) -> Result<String> {
        self.tasks
            .enqueue(agent_id, "ingest", items, document_id)
            .await
    }

    // Retrieval and reasoning

    pub async fn recall(&self, agent_id: &str, req: RecallRequest) -> Result<RecallResponse> {
        self.retriever.recall(agent_id, req).await
    }

    pub async fn think(
        &self,
        agent_id: &str,
        question: &str,
        context: Option<&str>,
        thinking_budget: Option<u32>,
    ) -> Result<ThinkOutcome> {
        self.reasoner
            .think(agent_id, question, context, thinking_budget)
            .await
    }

    // Agent profiles

    pub async fn create_agent(
        &self,
        agent_id: &str,
        traits: Option<PersonalityTraits>,
        background: Option<String>,
    ) -> Result<Agent> {
        let conn = self.pool.acquire().await?;
        let id = agent_id.to_string();
        task::spawn_blocking(move || {
            agents::create_agent(&conn, &id, traits.as_ref(), background.as_deref())
        })
        .await?
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent> {
        let conn = self.pool.acquire().await?;
        let id = agent_id.to_string();
        task::spawn_blocking(move || agents::get_agent(&conn, &id)).await?
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.pool.acquire().await?;
        task::spawn_blocking(move || agents::list_agents(&conn)).await?
    }

    pub async fn set_personality(
        &self,
        agent_id: &str,
        traits: PersonalityTraits,
    ) -> Result<Agent> {
        let conn = self.pool.acquire().await?;
        let id = agent_id.to_string();
        task::spawn_blocking(move || {
            agents::update_personality(&conn, &id, &traits)?;
            agents::get_agent(&conn, &id)
        })
        .await?
    }

    /// Append to the agent's background. With `infer_traits` set, one chat
    /// call re-derives the personality from the merged background; a
    /// response that cannot be parsed leaves the traits untouched.
    pub async fn add_background(
        &self,
        agent_id: &str,
        content: &str,
        infer_traits: bool,
    ) -> Result<Agent> {
        let merged = {
            let conn = self.pool.acquire().await?;
            let id = agent_id.to_string();
            let content = content.to_string();
            task::spawn_blocking(move || agents::append_background(&conn, &id, &content)).await??
        };

        if infer_traits {
            let prompt = agents::build_infer_traits_prompt(&merged);
            let response = self.chat.complete(None, &prompt).await?;
            match agents::parse_traits_response(&response) {
                Some(traits) => {
                    let conn = self.pool.acquire().await?;
                    let id = agent_id.to_string();
                    task::spawn_blocking(move || agents::update_personality(&conn, &id, &traits))
                        .await??;
                }
                None => {
                    tracing::warn!(agent = agent_id, "trait inference unparseable, keeping traits");
                }
            }
        }

        self.get_agent(agent_id).await
    }

    // Facts and documents

    pub async fn get_fact(&self, agent_id: &str, fact_id: &str) -> Result<Fact> {
        let conn = self.pool.acquire().await?;
        let agent = agent_id.to_string();
        let id = fact_id.to_string();
        task::spawn_blocking(move || facts::get_fact(&conn, &agent, &id)).await?
    }

    pub async fn list_facts(
        &self,
        agent_id: &str,
        filter: FactFilter,
    ) -> Result<(Vec<Fact>, u32)> {
        let conn = self.pool.acquire().await?;
        let agent = agent_id.to_string();
        task::spawn_blocking(move || facts::list_facts(&conn, &agent, &filter)).await?
    }

    pub async fn delete_fact(&self, agent_id: &str, fact_id: &str) -> Result<()> {
        let conn = self.pool.acquire().await?;
        let agent = agent_id.to_string();
        let id = fact_id.to_string();
        task::spawn_blocking(move || {
            let mut conn = conn;
            facts::delete_fact(&mut conn, &agent, &id)
        })
        .await?
    }

    pub async fn get_document(&self, agent_id: &str, document_id: &str) -> Result<Document> {
        let conn = self.pool.acquire().await?;
        let agent = agent_id.to_string();
        let id = document_id.to_string();
        task::spawn_blocking(move || facts::get_document(&conn, &agent, &id)).await?
    }

    pub async fn list_documents(
        &self,
        agent_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Document>> {
        let conn = self.pool.acquire().await?;
        let agent = agent_id.to_string();
        task::spawn_blocking(move || facts::list_documents(&conn, &agent, limit, offset)).await?
    }

    // Operations ledger and stats

    pub async fn get_operation(&self, operation_id: &str) -> Result<AsyncOperation> {
        self.tasks.get_operation(operation_id).await
    }

    pub async fn list_operations(&self, agent_id: &str, limit: u32) -> Result<Vec<AsyncOperation>> {
        self.tasks.list_operations(agent_id, limit).await
    }

    pub async fn stats(&self, agent: Option<&str>) -> Result<StatsResponse> {
        let conn = self.pool.acquire().await?;
        let agent = agent.map(str::to_string);
        let path = self.db_path.clone();
        task::spawn_blocking(move || stats::store_stats(&conn, agent.as_deref(), Some(&path)))
            .await?
    }

    /// Drain queued background work and stop the workers.
    pub async fn shutdown(&mut self) {
        self.tasks.shutdown().await;
    }
}

/// Open the pool, retrying transient store failures with a short backoff.
async fn open_pool_with_retry(storage: &StorageConfig, db_path: &Path) -> Result<Pool> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let path = db_path.to_path_buf();
        let (min, max) = (storage.pool_min_size, storage.pool_max_size);
        match task::spawn_blocking(move || Pool::open(path, min, max)).await? {
            Ok(pool) => return Ok(pool),
            Err(e) if e.is_retryable() && attempt < OPEN_ATTEMPTS => {
                tracing::warn!(attempt, "store open failed, retrying: {e}");
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;
    use crate::model::EMBEDDING_DIM;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct ScriptedChat {
        responses: StdMutex<VecDeque<String>>,
    }

    impl ScriptedChat {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: StdMutex::new(responses.into_iter().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedChat {
        async fn complete(&self, _system: Option<&str>, _prompt: &str) -> Result<String> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(MemoryError::Backend {
                    detail: "script exhausted".into(),
                })
        }
    }

    struct HashEmbedder;

    impl EmbeddingBackend for HashEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0f32; EMBEDDING_DIM];
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in text.as_bytes() {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(0x100000001b3);
            }
            for i in 0..4 {
                let axis = ((hash >> (i * 16)) as usize) % EMBEDDING_DIM;
                v[axis] += 1.0;
            }
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            for x in &mut v {
                *x /= norm;
            }
            Ok(v)
        }
    }

    fn test_config(dir: &tempfile::TempDir) -> MnemaConfig {
        let mut cfg = MnemaConfig::default();
        cfg.storage.db_path = dir.path().join("mem.db").to_string_lossy().into_owned();
        cfg
    }

    async fn engine_with_chat(dir: &tempfile::TempDir, chat: ScriptedChat) -> MemoryEngine {
        MemoryEngine::with_backends(test_config(dir), Arc::new(chat), Arc::new(HashEmbedder))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ingest_then_recall_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_chat(
            &dir,
            ScriptedChat::new(vec![
                r#"[{"text": "Saturn has visible rings.", "fact_type": "world", "event_date": null, "entities": []}]"#,
            ]),
        )
        .await;

        let report = engine
            .ingest("nova", vec![IngestItem::new("Saturn has visible rings.")], None)
            .await
            .unwrap();
        assert_eq!(report.facts_created, 1);

        let response = engine
            .recall(
                "nova",
                RecallRequest {
                    query: "Saturn has visible rings.".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].text, "Saturn has visible rings.");
    }

    #[tokio::test]
    async fn background_merge_can_reinfer_traits() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_chat(
            &dir,
            ScriptedChat::new(vec![
                r#"{"openness": 0.9, "conscientiousness": 0.2, "extraversion": 0.5,
                    "agreeableness": 0.5, "neuroticism": 0.5, "bias_strength": 0.7}"#,
            ]),
        )
        .await;

        engine.create_agent("nova", None, None).await.unwrap();
        let agent = engine
            .add_background("nova", "Grew up exploring caves.", true)
            .await
            .unwrap();
        assert!(agent.background.contains("exploring caves"));
        assert!((agent.traits.openness - 0.9).abs() < 1e-9);
        assert!((agent.traits.bias_strength - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn background_merge_without_inference_keeps_traits() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_chat(&dir, ScriptedChat::new(vec![])).await;

        engine.create_agent("nova", None, None).await.unwrap();
        let agent = engine
            .add_background("nova", "Quiet childhood.", false)
            .await
            .unwrap();
        assert_eq!(agent.traits, PersonalityTraits::default());
        assert_eq!(agent.background, "Quiet childhood.");
    }

    #[tokio::test]
    async fn unparseable_trait_inference_keeps_traits() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_chat(
            &dir,
            ScriptedChat::new(vec!["cannot answer that, sorry"]),
        )
        .await;

        engine.create_agent("nova", None, None).await.unwrap();
        let agent = engine
            .add_background("nova", "Unknowable past.", true)
            .await
            .unwrap();
        assert_eq!(agent.traits, PersonalityTraits::default());
    }

    #[tokio::test]
    async fn stats_reflect_engine_writes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_chat(
            &dir,
            ScriptedChat::new(vec![
                r#"[{"text": "Comets have tails.", "fact_type": "world", "event_date": null, "entities": []}]"#,
            ]),
        )
        .await;

        engine
            .ingest("nova", vec![IngestItem::new("Comets have tails.")], None)
            .await
            .unwrap();

        let stats = engine.stats(Some("nova")).await.unwrap();
        assert_eq!(stats.total_facts, 1);
        assert_eq!(stats.by_fact_type["world"], 1);
        assert!(stats.db_size_bytes > 0);
    }

    #[tokio::test]
    async fn unknown_agent_profile_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_chat(&dir, ScriptedChat::new(vec![])).await;
        let err = engine.get_agent("ghost").await.unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { kind: "agent", .. }));
    }
}

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use tempfile::TempDir;

use mnema::config::MnemaConfig;
use mnema::db;
use mnema::engine::MemoryEngine;
use mnema::error::{MemoryError, Result};
use mnema::model::{ChatBackend, EmbeddingBackend, EMBEDDING_DIM};

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::load_sqlite_vec();
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();
    db::migrations::run_migrations(&conn).unwrap();
    conn
}

/// Config pointing at a database file inside `dir`.
pub fn test_config(dir: &TempDir) -> MnemaConfig {
    let mut cfg = MnemaConfig::default();
    cfg.storage.db_path = dir.path().join("mem.db").to_string_lossy().into_owned();
    cfg
}

/// Build an engine over scripted backends.
pub async fn engine_with(
    dir: &TempDir,
    chat: Arc<dyn ChatBackend>,
    embedder: Arc<dyn EmbeddingBackend>,
) -> MemoryEngine {
    MemoryEngine::with_backends(test_config(dir), chat, embedder)
        .await
        .unwrap()
}

/// Normalized vector with spikes at the given `(axis, value)` pairs.
pub fn unit(weights: &[(usize, f32)]) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    for &(axis, value) in weights {
        v[axis % EMBEDDING_DIM] += value;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Unit vector at cosine `cos` to the axis-0 unit vector.
pub fn at_cosine(cos: f32) -> Vec<f32> {
    unit(&[(0, cos), (1, (1.0 - cos * cos).max(0.0).sqrt())])
}

/// Embedder that returns registered vectors for known texts and a
/// deterministic hash-derived vector for everything else.
pub struct KeyedEmbedder {
    map: HashMap<String, Vec<f32>>,
}

impl KeyedEmbedder {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.map.insert(text.to_string(), vector);
        self
    }
}

impl EmbeddingBackend for KeyedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(v) = self.map.get(text) {
            return Ok(v.clone());
        }
        Ok(hash_vector(text))
    }
}

/// Spread four hash-derived spikes over the space and normalize. Distinct
/// texts land essentially orthogonal to each other.
pub fn hash_vector(text: &str) -> Vec<f32> {
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
    v
}

/// Chat backend that replays a script. `None` entries fail the call; when
/// the script runs out, the fallback (if any) repeats forever. Every prompt
/// received is recorded for inspection.
pub struct ScriptedChat {
    queue: Mutex<VecDeque<Option<String>>>,
    fallback: Option<String>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedChat {
    pub fn new(responses: Vec<Option<&str>>) -> Self {
        Self {
            queue: Mutex::new(
                responses
                    .into_iter()
                    .map(|r| r.map(String::from))
                    .collect(),
            ),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same response.
    pub fn repeating(response: &str) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Some(response.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn complete(&self, _system: Option<&str>, prompt: &str) -> Result<String> {
        self.seen.lock().unwrap().push(prompt.to_string());
        match self.queue.lock().unwrap().pop_front() {
            Some(Some(response)) => Ok(response),
            Some(None) => Err(MemoryError::Backend {
                detail: "scripted failure".into(),
            }),
            None => self.fallback.clone().ok_or(MemoryError::Backend {
                detail: "chat script exhausted".into(),
            }),
        }
    }
}

/// Build an extraction response from `(text, fact_type)` pairs, no entities
/// or dates.
pub fn extraction(facts: &[(&str, &str)]) -> String {
    let array: Vec<serde_json::Value> = facts
        .iter()
        .map(|(text, fact_type)| {
            serde_json::json!({
                "text": text,
                "fact_type": fact_type,
                "event_date": null,
                "entities": []
            })
        })
        .collect();
    serde_json::Value::Array(array).to_string()
}

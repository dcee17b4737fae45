//! Long-term memory for AI agents — facts extracted by an LLM, linked into a
//! typed graph, and recalled by spreading activation.
//!
//! Content submitted for an agent is broken into standalone facts (chat-model
//! extraction), embedded, deduplicated against what the agent already knows,
//! and woven into a link graph:
//!
//! | Link kind | Connects facts that... | Weight |
//! |-----------|------------------------|--------|
//! | **temporal** | happened near each other in time | linear falloff over the window |
//! | **semantic** | say similar things | cosine similarity |
//! | **entity** | mention the same people/places/things | entity overlap (Jaccard) |
//!
//! Recall seeds the graph with the nearest vectors to the query and spreads
//! activation along links, so facts with no direct textual similarity can
//! still surface through their neighbors. A reasoner layers the agent's
//! personality and opinion bias on top to answer questions in character.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for vector KNN; WAL mode behind a small async connection pool
//! - **Embeddings**: Local ONNX Runtime with bge-small-en-v1.5 (384 dimensions)
//! - **Chat**: any OpenAI-compatible completions API (extraction, trait
//!   inference, reasoning)
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite initialization, schema, migrations, and the connection pool
//! - [`engine`] — [`engine::MemoryEngine`], the facade composing every service
//! - [`memory`] — Ingestion, dedup, links, retrieval, reranking, reasoning
//! - [`model`] — Chat/embedding/scoring backend traits and implementations
//! - [`tasks`] — Background worker pool with a write-once operations ledger

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod memory;
pub mod model;
pub mod tasks;

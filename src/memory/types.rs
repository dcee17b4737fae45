//! Core domain type definitions.
//!
//! Defines [`FactType`] (the three fact categories), [`LinkKind`] (graph edge
//! kinds), the persisted records ([`Agent`], [`Document`], [`Fact`], [`Link`],
//! [`AsyncOperation`]), and the ingest/recall/think request and response
//! shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three fact categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    /// Statements about the world, other people, and events.
    World,
    /// Identity facts about the owning agent itself.
    Agent,
    /// Opinions the agent has formed; fed back into later reasoning.
    Opinion,
}

impl FactType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::World => "world",
            Self::Agent => "agent",
            Self::Opinion => "opinion",
        }
    }

    /// All fact types, in stable order.
    pub fn all() -> [FactType; 3] {
        [Self::World, Self::Agent, Self::Opinion]
    }
}

impl std::fmt::Display for FactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "world" => Ok(Self::World),
            "agent" => Ok(Self::Agent),
            "opinion" => Ok(Self::Opinion),
            _ => Err(format!("unknown fact type: {s}")),
        }
    }
}

/// The three link kinds. A pair of facts may carry one link per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Both facts dated within the temporal window of each other.
    Temporal,
    /// Embedding similarity in the related band, below the dedup threshold.
    Semantic,
    /// Shared named entities.
    Entity,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Semantic => "semantic",
            Self::Entity => "entity",
        }
    }
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temporal" => Ok(Self::Temporal),
            "semantic" => Ok(Self::Semantic),
            "entity" => Ok(Self::Entity),
            _ => Err(format!("unknown link kind: {s}")),
        }
    }
}

/// Big Five personality traits plus opinion bias, all in `[0.0, 1.0]`.
///
/// The five traits only flavor prompt framing; `bias_strength` is the one
/// value with mechanical effect, scaling how strongly prior opinions skew
/// reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonalityTraits {
    pub openness: f64,
    pub conscientiousness: f64,
    pub extraversion: f64,
    pub agreeableness: f64,
    pub neuroticism: f64,
    pub bias_strength: f64,
}

impl Default for PersonalityTraits {
    fn default() -> Self {
        Self {
            openness: 0.5,
            conscientiousness: 0.5,
            extraversion: 0.5,
            agreeableness: 0.5,
            neuroticism: 0.5,
            bias_strength: 0.5,
        }
    }
}

impl PersonalityTraits {
    /// True when every value sits inside `[0.0, 1.0]`.
    pub fn is_valid(&self) -> bool {
        [
            self.openness,
            self.conscientiousness,
            self.extraversion,
            self.agreeableness,
            self.neuroticism,
            self.bias_strength,
        ]
        .iter()
        .all(|v| (0.0..=1.0).contains(v))
    }
}

/// An agent profile, matching the `agents` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Caller-supplied identifier.
    pub id: String,
    #[serde(flatten)]
    pub traits: PersonalityTraits,
    /// Free-text background, merged over time.
    pub background: String,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 last-modification timestamp.
    pub updated_at: String,
}

/// A source document, matching the `documents` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Caller-supplied identifier, unique per agent.
    pub id: String,
    pub agent_id: String,
    pub original_text: String,
    /// FNV-1a hash of the original text, hex-encoded.
    pub content_hash: String,
    /// Count of live facts referencing this document.
    pub fact_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// A named entity mentioned by a fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub name: String,
    pub category: String,
}

/// A fact record, matching the `facts` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub agent_id: String,
    /// Owning document, if this fact came from a document upsert.
    pub document_id: Option<String>,
    pub fact_type: FactType,
    /// The fact as a standalone statement.
    pub text: String,
    /// Free-text situational context supplied at ingestion.
    pub context: Option<String>,
    /// ISO 8601 date the fact is about, when it is tied to one.
    pub event_date: Option<String>,
    /// Entities mentioned by the fact.
    pub entities: Vec<EntityRef>,
    pub created_at: String,
    pub updated_at: String,
}

/// A graph edge between two facts of the same agent.
///
/// `(src_id, dst_id)` is canonically ordered (`src_id < dst_id`); traversal
/// treats the edge as undirected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub agent_id: String,
    pub src_id: String,
    pub dst_id: String,
    pub kind: LinkKind,
    /// Edge weight in `(0.0, 1.0]`.
    pub weight: f64,
    pub created_at: String,
}

/// One ledger row per queued background task. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncOperation {
    pub id: String,
    pub agent_id: String,
    pub task_type: String,
    pub items_count: u32,
    pub document_id: Option<String>,
    pub created_at: String,
}

/// One unit of content handed to ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestItem {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl IngestItem {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            event_date: None,
            context: None,
        }
    }
}

/// Outcome of one ingestion batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Items submitted in the batch.
    pub items_count: u32,
    pub facts_created: u32,
    pub links_created: u32,
    /// Items whose extraction or embedding failed even after the retry.
    pub items_failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// Parameters for a recall call. Unset fields fall back to config defaults.
#[derive(Debug, Clone, Default)]
pub struct RecallRequest {
    pub query: String,
    /// Restrict results to these fact types; empty means all.
    pub fact_types: Vec<FactType>,
    pub thinking_budget: Option<u32>,
    pub max_tokens: Option<usize>,
    pub reranker: Option<String>,
    /// Reference date for temporal queries; query text wins over this.
    pub question_date: Option<DateTime<Utc>>,
    pub trace: bool,
}

/// A single recalled fact with its final activation.
#[derive(Debug, Clone, Serialize)]
pub struct RecallResult {
    pub id: String,
    pub text: String,
    pub fact_type: FactType,
    pub activation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_date: Option<String>,
}

/// Observational per-call retrieval diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RecallTrace {
    pub query: String,
    pub seed_count: usize,
    /// Facts holding any activation after the spread.
    pub pooled: usize,
    pub hops: usize,
    pub result_count: usize,
    pub elapsed_ms: u64,
}

/// Full recall response.
#[derive(Debug, Serialize)]
pub struct RecallResponse {
    pub results: Vec<RecallResult>,
    /// Candidates that matched before the token budget was applied.
    pub total_matched: usize,
    pub token_estimate: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<RecallTrace>,
}

/// A fact the reasoner grounded its answer on.
#[derive(Debug, Clone, Serialize)]
pub struct ThinkFact {
    pub id: String,
    pub text: String,
    pub fact_type: FactType,
    pub activation: f64,
}

/// Outcome of a think call.
#[derive(Debug, Serialize)]
pub struct ThinkOutcome {
    pub text: String,
    pub based_on: Vec<ThinkFact>,
    /// Newly formed opinions, already persisted as opinion facts.
    pub new_opinions: Vec<String>,
}

//! The reasoner: answers a question as the agent, through its memories and
//! personality.
//!
//! A think call gathers three strands — identity facts, relevant world
//! facts, existing opinions — and folds them into one chat prompt. The
//! agent's `bias_strength` controls how hard the prompt instructs the model
//! to defend existing opinions. Opinions the model forms while answering are
//! fed back through the ingestion pipeline as `opinion` facts.

use std::sync::Arc;

use serde::Deserialize;
use tokio::task;

use crate::config::RetrievalConfig;
use crate::db::Pool;
use crate::error::Result;
use crate::memory::agents;
use crate::memory::facts::{self, FactFilter};
use crate::memory::ingest::Ingestor;
use crate::memory::retrieve::{ActivatedFact, Retriever};
use crate::memory::types::{Agent, FactType, PersonalityTraits, ThinkFact, ThinkOutcome};
use crate::model::ChatBackend;

/// Identity facts included in the prompt.
const IDENTITY_LIMIT: u32 = 10;
/// Relevant world facts included in the prompt.
const WORLD_LIMIT: usize = 15;
/// Existing opinions included in the prompt.
const OPINION_LIMIT: usize = 10;
/// Facts reported in `based_on`.
const BASED_ON_LIMIT: usize = 12;

pub struct Reasoner {
    pool: Pool,
    chat: Arc<dyn ChatBackend>,
    retriever: Arc<Retriever>,
    ingestor: Arc<Ingestor>,
    cfg: RetrievalConfig,
}

impl Reasoner {
    pub fn new(
        pool: Pool,
        chat: Arc<dyn ChatBackend>,
        retriever: Arc<Retriever>,
        ingestor: Arc<Ingestor>,
        cfg: RetrievalConfig,
    ) -> Self {
        Self {
            pool,
            chat,
            retriever,
            ingestor,
            cfg,
        }
    }

    pub async fn think(
        &self,
        agent_id: &str,
        question: &str,
        context: Option<&str>,
        thinking_budget: Option<u32>,
    ) -> Result<ThinkOutcome> {
        let budget = thinking_budget.unwrap_or(self.cfg.think_thinking_budget);

        let (agent, identity) = self.load_profile(agent_id).await?;
        let world = self
            .retriever
            .activated(agent_id, question, vec![FactType::World], budget)
            .await?;
        let opinions = self
            .retriever
            .activated(agent_id, question, vec![FactType::Opinion], budget)
            .await?;

        let prompt = build_think_prompt(
            &agent,
            &identity,
            &world[..world.len().min(WORLD_LIMIT)],
            &opinions[..opinions.len().min(OPINION_LIMIT)],
            question,
            context,
        );
        let system = format!(
            "You are {}, answering from your own memories and convictions.",
            agent.id
        );
        let response = self.chat.complete(Some(&system), &prompt).await?;
        let parsed = parse_think_response(&response);

        if !parsed.new_opinions.is_empty() {
            if let Err(e) = self
                .ingestor
                .ingest_opinions(agent_id, parsed.new_opinions.clone())
                .await
            {
                tracing::warn!(agent = agent_id, "failed to persist new opinions: {e}");
            }
        }

        let mut based_on: Vec<ThinkFact> = world
            .into_iter()
            .chain(opinions)
            .map(|a| ThinkFact {
                id: a.fact.id,
                text: a.fact.text,
                fact_type: a.fact.fact_type,
                activation: a.activation,
            })
            .collect();
        based_on.sort_by(|a, b| {
            b.activation
                .partial_cmp(&a.activation)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        based_on.truncate(BASED_ON_LIMIT);

        Ok(ThinkOutcome {
            text: parsed.answer,
            based_on,
            new_opinions: parsed.new_opinions,
        })
    }

    /// Agent profile plus its most recent identity facts. Creates the agent
    /// on first reference.
    async fn load_profile(&self, agent_id: &str) -> Result<(Agent, Vec<String>)> {
        let conn = self.pool.acquire().await?;
        let agent_id = agent_id.to_string();
        task::spawn_blocking(move || {
            agents::ensure_agent(&conn, &agent_id)?;
            let agent = agents::get_agent(&conn, &agent_id)?;
            let (identity, _) = facts::list_facts(
                &conn,
                &agent_id,
                &FactFilter {
                    fact_type: Some(FactType::Agent),
                    limit: IDENTITY_LIMIT,
                    ..Default::default()
                },
            )?;
            Ok((agent, identity.into_iter().map(|f| f.text).collect()))
        })
        .await?
    }
}

/// Render personality traits as prose for the prompt. Traits near the
/// midpoint are left unmentioned.
fn describe_personality(traits: &PersonalityTraits) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut pick = |value: f64, low: &'static str, high: &'static str| {
        if value < 0.35 {
            parts.push(low);
        } else if value > 0.65 {
            parts.push(high);
        }
    };
    pick(
        traits.openness,
        "conventional and wary of novelty",
        "curious and open to new ideas",
    );
    pick(
        traits.conscientiousness,
        "spontaneous and improvisational",
        "methodical and thorough",
    );
    pick(
        traits.extraversion,
        "reserved and quiet",
        "outgoing and energetic",
    );
    pick(
        traits.agreeableness,
        "blunt and skeptical",
        "warm and cooperative",
    );
    pick(
        traits.neuroticism,
        "calm and unflappable",
        "anxious and sensitive to risk",
    );

    if parts.is_empty() {
        "You have an even, unremarkable temperament.".to_string()
    } else {
        format!("You are {}.", parts.join(", "))
    }
}

/// Map bias strength to an instruction about existing opinions.
fn bias_instruction(bias_strength: f64) -> &'static str {
    if bias_strength < 0.05 {
        "Ignore your existing opinions entirely; weigh only the evidence."
    } else if bias_strength < 0.35 {
        "Let your existing opinions color the answer only slightly."
    } else if bias_strength < 0.65 {
        "Lean on your existing opinions where they apply."
    } else if bias_strength < 0.95 {
        "Defend your existing opinions unless the evidence against them is overwhelming."
    } else {
        "Strongly defend your existing opinions, even against contrary evidence."
    }
}

fn bullet_list(lines: &[String]) -> String {
    if lines.is_empty() {
        "(none)".to_string()
    } else {
        lines
            .iter()
            .map(|l| format!("- {l}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn build_think_prompt(
    agent: &Agent,
    identity: &[String],
    world: &[ActivatedFact],
    opinions: &[ActivatedFact],
    question: &str,
    context: Option<&str>,
) -> String {
    let world_lines: Vec<String> = world.iter().map(|a| a.fact.text.clone()).collect();
    let opinion_lines: Vec<String> = opinions.iter().map(|a| a.fact.text.clone()).collect();

    let mut prompt = String::new();
    prompt.push_str(&describe_personality(&agent.traits));
    prompt.push('\n');
    if !agent.background.is_empty() {
        prompt.push_str("\nBackground:\n");
        prompt.push_str(&agent.background);
        prompt.push('\n');
    }
    prompt.push_str("\nWhat you know about yourself:\n");
    prompt.push_str(&bullet_list(identity));
    prompt.push_str("\n\nWhat you remember that seems relevant:\n");
    prompt.push_str(&bullet_list(&world_lines));
    prompt.push_str("\n\nOpinions you already hold:\n");
    prompt.push_str(&bullet_list(&opinion_lines));
    prompt.push_str("\n\n");
    prompt.push_str(bias_instruction(agent.traits.bias_strength));
    prompt.push('\n');
    if let Some(ctx) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\nSituation: ");
        prompt.push_str(ctx.trim());
        prompt.push('\n');
    }
    prompt.push_str("\nQuestion: ");
    prompt.push_str(question);
    prompt.push_str(
        "\n\nAnswer in your own voice. If answering forms any new opinion, list it. \
         Output a single JSON object only:\n\
         {\"answer\": \"...\", \"new_opinions\": [\"...\"]}",
    );
    prompt
}

#[derive(Debug, Deserialize)]
struct ParsedThink {
    #[serde(default)]
    answer: String,
    #[serde(default)]
    new_opinions: Vec<String>,
}

/// Parse the model's think response; falls back to the raw text as the
/// answer when no JSON object can be recovered.
fn parse_think_response(response: &str) -> ParsedThink {
    let trimmed = response.trim();
    let cleaned = if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    };

    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if end > start {
            if let Ok(parsed) = serde_json::from_str::<ParsedThink>(&cleaned[start..=end]) {
                if !parsed.answer.is_empty() {
                    return ParsedThink {
                        answer: parsed.answer,
                        new_opinions: parsed
                            .new_opinions
                            .into_iter()
                            .map(|o| o.trim().to_string())
                            .filter(|o| !o.is_empty())
                            .collect(),
                    };
                }
            }
        }
    }

    tracing::warn!("think response was not valid JSON, using raw text");
    ParsedThink {
        answer: cleaned.to_string(),
        new_opinions: Vec::new(),
    }
}

//! Agent profile storage — creation, personality updates, background merge.
//!
//! Agents are created explicitly or on first reference from ingestion and
//! reasoning, starting with a neutral personality (all traits 0.5). The five
//! Big Five traits and `bias_strength` can be replaced wholesale, or inferred
//! from the merged background text by a chat backend call.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use crate::error::{MemoryError, Result};
use crate::memory::types::{Agent, PersonalityTraits};

/// Prompt for deriving personality traits from an agent's background text.
pub const INFER_TRAITS_PROMPT: &str = r#"Given the following character background, rate the character on the Big Five personality traits and on bias strength (how strongly they cling to formed opinions). Each value must be a number between 0.0 and 1.0.

Background:
{background}

Output a single JSON object only, no explanation:
{"openness": 0.5, "conscientiousness": 0.5, "extraversion": 0.5, "agreeableness": 0.5, "neuroticism": 0.5, "bias_strength": 0.5}"#;

/// Insert the agent with a neutral profile if it does not exist yet.
pub fn ensure_agent(conn: &Connection, agent_id: &str) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO agents (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
        params![agent_id, now],
    )?;
    Ok(())
}

/// Create or update an agent profile.
///
/// Missing traits leave the stored (or default) values untouched; a provided
/// background replaces the stored one.
pub fn create_agent(
    conn: &Connection,
    agent_id: &str,
    traits: Option<&PersonalityTraits>,
    background: Option<&str>,
) -> Result<Agent> {
    if let Some(t) = traits {
        if !t.is_valid() {
            return Err(MemoryError::Config(
                "personality traits must be within [0, 1]".into(),
            ));
        }
    }

    ensure_agent(conn, agent_id)?;
    let now = chrono::Utc::now().to_rfc3339();

    if let Some(t) = traits {
        conn.execute(
            "UPDATE agents SET openness = ?1, conscientiousness = ?2, extraversion = ?3, \
             agreeableness = ?4, neuroticism = ?5, bias_strength = ?6, updated_at = ?7 \
             WHERE id = ?8",
            params![
                t.openness,
                t.conscientiousness,
                t.extraversion,
                t.agreeableness,
                t.neuroticism,
                t.bias_strength,
                now,
                agent_id,
            ],
        )?;
    }
    if let Some(bg) = background {
        conn.execute(
            "UPDATE agents SET background = ?1, updated_at = ?2 WHERE id = ?3",
            params![bg, now, agent_id],
        )?;
    }

    get_agent(conn, agent_id)
}

/// Fetch an agent profile by id.
pub fn get_agent(conn: &Connection, agent_id: &str) -> Result<Agent> {
    conn.query_row(
        "SELECT id, openness, conscientiousness, extraversion, agreeableness, neuroticism, \
         bias_strength, background, created_at, updated_at FROM agents WHERE id = ?1",
        params![agent_id],
        row_to_agent,
    )
    .optional()?
    .ok_or_else(|| MemoryError::NotFound {
        kind: "agent",
        id: agent_id.to_string(),
    })
}

/// List all agent profiles, most recently updated first.
pub fn list_agents(conn: &Connection) -> Result<Vec<Agent>> {
    let mut stmt = conn.prepare(
        "SELECT id, openness, conscientiousness, extraversion, agreeableness, neuroticism, \
         bias_strength, background, created_at, updated_at FROM agents ORDER BY updated_at DESC",
    )?;
    let agents = stmt
        .query_map([], row_to_agent)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(agents)
}

/// Replace all six trait values for an existing agent.
pub fn update_personality(
    conn: &Connection,
    agent_id: &str,
    traits: &PersonalityTraits,
) -> Result<()> {
    if !traits.is_valid() {
        return Err(MemoryError::Config(
            "personality traits must be within [0, 1]".into(),
        ));
    }
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE agents SET openness = ?1, conscientiousness = ?2, extraversion = ?3, \
         agreeableness = ?4, neuroticism = ?5, bias_strength = ?6, updated_at = ?7 WHERE id = ?8",
        params![
            traits.openness,
            traits.conscientiousness,
            traits.extraversion,
            traits.agreeableness,
            traits.neuroticism,
            traits.bias_strength,
            now,
            agent_id,
        ],
    )?;
    if rows == 0 {
        return Err(MemoryError::NotFound {
            kind: "agent",
            id: agent_id.to_string(),
        });
    }
    Ok(())
}

/// Append new content to the agent's background. Returns the merged text.
pub fn append_background(conn: &Connection, agent_id: &str, content: &str) -> Result<String> {
    let agent = get_agent(conn, agent_id)?;
    let merged = if agent.background.is_empty() {
        content.trim().to_string()
    } else {
        format!("{}\n\n{}", agent.background, content.trim())
    };
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE agents SET background = ?1, updated_at = ?2 WHERE id = ?3",
        params![merged, now, agent_id],
    )?;
    Ok(merged)
}

/// Build the trait-inference prompt for a background text.
pub fn build_infer_traits_prompt(background: &str) -> String {
    INFER_TRAITS_PROMPT.replace("{background}", background)
}

#[derive(Deserialize)]
struct RawTraits {
    #[serde(default = "neutral")]
    openness: f64,
    #[serde(default = "neutral")]
    conscientiousness: f64,
    #[serde(default = "neutral")]
    extraversion: f64,
    #[serde(default = "neutral")]
    agreeableness: f64,
    #[serde(default = "neutral")]
    neuroticism: f64,
    #[serde(default = "neutral")]
    bias_strength: f64,
}

fn neutral() -> f64 {
    0.5
}

/// Parse a trait-inference response into traits.
///
/// Handles markdown code fences and surrounding prose; values are clamped to
/// `[0, 1]`. Returns `None` when no JSON object can be recovered, leaving the
/// stored traits untouched.
pub fn parse_traits_response(response: &str) -> Option<PersonalityTraits> {
    let trimmed = response.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')? + 1;
    let raw: RawTraits = match serde_json::from_str(&trimmed[start..end]) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("failed to parse trait inference response: {e}");
            return None;
        }
    };

    let clamp = |v: f64| v.clamp(0.0, 1.0);
    Some(PersonalityTraits {
        openness: clamp(raw.openness),
        conscientiousness: clamp(raw.conscientiousness),
        extraversion: clamp(raw.extraversion),
        agreeableness: clamp(raw.agreeableness),
        neuroticism: clamp(raw.neuroticism),
        bias_strength: clamp(raw.bias_strength),
    })
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        traits: PersonalityTraits {
            openness: row.get(1)?,
            conscientiousness: row.get(2)?,
            extraversion: row.get(3)?,
            agreeableness: row.get(4)?,
            neuroticism: row.get(5)?,
            bias_strength: row.get(6)?,
        },
        background: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

use anyhow::{bail, Context, Result};

use crate::config::MnemaConfig;
use crate::memory::agents;
use crate::memory::types::{Agent, PersonalityTraits};

/// Create an agent, optionally with an explicit personality and background.
pub fn create(
    config: &MnemaConfig,
    agent_id: &str,
    traits: Option<&str>,
    background: Option<&str>,
) -> Result<()> {
    let conn = crate::db::open_database(config.resolved_db_path())?;
    let traits = traits.map(parse_traits).transpose()?;
    let agent = agents::create_agent(&conn, agent_id, traits.as_ref(), background)?;
    println!("Created agent '{}'", agent.id);
    print_agent(&agent);
    Ok(())
}

pub fn show(config: &MnemaConfig, agent_id: &str) -> Result<()> {
    let conn = crate::db::open_database(config.resolved_db_path())?;
    let agent = agents::get_agent(&conn, agent_id)?;
    print_agent(&agent);
    Ok(())
}

pub fn list(config: &MnemaConfig) -> Result<()> {
    let conn = crate::db::open_database(config.resolved_db_path())?;
    let all = agents::list_agents(&conn)?;
    if all.is_empty() {
        println!("No agents yet.");
        return Ok(());
    }
    for agent in all {
        let background = if agent.background.is_empty() {
            "(no background)".to_string()
        } else {
            truncate(&agent.background, 60)
        };
        println!("  {:<20} {}  {}", agent.id, agent.updated_at, background);
    }
    Ok(())
}

pub fn set_personality(config: &MnemaConfig, agent_id: &str, traits: &str) -> Result<()> {
    let conn = crate::db::open_database(config.resolved_db_path())?;
    let traits = parse_traits(traits)?;
    agents::update_personality(&conn, agent_id, &traits)?;
    let agent = agents::get_agent(&conn, agent_id)?;
    println!("Updated personality for '{}'", agent.id);
    print_agent(&agent);
    Ok(())
}

/// Append to the background; with `infer` set, one chat call re-derives the
/// personality from the merged text.
pub async fn add_background(
    config: &MnemaConfig,
    agent_id: &str,
    content: &str,
    infer: bool,
) -> Result<()> {
    let conn = crate::db::open_database(config.resolved_db_path())?;
    let merged = agents::append_background(&conn, agent_id, content)?;

    if infer {
        let chat = crate::model::create_chat_backend(&config.chat)?;
        let prompt = agents::build_infer_traits_prompt(&merged);
        let response = chat
            .complete(None, &prompt)
            .await
            .context("trait inference call failed")?;
        match agents::parse_traits_response(&response) {
            Some(traits) => {
                agents::update_personality(&conn, agent_id, &traits)?;
                println!("Personality re-derived from merged background.");
            }
            None => println!("Trait inference was unparseable; personality unchanged."),
        }
    }

    let agent = agents::get_agent(&conn, agent_id)?;
    print_agent(&agent);
    Ok(())
}

/// Parse six comma-separated values in [0,1]:
/// openness,conscientiousness,extraversion,agreeableness,neuroticism,bias_strength
fn parse_traits(spec: &str) -> Result<PersonalityTraits> {
    let values: Vec<f64> = spec
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("invalid trait value: {part:?}"))
        })
        .collect::<Result<_>>()?;
    if values.len() != 6 {
        bail!(
            "expected 6 comma-separated trait values \
             (openness,conscientiousness,extraversion,agreeableness,neuroticism,bias_strength), \
             got {}",
            values.len()
        );
    }
    let traits = PersonalityTraits {
        openness: values[0],
        conscientiousness: values[1],
        extraversion: values[2],
        agreeableness: values[3],
        neuroticism: values[4],
        bias_strength: values[5],
    };
    if !traits.is_valid() {
        bail!("trait values must be within [0, 1]");
    }
    Ok(traits)
}

fn print_agent(agent: &Agent) {
    println!("Agent: {}", agent.id);
    println!("  openness:          {:.2}", agent.traits.openness);
    println!("  conscientiousness: {:.2}", agent.traits.conscientiousness);
    println!("  extraversion:      {:.2}", agent.traits.extraversion);
    println!("  agreeableness:     {:.2}", agent.traits.agreeableness);
    println!("  neuroticism:       {:.2}", agent.traits.neuroticism);
    println!("  bias_strength:     {:.2}", agent.traits.bias_strength);
    if !agent.background.is_empty() {
        println!("  background: {}", truncate(&agent.background, 200));
    }
    println!("  created: {}  updated: {}", agent.created_at, agent.updated_at);
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

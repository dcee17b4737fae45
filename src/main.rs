mod cli;
mod config;
mod db;
mod engine;
mod error;
mod memory;
mod model;
mod tasks;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mnema", version, about = "Long-term memory engine for AI agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage agent profiles
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Extract facts from content and store them
    Ingest {
        /// Agent the memories belong to
        agent: String,
        /// One or more content items
        texts: Vec<String>,
        /// Group the facts under a document id (atomic replace on re-ingest)
        #[arg(long)]
        document: Option<String>,
        /// Event date applied to items without one (ISO 8601)
        #[arg(long)]
        event_date: Option<String>,
        /// Free-text context stored with each fact
        #[arg(long)]
        context: Option<String>,
        /// Run through the background task queue
        #[arg(long)]
        queue: bool,
    },
    /// Retrieve memories for a query
    Recall {
        agent: String,
        query: String,
        /// Comma-separated fact type filter (world,agent,opinion)
        #[arg(long)]
        types: Option<String>,
        /// Spreading-activation budget
        #[arg(long)]
        budget: Option<u32>,
        /// Token budget for the result set
        #[arg(long)]
        max_tokens: Option<usize>,
        /// Reranker mode: heuristic or cross_encoder
        #[arg(long)]
        reranker: Option<String>,
        /// Reference date for temporal queries (ISO 8601)
        #[arg(long)]
        question_date: Option<String>,
        /// Print retrieval diagnostics
        #[arg(long)]
        trace: bool,
    },
    /// Ask the agent a question answered through its memories
    Think {
        agent: String,
        question: String,
        /// Situation context for the prompt
        #[arg(long)]
        context: Option<String>,
        /// Spreading-activation budget
        #[arg(long)]
        budget: Option<u32>,
    },
    /// Show store statistics
    Stats {
        /// Restrict counts to one agent
        #[arg(long)]
        agent: Option<String>,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Create an agent profile
    Create {
        id: String,
        /// Six comma-separated values in [0,1]:
        /// openness,conscientiousness,extraversion,agreeableness,neuroticism,bias_strength
        #[arg(long)]
        traits: Option<String>,
        #[arg(long)]
        background: Option<String>,
    },
    /// Show an agent profile
    Show { id: String },
    /// List all agents
    List,
    /// Replace the six personality values
    SetPersonality {
        id: String,
        /// Six comma-separated values in [0,1]
        traits: String,
    },
    /// Append to the agent's background
    AddBackground {
        id: String,
        text: String,
        /// Re-derive personality from the merged background via the chat model
        #[arg(long)]
        infer_traits: bool,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.mnema/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::MnemaConfig::load()?;

    // Log to stderr so stdout stays clean for scripted use.
    let filter =
        EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Agent { action } => match action {
            AgentAction::Create {
                id,
                traits,
                background,
            } => {
                cli::agent::create(&config, &id, traits.as_deref(), background.as_deref())?;
            }
            AgentAction::Show { id } => {
                cli::agent::show(&config, &id)?;
            }
            AgentAction::List => {
                cli::agent::list(&config)?;
            }
            AgentAction::SetPersonality { id, traits } => {
                cli::agent::set_personality(&config, &id, &traits)?;
            }
            AgentAction::AddBackground {
                id,
                text,
                infer_traits,
            } => {
                cli::agent::add_background(&config, &id, &text, infer_traits).await?;
            }
        },
        Command::Ingest {
            agent,
            texts,
            document,
            event_date,
            context,
            queue,
        } => {
            cli::ingest::ingest(&config, &agent, texts, document, event_date, context, queue)
                .await?;
        }
        Command::Recall {
            agent,
            query,
            types,
            budget,
            max_tokens,
            reranker,
            question_date,
            trace,
        } => {
            cli::recall::recall(
                &config,
                &agent,
                &query,
                types.as_deref(),
                budget,
                max_tokens,
                reranker,
                question_date.as_deref(),
                trace,
            )
            .await?;
        }
        Command::Think {
            agent,
            question,
            context,
            budget,
        } => {
            cli::think::think(&config, &agent, &question, context.as_deref(), budget).await?;
        }
        Command::Stats { agent } => {
            cli::stats::stats(&config, agent.as_deref())?;
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
    }

    Ok(())
}

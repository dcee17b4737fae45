use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{MemoryError, Result};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MnemaConfig {
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    pub ingestion: IngestionConfig,
    pub retrieval: RetrievalConfig,
    pub tasks: TasksConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Connections opened eagerly when the pool starts.
    pub pool_min_size: usize,
    /// Hard cap on open connections. Acquisition waits at the cap.
    pub pool_max_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL of an OpenAI-compatible completions API.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key. Unset var means
    /// no Authorization header, which keeps local servers working.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestionConfig {
    /// Cosine similarity at or above which a new fact is a near-duplicate.
    pub dedup_threshold: f64,
    /// Cosine similarity at or above which two facts get a semantic link.
    pub related_threshold: f64,
    /// Facts dated within this many days of each other get a temporal link.
    pub temporal_window_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_thinking_budget: u32,
    pub think_thinking_budget: u32,
    pub default_max_tokens: usize,
    pub default_reranker: String,
    /// Activation multiplier applied at each traversal hop.
    pub decay_per_hop: f64,
    /// Gains below this never enter the frontier.
    pub activation_floor: f64,
    /// A hop adding less total gain than this stops the spread early.
    pub convergence_epsilon: f64,
    /// Half-life in days for the heuristic reranker's recency boost.
    pub recency_half_life_days: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TasksConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for MnemaConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            chat: ChatConfig::default(),
            ingestion: IngestionConfig::default(),
            retrieval: RetrievalConfig::default(),
            tasks: TasksConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_mnema_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            pool_min_size: 1,
            pool_max_size: 5,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_mnema_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "bge-small-en-v1.5".into(),
            cache_dir,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            model: "llama3.1".into(),
            api_key_env: "MNEMA_API_KEY".into(),
            max_tokens: 1024,
            temperature: 0.2,
            timeout_secs: 60,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.90,
            related_threshold: 0.60,
            temporal_window_days: 30,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_thinking_budget: 100,
            think_thinking_budget: 50,
            default_max_tokens: 4096,
            default_reranker: "heuristic".into(),
            decay_per_hop: 0.5,
            activation_floor: 0.02,
            convergence_epsilon: 1e-4,
            recency_half_life_days: 90.0,
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
        }
    }
}

/// Returns `~/.mnema/`
pub fn default_mnema_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".mnema")
}

/// Returns the default config file path: `~/.mnema/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnema_dir().join("config.toml")
}

impl MnemaConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| MemoryError::Config(format!("failed to read config file: {e}")))?;
            toml::from_str(&contents)
                .map_err(|e| MemoryError::Config(format!("failed to parse config TOML: {e}")))?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemaConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (MNEMA_DB, MNEMA_LOG_LEVEL, MNEMA_CHAT_URL, MNEMA_CHAT_MODEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMA_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMA_LOG_LEVEL") {
            self.log.level = val;
        }
        if let Ok(val) = std::env::var("MNEMA_CHAT_URL") {
            self.chat.base_url = val;
        }
        if let Ok(val) = std::env::var("MNEMA_CHAT_MODEL") {
            self.chat.model = val;
        }
    }

    /// Reject configurations the engine cannot run with.
    fn validate(&self) -> Result<()> {
        if self.storage.pool_max_size == 0 {
            return Err(MemoryError::Config("pool_max_size must be at least 1".into()));
        }
        if self.storage.pool_min_size > self.storage.pool_max_size {
            return Err(MemoryError::Config(
                "pool_min_size cannot exceed pool_max_size".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ingestion.dedup_threshold)
            || !(0.0..=1.0).contains(&self.ingestion.related_threshold)
        {
            return Err(MemoryError::Config(
                "dedup_threshold and related_threshold must be within [0, 1]".into(),
            ));
        }
        if self.ingestion.related_threshold > self.ingestion.dedup_threshold {
            return Err(MemoryError::Config(
                "related_threshold cannot exceed dedup_threshold".into(),
            ));
        }
        if self.tasks.workers == 0 {
            return Err(MemoryError::Config("tasks.workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MnemaConfig::default();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.storage.pool_min_size, 1);
        assert_eq!(config.storage.pool_max_size, 5);
        assert_eq!(config.retrieval.default_thinking_budget, 100);
        assert_eq!(config.retrieval.think_thinking_budget, 50);
        assert_eq!(config.retrieval.default_max_tokens, 4096);
        assert_eq!(config.retrieval.default_reranker, "heuristic");
        assert!(config.storage.db_path.ends_with("memory.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[log]
level = "debug"

[storage]
db_path = "/tmp/test.db"
pool_max_size = 8

[ingestion]
dedup_threshold = 0.95

[retrieval]
default_thinking_budget = 40
"#;
        let config: MnemaConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.storage.pool_max_size, 8);
        assert!((config.ingestion.dedup_threshold - 0.95).abs() < 1e-9);
        assert_eq!(config.retrieval.default_thinking_budget, 40);
        // defaults still apply for unset fields
        assert_eq!(config.storage.pool_min_size, 1);
        assert!((config.retrieval.decay_per_hop - 0.5).abs() < 1e-9);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = MnemaConfig::default();
        std::env::set_var("MNEMA_DB", "/tmp/override.db");
        std::env::set_var("MNEMA_LOG_LEVEL", "trace");
        std::env::set_var("MNEMA_CHAT_MODEL", "qwen2.5");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.log.level, "trace");
        assert_eq!(config.chat.model, "qwen2.5");

        // Clean up
        std::env::remove_var("MNEMA_DB");
        std::env::remove_var("MNEMA_LOG_LEVEL");
        std::env::remove_var("MNEMA_CHAT_MODEL");
    }

    #[test]
    fn invalid_thresholds_rejected() {
        let mut config = MnemaConfig::default();
        config.ingestion.related_threshold = 0.95;
        config.ingestion.dedup_threshold = 0.90;
        assert!(config.validate().is_err());

        let mut config = MnemaConfig::default();
        config.storage.pool_min_size = 9;
        config.storage.pool_max_size = 4;
        assert!(config.validate().is_err());
    }
}

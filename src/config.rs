//! Configuration loaded from `inferq.toml`.
//!
//! Every section is optional; missing values use sensible defaults. A few
//! environment variables take precedence over the file so that secrets do
//! not have to live on disk:
//!
//! - `INFERQ_API_KEY` → `server.api_key`
//! - `INFERQ_LLM_API_KEY` → `llm.api_key`
//! - `INFERQ_DB_PATH` → `broker.db_path`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "inferq.toml";

/// Top-level configuration shared by the server, worker and client commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where clients and workers reach the broker.
    #[serde(default)]
    pub server: ServerConfig,

    /// Broker process settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Remote model endpoint used by workers.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Local OpenAI-compatible server; overrides `llm` when enabled.
    #[serde(default)]
    pub local_llm: LocalLlmConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub client: ClientConfig,
}

/// How clients and worker nodes talk to a remote broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Broker base URL, without a trailing path.
    #[serde(default = "default_server_url")]
    pub url: String,
    /// Bearer credential sent on every request. `INFERQ_API_KEY` wins.
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Listen address for `server start`; `--bind` overrides it.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Defaults to `<data dir>/inferq/queue.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Used when a job payload does not name a model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL, e.g. `https://api.openai.com/v1`.
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalLlmConfig {
    #[serde(default)]
    pub enabled: bool,
    // Ollama's default port.
    #[serde(default = "default_local_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Jobs leased per round.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause after an empty round.
    #[serde(default = "default_idle_backoff_secs")]
    pub idle_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Sleep between polls while waiting on a job.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Deadline for `--wait` when `--timeout` is not given.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

fn default_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_local_port() -> u16 {
    11434
}

fn default_batch_size() -> usize {
    1
}

fn default_idle_backoff_secs() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_wait_timeout_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            api_key: None,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            db_path: None,
        }
    }
}

impl Default for LocalLlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_local_port(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            idle_backoff_secs: default_idle_backoff_secs(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            wait_timeout_secs: default_wait_timeout_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_secs(self.idle_backoff_secs)
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

impl BrokerConfig {
    /// The configured database path, or the per-user data directory default.
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(default_db_path)
    }
}

/// `<data dir>/inferq/queue.db`, or `./inferq-queue.db` when no data dir is known.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("inferq").join("queue.db"))
        .unwrap_or_else(|| PathBuf::from("inferq-queue.db"))
}

impl Config {
    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides; empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(key) = lookup("INFERQ_API_KEY") {
            self.server.api_key = Some(key);
        }
        if let Some(key) = lookup("INFERQ_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(path) = lookup("INFERQ_DB_PATH") {
            self.broker.db_path = Some(PathBuf::from(path));
        }
    }
}

use crate::error::AgentError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

const PARLEY_DIR: &str = ".parley";
const PARLEY_HOME_ENV: &str = "PARLEY_HOME";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CheckpointConfig {
    pub backend: CheckpointBackend,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexerKind {
    #[default]
    Keyword,
    Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub indexer: IndexerKind,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embedding_model: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            indexer: IndexerKind::Keyword,
            chunk_size: 1000,
            chunk_overlap: 100,
            top_k: 4,
            embedding_model: "text-embedding-ada-002".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub stock_api_key: Option<String>,
    pub web_search: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            stock_api_key: None,
            web_search: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    Stdio,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpServerConfig {
    pub name: String,
    pub transport: McpTransportKind,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_mcp_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: Option<String>,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tool_rounds: usize,
    pub tool_timeout_secs: u64,
    pub stream: StreamConfig,
    pub checkpoint: CheckpointConfig,
    pub retrieval: RetrievalConfig,
    pub tools: ToolsConfig,
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: None,
            api_key: String::new(),
            base_url: None,
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tool_rounds: 20,
            tool_timeout_secs: 60,
            stream: StreamConfig::default(),
            checkpoint: CheckpointConfig::default(),
            retrieval: RetrievalConfig::default(),
            tools: ToolsConfig::default(),
            mcp_servers: vec![],
            data_dir: get_parley_dir(),
        }
    }
}

pub fn get_parley_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(PARLEY_HOME_ENV)
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(PARLEY_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_parley_dir().join("config.toml")
}

pub fn ensure_parley_dir() -> Result<PathBuf> {
    let parley_dir = get_parley_dir();

    if !parley_dir.exists() {
        std::fs::create_dir_all(&parley_dir).with_context(|| {
            format!(
                "Failed to create parley directory at {}",
                parley_dir.display()
            )
        })?;
    }

    Ok(parley_dir)
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        if config_exists() {
            load_config()
        } else {
            Ok(Config::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.data_dir = get_parley_dir();
        Ok(config)
    }

    pub fn provider_name(&self) -> &str {
        self.provider.as_deref().unwrap_or("openai")
    }

    pub fn threads_dir(&self) -> PathBuf {
        self.data_dir.join("threads")
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_tool_rounds == 0 {
            return Err(AgentError::Configuration(
                "max_tool_rounds must be at least 1".into(),
            ));
        }
        if self.tool_timeout_secs == 0 {
            return Err(AgentError::Configuration(
                "tool_timeout_secs must be at least 1".into(),
            ));
        }
        if self.retrieval.chunk_size == 0
            || self.retrieval.chunk_overlap >= self.retrieval.chunk_size
        {
            return Err(AgentError::Configuration(format!(
                "retrieval.chunk_overlap ({}) must be smaller than retrieval.chunk_size ({})",
                self.retrieval.chunk_overlap, self.retrieval.chunk_size
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(AgentError::Configuration(
                "retrieval.top_k must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for server in &self.mcp_servers {
            if server.name.trim().is_empty() {
                return Err(AgentError::Configuration(
                    "mcp server entries need a name".into(),
                ));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(AgentError::Configuration(format!(
                    "duplicate mcp server name '{}'",
                    server.name
                )));
            }
            match server.transport {
                McpTransportKind::Stdio if server.command.is_none() => {
                    return Err(AgentError::Configuration(format!(
                        "mcp server '{}' uses stdio but has no command",
                        server.name
                    )));
                }
                McpTransportKind::Http if server.url.is_none() => {
                    return Err(AgentError::Configuration(format!(
                        "mcp server '{}' uses http but has no url",
                        server.name
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

pub fn load_config() -> Result<Config> {
    let config_path = get_config_path();

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::anyhow!(
                "Config file not found. Run 'parley onboard' to set up your configuration."
            )
        } else {
            anyhow::anyhow!("Failed to read config from {}: {}", config_path.display(), e)
        }
    })?;

    Config::from_toml(&content)
        .with_context(|| format!("Failed to parse config from {}", config_path.display()))
}

pub fn save_config(config: &Config) -> Result<()> {
    ensure_parley_dir()?;

    let config_path = get_config_path();
    let content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config to TOML")?;

    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    Ok(())
}

pub fn config_exists() -> bool {
    get_config_path().exists()
}

//! `pressroom.toml` loading.
//!
//! ```toml
//! [engine]
//! max_concurrent_jobs = 2
//!
//! [model]
//! provider = "openrouter"
//! model_id = "qwen/qwen3-coder"
//!
//! [paths]
//! input_dir = "./input"
//! output_dir = "./output"
//! ```
//!
//! Every section is optional. The API key is taken from `OPENROUTER_API_KEY`
//! when the file does not set one.

use anyhow::Context;
use pressroom_core::EngineConfig;
use pressroom_gateway::ModelConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding the model API key.
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Full CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PressroomConfig {
    /// Cache, concurrency, retry and export tunables.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Model endpoint and sampling.
    #[serde(default)]
    pub model: ModelConfig,
    /// Input and output locations.
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Where documents are read from and results written to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory scanned for `*.pdf` and `*.txt` documents.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Directory receiving reports, content, metrics and the cache snapshot.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Persist the result cache across runs.
    #[serde(default = "default_persist_cache")]
    pub persist_cache: bool,
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("./input")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_persist_cache() -> bool {
    true
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            persist_cache: default_persist_cache(),
        }
    }
}

impl PathsConfig {
    /// Cache snapshot file.
    pub fn cache_snapshot(&self) -> PathBuf {
        self.output_dir.join("cache").join("results.json")
    }

    /// Metrics export directory.
    pub fn metrics_dir(&self) -> PathBuf {
        self.output_dir.join("metrics")
    }
}

impl PressroomConfig {
    /// Parse a configuration document.
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("invalid configuration")?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_toml(&text)
                .with_context(|| format!("failed to parse config file '{}'", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e)
                .with_context(|| format!("failed to read config file '{}'", path.display())),
        }
    }

    /// Fill the API key from `env_key` when the file left it empty.
    pub fn apply_api_key(&mut self, env_key: Option<String>) {
        if self.model.api_key.is_empty() {
            if let Some(key) = env_key.filter(|k| !k.trim().is_empty()) {
                self.model.api_key = key.trim().to_string();
            }
        }
    }

    /// Check the engine settings and the presence of credentials.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.engine.validate()?;
        if self.model.requires_api_key() && self.model.api_key.is_empty() {
            anyhow::bail!(
                "no API key configured: set {API_KEY_ENV} or model.api_key in the config file"
            );
        }
        Ok(())
    }

    /// The effective configuration as TOML, without credentials.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

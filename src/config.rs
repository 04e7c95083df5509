//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Supported configuration formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format (`.yaml` / `.yml`).
    Yaml,
    /// JSON format (`.json`).
    Json,
    /// TOML format (`.toml`).
    Toml,
}

impl ConfigFormat {
    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "json" => Some(ConfigFormat::Json),
            "toml" => Some(ConfigFormat::Toml),
            _ => None,
        }
    }
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Directory that `ReadFile` paths and process working directories are relative to.
    #[serde(default = "default_build_root")]
    pub build_root: PathBuf,
    /// How many times a root is retried after its run was invalidated.
    #[serde(default = "default_invalidation_retries")]
    pub invalidation_retries: u32,
    #[serde(default = "default_invalidation_delay_ms")]
    pub invalidation_delay_ms: u64,
    /// Node count above which unreachable entries are collected after a request.
    #[serde(default = "default_max_graph_entries")]
    pub max_graph_entries: usize,
    /// How long a finished root stays leased against garbage collection.
    #[serde(default = "default_root_lease_secs")]
    pub root_lease_secs: u64,
    /// Maximum number of concurrently running processes. Zero means the number of CPUs.
    #[serde(default)]
    pub process_concurrency: usize,
    #[serde(default = "default_process_timeout_ms")]
    pub default_process_timeout_ms: u64,
}

fn default_build_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_invalidation_retries() -> u32 {
    8
}

fn default_invalidation_delay_ms() -> u64 {
    100
}

fn default_max_graph_entries() -> usize {
    100_000
}

fn default_root_lease_secs() -> u64 {
    30
}

fn default_process_timeout_ms() -> u64 {
    600_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            build_root: default_build_root(),
            invalidation_retries: default_invalidation_retries(),
            invalidation_delay_ms: default_invalidation_delay_ms(),
            max_graph_entries: default_max_graph_entries(),
            root_lease_secs: default_root_lease_secs(),
            process_concurrency: 0,
            default_process_timeout_ms: default_process_timeout_ms(),
        }
    }
}

impl EngineConfig {
    pub fn with_build_root(mut self, build_root: impl Into<PathBuf>) -> Self {
        self.build_root = build_root.into();
        self
    }

    pub fn invalidation_delay(&self) -> Duration {
        Duration::from_millis(self.invalidation_delay_ms)
    }

    pub fn root_lease(&self) -> Duration {
        Duration::from_secs(self.root_lease_secs)
    }

    pub fn default_process_timeout(&self) -> Duration {
        Duration::from_millis(self.default_process_timeout_ms)
    }

    pub fn effective_process_concurrency(&self) -> usize {
        if self.process_concurrency > 0 {
            return self.process_concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    /// Load a config file, picking the format from its extension.
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            EngineError::ConfigParseError(format!(
                "unrecognised config extension: {}",
                path.display()
            ))
        })?;
        let content = std::fs::read_to_string(path)?;
        parse_config(&content, format)
    }
}

/// Parse config content in the given format.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<EngineConfig, EngineError> {
    match format {
        ConfigFormat::Yaml => serde_saphyr::from_str(content)
            .map_err(|e| EngineError::ConfigParseError(e.to_string())),
        ConfigFormat::Json => serde_json::from_str(content)
            .map_err(|e| EngineError::ConfigParseError(e.to_string())),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| EngineError::ConfigParseError(e.to_string()))
        }
    }
}

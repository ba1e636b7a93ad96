//! Configuration module for the execution core
//!
//! A single [`EngineConfig`] holds everything the host process tunes:
//! - Worker pool shape and CPU mask ([`SchedulerConfig`])
//! - Exchange sizing ([`ExchangeConfig`])
//! - Backoff of non-blocking poll loops ([`PollSettings`])
//! - Buffer size and default parallelism
//!
//! # File Formats
//!
//! Config files are TOML (`.toml`) or JSON (`.json`), chosen by extension:
//!
//! ```toml
//! buffer_size = 8192
//! parallelism = 8
//!
//! [scheduler]
//! cpu_mask = [0]
//! shutdown = "drain"
//!
//! [exchange]
//! capacity_per_child = 256
//! default_mode = "exclusive"
//! ```
//!
//! # Example
//!
//! ```ignore
//! use colexec::config::EngineConfig;
//!
//! let config = EngineConfig::load_or_default("colexec.toml");
//! let cpus = colexec::scheduler::eligible_cpus(&config.scheduler.cpu_mask);
//! let scheduler = colexec::Scheduler::init(cpus, &config.scheduler)?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{ExecError, Result};
use crate::pipeline::BuildOptions;
use crate::queue::DEFAULT_BUFFER_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Supported config file encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            other => Err(ExecError::Config(format!(
                "Unsupported config extension {:?} for {:?}",
                other, path
            ))),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of buffers allocated by built-in sources, in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Target parallelism for parallel fragments (defaults to worker count)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,

    /// Worker pool settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Exchange settings
    #[serde(default)]
    pub exchange: ExchangeConfig,

    /// Poll loop backoff
    #[serde(default)]
    pub poll: PollSettings,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            parallelism: None,
            scheduler: SchedulerConfig::default(),
            exchange: ExchangeConfig::default(),
            poll: PollSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load a config file, TOML or JSON by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExecError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: EngineConfig = match format {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| {
                ExecError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| {
                ExecError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load engine config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config, TOML or JSON by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| ExecError::Config(format!("Failed to serialize config: {}", e)))?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ExecError::Config(format!("Failed to serialize config: {}", e)))?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ExecError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        std::fs::write(path, content).map_err(|e| {
            ExecError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Reject values that would make the engine unusable
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(ExecError::Config("buffer_size must be > 0".to_string()));
        }
        if self.parallelism == Some(0) {
            return Err(ExecError::Config("parallelism must be > 0".to_string()));
        }
        if self.scheduler.worker_queue_capacity == 0 {
            return Err(ExecError::Config(
                "scheduler.worker_queue_capacity must be > 0".to_string(),
            ));
        }
        if self.exchange.capacity_per_child == 0 {
            return Err(ExecError::Config(
                "exchange.capacity_per_child must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Parallelism to request from `build_tasks`
    pub fn effective_parallelism(&self, worker_count: usize) -> usize {
        self.parallelism.unwrap_or(worker_count).max(1)
    }

    /// Task build options derived from the exchange and poll sections
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            exchange_capacity_per_child: self.exchange.capacity_per_child,
            default_exchange_mode: self.exchange.default_mode,
            poll: self.poll.clone(),
        }
    }
}

// ==================== Tests ====================

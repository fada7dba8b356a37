//! Orchestrator configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::surface::DEFAULT_CONTENT_MARKER;

/// Tunables for rendering, caching and recovery.
///
/// Loaded from TOML; every field is optional and falls back to its default.
///
/// ```text
/// max_retries = 3
/// cache_capacity = 500
/// batch_size = 5
/// lightweight_unsupported = ["\\begin{cases}"]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Retries allowed per render after the first failure.
    pub max_retries: u32,
    /// Accumulated retries after which a surface is blacklisted.
    pub blacklist_threshold: u32,
    /// Maximum number of cached renders.
    pub cache_capacity: usize,
    /// Maximum number of error records kept for diagnostics.
    pub history_capacity: usize,
    /// Targets dispatched together by the batch runner.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_delay_ms: u64,
    /// Time box for backend (re)initialization.
    pub load_timeout_ms: u64,
    /// Time box for a single backend render call.
    pub render_timeout_ms: u64,
    /// Base delay for retry backoff, doubled per attempt.
    pub backoff_base_ms: u64,
    /// Attribute marking content-bearing surfaces.
    pub content_marker: String,
    /// Substrings the lightweight backend declines to render.
    pub lightweight_unsupported: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            blacklist_threshold: 3,
            cache_capacity: 500,
            history_capacity: 100,
            batch_size: 5,
            batch_delay_ms: 16,
            load_timeout_ms: 5_000,
            render_timeout_ms: 3_000,
            backoff_base_ms: 50,
            content_marker: DEFAULT_CONTENT_MARKER.to_string(),
            lightweight_unsupported: [
                "\\begin{cases}",
                "\\begin{align}",
                "\\begin{array}",
                "\\overset",
                "\\underset",
                "\\stackrel",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(ConfigError::Toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.cache_capacity == 0 {
            return Err(ConfigError::Zero { field: "cache_capacity" });
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Zero { field: "history_capacity" });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero { field: "batch_size" });
        }
        if self.blacklist_threshold == 0 {
            return Err(ConfigError::Zero { field: "blacklist_threshold" });
        }
        Ok(())
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Backoff before the given retry (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

//! Engine configuration.
//!
//! All tunables are passed in explicitly at construction; the core never
//! reads ambient storage or environment state.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Provider and polling defaults.
const DEFAULT_PROVIDER_CEILING: usize = 5000;
const DEFAULT_SEGMENT_HEADROOM: usize = 800;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard per-request character limit imposed by the speech provider.
    #[serde(default = "default_provider_ceiling")]
    pub provider_ceiling: usize,

    /// Buffer subtracted from the provider ceiling when segmenting, so a
    /// chapter just over the ceiling is not split into an extra tiny
    /// trailing part.
    #[serde(default = "default_segment_headroom")]
    pub segment_headroom: usize,

    /// Fixed wait between status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Polling budget per part; exceeding it is a timeout failure.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

fn default_provider_ceiling() -> usize {
    DEFAULT_PROVIDER_CEILING
}

fn default_segment_headroom() -> usize {
    DEFAULT_SEGMENT_HEADROOM
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_poll_attempts() -> u32 {
    DEFAULT_MAX_POLL_ATTEMPTS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider_ceiling: default_provider_ceiling(),
            segment_headroom: default_segment_headroom(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl EngineConfig {
    /// Parse a config from TOML. Missing keys fall back to defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Effective segmentation limit: the provider ceiling minus headroom.
    pub fn max_part_chars(&self) -> usize {
        self.provider_ceiling.saturating_sub(self.segment_headroom)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

//! CLI configuration at `~/.xpost/config.toml`.
//!
//! Holds the watchdog timeouts and the origins of the simulated windows.
//! CLI flags always override config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use xpost_core::TimeoutConfig;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub windows: WindowsConfig,
}

/// Origins and link latency of the simulated windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsConfig {
    #[serde(default = "default_page_origin")]
    pub page_origin: String,

    #[serde(default = "default_frame_origin")]
    pub frame_origin: String,

    /// One-way delivery delay in ms.
    #[serde(default)]
    pub latency_ms: u64,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            page_origin: default_page_origin(),
            frame_origin: default_frame_origin(),
            latency_ms: 0,
        }
    }
}

fn default_page_origin() -> String {
    "https://page.example".to_string()
}

fn default_frame_origin() -> String {
    "https://frame.example".to_string()
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &str) -> Result<Self> {
        let path = expand_tilde(path);
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        config
            .timeouts
            .validate()
            .with_context(|| format!("invalid timeouts in {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(ms) = overrides.ack_timeout {
            self.timeouts.ack_timeout = ms;
        }
        if let Some(ms) = overrides.cycle {
            self.timeouts.response_cycle_time = ms;
        }
        if let Some(ms) = overrides.latency {
            self.windows.latency_ms = ms;
        }
    }
}

/// Values given on the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub ack_timeout: Option<u64>,
    pub cycle: Option<u64>,
    pub latency: Option<u64>,
}

/// `~/.xpost/config.toml`, or a relative fallback when there is no home directory.
pub fn default_path() -> String {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".xpost")
        .join("config.toml")
        .to_string_lossy()
        .to_string()
}

fn expand_tilde(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(s).to_path_buf()
}

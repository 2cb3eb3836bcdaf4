//! Configuration loading
//!
//! Static TOML configuration read once at startup: audio device selection,
//! initial volume, logging, and tuning overrides. Everything has a built-in
//! default, so a missing config file is not an error; a malformed one is.

use segue_common::{PlayerError, Result, Tuning, TuningOverrides};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Partial tuning overrides; absent keys keep built-in defaults
    #[serde(default)]
    pub tuning: TuningOverrides,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Output device name; the system default when unset
    #[serde(default)]
    pub device: Option<String>,

    /// Initial volume, 0.0 to 1.0
    #[serde(default = "default_volume")]
    pub volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            volume: default_volume(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_volume() -> f32 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PlayerError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| PlayerError::Config(format!("invalid config {}: {e}", path.display())))?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from a file when given, built-in defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Config::default()),
        }
    }

    /// Resolve the tuning block from defaults plus this config's overrides.
    pub fn tuning(&self) -> Tuning {
        Tuning::resolve(&self.tuning)
    }
}

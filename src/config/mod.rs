//! Configuration management
//!
//! Handles loading and validation of the encoder configuration from TOML
//! files. Every fatal check runs here, before any hardware is touched.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod types;

pub use types::{EncoderConfig, Rational, SourceConfig, WIDTH_ALIGNMENT};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Encoder session configuration
    pub encoder: EncoderConfig,
    /// Frame source for the exerciser
    #[serde(default)]
    pub source: SourceConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Config {
            encoder: EncoderConfig::new(640, 480),
            source: SourceConfig::default(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.encoder
            .validate()
            .context("Invalid encoder configuration")?;

        if self.source.raw_file.is_none() && self.source.frames == 0 {
            anyhow::bail!("Synthetic source needs a non-zero frame count");
        }

        Ok(())
    }
}

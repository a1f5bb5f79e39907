//! Configuration management for bagctl

use anyhow::{Context, Result};
use baghouse_storage::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache budget (bytes)
pub const CACHE_SIZE_ENV: &str = "BAGHOUSE_CACHE_SIZE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default output format
    #[serde(default = "default_output_format")]
    pub output_format: OutputFormat,

    /// Enable colored output
    #[serde(default = "default_colored")]
    pub colored: bool,

    /// Cache, retry, and provider settings
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

fn default_output_format() -> OutputFormat {
    OutputFormat::Table
}

fn default_colored() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_format: default_output_format(),
            colored: default_colored(),
            provider: ProviderConfig::default(),
        }
    }
}

impl Config {
    /// Load `~/.baghouse/config.toml` (if present), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        if let Ok(value) = std::env::var(CACHE_SIZE_ENV) {
            config.apply_cache_size(&value)?;
        }
        Ok(config)
    }

    /// Load config from `path`, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Write the config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_cache_size(&mut self, value: &str) -> Result<()> {
        let bytes: u64 = value
            .trim()
            .parse()
            .with_context(|| format!("{} must be a byte count, got '{}'", CACHE_SIZE_ENV, value))?;
        self.provider.cache.cache_size_bytes = bytes;
        Ok(())
    }

    /// Config file path (~/.baghouse/config.toml)
    pub fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".baghouse").join("config.toml")
    }
}

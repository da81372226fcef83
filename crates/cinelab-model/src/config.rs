//! Configuration for opening packages
//!
//! Storage tuning, write-back behavior and bookkeeping settings. Loaded from
//! TOML or JSON; every section falls back to its defaults when omitted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Model-wide configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// SQLite connection settings
    pub storage: StorageConfig,
    /// When dirty elements are written back
    pub write_back: WriteBackConfig,
    /// Creator/contributor metadata maintained by the application rules
    pub bookkeeping: BookkeepingConfig,
}

/// SQLite connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Journal mode applied to file-backed stores
    pub journal_mode: String,
    /// How long a writer waits on a locked database, in milliseconds
    pub busy_timeout_ms: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal_mode: "WAL".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

/// Write-back configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBackConfig {
    /// Flush every element right after it is mutated
    pub instant: bool,
}

/// Bookkeeping configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookkeepingConfig {
    pub enabled: bool,
    /// User recorded as creator/contributor; `$USER` when unset
    pub user: Option<String>,
}

impl Default for BookkeepingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user: None,
        }
    }
}

impl BookkeepingConfig {
    /// The user name to record in bookkeeping metadata.
    pub fn effective_user(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

const JOURNAL_MODES: &[&str] = &["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json_str)?)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load and validate a config file. `.json` files are read as JSON,
    /// anything else as TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text)?,
            _ => Self::from_toml(&text)?,
        };
        config.validate()?;
        tracing::debug!("loaded model config from {:?}", path);
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mode = self.storage.journal_mode.to_ascii_uppercase();
        if !JOURNAL_MODES.contains(&mode.as_str()) {
            return Err(ConfigError::InvalidStorage(format!(
                "unknown journal_mode {:?}",
                self.storage.journal_mode
            )));
        }
        Ok(())
    }
}

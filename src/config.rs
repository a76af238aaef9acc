use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_page_size() -> usize {
    100
}

fn default_job_timeout_secs() -> u64 {
    60
}

fn default_notification_capacity() -> usize {
    100
}

fn default_key_prefix() -> String {
    "procflow".to_string()
}

fn default_true() -> bool {
    true
}

/// Where live and archived rows are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    #[default]
    Memory,
    Redis {
        url: String,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// When false no historical store is provisioned and archival fails with
    /// `ArchiveTargetNotFound`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Page size of every paged cleanup and archival loop.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Buffered events per change-notification name.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            job_timeout_secs: default_job_timeout_secs(),
            notification_capacity: default_notification_capacity(),
            storage: StorageConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {}", path.display()))?;
        Self::from_yaml(&yaml_content)
            .with_context(|| format!("Failed to deserialize config from {}", path.display()))
    }

    pub fn from_yaml(yaml_content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping.
        if yaml_content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: EngineConfig = serde_yaml::from_str(yaml_content)?;
        Ok(config)
    }
}

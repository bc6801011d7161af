//! # Configuration Management Module
//!
//! TOML configuration for the player store and its write-back cache.
//!
//! ## Configuration Structure
//!
//! - [`StorageConfig`] - database location and item storage mode
//! - [`CacheConfig`] - background flush cadence and shutdown retries
//! - [`LoggingConfig`] - log level and optional log file
//! - [`SecurityConfig`] - Argon2 password hashing parameters
//!
//! ## Usage
//!
//! ```rust,no_run
//! use playervault::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Data dir: {}", config.storage.data_dir);
//!     println!("Flush every {:?}", config.cache.flush_interval());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//! item_storage = "relational"
//!
//! [cache]
//! flush_interval_ms = 1000
//! shutdown_attempts = 3
//!
//! [logging]
//! level = "info"
//! file = "playervault.log"
//! ```

use std::time::Duration;

use anyhow::{anyhow, Result};
use argon2::Params;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::records::ItemStorage;
use crate::storage::{Database, DatabaseBuilder, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: Option<SecurityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Mode new saves are written in. Existing players load from whatever mode they
    /// were stored with.
    #[serde(default)]
    pub item_storage: ItemStorage,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            item_storage: ItemStorage::Relational,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Pause between background flush cycles.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Synchronous drain passes at shutdown before giving up on failing saves.
    #[serde(default = "default_shutdown_attempts")]
    pub shutdown_attempts: u32,
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_shutdown_attempts() -> u32 {
    3
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            shutdown_attempts: default_shutdown_attempts(),
        }
    }
}

impl CacheConfig {
    /// Flush interval, never shorter than one millisecond.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("playervault.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Argon2Config {
    #[serde(default)]
    pub memory_kib: Option<u32>,
    #[serde(default)]
    pub time_cost: Option<u32>,
    #[serde(default)]
    pub parallelism: Option<u32>,
}

impl Argon2Config {
    /// Argon2 parameters with unset fields taken from the library defaults.
    /// Returns `None` if the combination is rejected.
    pub fn params(&self) -> Option<Params> {
        let builder = Params::DEFAULT;
        let mem = self.memory_kib.unwrap_or(builder.m_cost());
        let time = self.time_cost.unwrap_or(builder.t_cost());
        let para = self.parallelism.unwrap_or(builder.p_cost());
        Params::new(mem, time, para, None).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub argon2: Option<Argon2Config>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn argon2_params(&self) -> Option<Params> {
        self.security
            .as_ref()
            .and_then(|s| s.argon2.as_ref())
            .and_then(Argon2Config::params)
    }

    /// Open the database described by the storage and security sections.
    pub fn open_database(&self) -> std::result::Result<Database, StoreError> {
        let mut builder = DatabaseBuilder::new(&self.storage.data_dir);
        if let Some(params) = self.argon2_params() {
            builder = builder.argon2_params(params);
        }
        builder.open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.data_dir, "./data");
        assert_eq!(config.storage.item_storage, ItemStorage::Relational);
        assert_eq!(config.cache.flush_interval(), Duration::from_millis(1000));
        assert_eq!(config.cache.shutdown_attempts, 3);
        assert!(config.argon2_params().is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            data_dir = "/srv/vault"
            item_storage = "binary"

            [cache]
            flush_interval_ms = 0

            [security.argon2]
            memory_kib = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.item_storage, ItemStorage::Binary);
        assert_eq!(config.cache.flush_interval(), Duration::from_millis(1));
        assert_eq!(config.cache.shutdown_attempts, 3);
        assert_eq!(config.logging.level, "info");
        let params = config.argon2_params().expect("argon2 params");
        assert_eq!(params.m_cost(), 4096);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.cache, config.cache);
        assert_eq!(parsed.storage.data_dir, config.storage.data_dir);
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.cache, CacheConfig::default());
    }
}

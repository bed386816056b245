//! Configuration structures
//!
//! Every section falls back to its defaults when absent, so an empty file (or
//! no file at all) yields a configuration that degrades to local storage.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relational: RelationalConfig,
    pub document: DocumentConfig,
    pub local: LocalConfig,
    pub resilience: ResilienceConfig,
    pub logging: LoggingConfig,
}

/// Primary backend: relational store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout_ms: u64,
    pub use_tls: bool,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 5432,
            user: "root".to_string(),
            password: String::new(),
            database: "clientkey".to_string(),
            connect_timeout_ms: 5_000,
            use_tls: false,
        }
    }
}

impl RelationalConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Secondary backend: document store reached over REST
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            project_id: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl DocumentConfig {
    /// The document store is only worth trying with credentials
    pub fn is_configured(&self) -> bool {
        self.enabled
            && self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
            && self.project_id.as_deref().is_some_and(|p| !p.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Local key/value storage (always available)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub path: String,
    pub pool_size: u32,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self { path: "clientkey-local.db".to_string(), pool_size: 4 }
    }
}

/// Circuit breaker, retry and replay tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub failure_threshold: u64,
    pub cooldown_ms: u64,
    pub max_jitter_ms: u64,
    pub max_delay_ms: u64,
    pub replay_max_attempts: u32,
    pub replay_pause_ms: u64,
    pub replay_interval_ms: u64,
    pub drain_on_enqueue: bool,
    pub activity_cap_per_client: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
            max_jitter_ms: 1_000,
            max_delay_ms: 30_000,
            replay_max_attempts: crate::constants::REPLAY_MAX_ATTEMPTS,
            replay_pause_ms: 100,
            replay_interval_ms: 30_000,
            drain_on_enqueue: true,
            activity_cap_per_client: crate::constants::MAX_ACTIVITIES_PER_CLIENT,
        }
    }
}

impl ResilienceConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn replay_pause(&self) -> Duration {
        Duration::from_millis(self.replay_pause_ms)
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }
}

/// Log output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: false }
    }
}

//! Runtime configuration for the bridge.
//!
//! Settings come from a TOML file (`taskbridge.toml` by default) with
//! environment-variable overrides for everything secret or deploy-specific.
//! A `.env` file is honored via dotenvy before the environment is read.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_port() -> u16 {
    8080
}
fn default_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    256
}
fn default_internal_timeout() -> u64 {
    10
}
fn default_external_timeout() -> u64 {
    15
}
fn default_tag_concurrency() -> usize {
    15
}
fn default_mapping_ttl() -> u64 {
    600
}
fn default_tags_ttl() -> u64 {
    600
}
fn default_kpi_ttl() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Connection settings for the internal backend API.
#[derive(Debug, Clone, Deserialize)]
pub struct InternalSection {
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_internal_timeout")]
    pub timeout_secs: u64,
}

/// Connection settings for the external project-management API.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalSection {
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    pub team_id: String,
    pub list_id: String,
    #[serde(default = "default_external_timeout")]
    pub timeout_secs: u64,
    /// Bound on concurrent tag-fetch requests during batch listing.
    #[serde(default = "default_tag_concurrency")]
    pub tag_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub mapping_ttl_secs: u64,
    pub tags_ttl_secs: u64,
    pub kpi_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            mapping_ttl_secs: default_mapping_ttl(),
            tags_ttl_secs: default_tags_ttl(),
            kpi_ttl_secs: default_kpi_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerSection,
    pub internal: InternalSection,
    pub external: ExternalSection,
    #[serde(default)]
    pub cache: CacheSection,
}

impl BridgeConfig {
    /// Load configuration from a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        let mut config: BridgeConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Environment overrides, applied after file parsing so deployments can
    /// keep tokens out of the config file.
    fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("TASKBRIDGE_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(token) = std::env::var("TASKBRIDGE_INTERNAL_TOKEN") {
            self.internal.token = token;
        }
        if let Ok(token) = std::env::var("TASKBRIDGE_EXTERNAL_TOKEN") {
            self.external.token = token;
        }
        if let Ok(url) = std::env::var("TASKBRIDGE_INTERNAL_URL") {
            self.internal.base_url = url;
        }
        if let Ok(url) = std::env::var("TASKBRIDGE_EXTERNAL_URL") {
            self.external.base_url = url;
        }
    }

    pub fn mapping_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.mapping_ttl_secs)
    }

    pub fn tags_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.tags_ttl_secs)
    }

    pub fn kpi_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.kpi_ttl_secs)
    }
}

//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.soss/config.json`) and environment.
//! Every field has a default, so a missing file or an empty `{}` is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::codec::Encoding;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway connection settings.
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Gateway endpoint, credential and encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Client name reported in logs (default "soss-cli").
    #[serde(default = "default_name")]
    pub name: String,

    /// Gateway WebSocket URL (default "wss://localhost:50001"). Overridden by SOSS_URL env.
    #[serde(default = "default_url")]
    pub url: String,

    /// Opaque credential sent as the WebSocket sub-protocol. Overridden by SOSS_TOKEN env.
    pub token: Option<String>,

    /// "json" (default) or "bson". Must match the gateway's configured encoding.
    #[serde(default)]
    pub encoding: Encoding,

    /// Timeout for service calls in milliseconds. Absent = wait indefinitely.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

fn default_name() -> String {
    "soss-cli".to_string()
}

fn default_url() -> String {
    "wss://localhost:50001".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            url: default_url(),
            token: None,
            encoding: Encoding::default(),
            call_timeout_ms: None,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the gateway token: env SOSS_TOKEN overrides config.
pub fn resolve_token(config: &Config) -> Option<String> {
    non_empty_env("SOSS_TOKEN").or_else(|| {
        config
            .transport
            .token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the gateway URL: env SOSS_URL overrides config.
pub fn resolve_url(config: &Config) -> String {
    non_empty_env("SOSS_URL").unwrap_or_else(|| config.transport.url.trim().to_string())
}

/// Transport settings with environment overrides applied.
pub fn resolve_transport(config: &Config) -> TransportConfig {
    TransportConfig {
        url: resolve_url(config),
        token: resolve_token(config),
        ..config.transport.clone()
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SOSS_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".soss").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or SOSS_CONFIG_PATH).
/// Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Create the config directory and write a default config file if none exists.
/// Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if config_path.exists() {
        log::debug!("config already exists at {}, skipping", config_path.display());
    } else {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}

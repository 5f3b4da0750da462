//! Channel and application configuration.
//!
//! Tuning ships with compiled-in defaults, overridable through a TOML file
//! and `TASKPULSE`-prefixed environment variables, in that order of
//! precedence.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::channel::CHANNEL_PATH;

/// Application name, used for config paths and the environment prefix.
pub const APP_NAME: &str = "taskpulse";

/// Default server origin the channel endpoint is derived from.
pub const DEFAULT_ORIGIN: &str = "http://localhost:8000";

/// Delay before the single reconnect attempt after an unrequested close.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

/// How long completed task records stay visible before removal.
pub const DEFAULT_COMPLETED_RETENTION_MS: u64 = 5000;

/// How long failed task records stay visible before removal.
pub const DEFAULT_FAILED_RETENTION_MS: u64 = 10_000;

/// Bound on archived envelopes.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Runtime tuning for one [`TaskChannel`](crate::channel::TaskChannel).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// http(s) origin of the server, e.g. `https://erp.example.com`.
    pub origin: String,
    /// Path of the tracking endpoint under the origin.
    pub channel_path: String,
    pub reconnect_delay: Duration,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
    pub history_limit: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            channel_path: CHANNEL_PATH.to_string(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            completed_retention: Duration::from_millis(DEFAULT_COMPLETED_RETENTION_MS),
            failed_retention: Duration::from_millis(DEFAULT_FAILED_RETENTION_MS),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// On-disk application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub channel: ChannelTuning,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Resolve the channel tuning this configuration describes.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            origin: self.server.origin.clone(),
            channel_path: self.server.channel_path.clone(),
            reconnect_delay: Duration::from_millis(self.channel.reconnect_delay_ms),
            completed_retention: Duration::from_millis(self.channel.completed_retention_ms),
            failed_retention: Duration::from_millis(self.channel.failed_retention_ms),
            history_limit: self.channel.history_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// http(s) origin of the server.
    pub origin: String,
    /// Path of the tracking endpoint under the origin.
    pub channel_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            channel_path: CHANNEL_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelTuning {
    pub reconnect_delay_ms: u64,
    pub completed_retention_ms: u64,
    pub failed_retention_ms: u64,
    pub history_limit: usize,
}

impl Default for ChannelTuning {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            completed_retention_ms: DEFAULT_COMPLETED_RETENTION_MS,
            failed_retention_ms: DEFAULT_FAILED_RETENTION_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level when `RUST_LOG` is unset: trace, debug, info, warn, error.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load configuration from `path`, then apply environment overrides. A
/// missing file is fine; defaults fill every gap.
pub fn load(path: &Path) -> Result<AppConfig> {
    let built = Config::builder()
        .set_default("server.origin", DEFAULT_ORIGIN)?
        .set_default("logging.level", "info")?
        .add_source(File::from(path).format(FileFormat::Toml).required(false))
        .add_source(
            Environment::with_prefix(env_prefix().as_str())
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: AppConfig = built.try_deserialize()?;
    Ok(config)
}

/// Load configuration, writing a commented default file first if none exists.
pub fn load_or_init(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        write_default_config(path)?;
    }
    load(path)
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push('\n');
    buffer
}

pub fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        let mut path = PathBuf::from(dir);
        path.push(APP_NAME);
        return Ok(path);
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

pub fn default_config_file() -> Result<PathBuf> {
    Ok(default_config_dir()?.join("config.toml"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::error::EvidenceError;

/// Environment variable naming the optional TOML config file.
pub const CONFIG_PATH_VAR: &str = "EVIDENCE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "evidence.toml";
/// Longest accepted anchor window: one leap year.
pub const MAX_PERIOD_SECS: u64 = 366 * 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub chain: ChainConfig,
    pub anchor: AnchorConfig,
    pub ots: OtsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Attempts per event when another writer takes the sequence number.
    pub max_append_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub enabled: bool,
    /// Window length; 86400 anchors one UTC day per anchor.
    pub period_secs: u64,
    /// Earlier windows re-checked on every wake so missed ticks get anchored.
    pub catch_up_windows: u32,
    /// Pause after a boundary before collecting, for in-flight writes to land.
    pub settle_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtsConfig {
    pub enabled: bool,
    pub calendar_url: String,
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://evidence.db".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            chain: ChainConfig::default(),
            anchor: AnchorConfig::default(),
            ots: OtsConfig::default(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_append_retries: 5,
        }
    }
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: 86_400,
            catch_up_windows: 7,
            settle_delay_secs: 5,
        }
    }
}

impl Default for OtsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            calendar_url: "https://alice.btc.calendar.opentimestamps.org".to_string(),
            timeout_secs: 30,
        }
    }
}

impl AnchorConfig {
    /// Window length, clamped to `MAX_PERIOD_SECS` for unvalidated configs.
    pub fn period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.period_secs.min(MAX_PERIOD_SECS) as i64)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

impl OtsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Defaults, then the TOML file named by `EVIDENCE_CONFIG` (or
    /// `evidence.toml`) if present, then `EVIDENCE__*` environment variables.
    pub fn load() -> Result<Self, EvidenceError> {
        let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_sources(Some(Path::new(&path)), true)
    }

    pub fn from_sources(file: Option<&Path>, with_env: bool) -> Result<Self, EvidenceError> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }
        if with_env {
            builder = builder.add_source(
                Environment::with_prefix("EVIDENCE")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EvidenceError> {
        if self.anchor.period_secs == 0 || self.anchor.period_secs > MAX_PERIOD_SECS {
            return Err(EvidenceError::Config(format!(
                "anchor.period_secs must be between 1 and {}, got {}",
                MAX_PERIOD_SECS, self.anchor.period_secs
            )));
        }
        if self.chain.max_append_retries == 0 {
            return Err(EvidenceError::Config(
                "chain.max_append_retries must be at least 1".to_string(),
            ));
        }
        if self.ots.enabled && self.ots.calendar_url.is_empty() {
            return Err(EvidenceError::Config(
                "ots.calendar_url is required when ots.enabled is set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

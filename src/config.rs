use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Longest delayed-relay hold.
pub const MAX_VISCOUS_DELAY_SECONDS: u64 = 9;

/// Upper bound for every `*_seconds` setting (one week).
pub const MAX_SECONDS: u64 = 7 * 24 * 3600;

/// Regular expression deny lists, compiled into
/// [`FilterConfig`](crate::aprs_filters::FilterConfig) at start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default)]
    pub source: Vec<String>,
    #[serde(default)]
    pub destination: Vec<String>,
    #[serde(default)]
    pub via: Vec<String>,
    #[serde(default)]
    pub data: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DupecheckSettings {
    #[serde(default = "default_dupe_retention")]
    pub retention_seconds: u64,
    #[serde(default = "default_dupe_sweep")]
    pub sweep_interval_seconds: u64,
    /// Hold the first copy this long before relaying; 0 disables.
    #[serde(default)]
    pub viscous_delay_seconds: u64,
}

fn default_dupe_retention() -> u64 {
    30
}

fn default_dupe_sweep() -> u64 {
    30
}

impl Default for DupecheckSettings {
    fn default() -> Self {
        Self {
            retention_seconds: default_dupe_retention(),
            sweep_interval_seconds: default_dupe_sweep(),
            viscous_delay_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default = "default_history_retention")]
    pub retention_seconds: u64,
    #[serde(default = "default_history_grace")]
    pub grace_seconds: u64,
    #[serde(default = "default_history_sweep")]
    pub sweep_interval_seconds: u64,
}

fn default_history_retention() -> u64 {
    3600
}

fn default_history_grace() -> u64 {
    300
}

fn default_history_sweep() -> u64 {
    60
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            retention_seconds: default_history_retention(),
            grace_seconds: default_history_grace(),
            sweep_interval_seconds: default_history_sweep(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_max_buffers")]
    pub max_buffers: usize,
}

fn default_max_buffers() -> usize {
    4096
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_buffers: default_max_buffers(),
        }
    }
}

/// Top-level gateway configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Validate TNC2 callsigns with the AX.25 rules instead of the APRS-IS ones
    #[serde(default)]
    pub strict_callsigns: bool,
    #[serde(default)]
    pub filters: FilterSettings,
    #[serde(default)]
    pub dupecheck: DupecheckSettings,
    #[serde(default)]
    pub history: HistorySettings,
    #[serde(default)]
    pub pool: PoolSettings,
}

impl GatewayConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: GatewayConfig =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a TOML file, or use defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a TOML file (atomic: write to .tmp then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &contents)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", tmp_path, path))?;
        Ok(())
    }

    /// Reject settings the gateway cannot run with. [`load`](Self::load)
    /// and `Gateway::new` both call this.
    pub fn validate(&self) -> Result<()> {
        let bounded = [
            ("dupecheck.retention_seconds", self.dupecheck.retention_seconds),
            ("dupecheck.sweep_interval_seconds", self.dupecheck.sweep_interval_seconds),
            ("history.retention_seconds", self.history.retention_seconds),
            ("history.grace_seconds", self.history.grace_seconds),
            ("history.sweep_interval_seconds", self.history.sweep_interval_seconds),
        ];
        for (name, value) in bounded {
            if value > MAX_SECONDS {
                anyhow::bail!("{} ({}) must be at most {}", name, value, MAX_SECONDS);
            }
        }
        if self.history.grace_seconds >= self.history.retention_seconds {
            anyhow::bail!(
                "history.grace_seconds ({}) must be less than history.retention_seconds ({})",
                self.history.grace_seconds,
                self.history.retention_seconds
            );
        }
        if self.dupecheck.retention_seconds == 0 {
            anyhow::bail!("dupecheck.retention_seconds must be positive");
        }
        let delay = self.dupecheck.viscous_delay_seconds;
        if delay > MAX_VISCOUS_DELAY_SECONDS {
            anyhow::bail!(
                "dupecheck.viscous_delay_seconds ({}) must be at most {}",
                delay,
                MAX_VISCOUS_DELAY_SECONDS
            );
        }
        // held packets are released on a 1 s tick and dropped at expiry
        if delay > 0 && delay + 2 > self.dupecheck.retention_seconds {
            anyhow::bail!(
                "dupecheck.viscous_delay_seconds ({}) must be at least 2 less than dupecheck.retention_seconds ({})",
                delay,
                self.dupecheck.retention_seconds
            );
        }
        if self.pool.max_buffers == 0 {
            anyhow::bail!("pool.max_buffers must be positive");
        }
        Ok(())
    }
}

/// Resolve the gateway config file path.
///
/// Priority:
/// 1. `APRS_GATEWAY_CONFIG` env var
/// 2. `./aprs-gateway.toml`
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("APRS_GATEWAY_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("./aprs-gateway.toml")
}

//! JSON configuration tree. `#[serde(deny_unknown_fields)]` throughout so a
//! typo in a config file fails loudly at startup instead of being silently
//! ignored, the way the teacher's preset loader validates its own inputs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::MarketPair;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("config has no market_pairs entries")]
    NoPairs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringConfig {
    #[serde(default = "default_polling_interval_seconds")]
    pub polling_interval_seconds: u64,
    /// `None` means run until interrupted.
    #[serde(default)]
    pub monitoring_duration_hours: Option<f64>,
    /// How often the Checkpointer persists `window_state.json` (spec.md
    /// §4.8 says "every 5 minutes (configurable)").
    #[serde(default = "default_checkpoint_interval_seconds")]
    pub checkpoint_interval_seconds: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            polling_interval_seconds: default_polling_interval_seconds(),
            monitoring_duration_hours: None,
            checkpoint_interval_seconds: default_checkpoint_interval_seconds(),
        }
    }
}

fn default_polling_interval_seconds() -> u64 {
    2
}

fn default_checkpoint_interval_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostAssumptions {
    #[serde(default)]
    pub gas_fee_per_trade_usd: f64,
}

impl Default for CostAssumptions {
    fn default() -> Self {
        Self {
            gas_fee_per_trade_usd: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VenueUrls {
    pub venue_a_base_url: String,
    pub venue_b_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub market_pairs: Vec<MarketPair>,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub cost_assumptions: CostAssumptions,
    pub venues: VenueUrls,
    /// Passed through untouched — alert-channel wiring is out of scope here,
    /// but an operator's config file may still carry it for other tooling.
    #[serde(default)]
    pub alerting: serde_json::Value,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        if config.market_pairs.is_empty() {
            return Err(ConfigError::NoPairs);
        }
        Ok(config)
    }
}

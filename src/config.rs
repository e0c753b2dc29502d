// 7.0 config.rs: settings file. engine behaviour, logging, oracle guard and the
// markets to create at start-up, all from one TOML document.
//
// [engine]
// shortfall_policy = "protocol_absorbs"
// max_events = 100000
//
// [logging]
// level = "info"
// format = "pretty"
//
// [oracle]
// max_price_age_secs = 60
//
// [[markets]]
// id = 1
// symbol = "BTC-PERP"
// max_leverage = 20
// ...

use crate::engine::EngineConfig;
use crate::market::{MarketError, MarketParams};
use crate::types::MarketId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("market {symbol}: {source}")]
    InvalidMarket {
        symbol: String,
        #[source]
        source: MarketError,
    },
}

/** 7.1: top-level settings */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    pub oracle: OracleSettings,
    pub markets: Vec<MarketPreset>,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_events == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.max_events",
                reason: "must be at least 1".into(),
            });
        }
        if let Some(age) = self.oracle.max_price_age_secs {
            if age < 0 {
                return Err(ConfigError::InvalidValue {
                    field: "oracle.max_price_age_secs",
                    reason: format!("must not be negative, got {age}"),
                });
            }
        }
        let mut seen = HashSet::new();
        for preset in &self.markets {
            if !seen.insert(preset.id) {
                return Err(ConfigError::InvalidValue {
                    field: "markets.id",
                    reason: format!("duplicate market id {}", preset.id),
                });
            }
            preset
                .params()
                .validate()
                .map_err(|source| ConfigError::InvalidMarket {
                    symbol: preset.symbol.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber. RUST_LOG overrides `level`. A second call is ignored.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        let _ = match self.format.as_str() {
            "json" => fmt().json().with_env_filter(filter).try_init(),
            _ => fmt().with_env_filter(filter).try_init(),
        };
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    /// Reject prices older than this. None accepts any age.
    pub max_price_age_secs: Option<i64>,
}

/// One market to create at start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPreset {
    pub id: u32,
    pub symbol: String,
    pub max_leverage: u16,
    pub maintenance_margin_bps: u16,
    #[serde(default)]
    pub max_funding_rate: Option<i64>,
    #[serde(default)]
    pub funding_interval_secs: Option<i64>,
    #[serde(default)]
    pub liquidation_fee_bps: Option<u16>,
}

impl MarketPreset {
    pub fn market_id(&self) -> MarketId {
        MarketId(self.id)
    }

    pub fn params(&self) -> MarketParams {
        let defaults = MarketParams::default();
        MarketParams {
            max_leverage: self.max_leverage,
            maintenance_margin_bps: self.maintenance_margin_bps,
            max_funding_rate: self.max_funding_rate.unwrap_or(defaults.max_funding_rate),
            funding_interval_secs: self
                .funding_interval_secs
                .unwrap_or(defaults.funding_interval_secs),
            liquidation_fee_bps: self.liquidation_fee_bps.unwrap_or(defaults.liquidation_fee_bps),
        }
    }

    pub fn btc_perp() -> Self {
        Self {
            id: 1,
            symbol: "BTC-PERP".into(),
            max_leverage: 20,
            maintenance_margin_bps: 500,
            max_funding_rate: None,
            funding_interval_secs: None,
            liquidation_fee_bps: None,
        }
    }
}

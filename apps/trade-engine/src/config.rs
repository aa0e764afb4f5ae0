//! Bot configuration: serde model, validation, and YAML loading.
//!
//! The runtime configuration normally arrives through
//! [`crate::application::ports::PersistencePort::get_current_config`];
//! the YAML loader exists for bootstrap and tests.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::market::Timeframe;
use crate::domain::trade::{Direction, Pair};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Master switch; a disabled bot skips every cycle.
    pub enabled: bool,
    /// Trading pair.
    pub pair: Pair,
    /// Position direction this instance trades.
    pub direction: Direction,
    /// Timeframe the strategy signals on.
    pub signal_timeframe: Timeframe,
    /// Strategy collaborator configuration, passed through opaquely.
    #[serde(default)]
    pub strategy: serde_json::Value,
    /// Risk configuration.
    pub risk: RiskConfig,
    /// Execution configuration.
    pub execution: ExecutionConfig,
    /// Exit configuration.
    pub exit: ExitConfig,
    /// Config metadata.
    pub meta: MetaConfig,
}

/// Risk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Max tolerated loss per trade, percent of entry price.
    pub max_loss_per_trade_pct: Decimal,
    /// Daily trade-count cap per pair.
    pub max_trades_per_day: u32,
    /// Position-size multiplier in a VOLATILE regime.
    #[serde(default = "default_volatile_size_multiplier")]
    pub volatile_size_multiplier: Decimal,
    /// Position-size multiplier in a STORM regime.
    #[serde(default = "default_storm_size_multiplier")]
    pub storm_size_multiplier: Decimal,
}

/// Execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// PAPER or LIVE.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Baseline slippage tolerance, basis points.
    pub slippage_bps: u32,
    /// Minimum quote notional worth submitting.
    pub min_notional: Decimal,
    /// Restrict routing to direct routes only.
    #[serde(default)]
    pub only_direct_routes: bool,
}

/// Execution mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Simulated fills against live quotes.
    #[default]
    Paper,
    /// Real money.
    Live,
}

/// Exit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Take-profit distance as a multiple of entry-to-stop risk.
    pub take_profit_r_multiple: Decimal,
}

/// Config metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Monotonically increasing config version.
    pub config_version: u32,
    /// Operator note describing this version.
    pub note: String,
}

const fn default_volatile_size_multiplier() -> Decimal {
    dec!(0.75)
}

const fn default_storm_size_multiplier() -> Decimal {
    dec!(0.50)
}

/// Load configuration from a YAML file.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed, or
/// validated.
pub fn load_config(path: &str) -> Result<BotConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;
    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<BotConfig, ConfigError> {
    let config: BotConfig = serde_yaml_bw::from_str(yaml)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate cross-field constraints.
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` naming the first violated
/// constraint.
pub fn validate_config(config: &BotConfig) -> Result<(), ConfigError> {
    if config.risk.max_loss_per_trade_pct <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "risk.max_loss_per_trade_pct must be positive".to_string(),
        ));
    }
    if config.risk.max_trades_per_day == 0 {
        return Err(ConfigError::ValidationError(
            "risk.max_trades_per_day must be positive".to_string(),
        ));
    }
    for (name, multiplier) in [
        ("risk.volatile_size_multiplier", config.risk.volatile_size_multiplier),
        ("risk.storm_size_multiplier", config.risk.storm_size_multiplier),
    ] {
        if multiplier <= Decimal::ZERO || multiplier > Decimal::ONE {
            return Err(ConfigError::ValidationError(format!(
                "{name} must be > 0 and <= 1"
            )));
        }
    }
    if config.risk.storm_size_multiplier > config.risk.volatile_size_multiplier {
        return Err(ConfigError::ValidationError(
            "risk.storm_size_multiplier must be <= risk.volatile_size_multiplier".to_string(),
        ));
    }
    if config.execution.slippage_bps == 0 {
        return Err(ConfigError::ValidationError(
            "execution.slippage_bps must be positive".to_string(),
        ));
    }
    if config.execution.min_notional <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "execution.min_notional must be positive".to_string(),
        ));
    }
    if config.exit.take_profit_r_multiple <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "exit.take_profit_r_multiple must be positive".to_string(),
        ));
    }
    if config.meta.config_version == 0 {
        return Err(ConfigError::ValidationError(
            "meta.config_version must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_YAML: &str = r"
enabled: true
pair: SOL/USDC
direction: LONG
signal_timeframe: 4h
risk:
  max_loss_per_trade_pct: 2.0
  max_trades_per_day: 3
execution:
  mode: PAPER
  slippage_bps: 50
  min_notional: 20.0
  only_direct_routes: false
exit:
  take_profit_r_multiple: 2.0
meta:
  config_version: 2
  note: baseline
";

    #[test]
    fn parses_valid_yaml_with_defaults() {
        let config = load_config_from_string(VALID_YAML).unwrap();
        assert!(config.enabled);
        assert_eq!(config.pair.as_str(), "SOL/USDC");
        assert_eq!(config.direction, Direction::Long);
        assert_eq!(config.signal_timeframe, Timeframe::H4);
        assert_eq!(config.risk.volatile_size_multiplier, dec!(0.75));
        assert_eq!(config.risk.storm_size_multiplier, dec!(0.50));
        assert_eq!(config.execution.mode, ExecutionMode::Paper);
    }

    #[test]
    fn rejects_zero_slippage() {
        let yaml = VALID_YAML.replace("slippage_bps: 50", "slippage_bps: 0");
        let error = load_config_from_string(&yaml).unwrap_err();
        assert!(error.to_string().contains("slippage_bps"));
    }

    #[test]
    fn rejects_storm_multiplier_above_volatile() {
        let yaml = VALID_YAML.replace(
            "max_trades_per_day: 3",
            "max_trades_per_day: 3\n  volatile_size_multiplier: 0.5\n  storm_size_multiplier: 0.9",
        );
        let error = load_config_from_string(&yaml).unwrap_err();
        assert!(error.to_string().contains("storm_size_multiplier"));
    }

    #[test]
    fn rejects_unknown_timeframe() {
        let yaml = VALID_YAML.replace("signal_timeframe: 4h", "signal_timeframe: 3h");
        assert!(load_config_from_string(&yaml).is_err());
    }
}

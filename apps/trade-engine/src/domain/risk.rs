//! Risk arithmetic: max-loss stops, structural-stop tightening,
//! R-multiple targets, and regime-based position sizing.

use std::collections::BTreeMap;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::trade::Direction;

/// Risk arithmetic errors. These indicate bad inputs, not market
/// conditions.
#[derive(Debug, Error)]
pub enum RiskError {
    /// Entry price must be positive.
    #[error("entry_price must be greater than 0")]
    NonPositiveEntryPrice,
    /// Max-loss percentage must be positive.
    #[error("max_loss_pct must be greater than 0")]
    NonPositiveMaxLossPct,
    /// R-multiple must be positive.
    #[error("r_multiple must be greater than 0")]
    NonPositiveRMultiple,
    /// The stop must sit on the losing side of the entry.
    #[error("stop_price {stop} is not beyond entry_price {entry} for {direction}")]
    StopNotBeyondEntry {
        /// Entry price.
        entry: Decimal,
        /// Stop price.
        stop: Decimal,
        /// Position direction.
        direction: Direction,
    },
}

/// Detected volatility regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityRegime {
    /// Baseline conditions.
    Normal,
    /// Elevated volatility, reduced sizing.
    Volatile,
    /// Extreme volatility, sizing may be disabled.
    Storm,
}

impl VolatilityRegime {
    /// Record string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Volatile => "VOLATILE",
            Self::Storm => "STORM",
        }
    }
}

impl std::fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy diagnostics bag attached to a signal.
pub type Diagnostics = BTreeMap<String, serde_json::Value>;

/// Resolve the volatility regime and position-size multiplier from
/// signal diagnostics.
///
/// Unknown regimes fall back to `NORMAL`; a missing, non-numeric, or
/// negative multiplier falls back to `1.0`. A multiplier of exactly
/// zero is honored (entry disabled for the regime).
#[must_use]
pub fn resolve_regime_and_multiplier(diagnostics: &Diagnostics) -> (VolatilityRegime, Decimal) {
    let regime = match diagnostics.get("volatility_regime").and_then(|v| v.as_str()) {
        Some("VOLATILE") => VolatilityRegime::Volatile,
        Some("STORM") => VolatilityRegime::Storm,
        _ => VolatilityRegime::Normal,
    };
    let multiplier = diagnostics
        .get("position_size_multiplier")
        .and_then(serde_json::Value::as_f64)
        .and_then(Decimal::from_f64)
        .filter(|m| !m.is_sign_negative())
        .unwrap_or(Decimal::ONE);
    (regime, multiplier)
}

/// Percentage-based max-loss stop for the given direction.
pub fn max_loss_stop_price(
    entry_price: Decimal,
    max_loss_pct: Decimal,
    direction: Direction,
) -> Result<Decimal, RiskError> {
    if entry_price <= Decimal::ZERO {
        return Err(RiskError::NonPositiveEntryPrice);
    }
    if max_loss_pct <= Decimal::ZERO {
        return Err(RiskError::NonPositiveMaxLossPct);
    }
    let ratio = max_loss_pct / dec!(100);
    Ok(match direction {
        Direction::Long => entry_price * (Decimal::ONE - ratio),
        Direction::Short => entry_price * (Decimal::ONE + ratio),
    })
}

/// Tighten the max-loss stop against the strategy's structural stop,
/// taking the more conservative of the two per direction.
///
/// A structural stop ending up on the wrong side of the entry (the
/// fill moved past it) is discarded in favor of the percentage stop.
pub fn tighten_stop(
    entry_price: Decimal,
    structural_stop: Decimal,
    max_loss_pct: Decimal,
    direction: Direction,
) -> Result<Decimal, RiskError> {
    let pct_stop = max_loss_stop_price(entry_price, max_loss_pct, direction)?;
    let tightened = match direction {
        Direction::Long => structural_stop.max(pct_stop),
        Direction::Short => structural_stop.min(pct_stop),
    };
    let invalid = match direction {
        Direction::Long => tightened >= entry_price,
        Direction::Short => tightened <= entry_price,
    };
    Ok(if invalid { pct_stop } else { tightened })
}

/// Take-profit price at `r_multiple` times the entry-to-stop risk.
pub fn take_profit_price(
    entry_price: Decimal,
    stop_price: Decimal,
    r_multiple: Decimal,
    direction: Direction,
) -> Result<Decimal, RiskError> {
    if r_multiple <= Decimal::ZERO {
        return Err(RiskError::NonPositiveRMultiple);
    }
    let valid = match direction {
        Direction::Long => entry_price > stop_price,
        Direction::Short => stop_price > entry_price,
    };
    if !valid {
        return Err(RiskError::StopNotBeyondEntry {
            entry: entry_price,
            stop: stop_price,
            direction,
        });
    }
    let one_r = (entry_price - stop_price).abs();
    Ok(match direction {
        Direction::Long => entry_price + one_r * r_multiple,
        Direction::Short => entry_price - one_r * r_multiple,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(pairs: &[(&str, serde_json::Value)]) -> Diagnostics {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn regime_defaults_to_normal_and_one() {
        let (regime, multiplier) = resolve_regime_and_multiplier(&Diagnostics::new());
        assert_eq!(regime, VolatilityRegime::Normal);
        assert_eq!(multiplier, Decimal::ONE);
    }

    #[test]
    fn zero_multiplier_is_honored() {
        let diagnostics = diag(&[
            ("volatility_regime", serde_json::json!("STORM")),
            ("position_size_multiplier", serde_json::json!(0.0)),
        ]);
        let (regime, multiplier) = resolve_regime_and_multiplier(&diagnostics);
        assert_eq!(regime, VolatilityRegime::Storm);
        assert_eq!(multiplier, Decimal::ZERO);
    }

    #[test]
    fn negative_multiplier_falls_back_to_one() {
        let diagnostics = diag(&[("position_size_multiplier", serde_json::json!(-0.5))]);
        let (_, multiplier) = resolve_regime_and_multiplier(&diagnostics);
        assert_eq!(multiplier, Decimal::ONE);
    }

    #[test]
    fn long_stop_takes_the_higher_of_swing_and_pct() {
        // entry 100, 2% max loss -> pct stop 98; swing 98.5 is tighter.
        let stop = tighten_stop(dec!(100), dec!(98.5), dec!(2), Direction::Long).unwrap();
        assert_eq!(stop, dec!(98.5));

        // swing 95 is looser than the pct stop.
        let stop = tighten_stop(dec!(100), dec!(95), dec!(2), Direction::Long).unwrap();
        assert_eq!(stop, dec!(98.00));
    }

    #[test]
    fn long_stop_above_entry_reverts_to_pct_stop() {
        let stop = tighten_stop(dec!(100), dec!(101), dec!(2), Direction::Long).unwrap();
        assert_eq!(stop, dec!(98.00));
    }

    #[test]
    fn short_stop_takes_the_lower_of_swing_and_pct() {
        // entry 100, 2% -> pct stop 102; swing high 101.5 is tighter.
        let stop = tighten_stop(dec!(100), dec!(101.5), dec!(2), Direction::Short).unwrap();
        assert_eq!(stop, dec!(101.5));
    }

    #[test]
    fn take_profit_scales_risk_by_r() {
        let tp = take_profit_price(dec!(100), dec!(98), dec!(2), Direction::Long).unwrap();
        assert_eq!(tp, dec!(104));

        let tp = take_profit_price(dec!(100), dec!(102), dec!(1.5), Direction::Short).unwrap();
        assert_eq!(tp, dec!(97.0));
    }

    #[test]
    fn take_profit_rejects_stop_on_wrong_side() {
        assert!(take_profit_price(dec!(100), dec!(101), dec!(2), Direction::Long).is_err());
        assert!(take_profit_price(dec!(100), dec!(99), dec!(2), Direction::Short).is_err());
    }
}

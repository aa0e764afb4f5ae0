//! Strategy Port (Driven Port)
//!
//! The signal-computation collaborator. Indicator math lives behind
//! this boundary; the engine only consumes its decision.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::BotConfig;
use crate::domain::market::OhlcvBar;
use crate::domain::risk::Diagnostics;

/// Strategy evaluation error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Strategy error: {message}")]
pub struct StrategyError {
    /// Error details.
    pub message: String,
}

impl StrategyError {
    /// Wrap a raw message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An entry signal produced by the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    /// One-line human summary of the signal.
    pub summary: String,
    /// Proposed entry price.
    pub entry_price: Decimal,
    /// Structural stop (swing-low for long, swing-high for short).
    pub stop_price: Decimal,
    /// Proposed target.
    pub take_profit_price: Decimal,
    /// Regime and indicator diagnostics.
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

/// Outcome of one strategy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyDecision {
    /// Open a position.
    Enter(EntrySignal),
    /// Stay flat on this bar.
    NoSignal {
        /// One-line human summary of why not.
        summary: String,
        /// Regime and indicator diagnostics.
        #[serde(default)]
        diagnostics: Diagnostics,
    },
}

/// Port for the strategy collaborator.
#[async_trait]
pub trait StrategyPort: Send + Sync {
    /// Evaluate the bars under the given configuration.
    async fn evaluate(
        &self,
        bars: &[OhlcvBar],
        config: &BotConfig,
    ) -> Result<StrategyDecision, StrategyError>;
}

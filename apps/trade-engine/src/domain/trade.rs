//! Trade record and its nested snapshots.
//!
//! A [`Trade`] is one attempted or realized position. It is created by
//! the entry orchestrator, mutated only by the entry/exit
//! orchestrators, and never deleted: terminal states are final
//! snapshots. Persistence-side updates travel as a [`TradePatch`] with
//! merge-not-replace semantics.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::TradeState;

/// Trading pair, e.g. `SOL/USDC`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pair(String);

impl Pair {
    /// Create a pair from its `BASE/QUOTE` string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The pair as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Hold base, profit on price rising.
    Long,
    /// Hold quote, profit on price falling.
    Short,
}

impl Direction {
    /// Record string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    /// Target price reached.
    TakeProfit,
    /// Stop price breached.
    StopLoss,
}

impl CloseReason {
    /// Record string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TakeProfit => "TAKE_PROFIT",
            Self::StopLoss => "STOP_LOSS",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of the strategy decision that created the trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    /// One-line human summary of the signal.
    pub summary: String,
    /// Close time of the bar the signal fired on.
    pub bar_close_time: DateTime<Utc>,
    /// Price the strategy wanted to enter at.
    pub entry_price: Decimal,
    /// Structural stop proposed by the strategy.
    pub stop_price: Decimal,
    /// Target proposed by the strategy.
    pub take_profit_price: Decimal,
}

/// Sizing snapshot; mutable only before confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    /// One-line human summary of the plan.
    pub summary: String,
    /// Quote-currency value of the position size.
    pub notional: Decimal,
    /// Planned (later reconciled) entry price.
    pub entry_price: Decimal,
    /// Planned (later reconciled) stop price.
    pub stop_price: Decimal,
    /// Planned (later reconciled) target price.
    pub take_profit_price: Decimal,
    /// Take-profit distance as a multiple of entry-to-stop risk.
    pub r_multiple: Decimal,
}

/// Submission state of one leg's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
    /// Broadcast, confirmation pending.
    Submitted,
    /// Confirmed on-chain.
    Confirmed,
    /// Not confirmed within this attempt's budget.
    Failed,
}

/// Fill status reported by (or estimated for) the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillStatus {
    /// Derived from the quote, not observed on-chain.
    Estimated,
    /// Observed on-chain.
    Confirmed,
}

/// Fill outcome of one swap leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    /// Whether the numbers are estimated or confirmed.
    pub status: FillStatus,
    /// Average execution price (quote per base).
    pub avg_fill_price: Decimal,
    /// Quote amount spent or received.
    pub quote_amount: Decimal,
    /// Base amount filled.
    pub base_amount: Decimal,
}

/// Mutable execution bag: per-leg signatures, errors, fills, fees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// Entry transaction signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_tx_signature: Option<String>,
    /// Exit transaction signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_tx_signature: Option<String>,
    /// Submission state of the exit leg.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_submission_state: Option<SubmissionState>,
    /// Last entry-leg error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_error: Option<String>,
    /// Last exit-leg error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_error: Option<String>,
    /// Entry fill outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_result: Option<FillResult>,
    /// Exit fill outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_result: Option<FillResult>,
    /// Network fee paid for the entry transaction, in base atomic units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_fee_atomic: Option<u64>,
    /// Network fee paid for the exit transaction, in base atomic units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_fee_atomic: Option<u64>,
}

/// Open/closed marker on the position snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    /// Position is (intended to be) held.
    Open,
    /// Position is flat.
    Closed,
}

/// Mutable position bag: realized size and live risk levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Open/closed marker. `Closed` implies trade state `CLOSED` for
    /// realized positions, or a canceled entry.
    pub status: PositionStatus,
    /// Realized base quantity.
    pub quantity: Decimal,
    /// Realized quote amount (spent on entry for longs, received for shorts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_amount: Option<Decimal>,
    /// Price that triggered the entry decision.
    pub entry_trigger_price: Decimal,
    /// Actual (or planned, pre-fill) entry price.
    pub entry_price: Decimal,
    /// Live stop price.
    pub stop_price: Decimal,
    /// Live target price.
    pub take_profit_price: Decimal,
    /// When the entry confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_time: Option<DateTime<Utc>>,
    /// Reconciled exit fill price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<Decimal>,
    /// Price that triggered the exit decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_trigger_price: Option<Decimal>,
    /// When the exit confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<DateTime<Utc>>,
}

/// One attempted or realized position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Deterministic id: bar close time + model id + side.
    pub trade_id: String,
    /// Strategy model that produced the trade.
    pub model_id: String,
    /// Close time of the decision bar.
    pub bar_close_time: DateTime<Utc>,
    /// Trading pair.
    pub pair: Pair,
    /// Position direction.
    pub direction: Direction,
    /// Lifecycle state; changes only via the transition table.
    pub state: TradeState,
    /// Config version the trade was made under.
    pub config_version: u32,
    /// Strategy decision snapshot.
    pub signal: SignalSnapshot,
    /// Sizing snapshot.
    pub plan: PlanSnapshot,
    /// Execution bag.
    pub execution: ExecutionSnapshot,
    /// Position bag.
    pub position: PositionSnapshot,
    /// Why the position was closed, once it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReason>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Typed partial update for a [`Trade`].
///
/// Merge-not-replace: `None` fields never overwrite persisted values;
/// nested snapshots replace as whole values (they are always written
/// as complete snapshots by the orchestrators).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradePatch {
    /// New lifecycle state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TradeState>,
    /// Replacement plan snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanSnapshot>,
    /// Replacement execution snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionSnapshot>,
    /// Replacement position snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionSnapshot>,
    /// Close reason, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReason>,
    /// Update timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TradePatch {
    /// Apply the patch to a trade, skipping absent fields.
    pub fn apply_to(&self, trade: &mut Trade) {
        if let Some(state) = self.state {
            trade.state = state;
        }
        if let Some(plan) = &self.plan {
            trade.plan = plan.clone();
        }
        if let Some(execution) = &self.execution {
            trade.execution = execution.clone();
        }
        if let Some(position) = &self.position {
            trade.position = position.clone();
        }
        if let Some(close_reason) = self.close_reason {
            trade.close_reason = Some(close_reason);
        }
        if let Some(updated_at) = self.updated_at {
            trade.updated_at = updated_at;
        }
    }
}

/// Build the deterministic trade id from its identity triple.
#[must_use]
pub fn build_trade_id(
    bar_close_time: DateTime<Utc>,
    model_id: &str,
    direction: Direction,
) -> String {
    let safe_model_id: String = model_id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}_{}_{}",
        bar_close_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        safe_model_id,
        direction
    )
}

#[cfg(test)]
pub(crate) use tests::sample_trade;

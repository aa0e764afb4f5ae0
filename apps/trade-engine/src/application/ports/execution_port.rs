//! Execution Port (Driven Port)
//!
//! Interface to the swap venue: quote+submit, confirmation, mark
//! price, balances, and best-effort fee lookup. Amounts crossing this
//! boundary are always integer atomic units.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::classify::{classify_execution_error, ErrorAction, ErrorClassification, ErrorKind};
use crate::domain::trade::{FillResult, Pair};

/// Side of a swap, expressed against the base token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapSide {
    /// Spend quote atomic units to acquire base.
    BuyBase,
    /// Sell base atomic units for quote.
    SellBase,
}

/// Request to submit a swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitSwapRequest {
    /// Swap side.
    pub side: SwapSide,
    /// Amount in atomic units of the spent token (quote for
    /// [`SwapSide::BuyBase`], base for [`SwapSide::SellBase`]).
    pub amount_atomic: u64,
    /// Slippage tolerance, basis points.
    pub slippage_bps: u32,
    /// Restrict routing to direct routes only.
    pub only_direct_routes: bool,
}

/// Acknowledgment after a swap is broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapSubmission {
    /// Transaction signature.
    pub tx_signature: String,
    /// Input amount in atomic units of the spent token.
    pub in_amount_atomic: u64,
    /// Output amount in atomic units of the received token.
    pub out_amount_atomic: u64,
    /// Venue order payload, when one is returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<serde_json::Value>,
    /// Venue fill result, when already known at submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FillResult>,
}

/// Confirmation outcome for a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapConfirmation {
    /// Whether the transaction confirmed within the timeout.
    pub confirmed: bool,
    /// Venue/RPC error text when not confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Execution port error, carrying its classification.
///
/// Built from the raw venue/RPC message so orchestrators can match on
/// the classified action instead of re-parsing strings.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{raw_message}")]
pub struct ExecutionError {
    /// Raw error message as received.
    pub raw_message: String,
    /// Classification of the message.
    pub classification: ErrorClassification,
}

impl ExecutionError {
    /// Classify a raw venue/RPC error message.
    #[must_use]
    pub fn from_raw(raw_message: impl Into<String>) -> Self {
        let raw_message = raw_message.into();
        let classification = classify_execution_error(&raw_message);
        Self {
            raw_message,
            classification,
        }
    }

    /// Failure category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.classification.kind
    }

    /// Recommended action.
    #[must_use]
    pub const fn action(&self) -> ErrorAction {
        self.classification.action
    }
}

/// Port for swap venue interactions.
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    /// Quote and broadcast a swap.
    async fn submit_swap(&self, request: SubmitSwapRequest)
        -> Result<SwapSubmission, ExecutionError>;

    /// Await confirmation of a broadcast transaction, bounded by
    /// `timeout_ms`.
    async fn confirm_swap(
        &self,
        tx_signature: &str,
        timeout_ms: u64,
    ) -> Result<SwapConfirmation, ExecutionError>;

    /// Current mark price for the pair, quote per base.
    async fn get_mark_price(&self, pair: &Pair) -> Result<Decimal, ExecutionError>;

    /// Available quote balance, whole units.
    async fn get_available_quote_balance(&self, pair: &Pair) -> Result<Decimal, ExecutionError>;

    /// Available base balance, whole units.
    async fn get_available_base_balance(&self, pair: &Pair) -> Result<Decimal, ExecutionError>;

    /// Network fee paid by a confirmed transaction, in base atomic
    /// units. `Ok(None)` when the venue cannot provide it.
    async fn get_transaction_fee(&self, tx_signature: &str) -> Result<Option<u64>, ExecutionError>;
}

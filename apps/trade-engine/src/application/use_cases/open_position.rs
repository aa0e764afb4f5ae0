//! Open Position Use Case (entry orchestrator)
//!
//! Sizes, submits, confirms, and reconciles a new position. Every
//! attempt is persisted, including rejected ones: the trade record is
//! created in CREATED before any validation can fail, so the ledger
//! shows what the bot tried and why it stopped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::application::ports::execution_port::{
    ExecutionError, ExecutionPort, SubmitSwapRequest, SwapSide, SwapSubmission,
};
use crate::application::ports::lock_port::LockPort;
use crate::application::ports::persistence_port::PersistencePort;
use crate::application::ports::strategy_port::EntrySignal;
use crate::application::use_cases::{
    persist_execution_only, transition_and_persist, OrchestrationError,
};
use crate::classify::{
    is_non_retriable_error_message, summarize_error_for_log, ErrorKind,
    DEFAULT_ERROR_SUMMARY_LENGTH,
};
use crate::config::BotConfig;
use crate::domain::market::{
    atomic_to_base, atomic_to_quote, base_to_atomic, quote_to_atomic, MarketError,
};
use crate::domain::risk::{resolve_regime_and_multiplier, take_profit_price, tighten_stop};
use crate::domain::slippage::entry_slippage_bps;
use crate::domain::state::TradeState;
use crate::domain::trade::{
    build_trade_id, Direction, ExecutionSnapshot, FillResult, FillStatus, PlanSnapshot,
    PositionSnapshot, PositionStatus, SignalSnapshot, Trade,
};

/// Fixed number of submission attempts per entry.
pub const ENTRY_RETRY_ATTEMPTS: u32 = 3;
/// Fixed delay between entry attempts; no backoff.
pub const ENTRY_RETRY_DELAY: Duration = Duration::from_millis(400);
/// Confirmation wait budget per attempt.
pub const TX_CONFIRM_TIMEOUT_MS: u64 = 75_000;
/// Advisory inflight marker TTL around the confirmation wait.
pub const TX_INFLIGHT_TTL: Duration = Duration::from_secs(180);
/// Base kept aside for network fees when sizing a short.
pub const SHORT_FEE_RESERVE_BASE: Decimal = dec!(0.02);

/// Outcome status of an entry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpenPositionStatus {
    /// Position opened and confirmed.
    Opened,
    /// Entry abandoned on a skip-classified venue error; trade
    /// canceled, safe to re-evaluate on a later bar.
    Skipped,
    /// Entry failed terminally.
    Failed,
    /// Entry was disabled (regime multiplier sized it to zero).
    Canceled,
}

impl OpenPositionStatus {
    /// Record string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "OPENED",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }
}

/// Result of one entry orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPositionOutcome {
    /// Outcome status.
    pub status: OpenPositionStatus,
    /// The trade this attempt created.
    pub trade_id: String,
    /// One-line human summary.
    pub summary: String,
}

/// How one failed attempt affects the retry loop.
enum AttemptDisposition {
    /// Retry within budget; on exhaustion, cancel with this reason.
    RetryThenSkip(&'static str),
    /// Retry within budget; on exhaustion, fail the trade.
    RetryThenFail,
    /// Stop now, cancel the trade, report SKIPPED.
    StopSkip(&'static str),
    /// Stop now, fail the trade.
    StopFail,
}

fn submit_error_disposition(error: &ExecutionError) -> AttemptDisposition {
    match error.kind() {
        ErrorKind::Slippage => AttemptDisposition::RetryThenSkip("slippage exceeded"),
        ErrorKind::MarketCondition => {
            AttemptDisposition::RetryThenSkip("route/liquidity unavailable")
        }
        // Code 6024 is a transient zero-amount quote artifact worth a
        // fresh quote; the plain-text marker means the wallet really
        // cannot cover the swap.
        ErrorKind::InsufficientFunds if error.classification.custom_code == Some(6024) => {
            AttemptDisposition::RetryThenSkip("insufficient funds")
        }
        ErrorKind::InsufficientFunds => AttemptDisposition::StopSkip("insufficient funds"),
        ErrorKind::Fatal => AttemptDisposition::StopFail,
        ErrorKind::Unknown => {
            if is_non_retriable_error_message(&error.raw_message) {
                AttemptDisposition::StopFail
            } else {
                AttemptDisposition::RetryThenFail
            }
        }
    }
}

/// Use case for opening a position from a strategy entry signal.
pub struct OpenPositionUseCase<X, L, P>
where
    X: ExecutionPort,
    L: LockPort,
    P: PersistencePort,
{
    execution: Arc<X>,
    lock: Arc<L>,
    persistence: Arc<P>,
}

impl<X, L, P> OpenPositionUseCase<X, L, P>
where
    X: ExecutionPort,
    L: LockPort,
    P: PersistencePort,
{
    /// Create a new `OpenPositionUseCase`.
    pub const fn new(execution: Arc<X>, lock: Arc<L>, persistence: Arc<P>) -> Self {
        Self {
            execution,
            lock,
            persistence,
        }
    }

    /// Execute the use case.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError`] on an illegal state transition or
    /// a persistence fault; venue failures become trade outcomes, not
    /// errors.
    pub async fn execute(
        &self,
        config: &BotConfig,
        signal: &EntrySignal,
        bar_close_time: DateTime<Utc>,
        model_id: &str,
    ) -> Result<OpenPositionOutcome, OrchestrationError> {
        let direction = config.direction;
        let trade_id = build_trade_id(bar_close_time, model_id, direction);
        let now = Utc::now();

        let (regime, multiplier) = resolve_regime_and_multiplier(&signal.diagnostics);

        // Sizing. A balance-fetch failure is recorded, not raised: the
        // trade is still created so the rejection is auditable.
        let mut balance_error: Option<String> = None;
        let mut base_spend = Decimal::ZERO;
        let base_notional = match self.resolve_base_notional(config, direction).await {
            Ok((notional, spend)) => {
                base_spend = spend;
                notional
            }
            Err(error) => {
                let message = format!("failed to resolve balance: {error}");
                error!(pair = %config.pair, error = %error, "balance resolution failed");
                balance_error = Some(message);
                Decimal::ZERO
            }
        };
        let effective_notional = (base_notional * multiplier)
            .round_dp_with_strategy(2, RoundingStrategy::ToZero);

        let mut trade = Trade {
            trade_id: trade_id.clone(),
            model_id: model_id.to_string(),
            bar_close_time,
            pair: config.pair.clone(),
            direction,
            state: TradeState::Created,
            config_version: config.meta.config_version,
            signal: SignalSnapshot {
                summary: signal.summary.clone(),
                bar_close_time,
                entry_price: signal.entry_price,
                stop_price: signal.stop_price,
                take_profit_price: signal.take_profit_price,
            },
            plan: PlanSnapshot {
                summary: format!(
                    "{direction} {effective_notional} notional (base={base_notional}, \
                     regime={regime}, size_x={multiplier:.2}), \
                     stop={}, tp={}",
                    signal.stop_price.round_dp(4),
                    signal.take_profit_price.round_dp(4),
                ),
                notional: effective_notional,
                entry_price: signal.entry_price,
                stop_price: signal.stop_price,
                take_profit_price: signal.take_profit_price,
                r_multiple: config.exit.take_profit_r_multiple,
            },
            execution: ExecutionSnapshot::default(),
            position: PositionSnapshot {
                status: PositionStatus::Open,
                quantity: Decimal::ZERO,
                quote_amount: None,
                entry_trigger_price: signal.entry_price,
                entry_price: signal.entry_price,
                stop_price: signal.stop_price,
                take_profit_price: signal.take_profit_price,
                entry_time: None,
                exit_price: None,
                exit_trigger_price: None,
                exit_time: None,
            },
            close_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.persistence.create_trade(trade.clone()).await?;

        // Validations, in order; each produces a terminal state with a
        // human-readable reason.
        if config.execution.min_notional <= Decimal::ZERO {
            return self
                .fail(&mut trade, "invalid min notional configuration".to_string())
                .await;
        }
        if let Some(message) = balance_error {
            return self.fail(&mut trade, message).await;
        }
        if base_notional <= Decimal::ZERO {
            return self.fail(&mut trade, "available balance is 0".to_string()).await;
        }
        if base_notional < config.execution.min_notional {
            return self
                .fail(
                    &mut trade,
                    format!(
                        "insufficient balance: {base_notional} < min notional {}",
                        config.execution.min_notional
                    ),
                )
                .await;
        }
        if effective_notional <= Decimal::ZERO {
            trade.execution.entry_error =
                Some("effective notional is 0: entry disabled by regime sizing".to_string());
            trade.position.status = PositionStatus::Closed;
            transition_and_persist(self.persistence.as_ref(), &mut trade, TradeState::Canceled)
                .await?;
            return Ok(OpenPositionOutcome {
                status: OpenPositionStatus::Canceled,
                trade_id: trade.trade_id,
                summary: format!("CANCELED: regime {regime} sized the entry to zero"),
            });
        }

        let (side, amount_atomic) = match entry_amount(direction, effective_notional, base_spend, multiplier)
        {
            Ok(pair) => pair,
            Err(error) => return self.fail(&mut trade, error.to_string()).await,
        };

        self.submit_with_retry(config, &mut trade, side, amount_atomic)
            .await
    }

    /// Quote-denominated sizing. Longs spend quote directly; shorts
    /// sell base, keeping a fixed fee reserve, valued at mark.
    /// Returns `(base_notional_quote, base_spend_for_shorts)`.
    async fn resolve_base_notional(
        &self,
        config: &BotConfig,
        direction: Direction,
    ) -> Result<(Decimal, Decimal), ExecutionError> {
        match direction {
            Direction::Long => {
                let quote = self
                    .execution
                    .get_available_quote_balance(&config.pair)
                    .await?;
                Ok((quote.round_dp(6), Decimal::ZERO))
            }
            Direction::Short => {
                let base = self
                    .execution
                    .get_available_base_balance(&config.pair)
                    .await?;
                let mark = self.execution.get_mark_price(&config.pair).await?;
                let spend = (base - SHORT_FEE_RESERVE_BASE).max(Decimal::ZERO);
                Ok(((spend * mark).round_dp(6), spend))
            }
        }
    }

    async fn submit_with_retry(
        &self,
        config: &BotConfig,
        trade: &mut Trade,
        side: SwapSide,
        amount_atomic: u64,
    ) -> Result<OpenPositionOutcome, OrchestrationError> {
        let mut consecutive_slippage_failures = 0u32;

        for attempt in 1..=ENTRY_RETRY_ATTEMPTS {
            let slippage_bps = entry_slippage_bps(
                config.execution.slippage_bps,
                consecutive_slippage_failures,
            );
            let request = SubmitSwapRequest {
                side,
                amount_atomic,
                slippage_bps,
                only_direct_routes: config.execution.only_direct_routes,
            };

            let pre_balances = self.snapshot_balances(config).await;

            // Quotes are time-sensitive: every attempt is a brand-new
            // submission, never a reuse of a stale quote.
            match self.execution.submit_swap(request).await {
                Ok(submission) => {
                    self.record_submission(trade, &submission, side).await?;

                    self.lock
                        .set_inflight_tx(&submission.tx_signature, TX_INFLIGHT_TTL)
                        .await
                        .ok();
                    let confirmation = self
                        .execution
                        .confirm_swap(&submission.tx_signature, TX_CONFIRM_TIMEOUT_MS)
                        .await;
                    self.lock
                        .clear_inflight_tx(&submission.tx_signature)
                        .await
                        .ok();

                    let confirm_error = match confirmation {
                        Ok(confirmation) if confirmation.confirmed => {
                            return self
                                .reconcile_confirmed_entry(
                                    config,
                                    trade,
                                    &submission,
                                    pre_balances,
                                    attempt,
                                )
                                .await;
                        }
                        Ok(confirmation) => confirmation
                            .error
                            .unwrap_or_else(|| "unknown confirmation error".to_string()),
                        Err(error) => error.raw_message,
                    };

                    let summarized =
                        summarize_error_for_log(&confirm_error, DEFAULT_ERROR_SUMMARY_LENGTH);
                    trade.execution.entry_error = Some(format!(
                        "entry tx not confirmed: {summarized} (attempt {attempt}/{ENTRY_RETRY_ATTEMPTS})"
                    ));
                    persist_execution_only(self.persistence.as_ref(), trade).await?;

                    if is_non_retriable_error_message(&confirm_error)
                        || attempt == ENTRY_RETRY_ATTEMPTS
                    {
                        return self
                            .fail(trade, format!("entry tx not confirmed ({summarized})"))
                            .await;
                    }
                    warn!(
                        trade_id = %trade.trade_id,
                        attempt,
                        error = %summarized,
                        "entry confirmation failed, resubmitting"
                    );
                }
                Err(error) => {
                    let summarized =
                        summarize_error_for_log(&error.raw_message, DEFAULT_ERROR_SUMMARY_LENGTH);
                    trade.execution.entry_error = Some(format!(
                        "{summarized} (attempt {attempt}/{ENTRY_RETRY_ATTEMPTS})"
                    ));
                    persist_execution_only(self.persistence.as_ref(), trade).await?;

                    if error.kind() == ErrorKind::Slippage {
                        consecutive_slippage_failures += 1;
                    }

                    let exhausted = attempt == ENTRY_RETRY_ATTEMPTS;
                    match submit_error_disposition(&error) {
                        AttemptDisposition::StopSkip(reason) => {
                            return self.cancel_skipped(trade, reason, &summarized).await;
                        }
                        AttemptDisposition::StopFail => {
                            return self.fail(trade, summarized).await;
                        }
                        AttemptDisposition::RetryThenSkip(reason) if exhausted => {
                            return self.cancel_skipped(trade, reason, &summarized).await;
                        }
                        AttemptDisposition::RetryThenFail if exhausted => {
                            return self.fail(trade, summarized).await;
                        }
                        AttemptDisposition::RetryThenSkip(_)
                        | AttemptDisposition::RetryThenFail => {
                            warn!(
                                trade_id = %trade.trade_id,
                                attempt,
                                error = %summarized,
                                "entry submission failed, retrying"
                            );
                        }
                    }
                }
            }

            tokio::time::sleep(ENTRY_RETRY_DELAY).await;
        }

        // Loop always returns from the final attempt.
        self.fail(trade, "entry retry budget exhausted".to_string())
            .await
    }

    /// Persist the submission ack immediately, before waiting on
    /// confirmation, so a crash mid-wait leaves auditable state.
    async fn record_submission(
        &self,
        trade: &mut Trade,
        submission: &SwapSubmission,
        side: SwapSide,
    ) -> Result<(), OrchestrationError> {
        trade.execution.entry_tx_signature = Some(submission.tx_signature.clone());
        trade.execution.entry_result = Some(submission.result.clone().unwrap_or_else(|| {
            estimated_fill(side, submission.in_amount_atomic, submission.out_amount_atomic)
        }));
        transition_and_persist(self.persistence.as_ref(), trade, TradeState::Submitted).await
    }

    async fn snapshot_balances(&self, config: &BotConfig) -> Option<(Decimal, Decimal)> {
        let quote = self
            .execution
            .get_available_quote_balance(&config.pair)
            .await
            .ok()?;
        let base = self
            .execution
            .get_available_base_balance(&config.pair)
            .await
            .ok()?;
        Some((quote, base))
    }

    /// Reconcile a confirmed entry against reality: balance deltas
    /// first (ground truth), then the venue fill result, then amounts
    /// implied by the raw atomic in/out.
    async fn reconcile_confirmed_entry(
        &self,
        config: &BotConfig,
        trade: &mut Trade,
        submission: &SwapSubmission,
        pre_balances: Option<(Decimal, Decimal)>,
        attempts_used: u32,
    ) -> Result<OpenPositionOutcome, OrchestrationError> {
        let post_balances = self.snapshot_balances(config).await;
        let side = match trade.direction {
            Direction::Long => SwapSide::BuyBase,
            Direction::Short => SwapSide::SellBase,
        };
        let estimated = estimated_fill(side, submission.in_amount_atomic, submission.out_amount_atomic);
        let venue_result = submission.result.clone().unwrap_or_else(|| estimated.clone());

        let (quantity, quote_amount) = reconcile_amounts(
            trade.direction,
            pre_balances,
            post_balances,
            &venue_result,
            &estimated,
        );

        if quantity <= Decimal::ZERO {
            // Fatal data inconsistency: never proceed with a zero-size
            // position.
            let message = format!(
                "filled quantity is 0: out_amount_atomic={}",
                submission.out_amount_atomic
            );
            error!(
                trade_id = %trade.trade_id,
                tx_signature = %submission.tx_signature,
                "entry confirmed with zero filled quantity"
            );
            return self.fail(trade, message).await;
        }

        let resolved_entry_price = if quote_amount > Decimal::ZERO {
            quote_amount / quantity
        } else {
            venue_result.avg_fill_price
        };

        // Risk levels are recomputed from the actual fill, not the
        // strategy's pre-trade estimate.
        let final_stop = tighten_stop(
            resolved_entry_price,
            trade.signal.stop_price,
            config.risk.max_loss_per_trade_pct,
            trade.direction,
        )
        .map_or(trade.signal.stop_price, |stop| stop);
        let final_target = take_profit_price(
            resolved_entry_price,
            final_stop,
            config.exit.take_profit_r_multiple,
            trade.direction,
        )
        .map_or(trade.signal.take_profit_price, |target| target);

        let fee = self
            .execution
            .get_transaction_fee(&submission.tx_signature)
            .await
            .ok()
            .flatten();

        trade.execution.entry_result = Some(FillResult {
            status: FillStatus::Confirmed,
            avg_fill_price: resolved_entry_price.round_dp(6),
            quote_amount: quote_amount.round_dp(6),
            base_amount: quantity.round_dp(9),
        });
        trade.execution.entry_fee_atomic = fee;
        trade.position.quantity = quantity.round_dp(9);
        trade.position.quote_amount = Some(quote_amount.round_dp(6));
        trade.position.entry_price = resolved_entry_price.round_dp(6);
        trade.position.stop_price = final_stop.round_dp(6);
        trade.position.take_profit_price = final_target.round_dp(6);
        trade.position.entry_time = Some(Utc::now());
        trade.plan.entry_price = trade.position.entry_price;
        trade.plan.stop_price = trade.position.stop_price;
        trade.plan.take_profit_price = trade.position.take_profit_price;

        transition_and_persist(self.persistence.as_ref(), trade, TradeState::Confirmed).await?;

        info!(
            trade_id = %trade.trade_id,
            entry_price = %trade.position.entry_price,
            stop_price = %trade.position.stop_price,
            take_profit_price = %trade.position.take_profit_price,
            quantity = %trade.position.quantity,
            "position opened"
        );

        let mut summary = format!(
            "OPENED: tx={}, qty={} base",
            submission.tx_signature, trade.position.quantity
        );
        if attempts_used > 1 {
            summary.push_str(&format!(", after {attempts_used} attempts"));
        }
        Ok(OpenPositionOutcome {
            status: OpenPositionStatus::Opened,
            trade_id: trade.trade_id.clone(),
            summary,
        })
    }

    async fn fail(
        &self,
        trade: &mut Trade,
        reason: String,
    ) -> Result<OpenPositionOutcome, OrchestrationError> {
        trade.execution.entry_error.get_or_insert_with(|| reason.clone());
        transition_and_persist(self.persistence.as_ref(), trade, TradeState::Failed).await?;
        Ok(OpenPositionOutcome {
            status: OpenPositionStatus::Failed,
            trade_id: trade.trade_id.clone(),
            summary: format!("FAILED: {reason}"),
        })
    }

    async fn cancel_skipped(
        &self,
        trade: &mut Trade,
        reason: &str,
        detail: &str,
    ) -> Result<OpenPositionOutcome, OrchestrationError> {
        trade.position.status = PositionStatus::Closed;
        transition_and_persist(self.persistence.as_ref(), trade, TradeState::Canceled).await?;
        Ok(OpenPositionOutcome {
            status: OpenPositionStatus::Skipped,
            trade_id: trade.trade_id.clone(),
            summary: format!("SKIPPED: {reason} ({detail})"),
        })
    }
}

/// Side and atomic amount for the entry swap.
fn entry_amount(
    direction: Direction,
    effective_notional: Decimal,
    base_spend: Decimal,
    multiplier: Decimal,
) -> Result<(SwapSide, u64), MarketError> {
    match direction {
        Direction::Long => Ok((SwapSide::BuyBase, quote_to_atomic(effective_notional)?)),
        Direction::Short => Ok((SwapSide::SellBase, base_to_atomic(base_spend * multiplier)?)),
    }
}

/// Fill estimated from the quote's atomic amounts, used until a
/// confirmed reconciliation replaces it.
fn estimated_fill(side: SwapSide, in_amount_atomic: u64, out_amount_atomic: u64) -> FillResult {
    let (quote_amount, base_amount) = match side {
        SwapSide::BuyBase => (atomic_to_quote(in_amount_atomic), atomic_to_base(out_amount_atomic)),
        SwapSide::SellBase => (atomic_to_quote(out_amount_atomic), atomic_to_base(in_amount_atomic)),
    };
    let avg_fill_price = if base_amount > Decimal::ZERO {
        quote_amount / base_amount
    } else {
        Decimal::ZERO
    };
    FillResult {
        status: FillStatus::Estimated,
        avg_fill_price,
        quote_amount,
        base_amount,
    }
}

/// Resolve filled quantity and quote amount. Balance deltas win when
/// both are positive; otherwise the venue result, then the estimate.
fn reconcile_amounts(
    direction: Direction,
    pre_balances: Option<(Decimal, Decimal)>,
    post_balances: Option<(Decimal, Decimal)>,
    venue_result: &FillResult,
    estimated: &FillResult,
) -> (Decimal, Decimal) {
    if let (Some((pre_quote, pre_base)), Some((post_quote, post_base))) =
        (pre_balances, post_balances)
    {
        let (quantity, quote_amount) = match direction {
            Direction::Long => (post_base - pre_base, pre_quote - post_quote),
            Direction::Short => (pre_base - post_base, post_quote - pre_quote),
        };
        if quantity > Decimal::ZERO && quote_amount > Decimal::ZERO {
            return (quantity, quote_amount);
        }
    }
    if venue_result.base_amount > Decimal::ZERO {
        return (venue_result.base_amount, venue_result.quote_amount);
    }
    (estimated.base_amount, estimated.quote_amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::application::ports::execution_port::SwapConfirmation;
    use crate::application::ports::lock_port::InMemoryLockCoordinator;
    use crate::application::ports::persistence_port::InMemoryPersistence;
    use crate::config::{
        BotConfig, ExecutionConfig, ExecutionMode, ExitConfig, MetaConfig, RiskConfig,
    };
    use crate::domain::market::Timeframe;
    use crate::domain::trade::Pair;

    fn config(direction: Direction) -> BotConfig {
        BotConfig {
            enabled: true,
            pair: Pair::new("SOL/USDC"),
            direction,
            signal_timeframe: Timeframe::H4,
            strategy: serde_json::Value::Null,
            risk: RiskConfig {
                max_loss_per_trade_pct: dec!(2.0),
                max_trades_per_day: 3,
                volatile_size_multiplier: dec!(0.75),
                storm_size_multiplier: dec!(0.5),
            },
            execution: ExecutionConfig {
                mode: ExecutionMode::Paper,
                slippage_bps: 50,
                min_notional: dec!(20),
                only_direct_routes: false,
            },
            exit: ExitConfig {
                take_profit_r_multiple: dec!(2.0),
            },
            meta: MetaConfig {
                config_version: 1,
                note: "test".to_string(),
            },
        }
    }

    fn signal() -> EntrySignal {
        EntrySignal {
            summary: "ENTER: test".to_string(),
            entry_price: dec!(100),
            stop_price: dec!(98),
            take_profit_price: dec!(104),
            diagnostics: Default::default(),
        }
    }

    fn bar_close() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 21, 10, 0, 0).unwrap()
    }

    /// Scripted execution port: a list of submit outcomes, confirm
    /// outcomes, and fixed balances per phase.
    struct ScriptedExecution {
        submit_outcomes: Mutex<Vec<Result<SwapSubmission, String>>>,
        confirm_outcomes: Mutex<Vec<SwapConfirmation>>,
        submitted: Mutex<Vec<SubmitSwapRequest>>,
        confirm_calls: Mutex<u32>,
        quote_balances: Mutex<Vec<Decimal>>,
        base_balances: Mutex<Vec<Decimal>>,
        mark_price: Decimal,
        fee: Option<u64>,
    }

    impl ScriptedExecution {
        fn new() -> Self {
            Self {
                submit_outcomes: Mutex::new(Vec::new()),
                confirm_outcomes: Mutex::new(Vec::new()),
                submitted: Mutex::new(Vec::new()),
                confirm_calls: Mutex::new(0),
                quote_balances: Mutex::new(Vec::new()),
                base_balances: Mutex::new(Vec::new()),
                mark_price: dec!(100),
                fee: Some(8_500),
            }
        }

        fn submission(signature: &str, in_atomic: u64, out_atomic: u64) -> SwapSubmission {
            SwapSubmission {
                tx_signature: signature.to_string(),
                in_amount_atomic: in_atomic,
                out_amount_atomic: out_atomic,
                order: None,
                result: None,
            }
        }

        fn submit_count(&self) -> usize {
            self.submitted.lock().unwrap().len()
        }

        fn slippage_history(&self) -> Vec<u32> {
            self.submitted
                .lock()
                .unwrap()
                .iter()
                .map(|request| request.slippage_bps)
                .collect()
        }
    }

    #[async_trait]
    impl ExecutionPort for ScriptedExecution {
        async fn submit_swap(
            &self,
            request: SubmitSwapRequest,
        ) -> Result<SwapSubmission, ExecutionError> {
            self.submitted.lock().unwrap().push(request);
            let mut outcomes = self.submit_outcomes.lock().unwrap();
            if outcomes.is_empty() {
                return Err(ExecutionError::from_raw("no scripted submit outcome"));
            }
            outcomes.remove(0).map_err(ExecutionError::from_raw)
        }

        async fn confirm_swap(
            &self,
            _tx_signature: &str,
            _timeout_ms: u64,
        ) -> Result<SwapConfirmation, ExecutionError> {
            *self.confirm_calls.lock().unwrap() += 1;
            let mut outcomes = self.confirm_outcomes.lock().unwrap();
            if outcomes.is_empty() {
                return Ok(SwapConfirmation {
                    confirmed: true,
                    error: None,
                });
            }
            Ok(outcomes.remove(0))
        }

        async fn get_mark_price(&self, _pair: &Pair) -> Result<Decimal, ExecutionError> {
            Ok(self.mark_price)
        }

        async fn get_available_quote_balance(&self, _pair: &Pair) -> Result<Decimal, ExecutionError> {
            let mut balances = self.quote_balances.lock().unwrap();
            if balances.len() > 1 {
                Ok(balances.remove(0))
            } else {
                Ok(*balances.first().unwrap_or(&dec!(100)))
            }
        }

        async fn get_available_base_balance(&self, _pair: &Pair) -> Result<Decimal, ExecutionError> {
            let mut balances = self.base_balances.lock().unwrap();
            if balances.len() > 1 {
                Ok(balances.remove(0))
            } else {
                Ok(*balances.first().unwrap_or(&Decimal::ZERO))
            }
        }

        async fn get_transaction_fee(
            &self,
            _tx_signature: &str,
        ) -> Result<Option<u64>, ExecutionError> {
            Ok(self.fee)
        }
    }

    fn use_case(
        execution: ScriptedExecution,
    ) -> (
        OpenPositionUseCase<ScriptedExecution, InMemoryLockCoordinator, InMemoryPersistence>,
        Arc<InMemoryPersistence>,
    ) {
        let persistence = Arc::new(InMemoryPersistence::new());
        let use_case = OpenPositionUseCase::new(
            Arc::new(execution),
            Arc::new(InMemoryLockCoordinator::new()),
            Arc::clone(&persistence),
        );
        (use_case, persistence)
    }

    #[tokio::test(start_paused = true)]
    async fn opens_long_with_full_quote_balance() {
        let execution = ScriptedExecution::new();
        // Scenario: 100 quote available, fill of 1 base for 100 quote.
        *execution.quote_balances.lock().unwrap() = vec![dec!(100), dec!(100), dec!(0)];
        *execution.base_balances.lock().unwrap() = vec![dec!(0), dec!(1)];
        execution.submit_outcomes.lock().unwrap().push(Ok(
            ScriptedExecution::submission("entry_sig_1", 100_000_000, 1_000_000_000),
        ));
        let (use_case, persistence) = use_case(execution);

        let outcome = use_case
            .execute(&config(Direction::Long), &signal(), bar_close(), "core_long_v0")
            .await
            .unwrap();

        assert_eq!(outcome.status, OpenPositionStatus::Opened);
        let trade = persistence.trade(&outcome.trade_id).unwrap();
        assert_eq!(trade.state, TradeState::Confirmed);
        assert_eq!(trade.position.status, PositionStatus::Open);
        assert_eq!(trade.position.quantity, dec!(1));
        assert_eq!(trade.execution.entry_fee_atomic, Some(8_500));
    }

    #[tokio::test(start_paused = true)]
    async fn submits_full_balance_as_quote_atomic() {
        let execution = ScriptedExecution::new();
        *execution.quote_balances.lock().unwrap() = vec![dec!(100)];
        execution.submit_outcomes.lock().unwrap().push(Ok(
            ScriptedExecution::submission("entry_sig_1", 100_000_000, 1_000_000_000),
        ));
        let (use_case, _persistence) = use_case(execution);
        let execution_ref = Arc::clone(&use_case.execution);

        use_case
            .execute(&config(Direction::Long), &signal(), bar_close(), "core_long_v0")
            .await
            .unwrap();

        let requests = execution_ref.submitted.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].side, SwapSide::BuyBase);
        assert_eq!(requests[0].amount_atomic, 100_000_000);
        assert_eq!(requests[0].slippage_bps, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_multiplier_cancels_without_submitting() {
        let execution = ScriptedExecution::new();
        *execution.quote_balances.lock().unwrap() = vec![dec!(100)];
        let (use_case, persistence) = use_case(execution);
        let execution_ref = Arc::clone(&use_case.execution);

        let mut entry_signal = signal();
        entry_signal.diagnostics.insert(
            "volatility_regime".to_string(),
            serde_json::json!("STORM"),
        );
        entry_signal.diagnostics.insert(
            "position_size_multiplier".to_string(),
            serde_json::json!(0.0),
        );

        let outcome = use_case
            .execute(&config(Direction::Long), &entry_signal, bar_close(), "core_long_v0")
            .await
            .unwrap();

        assert_eq!(outcome.status, OpenPositionStatus::Canceled);
        assert_eq!(execution_ref.submit_count(), 0);
        let trade = persistence.trade(&outcome.trade_id).unwrap();
        assert_eq!(trade.state, TradeState::Canceled);
        assert_eq!(trade.position.status, PositionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn balance_below_min_notional_fails() {
        let execution = ScriptedExecution::new();
        *execution.quote_balances.lock().unwrap() = vec![dec!(5)];
        let (use_case, persistence) = use_case(execution);

        let outcome = use_case
            .execute(&config(Direction::Long), &signal(), bar_close(), "core_long_v0")
            .await
            .unwrap();

        assert_eq!(outcome.status, OpenPositionStatus::Failed);
        assert!(outcome.summary.contains("min notional"));
        let trade = persistence.trade(&outcome.trade_id).unwrap();
        assert_eq!(trade.state, TradeState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn slippage_widens_entry_and_cancels_after_budget() {
        let execution = ScriptedExecution::new();
        *execution.quote_balances.lock().unwrap() = vec![dec!(100)];
        let slippage_error = "RPC sendTransaction failed: {'message': 'Transaction simulation \
             failed: Error processing Instruction 4: custom program error: 0x1771'}";
        for _ in 0..3 {
            execution
                .submit_outcomes
                .lock()
                .unwrap()
                .push(Err(slippage_error.to_string()));
        }
        let (use_case, persistence) = use_case(execution);
        let execution_ref = Arc::clone(&use_case.execution);

        let outcome = use_case
            .execute(&config(Direction::Long), &signal(), bar_close(), "core_long_v0")
            .await
            .unwrap();

        assert_eq!(outcome.status, OpenPositionStatus::Skipped);
        assert!(outcome.summary.contains("slippage exceeded"));
        assert!(outcome.summary.contains("custom program error: 0x1771"));
        assert!(!outcome.summary.contains("'message':"));
        assert_eq!(execution_ref.slippage_history(), vec![50, 50, 51]);
        let trade = persistence.trade(&outcome.trade_id).unwrap();
        assert_eq!(trade.state, TradeState::Canceled);
        assert_eq!(trade.position.status, PositionStatus::Closed);
        let entry_error = trade.execution.entry_error.unwrap();
        assert!(entry_error.contains("attempt 3/3"));
        assert!(entry_error.contains("0x1771"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_amount_code_is_retried_then_opens() {
        let execution = ScriptedExecution::new();
        *execution.quote_balances.lock().unwrap() = vec![dec!(40)];
        {
            let mut outcomes = execution.submit_outcomes.lock().unwrap();
            outcomes.push(Err(
                "RPC sendTransaction failed: {'code': -32002, 'message': 'Transaction \
                 simulation failed: Error processing Instruction 3: custom program error: \
                 0x1788'}"
                    .to_string(),
            ));
            outcomes.push(Ok(ScriptedExecution::submission(
                "entry_sig_2",
                39_000_000,
                450_000_000,
            )));
        }
        let (use_case, persistence) = use_case(execution);
        let execution_ref = Arc::clone(&use_case.execution);

        let outcome = use_case
            .execute(&config(Direction::Long), &signal(), bar_close(), "core_long_v0")
            .await
            .unwrap();

        assert_eq!(outcome.status, OpenPositionStatus::Opened);
        assert!(outcome.summary.contains("after 2 attempts"));
        assert_eq!(execution_ref.submit_count(), 2);
        assert_eq!(*execution_ref.confirm_calls.lock().unwrap(), 1);
        let trade = persistence.trade(&outcome.trade_id).unwrap();
        assert_eq!(trade.state, TradeState::Confirmed);
        assert_eq!(trade.position.status, PositionStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_funds_marker_stops_after_one_attempt() {
        let execution = ScriptedExecution::new();
        *execution.quote_balances.lock().unwrap() = vec![dec!(100)];
        execution
            .submit_outcomes
            .lock()
            .unwrap()
            .push(Err("insufficient funds for fee".to_string()));
        let (use_case, persistence) = use_case(execution);
        let execution_ref = Arc::clone(&use_case.execution);

        let outcome = use_case
            .execute(&config(Direction::Long), &signal(), bar_close(), "core_long_v0")
            .await
            .unwrap();

        assert_eq!(outcome.status, OpenPositionStatus::Skipped);
        assert_eq!(execution_ref.submit_count(), 1);
        let trade = persistence.trade(&outcome.trade_id).unwrap();
        assert_eq!(trade.state, TradeState::Canceled);
        assert!(trade.execution.entry_error.unwrap().contains("attempt 1/3"));
        assert_eq!(trade.position.status, PositionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_amount_route_leg_retries_then_skips() {
        let execution = ScriptedExecution::new();
        *execution.quote_balances.lock().unwrap() = vec![dec!(40)];
        for _ in 0..3 {
            execution
                .submit_outcomes
                .lock()
                .unwrap()
                .push(Err("Jupiter quote route contains zero-amount leg".to_string()));
        }
        let (use_case, persistence) = use_case(execution);
        let execution_ref = Arc::clone(&use_case.execution);

        let outcome = use_case
            .execute(&config(Direction::Long), &signal(), bar_close(), "core_long_v0")
            .await
            .unwrap();

        assert_eq!(outcome.status, OpenPositionStatus::Skipped);
        assert!(outcome.summary.contains("route/liquidity unavailable"));
        assert_eq!(execution_ref.submit_count(), 3);
        let trade = persistence.trade(&outcome.trade_id).unwrap();
        assert_eq!(trade.state, TradeState::Canceled);
        assert_eq!(trade.position.status, PositionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_fails_immediately() {
        let execution = ScriptedExecution::new();
        *execution.quote_balances.lock().unwrap() = vec![dec!(100)];
        execution
            .submit_outcomes
            .lock()
            .unwrap()
            .push(Err("custom program error: 0x1778".to_string()));
        let (use_case, persistence) = use_case(execution);
        let execution_ref = Arc::clone(&use_case.execution);

        let outcome = use_case
            .execute(&config(Direction::Long), &signal(), bar_close(), "core_long_v0")
            .await
            .unwrap();

        assert_eq!(outcome.status, OpenPositionStatus::Failed);
        assert_eq!(execution_ref.submit_count(), 1);
        let trade = persistence.trade(&outcome.trade_id).unwrap();
        assert_eq!(trade.state, TradeState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn short_entry_sells_base_minus_fee_reserve() {
        let execution = ScriptedExecution::new();
        *execution.base_balances.lock().unwrap() = vec![dec!(0.35)];
        *execution.quote_balances.lock().unwrap() = vec![dec!(0)];
        execution.submit_outcomes.lock().unwrap().push(Ok(
            ScriptedExecution::submission("entry_sig_1", 330_000_000, 33_000_000),
        ));
        let (use_case, _persistence) = use_case(execution);
        let execution_ref = Arc::clone(&use_case.execution);

        let mut entry_signal = signal();
        entry_signal.stop_price = dec!(102);
        entry_signal.take_profit_price = dec!(96);

        let outcome = use_case
            .execute(&config(Direction::Short), &entry_signal, bar_close(), "core_short_v0")
            .await
            .unwrap();

        assert_eq!(outcome.status, OpenPositionStatus::Opened);
        let requests = execution_ref.submitted.lock().unwrap();
        assert_eq!(requests[0].side, SwapSide::SellBase);
        // (0.35 - 0.02) base at the fee reserve, 9-decimal atomic.
        assert_eq!(requests[0].amount_atomic, 330_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn reconciles_quantity_from_balance_deltas() {
        let execution = ScriptedExecution::new();
        // Pre: 250 quote / 0 base. Post: 50.012346 quote / 1.999876543 base.
        *execution.quote_balances.lock().unwrap() =
            vec![dec!(250), dec!(250), dec!(50.012346)];
        *execution.base_balances.lock().unwrap() = vec![dec!(0), dec!(1.999876543)];
        execution.submit_outcomes.lock().unwrap().push(Ok(
            ScriptedExecution::submission("entry_sig_1", 200_000_000, 2_000_000_000),
        ));
        let (use_case, persistence) = use_case(execution);

        let outcome = use_case
            .execute(&config(Direction::Long), &signal(), bar_close(), "core_long_v0")
            .await
            .unwrap();

        let trade = persistence.trade(&outcome.trade_id).unwrap();
        assert_eq!(trade.position.quantity, dec!(1.999876543));
        assert_eq!(trade.position.quote_amount, Some(dec!(199.987654)));
    }
}

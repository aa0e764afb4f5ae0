//! Close Position Use Case (exit orchestrator)
//!
//! Flattens a confirmed position on stop or target. The retry cadence
//! and slippage ceiling depend on why the exit fires: a stop loss gets
//! many fast attempts and a wide ceiling, a take profit gets few slow
//! ones and a tight ceiling. A broadcast exit whose confirmation is
//! merely uncertain is re-confirmed on the same signature instead of
//! resubmitted; only a slippage rejection invalidates the quote and
//! forces a fresh submission.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::application::ports::execution_port::{
    ExecutionPort, SubmitSwapRequest, SwapSide, SwapSubmission,
};
use crate::application::ports::lock_port::LockPort;
use crate::application::ports::persistence_port::PersistencePort;
use crate::application::use_cases::open_position::{TX_CONFIRM_TIMEOUT_MS, TX_INFLIGHT_TTL};
use crate::application::use_cases::{
    persist_execution_only, transition_and_persist, OrchestrationError,
};
use crate::classify::{
    is_non_retriable_error_message, summarize_error_for_log, ErrorKind,
    DEFAULT_ERROR_SUMMARY_LENGTH,
};
use crate::config::BotConfig;
use crate::domain::market::{atomic_to_base, atomic_to_quote, base_to_atomic, quote_to_atomic};
use crate::domain::slippage::widen_slippage_bps;
use crate::domain::state::TradeState;
use crate::domain::trade::{
    CloseReason, Direction, FillResult, FillStatus, PositionStatus, SubmissionState, Trade,
};

/// Attempts for a stop-loss exit; getting flat beats getting a price.
pub const STOP_LOSS_RETRY_ATTEMPTS: u32 = 5;
/// Delay between stop-loss attempts.
pub const STOP_LOSS_RETRY_DELAY: Duration = Duration::from_millis(150);
/// Slippage ceiling for a stop-loss exit, basis points.
pub const STOP_LOSS_SLIPPAGE_CAP_BPS: u32 = 120;
/// Attempts for a take-profit exit; a missed target is tolerable.
pub const TAKE_PROFIT_RETRY_ATTEMPTS: u32 = 2;
/// Delay between take-profit attempts.
pub const TAKE_PROFIT_RETRY_DELAY: Duration = Duration::from_millis(800);
/// Slippage ceiling floor for a take-profit exit, basis points.
pub const TAKE_PROFIT_SLIPPAGE_CAP_BPS: u32 = 30;
/// Smallest atomic amount worth submitting; anything under is dust.
pub const MIN_EXIT_AMOUNT_ATOMIC: u64 = 1_000;

/// Outcome status of an exit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClosePositionStatus {
    /// Position flattened and trade closed.
    Closed,
    /// Exit abandoned for now; position stays open for the next cycle.
    Skipped,
    /// Exit failed; the exit leg is marked failed. Except for an
    /// unsellable position, the trade stays CONFIRMED so the next
    /// cycle can attempt the exit again.
    Failed,
}

impl ClosePositionStatus {
    /// Record string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
        }
    }
}

/// Result of one exit orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosePositionOutcome {
    /// Outcome status.
    pub status: ClosePositionStatus,
    /// The trade being closed.
    pub trade_id: String,
    /// One-line human summary.
    pub summary: String,
}

/// Reason-dependent retry budget.
struct ExitBudget {
    attempts: u32,
    delay: Duration,
    slippage_cap_bps: u32,
}

impl ExitBudget {
    fn for_reason(reason: CloseReason, configured_slippage_bps: u32) -> Self {
        match reason {
            CloseReason::StopLoss => Self {
                attempts: STOP_LOSS_RETRY_ATTEMPTS,
                delay: STOP_LOSS_RETRY_DELAY,
                slippage_cap_bps: STOP_LOSS_SLIPPAGE_CAP_BPS,
            },
            CloseReason::TakeProfit => Self {
                attempts: TAKE_PROFIT_RETRY_ATTEMPTS,
                delay: TAKE_PROFIT_RETRY_DELAY,
                slippage_cap_bps: TAKE_PROFIT_SLIPPAGE_CAP_BPS.max(configured_slippage_bps),
            },
        }
    }
}

/// The exit submission currently awaiting confirmation, with the
/// balance snapshot taken before it was broadcast.
struct InflightExit {
    submission: SwapSubmission,
    pre_balances: Option<(Decimal, Decimal)>,
}

/// Use case for closing an open position.
pub struct ClosePositionUseCase<X, L, P>
where
    X: ExecutionPort,
    L: LockPort,
    P: PersistencePort,
{
    execution: Arc<X>,
    lock: Arc<L>,
    persistence: Arc<P>,
}

impl<X, L, P> ClosePositionUseCase<X, L, P>
where
    X: ExecutionPort,
    L: LockPort,
    P: PersistencePort,
{
    /// Create a new `ClosePositionUseCase`.
    pub const fn new(execution: Arc<X>, lock: Arc<L>, persistence: Arc<P>) -> Self {
        Self {
            execution,
            lock,
            persistence,
        }
    }

    /// Execute the use case.
    ///
    /// The trade stays in CONFIRMED for the whole attempt; only a
    /// reconciled fill moves it to CLOSED. A failed or skipped exit
    /// leaves the trade CONFIRMED and the position open so the next
    /// cycle can try again; only an unsellable position (zero or dust
    /// quantity) moves the trade to FAILED, because no future attempt
    /// can do better.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestrationError`] on an illegal state transition or
    /// a persistence fault; venue failures become trade outcomes, not
    /// errors.
    pub async fn execute(
        &self,
        config: &BotConfig,
        mut trade: Trade,
        reason: CloseReason,
        trigger_price: Decimal,
    ) -> Result<ClosePositionOutcome, OrchestrationError> {
        if trade.state != TradeState::Confirmed {
            return Ok(ClosePositionOutcome {
                status: ClosePositionStatus::Failed,
                trade_id: trade.trade_id.clone(),
                summary: format!(
                    "FAILED: trade is in state {}, not CONFIRMED",
                    trade.state.as_str()
                ),
            });
        }

        let budget = ExitBudget::for_reason(reason, config.execution.slippage_bps);
        let mut slippage_bps = config.execution.slippage_bps.min(budget.slippage_cap_bps);
        let mut inflight: Option<InflightExit> = None;

        for attempt in 1..=budget.attempts {
            if inflight.is_none() {
                match self.submit_fresh(config, &mut trade, reason, slippage_bps).await? {
                    SubmitStep::Inflight(exit) => inflight = Some(exit),
                    SubmitStep::Done(outcome) => return Ok(outcome),
                    SubmitStep::FailedError(raw_message) => {
                        let summarized =
                            summarize_error_for_log(&raw_message, DEFAULT_ERROR_SUMMARY_LENGTH);
                        trade.execution.exit_error = Some(format!(
                            "{summarized} (attempt {attempt}/{})",
                            budget.attempts
                        ));
                        persist_execution_only(self.persistence.as_ref(), &mut trade).await?;

                        let classification =
                            crate::classify::classify_execution_error(&raw_message);
                        match classification.kind {
                            ErrorKind::Slippage => {
                                if attempt == budget.attempts {
                                    return self
                                        .give_up_slippage(&mut trade, reason, &summarized)
                                        .await;
                                }
                                slippage_bps =
                                    widen_slippage_bps(slippage_bps, budget.slippage_cap_bps);
                                warn!(
                                    trade_id = %trade.trade_id,
                                    attempt,
                                    slippage_bps,
                                    "exit rejected on slippage, widening tolerance"
                                );
                            }
                            ErrorKind::MarketCondition => {
                                // A thin market is never a reason to
                                // hard-fail an exit.
                                return self.skip(
                                    &mut trade,
                                    reason,
                                    "route/liquidity unavailable",
                                    &summarized,
                                )
                                .await;
                            }
                            ErrorKind::InsufficientFunds => {
                                return self
                                    .skip(&mut trade, reason, "insufficient funds", &summarized)
                                    .await;
                            }
                            ErrorKind::Fatal => {
                                return self.fail(&mut trade, summarized).await;
                            }
                            ErrorKind::Unknown => {
                                if is_non_retriable_error_message(&raw_message)
                                    || attempt == budget.attempts
                                {
                                    return self.fail(&mut trade, summarized).await;
                                }
                                warn!(
                                    trade_id = %trade.trade_id,
                                    attempt,
                                    error = %summarized,
                                    "exit submission failed, retrying"
                                );
                            }
                        }
                        tokio::time::sleep(budget.delay).await;
                        continue;
                    }
                }
            }

            // Confirmation pass on the inflight submission.
            #[allow(clippy::expect_used)] // set in every path reaching here
            let exit = inflight.as_ref().expect("inflight exit submission");
            let signature = exit.submission.tx_signature.clone();
            let confirmation = self
                .execution
                .confirm_swap(&signature, TX_CONFIRM_TIMEOUT_MS)
                .await;

            let confirm_error = match confirmation {
                Ok(confirmation) if confirmation.confirmed => {
                    self.lock.clear_inflight_tx(&signature).await.ok();
                    #[allow(clippy::expect_used)] // checked above
                    let exit = inflight.take().expect("inflight exit submission");
                    return self
                        .reconcile_and_close(config, &mut trade, reason, trigger_price, exit, attempt)
                        .await;
                }
                Ok(confirmation) => confirmation
                    .error
                    .unwrap_or_else(|| "unknown confirmation error".to_string()),
                Err(error) => error.raw_message,
            };

            let summarized = summarize_error_for_log(&confirm_error, DEFAULT_ERROR_SUMMARY_LENGTH);
            trade.execution.exit_error = Some(format!(
                "exit tx not confirmed: {summarized} (attempt {attempt}/{})",
                budget.attempts
            ));
            persist_execution_only(self.persistence.as_ref(), &mut trade).await?;

            let classification = crate::classify::classify_execution_error(&confirm_error);
            if classification.kind == ErrorKind::Slippage {
                // The quote is stale; this signature will never land.
                self.lock.clear_inflight_tx(&signature).await.ok();
                inflight = None;
                trade.execution.exit_submission_state = Some(SubmissionState::Failed);
                if attempt == budget.attempts {
                    return self.give_up_slippage(&mut trade, reason, &summarized).await;
                }
                slippage_bps = widen_slippage_bps(slippage_bps, budget.slippage_cap_bps);
                warn!(
                    trade_id = %trade.trade_id,
                    attempt,
                    slippage_bps,
                    "exit confirmation failed on slippage, resubmitting at widened tolerance"
                );
            } else if is_non_retriable_error_message(&confirm_error) {
                self.lock.clear_inflight_tx(&signature).await.ok();
                return self.fail(&mut trade, summarized).await;
            } else if attempt == budget.attempts {
                self.lock.clear_inflight_tx(&signature).await.ok();
                return self.fail(&mut trade, summarized).await;
            } else {
                // The submission may still land; keep the signature and
                // re-confirm instead of resubmitting.
                warn!(
                    trade_id = %trade.trade_id,
                    attempt,
                    tx_signature = %signature,
                    error = %summarized,
                    "exit confirmation uncertain, will re-confirm same signature"
                );
            }

            tokio::time::sleep(budget.delay).await;
        }

        // Loop always returns from the final attempt.
        self.fail(&mut trade, "exit retry budget exhausted".to_string())
            .await
    }

    /// Resolve the exit swap request from the position record, clamped
    /// down to the freshly observed balance, and submit it.
    async fn submit_fresh(
        &self,
        config: &BotConfig,
        trade: &mut Trade,
        reason: CloseReason,
        slippage_bps: u32,
    ) -> Result<SubmitStep, OrchestrationError> {
        let pre_balances = self.snapshot_balances(config).await;

        let (side, requested_atomic) = match exit_amount(trade) {
            Ok(pair) => pair,
            Err(message) => {
                let outcome = self.fail_terminal(trade, message).await?;
                return Ok(SubmitStep::Done(outcome));
            }
        };

        let available_atomic = pre_balances.and_then(|(quote, base)| match side {
            SwapSide::SellBase => base_to_atomic(base).ok(),
            SwapSide::BuyBase => quote_to_atomic(quote).ok(),
        });
        let amount_atomic = match available_atomic {
            Some(available) if available < requested_atomic => {
                warn!(
                    trade_id = %trade.trade_id,
                    requested_atomic,
                    available_atomic = available,
                    "clamping exit amount to available balance"
                );
                available
            }
            _ => requested_atomic,
        };

        if amount_atomic < MIN_EXIT_AMOUNT_ATOMIC {
            let outcome = self
                .fail_terminal(
                    trade,
                    format!(
                        "exit amount {amount_atomic} atomic is below the minimum \
                         {MIN_EXIT_AMOUNT_ATOMIC}"
                    ),
                )
                .await?;
            return Ok(SubmitStep::Done(outcome));
        }

        let request = SubmitSwapRequest {
            side,
            amount_atomic,
            slippage_bps,
            only_direct_routes: config.execution.only_direct_routes,
        };
        info!(
            trade_id = %trade.trade_id,
            reason = %reason,
            amount_atomic,
            slippage_bps,
            "submitting exit swap"
        );
        match self.execution.submit_swap(request).await {
            Ok(submission) => {
                trade.execution.exit_tx_signature = Some(submission.tx_signature.clone());
                trade.execution.exit_submission_state = Some(SubmissionState::Submitted);
                trade.execution.exit_result = Some(submission.result.clone().unwrap_or_else(|| {
                    estimated_exit_fill(
                        side,
                        submission.in_amount_atomic,
                        submission.out_amount_atomic,
                    )
                }));
                persist_execution_only(self.persistence.as_ref(), trade).await?;
                self.lock
                    .set_inflight_tx(&submission.tx_signature, TX_INFLIGHT_TTL)
                    .await
                    .ok();
                Ok(SubmitStep::Inflight(InflightExit {
                    submission,
                    pre_balances,
                }))
            }
            Err(error) => Ok(SubmitStep::FailedError(error.raw_message)),
        }
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

    /// Reconcile the confirmed exit and transition the trade to CLOSED.
    async fn reconcile_and_close(
        &self,
        config: &BotConfig,
        trade: &mut Trade,
        reason: CloseReason,
        trigger_price: Decimal,
        exit: InflightExit,
        attempts: u32,
    ) -> Result<ClosePositionOutcome, OrchestrationError> {
        let post_balances = self.snapshot_balances(config).await;
        let side = match trade.direction {
            Direction::Long => SwapSide::SellBase,
            Direction::Short => SwapSide::BuyBase,
        };
        let estimated = estimated_exit_fill(
            side,
            exit.submission.in_amount_atomic,
            exit.submission.out_amount_atomic,
        );
        let venue_result = exit.submission.result.clone().unwrap_or_else(|| estimated.clone());

        let (base_amount, quote_amount) = reconcile_exit_amounts(
            trade.direction,
            exit.pre_balances,
            post_balances,
            &venue_result,
            &estimated,
        );
        let exit_price = if base_amount > Decimal::ZERO && quote_amount > Decimal::ZERO {
            quote_amount / base_amount
        } else {
            venue_result.avg_fill_price
        };

        let fee = self
            .execution
            .get_transaction_fee(&exit.submission.tx_signature)
            .await
            .ok()
            .flatten();

        trade.execution.exit_submission_state = Some(SubmissionState::Confirmed);
        trade.execution.exit_result = Some(FillResult {
            status: FillStatus::Confirmed,
            avg_fill_price: exit_price.round_dp(6),
            quote_amount: quote_amount.round_dp(6),
            base_amount: base_amount.round_dp(9),
        });
        trade.execution.exit_fee_atomic = fee;

        // Keep rollback copies: persisted state must never show CLOSED
        // without a valid prior transition.
        let position_before = trade.position.clone();
        let close_reason_before = trade.close_reason;

        trade.position.status = PositionStatus::Closed;
        trade.position.exit_price = Some(exit_price.round_dp(6));
        trade.position.exit_trigger_price = Some(trigger_price);
        trade.position.exit_time = Some(Utc::now());
        trade.close_reason = Some(reason);

        if let Err(transition_error) =
            transition_and_persist(self.persistence.as_ref(), trade, TradeState::Closed).await
        {
            trade.position = position_before;
            trade.close_reason = close_reason_before;
            error!(
                trade_id = %trade.trade_id,
                error = %transition_error,
                "exit close transition rejected, rolling back position mutation"
            );
            return Err(transition_error);
        }

        info!(
            trade_id = %trade.trade_id,
            reason = %reason,
            exit_price = %exit_price.round_dp(6),
            trigger_price = %trigger_price,
            "position closed"
        );
        let mut summary = format!(
            "CLOSED ({reason}): tx={}, exit_price={}",
            exit.submission.tx_signature,
            exit_price.round_dp(6)
        );
        if attempts > 1 {
            summary.push_str(&format!(", after {attempts} attempts"));
        }
        Ok(ClosePositionOutcome {
            status: ClosePositionStatus::Closed,
            trade_id: trade.trade_id.clone(),
            summary,
        })
    }

    /// Slippage budget exhausted: a take-profit is skipped (the target
    /// can be retried next cycle), a stop loss reports FAILED. Either
    /// way the trade stays CONFIRMED and the next cycle tries again.
    async fn give_up_slippage(
        &self,
        trade: &mut Trade,
        reason: CloseReason,
        detail: &str,
    ) -> Result<ClosePositionOutcome, OrchestrationError> {
        match reason {
            CloseReason::TakeProfit => {
                self.skip(trade, reason, "slippage exceeded", detail).await
            }
            CloseReason::StopLoss => {
                self.fail(trade, format!("slippage exceeded ({detail})")).await
            }
        }
    }

    /// Leave the trade CONFIRMED and the position open.
    async fn skip(
        &self,
        trade: &mut Trade,
        reason: CloseReason,
        skip_reason: &str,
        detail: &str,
    ) -> Result<ClosePositionOutcome, OrchestrationError> {
        persist_execution_only(self.persistence.as_ref(), trade).await?;
        Ok(ClosePositionOutcome {
            status: ClosePositionStatus::Skipped,
            trade_id: trade.trade_id.clone(),
            summary: format!("SKIPPED ({reason}): {skip_reason} ({detail})"),
        })
    }

    /// Mark the exit leg failed but keep the trade CONFIRMED with the
    /// position open; the next run cycle will retry the exit.
    async fn fail(
        &self,
        trade: &mut Trade,
        message: String,
    ) -> Result<ClosePositionOutcome, OrchestrationError> {
        trade.execution.exit_submission_state = Some(SubmissionState::Failed);
        trade.execution.exit_error.get_or_insert_with(|| message.clone());
        persist_execution_only(self.persistence.as_ref(), trade).await?;
        Ok(ClosePositionOutcome {
            status: ClosePositionStatus::Failed,
            trade_id: trade.trade_id.clone(),
            summary: format!("FAILED: {message}"),
        })
    }

    /// Terminal failure for a position that cannot be sold at all.
    /// Retrying later cannot help, so the trade itself moves to FAILED.
    async fn fail_terminal(
        &self,
        trade: &mut Trade,
        message: String,
    ) -> Result<ClosePositionOutcome, OrchestrationError> {
        trade.execution.exit_submission_state = Some(SubmissionState::Failed);
        trade.execution.exit_error.get_or_insert_with(|| message.clone());
        transition_and_persist(self.persistence.as_ref(), trade, TradeState::Failed).await?;
        Ok(ClosePositionOutcome {
            status: ClosePositionStatus::Failed,
            trade_id: trade.trade_id.clone(),
            summary: format!("FAILED: {message}"),
        })
    }
}

/// Step outcome of a fresh submission pass.
enum SubmitStep {
    /// Broadcast; awaiting confirmation.
    Inflight(InflightExit),
    /// Terminal outcome already produced.
    Done(ClosePositionOutcome),
    /// Submission raised with this raw error message.
    FailedError(String),
}

/// Side and requested atomic amount for the exit swap.
///
/// Longs sell the recorded base quantity; shorts buy base back with
/// the recorded quote amount, reconstructed from quantity and entry
/// price when unrecorded.
fn exit_amount(trade: &Trade) -> Result<(SwapSide, u64), String> {
    match trade.direction {
        Direction::Long => {
            let quantity = trade.position.quantity;
            if quantity <= Decimal::ZERO {
                return Err(format!("position quantity {quantity} is not sellable"));
            }
            base_to_atomic(quantity)
                .map(|atomic| (SwapSide::SellBase, atomic))
                .map_err(|error| error.to_string())
        }
        Direction::Short => {
            let quote = trade
                .position
                .quote_amount
                .unwrap_or(trade.position.quantity * trade.position.entry_price);
            if quote <= Decimal::ZERO {
                return Err(format!("quote notional {quote} is not spendable"));
            }
            quote_to_atomic(quote)
                .map(|atomic| (SwapSide::BuyBase, atomic))
                .map_err(|error| error.to_string())
        }
    }
}

/// Fill estimated from the quote's atomic amounts.
fn estimated_exit_fill(side: SwapSide, in_amount_atomic: u64, out_amount_atomic: u64) -> FillResult {
    let (quote_amount, base_amount) = match side {
        SwapSide::SellBase => (
            atomic_to_quote(out_amount_atomic),
            atomic_to_base(in_amount_atomic),
        ),
        SwapSide::BuyBase => (
            atomic_to_quote(in_amount_atomic),
            atomic_to_base(out_amount_atomic),
        ),
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

/// Resolve exited base and quote amounts. Balance deltas win when both
/// are positive; otherwise the venue result, then the estimate.
fn reconcile_exit_amounts(
    direction: Direction,
    pre_balances: Option<(Decimal, Decimal)>,
    post_balances: Option<(Decimal, Decimal)>,
    venue_result: &FillResult,
    estimated: &FillResult,
) -> (Decimal, Decimal) {
    if let (Some((pre_quote, pre_base)), Some((post_quote, post_base))) =
        (pre_balances, post_balances)
    {
        let (base_amount, quote_amount) = match direction {
            Direction::Long => (pre_base - post_base, post_quote - pre_quote),
            Direction::Short => (post_base - pre_base, pre_quote - post_quote),
        };
        if base_amount > Decimal::ZERO && quote_amount > Decimal::ZERO {
            return (base_amount, quote_amount);
        }
    }
    if venue_result.base_amount > Decimal::ZERO {
        return (venue_result.base_amount, venue_result.quote_amount);
    }
    (estimated.base_amount, estimated.quote_amount)
}

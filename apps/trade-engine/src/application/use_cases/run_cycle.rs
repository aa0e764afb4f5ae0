//! Run Cycle Use Case (scheduled tick controller)
//!
//! One invocation is one tick: acquire the runner lock, evaluate the
//! open position for an exit or the latest closed bar for an entry,
//! and always leave behind exactly one run record and a released lock.
//! Nothing is allowed to escape this layer; an unexpected failure
//! becomes a FAILED run, never a poisoned scheduler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, warn};

use crate::application::ports::execution_port::ExecutionPort;
use crate::application::ports::lock_port::LockPort;
use crate::application::ports::market_data_port::MarketDataPort;
use crate::application::ports::persistence_port::PersistencePort;
use crate::application::ports::strategy_port::{StrategyDecision, StrategyPort};
use crate::application::use_cases::close_position::{ClosePositionStatus, ClosePositionUseCase};
use crate::application::use_cases::open_position::{OpenPositionStatus, OpenPositionUseCase};
use crate::config::BotConfig;
use crate::domain::market::utc_day_range;
use crate::domain::run::{build_run_id, RunRecord, RunResult};
use crate::domain::trade::{CloseReason, Direction, Trade};

/// Runner lock TTL; covers a worst-case orchestration including every
/// retry and confirmation wait.
pub const RUNNER_LOCK_TTL: Duration = Duration::from_secs(240);
/// Per-bar entry idempotency TTL. Long enough to outlive any realistic
/// bar, short enough to self-clean.
pub const ENTRY_IDEMPOTENCY_TTL: Duration = Duration::from_secs(12 * 60 * 60);
/// Bars fetched per evaluation.
pub const OHLCV_FETCH_LIMIT: u32 = 300;

/// Outcome of the inner cycle, before it is stamped into a run record.
struct CycleOutcome {
    result: RunResult,
    summary: String,
    reason: Option<String>,
    trade_id: Option<String>,
    metrics: Option<BTreeMap<String, serde_json::Value>>,
    bar_close_time: Option<DateTime<Utc>>,
}

impl CycleOutcome {
    fn new(result: RunResult, summary: impl Into<String>) -> Self {
        Self {
            result,
            summary: summary.into(),
            reason: None,
            trade_id: None,
            metrics: None,
            bar_close_time: None,
        }
    }

    fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Use case driving one scheduled execution cycle.
pub struct RunCycleUseCase<X, L, P, M, S>
where
    X: ExecutionPort,
    L: LockPort,
    P: PersistencePort,
    M: MarketDataPort,
    S: StrategyPort,
{
    execution: Arc<X>,
    lock: Arc<L>,
    persistence: Arc<P>,
    market_data: Arc<M>,
    strategy: Arc<S>,
    model_id: String,
}

impl<X, L, P, M, S> RunCycleUseCase<X, L, P, M, S>
where
    X: ExecutionPort,
    L: LockPort,
    P: PersistencePort,
    M: MarketDataPort,
    S: StrategyPort,
{
    /// Create a new `RunCycleUseCase` for one trading instance.
    pub const fn new(
        execution: Arc<X>,
        lock: Arc<L>,
        persistence: Arc<P>,
        market_data: Arc<M>,
        strategy: Arc<S>,
        model_id: String,
    ) -> Self {
        Self {
            execution,
            lock,
            persistence,
            market_data,
            strategy,
            model_id,
        }
    }

    /// Run one tick. Infallible by contract: every failure mode is
    /// folded into the returned run record.
    pub async fn execute(&self) -> RunRecord {
        let executed_at = Utc::now();

        let acquired = self
            .lock
            .acquire_runner_lock(RUNNER_LOCK_TTL)
            .await
            .unwrap_or_else(|lock_error| {
                warn!(error = %lock_error, "runner lock acquisition errored");
                false
            });
        if !acquired {
            let outcome = CycleOutcome::new(RunResult::Skipped, "SKIPPED: runner lock held")
                .with_reason("runner lock held by another process");
            let record = self.stamp(outcome, executed_at);
            self.save_run(&record).await;
            return record;
        }

        let outcome = match self.cycle(executed_at).await {
            Ok(outcome) => outcome,
            Err(message) => {
                error!(error = %message, "run cycle failed");
                CycleOutcome::new(RunResult::Failed, format!("FAILED: {message}"))
                    .with_reason(message)
            }
        };
        let record = self.stamp(outcome, executed_at);

        self.save_run(&record).await;
        if let Err(lock_error) = self.lock.release_runner_lock().await {
            warn!(error = %lock_error, "runner lock release failed");
        }
        record
    }

    async fn cycle(&self, executed_at: DateTime<Utc>) -> Result<CycleOutcome, String> {
        let config = self
            .persistence
            .get_current_config()
            .await
            .map_err(|error| format!("config load failed: {error}"))?;
        let bar_close_time = config.signal_timeframe.last_closed_bar_close(executed_at);
        let stamp = |mut outcome: CycleOutcome| {
            outcome.bar_close_time = Some(bar_close_time);
            outcome
        };

        if !config.enabled {
            return Ok(stamp(
                CycleOutcome::new(RunResult::Skipped, "SKIPPED: bot disabled")
                    .with_reason("bot disabled"),
            ));
        }

        if let Some(trade) = self
            .persistence
            .find_open_trade(&config.pair)
            .await
            .map_err(|error| format!("open-trade lookup failed: {error}"))?
        {
            return Ok(stamp(self.exit_check(&config, trade).await?));
        }

        Ok(stamp(self.entry_check(&config, bar_close_time).await?))
    }

    /// Exit phase: compare the mark price against the recorded stop
    /// and target and delegate to the exit orchestrator on a trigger.
    async fn exit_check(&self, config: &BotConfig, trade: Trade) -> Result<CycleOutcome, String> {
        let mark_price = self.resolve_mark_price(config).await?;
        let stop_price = trade.position.stop_price;
        let take_profit_price = trade.position.take_profit_price;

        // Stop before target: when a bar's range touches both levels,
        // assume the worse outcome.
        let reason = match trade.direction {
            Direction::Long if mark_price <= stop_price => Some(CloseReason::StopLoss),
            Direction::Long if mark_price >= take_profit_price => Some(CloseReason::TakeProfit),
            Direction::Short if mark_price >= stop_price => Some(CloseReason::StopLoss),
            Direction::Short if mark_price <= take_profit_price => Some(CloseReason::TakeProfit),
            _ => None,
        };

        let mut metrics = BTreeMap::from([
            ("phase".to_string(), json!("exit_check")),
            ("mark_price".to_string(), json!(mark_price.to_string())),
            ("stop_price".to_string(), json!(stop_price.to_string())),
            (
                "take_profit_price".to_string(),
                json!(take_profit_price.to_string()),
            ),
        ]);

        let Some(reason) = reason else {
            info!(
                trade_id = %trade.trade_id,
                mark_price = %mark_price,
                "no exit trigger, holding"
            );
            let mut outcome = CycleOutcome::new(
                RunResult::Hold,
                format!("HOLD: mark {mark_price} between stop and target"),
            );
            outcome.trade_id = Some(trade.trade_id);
            outcome.metrics = Some(metrics);
            return Ok(outcome);
        };

        metrics.insert("trigger".to_string(), json!(reason.as_str()));
        info!(
            trade_id = %trade.trade_id,
            reason = %reason,
            mark_price = %mark_price,
            "exit trigger fired"
        );

        let close = ClosePositionUseCase::new(
            Arc::clone(&self.execution),
            Arc::clone(&self.lock),
            Arc::clone(&self.persistence),
        );
        let exit = close
            .execute(config, trade, reason, mark_price)
            .await
            .map_err(|error| format!("exit orchestration failed: {error}"))?;

        let result = match exit.status {
            ClosePositionStatus::Closed => RunResult::Closed,
            ClosePositionStatus::Skipped => RunResult::Skipped,
            ClosePositionStatus::Failed => RunResult::Failed,
        };
        let mut outcome = CycleOutcome::new(result, exit.summary);
        outcome.trade_id = Some(exit.trade_id);
        outcome.metrics = Some(metrics);
        Ok(outcome)
    }

    /// Entry phase: idempotency marker, bar freshness, daily cap,
    /// strategy decision, then the entry orchestrator.
    async fn entry_check(
        &self,
        config: &BotConfig,
        bar_close_time: DateTime<Utc>,
    ) -> Result<CycleOutcome, String> {
        let bar_key = format!("{}:{}", self.model_id, bar_close_time.to_rfc3339());
        let already_judged = self
            .lock
            .has_entry_attempt(&bar_key)
            .await
            .map_err(|error| format!("idempotency check failed: {error}"))?;
        if already_judged {
            return Ok(CycleOutcome::new(
                RunResult::SkippedEntry,
                "SKIPPED_ENTRY: bar already evaluated",
            )
            .with_reason("entry already evaluated for this bar"));
        }

        let bars = self
            .market_data
            .fetch_bars(&config.pair, config.signal_timeframe, OHLCV_FETCH_LIMIT)
            .await
            .map_err(|error| format!("bar fetch failed: {error}"))?;
        let latest_close = bars
            .last()
            .map(|bar| bar.close_time)
            .ok_or_else(|| "no bars returned".to_string())?;
        if latest_close != bar_close_time {
            // Stale market data must never silently feed a decision.
            return Err(format!(
                "stale market data: latest bar closes {latest_close}, expected {bar_close_time}"
            ));
        }

        let (day_start, day_end) = utc_day_range(bar_close_time);
        let trades_today = self
            .persistence
            .count_trades_for_utc_day(&config.pair, day_start, day_end)
            .await
            .map_err(|error| format!("daily trade count failed: {error}"))?;
        if trades_today >= config.risk.max_trades_per_day {
            return Ok(CycleOutcome::new(
                RunResult::Skipped,
                format!("SKIPPED: daily trade cap {trades_today} reached"),
            )
            .with_reason("daily trade cap reached"));
        }

        let decision = self
            .strategy
            .evaluate(&bars, config)
            .await
            .map_err(|error| format!("strategy evaluation failed: {error}"))?;

        let mut metrics = BTreeMap::from([
            ("phase".to_string(), json!("entry_check")),
            (
                "bar_close_time".to_string(),
                json!(bar_close_time.to_rfc3339()),
            ),
            ("trades_today".to_string(), json!(trades_today)),
        ]);

        match decision {
            StrategyDecision::NoSignal {
                summary,
                diagnostics,
            } => {
                // A no-signal bar is still a judged bar.
                self.mark_entry(&bar_key).await;
                metrics.extend(diagnostics);
                let mut outcome = CycleOutcome::new(RunResult::NoSignal, summary);
                outcome.metrics = Some(metrics);
                Ok(outcome)
            }
            StrategyDecision::Enter(signal) => {
                let marked = self
                    .lock
                    .mark_entry_attempt(&bar_key, ENTRY_IDEMPOTENCY_TTL)
                    .await
                    .map_err(|error| format!("idempotency mark failed: {error}"))?;
                if !marked {
                    return Ok(CycleOutcome::new(
                        RunResult::SkippedEntry,
                        "SKIPPED_ENTRY: bar concurrently evaluated",
                    )
                    .with_reason("lost the per-bar idempotency race"));
                }

                metrics.extend(signal.diagnostics.clone());
                let open = OpenPositionUseCase::new(
                    Arc::clone(&self.execution),
                    Arc::clone(&self.lock),
                    Arc::clone(&self.persistence),
                );
                let entry = open
                    .execute(config, &signal, bar_close_time, &self.model_id)
                    .await
                    .map_err(|error| format!("entry orchestration failed: {error}"))?;

                let result = match entry.status {
                    OpenPositionStatus::Opened => RunResult::Opened,
                    OpenPositionStatus::Skipped => RunResult::Skipped,
                    OpenPositionStatus::Canceled => RunResult::SkippedEntry,
                    OpenPositionStatus::Failed => RunResult::Failed,
                };
                let mut outcome = CycleOutcome::new(result, entry.summary);
                outcome.trade_id = Some(entry.trade_id);
                outcome.metrics = Some(metrics);
                Ok(outcome)
            }
        }
    }

    /// Venue mark price, falling back to the latest bar close when the
    /// venue cannot price the pair right now.
    async fn resolve_mark_price(&self, config: &BotConfig) -> Result<Decimal, String> {
        match self.execution.get_mark_price(&config.pair).await {
            Ok(price) => Ok(price),
            Err(venue_error) => {
                warn!(
                    error = %venue_error,
                    "mark price unavailable from venue, falling back to last bar close"
                );
                let bars = self
                    .market_data
                    .fetch_bars(&config.pair, config.signal_timeframe, 1)
                    .await
                    .map_err(|error| format!("mark price fallback failed: {error}"))?;
                bars.last()
                    .map(|bar| bar.close)
                    .ok_or_else(|| "mark price fallback returned no bars".to_string())
            }
        }
    }

    async fn mark_entry(&self, bar_key: &str) {
        if let Err(lock_error) = self
            .lock
            .mark_entry_attempt(bar_key, ENTRY_IDEMPOTENCY_TTL)
            .await
        {
            warn!(error = %lock_error, "entry idempotency mark failed");
        }
    }

    fn stamp(&self, outcome: CycleOutcome, executed_at: DateTime<Utc>) -> RunRecord {
        let bar_close_time = outcome.bar_close_time.unwrap_or(executed_at);
        RunRecord {
            run_id: build_run_id(bar_close_time, executed_at),
            model_id: self.model_id.clone(),
            bar_close_time,
            executed_at,
            result: outcome.result,
            summary: outcome.summary,
            reason: outcome.reason,
            trade_id: outcome.trade_id,
            metrics: outcome.metrics,
        }
    }

    /// Best effort: a run record that cannot be saved is logged, not
    /// retried, and never aborts the cycle.
    async fn save_run(&self, record: &RunRecord) {
        if let Err(persistence_error) = self.persistence.save_run(record.clone()).await {
            error!(
                run_id = %record.run_id,
                error = %persistence_error,
                "run record save failed"
            );
        }
    }
}

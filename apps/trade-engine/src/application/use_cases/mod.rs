//! Use cases: the entry/exit orchestrators and the run-cycle
//! controller.

pub mod close_position;
pub mod open_position;
pub mod run_cycle;

pub use close_position::{ClosePositionOutcome, ClosePositionStatus, ClosePositionUseCase};
pub use open_position::{OpenPositionOutcome, OpenPositionStatus, OpenPositionUseCase};
pub use run_cycle::RunCycleUseCase;

use chrono::Utc;

use crate::application::ports::persistence_port::{PersistenceError, PersistencePort};
use crate::domain::state::{StateError, TradeState};
use crate::domain::trade::{Trade, TradePatch};

/// Failures the orchestrators do not convert into trade outcomes:
/// invariant violations and persistence faults. These propagate to the
/// run-cycle controller.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Illegal trade state transition; a programming-logic error.
    #[error(transparent)]
    State(#[from] StateError),

    /// Ledger store failure.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Validate and apply a state transition, then persist the full
/// mutable surface of the trade.
///
/// A no-op when the trade is already in `next` (a resubmission attempt
/// re-persists snapshots without re-entering the state).
pub(crate) async fn transition_and_persist<P: PersistencePort>(
    persistence: &P,
    trade: &mut Trade,
    next: TradeState,
) -> Result<(), OrchestrationError> {
    if trade.state != next {
        crate::domain::state::assert_transition(trade.state, next)?;
        trade.state = next;
    }
    trade.updated_at = Utc::now();
    persistence
        .update_trade(
            &trade.trade_id,
            TradePatch {
                state: Some(trade.state),
                plan: Some(trade.plan.clone()),
                execution: Some(trade.execution.clone()),
                position: Some(trade.position.clone()),
                close_reason: trade.close_reason,
                updated_at: Some(trade.updated_at),
            },
        )
        .await?;
    Ok(())
}

/// Persist only the execution snapshot, leaving the state untouched.
/// Used mid-attempt so a crash between submission and confirmation
/// leaves auditable state.
pub(crate) async fn persist_execution_only<P: PersistencePort>(
    persistence: &P,
    trade: &mut Trade,
) -> Result<(), OrchestrationError> {
    trade.updated_at = Utc::now();
    persistence
        .update_trade(
            &trade.trade_id,
            TradePatch {
                execution: Some(trade.execution.clone()),
                updated_at: Some(trade.updated_at),
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

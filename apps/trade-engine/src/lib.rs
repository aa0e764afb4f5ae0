// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Trade Engine - Rust Core Library
//!
//! Deterministic execution core for a single-pair swap trading bot.
//!
//! # Architecture (Clean Architecture + Hexagonal)
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: Pure business logic, no I/O
//!   - `trade`: Trade entity, snapshots, typed partial updates
//!   - `state`: lifecycle transition table
//!   - `run`: per-tick run records
//!   - `market`: timeframes, bar boundaries, atomic-unit conversion
//!   - `risk`: stop tightening, R-multiple targets, regime sizing
//!   - `slippage`: tolerance widening arithmetic
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `ExecutionPort`, `LockPort`, `PersistencePort`,
//!     `MarketDataPort`, `StrategyPort`
//!   - `use_cases`: `OpenPosition`, `ClosePosition`, `RunCycle`
//!
//! Adapters for the real swap venue, ledger store, market-data feed,
//! and strategy collaborator implement the ports outside this crate.
//!
//! # Guarantees
//!
//! - At most one concurrent cycle per trading instance (runner lock).
//! - At most one entry decision per closed bar (idempotency marker).
//! - Every trade mutation passes the lifecycle transition table.
//! - Amounts cross the execution boundary only as integer atomic units.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Domain layer - Core business logic with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Execution error classification.
pub mod classify;

/// Bot configuration loading and validation.
pub mod config;

/// Tracing setup.
pub mod telemetry;

// Domain re-exports
pub use domain::market::{OhlcvBar, Timeframe};
pub use domain::run::{RunRecord, RunResult};
pub use domain::state::TradeState;
pub use domain::trade::{CloseReason, Direction, Pair, Trade, TradePatch};

// Application re-exports
pub use application::ports::{
    ExecutionError, ExecutionPort, InMemoryLockCoordinator, InMemoryPersistence, LockPort,
    MarketDataPort, PersistencePort, StrategyDecision, StrategyPort,
};
pub use application::use_cases::{
    ClosePositionOutcome, ClosePositionStatus, ClosePositionUseCase, OpenPositionOutcome,
    OpenPositionStatus, OpenPositionUseCase, RunCycleUseCase,
};
pub use classify::{classify_execution_error, ErrorAction, ErrorClassification, ErrorKind};
pub use config::{load_config, BotConfig, ConfigError};

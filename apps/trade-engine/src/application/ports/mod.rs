//! Driven ports: interfaces the orchestration layer depends on.
//!
//! Production adapters (swap venue HTTP client, ledger store, Redis
//! lock backend) live outside this crate; in-memory implementations of
//! the lock and persistence ports ship here for tests and paper
//! trading.

pub mod execution_port;
pub mod lock_port;
pub mod market_data_port;
pub mod persistence_port;
pub mod strategy_port;

pub use execution_port::{
    ExecutionError, ExecutionPort, SubmitSwapRequest, SwapConfirmation, SwapSide, SwapSubmission,
};
pub use lock_port::{InMemoryLockCoordinator, LockError, LockPort};
pub use market_data_port::{MarketDataError, MarketDataPort};
pub use persistence_port::{InMemoryPersistence, PersistenceError, PersistencePort};
pub use strategy_port::{EntrySignal, StrategyDecision, StrategyError, StrategyPort};

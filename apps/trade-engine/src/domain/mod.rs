//! Domain layer: pure trade, market, and risk types with no I/O.

pub mod market;
pub mod risk;
pub mod run;
pub mod slippage;
pub mod state;
pub mod trade;

pub use market::{OhlcvBar, Timeframe};
pub use run::{RunRecord, RunResult};
pub use state::TradeState;
pub use trade::{CloseReason, Direction, Pair, Trade, TradePatch};

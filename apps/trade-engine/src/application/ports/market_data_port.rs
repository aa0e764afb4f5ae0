//! Market Data Port (Driven Port)

use async_trait::async_trait;

use crate::domain::market::{OhlcvBar, Timeframe};
use crate::domain::trade::Pair;

/// Market data source error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Market data error: {message}")]
pub struct MarketDataError {
    /// Error details.
    pub message: String,
}

impl MarketDataError {
    /// Wrap a raw message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Port for OHLCV retrieval. Bars are returned oldest-first; the last
/// element is the most recently closed bar.
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Fetch up to `limit` closed bars.
    async fn fetch_bars(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<OhlcvBar>, MarketDataError>;
}

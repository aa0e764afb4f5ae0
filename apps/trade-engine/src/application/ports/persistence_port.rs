//! Persistence Port (Driven Port)
//!
//! Ledger store for trades, run records, and the current config.
//! Trade updates travel as a [`TradePatch`]: absent fields never
//! overwrite persisted values.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::BotConfig;
use crate::domain::run::RunRecord;
use crate::domain::state::TradeState;
use crate::domain::trade::{Pair, Trade, TradePatch};

/// Persistence backend error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    /// Backend unavailable or misbehaving.
    #[error("Persistence backend error: {message}")]
    Backend {
        /// Error details.
        message: String,
    },

    /// No current config document.
    #[error("No current config available")]
    ConfigMissing,

    /// Update target does not exist.
    #[error("Trade not found: {trade_id}")]
    TradeNotFound {
        /// The missing trade id.
        trade_id: String,
    },
}

/// Port for the ledger store.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// Fetch the current bot configuration.
    async fn get_current_config(&self) -> Result<BotConfig, PersistenceError>;

    /// Persist a freshly created trade.
    async fn create_trade(&self, trade: Trade) -> Result<(), PersistenceError>;

    /// Apply a partial update to a trade.
    async fn update_trade(&self, trade_id: &str, patch: TradePatch)
        -> Result<(), PersistenceError>;

    /// The open (CONFIRMED) trade for a pair, if any.
    async fn find_open_trade(&self, pair: &Pair) -> Result<Option<Trade>, PersistenceError>;

    /// Number of trades created for a pair within `[start, end)`.
    async fn count_trades_for_utc_day(
        &self,
        pair: &Pair,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u32, PersistenceError>;

    /// Persist a run record.
    async fn save_run(&self, run: RunRecord) -> Result<(), PersistenceError>;
}

#[derive(Debug, Default)]
struct Store {
    config: Option<BotConfig>,
    trades: HashMap<String, Trade>,
    runs: Vec<RunRecord>,
}

/// In-memory persistence for tests and paper trading.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    store: Mutex<Store>,
}

impl InMemoryPersistence {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a current config.
    #[must_use]
    pub fn with_config(config: BotConfig) -> Self {
        let store = Self::new();
        #[allow(clippy::unwrap_used)]
        {
            store.store.lock().unwrap().config = Some(config);
        }
        store
    }

    /// Snapshot a trade by id.
    #[must_use]
    pub fn trade(&self, trade_id: &str) -> Option<Trade> {
        #[allow(clippy::unwrap_used)]
        let store = self.store.lock().unwrap();
        store.trades.get(trade_id).cloned()
    }

    /// Snapshot all persisted run records.
    #[must_use]
    pub fn runs(&self) -> Vec<RunRecord> {
        #[allow(clippy::unwrap_used)]
        let store = self.store.lock().unwrap();
        store.runs.clone()
    }

    /// Insert a trade directly, bypassing the create path.
    pub fn seed_trade(&self, trade: Trade) {
        #[allow(clippy::unwrap_used)]
        let mut store = self.store.lock().unwrap();
        store.trades.insert(trade.trade_id.clone(), trade);
    }
}

#[async_trait]
impl PersistencePort for InMemoryPersistence {
    async fn get_current_config(&self) -> Result<BotConfig, PersistenceError> {
        #[allow(clippy::unwrap_used)]
        let store = self.store.lock().unwrap();
        store.config.clone().ok_or(PersistenceError::ConfigMissing)
    }

    async fn create_trade(&self, trade: Trade) -> Result<(), PersistenceError> {
        #[allow(clippy::unwrap_used)]
        let mut store = self.store.lock().unwrap();
        store.trades.insert(trade.trade_id.clone(), trade);
        Ok(())
    }

    async fn update_trade(
        &self,
        trade_id: &str,
        patch: TradePatch,
    ) -> Result<(), PersistenceError> {
        #[allow(clippy::unwrap_used)]
        let mut store = self.store.lock().unwrap();
        let trade = store
            .trades
            .get_mut(trade_id)
            .ok_or_else(|| PersistenceError::TradeNotFound {
                trade_id: trade_id.to_string(),
            })?;
        patch.apply_to(trade);
        Ok(())
    }

    async fn find_open_trade(&self, pair: &Pair) -> Result<Option<Trade>, PersistenceError> {
        #[allow(clippy::unwrap_used)]
        let store = self.store.lock().unwrap();
        Ok(store
            .trades
            .values()
            .find(|trade| trade.pair == *pair && trade.state == TradeState::Confirmed)
            .cloned())
    }

    async fn count_trades_for_utc_day(
        &self,
        pair: &Pair,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u32, PersistenceError> {
        #[allow(clippy::unwrap_used)]
        let store = self.store.lock().unwrap();
        let count = store
            .trades
            .values()
            .filter(|trade| {
                trade.pair == *pair && trade.created_at >= start && trade.created_at < end
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn save_run(&self, run: RunRecord) -> Result<(), PersistenceError> {
        #[allow(clippy::unwrap_used)]
        let mut store = self.store.lock().unwrap();
        store.runs.push(run);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trade::sample_trade;

    #[tokio::test]
    async fn update_patches_without_overwriting() {
        let persistence = InMemoryPersistence::new();
        let trade = sample_trade();
        let trade_id = trade.trade_id.clone();
        let original_plan = trade.plan.clone();
        persistence.create_trade(trade).await.unwrap();

        let patch = TradePatch {
            state: Some(TradeState::Submitted),
            ..Default::default()
        };
        persistence.update_trade(&trade_id, patch).await.unwrap();

        let stored = persistence.trade(&trade_id).unwrap();
        assert_eq!(stored.state, TradeState::Submitted);
        assert_eq!(stored.plan, original_plan);
    }

    #[tokio::test]
    async fn update_of_missing_trade_fails() {
        let persistence = InMemoryPersistence::new();
        let error = persistence
            .update_trade("nope", TradePatch::default())
            .await
            .unwrap_err();
        assert!(matches!(error, PersistenceError::TradeNotFound { .. }));
    }

    #[tokio::test]
    async fn find_open_trade_only_sees_confirmed() {
        let persistence = InMemoryPersistence::new();
        let mut trade = sample_trade();
        let pair = trade.pair.clone();
        persistence.create_trade(trade.clone()).await.unwrap();
        assert!(persistence.find_open_trade(&pair).await.unwrap().is_none());

        trade.state = TradeState::Confirmed;
        persistence.seed_trade(trade);
        assert!(persistence.find_open_trade(&pair).await.unwrap().is_some());
    }
}

//! Lock Port (Driven Port)
//!
//! Distributed primitives shared by all scheduler processes: the
//! runner mutual-exclusion lock, the per-bar entry idempotency marker,
//! and the per-signature inflight marker. Backed externally in
//! production (a keyed store with TTL and atomic compare-and-delete);
//! an in-memory implementation ships here for tests and paper trading.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

/// Lock backend error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LockError {
    /// Backend unavailable or misbehaving.
    #[error("Lock backend error: {message}")]
    Backend {
        /// Error details.
        message: String,
    },
}

/// Port for distributed locking and idempotency markers.
#[async_trait]
pub trait LockPort: Send + Sync {
    /// Try to acquire the runner lock for `ttl`. Returns `false` when
    /// another holder owns it.
    async fn acquire_runner_lock(&self, ttl: Duration) -> Result<bool, LockError>;

    /// Release the runner lock if this instance still holds it.
    /// A stale or duplicate release is a no-op.
    async fn release_runner_lock(&self) -> Result<(), LockError>;

    /// Atomically mark the entry decision for a bar. Returns `true`
    /// exactly once per key within the TTL window.
    async fn mark_entry_attempt(&self, bar_key: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Whether the entry decision for a bar was already marked.
    async fn has_entry_attempt(&self, bar_key: &str) -> Result<bool, LockError>;

    /// Set the advisory inflight marker for a tx signature.
    async fn set_inflight_tx(&self, tx_signature: &str, ttl: Duration) -> Result<(), LockError>;

    /// Whether a tx signature is currently marked inflight.
    async fn has_inflight_tx(&self, tx_signature: &str) -> Result<bool, LockError>;

    /// Clear the inflight marker. Cleared unconditionally on both
    /// success and failure paths.
    async fn clear_inflight_tx(&self, tx_signature: &str) -> Result<(), LockError>;
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-memory lock coordinator for tests and single-process paper
/// trading. TTL expiry is lazy: entries are dropped when observed
/// expired.
#[derive(Debug, Default)]
pub struct InMemoryLockCoordinator {
    entries: Mutex<HashMap<String, Entry>>,
    runner_token: Mutex<Option<String>>,
}

impl InMemoryLockCoordinator {
    /// Create an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    const RUNNER_KEY: &'static str = "lock:runner";

    #[allow(clippy::unwrap_used)] // lock poisoning is unrecoverable here
    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| entry.live());
        f(&mut entries)
    }
}

#[async_trait]
impl LockPort for InMemoryLockCoordinator {
    async fn acquire_runner_lock(&self, ttl: Duration) -> Result<bool, LockError> {
        let token = Uuid::new_v4().to_string();
        let acquired = self.with_entries(|entries| {
            if entries.get(Self::RUNNER_KEY).is_some_and(Entry::live) {
                return false;
            }
            entries.insert(
                Self::RUNNER_KEY.to_string(),
                Entry {
                    value: token.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
            true
        });
        if acquired {
            #[allow(clippy::unwrap_used)]
            {
                *self.runner_token.lock().unwrap() = Some(token);
            }
        }
        Ok(acquired)
    }

    async fn release_runner_lock(&self) -> Result<(), LockError> {
        #[allow(clippy::unwrap_used)]
        let token = self.runner_token.lock().unwrap().take();
        let Some(token) = token else {
            return Ok(());
        };
        // Compare-and-delete: only the holder's token removes the key.
        self.with_entries(|entries| {
            if entries
                .get(Self::RUNNER_KEY)
                .is_some_and(|entry| entry.value == token)
            {
                entries.remove(Self::RUNNER_KEY);
            }
        });
        Ok(())
    }

    async fn mark_entry_attempt(&self, bar_key: &str, ttl: Duration) -> Result<bool, LockError> {
        let key = format!("entry:{bar_key}");
        Ok(self.with_entries(|entries| {
            if entries.get(&key).is_some_and(Entry::live) {
                return false;
            }
            entries.insert(
                key,
                Entry {
                    value: String::new(),
                    expires_at: Instant::now() + ttl,
                },
            );
            true
        }))
    }

    async fn has_entry_attempt(&self, bar_key: &str) -> Result<bool, LockError> {
        let key = format!("entry:{bar_key}");
        Ok(self.with_entries(|entries| entries.get(&key).is_some_and(Entry::live)))
    }

    async fn set_inflight_tx(&self, tx_signature: &str, ttl: Duration) -> Result<(), LockError> {
        let key = format!("inflight:{tx_signature}");
        self.with_entries(|entries| {
            entries.insert(
                key,
                Entry {
                    value: String::new(),
                    expires_at: Instant::now() + ttl,
                },
            );
        });
        Ok(())
    }

    async fn has_inflight_tx(&self, tx_signature: &str) -> Result<bool, LockError> {
        let key = format!("inflight:{tx_signature}");
        Ok(self.with_entries(|entries| entries.get(&key).is_some_and(Entry::live)))
    }

    async fn clear_inflight_tx(&self, tx_signature: &str) -> Result<(), LockError> {
        let key = format!("inflight:{tx_signature}");
        self.with_entries(|entries| {
            entries.remove(&key);
        });
        Ok(())
    }
}

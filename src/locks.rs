//! Per-license-key serialization of read-modify-write mutations.
//!
//! Two activations of the same key from different domains must not both read
//! the old domain set and overwrite each other. Every mutating path takes the
//! key's guard for the duration of its load → decide → persist sequence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held while a license is being mutated.
#[derive(Debug)]
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Entries nobody else references are idle; drop them while we hold the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        KeyGuard {
            _guard: entry.lock_owned().await,
        }
    }

    /// Number of keys currently tracked (locked or awaited).
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.lock("K1").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock("K1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.lock("K1").await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock("K2"))
            .await
            .expect("K2 should not wait on K1");
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = KeyLocks::new();
        {
            let _a = locks.lock("K1").await;
        }
        let _b = locks.lock("K2").await;
        assert_eq!(locks.tracked(), 1);
    }
}

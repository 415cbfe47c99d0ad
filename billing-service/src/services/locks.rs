//! Per-key async mutexes serializing bill mutations within this process.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock key for a customer's bill in a billing period.
pub fn bill_lock_key(customer_id: &str, billing_period: &str) -> String {
    format!("{}:{}", customer_id, billing_period)
}

#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds a key's lock; the map entry is dropped once nobody else wants it.
pub struct KeyedGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release first so the strong count below only sees the map and waiters.
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let first = locks.lock("c1:2024-05").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("c1:2024-05").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender should acquire the lock")
            .unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("c1:2024-05").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("c2:2024-05")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn entries_are_cleaned_up_after_release() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.lock(&bill_lock_key("c1", "2024-05")).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}

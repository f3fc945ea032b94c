//! Per-chain serialization of read-modify-write sequences.
//!
//! The in-memory backend has no atomic single-row update, and two background jobs may
//! race on the same chain. Every writer takes the chain's guard first.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ChainLocks {
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl ChainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder of `chain_id` remains
    pub async fn lock(&self, chain_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // an entry only the map refers to is neither held nor awaited
            locks.retain(|id, lock| *id == chain_id || Arc::strong_count(lock) > 1);
            locks.entry(chain_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_chain_is_serialized() {
        let locks = ChainLocks::new();
        let chain = Uuid::new_v4();
        let counter = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.lock(chain).await;
        let task = {
            let locks = locks.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(chain).await;
                counter.lock().await.push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        counter.lock().await.push("first");
        drop(guard);
        task.await.unwrap();

        assert_eq!(*counter.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn different_chains_do_not_block() {
        let locks = ChainLocks::new();
        let _a = locks.lock(Uuid::new_v4()).await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock(Uuid::new_v4()))
            .await
            .expect("independent chain lock");
        assert_eq!(locks.tracked().await, 2);
    }

    #[tokio::test]
    async fn released_chains_are_evicted() {
        let locks = ChainLocks::new();
        let deleted = Uuid::new_v4();
        drop(locks.lock(deleted).await);

        let _held = locks.lock(Uuid::new_v4()).await;
        assert_eq!(locks.tracked().await, 1);

        // a held lock survives pruning
        let _other = locks.lock(Uuid::new_v4()).await;
        assert_eq!(locks.tracked().await, 2);
    }
}

//! Sorted pessimistic lock discipline: acquiring locks for two users always
//! in the same (lexicographic user-id) order makes concurrent two-party
//! trades deadlock-free. Stands in for the `SELECT ... FOR UPDATE` row
//! locks a real deployment takes inside the same transaction.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::errors::AccountError;

#[derive(Default)]
pub struct LockManager {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(user_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn acquire(&self, user_id: Uuid, timeout: Duration) -> Result<OwnedMutexGuard<()>, AccountError> {
        tokio::time::timeout(timeout, self.lock_for(user_id).lock_owned()).await.map_err(|_| AccountError::LockTimeout)
    }

    /// Acquire both users' locks in lexicographic id order. If `a == b`
    /// (a self-trade), only one lock is taken.
    pub async fn acquire_sorted(&self, a: Uuid, b: Uuid, timeout: Duration) -> Result<(OwnedMutexGuard<()>, Option<OwnedMutexGuard<()>>), AccountError> {
        if a == b {
            return Ok((self.acquire(a, timeout).await?, None));
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first_guard = self.acquire(first, timeout).await?;
        let second_guard = self.acquire(second, timeout).await?;
        if a < b {
            Ok((first_guard, Some(second_guard)))
        } else {
            Ok((second_guard, Some(first_guard)))
        }
    }

    pub async fn acquire_single(&self, user_id: Uuid, timeout: Duration) -> Result<OwnedMutexGuard<()>, AccountError> {
        self.acquire(user_id, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sorted_acquire_never_deadlocks_under_reversed_order() {
        let manager = Arc::new(LockManager::new());
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);

        let m1 = manager.clone();
        let t1 = tokio::spawn(async move {
            for _ in 0..50 {
                let _guards = m1.acquire_sorted(a, b, Duration::from_millis(500)).await.unwrap();
            }
        });
        let m2 = manager.clone();
        let t2 = tokio::spawn(async move {
            for _ in 0..50 {
                // reversed argument order — must not deadlock against t1
                let _guards = m2.acquire_sorted(b, a, Duration::from_millis(500)).await.unwrap();
            }
        });

        let (r1, r2) = tokio::join!(t1, t2);
        r1.unwrap();
        r2.unwrap();
    }

    #[tokio::test]
    async fn self_trade_takes_a_single_lock() {
        let manager = LockManager::new();
        let user = Uuid::new_v4();
        let (_first, second) = manager.acquire_sorted(user, user, Duration::from_millis(100)).await.unwrap();
        assert!(second.is_none());
    }
}

//! Striped per-key async mutex.
//!
//! Serializes writes per `(bucket, key)` so the latest pointer and the
//! version chain stay consistent under concurrent PUTs. The stripe
//! count is prime so common hash bit patterns don't land on a handful
//! of hot stripes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Prime stripe count
const STRIPES: usize = 1021;

/// Striped lock table keyed by `(bucket, key)`.
pub struct KeyMutex {
    stripes: Vec<Arc<Mutex<()>>>,
}

impl KeyMutex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    fn stripe_for(&self, bucket: &str, key: &str) -> Arc<Mutex<()>> {
        let mut hasher = DefaultHasher::new();
        bucket.hash(&mut hasher);
        key.hash(&mut hasher);
        let idx = (hasher.finish() % STRIPES as u64) as usize;
        self.stripes[idx].clone()
    }

    /// Acquire the write lock for a key. The guard is held across the
    /// blob write and the metadata commit.
    pub async fn lock(&self, bucket: &str, key: &str) -> OwnedMutexGuard<()> {
        self.stripe_for(bucket, key).lock_owned().await
    }
}

impl Default for KeyMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyMutex::new());
        let guard = locks.lock("b", "k").await;

        let locks2 = locks.clone();
        let contender = tokio::spawn(async move { locks2.lock("b", "k").await });

        // The second acquisition must not complete while the first
        // guard is held.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_reusable_after_release() {
        let locks = KeyMutex::new();
        for _ in 0..3 {
            let guard = locks.lock("b", "k").await;
            drop(guard);
        }
    }
}

//! Login throttling.
//!
//! Two layers: a per-IP token bucket (5 attempts per minute, refilled
//! continuously) and a per-user lockout that is persisted on the user
//! record (5 consecutive failures lock the account for 15 minutes).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

/// Attempts allowed per minute per source IP
const BUCKET_CAPACITY: f64 = 5.0;
const REFILL_PER_SEC: f64 = BUCKET_CAPACITY / 60.0;

/// Consecutive failures before an account locks
pub const LOCKOUT_THRESHOLD: u32 = 5;
/// Lock duration once the threshold is hit
pub const LOCKOUT_SECS: u64 = 15 * 60;

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Per-IP login rate limiter.
pub struct LoginThrottle {
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

impl LoginThrottle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one attempt token for `ip`. Returns false when the bucket
    /// is exhausted.
    pub fn allow(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(ip).or_insert(Bucket {
            tokens: BUCKET_CAPACITY,
            last: now,
        });

        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * REFILL_PER_SEC).min(BUCKET_CAPACITY);
        bucket.last = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop state for idle IPs (called opportunistically by the console
    /// handler; buckets refill to capacity after a minute anyway).
    pub fn prune(&self) {
        let now = Instant::now();
        self.buckets
            .lock()
            .retain(|_, b| now.duration_since(b.last).as_secs() < 300);
    }
}

impl Default for LoginThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_exhausts_after_five() {
        let throttle = LoginThrottle::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        for _ in 0..5 {
            assert!(throttle.allow(ip));
        }
        assert!(!throttle.allow(ip));
    }

    #[test]
    fn test_buckets_are_per_ip() {
        let throttle = LoginThrottle::new();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        for _ in 0..5 {
            assert!(throttle.allow(a));
        }
        assert!(!throttle.allow(a));
        assert!(throttle.allow(b));
    }
}

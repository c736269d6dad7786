//! Transient-failure retry.
//!
//! Blob and metadata operations that hit a transient condition (timeout,
//! interrupted I/O, unreachable peer) are retried up to three times with
//! jittered backoff before surfacing as a 500. Non-transient errors
//! return immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use maxiofs_common::Result;

const MAX_ATTEMPTS: u32 = 3;

/// Run `op`, retrying transient failures.
pub async fn retry_transient<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                let jitter_ms = rand::thread_rng().gen_range(10..50) * attempt as u64;
                tracing::debug!(attempt, error = %e, "transient failure, retrying");
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maxiofs_common::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Timeout)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Timeout) }
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::AccessDenied) }
        })
        .await;
        assert!(matches!(result, Err(Error::AccessDenied)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

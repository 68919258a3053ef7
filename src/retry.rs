//! Bounded retry with fixed backoff, spec.md §4.3.
//!
//! Grounded in the teacher's `scrapers::polymarket_api::execute_with_retry`
//! — a small fixed number of attempts with a flat sleep between them,
//! rather than exponential backoff, since PSP calls are expected to settle
//! quickly or not at all.

use std::future::Future;

use crate::config::RetryConfig;
use crate::error::AdapterError;

/// Retries `f` up to `config.max_attempts` times, sleeping
/// `config.wait_duration` between attempts. Only `AdapterError::Transient`
/// is retried; `Timeout` and `Declined` are terminal.
pub async fn retry<F, Fut, T>(config: &RetryConfig, mut f: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(AdapterError::Transient(msg)) if attempt < config.max_attempts => {
                tracing::debug!(attempt, %msg, "retrying transient adapter failure");
                tokio::time::sleep(config.wait_duration).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn retries_transient_failures_up_to_max_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            wait_duration: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, AdapterError> = retry(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AdapterError::Transient("boom".into()))
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
    async fn gives_up_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 2,
            wait_duration: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, AdapterError> = retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(AdapterError::Transient("boom".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn declined_is_not_retried() {
        let config = RetryConfig {
            max_attempts: 3,
            wait_duration: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, AdapterError> = retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(AdapterError::Declined {
                    code: "DECLINED".into(),
                    message: "no".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

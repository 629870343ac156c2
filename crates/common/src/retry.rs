//! Bounded exponential retry for upstream model calls

use crate::errors::{AppError, Result};
use backoff::ExponentialBackoff;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Retry policy shared by the embedding, language-model and reranker clients
fn policy() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(2),
        max_elapsed_time: Some(Duration::from_secs(30)),
        ..ExponentialBackoff::default()
    }
}

/// Run `op`, retrying transient failures at most `max_retries` times.
///
/// Permanent errors (see [`AppError::is_transient`]) are returned immediately.
pub async fn with_retry<T, F, Fut>(operation: &str, max_retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = AtomicU32::new(0);

    backoff::future::retry(policy(), || {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed);
        let fut = op();
        async move {
            fut.await.map_err(|e| {
                if e.is_transient() && attempt < max_retries {
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        max_retries,
                        error = %e,
                        "Upstream call failed, retrying"
                    );
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        }
    })
    .await
}

/// Map a reqwest failure into the timeout or error variant of a model stage
pub fn classify_http_error(err: reqwest::Error, timeout: Duration, embedding: bool) -> AppError {
    let timeout_ms = timeout.as_millis() as u64;
    match (err.is_timeout(), embedding) {
        (true, true) => AppError::EmbeddingTimeout { timeout_ms },
        (true, false) => AppError::ModelTimeout { timeout_ms },
        (false, _) if err.is_connect() => AppError::HttpClient(err),
        (false, true) => AppError::EmbeddingError {
            message: format!("Request failed: {}", err),
        },
        (false, false) => AppError::ModelError {
            message: format!("Request failed: {}", err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result = with_retry("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::ModelTimeout { timeout_ms: 1 })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retry("test", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AppError::ModelError {
                    message: "unauthorized".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(AppError::ModelError { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retry("test", 1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::ModelTimeout { timeout_ms: 1 }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

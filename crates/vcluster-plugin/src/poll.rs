//! Fixed-interval polling for "wait until the host is ready" loops.
//!
//! The plugin has two dependencies it must wait on without ever giving up: the
//! host answering the handshake and the host granting leadership. Both use a
//! fixed interval with no backoff, a hard timeout per attempt so a hung call
//! cannot stall the loop, and the lifetime token so shutdown can interrupt the
//! wait.
//!
//! # Example
//!
//! ```ignore
//! use vcluster_plugin::poll::{poll_until, PollConfig};
//!
//! let context = poll_until(&PollConfig::default(), "plugin handshake", &token, || async {
//!     host.register("my-plugin").await.map(Some)
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Default time between attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default upper bound for a single attempt
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing for an indefinite poll loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between the end of one attempt and the start of the next
    pub interval: Duration,
    /// Hard limit for a single attempt
    pub attempt_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl PollConfig {
    /// Create a config with the given interval and attempt timeout
    pub fn new(interval: Duration, attempt_timeout: Duration) -> Self {
        Self {
            interval,
            attempt_timeout,
        }
    }

    /// Run one attempt under the attempt timeout.
    ///
    /// An elapsed timeout is reported as an error message so callers can treat
    /// it like any other transient failure.
    pub async fn attempt<T, E, Fut>(&self, fut: Fut) -> std::result::Result<T, String>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.attempt_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "attempt timed out after {:?}",
                self.attempt_timeout
            )),
        }
    }

    /// Sleep for one interval.
    ///
    /// Returns false if the token was cancelled before the interval elapsed.
    pub async fn pause(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.interval) => true,
        }
    }
}

/// Poll an operation until it yields a value.
///
/// The first attempt runs immediately. `operation` returns `Ok(Some(v))` when
/// done, `Ok(None)` to keep waiting, or `Err(e)` for a transient failure that is
/// logged and retried. There is no attempt limit.
///
/// # Returns
/// The value, or [`Error::Cancelled`] once `token` is cancelled.
pub async fn poll_until<T, E, F, Fut>(
    config: &PollConfig,
    operation_name: &str,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Option<T>, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u64;

    loop {
        if token.is_cancelled() {
            return Err(Error::cancelled(format!("waiting for {operation_name}")));
        }
        attempt += 1;

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                return Err(Error::cancelled(format!("waiting for {operation_name}")));
            }
            outcome = config.attempt(operation()) => outcome,
        };

        match outcome {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                debug!(operation = %operation_name, attempt, "Not ready yet, waiting...");
            }
            Err(e) => {
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    retry_secs = config.interval.as_secs(),
                    "Attempt failed, retrying..."
                );
            }
        }

        if !config.pause(token).await {
            return Err(Error::cancelled(format!("waiting for {operation_name}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> PollConfig {
        PollConfig::new(Duration::from_millis(5), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let token = CancellationToken::new();
        let result = poll_until(&fast(), "op", &token, || async {
            Ok::<_, String>(Some(42))
        })
        .await;
        assert_eq!(result.ok(), Some(42));
    }

    #[tokio::test]
    async fn test_keeps_polling_through_failures_and_not_ready() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let token = CancellationToken::new();

        let result = poll_until(&fast(), "op", &token, || {
            let c = c.clone();
            async move {
                match c.fetch_add(1, Ordering::SeqCst) {
                    0 => Err("connection refused".to_string()),
                    1 | 2 => Ok(None),
                    _ => Ok(Some("ready")),
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some("ready"));
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_hung_attempt_is_bounded_by_attempt_timeout() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let token = CancellationToken::new();

        let result = poll_until(&fast(), "op", &token, || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    // First attempt never completes on its own
                    std::future::pending::<()>().await;
                }
                Ok::<_, String>(Some(7))
            }
        })
        .await;

        assert_eq!(result.ok(), Some(7));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_the_loop() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        let result: Result<()> = poll_until(&fast(), "host", &token, || async {
            Err::<Option<()>, _>("unavailable")
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_makes_no_attempt() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<()> = poll_until(&fast(), "host", &token, || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(Some(())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_default_timing() {
        let config = PollConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.attempt_timeout, Duration::from_secs(10));
    }
}

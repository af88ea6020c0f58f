//! Client-side request throttling for Kubernetes API clients.
//!
//! kube-rs has no QPS/burst knobs, so the SDK adds a tower layer in front of the
//! HTTP stack. Requests wait for a token instead of failing: a throttled client
//! is slower, never broken.

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::time::Instant;
use tower::{Layer, Service};

use crate::config::ClientLimits;

/// Longest single wait for a token
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Token bucket state for client-side throttling.
///
/// Tokens are replenished continuously up to the burst capacity. A bucket
/// built from limits without a usable rate never throttles.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Current number of available tokens.
    tokens: f64,
    /// Maximum tokens (burst capacity).
    capacity: f64,
    /// Tokens added per second; `None` when unthrottled.
    rate_per_sec: Option<f64>,
    /// Last time tokens were updated.
    last_update: Instant,
}

impl TokenBucket {
    /// Create a bucket from client limits. The bucket starts full.
    pub fn new(limits: ClientLimits) -> Self {
        let capacity = f64::from(limits.burst.max(1));
        Self {
            tokens: capacity,
            capacity,
            rate_per_sec: limits.is_valid().then_some(limits.qps),
            last_update: Instant::now(),
        }
    }

    /// Try to take one token.
    ///
    /// Returns how long to wait before a token is available when the bucket is
    /// empty.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        let Some(rate_per_sec) = self.rate_per_sec else {
            return Ok(());
        };
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(self.capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            let wait = Duration::try_from_secs_f64(missing / rate_per_sec).unwrap_or(MAX_WAIT);
            Err(wait.min(MAX_WAIT))
        }
    }
}

/// Layer applying [`ClientLimits`] to a service
#[derive(Clone, Copy, Debug)]
pub struct ThrottleLayer {
    limits: ClientLimits,
}

impl ThrottleLayer {
    /// Create a layer for the given limits
    pub fn new(limits: ClientLimits) -> Self {
        Self { limits }
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = Throttle<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Throttle {
            inner,
            bucket: TokenBucket::new(self.limits),
            sleep: None,
            reserved: false,
        }
    }
}

/// Service that waits for a token before each request
pub struct Throttle<S> {
    inner: S,
    bucket: TokenBucket,
    sleep: Option<Pin<Box<tokio::time::Sleep>>>,
    reserved: bool,
}

impl<S, Req> Service<Req> for Throttle<S>
where
    S: Service<Req>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        while !self.reserved {
            if let Some(sleep) = self.sleep.as_mut() {
                ready!(sleep.as_mut().poll(cx));
                self.sleep = None;
            }
            match self.bucket.try_acquire() {
                Ok(()) => self.reserved = true,
                Err(wait) => self.sleep = Some(Box::pin(tokio::time::sleep(wait))),
            }
        }
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        self.reserved = false;
        self.inner.call(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_allows_burst_then_throttles() {
        let mut bucket = TokenBucket::new(ClientLimits { qps: 1.0, burst: 3 });
        let now = Instant::now();

        assert!(bucket.try_acquire_at(now).is_ok());
        assert!(bucket.try_acquire_at(now).is_ok());
        assert!(bucket.try_acquire_at(now).is_ok());

        let wait = bucket.try_acquire_at(now).unwrap_err();
        assert!(wait > Duration::ZERO && wait <= Duration::from_secs(1));
    }

    #[test]
    fn test_bucket_replenishes_at_qps() {
        let mut bucket = TokenBucket::new(ClientLimits { qps: 10.0, burst: 1 });
        let start = Instant::now();

        assert!(bucket.try_acquire_at(start).is_ok());
        assert!(bucket.try_acquire_at(start).is_err());

        // 100ms at 10 qps buys exactly one token
        assert!(bucket
            .try_acquire_at(start + Duration::from_millis(100))
            .is_ok());
    }

    #[test]
    fn test_bucket_never_exceeds_capacity() {
        let mut bucket = TokenBucket::new(ClientLimits { qps: 100.0, burst: 2 });
        let later = Instant::now() + Duration::from_secs(60);

        assert!(bucket.try_acquire_at(later).is_ok());
        assert!(bucket.try_acquire_at(later).is_ok());
        assert!(bucket.try_acquire_at(later).is_err());
    }

    #[test]
    fn test_limits_without_a_rate_do_not_throttle() {
        for qps in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let mut bucket = TokenBucket::new(ClientLimits { qps, burst: 1 });
            let now = Instant::now();
            for _ in 0..10 {
                assert_eq!(bucket.try_acquire_at(now), Ok(()), "qps {qps}");
            }
        }
    }

    #[test]
    fn test_tiny_rate_waits_are_capped() {
        let mut bucket = TokenBucket::new(ClientLimits { qps: 1e-300, burst: 1 });
        let now = Instant::now();

        assert!(bucket.try_acquire_at(now).is_ok());
        assert_eq!(bucket.try_acquire_at(now), Err(MAX_WAIT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_service_delays_requests_past_burst() {
        use tower::ServiceExt;

        let (mock, mut handle) = tower_test::mock::pair::<u32, u32>();
        let mut svc = ThrottleLayer::new(ClientLimits { qps: 2.0, burst: 1 }).layer(mock);
        handle.allow(10);

        tokio::spawn(async move {
            while let Some((req, send)) = handle.next_request().await {
                send.send_response(req);
            }
        });

        let start = tokio::time::Instant::now();
        assert_eq!(svc.ready().await.unwrap().call(1).await.unwrap(), 1);
        assert_eq!(svc.ready().await.unwrap().call(2).await.unwrap(), 2);

        // Second request had to wait for the bucket to refill at 2 qps
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}

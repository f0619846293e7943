//! Generic retry + circuit breaker wrapper (§4.1).
//!
//! `ResilientClient::execute` is the one operation this module exposes:
//! it wraps an idempotent async closure with retry, a three-state circuit
//! breaker, correlation-ID logging, and per-client metrics.

use std::time::{Duration, Instant};

use cx_domain::config::{BreakerConfig, RetryConfig};
use cx_domain::error::{Error, Result};
use parking_lot::Mutex;
use rand::Rng;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

/// Three-state circuit breaker (§4.1). All mutation happens under an
/// internal `parking_lot::Mutex`, held only for the duration of the state
/// check/update, never across I/O.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Whether a request may proceed. Moves Open -> HalfOpen in place when
    /// `recovery_timeout` has elapsed, the way `can_execute` does in the
    /// reference implementation.
    fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed().as_secs_f64())
                    .unwrap_or(f64::MAX);
                if elapsed >= self.config.recovery_timeout_s {
                    tracing::info!("circuit breaker transitioning to half-open");
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!("circuit breaker transitioning to closed");
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                }
            }
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Returns true if this failure tripped the breaker open.
    fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            BreakerState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!("circuit breaker transitioning to open");
                    inner.state = BreakerState::Open;
                    return true;
                }
                false
            }
            BreakerState::HalfOpen => {
                tracing::warn!("circuit breaker transitioning back to open");
                inner.state = BreakerState::Open;
                inner.success_count = 0;
                true
            }
            BreakerState::Open => false,
        }
    }
}

/// Request/success/failure counters, latency sum, and breaker trips for
/// one resilient client (§4.1 Observability).
#[derive(Debug, Default)]
struct MetricsInner {
    request_count: u64,
    success_count: u64,
    failure_count: u64,
    total_latency_s: f64,
    circuit_breaker_trips: u64,
}

pub struct ClientMetrics {
    inner: Mutex<MetricsInner>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMetricsSnapshot {
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub average_latency_s: f64,
    pub circuit_breaker_trips: u64,
}

impl ClientMetricsSnapshot {
    /// Derived health flag used by the health observer without it having
    /// to recompute the threshold itself.
    pub fn healthy(&self, breaker_state: BreakerState) -> bool {
        !matches!(breaker_state, BreakerState::Open) && self.success_rate >= 0.8
    }
}

impl ClientMetrics {
    fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsInner::default()),
        }
    }

    fn record_success(&self, latency_s: f64) {
        let mut m = self.inner.lock();
        m.request_count += 1;
        m.success_count += 1;
        m.total_latency_s += latency_s;
    }

    fn record_failure(&self, tripped: bool) {
        let mut m = self.inner.lock();
        m.request_count += 1;
        m.failure_count += 1;
        if tripped {
            m.circuit_breaker_trips += 1;
        }
    }

    pub fn snapshot(&self) -> ClientMetricsSnapshot {
        let m = self.inner.lock();
        let success_rate = if m.request_count == 0 {
            0.0
        } else {
            m.success_count as f64 / m.request_count as f64
        };
        let average_latency_s = if m.success_count == 0 {
            0.0
        } else {
            m.total_latency_s / m.success_count as f64
        };
        ClientMetricsSnapshot {
            request_count: m.request_count,
            success_count: m.success_count,
            failure_count: m.failure_count,
            success_rate,
            average_latency_s,
            circuit_breaker_trips: m.circuit_breaker_trips,
        }
    }
}

/// Wraps any idempotent async unit of work with retry + circuit breaker +
/// correlation-ID logging. One instance per upstream service (STT, LLM,
/// TTS, or the media-server pool's own probes reuse the same shape).
pub struct ResilientClient {
    service_name: String,
    retry: RetryConfig,
    breaker: CircuitBreaker,
    metrics: ClientMetrics,
}

impl ResilientClient {
    pub fn new(service_name: impl Into<String>, retry: RetryConfig, breaker: BreakerConfig) -> Self {
        Self {
            service_name: service_name.into(),
            retry,
            breaker: CircuitBreaker::new(breaker),
            metrics: ClientMetrics::new(),
        }
    }

    pub fn metrics(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay =
            self.retry.base_delay_s * self.retry.exponential_base.powi(attempt as i32 - 1);
        delay = delay.min(self.retry.max_delay_s);
        if self.retry.jitter {
            let factor = 0.5 + rand::thread_rng().gen::<f64>() * 0.5;
            delay *= factor;
        }
        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Execute `operation`, retrying on `Err` up to `max_attempts` times,
    /// subject to the circuit breaker. `operation` is called with the
    /// correlation ID for this execution on every attempt.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.execute_with_correlation(None, operation).await
    }

    pub async fn execute_with_correlation<F, Fut, T>(
        &self,
        correlation_id: Option<String>,
        operation: F,
    ) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let correlation_id = correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        if !self.breaker.can_execute() {
            tracing::error!(
                correlation_id = %correlation_id,
                service = %self.service_name,
                "circuit breaker open, rejecting request"
            );
            return Err(Error::BreakerOpen {
                service: self.service_name.clone(),
            });
        }

        let start = Instant::now();
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.retry.max_attempts {
            tracing::debug!(
                correlation_id = %correlation_id,
                service = %self.service_name,
                attempt,
                "executing request"
            );

            match operation(correlation_id.clone()).await {
                Ok(value) => {
                    let latency = start.elapsed().as_secs_f64();
                    self.metrics.record_success(latency);
                    self.breaker.record_success();
                    tracing::info!(
                        correlation_id = %correlation_id,
                        service = %self.service_name,
                        attempt,
                        latency_s = latency,
                        "request successful"
                    );
                    return Ok(value);
                }
                Err(err) => {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        service = %self.service_name,
                        attempt,
                        error = %err,
                        "request failed"
                    );
                    last_error = Some(err);

                    if attempt == self.retry.max_attempts {
                        break;
                    }
                    tokio::time::sleep(self.delay_for_attempt(attempt)).await;
                }
            }
        }

        let tripped = self.breaker.record_failure();
        self.metrics.record_failure(tripped);

        tracing::error!(
            correlation_id = %correlation_id,
            service = %self.service_name,
            attempts = self.retry.max_attempts,
            "request exhausted all attempts"
        );

        Err(Error::Exhausted {
            service: self.service_name.clone(),
            attempts: self.retry.max_attempts,
            message: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_s: 0.001,
            max_delay_s: 0.01,
            exponential_base: 2.0,
            jitter: false,
        }
    }

    fn fast_breaker() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 2,
            recovery_timeout_s: 0.01,
            success_threshold: 1,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let client = ResilientClient::new("svc", fast_retry(), fast_breaker());
        let result = client.execute(|_cid| async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(client.metrics().success_count, 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let client = ResilientClient::new("svc", fast_retry(), fast_breaker());
        let calls = AtomicU32::new(0);
        let result = client
            .execute(|_cid| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 1 {
                        Err(Error::Transient {
                            service: "svc".into(),
                            message: "boom".into(),
                        })
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let client = ResilientClient::new("svc", fast_retry(), fast_breaker());
        let result = client
            .execute(|_cid| async {
                Err::<i32, _>(Error::Transient {
                    service: "svc".into(),
                    message: "down".into(),
                })
            })
            .await;
        assert!(matches!(result, Err(Error::Exhausted { .. })));
    }

    #[tokio::test]
    async fn breaker_opens_after_failure_threshold() {
        let client = ResilientClient::new("svc", fast_retry(), fast_breaker());
        for _ in 0..2 {
            let _ = client
                .execute(|_cid| async {
                    Err::<i32, _>(Error::Transient {
                        service: "svc".into(),
                        message: "down".into(),
                    })
                })
                .await;
        }
        assert_eq!(client.breaker_state(), BreakerState::Open);
        let result = client.execute(|_cid| async { Ok::<_, Error>(1) }).await;
        assert!(matches!(result, Err(Error::BreakerOpen { .. })));
    }

    #[tokio::test]
    async fn breaker_recovers_through_half_open() {
        let client = ResilientClient::new("svc", fast_retry(), fast_breaker());
        for _ in 0..2 {
            let _ = client
                .execute(|_cid| async {
                    Err::<i32, _>(Error::Transient {
                        service: "svc".into(),
                        message: "down".into(),
                    })
                })
                .await;
        }
        assert_eq!(client.breaker_state(), BreakerState::Open);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = client.execute(|_cid| async { Ok::<_, Error>(1) }).await;
        assert!(result.is_ok());
        assert_eq!(client.breaker_state(), BreakerState::Closed);
    }
}

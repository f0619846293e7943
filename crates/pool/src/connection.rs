//! Connection pool (§4.7): fixed initial size, bounded dynamic
//! expansion, scoped acquire/release, probing and reconnection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cx_domain::config::PoolConfig;
use cx_domain::error::Result;
use parking_lot::Mutex;

use crate::media_server::MediaServerApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub avg_latency_ms: f64,
    pub current_latency_ms: f64,
    pub reconnect_count: u32,
    pub state: ConnectionState,
    pub quality_score: f64,
}

impl ConnectionMetrics {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_used: now,
            total_requests: 0,
            failed_requests: 0,
            avg_latency_ms: 0.0,
            current_latency_ms: 0.0,
            reconnect_count: 0,
            state: ConnectionState::Connecting,
            quality_score: 1.0,
        }
    }

    fn record_probe(&mut self, outcome: &Result<f64>) {
        self.total_requests += 1;
        match outcome {
            Ok(latency_ms) => {
                self.current_latency_ms = *latency_ms;
                self.avg_latency_ms = if self.avg_latency_ms == 0.0 {
                    *latency_ms
                } else {
                    (self.avg_latency_ms + latency_ms) / 2.0
                };
                self.state = ConnectionState::Connected;
            }
            Err(_) => {
                self.failed_requests += 1;
                self.state = ConnectionState::Failed;
            }
        }
    }

    fn quality(&self) -> f64 {
        if self.total_requests == 0 {
            return self.quality_score;
        }
        let success_rate = 1.0 - (self.failed_requests as f64 / self.total_requests as f64);
        let latency_score = (1.0 - self.avg_latency_ms / 1000.0).clamp(0.0, 1.0);
        (success_rate + latency_score) / 2.0
    }
}

struct Slot {
    id: u64,
    client: Arc<dyn MediaServerApi>,
    metrics: ConnectionMetrics,
    in_use: bool,
    last_health_check: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalCounters {
    pub total_connections: u64,
    pub failed_connections: u64,
}

/// Pool-wide view published by the health observer (§4.9).
#[derive(Debug, Clone)]
pub struct PoolAggregate {
    pub total_connections: usize,
    pub active_connections: usize,
    pub healthy_connections: usize,
    pub failed_connections_in_pool: usize,
    pub avg_latency_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub quality_score: Option<f64>,
}

/// Constructs a fresh underlying client. Infallible SDK construction
/// should still return `Ok`; genuine failures (bad credentials,
/// unreachable endpoint) are `Err` and counted toward
/// `failed_connections` without occupying a pool slot.
pub type ClientFactory = Box<dyn Fn() -> Result<Arc<dyn MediaServerApi>> + Send + Sync>;

pub struct ConnectionPool {
    factory: ClientFactory,
    config: PoolConfig,
    slots: Mutex<Vec<Slot>>,
    /// Count of in-flight expansions (reserved ceiling headroom for a
    /// `create_slot` call whose factory/probe work is still in progress,
    /// between `try_reserve_ceiling_slot` and its matching
    /// `release_ceiling_reservation`).
    reserved: Mutex<usize>,
    global: Mutex<GlobalCounters>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new(factory: ClientFactory, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            slots: Mutex::new(Vec::new()),
            reserved: Mutex::new(0),
            global: Mutex::new(GlobalCounters::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Atomically checks committed-slots-plus-in-flight-reservations
    /// against the ceiling and reserves headroom for one more, so two
    /// concurrent `acquire` calls can't both observe room under the
    /// ceiling and both expand past it (§4.7's "hard ceiling").
    fn try_reserve_ceiling_slot(&self) -> bool {
        let slots = self.slots.lock();
        let mut reserved = self.reserved.lock();
        if slots.len() + *reserved < self.config.max_pool_size {
            *reserved += 1;
            true
        } else {
            false
        }
    }

    fn release_ceiling_reservation(&self) {
        let mut reserved = self.reserved.lock();
        *reserved = reserved.saturating_sub(1);
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Builds `pool_size` connections up front. A construction failure is
    /// counted and skipped; the slot is simply absent rather than
    /// retried here (the health observer probes existing slots only).
    pub async fn initialize(&self) {
        for _ in 0..self.config.pool_size {
            self.create_slot(false).await;
        }
    }

    async fn probe(&self, client: &Arc<dyn MediaServerApi>) -> Result<f64> {
        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.connection_timeout_s);
        match tokio::time::timeout(timeout, client.list_rooms()).await {
            Ok(Ok(_)) => Ok(start.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(cx_domain::error::Error::Timeout(timeout)),
        }
    }

    /// Constructs one connection, probes it, and appends it to the pool.
    /// `reserve` marks the new slot in-use immediately (used by `acquire`
    /// when expanding under pressure).
    async fn create_slot(&self, reserve: bool) -> Option<(u64, Arc<dyn MediaServerApi>)> {
        let client = match (self.factory)() {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(error = %err, "failed to construct pooled connection");
                self.global.lock().failed_connections += 1;
                return None;
            }
        };

        let outcome = self.probe(&client).await;
        let mut metrics = ConnectionMetrics::new();
        metrics.record_probe(&outcome);

        let id = self.next_id();
        {
            let mut slots = self.slots.lock();
            slots.push(Slot {
                id,
                client: client.clone(),
                metrics,
                in_use: reserve,
                last_health_check: Utc::now(),
            });
        }
        self.global.lock().total_connections += 1;
        Some((id, client))
    }

    /// Scan for an idle, healthy slot; if none and the pool is below its
    /// ceiling, expand by one; otherwise back off briefly and retry.
    /// Returns a handle that releases the slot on drop, covering both
    /// normal and panicking exit paths.
    pub async fn acquire(self: &Arc<Self>) -> ConnectionHandle {
        loop {
            let found = {
                let mut slots = self.slots.lock();
                slots
                    .iter_mut()
                    .find(|s| !s.in_use && s.metrics.state == ConnectionState::Connected)
                    .map(|s| {
                        s.in_use = true;
                        s.metrics.last_used = Utc::now();
                        (s.id, s.client.clone())
                    })
            };
            if let Some((id, client)) = found {
                return ConnectionHandle {
                    pool: self.clone(),
                    id,
                    client,
                };
            }

            if self.try_reserve_ceiling_slot() {
                let created = self.create_slot(true).await;
                self.release_ceiling_reservation();

                if let Some((id, client)) = created {
                    let healthy = self
                        .slots
                        .lock()
                        .iter()
                        .find(|s| s.id == id)
                        .map(|s| s.metrics.state == ConnectionState::Connected)
                        .unwrap_or(false);
                    if healthy {
                        return ConnectionHandle {
                            pool: self.clone(),
                            id,
                            client,
                        };
                    }
                    // Freshly created slot failed its probe; release it so
                    // `in_use ⇒ Connected` holds and try again (§8 invariant 4).
                    self.release(id);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }

            tracing::warn!("no available pool connections, waiting");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn release(&self, id: u64) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.iter_mut().find(|s| s.id == id) {
            slot.in_use = false;
        }
    }

    /// Probes every idle slot whose last health check predates
    /// `interval`; on failure, attempts reconnection (§4.9 step 1).
    pub async fn health_check_idle(&self, interval: Duration) {
        let stale: Vec<u64> = {
            let mut slots = self.slots.lock();
            let now = Utc::now();
            slots
                .iter_mut()
                .filter(|s| {
                    !s.in_use
                        && now.signed_duration_since(s.last_health_check).num_seconds() as u64 >= interval.as_secs()
                })
                .map(|s| {
                    s.last_health_check = now;
                    s.id
                })
                .collect()
        };

        for id in stale {
            let client = { self.slots.lock().iter().find(|s| s.id == id).map(|s| s.client.clone()) };
            let Some(client) = client else { continue };
            let outcome = self.probe(&client).await;
            let healthy = outcome.is_ok();
            {
                let mut slots = self.slots.lock();
                if let Some(slot) = slots.iter_mut().find(|s| s.id == id) {
                    slot.metrics.record_probe(&outcome);
                }
            }
            if !healthy {
                self.reconnect(id).await;
            }
        }
    }

    /// Up to `max_reconnect_attempts`, delay `base · 2^attempt` seconds
    /// per try. The first successful probe restores Connected and
    /// increments `reconnect_count`; exhausting all attempts leaves the
    /// slot Failed in the pool for a later retry (§4.7).
    pub async fn reconnect(&self, id: u64) -> bool {
        {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.iter_mut().find(|s| s.id == id) {
                slot.metrics.state = ConnectionState::Reconnecting;
                slot.metrics.reconnect_count += 1;
            }
        }

        for attempt in 0..self.config.max_reconnect_attempts {
            let delay = Duration::from_secs_f64(self.config.reconnect_base_delay_s * 2f64.powi(attempt as i32));
            tokio::time::sleep(delay).await;

            let new_client = match (self.factory)() {
                Ok(client) => client,
                Err(err) => {
                    tracing::error!(error = %err, attempt, "reconnection attempt failed to construct client");
                    continue;
                }
            };

            let outcome = self.probe(&new_client).await;
            let healthy = outcome.is_ok();
            {
                let mut slots = self.slots.lock();
                if let Some(slot) = slots.iter_mut().find(|s| s.id == id) {
                    slot.client = new_client;
                    slot.metrics.record_probe(&outcome);
                }
            }
            if healthy {
                tracing::info!(attempt = attempt + 1, "pool connection reconnected");
                return true;
            }
        }

        let mut slots = self.slots.lock();
        if let Some(slot) = slots.iter_mut().find(|s| s.id == id) {
            slot.metrics.state = ConnectionState::Failed;
        }
        tracing::error!("all reconnection attempts exhausted");
        false
    }

    pub fn aggregate(&self) -> PoolAggregate {
        let mut slots = self.slots.lock();
        let total = slots.len();
        let active = slots.iter().filter(|s| s.in_use).count();
        let healthy = slots.iter().filter(|s| s.metrics.state == ConnectionState::Connected).count();
        let failed = slots.iter().filter(|s| s.metrics.state == ConnectionState::Failed).count();

        let latencies: Vec<f64> = slots.iter().map(|s| s.metrics.current_latency_ms).filter(|l| *l > 0.0).collect();
        let (avg, min, max) = if latencies.is_empty() {
            (None, None, None)
        } else {
            let sum: f64 = latencies.iter().sum();
            (
                Some(sum / latencies.len() as f64),
                latencies.iter().cloned().fold(f64::INFINITY, f64::min).into(),
                latencies.iter().cloned().fold(f64::NEG_INFINITY, f64::max).into(),
            )
        };

        let scored: Vec<f64> = slots
            .iter_mut()
            .filter(|s| s.metrics.total_requests > 0)
            .map(|s| {
                let q = s.metrics.quality();
                s.metrics.quality_score = q;
                q
            })
            .collect();
        let quality_score = if scored.is_empty() { None } else { Some(scored.iter().sum::<f64>() / scored.len() as f64) };

        PoolAggregate {
            total_connections: total,
            active_connections: active,
            healthy_connections: healthy,
            failed_connections_in_pool: failed,
            avg_latency_ms: avg,
            min_latency_ms: min,
            max_latency_ms: max,
            quality_score,
        }
    }

    pub fn global_counters(&self) -> GlobalCounters {
        self.global.lock().clone()
    }

    /// Drops every slot. Intended for shutdown only; the pool never
    /// shrinks on its own.
    pub fn shutdown(&self) {
        self.slots.lock().clear();
    }
}

/// RAII handle returned by [`ConnectionPool::acquire`]. Releases the
/// underlying slot on drop regardless of how the caller's scope exits.
pub struct ConnectionHandle {
    pool: Arc<ConnectionPool>,
    id: u64,
    client: Arc<dyn MediaServerApi>,
}

impl ConnectionHandle {
    pub fn client(&self) -> &Arc<dyn MediaServerApi> {
        &self.client
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_server::RoomInfo;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct FakeClient {
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MediaServerApi for FakeClient {
        async fn create_room(
            &self,
            name: &str,
            _empty_timeout_s: u64,
            _departure_timeout_s: u64,
            max_participants: usize,
            metadata: serde_json::Value,
        ) -> Result<RoomInfo> {
            Ok(RoomInfo {
                name: name.to_string(),
                created_at: Utc::now(),
                max_participants,
                metadata,
            })
        }

        async fn delete_room(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn list_rooms(&self) -> Result<Vec<RoomInfo>> {
            if self.fail.load(Ordering::SeqCst) {
                Err(cx_domain::error::Error::Transient {
                    service: "media".into(),
                    message: "unreachable".into(),
                })
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn pool_with(pool_size: usize, max_pool_size: usize, fail: Arc<AtomicBool>) -> Arc<ConnectionPool> {
        let config = PoolConfig {
            pool_size,
            max_pool_size,
            health_check_interval_s: 30,
            connection_timeout_s: 5,
            max_reconnect_attempts: 2,
            reconnect_base_delay_s: 0.01,
        };
        let factory: ClientFactory = Box::new(move || Ok(Arc::new(FakeClient { fail: fail.clone() }) as Arc<dyn MediaServerApi>));
        Arc::new(ConnectionPool::new(factory, config))
    }

    #[tokio::test]
    async fn acquire_release_round_trip_keeps_slot_reusable() {
        let pool = pool_with(1, 2, Arc::new(AtomicBool::new(false)));
        pool.initialize().await;
        let handle = pool.acquire().await;
        assert_eq!(pool.aggregate().active_connections, 1);
        drop(handle);
        assert_eq!(pool.aggregate().active_connections, 0);
    }

    #[tokio::test]
    async fn acquire_expands_up_to_ceiling() {
        let pool = pool_with(1, 2, Arc::new(AtomicBool::new(false)));
        pool.initialize().await;
        let h1 = pool.acquire().await;
        let h2 = pool.acquire().await;
        assert_eq!(pool.aggregate().total_connections, 2);
        drop(h1);
        drop(h2);
    }

    #[tokio::test]
    async fn concurrent_acquires_never_expand_past_the_ceiling() {
        let pool = pool_with(0, 3, Arc::new(AtomicBool::new(false)));
        pool.initialize().await;

        let mut handles = Vec::new();
        for _ in 0..3 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.acquire().await }));
        }
        let mut acquired = Vec::new();
        for h in handles {
            acquired.push(h.await.unwrap());
        }

        assert_eq!(pool.aggregate().total_connections, 3);
        drop(acquired);
    }

    #[tokio::test]
    async fn reconnect_recovers_after_probe_failure() {
        let fail = Arc::new(AtomicBool::new(true));
        let pool = pool_with(1, 1, fail.clone());
        pool.initialize().await;
        assert_eq!(pool.aggregate().failed_connections_in_pool, 1);

        fail.store(false, Ordering::SeqCst);
        let id = { /* only one slot */ 0u64 };
        let recovered = pool.reconnect(id).await;
        assert!(recovered);
        assert_eq!(pool.aggregate().healthy_connections, 1);
    }
}

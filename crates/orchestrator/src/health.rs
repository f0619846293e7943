//! Health observer (§4.9): a periodic loop that probes stale pool
//! slots, reconnects failures, sweeps idle rooms, and publishes one
//! metrics snapshot per tick. Cancellation follows the teacher's
//! `tokio_util::sync::CancellationToken` pattern rather than a raw flag.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cx_pool::{ConnectionPool, PoolAggregate, RoomLedger};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,
    pub pool: PoolAggregate,
    pub room_count: usize,
    pub total_participants: usize,
    pub rooms_cleaned_up: usize,
}

pub struct HealthObserver {
    pool: Arc<ConnectionPool>,
    rooms: Arc<RoomLedger>,
    interval: Duration,
    shutdown: CancellationToken,
    latest: Mutex<Option<HealthSnapshot>>,
}

impl HealthObserver {
    pub fn new(pool: Arc<ConnectionPool>, rooms: Arc<RoomLedger>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            pool,
            rooms,
            interval,
            shutdown,
            latest: Mutex::new(None),
        }
    }

    pub fn latest_snapshot(&self) -> Option<HealthSnapshot> {
        self.latest.lock().clone()
    }

    /// Probe → aggregate → sweep → publish, once per tick, until
    /// cancelled. Intended to be spawned as a background task.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("health observer shutting down");
                    return;
                }
            }
            self.tick().await;
        }
    }

    async fn tick(&self) {
        self.pool.health_check_idle(self.interval).await;
        let pool_aggregate = self.pool.aggregate();
        let cleaned = self.rooms.cleanup_idle_rooms().await;

        let snapshot = HealthSnapshot {
            taken_at: Utc::now(),
            pool: pool_aggregate,
            room_count: self.rooms.room_count(),
            total_participants: self.rooms.total_participants(),
            rooms_cleaned_up: cleaned,
        };

        tracing::info!(
            total_connections = snapshot.pool.total_connections,
            healthy_connections = snapshot.pool.healthy_connections,
            room_count = snapshot.room_count,
            rooms_cleaned_up = snapshot.rooms_cleaned_up,
            "health observer tick"
        );

        *self.latest.lock() = Some(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cx_domain::config::{AudioConfig, PoolConfig, RoomLimitsConfig};
    use cx_pool::{ClientFactory, MediaServerApi, RoomInfo};

    struct FakeMedia;

    #[async_trait]
    impl MediaServerApi for FakeMedia {
        async fn create_room(
            &self,
            name: &str,
            _empty_timeout_s: u64,
            _departure_timeout_s: u64,
            max_participants: usize,
            metadata: serde_json::Value,
        ) -> cx_domain::error::Result<RoomInfo> {
            Ok(RoomInfo {
                name: name.to_string(),
                created_at: Utc::now(),
                max_participants,
                metadata,
            })
        }
        async fn delete_room(&self, _name: &str) -> cx_domain::error::Result<()> {
            Ok(())
        }
        async fn list_rooms(&self) -> cx_domain::error::Result<Vec<RoomInfo>> {
            Ok(Vec::new())
        }
    }

    fn pool() -> Arc<ConnectionPool> {
        let factory: ClientFactory = Box::new(|| Ok(Arc::new(FakeMedia) as Arc<dyn MediaServerApi>));
        Arc::new(ConnectionPool::new(
            factory,
            PoolConfig {
                pool_size: 1,
                max_pool_size: 2,
                health_check_interval_s: 30,
                connection_timeout_s: 5,
                max_reconnect_attempts: 1,
                reconnect_base_delay_s: 0.01,
            },
        ))
    }

    #[tokio::test]
    async fn tick_publishes_a_snapshot() {
        let pool = pool();
        pool.initialize().await;
        let rooms = Arc::new(RoomLedger::new(pool.clone(), RoomLimitsConfig::default(), AudioConfig::default()));
        let observer = Arc::new(HealthObserver::new(pool, rooms, Duration::from_millis(10), CancellationToken::new()));

        assert!(observer.latest_snapshot().is_none());
        observer.tick().await;
        let snapshot = observer.latest_snapshot().unwrap();
        assert_eq!(snapshot.room_count, 0);
    }

    #[tokio::test]
    async fn run_exits_promptly_on_cancellation() {
        let pool = pool();
        pool.initialize().await;
        let rooms = Arc::new(RoomLedger::new(pool.clone(), RoomLimitsConfig::default(), AudioConfig::default()));
        let shutdown = CancellationToken::new();
        let observer = Arc::new(HealthObserver::new(pool, rooms, Duration::from_secs(60), shutdown.clone()));

        let handle = tokio::spawn(observer.run());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}

//! Admission and room ledger (§4.8): numeric limits enforced atomically
//! against an in-memory ledger, backed by the media server through the
//! connection pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cx_domain::config::{AudioConfig, RoomLimitsConfig};
use cx_domain::error::{Error, Result};
use parking_lot::Mutex;

use crate::connection::ConnectionPool;
use crate::media_server::build_room_metadata;

#[derive(Debug, Clone)]
pub struct RoomEntry {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub max_participants: usize,
    pub participants: HashSet<String>,
    pub audio_tracks: usize,
    pub video_tracks: usize,
}

pub struct RoomLedger {
    pool: Arc<ConnectionPool>,
    limits: RoomLimitsConfig,
    audio: AudioConfig,
    rooms: Mutex<HashMap<String, RoomEntry>>,
}

impl RoomLedger {
    pub fn new(pool: Arc<ConnectionPool>, limits: RoomLimitsConfig, audio: AudioConfig) -> Self {
        Self {
            pool,
            limits,
            audio,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves the ledger slot under the ledger lock before doing any
    /// media-server I/O, then creates the room out-of-lock; a failed
    /// creation rolls the reservation back (§5 ledger-lock scope).
    pub async fn create_room(
        &self,
        name: &str,
        max_participants: Option<usize>,
        audio_overrides: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<bool> {
        let max_participants = max_participants.unwrap_or(self.limits.max_participants_per_room);

        {
            let mut rooms = self.rooms.lock();
            if rooms.len() >= self.limits.max_concurrent_rooms {
                tracing::warn!(limit = self.limits.max_concurrent_rooms, "concurrent room limit reached");
                return Ok(false);
            }
            if rooms.contains_key(name) {
                tracing::warn!(room = name, "room already exists");
                return Ok(false);
            }
            rooms.insert(
                name.to_string(),
                RoomEntry {
                    name: name.to_string(),
                    created_at: Utc::now(),
                    max_participants,
                    participants: HashSet::new(),
                    audio_tracks: 0,
                    video_tracks: 0,
                },
            );
        }

        let metadata = build_room_metadata(&self.audio, &self.limits, audio_overrides);
        let handle = self.pool.acquire().await;
        let empty_timeout_s = self.limits.empty_room_timeout_s;
        let departure_timeout_s = self.limits.departure_timeout_s;
        let created = handle
            .client()
            .create_room(name, empty_timeout_s, departure_timeout_s, max_participants, metadata)
            .await;

        match created {
            Ok(_) => {
                tracing::info!(room = name, "created room");
                Ok(true)
            }
            Err(err) => {
                self.rooms.lock().remove(name);
                tracing::error!(room = name, error = %err, "failed to create room, rolling back reservation");
                Err(err)
            }
        }
    }

    pub fn add_participant(&self, room_name: &str, participant_id: &str) -> Result<bool> {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get_mut(room_name) else {
            return Err(Error::Policy {
                reason: format!("room {room_name} not found"),
            });
        };
        if room.participants.len() >= room.max_participants {
            tracing::warn!(room = room_name, "participant limit reached");
            return Ok(false);
        }
        room.participants.insert(participant_id.to_string());
        Ok(true)
    }

    pub fn remove_participant(&self, room_name: &str, participant_id: &str) {
        if let Some(room) = self.rooms.lock().get_mut(room_name) {
            room.participants.remove(participant_id);
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn total_participants(&self) -> usize {
        self.rooms.lock().values().map(|r| r.participants.len()).sum()
    }

    /// Rooms older than one hour with zero participants are deleted
    /// from the media server and dropped from the ledger (§4.8, §4.9).
    pub async fn cleanup_idle_rooms(&self) -> usize {
        let stale: Vec<String> = {
            let rooms = self.rooms.lock();
            let cutoff = ChronoDuration::hours(1);
            rooms
                .values()
                .filter(|r| r.participants.is_empty() && Utc::now().signed_duration_since(r.created_at) > cutoff)
                .map(|r| r.name.clone())
                .collect()
        };

        let mut cleaned = 0;
        for name in stale {
            let handle = self.pool.acquire().await;
            match handle.client().delete_room(&name).await {
                Ok(()) => {
                    self.rooms.lock().remove(&name);
                    cleaned += 1;
                    tracing::info!(room = %name, "cleaned up idle room");
                }
                Err(err) => {
                    tracing::error!(room = %name, error = %err, "failed to clean up idle room");
                }
            }
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ClientFactory, ConnectionPool};
    use crate::media_server::{MediaServerApi, RoomInfo};
    use async_trait::async_trait;
    use cx_domain::config::PoolConfig;

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
            Ok(Vec::new())
        }
    }

    fn ledger(max_rooms: usize, max_participants: usize) -> RoomLedger {
        let factory: ClientFactory = Box::new(|| Ok(Arc::new(FakeMedia) as Arc<dyn MediaServerApi>));
        let pool_config = PoolConfig {
            pool_size: 1,
            max_pool_size: 2,
            health_check_interval_s: 30,
            connection_timeout_s: 5,
            max_reconnect_attempts: 1,
            reconnect_base_delay_s: 0.01,
        };
        let pool = Arc::new(ConnectionPool::new(factory, pool_config));
        let mut limits = RoomLimitsConfig::default();
        limits.max_concurrent_rooms = max_rooms;
        limits.max_participants_per_room = max_participants;
        RoomLedger::new(pool, limits, AudioConfig::default())
    }

    #[tokio::test]
    async fn create_room_respects_concurrent_room_cap() {
        let l = ledger(1, 2);
        assert!(l.create_room("room-a", None, None).await.unwrap());
        assert!(!l.create_room("room-b", None, None).await.unwrap());
    }

    #[tokio::test]
    async fn add_participant_respects_per_room_cap() {
        let l = ledger(5, 1);
        l.create_room("room-a", None, None).await.unwrap();
        assert!(l.add_participant("room-a", "p1").unwrap());
        assert!(!l.add_participant("room-a", "p2").unwrap());
    }

    #[tokio::test]
    async fn duplicate_room_name_rejected() {
        let l = ledger(5, 2);
        assert!(l.create_room("room-a", None, None).await.unwrap());
        assert!(!l.create_room("room-a", None, None).await.unwrap());
    }
}

//! The narrow media-server surface a pooled connection exposes (§6),
//! plus the room-metadata document builder (§4.8).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cx_domain::config::{AudioConfig, RoomLimitsConfig};
use cx_domain::error::Result;

#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub max_participants: usize,
    pub metadata: serde_json::Value,
}

/// Consumed surface: room lifecycle plus a liveness probe. Transport,
/// authentication, and SDK details live in the concrete implementation.
#[async_trait]
pub trait MediaServerApi: Send + Sync {
    async fn create_room(
        &self,
        name: &str,
        empty_timeout_s: u64,
        departure_timeout_s: u64,
        max_participants: usize,
        metadata: serde_json::Value,
    ) -> Result<RoomInfo>;
    async fn delete_room(&self, name: &str) -> Result<()>;
    async fn list_rooms(&self) -> Result<Vec<RoomInfo>>;
}

/// Opaque to this core: carried verbatim to the media server on room
/// creation. `overrides` merge into `audio_optimization`, letting unknown
/// caller-supplied keys round-trip untouched (§4.8).
pub fn build_room_metadata(
    audio: &AudioConfig,
    limits: &RoomLimitsConfig,
    overrides: Option<&serde_json::Map<String, serde_json::Value>>,
) -> serde_json::Value {
    let mut audio_optimization = serde_json::json!({
        "target_latency_ms": audio.target_latency_ms,
        "buffer_size_ms": audio.buffer_size_ms,
        "jitter_buffer_ms": audio.jitter_buffer_ms,
        "echo_cancellation": audio.echo_cancellation,
        "noise_suppression": audio.noise_suppression,
        "auto_gain_control": audio.auto_gain_control,
        "adaptive_bitrate": audio.adaptive_bitrate,
        "min_bitrate_kbps": audio.min_bitrate_kbps,
        "max_bitrate_kbps": audio.max_bitrate_kbps,
    });

    if let Some(overrides) = overrides {
        if let Some(map) = audio_optimization.as_object_mut() {
            for (key, value) in overrides {
                map.insert(key.clone(), value.clone());
            }
        }
    }

    serde_json::json!({
        "audio_optimization": audio_optimization,
        "performance_limits": {
            "max_audio_tracks": limits.max_audio_tracks_per_room,
            "max_video_tracks": limits.max_video_tracks_per_room,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_merge_into_audio_optimization_without_losing_unknown_keys() {
        let audio = AudioConfig::default();
        let limits = RoomLimitsConfig::default();
        let mut overrides = serde_json::Map::new();
        overrides.insert("codec".into(), serde_json::json!("opus"));
        overrides.insert("target_latency_ms".into(), serde_json::json!(75));

        let metadata = build_room_metadata(&audio, &limits, Some(&overrides));
        let opt = &metadata["audio_optimization"];
        assert_eq!(opt["codec"], "opus");
        assert_eq!(opt["target_latency_ms"], 75);
        assert_eq!(opt["noise_suppression"], true);
        assert_eq!(metadata["performance_limits"]["max_audio_tracks"], limits.max_audio_tracks_per_room);
    }
}

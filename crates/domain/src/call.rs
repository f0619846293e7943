//! Call-scoped data: `CallContext` and `CallMetrics` (§3).

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable per-call identity and origin metadata.
///
/// `call_id` is assumed globally unique by callers (the media adapter
/// mints it); nothing here re-validates uniqueness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContext {
    pub call_id: String,
    pub caller_identifier: String,
    pub start_time: DateTime<Utc>,
    pub media_room_id: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl CallContext {
    pub fn new(
        call_id: impl Into<String>,
        caller_identifier: impl Into<String>,
        media_room_id: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            caller_identifier: caller_identifier.into(),
            start_time: Utc::now(),
            media_room_id: media_room_id.into(),
            metadata: None,
        }
    }
}

/// Monotonic counters and timings for one call (§3).
///
/// Created alongside the call; folded into aggregate orchestrator metrics
/// once the call ends. `Instant`-based fields are process-local and are not
/// serialized — callers that need wall-clock timestamps use
/// `last_activity_at` / `first_audio_at`.
#[derive(Debug, Clone)]
pub struct CallMetrics {
    pub turns_attempted: u64,
    pub turns_succeeded: u64,
    pub turns_failed: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub last_stt_latency_s: Option<f64>,
    pub last_llm_latency_s: Option<f64>,
    pub last_tts_latency_s: Option<f64>,
    pub first_audio_at: Option<Instant>,
    pub last_activity_at: Instant,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self {
            turns_attempted: 0,
            turns_succeeded: 0,
            turns_failed: 0,
            bytes_in: 0,
            bytes_out: 0,
            last_stt_latency_s: None,
            last_llm_latency_s: None,
            last_tts_latency_s: None,
            first_audio_at: None,
            last_activity_at: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Instant::now();
        if self.first_audio_at.is_none() {
            self.first_audio_at = Some(self.last_activity_at);
        }
    }

    /// `successful_turns + failed_turns <= total_turns` (§8 invariant 1);
    /// this is the `total_turns` half of that inequality.
    pub fn total_turns(&self) -> u64 {
        self.turns_succeeded + self.turns_failed
    }
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of aggregate, cross-call metrics exposed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AggregateMetrics {
    pub total_calls_handled: u64,
    pub successes: u64,
    pub failures: u64,
    pub active_calls: u64,
    #[serde(default)]
    pub rejections_by_reason: HashMap<String, u64>,
}

impl AggregateMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_calls_handled == 0 {
            return 0.0;
        }
        self.successes as f64 / self.total_calls_handled as f64
    }
}

/// Reason an inbound call/room/participant was rejected (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MaxConcurrentCallsReached,
    ResourceExhausted,
    UpstreamUnavailable,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::MaxConcurrentCallsReached => "max_concurrent_calls_reached",
            RejectionReason::ResourceExhausted => "resource_exhausted",
            RejectionReason::UpstreamUnavailable => "upstream_unavailable",
        }
    }
}

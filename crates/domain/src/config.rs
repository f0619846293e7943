//! Typed configuration records (§6). Each sub-config implements `Default`
//! with the documented defaults; nothing here loads a file or parses CLI
//! arguments — an embedding application constructs a [`Config`] directly.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub room_limits: RoomLimitsConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection pool (§4.7)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "d_pool_size")]
    pub pool_size: usize,
    /// Hard ceiling. Always explicit; never recomputed as "2x initial"
    /// after construction (Open Question #3).
    #[serde(default = "d_max_pool_size")]
    pub max_pool_size: usize,
    #[serde(default = "d_health_check_interval")]
    pub health_check_interval_s: u64,
    #[serde(default = "d_connection_timeout")]
    pub connection_timeout_s: u64,
    #[serde(default = "d_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "d_reconnect_base_delay")]
    pub reconnect_base_delay_s: f64,
}

fn d_pool_size() -> usize {
    3
}
fn d_max_pool_size() -> usize {
    2 * d_pool_size()
}
fn d_health_check_interval() -> u64 {
    30
}
fn d_connection_timeout() -> u64 {
    10
}
fn d_max_reconnect_attempts() -> u32 {
    5
}
fn d_reconnect_base_delay() -> f64 {
    1.0
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: d_pool_size(),
            max_pool_size: d_max_pool_size(),
            health_check_interval_s: d_health_check_interval(),
            connection_timeout_s: d_connection_timeout(),
            max_reconnect_attempts: d_max_reconnect_attempts(),
            reconnect_base_delay_s: d_reconnect_base_delay(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Room limits (§4.8)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomLimitsConfig {
    #[serde(default = "d_max_concurrent_rooms")]
    pub max_concurrent_rooms: usize,
    #[serde(default = "d_max_participants_per_room")]
    pub max_participants_per_room: usize,
    #[serde(default = "d_max_audio_tracks_per_room")]
    pub max_audio_tracks_per_room: usize,
    #[serde(default = "d_max_video_tracks_per_room")]
    pub max_video_tracks_per_room: usize,
    #[serde(default = "d_empty_room_timeout")]
    pub empty_room_timeout_s: u64,
    #[serde(default = "d_departure_timeout")]
    pub departure_timeout_s: u64,
}

fn d_max_concurrent_rooms() -> usize {
    100
}
fn d_max_participants_per_room() -> usize {
    2
}
fn d_max_audio_tracks_per_room() -> usize {
    2
}
fn d_max_video_tracks_per_room() -> usize {
    0
}
fn d_empty_room_timeout() -> u64 {
    300
}
fn d_departure_timeout() -> u64 {
    20
}

impl Default for RoomLimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_rooms: d_max_concurrent_rooms(),
            max_participants_per_room: d_max_participants_per_room(),
            max_audio_tracks_per_room: d_max_audio_tracks_per_room(),
            max_video_tracks_per_room: d_max_video_tracks_per_room(),
            empty_room_timeout_s: d_empty_room_timeout(),
            departure_timeout_s: d_departure_timeout(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audio optimization knobs, carried verbatim into room metadata (§4.8)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "d_target_latency_ms")]
    pub target_latency_ms: u32,
    #[serde(default = "d_buffer_size_ms")]
    pub buffer_size_ms: u32,
    #[serde(default = "d_jitter_buffer_ms")]
    pub jitter_buffer_ms: u32,
    #[serde(default = "d_true")]
    pub echo_cancellation: bool,
    #[serde(default = "d_true")]
    pub noise_suppression: bool,
    #[serde(default = "d_true")]
    pub auto_gain_control: bool,
    #[serde(default = "d_true")]
    pub adaptive_bitrate: bool,
    #[serde(default = "d_min_bitrate_kbps")]
    pub min_bitrate_kbps: u32,
    #[serde(default = "d_max_bitrate_kbps")]
    pub max_bitrate_kbps: u32,
}

fn d_target_latency_ms() -> u32 {
    150
}
fn d_buffer_size_ms() -> u32 {
    20
}
fn d_jitter_buffer_ms() -> u32 {
    40
}
fn d_true() -> bool {
    true
}
fn d_min_bitrate_kbps() -> u32 {
    16
}
fn d_max_bitrate_kbps() -> u32 {
    64
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_latency_ms: d_target_latency_ms(),
            buffer_size_ms: d_buffer_size_ms(),
            jitter_buffer_ms: d_jitter_buffer_ms(),
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            adaptive_bitrate: true,
            min_bitrate_kbps: d_min_bitrate_kbps(),
            max_bitrate_kbps: d_max_bitrate_kbps(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quality / health observer thresholds (§4.9)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "d_monitoring_interval")]
    pub monitoring_interval_s: u64,
    #[serde(default = "d_excellent")]
    pub threshold_excellent: f64,
    #[serde(default = "d_good")]
    pub threshold_good: f64,
    #[serde(default = "d_fair")]
    pub threshold_fair: f64,
    #[serde(default = "d_poor")]
    pub threshold_poor: f64,
    #[serde(default = "d_min_success_rate")]
    pub min_success_rate: f64,
}

fn d_monitoring_interval() -> u64 {
    30
}
fn d_excellent() -> f64 {
    0.9
}
fn d_good() -> f64 {
    0.75
}
fn d_fair() -> f64 {
    0.5
}
fn d_poor() -> f64 {
    0.25
}
fn d_min_success_rate() -> f64 {
    0.8
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            monitoring_interval_s: d_monitoring_interval(),
            threshold_excellent: d_excellent(),
            threshold_good: d_good(),
            threshold_fair: d_fair(),
            threshold_poor: d_poor(),
            min_success_rate: d_min_success_rate(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry (§4.1)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_base_delay")]
    pub base_delay_s: f64,
    #[serde(default = "d_max_delay")]
    pub max_delay_s: f64,
    #[serde(default = "d_exponential_base")]
    pub exponential_base: f64,
    #[serde(default = "d_true")]
    pub jitter: bool,
}

fn d_max_attempts() -> u32 {
    3
}
fn d_base_delay() -> f64 {
    0.5
}
fn d_max_delay() -> f64 {
    10.0
}
fn d_exponential_base() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: d_max_attempts(),
            base_delay_s: d_base_delay(),
            max_delay_s: d_max_delay(),
            exponential_base: d_exponential_base(),
            jitter: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Circuit breaker (§4.1)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "d_recovery_timeout")]
    pub recovery_timeout_s: f64,
    #[serde(default = "d_success_threshold")]
    pub success_threshold: u32,
}

fn d_failure_threshold() -> u32 {
    5
}
fn d_recovery_timeout() -> f64 {
    30.0
}
fn d_success_threshold() -> u32 {
    2
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d_failure_threshold(),
            recovery_timeout_s: d_recovery_timeout(),
            success_threshold: d_success_threshold(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM facade (§4.2)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_llm_model")]
    pub model: String,
    #[serde(default = "d_max_context_tokens")]
    pub max_context_tokens: u32,
    #[serde(default = "d_max_response_tokens")]
    pub max_response_tokens: u32,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_summarization_threshold")]
    pub summarization_threshold: u32,
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
}

fn d_llm_model() -> String {
    "default-chat-model".to_string()
}
fn d_max_context_tokens() -> u32 {
    4096
}
fn d_max_response_tokens() -> u32 {
    512
}
fn d_temperature() -> f32 {
    0.7
}
fn d_summarization_threshold() -> u32 {
    20
}
fn d_system_prompt() -> String {
    "You are a helpful voice assistant. Keep responses brief and conversational.".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: d_llm_model(),
            max_context_tokens: d_max_context_tokens(),
            max_response_tokens: d_max_response_tokens(),
            temperature: d_temperature(),
            summarization_threshold: d_summarization_threshold(),
            system_prompt: d_system_prompt(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT facade (§4.2)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "d_stt_model")]
    pub model: String,
    #[serde(default = "d_language")]
    pub language: String,
    #[serde(default = "d_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "d_channels")]
    pub channels: u8,
    #[serde(default = "d_encoding")]
    pub encoding: String,
    #[serde(default = "d_true")]
    pub interim_results: bool,
    #[serde(default = "d_endpointing_ms")]
    pub endpointing_ms: u32,
    #[serde(default = "d_confidence_threshold")]
    pub confidence_threshold: f32,
}

fn d_stt_model() -> String {
    "default-stt-model".to_string()
}
fn d_language() -> String {
    "en-US".to_string()
}
fn d_sample_rate() -> u32 {
    8_000
}
fn d_channels() -> u8 {
    1
}
fn d_encoding() -> String {
    "linear16".to_string()
}
fn d_endpointing_ms() -> u32 {
    300
}
fn d_confidence_threshold() -> f32 {
    0.5
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: d_stt_model(),
            language: d_language(),
            sample_rate: d_sample_rate(),
            channels: d_channels(),
            encoding: d_encoding(),
            interim_results: true,
            endpointing_ms: d_endpointing_ms(),
            confidence_threshold: d_confidence_threshold(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS facade (§4.2)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "d_tts_model_id")]
    pub model_id: String,
    #[serde(default = "d_default_voice_id")]
    pub default_voice_id: String,
    #[serde(default = "d_encoding")]
    pub default_container: String,
    #[serde(default = "d_sample_rate")]
    pub default_sample_rate: u32,
}

fn d_tts_model_id() -> String {
    "default-tts-model".to_string()
}
fn d_default_voice_id() -> String {
    "default".to_string()
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model_id: d_tts_model_id(),
            default_voice_id: d_default_voice_id(),
            default_container: "wav".to_string(),
            default_sample_rate: d_sample_rate(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator (§4.6)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "d_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    #[serde(default = "d_audio_buffer_size")]
    pub audio_buffer_size: usize,
    #[serde(default = "d_response_timeout")]
    pub response_timeout_s: f64,
}

fn d_max_concurrent_calls() -> usize {
    50
}
fn d_audio_buffer_size() -> usize {
    64 * 1024
}
fn d_response_timeout() -> f64 {
    10.0
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: d_max_concurrent_calls(),
            audio_buffer_size: d_audio_buffer_size(),
            response_timeout_s: d_response_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_pool_size_defaults_to_double_pool_size() {
        let pool = PoolConfig::default();
        assert_eq!(pool.max_pool_size, 2 * pool.pool_size);
    }

    #[test]
    fn config_default_is_deserializable_from_empty_object() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.pool.pool_size, PoolConfig::default().pool_size);
        assert_eq!(cfg.llm.model, LlmConfig::default().model);
    }

    #[test]
    fn room_limits_match_original_source_defaults() {
        let room = RoomLimitsConfig::default();
        assert_eq!(room.empty_room_timeout_s, 300);
        assert_eq!(room.departure_timeout_s, 20);
    }
}

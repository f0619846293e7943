//! Voice and audio-format value objects consumed by the TTS facade (§4.2).

use serde::{Deserialize, Serialize};

/// A synthesis voice selection. `speed` is clamped to `[0.5, 2.0]` on
/// construction rather than rejected, matching the facade's validation
/// style for out-of-range-but-recoverable inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub speed: f32,
    pub language: String,
    pub emotion: Option<String>,
}

impl Voice {
    pub fn new(id: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            speed: 1.0,
            language: language.into(),
            emotion: None,
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed.clamp(0.5, 2.0);
        self
    }

    pub fn with_emotion(mut self, emotion: impl Into<String>) -> Self {
        self.emotion = Some(emotion.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioContainer {
    Wav,
    Mp3,
    Raw,
}

/// An audio format descriptor, shared by synthesized TTS output and the
/// silence fallback generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFormat {
    pub container: AudioContainer,
    pub sample_rate: u32,
    pub encoding: Option<String>,
    pub bit_rate: Option<u32>,
}

impl AudioFormat {
    pub fn new(container: AudioContainer, sample_rate: u32) -> Self {
        Self {
            container,
            sample_rate,
            encoding: None,
            bit_rate: None,
        }
    }

    /// The 8 kHz telephony preset (§4.2's preset factory).
    pub fn telephony() -> Self {
        Self::new(AudioContainer::Wav, 8_000)
    }

    /// A wideband preset for non-PSTN legs, kept for symmetry with the
    /// telephony preset; not required by any invariant.
    pub fn wideband() -> Self {
        Self::new(AudioContainer::Wav, 16_000)
    }
}

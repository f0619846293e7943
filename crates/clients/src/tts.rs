//! TTS client facade (§4.2): text preprocessing, streaming + batch
//! synthesis, and fallback silence generation.

use std::sync::Arc;

use async_trait::async_trait;
use cx_domain::error::{Error, Result};
use cx_domain::voice::{AudioContainer, AudioFormat, Voice};
use regex::Regex;
use tokio::sync::mpsc;

use crate::resilience::{ClientMetricsSnapshot, ResilientClient};

#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub audio_bytes: Vec<u8>,
    pub duration_s: f64,
    pub format: AudioFormat,
    pub characters_processed: usize,
    pub synthesis_time_s: f64,
}

/// The vendor-facing seam for text-to-speech.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize_batch(&self, text: &str, voice: &Voice, format: &AudioFormat) -> Result<SynthesisResult>;
    async fn synthesize_stream(&self, text: &str, voice: &Voice, format: &AudioFormat) -> Result<mpsc::Receiver<Vec<u8>>>;
    async fn health_check(&self) -> Result<bool>;
}

struct Preprocessor {
    whitespace: Regex,
    abbreviations: Vec<(Regex, &'static str)>,
    currency: Regex,
    percent: Regex,
    repeated_period: Regex,
    repeated_bang: Regex,
    repeated_question: Regex,
}

impl Preprocessor {
    fn new() -> Self {
        Self {
            whitespace: Regex::new(r"\s+").unwrap(),
            abbreviations: vec![
                (Regex::new(r"\bDr\.").unwrap(), "Doctor"),
                (Regex::new(r"\bMr\.").unwrap(), "Mister"),
                (Regex::new(r"\bMrs\.").unwrap(), "Missus"),
                (Regex::new(r"\bMs\.").unwrap(), "Miss"),
                (Regex::new(r"\betc\.").unwrap(), "etcetera"),
                (Regex::new(r"\bi\.e\.").unwrap(), "that is"),
                (Regex::new(r"\be\.g\.").unwrap(), "for example"),
            ],
            currency: Regex::new(r"\$(\d+)").unwrap(),
            percent: Regex::new(r"(\d+)%").unwrap(),
            repeated_period: Regex::new(r"\.{2,}").unwrap(),
            repeated_bang: Regex::new(r"!{2,}").unwrap(),
            repeated_question: Regex::new(r"\?{2,}").unwrap(),
        }
    }

    /// Collapse whitespace, normalize quotes, expand common abbreviations,
    /// spell out currency/percent, collapse repeated terminal punctuation,
    /// ensure a sentence-ending mark (§4.2).
    fn preprocess(&self, text: &str) -> String {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let mut s = self.whitespace.replace_all(trimmed, " ").to_string();
        s = s.replace(['\u{201c}', '\u{201d}'], "\"");
        s = s.replace(['\u{2018}', '\u{2019}'], "'");

        for (pattern, replacement) in &self.abbreviations {
            s = pattern.replace_all(&s, *replacement).to_string();
        }
        s = self.currency.replace_all(&s, "$1 dollars").to_string();
        s = self.percent.replace_all(&s, "$1 percent").to_string();

        s = self.repeated_period.replace_all(&s, ".").to_string();
        s = self.repeated_bang.replace_all(&s, "!").to_string();
        s = self.repeated_question.replace_all(&s, "?").to_string();

        let s = s.trim().to_string();
        if let Some(last) = s.chars().last() {
            if !matches!(last, '.' | '!' | '?') {
                return format!("{s}.");
            }
        }
        s
    }
}

/// Reject empty/whitespace-only; warn (don't reject) over 1000
/// characters or on bracket/brace characters (§4.2).
fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::InvalidInput("text is empty".into()));
    }
    if text.chars().count() > 1000 {
        tracing::warn!(len = text.chars().count(), "tts text exceeds recommended length");
    }
    if text.chars().any(|c| matches!(c, '<' | '>' | '{' | '}' | '[' | ']')) {
        tracing::warn!("tts text contains potentially problematic characters");
    }
    Ok(())
}

/// A fixed duration of silence in the requested container/sample rate
/// (Open Question resolution #2: the requested format, not hardcoded
/// 16 kHz WAV).
fn generate_silence(format: &AudioFormat, duration_s: f64) -> Vec<u8> {
    let num_samples = (duration_s * format.sample_rate as f64) as usize;
    match format.container {
        AudioContainer::Wav => {
            let data_len = num_samples * 2;
            let mut bytes = Vec::with_capacity(44 + data_len);
            bytes.extend_from_slice(b"RIFF");
            bytes.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
            bytes.extend_from_slice(b"WAVEfmt ");
            bytes.extend_from_slice(&16u32.to_le_bytes());
            bytes.extend_from_slice(&1u16.to_le_bytes());
            bytes.extend_from_slice(&1u16.to_le_bytes());
            bytes.extend_from_slice(&format.sample_rate.to_le_bytes());
            let byte_rate = format.sample_rate * 2;
            bytes.extend_from_slice(&byte_rate.to_le_bytes());
            bytes.extend_from_slice(&2u16.to_le_bytes());
            bytes.extend_from_slice(&16u16.to_le_bytes());
            bytes.extend_from_slice(b"data");
            bytes.extend_from_slice(&(data_len as u32).to_le_bytes());
            bytes.extend(std::iter::repeat(0u8).take(data_len));
            bytes
        }
        AudioContainer::Raw | AudioContainer::Mp3 => vec![0u8; num_samples * 2],
    }
}

pub struct TtsFacade {
    backend: Arc<dyn TtsBackend>,
    resilient: ResilientClient,
    preprocessor: Preprocessor,
}

impl TtsFacade {
    pub fn new(backend: Arc<dyn TtsBackend>, retry: cx_domain::config::RetryConfig, breaker: cx_domain::config::BreakerConfig) -> Self {
        Self {
            backend,
            resilient: ResilientClient::new("tts", retry, breaker),
            preprocessor: Preprocessor::new(),
        }
    }

    pub fn metrics(&self) -> ClientMetricsSnapshot {
        self.resilient.metrics()
    }

    pub fn preprocess_text(&self, text: &str) -> String {
        self.preprocessor.preprocess(text)
    }

    pub async fn synthesize_batch(&self, text: &str, voice: &Voice, format: &AudioFormat) -> Result<SynthesisResult> {
        validate_text(text)?;
        let processed = self.preprocess_text(text);

        let backend = self.backend.clone();
        let voice = voice.clone();
        let format = format.clone();
        self.resilient
            .execute(move |_cid| {
                let backend = backend.clone();
                let processed = processed.clone();
                let voice = voice.clone();
                let format = format.clone();
                async move { backend.synthesize_batch(&processed, &voice, &format).await }
            })
            .await
    }

    /// On any mid-stream failure, emits one chunk of fallback silence
    /// instead of raising (§4.2).
    pub async fn synthesize_stream(&self, text: &str, voice: &Voice, format: &AudioFormat) -> Result<mpsc::Receiver<Vec<u8>>> {
        validate_text(text)?;
        let processed = self.preprocess_text(text);

        match self.backend.synthesize_stream(&processed, voice, format).await {
            Ok(rx) => Ok(rx),
            Err(err) => {
                tracing::warn!(error = %err, "yielding fallback silence due to synthesis error");
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.send(generate_silence(format, 1.0)).await;
                Ok(rx)
            }
        }
    }

    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await.unwrap_or(false)
    }

    /// Exposes the same fallback silence clip `synthesize_stream` falls
    /// back to. Streaming-only (§7): a batch synthesis failure is a
    /// genuine turn failure and must not be masked with silence.
    pub fn fallback_silence(&self, format: &AudioFormat, duration_s: f64) -> Vec<u8> {
        generate_silence(format, duration_s)
    }
}

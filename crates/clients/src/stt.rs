//! STT client facade (§4.2): batch + streaming transcription.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cx_domain::config::SttConfig;
use cx_domain::error::{Error, Result};
use tokio::sync::mpsc;

use crate::resilience::{ClientMetricsSnapshot, ResilientClient};

#[derive(Debug, Clone, Default)]
pub struct TranscriptionResult {
    pub text: String,
    pub confidence: f32,
    pub language: String,
    pub duration_s: f64,
    pub alternatives: Vec<String>,
    pub is_final: bool,
    pub word_timings: Vec<(String, f64, f64)>,
}

/// The vendor-facing seam for speech-to-text.
#[async_trait]
pub trait SttBackend: Send + Sync {
    async fn transcribe_batch(&self, audio: &[u8], mime: &str) -> Result<TranscriptionResult>;
    /// One attempt at opening a streaming connection; yields partial/final
    /// results into `out` until the input closes or the connection fails.
    async fn stream_connection(
        &self,
        connection_id: &str,
        chunks: &mut mpsc::Receiver<Vec<u8>>,
        out: &mpsc::Sender<TranscriptionResult>,
    ) -> Result<()>;
    async fn health_check(&self) -> Result<bool>;
}

pub struct SttFacade {
    backend: Arc<dyn SttBackend>,
    resilient: ResilientClient,
    config: SttConfig,
    max_reconnections: u32,
}

impl SttFacade {
    pub fn new(
        backend: Arc<dyn SttBackend>,
        config: SttConfig,
        retry: cx_domain::config::RetryConfig,
        breaker: cx_domain::config::BreakerConfig,
        max_reconnections: u32,
    ) -> Self {
        Self {
            backend,
            resilient: ResilientClient::new("stt", retry, breaker),
            config,
            max_reconnections,
        }
    }

    pub fn metrics(&self) -> ClientMetricsSnapshot {
        self.resilient.metrics()
    }

    pub async fn transcribe_batch(&self, audio_bytes: &[u8], mime: &str) -> Result<TranscriptionResult> {
        if audio_bytes.is_empty() {
            return Err(Error::InvalidInput("audio data is empty".into()));
        }

        let backend = self.backend.clone();
        let audio = audio_bytes.to_vec();
        let mime = mime.to_string();
        self.resilient
            .execute(move |_cid| {
                let backend = backend.clone();
                let audio = audio.clone();
                let mime = mime.clone();
                async move { backend.transcribe_batch(&audio, &mime).await }
            })
            .await
    }

    /// Drives a streaming transcription. `audio_chunks` feeds the
    /// microphone/media audio; the returned receiver yields partial and
    /// final transcription results. Auto-reconnects up to
    /// `max_reconnections` times with exponential backoff; the
    /// `max_reconnections + 1`-th failure propagates by closing the
    /// output channel without further results (§8 boundary behavior).
    pub async fn transcribe_stream(
        &self,
        connection_id: String,
        mut audio_chunks: mpsc::Receiver<Vec<u8>>,
    ) -> mpsc::Receiver<TranscriptionResult> {
        let (out_tx, out_rx) = mpsc::channel(32);
        let backend = self.backend.clone();
        let max_reconnections = self.max_reconnections;

        tokio::spawn(async move {
            let mut reconnections = 0u32;
            loop {
                match backend
                    .stream_connection(&connection_id, &mut audio_chunks, &out_tx)
                    .await
                {
                    Ok(()) => break,
                    Err(err) => {
                        reconnections += 1;
                        if reconnections > max_reconnections {
                            tracing::error!(
                                connection_id = %connection_id,
                                attempts = reconnections,
                                error = %err,
                                "max reconnections exceeded for streaming connection"
                            );
                            break;
                        }
                        tracing::warn!(
                            connection_id = %connection_id,
                            attempt = reconnections,
                            error = %err,
                            "streaming connection failed, reconnecting"
                        );
                        let delay = Duration::from_secs(2u64.saturating_pow(reconnections).min(10));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });

        out_rx
    }

    pub fn config(&self) -> &SttConfig {
        &self.config
    }

    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await.unwrap_or(false)
    }
}

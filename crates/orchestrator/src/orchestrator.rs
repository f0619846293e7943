//! The call orchestrator (§4.6): public call-lifecycle events, admission
//! control, and aggregate metrics. Ties the dialogue manager, turn
//! pipeline, connection pool, and room ledger together for one process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cx_clients::llm::LlmFacade;
use cx_clients::stt::SttFacade;
use cx_clients::tts::TtsFacade;
use cx_conversation::DialogueManager;
use cx_domain::call::{AggregateMetrics, CallContext, RejectionReason};
use cx_domain::config::{LlmConfig, OrchestratorConfig};
use cx_domain::error::{Error, Result};
use cx_domain::turn::ConversationSummary;
use cx_domain::voice::{AudioFormat, Voice};
use cx_pool::{ConnectionPool, RoomLedger};
use parking_lot::Mutex;

use crate::pipeline::{self, AudioSink, CallState};
use crate::session_lock::CallLockMap;

pub struct CallOrchestrator {
    config: OrchestratorConfig,
    llm: Arc<LlmFacade>,
    llm_config: LlmConfig,
    stt: Arc<SttFacade>,
    tts: Arc<TtsFacade>,
    voice: Voice,
    format: AudioFormat,
    confidence_threshold: f32,
    pool: Arc<ConnectionPool>,
    rooms: Arc<RoomLedger>,
    sink: Arc<dyn AudioSink>,
    calls: Mutex<HashMap<String, Arc<CallState>>>,
    call_locks: CallLockMap,
    aggregate: Mutex<AggregateMetrics>,
    closed: AtomicBool,
}

#[allow(clippy::too_many_arguments)]
impl CallOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        llm: Arc<LlmFacade>,
        llm_config: LlmConfig,
        stt: Arc<SttFacade>,
        tts: Arc<TtsFacade>,
        confidence_threshold: f32,
        voice: Voice,
        format: AudioFormat,
        pool: Arc<ConnectionPool>,
        rooms: Arc<RoomLedger>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            config,
            llm,
            llm_config,
            stt,
            tts,
            voice,
            format,
            confidence_threshold,
            pool,
            rooms,
            sink,
            calls: Mutex::new(HashMap::new()),
            call_locks: CallLockMap::new(),
            aggregate: Mutex::new(AggregateMetrics::default()),
            closed: AtomicBool::new(false),
        }
    }

    fn record_rejection(&self, reason: RejectionReason) {
        let mut agg = self.aggregate.lock();
        *agg.rejections_by_reason.entry(reason.as_str().to_string()).or_insert(0) += 1;
        tracing::warn!(reason = reason.as_str(), "call rejected");
    }

    /// Admits a new call unless the orchestrator is at capacity or
    /// shutting down. Rejection is observable through the aggregate
    /// metrics and the returned `RejectionReason`, never an error (§4.6).
    pub async fn on_call_start(
        &self,
        call_id: &str,
        caller_identifier: &str,
        media_room_id: &str,
    ) -> std::result::Result<(), RejectionReason> {
        if self.closed.load(Ordering::SeqCst) {
            self.record_rejection(RejectionReason::UpstreamUnavailable);
            return Err(RejectionReason::UpstreamUnavailable);
        }

        {
            let calls = self.calls.lock();
            if calls.len() >= self.config.max_concurrent_calls {
                self.record_rejection(RejectionReason::MaxConcurrentCallsReached);
                return Err(RejectionReason::MaxConcurrentCallsReached);
            }
            if calls.contains_key(call_id) {
                self.record_rejection(RejectionReason::ResourceExhausted);
                return Err(RejectionReason::ResourceExhausted);
            }
        }

        let dialogue = DialogueManager::new(call_id, self.llm.clone(), self.llm_config.clone());
        let context = CallContext::new(call_id, caller_identifier, media_room_id);
        let call = Arc::new(CallState::new(context, dialogue));

        self.calls.lock().insert(call_id.to_string(), call);
        let mut agg = self.aggregate.lock();
        agg.total_calls_handled += 1;
        agg.active_calls += 1;

        tracing::info!(call_id, "call started");
        Ok(())
    }

    fn get_call(&self, call_id: &str) -> Result<Arc<CallState>> {
        self.calls
            .lock()
            .get(call_id)
            .cloned()
            .ok_or_else(|| Error::Policy {
                reason: format!("no active call {call_id}"),
            })
    }

    /// Buffers incoming audio and drives one turn-pipeline pass under the
    /// per-call lock. A second arrival while a turn is already running
    /// waits for the lock and then runs against whatever has accumulated
    /// in the buffer meanwhile, rather than starting a second pass.
    pub async fn on_audio_received(&self, call_id: &str, audio: &[u8]) -> Result<()> {
        let call = self.get_call(call_id)?;
        call.append_audio(audio);

        let _guard = self.call_locks.acquire(call_id).await;
        pipeline::run_turn(
            &call,
            &self.stt,
            &self.tts,
            self.sink.as_ref(),
            self.confidence_threshold,
            self.config.audio_buffer_size,
            &self.voice,
            &self.format,
        )
        .await;
        Ok(())
    }

    /// Ends a call, releasing its lock-map entry and folding its metrics
    /// into the aggregate. Returns `None` if the call was unknown (already
    /// ended, or never started) — idempotent by design.
    pub async fn on_call_end(&self, call_id: &str) -> Option<ConversationSummary> {
        let call = self.calls.lock().remove(call_id)?;
        self.call_locks.remove(call_id);

        let summary = call.dialogue.end_conversation().await;
        let metrics = call.metrics.lock();

        let mut agg = self.aggregate.lock();
        agg.active_calls = agg.active_calls.saturating_sub(1);
        if metrics.turns_failed == 0 || metrics.turns_succeeded > 0 {
            agg.successes += 1;
        } else {
            agg.failures += 1;
        }

        tracing::info!(call_id, turns = metrics.total_turns(), "call ended");
        Some(summary)
    }

    pub fn aggregate_metrics(&self) -> AggregateMetrics {
        self.aggregate.lock().clone()
    }

    pub fn active_call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Ends every active call, then tears down the pool. Safe to call more
    /// than once; later calls are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let call_ids: Vec<String> = self.calls.lock().keys().cloned().collect();
        for call_id in call_ids {
            self.on_call_end(&call_id).await;
        }
        self.pool.shutdown();
        tracing::info!("call orchestrator closed");
    }
}

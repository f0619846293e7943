//! Turn pipeline (§4.5): listen → transcribe → understand → generate →
//! synthesize → speak, for one call. The per-call lock (§5) is acquired
//! by the orchestrator before calling [`run_turn`]; this module only
//! implements steps 2-8.

use cx_clients::stt::SttFacade;
use cx_clients::tts::TtsFacade;
use cx_conversation::{ConversationFsm, ConversationState, DialogueManager};
use cx_domain::call::{CallContext, CallMetrics};
use cx_domain::voice::{AudioFormat, Voice};
use parking_lot::Mutex;

/// Where synthesized audio for a call is delivered. Transport/codec
/// details are out of scope; this is the seam a media adapter plugs
/// into.
pub trait AudioSink: Send + Sync {
    fn emit(&self, call_id: &str, audio: Vec<u8>);
}

/// Per-call state the turn pipeline operates on. Owned by the
/// orchestrator's call ledger.
pub struct CallState {
    pub context: CallContext,
    pub metrics: Mutex<CallMetrics>,
    pub fsm: ConversationFsm,
    pub dialogue: DialogueManager,
    pub buffer: Mutex<Vec<u8>>,
}

impl CallState {
    pub fn new(context: CallContext, dialogue: DialogueManager) -> Self {
        Self {
            context,
            metrics: Mutex::new(CallMetrics::new()),
            fsm: ConversationFsm::new(),
            dialogue,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn append_audio(&self, bytes: &[u8]) {
        self.buffer.lock().extend_from_slice(bytes);
        self.metrics.lock().bytes_in += bytes.len() as u64;
    }
}

async fn force_listening(call: &CallState, trigger: &str) {
    call.fsm.force_transition(ConversationState::Listening, trigger).await;
}

/// Runs one listen→process→speak cycle against whatever audio is
/// currently buffered. Caller must already hold the per-call lock.
pub async fn run_turn(
    call: &CallState,
    stt: &SttFacade,
    tts: &TtsFacade,
    sink: &dyn AudioSink,
    confidence_threshold: f32,
    max_buffer_bytes: usize,
    voice: &Voice,
    format: &AudioFormat,
) {
    let audio = {
        let mut buf = call.buffer.lock();
        std::mem::take(&mut *buf)
    };

    if audio.is_empty() || audio.len() > max_buffer_bytes {
        tracing::warn!(call_id = %call.context.call_id, len = audio.len(), "invalid audio buffer, dropping turn");
        return;
    }

    call.metrics.lock().turns_attempted += 1;
    call.fsm.transition_to(ConversationState::Processing, "user_speech_detected").await;

    let transcription = match stt.transcribe_batch(&audio, "audio/raw").await {
        Ok(t) => t,
        Err(err) => {
            tracing::error!(call_id = %call.context.call_id, error = %err, "stt failed, reverting to listening");
            force_listening(call, "stt_error").await;
            call.metrics.lock().turns_failed += 1;
            return;
        }
    };

    if transcription.text.trim().is_empty() || transcription.confidence < confidence_threshold {
        tracing::info!(
            call_id = %call.context.call_id,
            confidence = transcription.confidence,
            "low confidence transcription, reverting to listening"
        );
        call.fsm.transition_to(ConversationState::Listening, "low_confidence").await;
        call.metrics.lock().turns_failed += 1;
        return;
    }
    call.metrics.lock().last_stt_latency_s = Some(transcription.duration_s);

    let (assistant_text, turn) = call.dialogue.process_user_input(&transcription.text, None).await;
    if let Some(latency) = turn.metadata.get("llm_latency_s").and_then(|v| v.as_f64()) {
        call.metrics.lock().last_llm_latency_s = Some(latency);
    }

    call.fsm.transition_to(ConversationState::Speaking, "response_ready").await;

    let synth = match tts.synthesize_batch(&assistant_text, voice, format).await {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(call_id = %call.context.call_id, error = %err, "tts failed, reverting to listening");
            force_listening(call, "tts_error").await;
            call.metrics.lock().turns_failed += 1;
            return;
        }
    };
    call.metrics.lock().last_tts_latency_s = Some(synth.synthesis_time_s);

    sink.emit(&call.context.call_id, synth.audio_bytes.clone());
    call.metrics.lock().bytes_out += synth.audio_bytes.len() as u64;

    call.fsm.transition_to(ConversationState::Listening, "utterance_complete").await;
    let mut metrics = call.metrics.lock();
    metrics.turns_succeeded += 1;
    metrics.touch();
}

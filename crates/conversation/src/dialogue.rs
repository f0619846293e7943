//! Dialogue management (§4.4): per-conversation context, turn
//! processing, summarization, and quality metrics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cx_clients::llm::{FallbackKind, LlmFacade};
use cx_domain::config::LlmConfig;
use cx_domain::error::Result;
use cx_domain::turn::{
    ConversationContext, ConversationSummary, ConversationTurn, Message, QualityScores,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Running counters behind [`DialogueManager::get_conversation_metrics`].
#[derive(Debug, Clone, Default)]
pub struct ConversationMetrics {
    pub total_turns: u64,
    pub average_response_time_s: f64,
    pub total_processing_time_s: f64,
    pub stt_latency_s: f64,
    pub llm_latency_s: f64,
    pub tts_latency_s: f64,
    pub error_count: u64,
    pub interruption_count: u64,
    pub context_truncations: u64,
    pub fallback_responses: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
}

impl ConversationMetrics {
    fn update_response_time(&mut self, response_time_s: f64) {
        if self.total_turns == 0 {
            self.average_response_time_s = response_time_s;
        } else {
            self.average_response_time_s = (self.average_response_time_s * self.total_turns as f64
                + response_time_s)
                / (self.total_turns + 1) as f64;
        }
    }
}

struct State {
    context: ConversationContext,
    turns: Vec<ConversationTurn>,
    summary: Option<String>,
    metrics: ConversationMetrics,
}

/// Owns one conversation's context, history, and quality metrics.
/// `process_user_input` is serialized by an internal lock so a single
/// conversation never runs two turns concurrently (§4.4).
pub struct DialogueManager {
    conversation_id: String,
    llm: Arc<LlmFacade>,
    config: LlmConfig,
    start: DateTime<Utc>,
    state: Mutex<State>,
}

impl DialogueManager {
    pub fn new(conversation_id: impl Into<String>, llm: Arc<LlmFacade>, config: LlmConfig) -> Self {
        let conversation_id = conversation_id.into();
        let context = ConversationContext::new(Some(config.system_prompt.clone()), config.max_context_tokens, config.temperature);
        Self {
            conversation_id,
            llm,
            config,
            start: Utc::now(),
            state: Mutex::new(State {
                context,
                turns: Vec::new(),
                summary: None,
                metrics: ConversationMetrics::default(),
            }),
        }
    }

    /// Understanding → context management → Generation → Response.
    /// Never propagates a backend error: on failure a fallback response is
    /// synthesized, the turn is recorded with `fallback=true`, and the
    /// error is surfaced only through `error_count`/the turn's metadata.
    pub async fn process_user_input(
        &self,
        user_input: &str,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> (String, ConversationTurn) {
        let mut state = self.state.lock().await;
        let start = std::time::Instant::now();
        let turn_id = Uuid::new_v4().to_string();
        let correlation_id = format!("{}_{}", self.conversation_id, &turn_id[..8]);

        tracing::info!(
            conversation_id = %self.conversation_id,
            turn_id = %turn_id,
            correlation_id = %correlation_id,
            "processing user input"
        );

        state.context.push(Message::user(user_input));
        self.manage_context_size(&mut state).await;

        let llm_start = std::time::Instant::now();
        let generated = self.llm.generate(&state.context).await;
        let llm_latency_s = llm_start.elapsed().as_secs_f64();
        state.metrics.llm_latency_s = llm_latency_s;

        let mut turn_metadata: cx_domain::turn::TurnMetadata = metadata
            .map(|m| m.into_iter().collect())
            .unwrap_or_default();

        let (assistant_text, failed, error_text) = match generated {
            Ok(result) => {
                state.metrics.total_prompt_tokens += result.token_usage.prompt_tokens as u64;
                state.metrics.total_completion_tokens += result.token_usage.completion_tokens as u64;
                (result.text, false, None)
            }
            Err(err) => {
                tracing::error!(
                    conversation_id = %self.conversation_id,
                    turn_id = %turn_id,
                    error = %err,
                    "error generating response"
                );
                let fallback = self.llm.fallback_response(FallbackKind::General);
                (fallback.text, true, Some(err.to_string()))
            }
        };

        state.context.push(Message::assistant(&assistant_text));

        let processing_time_s = start.elapsed().as_secs_f64();
        turn_metadata.insert("llm_latency_s".into(), serde_json::json!(llm_latency_s));
        turn_metadata.insert("correlation_id".into(), serde_json::json!(correlation_id));
        if failed {
            turn_metadata.insert("fallback".into(), serde_json::json!(true));
            turn_metadata.insert("error".into(), serde_json::json!(error_text.unwrap_or_default()));
        }

        let mut turn = ConversationTurn::new(user_input, assistant_text.clone());
        turn.turn_id = turn_id;
        turn.processing_time_s = processing_time_s;
        turn.metadata = turn_metadata;

        state.metrics.total_turns += 1;
        state.metrics.update_response_time(processing_time_s);
        state.metrics.total_processing_time_s += processing_time_s;
        if failed {
            state.metrics.error_count += 1;
            state.metrics.fallback_responses += 1;
        }

        state.turns.push(turn.clone());

        tracing::info!(
            conversation_id = %self.conversation_id,
            turn_id = %turn.turn_id,
            processing_time_s,
            "generated response"
        );

        (assistant_text, turn)
    }

    /// Summarize once `summarization_threshold` turns have accumulated,
    /// then truncate the live context if it still exceeds 80% of budget.
    async fn manage_context_size(&self, state: &mut State) {
        if state.turns.len() as u32 >= self.config.summarization_threshold {
            self.summarize_conversation(state).await;
        }

        let messages = state.context.api_view();
        let total_tokens = self.llm.compute_context_tokens(&messages);
        if total_tokens as f64 > self.config.max_context_tokens as f64 * 0.8 {
            tracing::info!(
                conversation_id = %self.conversation_id,
                total_tokens,
                "context approaching limit, truncating"
            );
            let truncated = self.llm.truncate_context(&messages, self.config.max_context_tokens);
            let prompt = state.context.system_prompt.clone();
            state.context.messages = truncated
                .into_iter()
                .filter(|m| {
                    let is_synthetic_prompt_echo =
                        m.role == cx_domain::turn::Role::System && prompt.as_deref() == Some(m.content.as_str());
                    !is_synthetic_prompt_echo
                })
                .collect();
            state.metrics.context_truncations += 1;
        }
    }

    /// Needs at least 3 accumulated turns for a meaningful summary; a
    /// failed summarization request leaves the context untouched.
    async fn summarize_conversation(&self, state: &mut State) {
        if state.turns.len() < 3 {
            return;
        }

        let transcript: String = state
            .turns
            .iter()
            .rev()
            .take(10)
            .rev()
            .map(|t| format!("User: {}\nAssistant: {}", t.user_text, t.assistant_text))
            .collect::<Vec<_>>()
            .join("\n");

        let mut summary_context = ConversationContext::new(
            Some(
                "You are a helpful assistant that creates concise summaries of conversations. \
                 Summarize the key points, topics discussed, and important context from the \
                 conversation below."
                    .to_string(),
            ),
            self.config.max_context_tokens,
            self.config.temperature,
        );
        summary_context.push(Message::user(format!("Please summarize this conversation:\n\n{transcript}")));

        match self.llm.generate(&summary_context).await {
            Ok(result) => {
                state.context.replace_with_summary(&result.text);
                state.summary = Some(result.text);
                tracing::info!(conversation_id = %self.conversation_id, "generated conversation summary");
            }
            Err(err) => {
                tracing::error!(conversation_id = %self.conversation_id, error = %err, "failed to generate conversation summary");
            }
        }
    }

    pub async fn add_to_history(&self, role: cx_domain::turn::Role, content: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.context.push(Message::new(role, content));
    }

    /// `response_time_score`/`error_score`/`context_efficiency`/
    /// `fallback_score`, each `max(0, 1 - ratio)` against the turn count
    /// (§4.4, §8 invariant 8).
    async fn quality_scores(&self, state: &State) -> QualityScores {
        if state.turns.is_empty() {
            return QualityScores::default();
        }
        let total_turns = state.metrics.total_turns.max(1) as f64;

        let response_time_score = (1.0 - state.metrics.average_response_time_s / 3.0).max(0.0);
        let error_rate = state.metrics.error_count as f64 / total_turns;
        let error_score = (1.0 - error_rate).max(0.0);
        let truncation_rate = state.metrics.context_truncations as f64 / total_turns;
        let context_efficiency = (1.0 - truncation_rate).max(0.0);
        let fallback_rate = state.metrics.fallback_responses as f64 / total_turns;
        let fallback_score = (1.0 - fallback_rate).max(0.0);

        QualityScores {
            response_time_score,
            error_score,
            context_efficiency,
            fallback_score,
        }
    }

    /// ≤10 lowercase alphabetic tokens longer than 4 characters, pulled
    /// from every turn's user input (§4.4).
    fn extract_topics(state: &State) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for turn in &state.turns {
            for word in turn.user_text.to_lowercase().split_whitespace() {
                if word.chars().count() > 4 && word.chars().all(|c| c.is_alphabetic()) && !topics.iter().any(|t| t == word) {
                    topics.push(word.to_string());
                }
            }
        }
        topics.truncate(10);
        topics
    }

    pub async fn get_conversation_summary(&self) -> ConversationSummary {
        let state = self.state.lock().await;
        let quality = self.quality_scores(&state).await;
        let total_prompt_tokens = state.metrics.total_prompt_tokens;
        let total_completion_tokens = state.metrics.total_completion_tokens;

        ConversationSummary {
            conversation_id: self.conversation_id.clone(),
            total_turns: state.turns.len() as u64,
            duration_s: (Utc::now() - self.start).num_milliseconds() as f64 / 1000.0,
            start: self.start,
            end: Utc::now(),
            topics: Self::extract_topics(&state),
            overall_score: quality.overall(),
            quality,
            total_prompt_tokens,
            total_completion_tokens,
        }
    }

    pub async fn get_conversation_metrics(&self) -> ConversationMetrics {
        self.state.lock().await.metrics.clone()
    }

    pub async fn get_conversation_history(&self, limit: Option<usize>) -> Vec<ConversationTurn> {
        let state = self.state.lock().await;
        match limit {
            Some(n) => state.turns.iter().rev().take(n).rev().cloned().collect(),
            None => state.turns.clone(),
        }
    }

    pub async fn update_service_latency(&self, service: &str, latency_s: f64) {
        let mut state = self.state.lock().await;
        match service {
            "stt" => state.metrics.stt_latency_s = latency_s,
            "llm" => state.metrics.llm_latency_s = latency_s,
            "tts" => state.metrics.tts_latency_s = latency_s,
            other => tracing::warn!(service = other, "unknown service for latency update"),
        }
    }

    pub async fn record_interruption(&self) {
        let mut state = self.state.lock().await;
        state.metrics.interruption_count += 1;
        tracing::info!(conversation_id = %self.conversation_id, "user interruption recorded");
    }

    pub async fn end_conversation(&self) -> ConversationSummary {
        let summary = self.get_conversation_summary().await;
        tracing::info!(
            conversation_id = %self.conversation_id,
            duration_s = summary.duration_s,
            turns = summary.total_turns,
            "conversation ended"
        );
        summary
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

//! LLM client facade (§4.2): context-aware chat completion, token
//! accounting, context truncation, and deterministic fallback text.

use std::sync::Arc;

use async_trait::async_trait;
use cx_domain::config::LlmConfig;
use cx_domain::error::Result;
use cx_domain::turn::{ConversationContext, Message, Role};
use tokio::sync::mpsc;

use crate::resilience::{ClientMetricsSnapshot, ResilientClient};

/// Token usage reported by a completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub text: String,
    pub token_usage: TokenUsage,
    pub finish_reason: String,
    pub response_time_s: f64,
}

/// The vendor-facing seam: a concrete provider implements this and the
/// facade supplies retry, truncation, and fallback behavior around it.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, messages: &[Message], max_tokens: u32, temperature: f32) -> Result<GenerateResult>;
    async fn stream_chunk(&self, messages: &[Message], max_tokens: u32, temperature: f32) -> Result<mpsc::Receiver<String>>;
    async fn health_check(&self) -> Result<bool>;
}

/// Reason a [`LlmFacade::fallback_response`] is being synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    ApiError,
    RateLimit,
    Timeout,
    ContextOverflow,
    General,
}

pub struct LlmFacade {
    backend: Arc<dyn LlmBackend>,
    resilient: ResilientClient,
    config: LlmConfig,
}

impl LlmFacade {
    pub fn new(backend: Arc<dyn LlmBackend>, config: LlmConfig, retry: cx_domain::config::RetryConfig, breaker: cx_domain::config::BreakerConfig) -> Self {
        Self {
            backend,
            resilient: ResilientClient::new("llm", retry, breaker),
            config,
        }
    }

    pub fn metrics(&self) -> ClientMetricsSnapshot {
        self.resilient.metrics()
    }

    /// Rough 4-chars-per-token approximation (§4.2, §9 design note).
    pub fn estimate_tokens(&self, text: &str) -> u32 {
        (text.chars().count() / 4) as u32
    }

    /// Per-message overhead included, matching the reference
    /// implementation's `calculate_context_tokens`.
    pub fn compute_context_tokens(&self, messages: &[Message]) -> u32 {
        messages
            .iter()
            .map(|m| {
                let role_str = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                self.estimate_tokens(role_str) + self.estimate_tokens(&m.content) + 4
            })
            .sum()
    }

    /// Always retain system messages; keep the most recent user/assistant
    /// messages that fit the budget; insert a synthetic condensed-context
    /// note when older messages are dropped.
    pub fn truncate_context(&self, messages: &[Message], budget: u32) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }

        let system_messages: Vec<Message> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();
        let conversation: Vec<Message> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();

        let system_tokens: u32 = system_messages.iter().map(|m| self.estimate_tokens(&m.content)).sum();
        let available = budget
            .saturating_sub(system_tokens)
            .saturating_sub(self.config.max_response_tokens);

        if available == 0 {
            tracing::warn!("system messages exceed token budget");
            return system_messages;
        }

        let mut kept: Vec<Message> = Vec::new();
        let mut current_tokens: u32 = 0;
        let mut dropped = 0usize;

        for message in conversation.iter().rev() {
            let message_tokens = self.estimate_tokens(&message.content) + 4;
            if current_tokens + message_tokens <= available {
                kept.insert(0, message.clone());
                current_tokens += message_tokens;
            } else {
                dropped = conversation.len() - kept.len();
                break;
            }
        }

        if dropped > 0 {
            let note = Message::system(format!("{} earlier messages condensed", dropped));
            let note_tokens = self.estimate_tokens(&note.content);
            if note_tokens + current_tokens <= available {
                kept.insert(0, note);
            }
        }

        let mut result = system_messages;
        result.extend(kept);
        result
    }

    pub async fn generate(&self, context: &ConversationContext) -> Result<GenerateResult> {
        let mut messages = context.api_view();
        let context_tokens = self.compute_context_tokens(&messages);
        if context_tokens > self.config.max_context_tokens {
            messages = self.truncate_context(&messages, self.config.max_context_tokens);
        }

        let backend = self.backend.clone();
        let max_tokens = self.config.max_response_tokens;
        let temperature = context.temperature;
        self.resilient
            .execute(move |_cid| {
                let backend = backend.clone();
                let messages = messages.clone();
                async move { backend.complete(&messages, max_tokens, temperature).await }
            })
            .await
    }

    /// Streams text chunks; on mid-stream failure falls back to
    /// `generate` and yields its result as a single chunk (§4.2).
    pub async fn stream(&self, context: &ConversationContext) -> Result<mpsc::Receiver<String>> {
        let mut messages = context.api_view();
        let context_tokens = self.compute_context_tokens(&messages);
        if context_tokens > self.config.max_context_tokens {
            messages = self.truncate_context(&messages, self.config.max_context_tokens);
        }

        match self
            .backend
            .stream_chunk(&messages, self.config.max_response_tokens, context.temperature)
            .await
        {
            Ok(rx) => Ok(rx),
            Err(err) => {
                tracing::warn!(error = %err, "streaming failed, falling back to non-streaming generate");
                let result = self.generate(context).await?;
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.send(result.text).await;
                Ok(rx)
            }
        }
    }

    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await.unwrap_or(false)
    }

    /// Deterministic, domain-appropriate apology text. No tokens consumed.
    pub fn fallback_response(&self, kind: FallbackKind) -> GenerateResult {
        let text = match kind {
            FallbackKind::ApiError => {
                "I'm experiencing some technical difficulties right now. Could you please repeat your question?"
            }
            FallbackKind::RateLimit => {
                "I'm processing a lot of requests right now. Please give me a moment and try again."
            }
            FallbackKind::Timeout => {
                "I'm taking longer than usual to respond. Could you please rephrase your question?"
            }
            FallbackKind::ContextOverflow => {
                "We've been talking for a while. Let me summarize what we've discussed so far."
            }
            FallbackKind::General => {
                "I apologize, but I'm having trouble processing your request right now. How can I help you?"
            }
        };
        GenerateResult {
            text: text.to_string(),
            token_usage: TokenUsage::default(),
            finish_reason: "fallback".to_string(),
            response_time_s: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cx_domain::config::{BreakerConfig, RetryConfig};

    struct EchoBackend;

    #[async_trait]
    impl LlmBackend for EchoBackend {
        async fn complete(&self, messages: &[Message], _max_tokens: u32, _temperature: f32) -> Result<GenerateResult> {
            Ok(GenerateResult {
                text: messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                token_usage: TokenUsage::default(),
                finish_reason: "stop".into(),
                response_time_s: 0.01,
            })
        }

        async fn stream_chunk(&self, _messages: &[Message], _max_tokens: u32, _temperature: f32) -> Result<mpsc::Receiver<String>> {
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.send("hi".to_string()).await;
            Ok(rx)
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn facade() -> LlmFacade {
        LlmFacade::new(
            Arc::new(EchoBackend),
            LlmConfig::default(),
            RetryConfig::default(),
            BreakerConfig::default(),
        )
    }

    #[tokio::test]
    async fn generate_echoes_last_message() {
        let f = facade();
        let mut ctx = ConversationContext::new(None, 4096, 0.7);
        ctx.push(Message::user("hello there"));
        let result = f.generate(&ctx).await.unwrap();
        assert_eq!(result.text, "hello there");
    }

    #[test]
    fn truncate_context_keeps_system_and_recent_messages() {
        let f = facade();
        let mut messages = vec![Message::system("be nice")];
        for i in 0..200 {
            messages.push(Message::user(format!("message number {i}")));
        }
        let truncated = f.truncate_context(&messages, 200);
        assert!(truncated.iter().any(|m| m.role == Role::System));
        let total: u32 = f.compute_context_tokens(&truncated);
        assert!(total <= 200);
    }

    #[test]
    fn fallback_response_uses_no_tokens() {
        let f = facade();
        let fb = f.fallback_response(FallbackKind::General);
        assert_eq!(fb.token_usage.total_tokens, 0);
        assert!(!fb.text.is_empty());
    }
}

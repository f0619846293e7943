//! Turn and conversation-context types (§3): `Message`/`Role`,
//! `ConversationContext`, `ConversationTurn`, `ConversationSummary`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message in a [`ConversationContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// The dialogue manager's view into history.
///
/// Invariant: the system prompt, if present, is always at position 0 of
/// [`ConversationContext::api_view`]; the rest stays chronological.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ConversationContext {
    pub fn new(system_prompt: Option<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            messages: Vec::new(),
            system_prompt,
            max_tokens,
            temperature,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The ordered view an LLM facade should see: system prompt first (if
    /// any), then the chronological message list.
    pub fn api_view(&self) -> Vec<Message> {
        let mut view = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            view.push(Message::system(prompt.clone()));
        }
        view.extend(self.messages.iter().cloned());
        view
    }

    /// Replace the working message list with a single summary system
    /// message, keeping the original `system_prompt` slot untouched.
    pub fn replace_with_summary(&mut self, summary_text: impl Into<String>) {
        self.messages = vec![Message::system(format!(
            "Previous conversation summary: {}",
            summary_text.into()
        ))];
    }
}

/// Metadata carried on a [`ConversationTurn`]: per-service latency, token
/// counts, fallback flag, and error string, all keyed informally so new
/// fields don't require a schema bump.
pub type TurnMetadata = HashMap<String, serde_json::Value>;

/// One listen→process→speak cycle. Append-only within a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: String,
    pub user_text: String,
    pub assistant_text: String,
    pub timestamp: DateTime<Utc>,
    pub processing_time_s: f64,
    #[serde(default)]
    pub metadata: TurnMetadata,
}

impl ConversationTurn {
    pub fn new(user_text: impl Into<String>, assistant_text: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            user_text: user_text.into(),
            assistant_text: assistant_text.into(),
            timestamp: Utc::now(),
            processing_time_s: 0.0,
            metadata: TurnMetadata::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.metadata
            .get("fallback")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// The four per-conversation quality scores, each in `[0, 1]` (§4.4, §8
/// invariant 8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct QualityScores {
    pub response_time_score: f64,
    pub error_score: f64,
    pub context_efficiency: f64,
    pub fallback_score: f64,
}

impl QualityScores {
    pub fn overall(&self) -> f64 {
        (self.response_time_score
            + self.error_score
            + self.context_efficiency
            + self.fallback_score)
            / 4.0
    }
}

/// Produced on summarization or call end (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub total_turns: u64,
    pub duration_s: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub topics: Vec<String>,
    pub quality: QualityScores,
    pub overall_score: f64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
}

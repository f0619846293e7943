//! Conversation finite-state machine (§4.3): three states, guarded
//! transitions, history, and a temporary-state scope guard.

use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    Listening,
    Processing,
    Speaking,
}

impl ConversationState {
    fn allowed_targets(self) -> &'static [ConversationState] {
        use ConversationState::*;
        match self {
            Listening => &[Processing, Speaking],
            Processing => &[Speaking, Listening],
            Speaking => &[Listening, Processing],
        }
    }
}

/// `(from, to, timestamp, trigger, metadata)`, appended to an in-memory
/// history on every transition attempt that actually moves the state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: ConversationState,
    pub to_state: ConversationState,
    pub timestamp: DateTime<Utc>,
    pub trigger: String,
    pub forced: bool,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct StateMetrics {
    pub total_transitions: u64,
    pub invalid_transitions: u64,
    pub state_durations: HashMap<ConversationState, f64>,
}

type StateHandler = Box<dyn Fn(ConversationState, &StateTransition) + Send + Sync>;
type TransitionCallback = Box<dyn Fn(&StateTransition) + Send + Sync>;

struct Inner {
    current_state: ConversationState,
    previous_state: Option<ConversationState>,
    history: Vec<StateTransition>,
    metrics: StateMetrics,
    current_state_start: Instant,
    state_handlers: HashMap<ConversationState, Vec<StateHandler>>,
    transition_callbacks: Vec<TransitionCallback>,
}

impl Inner {
    fn new(initial: ConversationState) -> Self {
        let mut handlers = HashMap::new();
        for s in [
            ConversationState::Listening,
            ConversationState::Processing,
            ConversationState::Speaking,
        ] {
            handlers.insert(s, Vec::new());
        }
        Self {
            current_state: initial,
            previous_state: None,
            history: Vec::new(),
            metrics: StateMetrics::default(),
            current_state_start: Instant::now(),
            state_handlers: handlers,
            transition_callbacks: Vec::new(),
        }
    }

    fn record_duration(&mut self) {
        let elapsed = self.current_state_start.elapsed().as_secs_f64();
        *self.metrics.state_durations.entry(self.current_state).or_insert(0.0) += elapsed;
    }
}

/// Serializes transitions for one FSM; held only across the transition
/// itself (state update + handler dispatch), per §5's FSM-lock scope.
pub struct ConversationFsm {
    inner: Mutex<Inner>,
}

impl ConversationFsm {
    pub fn new() -> Self {
        Self::with_initial(ConversationState::Listening)
    }

    pub fn with_initial(initial: ConversationState) -> Self {
        Self {
            inner: Mutex::new(Inner::new(initial)),
        }
    }

    pub async fn current_state(&self) -> ConversationState {
        self.inner.lock().await.current_state
    }

    pub async fn previous_state(&self) -> Option<ConversationState> {
        self.inner.lock().await.previous_state
    }

    pub fn can_transition(from: ConversationState, to: ConversationState) -> bool {
        from.allowed_targets().contains(&to)
    }

    pub async fn add_state_handler<H>(&self, state: ConversationState, handler: H)
    where
        H: Fn(ConversationState, &StateTransition) + Send + Sync + 'static,
    {
        self.inner
            .lock()
            .await
            .state_handlers
            .entry(state)
            .or_default()
            .push(Box::new(handler));
    }

    pub async fn add_transition_callback<C>(&self, callback: C)
    where
        C: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.inner.lock().await.transition_callbacks.push(Box::new(callback));
    }

    /// Validated transition. A self-transition is a no-op and counts as
    /// success without appending to history. Any other disallowed
    /// transition is rejected, counted, and logged; current state is
    /// unchanged.
    pub async fn transition_to(&self, new_state: ConversationState, trigger: &str) -> bool {
        self.transition_to_with_metadata(new_state, trigger, serde_json::Value::Null).await
    }

    pub async fn transition_to_with_metadata(
        &self,
        new_state: ConversationState,
        trigger: &str,
        metadata: serde_json::Value,
    ) -> bool {
        let mut inner = self.inner.lock().await;

        if new_state == inner.current_state {
            tracing::debug!(state = ?new_state, "already in target state, ignoring transition");
            return true;
        }

        if !ConversationFsm::can_transition(inner.current_state, new_state) {
            tracing::warn!(from = ?inner.current_state, to = ?new_state, "invalid transition");
            inner.metrics.invalid_transitions += 1;
            return false;
        }

        self.apply_transition(&mut inner, new_state, trigger, metadata, false);
        true
    }

    /// Bypasses validation. Intended only for error recovery; records
    /// `forced=true` on the transition.
    pub async fn force_transition(&self, new_state: ConversationState, trigger: &str) -> bool {
        let mut inner = self.inner.lock().await;
        tracing::warn!(from = ?inner.current_state, to = ?new_state, trigger, "forcing transition");
        self.apply_transition(&mut inner, new_state, trigger, serde_json::Value::Null, true);
        true
    }

    fn apply_transition(
        &self,
        inner: &mut Inner,
        new_state: ConversationState,
        trigger: &str,
        metadata: serde_json::Value,
        forced: bool,
    ) {
        inner.record_duration();

        let transition = StateTransition {
            from_state: inner.current_state,
            to_state: new_state,
            timestamp: Utc::now(),
            trigger: trigger.to_string(),
            forced,
            metadata,
        };

        inner.previous_state = Some(inner.current_state);
        inner.current_state = new_state;
        inner.current_state_start = Instant::now();
        inner.metrics.total_transitions += 1;
        inner.history.push(transition.clone());

        tracing::info!(
            from = ?transition.from_state,
            to = ?transition.to_state,
            trigger = %transition.trigger,
            forced,
            "state transition"
        );

        for handler in inner.state_handlers.get(&new_state).into_iter().flatten() {
            handler(new_state, &transition);
        }
        for callback in &inner.transition_callbacks {
            callback(&transition);
        }
    }

    pub async fn history(&self, limit: Option<usize>) -> Vec<StateTransition> {
        let inner = self.inner.lock().await;
        match limit {
            Some(n) => inner.history.iter().rev().take(n).rev().cloned().collect(),
            None => inner.history.clone(),
        }
    }

    pub async fn metrics(&self) -> StateMetrics {
        self.inner.lock().await.metrics.clone()
    }

    pub async fn reset(&self, initial_state: ConversationState) {
        let mut inner = self.inner.lock().await;
        inner.record_duration();
        inner.current_state = initial_state;
        inner.previous_state = None;
        inner.history.clear();
        inner.metrics = StateMetrics::default();
        inner.current_state_start = Instant::now();
    }

    /// Enters `temp_state` for the lifetime of `body`, deterministically
    /// returning to the prior state on exit. If entry fails (invalid
    /// transition), `body` still runs in the original state and no
    /// return transition is issued (Open Question resolution #4).
    pub async fn temporary_state<F, Fut, T>(&self, temp_state: ConversationState, trigger: &str, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let original = self.current_state().await;
        if self.transition_to(temp_state, trigger).await {
            let result = body().await;
            self.transition_to(original, &format!("return_from_{trigger}")).await;
            result
        } else {
            tracing::warn!(target = ?temp_state, "failed to enter temporary state");
            body().await
        }
    }
}

impl Default for ConversationFsm {
    fn default() -> Self {
        Self::new()
    }
}

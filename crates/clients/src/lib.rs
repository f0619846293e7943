pub mod llm;
pub mod resilience;
pub mod stt;
pub mod tts;

pub use llm::{FallbackKind, GenerateResult, LlmBackend, LlmFacade, TokenUsage};
pub use resilience::{BreakerState, CircuitBreaker, ClientMetrics, ClientMetricsSnapshot, ResilientClient};
pub use stt::{SttBackend, SttFacade, TranscriptionResult};
pub use tts::{SynthesisResult, TtsBackend, TtsFacade};

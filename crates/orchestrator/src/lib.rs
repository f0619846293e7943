pub mod health;
pub mod orchestrator;
pub mod pipeline;
pub mod session_lock;

pub use health::{HealthObserver, HealthSnapshot};
pub use orchestrator::CallOrchestrator;
pub use pipeline::{AudioSink, CallState};
pub use session_lock::CallLockMap;

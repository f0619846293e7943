pub mod call;
pub mod config;
pub mod error;
pub mod turn;
pub mod voice;

pub use call::{AggregateMetrics, CallContext, CallMetrics, RejectionReason};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use turn::{ConversationContext, ConversationSummary, ConversationTurn, Message, QualityScores, Role};
pub use voice::{AudioContainer, AudioFormat, Voice};

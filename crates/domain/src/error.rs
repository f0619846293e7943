//! Shared error taxonomy (§7 of the design).
//!
//! Every crate in this workspace returns `cx_domain::error::Result<T>`.
//! Variants map onto the failure kinds the call orchestrator must tell
//! apart: what gets retried, what gets substituted with a fallback, and
//! what ends the call.

/// A kind an upstream or local failure falls into, independent of which
/// subsystem raised it. Used by callers that need to branch on failure
/// category without matching on [`Error`] variants directly (e.g. the
/// dialogue manager deciding whether to retry or fall back).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected locally before any upstream call was attempted.
    InvalidInput,
    /// Network or 5xx-equivalent failure; safe to retry.
    Transient,
    /// Retries were consumed without success.
    Exhausted,
    /// The circuit breaker refused the call outright.
    BreakerOpen,
    /// An admission limit (room/participant/concurrent-call cap) was hit.
    Policy,
    /// Unrecoverable invariant violation.
    Fatal,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream transient failure in {service}: {message}")]
    Transient { service: String, message: String },

    #[error("upstream exhausted in {service} after {attempts} attempts: {message}")]
    Exhausted {
        service: String,
        attempts: u32,
        message: String,
    },

    #[error("circuit breaker open for {service}")]
    BreakerOpen { service: String },

    #[error("admission rejected: {reason}")]
    Policy { reason: String },

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Transient { .. } | Error::Timeout(_) => ErrorKind::Transient,
            Error::Exhausted { .. } => ErrorKind::Exhausted,
            Error::BreakerOpen { .. } => ErrorKind::BreakerOpen,
            Error::Policy { .. } => ErrorKind::Policy,
            Error::Fatal(_) => ErrorKind::Fatal,
            Error::Other(_) => ErrorKind::Fatal,
        }
    }

    /// Whether this error should be treated the same as an exhausted
    /// retry budget by the dialogue path (§7 propagation policy:
    /// BreakerOpen is handled identically to UpstreamExhausted).
    pub fn is_exhausted_like(&self) -> bool {
        matches!(self.kind(), ErrorKind::Exhausted | ErrorKind::BreakerOpen)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

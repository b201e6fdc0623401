use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Terminal outcomes surfaced to governor callers.
///
/// The type is `Clone` because a single in-flight failure is delivered to
/// every caller coalesced onto the same query.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GovernorError {
    #[error("upstream kept throttling after {attempts} attempts; retry in {retry_after:?}")]
    ThrottledExceeded { retry_after: Duration, attempts: u32 },

    #[error("upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("upstream unreachable: {message}")]
    Transport { message: String },

    #[error("upstream request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("request was cancelled before it executed")]
    Cancelled,

    /// The task panicked before producing a result.
    #[error("upstream task failed: {message}")]
    TaskFailed { message: String },

    #[error("malformed upstream response: {message}")]
    MalformedResponse { message: String },

    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl GovernorError {
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn task_failed(message: impl Into<String>) -> Self {
        Self::TaskFailed {
            message: message.into(),
        }
    }

    /// Wraps a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| String::from("task panicked"));
        Self::task_failed(message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True when the upstream quota, not connectivity, is the cause.
    pub const fn is_throttled(&self) -> bool {
        matches!(self, Self::ThrottledExceeded { .. })
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::ThrottledExceeded { .. } => "governor.throttled_exceeded",
            Self::Upstream { .. } => "governor.upstream",
            Self::Transport { .. } => "governor.transport",
            Self::Timeout { .. } => "governor.timeout",
            Self::Cancelled => "governor.cancelled",
            Self::TaskFailed { .. } => "governor.task_failed",
            Self::MalformedResponse { .. } => "governor.malformed_response",
            Self::InvalidQuery { .. } => "governor.invalid_query",
            Self::Config { .. } => "governor.config",
        }
    }
}

pub type GovernorResult<T> = Result<T, GovernorError>;

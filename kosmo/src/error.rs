//! Error types for the kosmo runtime.
//!
//! [`CoreError`] is the top-level error returned from the public surface.
//! Each variant maps to a stable error-kind string (see [`CoreError::kind`])
//! which is the value carried by `monitor:error` events, so bridges can
//! classify failures without parsing messages. Subsystems with richer
//! failure taxonomies ([`ToolError`], [`ProviderError`], [`StoreError`])
//! convert into `CoreError` via `From`.

use std::time::Duration;

use thiserror::Error;

/// A type alias defaulting the error to [`CoreError`].
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// The main error type for agent operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Invalid configuration, rejected at creation time.
    #[error("configuration error: {0}")]
    Config(String),

    /// The LLM provider failed after the facade exhausted its retries.
    #[error(transparent)]
    Provider(ProviderError),

    /// A tool reported an error.
    #[error(transparent)]
    Tool(ToolError),

    /// A tool or provider deadline elapsed.
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The permission inspector denied a tool call.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A tool call named a tool that is not registered.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// A turn exceeded its iteration bound.
    #[error("iteration limit reached after {steps} steps (max {max_steps})")]
    IterationLimit {
        /// Steps taken before the limit tripped.
        steps: u32,
        /// The configured per-turn maximum.
        max_steps: u32,
    },

    /// The persistence layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The agent has been closed and accepts no further input.
    #[error("agent is closed")]
    Closed,

    /// An invariant was violated inside the runtime.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Create a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The stable kind tag for this error, as carried by `monitor:error`
    /// events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Provider(_) => "provider",
            Self::Tool(_) => "tool",
            Self::Timeout(_) => "timeout",
            Self::Cancelled | Self::Closed => "cancelled",
            Self::PermissionDenied(_) => "permission-denied",
            Self::UnknownTool(_) => "unknown-tool",
            Self::IterationLimit { .. } => "iteration-limit",
            Self::Store(_) => "store",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<ProviderError> for CoreError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout(d) => {
                Self::Timeout(format!("provider call exceeded {}ms", d.as_millis()))
            }
            other => Self::Provider(other),
        }
    }
}

impl From<ToolError> for CoreError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound(name) => Self::UnknownTool(name),
            ToolError::Timeout(d) => {
                Self::Timeout(format!("tool call exceeded {}ms", d.as_millis()))
            }
            ToolError::Cancelled => Self::Cancelled,
            other => Self::Tool(other),
        }
    }
}

/// Errors reported by tool resolution and execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// No tool with the requested name is registered.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The arguments could not be deserialized into the tool's input type.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and reported a failure.
    #[error("{0}")]
    Execution(String),

    /// The tool did not complete within its deadline.
    #[error("tool timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The tool observed cancellation and returned early.
    #[error("tool cancelled")]
    Cancelled,
}

impl ToolError {
    /// Create an execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}

/// Errors surfaced by LLM providers.
///
/// The facade uses [`ProviderError::is_transient`] to decide whether a
/// failure is worth retrying.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// Connection-level failure (DNS, TLS, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The vendor asked us to back off.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The vendor returned a server-side failure.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP-style status code.
        status: u16,
        /// Vendor-supplied message.
        message: String,
    },

    /// The request was rejected as malformed or unauthorized.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider does not support the requested operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The vendor response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The call did not complete within its deadline.
    #[error("provider timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl ProviderError {
    /// Whether the facade should retry this failure.
    ///
    /// Transport errors, rate limits, 5xx responses, and timeouts are
    /// transient; everything else surfaces immediately.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited(_) | Self::Timeout(_) => true,
            Self::Server { status, .. } => *status >= 500,
            Self::InvalidRequest(_) | Self::Unsupported(_) | Self::Malformed(_) => false,
        }
    }
}

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A retryable backend failure.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// A permanent backend failure.
    #[error("store failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the caller should retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether this is a missing-record error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(CoreError::config("x").kind(), "config");
        assert_eq!(
            CoreError::from(ToolError::execution("boom")).kind(),
            "tool"
        );
        assert_eq!(
            CoreError::from(ToolError::NotFound("x".into())).kind(),
            "unknown-tool"
        );
        assert_eq!(
            CoreError::from(ToolError::Timeout(Duration::from_secs(1))).kind(),
            "timeout"
        );
        assert_eq!(
            CoreError::IterationLimit {
                steps: 3,
                max_steps: 3
            }
            .kind(),
            "iteration-limit"
        );
    }

    #[test]
    fn provider_timeout_maps_to_timeout_kind() {
        let err = CoreError::from(ProviderError::Timeout(Duration::from_secs(2)));
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Transport("reset".into()).is_transient());
        assert!(
            ProviderError::Server {
                status: 503,
                message: "overloaded".into()
            }
            .is_transient()
        );
        assert!(
            !ProviderError::Server {
                status: 400,
                message: "bad".into()
            }
            .is_transient()
        );
        assert!(!ProviderError::InvalidRequest("bad".into()).is_transient());
        assert!(StoreError::Transient("io".into()).is_transient());
        assert!(StoreError::NotFound("a".into()).is_not_found());
    }
}

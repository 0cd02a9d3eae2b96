//! Failure taxonomy for [`super::ChatProvider`] implementations (spec §4.6).

use thiserror::Error;

/// Errors a model-provider adapter can surface. `RateLimited` and `Transient`
/// are retryable by the turn loop controller (spec §4.6 "Cancellation" /
/// `is_retryable`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum LlmError {
    /// Authentication or authorization failure with the provider.
    #[error("[{provider}] authentication error: {message}")]
    AuthError {
        /// Provider name (e.g. "openai", "anthropic").
        provider: String,
        /// Error description.
        message: String,
    },

    /// The provider's rate limit was exceeded.
    #[error("[{provider}] rate limited")]
    RateLimited {
        /// Provider name.
        provider: String,
    },

    /// A transient failure (network blip, 5xx) eligible for retry.
    #[error("[{provider}] transient error: {message}")]
    Transient {
        /// Provider name.
        provider: String,
        /// Error description.
        message: String,
    },

    /// The request was malformed or rejected for non-transient reasons.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The assembled prompt exceeded the model's context window.
    #[error("context length exceeded: used {used}, max {max}")]
    ContextLengthExceeded {
        /// Tokens used.
        used: u32,
        /// Maximum supported.
        max: u32,
    },

    /// Anything that doesn't fit the other variants.
    #[error("unknown model error: {0}")]
    Unknown(String),
}

impl LlmError {
    /// Whether the turn loop controller may retry this error under the
    /// exponential-backoff policy.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }
}

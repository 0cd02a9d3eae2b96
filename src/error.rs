//! Run-level error taxonomy for the agent engine.
//!
//! [`AgentError`] is the top-level error surfaced from [`crate::agent::Agent`]
//! operations. It wraps the component-specific error types ([`crate::model::LlmError`],
//! [`crate::tool::ToolError`], [`crate::state::store::StateStoreError`]) and adds
//! the run-level failure modes from the specification's error-handling design
//! (cancellation, budget exhaustion, loop detection, configuration).

use thiserror::Error;

use crate::model::LlmError;
use crate::state::store::StateStoreError;
use crate::tool::ToolError;

/// A type alias for `Result<T, AgentError>`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Top-level error for agent runs.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The run was cancelled by the caller.
    #[error("run cancelled")]
    Cancelled,

    /// `max_turns` was reached without a final answer.
    #[error("reached maximum turns ({turns}/{max_turns})")]
    MaxTurns {
        /// Turns completed.
        turns: usize,
        /// Configured cap.
        max_turns: usize,
    },

    /// The whole-run wall clock budget (`run_timeout`) elapsed.
    #[error("run timed out after {elapsed_ms}ms (budget {budget_ms}ms)")]
    RunTimeout {
        /// Milliseconds elapsed before timeout fired.
        elapsed_ms: u64,
        /// Configured budget.
        budget_ms: u64,
    },

    /// The loop detector (C4) fired.
    #[error("loop detected: {kind}")]
    LoopDetected {
        /// Human-readable description of which heuristic fired.
        kind: String,
    },

    /// The model call failed and retries were exhausted.
    #[error("llm call failed: {0}")]
    LlmFailed(#[from] LlmError),

    /// The state store failed to persist the run and internal retries were exhausted.
    #[error("state store failed: {0}")]
    StateStoreFailed(#[from] StateStoreError),

    /// The agent or run configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A concurrent `Run` for the same `agent_id` is already in progress.
    #[error("agent '{0}' already has a run in progress")]
    AlreadyRunning(String),

    /// A tool-level error escaped the turn loop's recoverable-error handling.
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// Anything else; should be rare.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Create a max-turns error.
    #[must_use]
    pub const fn max_turns(turns: usize, max_turns: usize) -> Self {
        Self::MaxTurns { turns, max_turns }
    }

    /// Create a run-timeout error.
    #[must_use]
    pub const fn run_timeout(elapsed_ms: u64, budget_ms: u64) -> Self {
        Self::RunTimeout {
            elapsed_ms,
            budget_ms,
        }
    }

    /// Create a loop-detected error.
    #[must_use]
    pub fn loop_detected(kind: impl Into<String>) -> Self {
        Self::LoopDetected { kind: kind.into() }
    }

    /// Create an invalid-configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The stable string recorded in [`crate::agent::RunResult::error`], matching
    /// the spec's `{cancelled, max_turns, run_timeout, loop_detected, llm_failed,
    /// state_store_failed, invalid_configuration, internal}` vocabulary.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::MaxTurns { .. } => "max_turns",
            Self::RunTimeout { .. } => "run_timeout",
            Self::LoopDetected { .. } => "loop_detected",
            Self::LlmFailed(_) => "llm_failed",
            Self::StateStoreFailed(_) => "state_store_failed",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::AlreadyRunning(_) => "already_running",
            Self::Tool(_) => "internal",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether this error is eligible for the retry policy (transient model/tool
    /// failures only; see spec §7 "Propagation policy").
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LlmFailed(e) if e.is_retryable())
    }
}

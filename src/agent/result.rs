//! Outcome types for [`super::Agent::run`] / [`super::Agent::step`] (spec §4.1).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which state the turn loop was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// The model produced a final answer.
    EmitFinal,
    /// `max_turns` was reached without a final answer.
    MaxTurns,
    /// The whole-run wall-clock budget elapsed.
    RunTimeout,
    /// The caller cancelled the run.
    Cancelled,
    /// The loop detector (C4) fired.
    LoopDetected,
    /// The model call failed and retries were exhausted.
    LlmFailed,
    /// The state store failed to persist a turn.
    StateStoreFailed,
    /// Anything else; should be rare.
    Internal,
}

/// The outcome of a full [`super::Agent::run`] call. Never itself an `Err`
/// for ordinary run-time failures — those are reported here via `error` and
/// `terminal_state`; [`crate::error::AgentError`] is reserved for failures
/// detected before the run even starts (bad configuration, a concurrent run
/// already in progress).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Whether the run ended with a final answer.
    pub succeeded: bool,
    /// The final answer, if `succeeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
    /// A stable error kind string (see [`crate::error::AgentError::kind`]), if not `succeeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Total turns recorded against this agent's state, across its whole history.
    pub total_turns: usize,
    /// Which state the loop was in when it stopped.
    pub terminal_state: TerminalState,
}

/// The outcome of one [`super::Agent::step`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Whether the caller should invoke `step` again (no final answer yet).
    pub should_continue: bool,
    /// How many tool calls were dispatched this turn.
    pub executed_tool_count: usize,
    /// The final answer, if this turn produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
    /// A recoverable error recorded against this turn, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

//! The agent state model (spec §3): `AgentState`, `Turn`, and the types that
//! make up a turn's model message and tool execution results.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::reasoning::chain::ReasoningChain;

/// Current on-disk schema version for [`AgentState`]. Bumped whenever a
/// breaking change is made to the persisted layout; see [`store::StateStore`].
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// The full, caller-opaque state of one agent across its lifetime of runs.
///
/// `agent_id` is the caller-chosen key under which this state is persisted.
/// `goal` is frozen after the first turn is recorded (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Caller-chosen identifier.
    pub agent_id: String,
    /// The goal this agent is pursuing. Frozen after turn 0.
    pub goal: String,
    /// Ordered, contiguous turn history.
    pub turns: Vec<Turn>,
    /// In-progress Chain-of-Thought reasoning, if `ReasoningType::ChainOfThought`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_reasoning_chain: Option<ReasoningChain>,
    /// Bounded ring of recent tool calls, consulted by the loop detector.
    #[serde(default)]
    pub tool_call_history: Vec<ToolCallHistoryEntry>,
    /// Summary standing in for turns elided by the history compactor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Schema version this record was written with.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

const fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

impl AgentState {
    /// Create fresh state for a new run.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            goal: goal.into(),
            turns: Vec::new(),
            current_reasoning_chain: None,
            tool_call_history: Vec::new(),
            summary: None,
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }

    /// The next contiguous turn index (invariant: indices are `0..n`).
    #[must_use]
    pub fn next_turn_index(&self) -> usize {
        self.turns.len()
    }

    /// The last recorded turn, if any.
    #[must_use]
    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Whether the last turn is terminal (carries a `final_output`).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.last_turn()
            .is_some_and(|t| t.model_message.final_output.is_some())
    }

    /// Append a completed turn, enforcing the contiguous-index invariant.
    pub fn push_turn(&mut self, turn: Turn) {
        debug_assert_eq!(turn.index, self.turns.len(), "turn indices must be contiguous");
        self.turns.push(turn);
    }

    /// Push a bounded history entry, evicting the oldest when over capacity.
    pub fn record_tool_call(&mut self, entry: ToolCallHistoryEntry, capacity: usize) {
        self.tool_call_history.push(entry);
        while self.tool_call_history.len() > capacity {
            self.tool_call_history.remove(0);
        }
    }
}

/// A single turn: one model-call-plus-tool-batch cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Zero-based, contiguous turn index.
    pub index: usize,
    /// The parsed model message for this turn.
    pub model_message: ModelMessage,
    /// Tool results, ordered to match `model_message.tool_calls`, not completion order.
    #[serde(default)]
    pub tool_execution_results: Vec<ToolExecutionResult>,
    /// When this turn began (prompt construction started).
    pub started_at: DateTime<Utc>,
    /// When this turn completed, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Recoverable error recorded against this turn, if any (parse failure, etc).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Turn {
    /// Start a new, in-progress turn.
    #[must_use]
    pub fn start(index: usize) -> Self {
        Self {
            index,
            model_message: ModelMessage::default(),
            tool_execution_results: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Mark the turn complete.
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// A turn is final iff it carries a `final_output`.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.model_message.final_output.is_some()
    }
}

/// The parsed reasoning artifact for a turn (spec §3 `ModelMessage`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelMessage {
    /// Free-text thoughts (may be empty).
    #[serde(default)]
    pub thoughts: String,
    /// The final answer, if the model proposed one this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Value>,
    /// Requested tool calls, if any. Discarded (with a warning) if `final_output`
    /// is also present — spec §4.1 "`finalOutput` wins".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// A single reasoning step produced this turn, for CoT/ToT bookkeeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_step: Option<crate::reasoning::chain::ReasoningStep>,
}

impl ModelMessage {
    /// Resolve the "active decision" per spec §3: `final_output` wins over tool calls.
    #[must_use]
    pub fn active_tool_calls(&self) -> Option<&[ToolCallRequest]> {
        if self.final_output.is_some() {
            return None;
        }
        self.tool_calls.as_deref().filter(|c| !c.is_empty())
    }
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Name of the tool to invoke; must resolve in the registry.
    pub tool_name: String,
    /// Ordered argument mapping (JSON object).
    pub arguments: Map<String, Value>,
    /// Client-supplied call id, used to correlate results and tool-role messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl ToolCallRequest {
    /// Create a new tool call request, generating a call id if none is given.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            call_id: None,
        }
    }

    /// The id to correlate this call's result by, generating one if absent.
    #[must_use]
    pub fn id(&self) -> String {
        self.call_id
            .clone()
            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()))
    }
}

/// Classification of a tool's execution outcome (spec §3 `ToolExecutionResult`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The tool ran and returned a value.
    Success {
        /// The tool's JSON output.
        output: Value,
    },
    /// Argument validation failed before the tool body ran.
    ValidationFailure {
        /// Required fields that were absent.
        missing_fields: Vec<String>,
        /// Fields present but of the wrong type.
        type_errors: Vec<String>,
    },
    /// The invocation exceeded its timeout and was cancelled.
    Timeout,
    /// The tool body raised an error.
    ExecutionError {
        /// Human-readable error message.
        message: String,
        /// Error classification (transient/permanent/argument).
        classification: crate::tool::ErrorClass,
    },
    /// Served from the dedupe cache without invoking the tool.
    CacheHit {
        /// The cached output.
        output: Value,
        /// How long ago the cached result was stored, in milliseconds.
        age_ms: u64,
    },
}

impl ToolOutcome {
    /// Whether this outcome represents a successful (possibly cached) call.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::CacheHit { .. })
    }

    /// The output value, for `Success` and `CacheHit` outcomes.
    #[must_use]
    pub const fn output(&self) -> Option<&Value> {
        match self {
            Self::Success { output } | Self::CacheHit { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// A tool execution result attached to a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// The call id this result answers.
    pub call_id: String,
    /// Name of the tool that was (or would have been) invoked.
    pub tool_name: String,
    /// A stable fingerprint of the canonicalized input, for diagnostics.
    pub input_fingerprint: String,
    /// The outcome.
    pub outcome: ToolOutcome,
    /// Wall-clock time spent on this call, in milliseconds.
    pub elapsed_ms: u64,
    /// When this call started.
    pub started_at: DateTime<Utc>,
}

/// An entry in the bounded loop-detection ring (spec §3 `ToolCallHistoryEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallHistoryEntry {
    /// Tool name.
    pub tool_name: String,
    /// Canonical-args hash, shared with the dedupe cache's key.
    pub args_hash: u64,
    /// Coarse outcome class, used by the loop detector.
    pub outcome_class: ToolOutcomeClass,
    /// When the call completed.
    pub timestamp: DateTime<Utc>,
}

/// Coarse classification of a tool outcome, used by the loop detector
/// (finer-grained than [`ToolOutcome`], which the detector doesn't need).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolOutcomeClass {
    /// Succeeded (fresh or cache hit).
    Success,
    /// Failed (validation, timeout, or execution error).
    Failure,
}

impl From<&ToolOutcome> for ToolOutcomeClass {
    fn from(outcome: &ToolOutcome) -> Self {
        if outcome.is_success() {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

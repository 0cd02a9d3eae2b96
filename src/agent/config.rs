//! Agent configuration: every tunable from spec §6's option table, grounded
//! on the teacher's `AgentConfig` (plain struct, `DEFAULT_*` constants, a
//! `const fn new()`).

use std::time::Duration;

use crate::compactor::SummarizationMode;
use crate::reasoning::tree::ExplorationStrategy;
use crate::reasoning::ReasoningType;

/// Full configuration for one [`super::Agent`]. Every field has a sensible
/// default via [`AgentConfig::new`] / [`Default`]; callers typically start
/// from `AgentConfig::new()` and override only what they need via
/// [`super::AgentBuilder`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hard cap on turns per run; exceeding it surfaces `error="max_turns"`.
    pub max_turns: usize,
    /// Above this many retained turns, older ones are folded into a summary.
    pub max_recent_turns: usize,
    /// Per-model-call cancellation budget.
    pub llm_timeout: Duration,
    /// Default per-tool-call cancellation budget (overridable per call).
    pub tool_timeout: Duration,
    /// Whole-run wall-clock cap.
    pub run_timeout: Duration,
    /// Maximum retry attempts for transient model/tool errors.
    pub max_retries: u32,
    /// Initial backoff delay before the first retry.
    pub initial_retry_delay: Duration,
    /// Ceiling on backoff delay growth.
    pub max_retry_delay: Duration,
    /// Whether the history compactor (C10) runs at all.
    pub enable_history_summarization: bool,
    /// Which summarization strategy C10 uses when enabled.
    pub summarization_mode: SummarizationMode,
    /// Cap on a rendered tool output's length, in characters.
    pub max_tool_output_size: usize,
    /// Cap on a turn's rendered thoughts, in characters.
    pub max_thoughts_length: usize,
    /// Cap on a turn's rendered final answer, in characters.
    pub max_final_length: usize,
    /// Cap on the rendered history summary, in characters.
    pub max_summary_length: usize,
    /// Consecutive tool-call failures that trip the loop detector.
    pub consecutive_failure_threshold: usize,
    /// Size of the bounded ring the loop detector inspects.
    pub max_tool_call_history: usize,
    /// Default TTL a dedupe cache entry is considered fresh for.
    pub dedupe_staleness_threshold: Duration,
    /// Maximum resident entries in the dedupe cache.
    pub dedupe_max_entries: usize,
    /// Prefer the provider's native function-calling path when supported.
    pub use_function_calling: bool,
    /// If the loaded state's last turn is already terminal for the same
    /// goal, `Agent::run` returns that result immediately with zero model
    /// calls instead of re-running.
    pub memoize_terminal_results: bool,
    /// Emit `StatusUpdate` events.
    pub emit_public_status: bool,
    /// Which reasoning strategy precedes tool-call parsing each turn.
    pub reasoning_type: ReasoningType,
    /// Chain-of-Thought: max steps before forcing termination.
    pub max_reasoning_steps: usize,
    /// Chain-of-Thought: confidence required to accept a proposed final answer early.
    pub confidence_threshold: f64,
    /// Chain-of-Thought: re-ask the model to critique each step before accepting it.
    pub enable_reasoning_validation: bool,
    /// Tree-of-Thoughts: maximum search depth.
    pub max_depth: usize,
    /// Tree-of-Thoughts: maximum children requested per expansion.
    pub max_branching: usize,
    /// Tree-of-Thoughts: beam width for [`ExplorationStrategy::BeamSearch`].
    pub beam_width: usize,
    /// Tree-of-Thoughts: frontier exploration order.
    pub exploration_strategy: ExplorationStrategy,
    /// Tree-of-Thoughts: score at/above which a node is accepted as final.
    pub acceptance_threshold: f64,
    /// Upper bound on concurrently in-flight tool calls within one turn.
    pub max_parallel_tools: usize,
    /// Passed through to the model provider on every call.
    pub max_tokens: Option<u32>,
    /// Passed through to the model provider on every call.
    pub temperature: Option<f32>,
    /// Passed through to the model provider on every call.
    pub top_p: Option<f32>,
}

impl AgentConfig {
    /// Default cap on turns per run.
    pub const DEFAULT_MAX_TURNS: usize = 20;
    /// Default retained-turn threshold before summarization kicks in.
    pub const DEFAULT_MAX_RECENT_TURNS: usize = 20;

    /// A config with every field at its documented default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_turns: Self::DEFAULT_MAX_TURNS,
            max_recent_turns: Self::DEFAULT_MAX_RECENT_TURNS,
            llm_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(600),
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(250),
            max_retry_delay: Duration::from_secs(10),
            enable_history_summarization: true,
            summarization_mode: SummarizationMode::default(),
            max_tool_output_size: 4000,
            max_thoughts_length: 2000,
            max_final_length: 4000,
            max_summary_length: 2000,
            consecutive_failure_threshold: 3,
            max_tool_call_history: 50,
            dedupe_staleness_threshold: Duration::from_secs(300),
            dedupe_max_entries: 1000,
            use_function_calling: true,
            memoize_terminal_results: true,
            emit_public_status: false,
            reasoning_type: ReasoningType::None,
            max_reasoning_steps: 10,
            confidence_threshold: 0.85,
            enable_reasoning_validation: false,
            max_depth: 5,
            max_branching: 3,
            beam_width: 3,
            exploration_strategy: ExplorationStrategy::BestFirst,
            acceptance_threshold: 0.9,
            max_parallel_tools: 4,
            max_tokens: None,
            temperature: None,
            top_p: None,
        }
    }

    /// Validate fields that would otherwise fail confusingly deep inside a run.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.max_turns == 0 {
            return Err("max_turns must be at least 1".to_owned());
        }
        if self.max_parallel_tools == 0 {
            return Err("max_parallel_tools must be at least 1".to_owned());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err("confidence_threshold must be in [0, 1]".to_owned());
        }
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err("acceptance_threshold must be in [0, 1]".to_owned());
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

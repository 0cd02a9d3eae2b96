//! History Compactor (C10): once `turns.len() > max_recent_turns`, folds the
//! turns above that bound into a single bounded-length summary so the prompt
//! builder can drop them without losing their gist. The authoritative
//! [`crate::state::AgentState`] always retains full history — only prompt
//! construction ever sees the summary in place of the elided turns
//! (spec §4.10).

use tracing::{debug, instrument};

use crate::cancel::CancelToken;
use crate::message::Message;
use crate::model::{ChatOptions, ChatProvider, LlmError};
use crate::state::{AgentState, Turn};

/// How the compactor produces its summary text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummarizationMode {
    /// Render the elided turns with a fixed, non-LLM textualizer. Cheap,
    /// deterministic, and the default — no model round-trip on every turn.
    #[default]
    Deterministic,
    /// Ask the model itself to compress the elided turns.
    Model,
}

/// Tunables for [`maybe_compact`].
#[derive(Debug, Clone, Copy)]
pub struct CompactorConfig {
    /// Turns beyond this count (from the start) are eligible for elision.
    pub max_recent_turns: usize,
    /// Hard cap, in characters, on the produced summary.
    pub max_summary_length: usize,
    /// Which summarization strategy to use.
    pub mode: SummarizationMode,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            max_recent_turns: 20,
            max_summary_length: 2000,
            mode: SummarizationMode::default(),
        }
    }
}

/// Truncate `text` to at most `max_len` characters, appending an explicit
/// elision marker when truncation occurred. Character-boundary safe.
#[must_use]
pub fn truncate_with_marker(text: &str, max_len: usize) -> String {
    const MARKER: &str = " …[truncated]";
    if text.chars().count() <= max_len {
        return text.to_owned();
    }
    let budget = max_len.saturating_sub(MARKER.chars().count());
    let mut truncated: String = text.chars().take(budget).collect();
    truncated.push_str(MARKER);
    truncated
}

fn textualize_turn(turn: &Turn) -> String {
    let mut rendered = format!("Turn {}: ", turn.index);
    if !turn.model_message.thoughts.is_empty() {
        rendered.push_str(turn.model_message.thoughts.trim());
    }
    if let Some(final_output) = &turn.model_message.final_output {
        rendered.push_str(&format!(" [final: {final_output}]"));
    }
    for result in &turn.tool_execution_results {
        let outcome = if result.outcome.is_success() { "ok" } else { "failed" };
        rendered.push_str(&format!(" [tool {}: {outcome}]", result.tool_name));
    }
    rendered
}

fn deterministic_summary(elided: &[Turn], max_summary_length: usize) -> String {
    let rendered = elided.iter().map(textualize_turn).collect::<Vec<_>>().join("\n");
    truncate_with_marker(&rendered, max_summary_length)
}

async fn model_summary(
    provider: &dyn ChatProvider,
    elided: &[Turn],
    max_summary_length: usize,
    cancel: &CancelToken,
) -> Result<String, LlmError> {
    let source = elided.iter().map(textualize_turn).collect::<Vec<_>>().join("\n");
    let messages = vec![
        Message::system(format!(
            "Summarize the following agent turn history in at most {max_summary_length} characters. \
             Preserve facts and outcomes; omit scaffolding."
        )),
        Message::user(source),
    ];
    let response = provider.generate(messages, ChatOptions::default()).await?;
    if cancel.is_cancelled() {
        return Err(LlmError::Transient {
            provider: provider.model_id().to_owned(),
            message: "cancelled during summarization".to_owned(),
        });
    }
    Ok(truncate_with_marker(&response.message.content, max_summary_length))
}

/// Recompute and store `state.summary` if more than `max_recent_turns` turns
/// have accumulated. Returns whether compaction ran.
///
/// The summary is rebuilt from scratch over every currently-elided turn each
/// time this runs, rather than incrementally extended — simpler and
/// stateless at the cost of re-rendering turns already summarized before.
#[instrument(skip(provider, state, cancel), fields(agent_id = %state.agent_id))]
pub async fn maybe_compact(
    provider: Option<&dyn ChatProvider>,
    state: &mut AgentState,
    config: &CompactorConfig,
    cancel: &CancelToken,
) -> Result<bool, LlmError> {
    let elided_count = state.turns.len().saturating_sub(config.max_recent_turns);
    if elided_count == 0 {
        return Ok(false);
    }
    let elided = &state.turns[..elided_count];

    let summary = match (config.mode, provider) {
        (SummarizationMode::Model, Some(provider)) => {
            match model_summary(provider, elided, config.max_summary_length, cancel).await {
                Ok(summary) => summary,
                Err(err) => {
                    debug!(error = %err, "model-based summarization failed, falling back to deterministic");
                    deterministic_summary(elided, config.max_summary_length)
                }
            }
        }
        _ => deterministic_summary(elided, config.max_summary_length),
    };

    state.summary = Some(summary);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_state_with_turns(n: usize) -> AgentState {
        let mut state = AgentState::new("agent-1", "test goal");
        for i in 0..n {
            let mut turn = Turn::start(i);
            turn.model_message.thoughts = format!("thinking about step {i}");
            state.push_turn(turn);
        }
        state
    }

    #[test]
    fn truncate_appends_marker_only_when_needed() {
        assert_eq!(truncate_with_marker("short", 100), "short");
        let long = "a".repeat(50);
        let truncated = truncate_with_marker(&long, 10);
        assert!(truncated.len() < long.len());
        assert!(truncated.contains("truncated"));
    }

    #[tokio::test]
    async fn no_compaction_below_threshold() {
        let mut state = agent_state_with_turns(5);
        let config = CompactorConfig {
            max_recent_turns: 10,
            ..CompactorConfig::default()
        };
        let ran = maybe_compact(None, &mut state, &config, &CancelToken::never())
            .await
            .unwrap();
        assert!(!ran);
        assert!(state.summary.is_none());
    }

    #[tokio::test]
    async fn compacts_deterministically_above_threshold() {
        let mut state = agent_state_with_turns(15);
        let config = CompactorConfig {
            max_recent_turns: 10,
            max_summary_length: 500,
            mode: SummarizationMode::Deterministic,
        };
        let ran = maybe_compact(None, &mut state, &config, &CancelToken::never())
            .await
            .unwrap();
        assert!(ran);
        assert!(state.summary.is_some());
        assert_eq!(state.turns.len(), 15, "full history must be retained");
    }
}

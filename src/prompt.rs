//! Prompt Builder (C11): assembles the message list sent to the model in the
//! fixed order spec §4.11 requires — engine system message, host system
//! messages, summary, goal, retained turns, host conversational messages —
//! applying field-size truncation along the way.

use serde_json::Value;

use crate::compactor::truncate_with_marker;
use crate::message::{Message, Role};
use crate::state::{AgentState, ToolExecutionResult, Turn};
use crate::tool::ToolDefinition;

/// Field-size caps applied while rendering turns into the prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilderConfig {
    /// Cap on a rendered tool output's length, in characters.
    pub max_tool_output_size: usize,
    /// Cap on a turn's rendered thoughts, in characters.
    pub max_thoughts_length: usize,
    /// Cap on a turn's rendered final answer, in characters.
    pub max_final_length: usize,
    /// Cap on the rendered summary slot, in characters.
    pub max_summary_length: usize,
    /// How many of the most recent turns are rendered in full; older turns
    /// are represented only via `state.summary` (kept in sync with the
    /// compactor's own `max_recent_turns`).
    pub max_recent_turns: usize,
}

impl Default for PromptBuilderConfig {
    fn default() -> Self {
        Self {
            max_tool_output_size: 4000,
            max_thoughts_length: 2000,
            max_final_length: 4000,
            max_summary_length: 2000,
            max_recent_turns: 20,
        }
    }
}

fn engine_system_message(tools: &[ToolDefinition], use_function_calling: bool) -> Message {
    let mut content = String::from(
        "You are an autonomous agent. Respond with your reasoning followed by either a \
         final answer or one or more tool calls. Never fabricate tool output.",
    );
    if !use_function_calling && !tools.is_empty() {
        content.push_str(
            "\n\nTo call a tool, emit a single JSON object on its own line: \
             {\"tool_name\": <name>, \"arguments\": {...}}. Available tools:\n",
        );
        for tool in tools {
            content.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
    }
    Message::system(content)
}

fn render_tool_observation(result: &ToolExecutionResult, max_tool_output_size: usize) -> Message {
    use crate::state::ToolOutcome;

    let body = match &result.outcome {
        ToolOutcome::Success { output } | ToolOutcome::CacheHit { output, .. } => {
            serde_json::to_string(output).unwrap_or_else(|_| output.to_string())
        }
        ToolOutcome::ValidationFailure { missing_fields, type_errors } => {
            format!("validation failed: missing={missing_fields:?} type_errors={type_errors:?}")
        }
        ToolOutcome::Timeout => "tool call timed out".to_owned(),
        ToolOutcome::ExecutionError { message, .. } => format!("error: {message}"),
    };
    Message::tool(result.call_id.clone(), truncate_with_marker(&body, max_tool_output_size))
}

fn render_turn(turn: &Turn, config: &PromptBuilderConfig) -> Vec<Message> {
    let mut messages = Vec::new();

    let thoughts = truncate_with_marker(&turn.model_message.thoughts, config.max_thoughts_length);
    let assistant_message = if let Some(final_output) = &turn.model_message.final_output {
        let final_text = render_final_output(final_output);
        Message {
            role: Role::Assistant,
            content: format!("{thoughts}\n{}", truncate_with_marker(&final_text, config.max_final_length)),
            tool_call_id: None,
            tool_calls: None,
        }
    } else if let Some(tool_calls) = turn.model_message.active_tool_calls() {
        Message {
            role: Role::Assistant,
            content: thoughts,
            tool_call_id: None,
            tool_calls: Some(tool_calls.to_vec()),
        }
    } else {
        Message::assistant(thoughts)
    };
    messages.push(assistant_message);

    for result in &turn.tool_execution_results {
        messages.push(render_tool_observation(result, config.max_tool_output_size));
    }

    messages
}

fn render_final_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Assemble the full message list for the next model call, per the ordering
/// contract in spec §4.11:
/// (a) engine system message, (b) host system messages, (c) summary of
/// elided history, (d) goal, (e) retained turns as `{model_message,
/// tool_observations}` pairs, (f) host conversational messages.
#[must_use]
pub fn build_prompt(
    state: &AgentState,
    tool_definitions: &[ToolDefinition],
    host_system_messages: &[Message],
    host_messages: &[Message],
    use_function_calling: bool,
    config: &PromptBuilderConfig,
) -> Vec<Message> {
    let mut messages = Vec::new();

    // (a)
    messages.push(engine_system_message(tool_definitions, use_function_calling));

    // (b)
    messages.extend(host_system_messages.iter().cloned());

    // (c)
    if let Some(summary) = &state.summary {
        messages.push(Message::system(format!(
            "Summary of earlier turns: {}",
            truncate_with_marker(summary, config.max_summary_length)
        )));
    }

    // (d)
    messages.push(Message::user(state.goal.clone()));

    // (e)
    let elided_count = state.turns.len().saturating_sub(config.max_recent_turns);
    for turn in &state.turns[elided_count..] {
        messages.extend(render_turn(turn, config));
    }

    // (f)
    messages.extend(host_messages.iter().cloned());

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ModelMessage, ToolOutcome};
    use chrono::Utc;

    fn simple_turn(index: usize, thoughts: &str, final_output: Option<Value>) -> Turn {
        Turn {
            index,
            model_message: ModelMessage {
                thoughts: thoughts.to_owned(),
                final_output,
                tool_calls: None,
                reasoning_step: None,
            },
            tool_execution_results: Vec::new(),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            error: None,
        }
    }

    #[test]
    fn orders_sections_correctly() {
        let mut state = AgentState::new("agent-1", "find the answer");
        state.push_turn(simple_turn(0, "thinking", None));
        state.summary = Some("earlier context".to_owned());

        let config = PromptBuilderConfig::default();
        let messages = build_prompt(&state, &[], &[], &[], true, &config);

        assert_eq!(messages[0].role, Role::System); // engine message
        assert!(messages[1].content.contains("earlier context"));
        assert_eq!(messages[2].content, "find the answer");
        assert_eq!(messages[3].role, Role::Assistant);
    }

    #[test]
    fn truncates_long_tool_output() {
        let mut turn = simple_turn(0, "", None);
        turn.tool_execution_results.push(ToolExecutionResult {
            call_id: "call_1".to_owned(),
            tool_name: "search".to_owned(),
            input_fingerprint: "search:0".to_owned(),
            outcome: ToolOutcome::Success {
                output: Value::String("x".repeat(10_000)),
            },
            elapsed_ms: 5,
            started_at: Utc::now(),
        });
        let config = PromptBuilderConfig {
            max_tool_output_size: 50,
            ..PromptBuilderConfig::default()
        };
        let rendered = render_turn(&turn, &config);
        let tool_message = &rendered[1];
        assert!(tool_message.content.len() < 10_000);
        assert!(tool_message.content.contains("truncated"));
    }
}

//! Turn Loop Controller (C7): the state machine driving one run from goal to
//! terminal state, grounded on the teacher's `execute_loop`/`execute_step`
//! (`agent/executor.rs`) — prompt, model call, tool dispatch, persist —
//! generalized to the full state machine in spec §4.1: `Idle -> BuildPrompt
//! -> AwaitModel -> ParseResponse -> {EmitFinal | DispatchTools |
//! RecoverParseError} -> PersistTurn -> CheckBudgets -> BuildPrompt |
//! Terminate`.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};

use super::config::AgentConfig;
use super::result::{RunResult, StepResult, TerminalState};
use crate::cancel::CancelToken;
use crate::compactor::{self, CompactorConfig, SummarizationMode};
use crate::error::{AgentError, Result};
use crate::events::{Event, EventKind, SharedEventBus};
use crate::message::{Message, Role};
use crate::model::filter::ChunkFilter;
use crate::model::stream::StreamAggregator;
use crate::model::{BoxedChatProvider, ChatOptions, ChatProvider, ChatResponse, LlmError};
use futures::StreamExt;
use crate::prompt::{self, PromptBuilderConfig};
use crate::reasoning::chain::{self, ChainConfig};
use crate::reasoning::tree::{self, TreeConfig, TreeOutcome};
use crate::reasoning::ReasoningType;
use crate::state::store::BoxedStateStore;
use crate::state::{
    AgentState, ToolCallHistoryEntry, ToolCallRequest, ToolExecutionResult, ToolOutcome,
    ToolOutcomeClass, Turn,
};
use crate::tool::dedupe::DedupeCache;
use crate::tool::loop_detector::{self, LoopDetectorConfig};
use crate::tool::registry::SharedToolBox;
use crate::tool::ToolCachePolicy;

/// Shared, process-scoped resources one [`super::Agent`] wires into every
/// `run`/`step` call.
pub(crate) struct Context {
    pub model: BoxedChatProvider,
    pub state_store: BoxedStateStore,
    pub event_bus: SharedEventBus,
    pub dedupe: Arc<DedupeCache>,
    pub config: AgentConfig,
}

fn terminal_state_for(err: &AgentError) -> TerminalState {
    match err {
        AgentError::Cancelled => TerminalState::Cancelled,
        AgentError::MaxTurns { .. } => TerminalState::MaxTurns,
        AgentError::RunTimeout { .. } => TerminalState::RunTimeout,
        AgentError::LoopDetected { .. } => TerminalState::LoopDetected,
        AgentError::LlmFailed(_) => TerminalState::LlmFailed,
        AgentError::StateStoreFailed(_) => TerminalState::StateStoreFailed,
        AgentError::InvalidConfiguration(_) | AgentError::AlreadyRunning(_) | AgentError::Tool(_) | AgentError::Internal(_) => {
            TerminalState::Internal
        }
    }
}

/// Drive `state` through turns until a final answer, a budget is exhausted,
/// or the run is cancelled. Every turn is persisted as it completes, so a
/// crash mid-run loses at most the in-flight turn.
#[instrument(skip_all, fields(agent_id = %state.agent_id))]
pub(crate) async fn run(
    ctx: &Context,
    state: &mut AgentState,
    tools: &SharedToolBox,
    host_system_messages: &[Message],
    host_messages: &[Message],
    cancel: CancelToken,
) -> RunResult {
    let run_start = Instant::now();
    ctx.event_bus
        .emit(Event::new(EventKind::RunStarted, state.agent_id.clone(), None, Value::Null));

    let loop_fut = async {
        loop {
            if state.turns.len() >= ctx.config.max_turns {
                return Err(AgentError::max_turns(state.turns.len(), ctx.config.max_turns));
            }
            let step_result = step(ctx, state, tools, host_system_messages, host_messages, &cancel).await?;
            if let Some(final_output) = step_result.final_output {
                return Ok(final_output);
            }
        }
    };

    let outcome: Result<Value> = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AgentError::Cancelled),
        timed = tokio::time::timeout(ctx.config.run_timeout, loop_fut) => match timed {
            Ok(inner) => inner,
            Err(_elapsed) => Err(AgentError::run_timeout(
                u64::try_from(run_start.elapsed().as_millis()).unwrap_or(u64::MAX),
                u64::try_from(ctx.config.run_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        },
    };

    let duration_ms = u64::try_from(run_start.elapsed().as_millis()).unwrap_or(u64::MAX);
    let (succeeded, final_output, error, terminal_state) = match &outcome {
        Ok(value) => (true, Some(value.clone()), None, TerminalState::EmitFinal),
        Err(err) => (false, None, Some(err.kind().to_owned()), terminal_state_for(err)),
    };

    ctx.event_bus.emit(Event::new(
        EventKind::RunCompleted,
        state.agent_id.clone(),
        None,
        json!({ "succeeded": succeeded, "duration_ms": duration_ms }),
    ));

    RunResult {
        succeeded,
        final_output,
        error,
        total_turns: state.turns.len(),
        terminal_state,
    }
}

/// Run exactly one turn: compact, reason, build prompt, call the model,
/// parse the response, dispatch tools, persist. Returns `Err` only for
/// unrecoverable outcomes (cancellation, exhausted retries, a detected
/// loop); a parse failure or a failed tool call is recorded on the turn and
/// folded into a normal `Ok(StepResult)` so the loop can try again.
#[instrument(skip_all, fields(agent_id = %state.agent_id, turn = state.next_turn_index()))]
pub(crate) async fn step(
    ctx: &Context,
    state: &mut AgentState,
    tools: &SharedToolBox,
    host_system_messages: &[Message],
    host_messages: &[Message],
    cancel: &CancelToken,
) -> Result<StepResult> {
    if cancel.is_cancelled() {
        return Err(AgentError::Cancelled);
    }

    let turn_index = state.next_turn_index();
    ctx.event_bus
        .emit(Event::new(EventKind::StepStarted, state.agent_id.clone(), Some(turn_index), Value::Null));

    if ctx.config.enable_history_summarization {
        let compactor_config = CompactorConfig {
            max_recent_turns: ctx.config.max_recent_turns,
            max_summary_length: ctx.config.max_summary_length,
            mode: ctx.config.summarization_mode,
        };
        let provider_for_summary =
            matches!(ctx.config.summarization_mode, SummarizationMode::Model).then(|| ctx.model.as_ref());
        if let Err(err) = compactor::maybe_compact(provider_for_summary, state, &compactor_config, cancel).await {
            debug!(error = %err, "history compaction failed; continuing with prior summary");
        }
    }

    let mut turn = Turn::start(turn_index);

    match ctx.config.reasoning_type {
        ReasoningType::ChainOfThought => {
            if let Err(err) = run_chain_step(ctx, state, &mut turn, host_system_messages, host_messages, cancel).await {
                turn.error = Some(err.to_string());
            }
        }
        ReasoningType::TreeOfThoughts => {
            if let Err(err) = run_tree_search(ctx, state, &mut turn, cancel).await {
                turn.error = Some(err.to_string());
            }
        }
        ReasoningType::None => {}
    }

    if turn.model_message.final_output.is_none() {
        if let Err(err) = run_model_turn(ctx, state, &mut turn, tools, host_system_messages, host_messages, cancel).await {
            turn.complete();
            state.push_turn(turn);
            let save_result = ctx.state_store.save(state).await;
            ctx.event_bus
                .emit(Event::new(EventKind::StepCompleted, state.agent_id.clone(), Some(turn_index), Value::Null));
            save_result?;
            return Err(err);
        }
    }

    let tool_calls = turn.model_message.active_tool_calls().map(<[_]>::to_vec);
    let mut executed_tool_count = 0usize;

    if let Some(tool_calls) = tool_calls {
        executed_tool_count = tool_calls.len();
        let results = dispatch_tools(ctx, tools, &tool_calls, cancel, &state.agent_id, turn_index).await;

        for (call, result) in tool_calls.iter().zip(results.iter()) {
            state.record_tool_call(
                ToolCallHistoryEntry {
                    tool_name: call.tool_name.clone(),
                    args_hash: crate::tool::dedupe::canonical_hash(&call.tool_name, &call.arguments),
                    outcome_class: ToolOutcomeClass::from(&result.outcome),
                    timestamp: chrono::Utc::now(),
                },
                ctx.config.max_tool_call_history,
            );
        }
        turn.tool_execution_results = results;

        if let Some(kind) = loop_detector::detect(
            &state.tool_call_history,
            LoopDetectorConfig {
                repeat_threshold: 2,
                consecutive_failure_threshold: ctx.config.consecutive_failure_threshold,
            },
        ) {
            ctx.event_bus.emit(Event::new(
                EventKind::LoopDetected,
                state.agent_id.clone(),
                Some(turn_index),
                json!({ "kind": kind.as_str() }),
            ));
            turn.error = Some(format!("loop detected: {}", kind.as_str()));
            turn.complete();
            state.push_turn(turn);
            let save_result = ctx.state_store.save(state).await;
            ctx.event_bus
                .emit(Event::new(EventKind::StepCompleted, state.agent_id.clone(), Some(turn_index), Value::Null));
            save_result?;
            return Err(AgentError::loop_detected(kind.as_str()));
        }
    }

    let final_output = turn.model_message.final_output.clone();
    turn.complete();
    state.push_turn(turn);
    let save_result = ctx.state_store.save(state).await;
    ctx.event_bus
        .emit(Event::new(EventKind::StepCompleted, state.agent_id.clone(), Some(turn_index), Value::Null));
    save_result?;

    Ok(StepResult {
        should_continue: final_output.is_none(),
        executed_tool_count,
        final_output,
        error: None,
    })
}

/// `BuildPrompt -> AwaitModel -> ParseResponse`, folding the result directly
/// into `turn`. Returns `Err` only when the model call itself failed after
/// exhausting retries; a parse failure is recorded on the turn instead.
async fn run_model_turn(
    ctx: &Context,
    state: &AgentState,
    turn: &mut Turn,
    tools: &SharedToolBox,
    host_system_messages: &[Message],
    host_messages: &[Message],
    cancel: &CancelToken,
) -> Result<()> {
    let prompt_config = PromptBuilderConfig {
        max_tool_output_size: ctx.config.max_tool_output_size,
        max_thoughts_length: ctx.config.max_thoughts_length,
        max_final_length: ctx.config.max_final_length,
        max_summary_length: ctx.config.max_summary_length,
        max_recent_turns: ctx.config.max_recent_turns,
    };
    let use_function_calling = ctx.config.use_function_calling && ctx.model.supports_function_calling();
    let definitions = tools.definitions();
    let messages = prompt::build_prompt(
        state,
        &definitions,
        host_system_messages,
        host_messages,
        use_function_calling,
        &prompt_config,
    );

    let options = ChatOptions {
        tools: use_function_calling.then(|| definitions.clone()),
        max_tokens: ctx.config.max_tokens,
        temperature: ctx.config.temperature,
        top_p: ctx.config.top_p,
        enable_streaming: true,
    };

    ctx.event_bus
        .emit(Event::new(EventKind::LlmCallStarted, state.agent_id.clone(), Some(turn.index), Value::Null));
    let call_start = Instant::now();
    let response = call_model_with_retry(ctx, messages, options, &state.agent_id, turn.index, cancel).await;
    let duration_ms = u64::try_from(call_start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let response = match response {
        Ok(response) => {
            ctx.event_bus.emit(Event::new(
                EventKind::LlmCallCompleted,
                state.agent_id.clone(),
                Some(turn.index),
                json!({
                    "success": true,
                    "duration_ms": duration_ms,
                    "model_id": ctx.model.model_id(),
                    "input_tokens": response.usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
                    "output_tokens": response.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0),
                }),
            ));
            response
        }
        Err(err) => {
            ctx.event_bus.emit(Event::new(
                EventKind::LlmCallCompleted,
                state.agent_id.clone(),
                Some(turn.index),
                json!({ "success": false, "duration_ms": duration_ms, "model_id": ctx.model.model_id() }),
            ));
            return Err(err);
        }
    };

    let parsed = parse_model_response(&response);
    turn.model_message.thoughts = parsed.thoughts;
    if let Some(parse_error) = parsed.parse_error {
        turn.error = Some(parse_error);
        return Ok(());
    }

    turn.model_message.final_output = parsed.final_output;
    if let Some(tool_calls) = parsed.tool_calls {
        if turn.model_message.final_output.is_some() {
            warn!(
                agent_id = %state.agent_id,
                turn = turn.index,
                "model proposed both a final answer and tool calls; final answer wins"
            );
        } else {
            turn.model_message.tool_calls = Some(tool_calls);
        }
    }
    Ok(())
}

/// Call the model, retrying retryable [`LlmError`]s under exponential
/// backoff up to `max_retries` times, observing cancellation both during the
/// call, during stream consumption, and during the backoff sleep.
async fn call_model_with_retry(
    ctx: &Context,
    messages: Vec<Message>,
    options: ChatOptions,
    agent_id: &str,
    turn_index: usize,
    cancel: &CancelToken,
) -> Result<ChatResponse> {
    let mut attempt = 0u32;
    let mut delay = ctx.config.initial_retry_delay;

    loop {
        let outcome = run_one_stream(ctx, messages.clone(), options.clone(), agent_id, turn_index, cancel).await;

        match outcome {
            Ok(response) => return Ok(response),
            Err(err) if err.is_retryable() && attempt < ctx.config.max_retries => {
                attempt += 1;
                warn!(attempt, error = %err, "retrying llm call after backoff");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(AgentError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(ctx.config.max_retry_delay);
            }
            Err(err) => return Err(AgentError::LlmFailed(err)),
        }
    }
}

/// Drive one `AwaitModel` attempt through [`ChatProvider::stream`] (spec
/// §4.6), pushing each chunk's text through a per-attempt [`ChunkFilter`]
/// (C9) and emitting the visible portion as [`EventKind::LlmChunkReceived`],
/// then folding the whole stream into one [`ChatResponse`] via
/// [`StreamAggregator`]. Providers that only implement `generate` still go
/// through this path via `ChatProvider::stream`'s default one-chunk wrapper.
async fn run_one_stream(
    ctx: &Context,
    messages: Vec<Message>,
    options: ChatOptions,
    agent_id: &str,
    turn_index: usize,
    cancel: &CancelToken,
) -> std::result::Result<ChatResponse, LlmError> {
    let call = ctx.model.stream(messages, options, cancel.clone());
    let mut chunks = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(LlmError::Transient {
            provider: ctx.model.model_id().to_owned(),
            message: "cancelled before dispatch".to_owned(),
        }),
        timed = tokio::time::timeout(ctx.config.llm_timeout, call) => match timed {
            Ok(inner) => inner?,
            Err(_elapsed) => return Err(LlmError::Transient {
                provider: ctx.model.model_id().to_owned(),
                message: "llm call timed out".to_owned(),
            }),
        },
    };

    let mut aggregator = StreamAggregator::new();
    let mut filter = ChunkFilter::new();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::Transient {
                provider: ctx.model.model_id().to_owned(),
                message: "cancelled mid-stream".to_owned(),
            }),
            item = chunks.next() => item,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk?;

        let visible = filter.push(&chunk.content);
        if !visible.is_empty() {
            ctx.event_bus.emit(Event::new(
                EventKind::LlmChunkReceived,
                agent_id.to_owned(),
                Some(turn_index),
                json!({ "content": visible }),
            ));
        }

        let is_final = chunk.is_final;
        aggregator.push(&chunk);
        if is_final {
            break;
        }
    }

    Ok(ChatResponse {
        message: Message {
            role: Role::Assistant,
            content: aggregator.content().to_owned(),
            tool_call_id: None,
            tool_calls: aggregator.function_call().cloned().map(|call| vec![call]),
        },
        tool_calls: aggregator.function_call().cloned().map(|call| vec![call]),
        usage: aggregator.usage(),
        raw: None,
    })
}

struct ParsedResponse {
    thoughts: String,
    final_output: Option<Value>,
    tool_calls: Option<Vec<ToolCallRequest>>,
    parse_error: Option<String>,
}

/// `ParseResponse`: prefer native function calls, then a `{"tool_name",
/// "arguments"}` object embedded in the text, then treat non-empty text as
/// the final answer. An empty response with no tool call is the only case
/// that recovers via `RecoverParseError`.
fn parse_model_response(response: &ChatResponse) -> ParsedResponse {
    let content = response.message.content.clone();

    if let Some(native) = &response.tool_calls {
        if !native.is_empty() {
            return ParsedResponse {
                thoughts: content,
                final_output: None,
                tool_calls: Some(native.clone()),
                parse_error: None,
            };
        }
    }

    if let Some((tool_call, thoughts)) = extract_text_tool_call(&content) {
        return ParsedResponse {
            thoughts,
            final_output: None,
            tool_calls: Some(vec![tool_call]),
            parse_error: None,
        };
    }

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return ParsedResponse {
            thoughts: String::new(),
            final_output: None,
            tool_calls: None,
            parse_error: Some("model returned an empty response with no tool call".to_owned()),
        };
    }

    ParsedResponse {
        thoughts: String::new(),
        final_output: Some(Value::String(trimmed.to_owned())),
        tool_calls: None,
        parse_error: None,
    }
}

/// Find the first brace-balanced JSON object in `text` and, if it parses as
/// `{"tool_name": str, "arguments"?: object}`, extract it as a tool call. The
/// surrounding text (with the object removed) becomes the turn's thoughts.
fn extract_text_tool_call(text: &str) -> Option<(ToolCallRequest, String)> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut end = start;
    for (i, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }
    if end == start {
        return None;
    }

    let value: Value = serde_json::from_str(&text[start..end]).ok()?;
    let tool_name = value.get("tool_name")?.as_str()?.to_owned();
    let arguments = match value.get("arguments").cloned() {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let thoughts = format!("{}{}", &text[..start], &text[end..]).trim().to_owned();
    Some((ToolCallRequest::new(tool_name, arguments), thoughts))
}

/// `DispatchTools`: invoke every active tool call concurrently (bounded by
/// `max_parallel_tools`), consulting and populating the dedupe cache (C3)
/// around each call.
async fn dispatch_tools(
    ctx: &Context,
    tools: &SharedToolBox,
    calls: &[ToolCallRequest],
    cancel: &CancelToken,
    agent_id: &str,
    turn_index: usize,
) -> Vec<ToolExecutionResult> {
    use futures::stream::{self, StreamExt};

    let limit = ctx.config.max_parallel_tools.max(1);
    stream::iter(calls.iter())
        .map(|call| invoke_with_dedupe(ctx, tools, call, cancel, agent_id, turn_index))
        .buffered(limit)
        .collect()
        .await
}

async fn invoke_with_dedupe(
    ctx: &Context,
    tools: &SharedToolBox,
    call: &ToolCallRequest,
    cancel: &CancelToken,
    agent_id: &str,
    turn_index: usize,
) -> ToolExecutionResult {
    let start = Instant::now();
    let cache_policy = tools.cache_policy(&call.tool_name);
    let ttl_override = match cache_policy {
        ToolCachePolicy::Ttl(ttl) => Some(ttl),
        ToolCachePolicy::Default | ToolCachePolicy::Disabled => None,
    };

    if !matches!(cache_policy, ToolCachePolicy::Disabled)
        && let Some(hit) = ctx.dedupe.get(&call.tool_name, &call.arguments, ttl_override)
    {
        let result = ToolExecutionResult {
            call_id: call.id(),
            tool_name: call.tool_name.clone(),
            input_fingerprint: crate::tool::dedupe::fingerprint(&call.tool_name, &call.arguments),
            outcome: ToolOutcome::CacheHit {
                output: hit.output,
                age_ms: hit.age_ms,
            },
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            started_at: chrono::Utc::now(),
        };
        ctx.event_bus.emit(Event::new(
            EventKind::ToolCallCompleted,
            agent_id,
            Some(turn_index),
            json!({ "success": true, "duration_ms": result.elapsed_ms, "cache_hit": true }),
        ));
        return result;
    }

    // No cache hit (or this tool opts out of caching): only now is the call
    // genuinely starting, so only now do we announce it.
    ctx.event_bus.emit(Event::new(
        EventKind::ToolCallStarted,
        agent_id,
        Some(turn_index),
        json!({ "tool_name": call.tool_name }),
    ));

    let result = tools.invoke(call, cancel).await;
    if !matches!(cache_policy, ToolCachePolicy::Disabled)
        && let ToolOutcome::Success { output } = &result.outcome
    {
        ctx.dedupe.insert(&call.tool_name, &call.arguments, output.clone());
    }
    ctx.event_bus.emit(Event::new(
        EventKind::ToolCallCompleted,
        agent_id,
        Some(turn_index),
        json!({
            "success": result.outcome.is_success(),
            "duration_ms": result.elapsed_ms,
            "cache_hit": false,
        }),
    ));
    result
}

/// One Chain-of-Thought step (C6), folded into `turn`. The running chain
/// lives on `state.current_reasoning_chain` across turns until
/// [`chain::should_terminate`] accepts a proposed final answer or the step
/// budget is exhausted; until then the step's thought still feeds the main
/// model call's context via the rendered chain in `turn.model_message.thoughts`.
async fn run_chain_step(
    ctx: &Context,
    state: &mut AgentState,
    turn: &mut Turn,
    host_system_messages: &[Message],
    host_messages: &[Message],
    cancel: &CancelToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AgentError::Cancelled);
    }

    let config = ChainConfig {
        max_reasoning_steps: ctx.config.max_reasoning_steps,
        confidence_threshold: ctx.config.confidence_threshold,
        enable_validation: ctx.config.enable_reasoning_validation,
    };
    let mut reasoning_chain = state.current_reasoning_chain.clone().unwrap_or_default();

    let prompt_config = PromptBuilderConfig {
        max_tool_output_size: ctx.config.max_tool_output_size,
        max_thoughts_length: ctx.config.max_thoughts_length,
        max_final_length: ctx.config.max_final_length,
        max_summary_length: ctx.config.max_summary_length,
        max_recent_turns: ctx.config.max_recent_turns,
    };
    let messages = prompt::build_prompt(state, &[], host_system_messages, host_messages, false, &prompt_config);

    let (step, proposed_final) = chain::next_step(ctx.model.as_ref(), messages).await?;

    let accepted = if ctx.config.enable_reasoning_validation {
        chain::validate_step(ctx.model.as_ref(), &step).await.unwrap_or(true)
    } else {
        true
    };

    ctx.event_bus.emit(Event::new(
        EventKind::ReasoningStep,
        state.agent_id.clone(),
        Some(turn.index),
        json!({ "thought": step.thought, "confidence": step.confidence, "accepted": accepted }),
    ));

    if accepted {
        reasoning_chain.steps.push(step.clone());
    }
    let should_stop = chain::should_terminate(&reasoning_chain, &config, proposed_final.is_some());

    turn.model_message.reasoning_step = Some(step);
    turn.model_message.thoughts = reasoning_chain.render();

    if should_stop {
        if let Some(final_output) = proposed_final {
            turn.model_message.final_output = Some(final_output);
        }
        state.current_reasoning_chain = None;
    } else {
        state.current_reasoning_chain = Some(reasoning_chain);
    }

    Ok(())
}

/// A full Tree-of-Thoughts search (C6), run to termination within a single
/// turn since [`tree::search`] already drives its own frontier loop. An
/// `Accepted` outcome becomes the turn's final answer; a `BestEffort`
/// outcome just feeds the best state found into the next main model call.
async fn run_tree_search(ctx: &Context, state: &mut AgentState, turn: &mut Turn, cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AgentError::Cancelled);
    }

    let config = TreeConfig {
        max_depth: ctx.config.max_depth,
        max_branching: ctx.config.max_branching,
        beam_width: ctx.config.beam_width,
        strategy: ctx.config.exploration_strategy,
        acceptance_threshold: ctx.config.acceptance_threshold,
    };
    let (_tree, outcome) = tree::search(ctx.model.as_ref(), &state.goal, &config).await?;

    let (label, text) = match outcome {
        TreeOutcome::Accepted(text) => ("accepted", text),
        TreeOutcome::BestEffort(text) => ("best_effort", text),
    };
    ctx.event_bus.emit(Event::new(
        EventKind::ReasoningStep,
        state.agent_id.clone(),
        Some(turn.index),
        json!({ "outcome": label }),
    ));

    turn.model_message.thoughts = text.clone();
    if label == "accepted" {
        turn.model_message.final_output = Some(Value::String(text));
    }
    Ok(())
}

//! End-to-end scenarios driving `Agent::run`/`step` against `MockProvider`
//! and small in-process tools, exercising the turn loop controller (C7)
//! together with the state store, dedupe cache, loop detector, and event
//! bus it wires together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use agentrt::prelude::*;

#[derive(Debug, Deserialize)]
struct CalcArgs {
    a: f64,
    b: f64,
    op: String,
}

/// A trivial arithmetic tool, counting how many times it actually ran so
/// tests can tell a cache hit from a real invocation.
struct Calculator {
    invocations: Arc<AtomicUsize>,
}

impl Calculator {
    fn new() -> (Self, Arc<AtomicUsize>) {
        let invocations = Arc::new(AtomicUsize::new(0));
        (
            Self {
                invocations: Arc::clone(&invocations),
            },
            invocations,
        )
    }
}

#[async_trait]
impl Tool for Calculator {
    const NAME: &'static str = "calculator";
    type Args = CalcArgs;
    type Output = f64;
    type Error = ToolError;

    fn description(&self) -> String {
        "Evaluate a binary arithmetic operation".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "number"},
                "b": {"type": "number"},
                "op": {"type": "string", "enum": ["add", "sub", "mul", "div"]},
            },
            "required": ["a", "b", "op"],
        })
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match args.op.as_str() {
            "add" => Ok(args.a + args.b),
            "sub" => Ok(args.a - args.b),
            "mul" => Ok(args.a * args.b),
            "div" if args.b != 0.0 => Ok(args.a / args.b),
            "div" => Err(ToolError::execution("division by zero")),
            other => Err(ToolError::invalid_args(format!("unknown op '{other}'"))),
        }
    }
}

fn calc_args(a: f64, b: f64, op: &str) -> Map<String, Value> {
    match json!({ "a": a, "b": b, "op": op }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn calc_tool_call_text(a: f64, b: f64, op: &str) -> String {
    format!(
        r#"Let me compute that. {{"tool_name": "calculator", "arguments": {{"a": {a}, "b": {b}, "op": "{op}"}}}}"#
    )
}

fn toolbox_with_calculator() -> (SharedToolBox, Arc<AtomicUsize>) {
    let (calculator, invocations) = Calculator::new();
    let mut tools = ToolBox::new();
    tools.add(calculator);
    (Arc::new(tools), invocations)
}

#[tokio::test]
async fn run_completes_with_a_plain_final_answer() {
    let model = MockProvider::single("mock/echo", Message::assistant("The answer is 42"));
    let agent = Agent::builder().model(model).build();

    let (tools, _invocations) = toolbox_with_calculator();
    let result = agent
        .run("agent-a", "what is the answer?", tools, &[], &[], CancelToken::never())
        .await
        .expect("run should not fail");

    assert!(result.succeeded);
    assert_eq!(result.final_output, Some(Value::String("The answer is 42".to_owned())));
    assert_eq!(result.total_turns, 1);
    assert_eq!(result.terminal_state, TerminalState::EmitFinal);
}

#[tokio::test]
async fn tool_call_is_dispatched_and_its_result_informs_the_final_turn() {
    let (calculator, invocations) = Calculator::new();
    let mut toolbox = ToolBox::new();
    toolbox.add(calculator);
    let tools: SharedToolBox = Arc::new(toolbox);

    let model = MockProvider::new(
        "mock/calc",
        vec![
            ChatResponse::text(Message::assistant(calc_tool_call_text(2.0, 2.0, "add"))),
            ChatResponse::text(Message::assistant("The sum is 4")),
        ],
    );
    let agent = Agent::builder().model(model).build();

    let result = agent
        .run("agent-b", "add 2 and 2", tools, &[], &[], CancelToken::never())
        .await
        .expect("run should not fail");

    assert!(result.succeeded);
    assert_eq!(result.final_output, Some(Value::String("The sum is 4".to_owned())));
    assert_eq!(result.total_turns, 2);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let state = agent
        .state("agent-b")
        .await
        .expect("state lookup should not fail")
        .expect("state should exist after a run");
    assert_eq!(state.turns.len(), 2);
    let first_turn_results = &state.turns[0].tool_execution_results;
    assert_eq!(first_turn_results.len(), 1);
    assert!(first_turn_results[0].outcome.is_success());
}

#[tokio::test]
async fn repeated_identical_tool_call_trips_the_loop_detector() {
    let (tools, invocations) = toolbox_with_calculator();

    // Cycles between the same tool call forever; the loop detector should
    // fire once the same (tool, args) pair repeats back to back.
    let model = MockProvider::single(
        "mock/looping",
        Message::assistant(calc_tool_call_text(2.0, 2.0, "add")),
    );
    let agent = Agent::builder().model(model).build();

    let result = agent
        .run("agent-c", "add 2 and 2 forever", tools, &[], &[], CancelToken::never())
        .await
        .expect("run should not fail");

    assert!(!result.succeeded);
    assert_eq!(result.error.as_deref(), Some("loop_detected"));
    assert_eq!(result.terminal_state, TerminalState::LoopDetected);
    // The repeated call is identical, so its second occurrence is served
    // from the dedupe cache (C3) rather than re-invoking the tool — the
    // loop detector trips on the repeated (tool, args) identity regardless.
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn max_turns_is_enforced_when_no_final_answer_ever_arrives() {
    let (tools, invocations) = toolbox_with_calculator();

    // Three distinct successful calculator calls, cycling forever: varying
    // arguments keep the loop detector's repeated-call check from tripping,
    // so `max_turns` is what actually ends the run.
    let model = MockProvider::new(
        "mock/never-finishes",
        vec![
            ChatResponse::text(Message::assistant(calc_tool_call_text(1.0, 1.0, "add"))),
            ChatResponse::text(Message::assistant(calc_tool_call_text(2.0, 2.0, "add"))),
            ChatResponse::text(Message::assistant(calc_tool_call_text(3.0, 3.0, "add"))),
        ],
    );
    let mut config = AgentConfig::new();
    config.max_turns = 3;
    let agent = Agent::builder().model(model).config(config).build();

    let result = agent
        .run("agent-d", "never finish", tools, &[], &[], CancelToken::never())
        .await
        .expect("run should not fail");

    assert!(!result.succeeded);
    assert_eq!(result.error.as_deref(), Some("max_turns"));
    assert_eq!(result.terminal_state, TerminalState::MaxTurns);
    assert_eq!(result.total_turns, 3);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn memoized_terminal_state_skips_a_second_model_call() {
    let model = MockProvider::single("mock/once", Message::assistant("done"));
    let agent = Agent::builder().model(model).build();

    let (tools, _invocations) = toolbox_with_calculator();
    let first = agent
        .run("agent-e", "finish quickly", Arc::clone(&tools), &[], &[], CancelToken::never())
        .await
        .expect("first run should not fail");
    assert!(first.succeeded);

    let second = agent
        .run("agent-e", "finish quickly", tools, &[], &[], CancelToken::never())
        .await
        .expect("second run should not fail");

    assert!(second.succeeded);
    assert_eq!(second.final_output, first.final_output);
    assert_eq!(second.total_turns, first.total_turns);
}

#[tokio::test]
async fn cancelling_before_dispatch_stops_the_run_immediately() {
    let model = MockProvider::single("mock/slow", Message::assistant("done"));
    let agent = Agent::builder().model(model).build();

    let (handle, cancel) = cancel_pair();
    handle.cancel();

    let (tools, _invocations) = toolbox_with_calculator();
    let result = agent
        .run("agent-f", "cancel me", tools, &[], &[], cancel)
        .await
        .expect("run should not fail");

    assert!(!result.succeeded);
    assert_eq!(result.error.as_deref(), Some("cancelled"));
    assert_eq!(result.terminal_state, TerminalState::Cancelled);
}

#[tokio::test]
async fn dedupe_cache_serves_a_repeated_call_within_one_turn() {
    let (calculator, invocations) = Calculator::new();
    let mut toolbox = ToolBox::new();
    toolbox.add(calculator);
    let tools: SharedToolBox = Arc::new(toolbox);

    let call = ToolCallRequest::new("calculator", calc_args(2.0, 2.0, "add"));
    let turn0 = ChatResponse {
        message: Message::assistant_tool_calls(vec![call.clone(), call]),
        tool_calls: None,
        usage: None,
        raw: None,
    };
    let model = MockProvider::new(
        "mock/dedupe",
        vec![turn0, ChatResponse::text(Message::assistant("4"))],
    );

    let mut config = AgentConfig::new();
    config.max_parallel_tools = 1;
    let agent = Agent::builder().model(model).config(config).build();

    let result = agent
        .run("agent-g", "add 2 and 2 twice", tools, &[], &[], CancelToken::never())
        .await
        .expect("run should not fail");

    assert!(result.succeeded);
    assert_eq!(invocations.load(Ordering::SeqCst), 1, "second identical call should hit the cache");

    let state = agent.state("agent-g").await.unwrap().unwrap();
    let outcomes = &state.turns[0].tool_execution_results;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().any(|r| matches!(r.outcome, ToolOutcome::CacheHit { .. })));
}

#[tokio::test]
async fn subscribers_receive_run_lifecycle_and_streamed_chunk_events() {
    let model = MockProvider::single("mock/events", Message::assistant("hello there"));
    let event_bus: SharedEventBus = Arc::new(EventBus::new());
    let agent = Agent::builder()
        .model(model)
        .event_bus(Arc::clone(&event_bus))
        .build();

    let run_started = Arc::new(AtomicUsize::new(0));
    let run_completed = Arc::new(AtomicUsize::new(0));
    let chunk_text = Arc::new(std::sync::Mutex::new(String::new()));

    {
        let counter = Arc::clone(&run_started);
        agent.subscribe(EventKind::RunStarted, move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let counter = Arc::clone(&run_completed);
        agent.subscribe(EventKind::RunCompleted, move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let text = Arc::clone(&chunk_text);
        agent.subscribe(EventKind::LlmChunkReceived, move |event: &Event| {
            if let Some(content) = event.payload.get("content").and_then(Value::as_str) {
                text.lock().unwrap().push_str(content);
            }
        });
    }

    let (tools, _invocations) = toolbox_with_calculator();
    let result = agent
        .run("agent-h", "say hello", tools, &[], &[], CancelToken::never())
        .await
        .expect("run should not fail");

    assert!(result.succeeded);
    assert_eq!(run_started.load(Ordering::SeqCst), 1);
    assert_eq!(run_completed.load(Ordering::SeqCst), 1);
    assert_eq!(chunk_text.lock().unwrap().as_str(), "hello there");

    let metrics = agent.metrics();
    assert_eq!(metrics.runs.total, 1);
    assert!(metrics.llm_calls.total >= 1);
}

#[tokio::test]
async fn reset_clears_persisted_state_so_the_next_run_starts_fresh() {
    let model = MockProvider::single("mock/reset", Message::assistant("done"));
    let agent = Agent::builder().model(model).build();

    let (tools, _invocations) = toolbox_with_calculator();
    agent
        .run("agent-i", "finish", Arc::clone(&tools), &[], &[], CancelToken::never())
        .await
        .expect("run should not fail");
    assert!(agent.state("agent-i").await.unwrap().is_some());

    agent.reset("agent-i").await.expect("reset should not fail");
    assert!(agent.state("agent-i").await.unwrap().is_none());
}

#[tokio::test]
async fn step_started_and_step_completed_stay_balanced_on_a_loop_detected_run() {
    let (tools, _invocations) = toolbox_with_calculator();
    let model = MockProvider::single(
        "mock/looping",
        Message::assistant(calc_tool_call_text(2.0, 2.0, "add")),
    );
    let event_bus: SharedEventBus = Arc::new(EventBus::new());
    let agent = Agent::builder()
        .model(model)
        .event_bus(Arc::clone(&event_bus))
        .build();

    let started = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    {
        let counter = Arc::clone(&started);
        agent.subscribe(EventKind::StepStarted, move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let counter = Arc::clone(&completed);
        agent.subscribe(EventKind::StepCompleted, move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    let result = agent
        .run("agent-k", "add 2 and 2 forever", tools, &[], &[], CancelToken::never())
        .await
        .expect("run should not fail");

    assert!(!result.succeeded);
    assert_eq!(result.terminal_state, TerminalState::LoopDetected);
    assert!(started.load(Ordering::SeqCst) > 0);
    assert_eq!(started.load(Ordering::SeqCst), completed.load(Ordering::SeqCst));
}

#[derive(Debug, Deserialize)]
struct NoopArgs {}

struct SideEffectCounter {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for SideEffectCounter {
    const NAME: &'static str = "side_effect_counter";
    type Args = NoopArgs;
    type Output = usize;
    type Error = ToolError;

    fn description(&self) -> String {
        "Increments a counter every time it is actually invoked".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    fn cache_policy(&self) -> ToolCachePolicy {
        ToolCachePolicy::Disabled
    }

    async fn call(&self, _args: Self::Args) -> Result<Self::Output, Self::Error> {
        Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[tokio::test]
async fn a_tool_that_disables_caching_is_invoked_every_time() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut toolbox = ToolBox::new();
    toolbox.add(SideEffectCounter { calls: Arc::clone(&calls) });
    let tools: SharedToolBox = Arc::new(toolbox);

    let call = ToolCallRequest::new("side_effect_counter", Map::new());
    let turn0 = ChatResponse {
        message: Message::assistant_tool_calls(vec![call.clone(), call]),
        tool_calls: None,
        usage: None,
        raw: None,
    };
    let model = MockProvider::new(
        "mock/no-cache",
        vec![turn0, ChatResponse::text(Message::assistant("done"))],
    );

    let mut config = AgentConfig::new();
    config.max_parallel_tools = 1;
    let agent = Agent::builder().model(model).config(config).build();

    let result = agent
        .run("agent-l", "trigger the side effect twice", tools, &[], &[], CancelToken::never())
        .await
        .expect("run should not fail");

    assert!(result.succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 2, "a tool with caching disabled must run on every call");
}

struct ShortTtlCounter {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for ShortTtlCounter {
    const NAME: &'static str = "short_ttl_counter";
    type Args = NoopArgs;
    type Output = usize;
    type Error = ToolError;

    fn description(&self) -> String {
        "Increments a counter, cached under a TTL far shorter than the agent default".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    fn cache_policy(&self) -> ToolCachePolicy {
        ToolCachePolicy::Ttl(Duration::from_millis(20))
    }

    async fn call(&self, _args: Self::Args) -> Result<Self::Output, Self::Error> {
        Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[tokio::test]
async fn a_tool_with_a_custom_ttl_expires_independently_of_the_agent_default() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut toolbox = ToolBox::new();
    toolbox.add(ShortTtlCounter { calls: Arc::clone(&calls) });
    let tools: SharedToolBox = Arc::new(toolbox);

    let call = || ToolCallRequest::new("short_ttl_counter", Map::new());
    let model = MockProvider::new(
        "mock/short-ttl",
        vec![
            ChatResponse {
                message: Message::assistant_tool_calls(vec![call()]),
                tool_calls: None,
                usage: None,
                raw: None,
            },
            ChatResponse::text(Message::assistant("first run done")),
            ChatResponse {
                message: Message::assistant_tool_calls(vec![call()]),
                tool_calls: None,
                usage: None,
                raw: None,
            },
            ChatResponse::text(Message::assistant("second run done")),
            ChatResponse {
                message: Message::assistant_tool_calls(vec![call()]),
                tool_calls: None,
                usage: None,
                raw: None,
            },
            ChatResponse::text(Message::assistant("third run done")),
        ],
    );
    let agent = Agent::builder().model(model).build();

    // Agent-scoped dedupe cache is shared across agent ids, so three distinct
    // runs against the same agent all consult and populate the same cache.
    agent
        .run("agent-n1", "first", Arc::clone(&tools), &[], &[], CancelToken::never())
        .await
        .expect("first run should not fail");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(30)).await;

    agent
        .run("agent-n2", "second", Arc::clone(&tools), &[], &[], CancelToken::never())
        .await
        .expect("second run should not fail");
    assert_eq!(calls.load(Ordering::SeqCst), 2, "the tool's 20ms ttl should have expired before the second run");

    agent
        .run("agent-n3", "third", tools, &[], &[], CancelToken::never())
        .await
        .expect("third run should not fail");
    assert_eq!(calls.load(Ordering::SeqCst), 2, "the third run is still within the 20ms ttl of the second run's insert");
}

#[tokio::test]
async fn unknown_fields_are_rejected_and_numeric_strings_are_coerced() {
    let (calculator, invocations) = Calculator::new();
    let mut toolbox = ToolBox::new();
    toolbox.add(calculator);
    let tools: SharedToolBox = Arc::new(toolbox);

    let mut stringly_args = calc_args(2.0, 2.0, "add");
    stringly_args.insert("a".to_owned(), Value::String("2".to_owned()));
    let good_call = ToolCallRequest::new("calculator", stringly_args);

    let mut bad_args = calc_args(2.0, 2.0, "add");
    bad_args.insert("unexpected".to_owned(), Value::Bool(true));
    let bad_call = ToolCallRequest::new("calculator", bad_args);

    let model = MockProvider::new(
        "mock/validate",
        vec![
            ChatResponse {
                message: Message::assistant_tool_calls(vec![good_call]),
                tool_calls: None,
                usage: None,
                raw: None,
            },
            ChatResponse {
                message: Message::assistant_tool_calls(vec![bad_call]),
                tool_calls: None,
                usage: None,
                raw: None,
            },
            ChatResponse::text(Message::assistant("done")),
        ],
    );
    let agent = Agent::builder().model(model).build();

    let result = agent
        .run("agent-m", "validate arguments", tools, &[], &[], CancelToken::never())
        .await
        .expect("run should not fail");

    assert!(result.succeeded);
    assert_eq!(invocations.load(Ordering::SeqCst), 1, "the call with the unknown field must not reach the tool body");

    let state = agent.state("agent-m").await.unwrap().unwrap();
    assert!(state.turns[0].tool_execution_results[0].outcome.is_success());
    match &state.turns[1].tool_execution_results[0].outcome {
        ToolOutcome::ValidationFailure { type_errors, .. } => {
            assert!(type_errors.iter().any(|e| e.contains("unexpected")));
        }
        other => panic!("expected a validation failure, got {other:?}"),
    }
}

#[tokio::test]
async fn a_concurrent_run_for_the_same_agent_id_fails_fast() {
    let model = MockProvider::single("mock/busy", Message::assistant("done"));
    let agent = Arc::new(Agent::builder().model(model).build());

    let (tools_a, _inv_a) = toolbox_with_calculator();
    let (tools_b, _inv_b) = toolbox_with_calculator();

    let agent_clone = Arc::clone(&agent);
    let first = tokio::spawn(async move {
        agent_clone
            .run("agent-j", "first", tools_a, &[], &[], CancelToken::never())
            .await
    });

    // Give the first run a chance to acquire its lock before the second
    // attempts to start.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = agent
        .run("agent-j", "second", tools_b, &[], &[], CancelToken::never())
        .await;

    let _ = first.await.expect("first run task should not panic");
    match second {
        Err(err) => assert_eq!(err.kind(), "already_running"),
        Ok(_) => {
            // The first run may have already finished (MockProvider resolves
            // instantly), in which case the second run is also free to succeed.
        }
    }
}

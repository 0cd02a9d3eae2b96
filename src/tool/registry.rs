//! Tool Registry & Executor (C2), grounded on the teacher's `ToolBox`:
//! register/describe/invoke a set of tools, with bounded-concurrency batch
//! dispatch for a turn's tool calls (spec §4.2).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::instrument;

use super::{DynTool, Tool, ToolCachePolicy, ToolDefinition, ToolError, ToolExecutionPolicy};
use crate::cancel::CancelToken;
use crate::state::{ToolCallRequest, ToolExecutionResult, ToolOutcome};

/// A boxed dynamic tool.
pub type BoxedTool = Box<dyn DynTool>;

/// A registered set of tools available to an agent, with per-tool execution
/// policy and a fixed per-call timeout.
pub struct ToolBox {
    tools: HashMap<String, BoxedTool>,
    policies: HashMap<String, ToolExecutionPolicy>,
    call_timeout: Duration,
    reject_unknown_fields: bool,
}

impl Default for ToolBox {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolBox {
    /// An empty toolbox with a 30s default per-call timeout, rejecting
    /// arguments with fields not named in a tool's declared schema.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            policies: HashMap::new(),
            call_timeout: Duration::from_secs(30),
            reject_unknown_fields: true,
        }
    }

    /// Override the per-call timeout applied to every invocation.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Allow (`false`) or forbid (`true`, the default) argument fields not
    /// named in a tool's declared parameter schema (spec §4.2). A schema
    /// that explicitly sets `"additionalProperties": true` always allows
    /// unknown fields regardless of this setting.
    #[must_use]
    pub const fn with_reject_unknown_fields(mut self, reject: bool) -> Self {
        self.reject_unknown_fields = reject;
        self
    }

    /// Register a statically-typed tool.
    pub fn add<T: Tool + 'static>(&mut self, tool: T)
    where
        T::Output: 'static,
    {
        self.tools.insert(tool.name().to_owned(), Box::new(tool));
    }

    /// Register a boxed tool.
    pub fn add_boxed(&mut self, tool: BoxedTool) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Set the execution policy for a registered tool name.
    pub fn set_policy(&mut self, tool_name: impl Into<String>, policy: ToolExecutionPolicy) {
        self.policies.insert(tool_name.into(), policy);
    }

    /// Whether a tool with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions for every registered tool, in the order the model
    /// should see them (spec §4.11 prompt assembly consumes this as-is).
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    fn policy_of(&self, name: &str) -> ToolExecutionPolicy {
        self.policies.get(name).copied().unwrap_or_default()
    }

    /// This tool's dedupe caching preference (spec §4.3), consulted by the
    /// controller before it checks or populates the dedupe cache. A name
    /// with no registered tool behaves as [`ToolCachePolicy::Default`].
    #[must_use]
    pub fn cache_policy(&self, name: &str) -> ToolCachePolicy {
        self.tools.get(name).map_or(ToolCachePolicy::Default, |t| t.cache_policy())
    }

    /// Invoke a single tool call, honoring its execution policy and the
    /// registry's call timeout. Never returns `Err`: failures are folded into
    /// the returned [`ToolOutcome`] so the turn loop can always record a
    /// result and continue.
    #[instrument(skip(self, call, cancel), fields(tool = %call.tool_name))]
    pub async fn invoke(&self, call: &ToolCallRequest, cancel: &CancelToken) -> ToolExecutionResult {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let input_fingerprint = super::dedupe::fingerprint(&call.tool_name, &call.arguments);

        let outcome = self.invoke_inner(call, cancel).await;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        ToolExecutionResult {
            call_id: call.id(),
            tool_name: call.tool_name.clone(),
            input_fingerprint,
            outcome,
            elapsed_ms,
            started_at,
        }
    }

    async fn invoke_inner(&self, call: &ToolCallRequest, cancel: &CancelToken) -> ToolOutcome {
        let Some(tool) = self.tools.get(&call.tool_name) else {
            return ToolOutcome::ExecutionError {
                message: ToolError::NotFound(call.tool_name.clone()).to_string(),
                classification: super::ErrorClass::Argument,
            };
        };

        if self.policy_of(&call.tool_name).is_forbidden() {
            return ToolOutcome::ExecutionError {
                message: ToolError::Forbidden(call.tool_name.clone()).to_string(),
                classification: super::ErrorClass::Argument,
            };
        }

        let schema = tool.definition().parameters;
        let coerced = match validate_args(&schema, &call.arguments, self.reject_unknown_fields) {
            Ok(coerced) => coerced,
            Err((missing_fields, type_errors)) => {
                return ToolOutcome::ValidationFailure { missing_fields, type_errors };
            }
        };

        let args = Value::Object(coerced);
        let call_future = tool.call_json(args);

        tokio::select! {
            biased;
            () = cancel.cancelled() => ToolOutcome::ExecutionError {
                message: ToolError::Cancelled.to_string(),
                classification: super::ErrorClass::Transient,
            },
            result = tokio::time::timeout(self.call_timeout, call_future) => match result {
                Err(_elapsed) => ToolOutcome::Timeout,
                Ok(Ok(output)) => ToolOutcome::Success { output },
                Ok(Err(err)) => match &err {
                    ToolError::InvalidArguments(message) => ToolOutcome::ValidationFailure {
                        missing_fields: Vec::new(),
                        type_errors: vec![message.clone()],
                    },
                    _ => ToolOutcome::ExecutionError {
                        message: err.to_string(),
                        classification: err.class(),
                    },
                },
            },
        }
    }

    /// Invoke a batch of tool calls concurrently, bounded by
    /// `max_parallel_tool_calls`. Results preserve the input order, not
    /// completion order (spec §4.2 "ordered to match the request").
    #[instrument(skip(self, calls, cancel), fields(count = calls.len()))]
    pub async fn invoke_batch(
        &self,
        calls: &[ToolCallRequest],
        max_parallel_tool_calls: usize,
        cancel: &CancelToken,
    ) -> Vec<ToolExecutionResult> {
        use futures::stream::{self, StreamExt};

        let limit = max_parallel_tool_calls.max(1);
        stream::iter(calls.iter())
            .map(|call| self.invoke(call, cancel))
            .buffered(limit)
            .collect()
            .await
    }
}

/// Validate `args` against a tool's declared JSON Schema (spec §4.2):
/// required fields must be present, fields not named in `properties` are
/// rejected unless `additionalProperties: true` is set on the schema or
/// `reject_unknown` is `false`, and scalar values are coerced between
/// string and number where the conversion is lossless. Returns the
/// (possibly coerced) argument map, or the accumulated `missing_fields`/
/// `type_errors` for a [`ToolOutcome::ValidationFailure`].
fn validate_args(
    schema: &Value,
    args: &Map<String, Value>,
    reject_unknown: bool,
) -> Result<Map<String, Value>, (Vec<String>, Vec<String>)> {
    let schema_obj = schema.as_object();
    let properties = schema_obj.and_then(|o| o.get("properties")).and_then(Value::as_object);
    let required: Vec<&str> = schema_obj
        .and_then(|o| o.get("required"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let missing_fields: Vec<String> = required
        .iter()
        .filter(|field| !args.contains_key(**field))
        .map(|field| (*field).to_owned())
        .collect();

    let allow_unknown = schema_obj
        .and_then(|o| o.get("additionalProperties"))
        .and_then(Value::as_bool)
        .unwrap_or(!reject_unknown);

    let mut type_errors = Vec::new();
    let mut coerced = Map::new();
    for (key, value) in args {
        let Some(properties) = properties else {
            coerced.insert(key.clone(), value.clone());
            continue;
        };
        match properties.get(key) {
            Some(field_schema) => match coerce_scalar(value, field_schema) {
                Ok(coerced_value) => {
                    coerced.insert(key.clone(), coerced_value);
                }
                Err(message) => type_errors.push(format!("field '{key}': {message}")),
            },
            None if allow_unknown => {
                coerced.insert(key.clone(), value.clone());
            }
            None => type_errors.push(format!("unknown field '{key}'")),
        }
    }

    if missing_fields.is_empty() && type_errors.is_empty() {
        Ok(coerced)
    } else {
        Err((missing_fields, type_errors))
    }
}

/// Coerce `value` toward the scalar type `field_schema` declares, when that
/// conversion is unambiguous and lossless. A schema with no declared
/// `"type"`, a non-scalar declared type, or a value already matching the
/// declared type passes through unchanged.
fn coerce_scalar(value: &Value, field_schema: &Value) -> Result<Value, String> {
    let Some(declared_type) = field_schema.get("type").and_then(Value::as_str) else {
        return Ok(value.clone());
    };

    match (declared_type, value) {
        ("number", Value::String(s)) => s
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| format!("expected number, got non-numeric string {s:?}")),
        ("integer", Value::String(s)) => s
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("expected integer, got non-integer string {s:?}")),
        ("integer", Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(Value::from(i)),
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => Err(format!("expected integer, got non-integral number {n}")),
            },
        },
        ("string", Value::Number(n)) => Ok(Value::String(n.to_string())),
        _ => Ok(value.clone()),
    }
}

impl fmt::Debug for ToolBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolBox")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// A shared, cloneable handle to a toolbox, passed into the turn loop controller.
pub type SharedToolBox = Arc<ToolBox>;

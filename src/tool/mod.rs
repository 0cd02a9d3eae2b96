//! Tool trait and definitions (C2), grounded on the teacher's `tool.rs`
//! (`Tool`, `DynTool`, `ToolDefinition`'s OpenAI-aligned serialization).
//!
//! # API alignment
//!
//! `ToolDefinition` serializes to `{"type": "function", "function": {...}}`,
//! matching the shape most model providers expect for function-calling.

pub mod dedupe;
pub mod loop_detector;
pub mod registry;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use registry::{BoxedTool, ToolBox};

/// A type alias for `Result<T, ToolError>`.
pub type ToolResult<T> = Result<T, ToolError>;

/// How a [`ToolError`] should be treated by the turn loop controller and the
/// history written back to [`crate::state::ToolCallHistoryEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The arguments themselves were invalid; retrying with the same
    /// arguments will fail the same way. Feeds back into the model's next
    /// turn as a correction prompt rather than a retry.
    Argument,
    /// A transient failure (timeout, I/O hiccup) eligible for retry under
    /// the controller's backoff policy.
    Transient,
    /// A permanent failure; retrying will not help.
    Permanent,
}

/// Failures a tool invocation can surface.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// No tool registered under this name.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The supplied arguments failed schema validation or deserialization.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran but failed.
    #[error("tool execution failed: {0}")]
    Execution(String),

    /// The tool did not complete within its allotted time budget.
    #[error("tool call timed out after {elapsed_ms}ms")]
    Timeout {
        /// How long the call ran before being abandoned.
        elapsed_ms: u64,
    },

    /// Execution was cancelled cooperatively before or during the call.
    #[error("tool call cancelled")]
    Cancelled,

    /// This tool's execution policy forbids autonomous invocation.
    #[error("tool '{0}' is forbidden by execution policy")]
    Forbidden(String),
}

impl ToolError {
    /// Construct an [`ToolError::InvalidArguments`].
    #[must_use]
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    /// Construct a [`ToolError::Execution`].
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Classify this error for retry/history-recording purposes.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidArguments(_) | Self::NotFound(_) | Self::Forbidden(_) => {
                ErrorClass::Argument
            }
            Self::Timeout { .. } | Self::Cancelled => ErrorClass::Transient,
            Self::Execution(_) => ErrorClass::Permanent,
        }
    }
}

/// Type of tool, aligned with the function-calling wire format. Currently
/// only `function` is supported, but this enum allows future extensibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ToolType {
    /// A function tool defined by JSON schema.
    #[default]
    Function,
}

/// Definition of a tool for model-facing function calling.
///
/// Serializes to `{"type": "function", "function": {"name", "description",
/// "parameters", "strict"?}}`.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct ToolDefinition {
    /// Name of the tool (snake_case, stable across turns).
    pub name: String,
    /// Description shown to the model to help it decide when to call this.
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
    /// Whether strict schema validation (structured outputs) is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            strict: None,
        }
    }

    /// Enable strict schema validation, forcing `additionalProperties: false`
    /// at the top level if not already present.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        if strict {
            if let Some(obj) = self.parameters.as_object_mut()
                && !obj.contains_key("additionalProperties")
            {
                obj.insert("additionalProperties".to_owned(), Value::Bool(false));
            }
        }
        self
    }
}

impl Serialize for ToolDefinition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut function = serde_json::Map::new();
        function.insert("name".to_owned(), Value::String(self.name.clone()));
        function.insert(
            "description".to_owned(),
            Value::String(self.description.clone()),
        );
        function.insert("parameters".to_owned(), self.parameters.clone());
        if let Some(strict) = self.strict {
            function.insert("strict".to_owned(), Value::Bool(strict));
        }

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry("function", &function)?;
        map.end()
    }
}

/// A tool's caching preference for the dedupe cache (C3, spec §4.3). A tool
/// may opt out of caching entirely (e.g. a call with externally-visible side
/// effects, where a second identical call must actually happen) or ask for a
/// TTL other than the cache's configured default (e.g. a lookup tool whose
/// results go stale faster, or slower, than the norm).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCachePolicy {
    /// Cache successful calls under the dedupe cache's configured default TTL.
    Default,
    /// Cache successful calls, but under this tool-specific TTL instead.
    Ttl(Duration),
    /// Never consult or populate the cache for this tool.
    Disabled,
}

impl Default for ToolCachePolicy {
    fn default() -> Self {
        Self::Default
    }
}

/// The core trait every statically-typed tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static name of the tool.
    const NAME: &'static str;
    /// Deserialized argument type.
    type Args: for<'de> Deserialize<'de> + Send;
    /// Serializable output type.
    type Output: Serialize + Send;
    /// Error type, convertible into [`ToolError`].
    type Error: Into<ToolError> + Send;

    /// Tool name; defaults to [`Tool::NAME`].
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Description shown to the model.
    fn description(&self) -> String;

    /// JSON Schema for this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// This tool's dedupe caching preference. Defaults to
    /// [`ToolCachePolicy::Default`]; override to opt out of caching or to
    /// request a custom TTL.
    fn cache_policy(&self) -> ToolCachePolicy {
        ToolCachePolicy::Default
    }

    /// Execute with typed arguments.
    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error>;

    /// Tool definition for function-calling prompts.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters_schema())
    }

    /// Call with JSON arguments, returning JSON output. The default
    /// implementation handles both a raw JSON object and a JSON-encoded
    /// string (some providers emit arguments as a string).
    async fn call_json(&self, args: Value) -> Result<Value, ToolError>
    where
        Self::Output: 'static,
    {
        let typed_args: Self::Args = match &args {
            Value::String(s) => {
                serde_json::from_str(s).map_err(|e| ToolError::invalid_args(e.to_string()))?
            }
            _ => serde_json::from_value(args)
                .map_err(|e| ToolError::invalid_args(e.to_string()))?,
        };

        let result = self.call(typed_args).await.map_err(Into::into)?;
        serde_json::to_value(result).map_err(|e| ToolError::execution(e.to_string()))
    }
}

/// Object-safe version of [`Tool`] for dynamic dispatch.
#[async_trait]
pub trait DynTool: Send + Sync {
    /// Tool name.
    fn name(&self) -> &str;
    /// Description shown to the model.
    fn description(&self) -> String;
    /// Tool definition for function-calling prompts.
    fn definition(&self) -> ToolDefinition;
    /// This tool's dedupe caching preference (spec §4.3).
    fn cache_policy(&self) -> ToolCachePolicy;
    /// Call with JSON arguments, returning JSON output.
    async fn call_json(&self, args: Value) -> Result<Value, ToolError>;
}

#[async_trait]
impl<T: Tool + 'static> DynTool for T
where
    T::Output: 'static,
{
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn description(&self) -> String {
        Tool::description(self)
    }

    fn definition(&self) -> ToolDefinition {
        Tool::definition(self)
    }

    fn cache_policy(&self) -> ToolCachePolicy {
        Tool::cache_policy(self)
    }

    async fn call_json(&self, args: Value) -> Result<Value, ToolError> {
        Tool::call_json(self, args).await
    }
}

/// Execution policy for a tool, checked before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ToolExecutionPolicy {
    /// The agent may call this tool autonomously.
    #[default]
    Auto,
    /// Forbidden: calls are rejected with [`ToolError::Forbidden`].
    Forbidden,
}

impl ToolExecutionPolicy {
    /// Whether this policy forbids execution.
    #[must_use]
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden)
    }
}

impl fmt::Display for ToolExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Forbidden => write!(f, "forbidden"),
        }
    }
}

/// Result of one tool invocation, shaped for the history/messages layer.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    /// The id correlating this result to its originating request.
    pub id: String,
    /// The tool name invoked.
    pub name: String,
    /// Success value or error.
    pub result: Result<Value, ToolError>,
}

impl ToolCallResult {
    /// Whether the call succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// A string rendering suitable for a tool-role message back to the model.
    #[must_use]
    pub fn to_string_for_llm(&self) -> String {
        match &self.result {
            Ok(value) => serde_json::to_string(value).unwrap_or_else(|_| value.to_string()),
            Err(e) => format!("Error: {e}"),
        }
    }

    /// Construct a successful result.
    #[must_use]
    pub fn success(id: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            result: Ok(value),
        }
    }

    /// Construct a failed result.
    #[must_use]
    pub fn failure(id: impl Into<String>, name: impl Into<String>, error: ToolError) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            result: Err(error),
        }
    }
}

//! Model Client Adapter (C1): a uniform streaming-chunk interface over
//! diverse LLM providers.

pub mod error;
pub mod filter;
pub mod mock;
pub mod stream;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::LlmError;
pub use stream::{ActualResponseType, StreamChunk, StreamAggregator};

use crate::cancel::CancelToken;
use crate::message::Message;
use crate::state::ToolCallRequest;
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// Options accompanying a [`ChatProvider`] call (spec §6 "Request").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Tool descriptors to offer the model, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Whether the caller prefers a streamed response.
    #[serde(default)]
    pub enable_streaming: bool,
}

impl ChatOptions {
    /// Start from defaults with the given tool descriptors attached.
    #[must_use]
    pub fn with_tools(tools: Vec<ToolDefinition>) -> Self {
        Self {
            tools: Some(tools),
            ..Self::default()
        }
    }
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated message.
    pub message: Message,
    /// Native tool calls, if the provider's function-calling path was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// Token usage, if the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Raw provider response, for diagnostics (never parsed by the engine).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl ChatResponse {
    /// Construct a minimal text-only response.
    #[must_use]
    pub fn text(message: Message) -> Self {
        Self {
            message,
            tool_calls: None,
            usage: None,
            raw: None,
        }
    }
}

/// The core trait every model-provider adapter implements.
///
/// `stream` is the primary contract (spec §4.6): a finite, single-pass,
/// non-restartable sequence of [`StreamChunk`]s, suspending on network I/O.
/// `generate` is a convenience wrapper most adapters derive from `stream` by
/// aggregating (see [`StreamAggregator`]); providers that are natively
/// non-streaming may implement `generate` directly and accept the default
/// `stream` (which wraps a single `generate` call in a one-item stream).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// The provider-qualified model identifier (e.g. "openai/gpt-4o").
    fn model_id(&self) -> &str;

    /// Whether this provider supports true token-by-token streaming.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Whether this provider has native function-calling support. When
    /// `false`, the turn loop injects a system message describing tools and
    /// parses tool-call JSON out of the assistant's text instead (spec §4.6).
    fn supports_function_calling(&self) -> bool {
        true
    }

    /// Generate a complete response.
    async fn generate(&self, messages: Vec<Message>, options: ChatOptions) -> Result<ChatResponse, LlmError>;

    /// Generate a streamed response. Default implementation synthesizes a
    /// single terminal chunk from [`ChatProvider::generate`].
    async fn stream(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
        cancel: CancelToken,
    ) -> Result<stream::ChunkStream, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Transient {
                provider: self.model_id().to_owned(),
                message: "cancelled before dispatch".to_owned(),
            });
        }
        let response = self.generate(messages, options).await?;
        let chunk = StreamChunk {
            content: response.message.content.clone(),
            is_final: true,
            finish_reason: Some("stop".to_owned()),
            function_call: response.tool_calls.and_then(|mut c| c.pop()),
            actual_response_type: ActualResponseType::Text,
            usage: response.usage,
        };
        Ok(Box::pin(futures::stream::once(async move { Ok(chunk) })))
    }
}

/// A boxed, dynamically dispatched [`ChatProvider`].
pub type BoxedChatProvider = std::sync::Arc<dyn ChatProvider>;

//! The streaming chunk type and an aggregator that folds a finished stream
//! back into a single [`super::ChatResponse`]-shaped value.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use super::error::LlmError;
use crate::state::ToolCallRequest;
use crate::usage::Usage;

/// Which wire shape a chunk actually arrived in (spec §4.6 `Chunk`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActualResponseType {
    /// Plain text, no streaming (single chunk).
    Text,
    /// Incremental token-by-token streaming.
    Streaming,
    /// A native function/tool call.
    FunctionCall,
}

/// One chunk of a model response stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Incremental text content (may be empty for pure function-call chunks).
    pub content: String,
    /// Whether this is the last chunk in the sequence.
    pub is_final: bool,
    /// Why generation stopped, present only on the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// A native function call, if this chunk carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<ToolCallRequest>,
    /// Which wire shape this chunk arrived in.
    pub actual_response_type: ActualResponseType,
    /// Token usage, typically only present on the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A finite, single-pass stream of chunks (spec §4.6: "not restartable").
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

/// Folds a sequence of [`StreamChunk`]s into one aggregated message, the way
/// `Agent::generate_response_streaming` does in the teacher crate.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    content: String,
    function_call: Option<ToolCallRequest>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

impl StreamAggregator {
    /// Start an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one chunk.
    pub fn push(&mut self, chunk: &StreamChunk) {
        self.content.push_str(&chunk.content);
        if chunk.function_call.is_some() {
            self.function_call = chunk.function_call.clone();
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        if chunk.is_final {
            self.finish_reason = chunk.finish_reason.clone();
        }
    }

    /// The accumulated text content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// The last-seen function call, if any chunk carried one.
    #[must_use]
    pub fn function_call(&self) -> Option<&ToolCallRequest> {
        self.function_call.as_ref()
    }

    /// Token usage reported by the final chunk, if any.
    #[must_use]
    pub const fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// Why generation stopped, if the final chunk reported one.
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }
}

//! Model-facing wire format (spec §6): the `{role, content}` message list
//! exchanged with [`crate::model::ChatProvider`] implementations.

use serde::{Deserialize, Serialize};

use crate::state::ToolCallRequest;

/// Role of a message in the conversation sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message: engine instructions or host-supplied guidance.
    System,
    /// User message: the goal, or host-supplied user turns.
    User,
    /// Assistant (model) message: thoughts, final output, or tool calls.
    Assistant,
    /// Tool result message, correlated to a prior assistant tool call by id.
    Tool,
}

impl Role {
    /// String form used when serializing to provider-native formats.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in the list sent to [`crate::model::ChatProvider::stream`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The message's role.
    pub role: Role,
    /// Free-text content. Empty for assistant messages that are pure tool calls.
    pub content: String,
    /// Set on [`Role::Tool`] messages to correlate with the originating call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on [`Role::Assistant`] messages produced via native function calling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl Message {
    /// Construct a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Construct a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Construct an assistant message with free text and no tool calls.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Construct an assistant message carrying native tool calls.
    #[must_use]
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }

    /// Construct a tool-result message.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

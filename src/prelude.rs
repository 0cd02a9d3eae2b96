//! Prelude module for convenient imports.
//!
//! Re-exports the most commonly used types and traits so you can get
//! started with a single `use` statement.
//!
//! ```rust
//! use agentrt::prelude::*;
//!
//! let agent = Agent::builder()
//!     .model(MockProvider::single("test-model", Message::assistant("done")))
//!     .config(AgentConfig::new())
//!     .build();
//! ```

pub use crate::agent::{Agent, AgentBuilder, AgentConfig, RunResult, StepResult, TerminalState};
pub use crate::cancel::{cancel_pair, CancelHandle, CancelToken};
pub use crate::compactor::{CompactorConfig, SummarizationMode};
pub use crate::error::{AgentError, Result};
pub use crate::events::{
    Event, EventBus, EventHandler, EventKind, MetricsSnapshot, SharedEventBus, Subscription,
};
pub use crate::message::{Message, Role};
pub use crate::model::mock::MockProvider;
pub use crate::model::{ChatOptions, ChatProvider, ChatResponse, LlmError};
pub use crate::prompt::PromptBuilderConfig;
pub use crate::reasoning::chain::{ChainConfig, ReasoningChain, ReasoningStep};
pub use crate::reasoning::tree::{ExplorationStrategy, ReasoningNode, ReasoningTree, TreeConfig};
pub use crate::reasoning::ReasoningType;
pub use crate::state::store::{BoxedStateStore, InMemoryStateStore, StateStore, StateStoreError};
pub use crate::state::{AgentState, ModelMessage, ToolCallRequest, ToolExecutionResult, ToolOutcome, Turn};
pub use crate::tool::registry::{SharedToolBox, ToolBox};
pub use crate::tool::{DynTool, Tool, ToolCachePolicy, ToolDefinition, ToolError, ToolExecutionPolicy, ToolResult};
pub use crate::usage::Usage;

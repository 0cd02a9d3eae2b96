//! Agent runtime (spec §1-2): the public entry point wiring together the
//! model adapter (C1), tool registry (C2), state store (C5), event bus (C8),
//! and the turn loop controller (C7) that drives them.

pub mod builder;
pub mod config;
mod controller;
pub mod result;

use std::sync::Arc;

use dashmap::DashSet;
use tracing::instrument;

pub use builder::AgentBuilder;
pub use config::AgentConfig;
pub use result::{RunResult, StepResult, TerminalState};

use crate::cancel::CancelToken;
use crate::error::{AgentError, Result};
use crate::events::{EventHandler, EventKind, MetricsSnapshot, SharedEventBus, Subscription};
use crate::message::Message;
use crate::model::BoxedChatProvider;
use crate::state::store::BoxedStateStore;
use crate::state::AgentState;
use crate::tool::dedupe::DedupeCache;
use crate::tool::registry::SharedToolBox;

/// A long-lived agent runtime: one model provider, one state store, one
/// event bus, shared across every `agent_id` it is asked to drive. Tools are
/// supplied per call (spec §4.1 `Run(agentId, goal, tools, cancel)`), not
/// baked in at construction — the same runtime can serve different agents
/// different toolsets.
pub struct Agent {
    pub(crate) model: BoxedChatProvider,
    pub(crate) state_store: BoxedStateStore,
    pub(crate) event_bus: SharedEventBus,
    pub(crate) dedupe: Arc<DedupeCache>,
    pub(crate) config: AgentConfig,
    pub(crate) running: Arc<DashSet<String>>,
}

/// Releases an `agent_id`'s run lock on drop, so a cancelled or panicking
/// run never permanently wedges that id.
struct RunGuard {
    running: Arc<DashSet<String>>,
    agent_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.remove(&self.agent_id);
    }
}

impl Agent {
    /// Start building an agent.
    #[must_use]
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    fn acquire_lock(&self, agent_id: &str) -> Result<RunGuard> {
        if !self.running.insert(agent_id.to_owned()) {
            return Err(AgentError::AlreadyRunning(agent_id.to_owned()));
        }
        Ok(RunGuard {
            running: Arc::clone(&self.running),
            agent_id: agent_id.to_owned(),
        })
    }

    async fn load_or_create(&self, agent_id: &str, goal: &str) -> Result<AgentState> {
        if let Some(state) = self.state_store.load(agent_id).await? {
            return Ok(state);
        }
        Ok(AgentState::new(agent_id, goal))
    }

    fn context(&self) -> controller::Context {
        controller::Context {
            model: Arc::clone(&self.model),
            state_store: Arc::clone(&self.state_store),
            event_bus: Arc::clone(&self.event_bus),
            dedupe: Arc::clone(&self.dedupe),
            config: self.config.clone(),
        }
    }

    /// Drive `agent_id` toward `goal` until a final answer, an exhausted
    /// budget, a detected loop, or cancellation. Only one run per `agent_id`
    /// may be in flight at a time; a concurrent call fails fast with
    /// [`AgentError::AlreadyRunning`].
    ///
    /// `host_system_messages`/`host_messages` let the caller fold in its own
    /// conversation context (e.g. a chat UI's prior turns) alongside the
    /// agent's own turn history; pass `&[]` for a standalone run.
    #[instrument(skip_all, fields(agent_id))]
    pub async fn run(
        &self,
        agent_id: &str,
        goal: &str,
        tools: SharedToolBox,
        host_system_messages: &[Message],
        host_messages: &[Message],
        cancel: CancelToken,
    ) -> Result<RunResult> {
        let _guard = self.acquire_lock(agent_id)?;
        let mut state = self.load_or_create(agent_id, goal).await?;

        if self.config.memoize_terminal_results {
            if let Some(result) = memoized_result(&state, goal) {
                return Ok(result);
            }
        }

        let ctx = self.context();
        Ok(controller::run(&ctx, &mut state, &tools, host_system_messages, host_messages, cancel).await)
    }

    /// Run exactly one turn for `agent_id`, loading or creating its state as
    /// [`Agent::run`] does. Useful for callers that want to interleave their
    /// own logic (e.g. UI rendering) between turns instead of driving the
    /// loop to completion.
    #[instrument(skip_all, fields(agent_id))]
    pub async fn step(
        &self,
        agent_id: &str,
        goal: &str,
        tools: SharedToolBox,
        host_system_messages: &[Message],
        host_messages: &[Message],
        cancel: CancelToken,
    ) -> Result<StepResult> {
        let _guard = self.acquire_lock(agent_id)?;
        let mut state = self.load_or_create(agent_id, goal).await?;
        let ctx = self.context();
        controller::step(&ctx, &mut state, &tools, host_system_messages, host_messages, &cancel).await
    }

    /// Fetch the persisted state for `agent_id`, if any.
    pub async fn state(&self, agent_id: &str) -> Result<Option<AgentState>> {
        Ok(self.state_store.load(agent_id).await?)
    }

    /// Delete any persisted state for `agent_id`, letting its next run start fresh.
    pub async fn reset(&self, agent_id: &str) -> Result<()> {
        self.state_store.delete(agent_id).await?;
        Ok(())
    }

    /// Subscribe to lifecycle events of the given kind, across every
    /// `agent_id` this runtime drives.
    pub fn subscribe(&self, kind: EventKind, handler: impl EventHandler + 'static) -> Subscription {
        self.event_bus.subscribe(kind, handler)
    }

    /// Remove a previously registered subscription.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.event_bus.unsubscribe(subscription);
    }

    /// A point-in-time snapshot of this runtime's aggregate metrics (spec §4.8).
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.event_bus.metrics().snapshot()
    }
}

/// If `state`'s last turn is already terminal for `goal`, build the
/// [`RunResult`] that `Agent::run` should return without touching the model
/// (spec §6 "Memoized terminal re-run").
fn memoized_result(state: &AgentState, goal: &str) -> Option<RunResult> {
    if state.goal != goal {
        return None;
    }
    let final_output = state.last_turn()?.model_message.final_output.clone()?;
    Some(RunResult {
        succeeded: true,
        final_output: Some(final_output),
        error: None,
        total_turns: state.turns.len(),
        terminal_state: TerminalState::EmitFinal,
    })
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").finish_non_exhaustive()
    }
}

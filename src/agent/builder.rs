//! Fluent construction of an [`Agent`], grounded on the teacher's
//! `AgentBuilder` (`#[derive(Default)]`, a manual `finish_non_exhaustive`
//! `Debug`, a panicking `build()` wrapping a fallible `try_build()`).

use std::sync::Arc;

use dashmap::DashSet;

use super::config::AgentConfig;
use super::Agent;
use crate::error::{AgentError, Result};
use crate::events::{EventBus, SharedEventBus};
use crate::model::{BoxedChatProvider, ChatProvider};
use crate::state::store::{BoxedStateStore, InMemoryStateStore};
use crate::tool::dedupe::DedupeCache;

/// Fluent builder for [`Agent`]. A model provider is the only required field;
/// everything else defaults to an in-memory store, a fresh event bus, and
/// [`AgentConfig::new`].
#[derive(Default)]
pub struct AgentBuilder {
    model: Option<BoxedChatProvider>,
    state_store: Option<BoxedStateStore>,
    event_bus: Option<SharedEventBus>,
    config: AgentConfig,
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder").finish_non_exhaustive()
    }
}

impl AgentBuilder {
    /// Start from all-default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model provider used to drive every turn.
    #[must_use]
    pub fn model(mut self, model: impl ChatProvider + 'static) -> Self {
        self.model = Some(Arc::new(model));
        self
    }

    /// Set the model provider from an already-boxed provider, e.g. one shared
    /// across several agents.
    #[must_use]
    pub fn model_arc(mut self, model: BoxedChatProvider) -> Self {
        self.model = Some(model);
        self
    }

    /// Override the state store (defaults to [`InMemoryStateStore`]).
    #[must_use]
    pub fn state_store(mut self, store: BoxedStateStore) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Share an existing event bus (e.g. across multiple agents) instead of
    /// letting this agent create its own.
    #[must_use]
    pub fn event_bus(mut self, event_bus: SharedEventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Replace the whole configuration in one call.
    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the agent, panicking on invalid configuration.
    ///
    /// # Panics
    /// Panics if [`AgentBuilder::try_build`] returns an error.
    #[must_use]
    pub fn build(self) -> Agent {
        self.try_build().expect("invalid agent configuration")
    }

    /// Build the agent, validating configuration and requiring a model provider.
    pub fn try_build(self) -> Result<Agent> {
        self.config.validate().map_err(AgentError::configuration)?;
        let model = self
            .model
            .ok_or_else(|| AgentError::configuration("a model provider is required"))?;

        Ok(Agent {
            model,
            state_store: self
                .state_store
                .unwrap_or_else(|| Arc::new(InMemoryStateStore::new())),
            event_bus: self.event_bus.unwrap_or_else(|| Arc::new(EventBus::new())),
            dedupe: Arc::new(DedupeCache::new(
                self.config.dedupe_staleness_threshold,
                self.config.dedupe_max_entries,
            )),
            config: self.config,
            running: Arc::new(DashSet::new()),
        })
    }
}

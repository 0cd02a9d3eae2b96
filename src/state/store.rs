//! State Store Adapter (C5): load/save/delete opaque agent state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use super::{AgentState, CURRENT_SCHEMA_VERSION};

/// Errors a [`StateStore`] implementation can surface.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// The persisted record's `schema_version` is newer than this build understands.
    #[error("unsupported schema version {found} (supported up to {supported})")]
    UnsupportedSchemaVersion {
        /// Version found on disk/in the backend.
        found: u32,
        /// Highest version this build supports.
        supported: u32,
    },

    /// The underlying backend failed (I/O, network, serialization).
    #[error("state store backend error: {0}")]
    Backend(String),

    /// No state exists for the given agent id.
    #[error("no state for agent '{0}'")]
    NotFound(String),
}

/// Load/save/delete opaque agent state, keyed by caller-chosen `agent_id`.
///
/// `save` must be effectively atomic: a concurrent `load` observes either the
/// prior snapshot or the new one, never a partial write (spec §4.7).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state for `agent_id`, if any exists.
    async fn load(&self, agent_id: &str) -> Result<Option<AgentState>, StateStoreError>;

    /// Persist `state`, keyed by its own `agent_id`. Must flush synchronously
    /// with respect to this call returning (no deferred writes across calls).
    async fn save(&self, state: &AgentState) -> Result<(), StateStoreError>;

    /// Remove any persisted state for `agent_id`.
    async fn delete(&self, agent_id: &str) -> Result<(), StateStoreError>;
}

/// A boxed, dynamically dispatched state store.
pub type BoxedStateStore = Arc<dyn StateStore>;

/// Validate a loaded record's schema version before handing it back to the caller.
fn check_schema_version(state: AgentState) -> Result<AgentState, StateStoreError> {
    if state.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(StateStoreError::UnsupportedSchemaVersion {
            found: state.schema_version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    Ok(state)
}

/// An in-process, non-persistent [`StateStore`] backed by a `RwLock<HashMap>`.
///
/// Useful for tests and for hosts that only need state to survive within a
/// single process. `save` replaces the whole entry under the write lock, so
/// readers never observe a torn write.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, AgentState>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, agent_id: &str) -> Result<Option<AgentState>, StateStoreError> {
        let guard = self.states.read();
        match guard.get(agent_id).cloned() {
            Some(state) => check_schema_version(state).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, state: &AgentState) -> Result<(), StateStoreError> {
        self.states
            .write()
            .insert(state.agent_id.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, agent_id: &str) -> Result<(), StateStoreError> {
        self.states.write().remove(agent_id);
        Ok(())
    }
}

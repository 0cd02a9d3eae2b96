#![cfg_attr(docsrs, feature(doc_cfg))]
//! `agentrt` is a Rust library for running autonomous LLM agents: a turn
//! loop that alternates model calls and tool dispatch toward a goal, with
//! pluggable model providers, tool registries, state stores, and reasoning
//! strategies.

pub mod agent;
pub mod cancel;
pub mod compactor;
pub mod error;
pub mod events;
pub mod message;
pub mod model;
pub mod prelude;
pub mod prompt;
pub mod reasoning;
pub mod state;
pub mod tool;
pub mod usage;

pub use agent::{Agent, AgentBuilder, AgentConfig, RunResult, StepResult, TerminalState};
pub use error::{AgentError, Result};

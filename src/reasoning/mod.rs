//! Reasoning Engine (C6): linear Chain-of-Thought and branching
//! Tree-of-Thoughts strategies, selected by [`ReasoningType`].

pub mod chain;
pub mod tree;

use serde::{Deserialize, Serialize};

/// Which reasoning strategy the turn loop applies before/alongside tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningType {
    /// No intermediate reasoning step; the model is asked directly.
    #[default]
    None,
    /// Linear Chain-of-Thought (see [`chain`]).
    ChainOfThought,
    /// Branching Tree-of-Thoughts search (see [`tree`]).
    TreeOfThoughts,
}

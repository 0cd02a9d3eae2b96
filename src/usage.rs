//! Token usage tracking for model calls.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Token usage reported by a single model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt/input.
    #[serde(default, alias = "prompt_tokens")]
    pub input_tokens: u32,
    /// Tokens in the completion/output.
    #[serde(default, alias = "completion_tokens")]
    pub output_tokens: u32,
    /// Total tokens (defaults to `input_tokens + output_tokens` if unset by the provider).
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Create a usage record, deriving `total_tokens`.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// The zero usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        }
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

//! Loop Detector (C4): watches the bounded tool-call history ring for signs
//! the agent is stuck — either repeating the same no-op call pair back to
//! back, or piling up consecutive tool failures (spec §4.4).

use crate::state::{ToolCallHistoryEntry, ToolOutcomeClass};

/// Why the loop detector tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// The same `(tool_name, args_hash)` pair repeated at least twice,
    /// back to back, with no intervening different call.
    RepeatedNoOp,
    /// At least `consecutive_failure_threshold` tool calls in a row failed.
    ConsecutiveFailures,
}

impl LoopKind {
    /// A stable string for [`crate::error::AgentError::loop_detected`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RepeatedNoOp => "repeated_no_op",
            Self::ConsecutiveFailures => "consecutive_failures",
        }
    }
}

/// Tunables for [`detect`].
#[derive(Debug, Clone, Copy)]
pub struct LoopDetectorConfig {
    /// How many back-to-back repetitions of the same call constitute a loop.
    /// Spec default: 2 (i.e. the call plus one repeat).
    pub repeat_threshold: usize,
    /// How many consecutive failures (any tool) constitute a loop.
    pub consecutive_failure_threshold: usize,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            repeat_threshold: 2,
            consecutive_failure_threshold: 3,
        }
    }
}

/// Scan the tail of the tool-call history ring for a loop condition.
/// Returns `None` if nothing is wrong.
#[must_use]
pub fn detect(history: &[ToolCallHistoryEntry], config: LoopDetectorConfig) -> Option<LoopKind> {
    if detect_repeated_no_op(history, config.repeat_threshold) {
        return Some(LoopKind::RepeatedNoOp);
    }
    if detect_consecutive_failures(history, config.consecutive_failure_threshold) {
        return Some(LoopKind::ConsecutiveFailures);
    }
    None
}

fn detect_repeated_no_op(history: &[ToolCallHistoryEntry], threshold: usize) -> bool {
    if threshold < 2 || history.len() < threshold {
        return false;
    }
    let tail = &history[history.len() - threshold..];
    let (first_name, first_hash) = (tail[0].tool_name.as_str(), tail[0].args_hash);
    tail.iter()
        .all(|entry| entry.tool_name == first_name && entry.args_hash == first_hash)
}

fn detect_consecutive_failures(history: &[ToolCallHistoryEntry], threshold: usize) -> bool {
    if threshold == 0 {
        return false;
    }
    history
        .iter()
        .rev()
        .take(threshold)
        .all(|entry| entry.outcome_class == ToolOutcomeClass::Failure)
        && history.len() >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(name: &str, hash: u64, class: ToolOutcomeClass) -> ToolCallHistoryEntry {
        ToolCallHistoryEntry {
            tool_name: name.to_owned(),
            args_hash: hash,
            outcome_class: class,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn no_loop_on_empty_or_short_history() {
        let config = LoopDetectorConfig::default();
        assert!(detect(&[], config).is_none());
        assert!(detect(&[entry("a", 1, ToolOutcomeClass::Success)], config).is_none());
    }

    #[test]
    fn detects_repeated_no_op_pair() {
        let config = LoopDetectorConfig::default();
        let history = vec![
            entry("search", 1, ToolOutcomeClass::Success),
            entry("search", 42, ToolOutcomeClass::Success),
            entry("search", 42, ToolOutcomeClass::Success),
        ];
        assert_eq!(detect(&history, config), Some(LoopKind::RepeatedNoOp));
    }

    #[test]
    fn different_args_do_not_trip_detector() {
        let config = LoopDetectorConfig::default();
        let history = vec![
            entry("search", 1, ToolOutcomeClass::Success),
            entry("search", 2, ToolOutcomeClass::Success),
        ];
        assert!(detect(&history, config).is_none());
    }

    #[test]
    fn detects_consecutive_failures() {
        let config = LoopDetectorConfig::default();
        let history = vec![
            entry("a", 1, ToolOutcomeClass::Failure),
            entry("b", 2, ToolOutcomeClass::Failure),
            entry("c", 3, ToolOutcomeClass::Failure),
        ];
        assert_eq!(detect(&history, config), Some(LoopKind::ConsecutiveFailures));
    }

    #[test]
    fn one_success_resets_failure_streak() {
        let config = LoopDetectorConfig::default();
        let history = vec![
            entry("a", 1, ToolOutcomeClass::Failure),
            entry("b", 2, ToolOutcomeClass::Success),
            entry("c", 3, ToolOutcomeClass::Failure),
            entry("d", 4, ToolOutcomeClass::Failure),
        ];
        assert!(detect(&history, config).is_none());
    }
}

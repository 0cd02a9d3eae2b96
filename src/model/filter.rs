//! Streaming Chunk Filter (C9): strips internal scaffolding — tool-call JSON,
//! reasoning-scaffold keys, and fenced code blocks wrapping tool-call JSON —
//! from the text forwarded to [`crate::events::Event::LlmChunkReceived`]
//! subscribers. Implemented as a small state machine over the concatenating
//! buffer, per spec §4.9.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Ordinary prose; every character is visible.
    Prose,
    /// Just saw a run of backticks at the start of a fence; buffering the
    /// info-string up to the newline to decide whether it's scaffold.
    FenceInfo,
    /// Inside a fenced block; `scaffold` decides whether its content (and the
    /// closing fence) is suppressed.
    InFence { scaffold: bool },
    /// Inside a bare (non-fenced) JSON object suspected of being tool-call
    /// scaffolding, tracked by brace depth and JSON-string-aware scanning.
    InRawJson { depth: u32, in_string: bool, escape: bool },
}

/// Incremental filter: feed it text as it streams in, drain the visible
/// portion after each call. One filter instance is scoped to one model turn.
#[derive(Debug)]
pub struct ChunkFilter {
    state: State,
    fence_info: String,
    at_line_start: bool,
    backtick_run: u8,
}

impl Default for ChunkFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkFilter {
    /// Start a fresh filter at the beginning of a turn's text.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Prose,
            fence_info: String::new(),
            at_line_start: true,
            backtick_run: 0,
        }
    }

    /// Feed incoming text, returning the portion that should be forwarded to
    /// subscribers. Scaffold regions are dropped entirely (not replaced by an
    /// elision marker — unlike the Prompt Builder's truncation, this is meant
    /// to be invisible to the end user watching the stream).
    pub fn push(&mut self, input: &str) -> String {
        let mut visible = String::new();
        for ch in input.chars() {
            self.step(ch, &mut visible);
        }
        visible
    }

    fn step(&mut self, ch: char, visible: &mut String) {
        match self.state {
            State::Prose => self.step_prose(ch, visible),
            State::FenceInfo => self.step_fence_info(ch, visible),
            State::InFence { scaffold } => self.step_in_fence(ch, scaffold, visible),
            State::InRawJson {
                depth,
                in_string,
                escape,
            } => self.step_in_raw_json(ch, depth, in_string, escape, visible),
        }
    }

    fn step_prose(&mut self, ch: char, visible: &mut String) {
        if ch == '`' {
            self.backtick_run += 1;
            if self.backtick_run == 3 {
                self.backtick_run = 0;
                self.fence_info.clear();
                self.state = State::FenceInfo;
                return;
            }
            // Partial backtick run; hold off emitting until we know it isn't a fence.
            return;
        }
        if self.backtick_run > 0 {
            // Not actually a fence opener; flush the held backticks as prose.
            for _ in 0..self.backtick_run {
                visible.push('`');
            }
            self.backtick_run = 0;
        }

        if ch == '{' && self.at_line_start {
            self.state = State::InRawJson {
                depth: 1,
                in_string: false,
                escape: false,
            };
            self.at_line_start = false;
            return;
        }

        self.at_line_start = ch == '\n';
        visible.push(ch);
    }

    fn step_fence_info(&mut self, ch: char, visible: &mut String) {
        if ch == '\n' {
            let scaffold = is_scaffold_fence(&self.fence_info);
            self.state = State::InFence { scaffold };
            if !scaffold {
                visible.push_str("```");
                visible.push_str(&self.fence_info);
                visible.push('\n');
            }
            return;
        }
        self.fence_info.push(ch);
    }

    fn step_in_fence(&mut self, ch: char, scaffold: bool, visible: &mut String) {
        if ch == '`' {
            self.backtick_run += 1;
            if self.backtick_run == 3 {
                self.backtick_run = 0;
                self.state = State::Prose;
                self.at_line_start = false;
                if !scaffold {
                    visible.push_str("```");
                }
                return;
            }
            return;
        }
        if self.backtick_run > 0 {
            if !scaffold {
                for _ in 0..self.backtick_run {
                    visible.push('`');
                }
            }
            self.backtick_run = 0;
        }
        if !scaffold {
            visible.push(ch);
        }
    }

    fn step_in_raw_json(
        &mut self,
        ch: char,
        mut depth: u32,
        mut in_string: bool,
        escape: bool,
        visible: &mut String,
    ) {
        let mut next_escape = false;

        if in_string {
            if escape {
                // Escaped character inside a string; doesn't affect depth or quoting.
            } else if ch == '\\' {
                next_escape = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else {
            match ch {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        self.state = State::Prose;
                        self.at_line_start = ch == '\n';
                        let _ = visible; // scaffold content is always suppressed
                        return;
                    }
                }
                _ => {}
            }
        }

        self.state = State::InRawJson {
            depth,
            in_string,
            escape: next_escape,
        };
        let _ = visible; // scaffold content is always suppressed
    }
}

fn is_scaffold_fence(info: &str) -> bool {
    let info = info.trim().to_lowercase();
    info == "json" || info.contains("tool") || info.contains("function")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_plain_prose() {
        let mut filter = ChunkFilter::new();
        assert_eq!(filter.push("Hello, world!"), "Hello, world!");
    }

    #[test]
    fn suppresses_json_fence() {
        let mut filter = ChunkFilter::new();
        let out = filter.push("Before\n```json\n{\"name\": \"x\"}\n```\nAfter");
        assert_eq!(out, "Before\n\nAfter");
    }

    #[test]
    fn keeps_non_json_fence() {
        let mut filter = ChunkFilter::new();
        let out = filter.push("```rust\nfn x() {}\n```\n");
        assert!(out.contains("fn x() {}"));
    }

    #[test]
    fn suppresses_bare_json_at_line_start() {
        let mut filter = ChunkFilter::new();
        let out = filter.push("{\"tool_name\": \"calc\", \"args\": {\"a\": 1}}\nDone");
        assert_eq!(out, "\nDone");
    }
}

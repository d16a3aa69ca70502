//! Claude Code adapter.
//!
//! Claude Code asks for permission before running tools:
//!
//! ```text
//! Claude wants to use Bash
//!   Command: ls -la /tmp
//! Allow? (y/n)
//! ```
//!
//! and renders option menus as numbered lists:
//!
//! ```text
//! ❯ 1. Yes
//!   2. Yes, and don't ask again
//!   3. No
//! ```
//!
//! Prompts frequently end without a trailing newline, which is why the
//! detector matches against the window tail rather than completed lines.

use regex::Regex;

use atlasbridge_types::PromptType;

use crate::adapter::{compile, ToolAdapter};

pub struct ClaudeAdapter {
    patterns: Vec<(PromptType, Regex)>,
}

impl ClaudeAdapter {
    pub fn new() -> Self {
        // Ordered: menus before yes/no, since a menu tail also contains
        // question marks; most specific first.
        let patterns = vec![
            (
                PromptType::MultipleChoice,
                compile(r"(?m)^\s*❯?\s*1[.)]\s+\S[^\n]*\n\s*❯?\s*2[.)]\s+\S").unwrap(),
            ),
            (
                PromptType::YesNo,
                compile(r"(?i)Allow\?\s*(?:\(y/n\)|\[y/n\])?\s*$").unwrap(),
            ),
            (
                PromptType::YesNo,
                compile(r"(?i)(?:\[y/n\]|\(y/n\)|\[y/N\]|\(yes/no\))\s*:?\s*$").unwrap(),
            ),
            (
                PromptType::ConfirmEnter,
                compile(r"(?i)press\s+enter\s+to\s+continue\s*(?:\.{3})?\s*$").unwrap(),
            ),
        ];
        Self { patterns }
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolAdapter for ClaudeAdapter {
    fn name(&self) -> &str {
        "claude"
    }

    fn prompt_patterns(&self) -> &[(PromptType, Regex)] {
        &self.patterns
    }

    fn tail_window(&self) -> usize {
        1024
    }
}

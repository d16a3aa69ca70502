//! OpenAI Codex CLI adapter.
//!
//! Codex approval prompts look like:
//!
//! ```text
//! codex wants to run: rm -rf build/
//! Approve? [y/n]
//! ```
//!
//! and selection prompts use parenthesized numbers:
//!
//! ```text
//! Choose an option:
//!   1) Run the command
//!   2) Edit the command
//!   3) Cancel
//! ```

use regex::Regex;

use atlasbridge_types::PromptType;

use crate::adapter::{compile, ToolAdapter};

pub struct CodexAdapter {
    patterns: Vec<(PromptType, Regex)>,
}

impl CodexAdapter {
    pub fn new() -> Self {
        let patterns = vec![
            (
                PromptType::MultipleChoice,
                compile(r"(?m)^\s*1\)\s+\S[^\n]*\n\s*2\)\s+\S").unwrap(),
            ),
            (
                PromptType::YesNo,
                compile(r"(?i)Approve\?\s*(?:\[y/n\]|\(y/n\))?\s*$").unwrap(),
            ),
            (
                PromptType::YesNo,
                compile(r"(?i)(?:\[y/n\]|\(y/n\))\s*$").unwrap(),
            ),
            (
                PromptType::ConfirmEnter,
                compile(r"(?i)press\s+(?:enter|return)\s+to\s+continue\s*$").unwrap(),
            ),
        ];
        Self { patterns }
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolAdapter for CodexAdapter {
    fn name(&self) -> &str {
        "codex"
    }

    fn prompt_patterns(&self) -> &[(PromptType, Regex)] {
        &self.patterns
    }

    fn tail_window(&self) -> usize {
        768
    }
}

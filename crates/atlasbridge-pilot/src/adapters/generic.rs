//! Configurable adapter for tools without a dedicated one.
//!
//! Ships with defaults covering the common interactive shapes (y/n
//! brackets, numbered menus, press-enter pauses, trailing-colon questions)
//! and accepts custom `(prompt type, pattern)` pairs from configuration.

use regex::Regex;

use atlasbridge_types::{BridgeError, PromptType};

use crate::adapter::{compile, ToolAdapter};

pub struct GenericAdapter {
    patterns: Vec<(PromptType, Regex)>,
}

impl GenericAdapter {
    /// Build from custom patterns, ordered as given.
    pub fn new(custom: &[(PromptType, String)]) -> Result<Self, BridgeError> {
        let mut patterns = Vec::with_capacity(custom.len());
        for (prompt_type, pattern) in custom {
            let regex = compile(pattern).map_err(|e| {
                BridgeError::ConfigError(format!("bad adapter pattern {pattern:?}: {e}"))
            })?;
            patterns.push((*prompt_type, regex));
        }
        Ok(Self { patterns })
    }

    /// The built-in default pattern set.
    pub fn with_defaults() -> Self {
        let patterns = vec![
            (
                PromptType::MultipleChoice,
                compile(r"(?m)^\s*[❯>]?\s*1[.)]\s+\S[^\n]*\n\s*[❯>]?\s*2[.)]\s+\S").unwrap(),
            ),
            (
                PromptType::YesNo,
                compile(r"(?i)(?:\[y/n\]|\(y/n\)|\[yes/no\]|\(yes/no\))\s*:?\s*$").unwrap(),
            ),
            (
                PromptType::ConfirmEnter,
                compile(r"(?i)press\s+(?:enter|return|any\s+key)\s+to\s+continue\s*(?:\.{3})?\s*$")
                    .unwrap(),
            ),
        ];
        Self { patterns }
    }
}

impl ToolAdapter for GenericAdapter {
    fn name(&self) -> &str {
        "generic"
    }

    fn prompt_patterns(&self) -> &[(PromptType, Regex)] {
        &self.patterns
    }
}

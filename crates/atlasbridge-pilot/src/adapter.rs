//! Tool adapter contract: per-tool prompt patterns and reply encoding.
//!
//! Each supervised tool (Claude Code, Codex, arbitrary CLIs) renders its
//! prompts differently. An adapter supplies the ordered regex list the
//! detector's pattern signal matches against, and encodes accepted reply
//! values into the exact bytes the tool expects on stdin.

use regex::Regex;
use thiserror::Error;

use atlasbridge_types::PromptType;

/// Errors from reply encoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// A reply that would silently accept a default. A yes/no prompt must
    /// be answered with an explicit value; blank answers are only ever
    /// produced by an explicit policy rule upstream.
    #[error("unsafe default: {0}")]
    UnsafeDefault(String),

    /// The value does not fit the prompt type (e.g. "maybe" for yes/no).
    #[error("invalid reply value: {0}")]
    InvalidValue(String),
}

/// Capability set every tool adapter exposes to the core.
pub trait ToolAdapter: Send + Sync {
    /// Adapter name, also the `tool` field recorded on sessions.
    fn name(&self) -> &str;

    /// Ordered `(prompt type, pattern)` list. First match wins. Patterns
    /// are compiled once at construction; the `regex` crate guarantees
    /// linear-time matching, and the detector enforces a wall-clock budget
    /// on top.
    fn prompt_patterns(&self) -> &[(PromptType, Regex)];

    /// How many bytes of the window tail the pattern signal matches
    /// against.
    fn tail_window(&self) -> usize {
        512
    }

    /// Encode a reply value into the bytes injected into the tool's stdin.
    fn encode(&self, prompt_type: PromptType, value: &str) -> Result<Vec<u8>, EncodeError> {
        encode_default(prompt_type, value)
    }
}

/// The default reply encoding shared by the built-in adapters.
///
/// - yes/no: explicit `y\r` or `n\r`; blank values are rejected so a
///   missing reply can never ride the tool's own default
/// - confirm-enter: bare `\r`; any other value is an error
/// - multiple choice: 1-based option number plus `\r`
/// - free text: the text plus `\r`, embedded newlines collapsed to spaces
pub fn encode_default(prompt_type: PromptType, value: &str) -> Result<Vec<u8>, EncodeError> {
    match prompt_type {
        PromptType::YesNo => match value.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => Ok(b"y\r".to_vec()),
            "n" | "no" => Ok(b"n\r".to_vec()),
            "" => Err(EncodeError::UnsafeDefault(
                "yes/no reply must be explicit".into(),
            )),
            other => Err(EncodeError::InvalidValue(format!(
                "{other:?} is not a yes/no answer"
            ))),
        },
        PromptType::ConfirmEnter => {
            if value.trim().is_empty() {
                Ok(b"\r".to_vec())
            } else {
                Err(EncodeError::InvalidValue(format!(
                    "confirm-enter takes no value, got {value:?}"
                )))
            }
        }
        PromptType::MultipleChoice => {
            let trimmed = value.trim();
            if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
                let mut bytes = trimmed.as_bytes().to_vec();
                bytes.push(b'\r');
                Ok(bytes)
            } else {
                Err(EncodeError::InvalidValue(format!(
                    "{trimmed:?} is not an option number"
                )))
            }
        }
        PromptType::FreeText => {
            let flattened = value.replace(['\n', '\r'], " ");
            let mut bytes = flattened.into_bytes();
            bytes.push(b'\r');
            Ok(bytes)
        }
    }
}

/// Compile a pattern with a bounded automaton size so a pathological
/// pattern cannot blow up memory at construction time.
pub(crate) fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    regex::RegexBuilder::new(pattern)
        .size_limit(1 << 20)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_encoding() {
        assert_eq!(encode_default(PromptType::YesNo, "y").unwrap(), b"y\r");
        assert_eq!(encode_default(PromptType::YesNo, "YES").unwrap(), b"y\r");
        assert_eq!(encode_default(PromptType::YesNo, "n").unwrap(), b"n\r");
        assert_eq!(encode_default(PromptType::YesNo, " no ").unwrap(), b"n\r");
    }

    #[test]
    fn yes_no_blank_is_unsafe() {
        assert!(matches!(
            encode_default(PromptType::YesNo, ""),
            Err(EncodeError::UnsafeDefault(_))
        ));
    }

    #[test]
    fn yes_no_garbage_rejected() {
        assert!(matches!(
            encode_default(PromptType::YesNo, "maybe"),
            Err(EncodeError::InvalidValue(_))
        ));
    }

    #[test]
    fn confirm_enter_is_bare_return() {
        assert_eq!(encode_default(PromptType::ConfirmEnter, "").unwrap(), b"\r");
        assert!(encode_default(PromptType::ConfirmEnter, "ok").is_err());
    }

    #[test]
    fn multiple_choice_takes_index() {
        assert_eq!(encode_default(PromptType::MultipleChoice, "2").unwrap(), b"2\r");
        assert_eq!(encode_default(PromptType::MultipleChoice, "12").unwrap(), b"12\r");
        assert!(encode_default(PromptType::MultipleChoice, "two").is_err());
        assert!(encode_default(PromptType::MultipleChoice, "").is_err());
    }

    #[test]
    fn free_text_flattens_newlines() {
        assert_eq!(
            encode_default(PromptType::FreeText, "hello\nworld").unwrap(),
            b"hello world\r"
        );
        assert_eq!(encode_default(PromptType::FreeText, "").unwrap(), b"\r");
    }

    #[test]
    fn compile_bounds_pattern_size() {
        assert!(compile(r"Continue\? \[y/N\]").is_ok());
        // A pattern whose compiled automaton exceeds the limit is rejected.
        assert!(compile("(?:a{1000}){1000}").is_err());
    }
}

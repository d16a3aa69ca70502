//! Tri-signal prompt detection.
//!
//! The detector classifies the child's recent output into at most one
//! prompt event per analysis call, using three signals in priority order:
//!
//! 1. **Pattern** (high confidence): an adapter regex matches the
//!    ANSI-stripped window tail.
//! 2. **Blocked read** (medium): the PTY reports the child blocked on a
//!    read while the output ends mid-line.
//! 3. **Silence** (low): no output for `silence_ms` after at least one
//!    byte in the current turn.
//!
//! After any injection the detector is muted for `post_inject_suppress_ms`
//! so the child's echo of the injected reply cannot re-trigger detection.
//! The pattern layer has a hard 5 ms budget; when exceeded it is skipped
//! for that call and the silence layer still runs.

use std::time::{Duration, Instant};

use tracing::warn;

use atlasbridge_types::{Confidence, PromptType, Signal};

use crate::adapter::ToolAdapter;
use crate::window::SlidingWindow;

/// Per-call wall-clock budget for the pattern layer.
const PATTERN_BUDGET: Duration = Duration::from_millis(5);

/// A prompt the detector recognized, before it becomes a stored event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub prompt_type: PromptType,
    pub confidence: Confidence,
    pub signal: Signal,
    pub excerpt: String,
    /// Extracted menu options for multiple-choice prompts.
    pub options: Vec<String>,
}

/// Stateful detector over one session's output stream.
pub struct Detector {
    window: SlidingWindow,
    silence: Duration,
    suppress: Duration,
    /// When the most recent injection finished (drives suppression).
    last_injection_end: Option<Instant>,
    /// When the most recent output byte arrived.
    last_output: Option<Instant>,
    /// Total bytes ever fed; used to emit one detection per output turn.
    bytes_seen: u64,
    /// `bytes_seen` at the moment of the last emitted detection.
    emitted_at: u64,
}

impl Detector {
    pub fn new(silence_ms: u64, suppress_ms: u64) -> Self {
        Self {
            window: SlidingWindow::default(),
            silence: Duration::from_millis(silence_ms),
            suppress: Duration::from_millis(suppress_ms),
            last_injection_end: None,
            last_output: None,
            bytes_seen: 0,
            emitted_at: 0,
        }
    }

    /// Feed raw output bytes observed at `now`.
    pub fn feed(&mut self, data: &[u8], now: Instant) {
        if data.is_empty() {
            return;
        }
        self.window.extend(data);
        self.bytes_seen += data.len() as u64;
        self.last_output = Some(now);
    }

    /// Record that an injection finished at `now`, starting the
    /// suppression window and a new output turn.
    pub fn observe_injection(&mut self, now: Instant) {
        self.last_injection_end = Some(now);
        // The reply's echo belongs to the next turn; whatever was in the
        // old one is settled.
        self.emitted_at = self.bytes_seen;
    }

    /// Whether the post-injection mute is active at `now`.
    pub fn suppressed(&self, now: Instant) -> bool {
        self.last_injection_end
            .is_some_and(|end| now.duration_since(end) < self.suppress)
    }

    /// Full analysis: pattern, then blocked-read, then silence.
    pub fn check(
        &mut self,
        adapter: &dyn ToolAdapter,
        blocked_read: bool,
        now: Instant,
    ) -> Option<Detection> {
        if self.suppressed(now) || self.bytes_seen == self.emitted_at {
            return None;
        }

        if let Some(detection) = self.pattern_signal(adapter) {
            self.emitted_at = self.bytes_seen;
            return Some(detection);
        }

        if blocked_read && !self.window.ends_with_newline() {
            let line = self.window.trailing_line();
            if !line.trim().is_empty() {
                self.emitted_at = self.bytes_seen;
                return Some(Detection {
                    prompt_type: PromptType::FreeText,
                    confidence: Confidence::Medium,
                    signal: Signal::BlockedRead,
                    excerpt: line.trim_end().to_string(),
                    options: Vec::new(),
                });
            }
        }

        self.silence_signal(now)
    }

    /// Silence-only analysis, used by the stall watchdog tick.
    pub fn check_silence(&mut self, now: Instant) -> Option<Detection> {
        if self.suppressed(now) || self.bytes_seen == self.emitted_at {
            return None;
        }
        self.silence_signal(now)
    }

    fn silence_signal(&mut self, now: Instant) -> Option<Detection> {
        let last = self.last_output?;
        if now.duration_since(last) < self.silence {
            return None;
        }
        let line = self.window.trailing_line();
        let excerpt = if line.trim().is_empty() {
            last_nonempty_line(&self.window.tail_text(self.window.len()))
        } else {
            line.trim_end().to_string()
        };
        self.emitted_at = self.bytes_seen;
        Some(Detection {
            prompt_type: PromptType::FreeText,
            confidence: Confidence::Low,
            signal: Signal::Silence,
            excerpt,
            options: Vec::new(),
        })
    }

    fn pattern_signal(&self, adapter: &dyn ToolAdapter) -> Option<Detection> {
        let tail = self.window.tail_text(adapter.tail_window());
        if tail.is_empty() {
            return None;
        }

        let started = Instant::now();
        for (prompt_type, regex) in adapter.prompt_patterns() {
            if started.elapsed() > PATTERN_BUDGET {
                warn!(
                    adapter = adapter.name(),
                    "pattern layer exceeded budget, skipping for this call"
                );
                return None;
            }
            if let Some(found) = regex.find(&tail) {
                let excerpt = excerpt_around(&tail, found.start(), found.end());
                let options = if *prompt_type == PromptType::MultipleChoice {
                    extract_options(&tail)
                } else {
                    Vec::new()
                };
                return Some(Detection {
                    prompt_type: *prompt_type,
                    confidence: Confidence::High,
                    signal: Signal::Pattern,
                    excerpt,
                    options,
                });
            }
        }
        None
    }
}

/// The matched region widened to full lines, trimmed.
fn excerpt_around(tail: &str, start: usize, end: usize) -> String {
    let line_start = tail[..start].rfind('\n').map_or(0, |p| p + 1);
    let line_end = tail[end..].find('\n').map_or(tail.len(), |p| end + p);
    tail[line_start..line_end].trim_end().to_string()
}

/// Parse `1. option` / `2) option` lines out of a menu tail.
fn extract_options(tail: &str) -> Vec<String> {
    let mut options: Vec<(u32, String)> = Vec::new();
    for line in tail.lines() {
        let cleaned = line.trim_start_matches(['❯', '>', ' ', '\t']);
        let Some(dot) = cleaned.find(['.', ')']) else {
            continue;
        };
        let (number, rest) = cleaned.split_at(dot);
        let Ok(n) = number.trim().parse::<u32>() else {
            continue;
        };
        let text = rest[1..].trim();
        if text.is_empty() {
            continue;
        }
        // Menus restart at 1; keep the latest run.
        if n == 1 {
            options.clear();
        }
        if options.last().map_or(n == 1, |(prev, _)| n == prev + 1) {
            options.push((n, text.to_string()));
        }
    }
    options.into_iter().map(|(_, text)| text).collect()
}

fn last_nonempty_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim_end()
        .to_string()
}

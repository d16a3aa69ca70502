//! PTY-based supervisor for relaying child-program prompts.
//!
//! Spawns an interactive CLI program in a pseudo-terminal, watches its
//! output for moments where it is blocked waiting for human input, and
//! injects replies delivered through the router back into its stdin.
//!
//! # Architecture
//!
//! - [`pty::PtySession`]: manages the child process in a pseudo-terminal
//! - [`window::SlidingWindow`]: bounded byte window over recent output
//! - [`ansi`]: ANSI escape sequence stripping
//! - [`detector::Detector`]: tri-signal prompt recognition with an
//!   echo-suppression window
//! - [`adapter::ToolAdapter`]: per-tool prompt patterns and reply encoding
//! - [`adapters`]: built-in adapters (Claude Code, Codex, generic)
//! - [`supervisor`]: the four cooperating tasks (output reader, input
//!   relay, stall watchdog, reply injector)
//! - [`termios_guard::RawModeGuard`]: restores terminal modes on all exits

pub mod adapter;
pub mod adapters;
pub mod ansi;
pub mod detector;
pub mod pty;
pub mod supervisor;
pub mod termios_guard;
pub mod window;

pub use adapter::{EncodeError, ToolAdapter};
pub use detector::{Detection, Detector};
pub use pty::PtySession;
pub use supervisor::{run_supervised, SupervisorConfig, SupervisorHooks};
pub use window::SlidingWindow;

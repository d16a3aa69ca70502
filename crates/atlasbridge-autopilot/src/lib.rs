//! Autopilot: policy-driven replies without the human step.
//!
//! The engine sits between the router's forward path and the channel. In
//! **assist** mode, matched `auto_reply` rules become suggestions with an
//! override window; in **full** mode they inject immediately with a
//! non-blocking notification. `deny` rules inject their synthetic negative
//! at once in both modes. The kill switch pauses everything and persists
//! across restarts. Every decision lands in a hash-chained JSONL trace,
//! a separate chain from the audit log.

pub mod engine;
pub mod trace;

pub use engine::{AutopilotEngine, AutopilotState, Disposition};
pub use trace::DecisionTrace;

//! User policy: schema, validation, migration, and the deterministic
//! first-match-wins evaluator.
//!
//! A policy is an ordered list of rules loaded from `policy.yaml`. Each
//! rule matches on tool, session label, prompt type, a confidence range,
//! and text criteria, and carries one action: `auto_reply`, `deny`,
//! `require_human`, or `notify_only`. Evaluation tries rules in order and
//! stops at the first match; no match falls back to the configured
//! defaults. The policy's content hash is pinned into every decision so
//! traces stay attributable across edits.

pub mod evaluator;
pub mod migrate;
pub mod schema;

pub use evaluator::{evaluate, PromptFacts};
pub use migrate::migrate_v0_to_v1;
pub use schema::{
    ActionSpec, CompiledPolicy, FallbackAction, MatchSpec, Policy, PolicyAction, PolicyDecision,
    PolicyRule, RiskLevel,
};

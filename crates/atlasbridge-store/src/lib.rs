//! Durable prompt storage and the atomic decision guard.
//!
//! The store is the sole arbiter of "has this prompt already been decided".
//! Every reply -- human, autopilot, or synthetic -- commits through
//! [`Database::decide_prompt`], a single conditional UPDATE whose affected
//! row count decides the race. All other state transitions go through
//! [`Database::transition`], which enforces the lifecycle predicate table.

mod store;

pub use store::{CommitResult, Database, StoreHandle};

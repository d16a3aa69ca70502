//! AtlasBridge -- human-in-the-loop prompt relay for interactive CLI agents.
//!
//! This facade crate re-exports the workspace members so integration tests
//! and embedders can depend on a single crate. The actual functionality
//! lives in the `atlasbridge-*` member crates.

pub use atlasbridge_autopilot as autopilot;
pub use atlasbridge_channel as channel;
pub use atlasbridge_daemon as daemon;
pub use atlasbridge_ledger as ledger;
pub use atlasbridge_pilot as pilot;
pub use atlasbridge_policy as policy;
pub use atlasbridge_store as store;
pub use atlasbridge_types as types;

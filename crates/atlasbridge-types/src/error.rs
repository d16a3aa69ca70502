//! Error types shared across all AtlasBridge crates.

/// Errors that can occur across the AtlasBridge runtime.
///
/// Each variant corresponds to a different subsystem: the prompt store,
/// audit ledger, PTY supervisor, messaging channel, policy engine, or
/// configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Prompt store (SQLite) read/write failure.
    #[error("store error: {0}")]
    StoreError(String),

    /// Unrecoverable storage failure; the daemon cannot continue.
    #[error("fatal storage error: {0}")]
    StorageFatal(String),

    /// Audit ledger or decision trace read/write failure.
    #[error("ledger error: {0}")]
    LedgerError(String),

    /// PTY spawn, read, write, or teardown failure.
    #[error("pilot error: {0}")]
    PilotError(String),

    /// Messaging channel delivery or receive failure.
    #[error("channel error: {0}")]
    ChannelError(String),

    /// Policy parsing, validation, or evaluation failure.
    #[error("policy error: {0}")]
    PolicyError(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A state transition that the prompt lifecycle does not permit.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
}

//! Shared types for the AtlasBridge prompt relay.
//!
//! Everything the member crates agree on lives here: the prompt data model
//! and its lifecycle state machine, strongly-typed identifiers, the shared
//! error enum, exit codes, and the immutable configuration snapshot built
//! at process startup.

pub mod config;
pub mod error;
pub mod exit;
pub mod ids;
pub mod paths;
pub mod prompt;
pub mod session;

pub use config::{AutopilotMode, BridgeConfig, ChannelConfig, PromptConfig, SecretValue};
pub use error::BridgeError;
pub use exit::ExitCode;
pub use ids::{Nonce, PromptId, SessionId};
pub use prompt::{
    is_legal, is_terminal, Confidence, PromptEvent, PromptStatus, PromptType, Reply, ReplySource,
    Signal,
};
pub use session::{Session, SessionState};

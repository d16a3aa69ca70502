//! Process exit codes for the CLI surface.

use crate::error::BridgeError;

/// Standard exit codes used by every CLI command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Config = 2,
    Environment = 3,
    Network = 4,
    Permission = 5,
    StateCorruption = 8,
    Interrupted = 130,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a runtime error to the exit-code category it belongs to.
    pub fn for_error(err: &BridgeError) -> Self {
        match err {
            BridgeError::ConfigError(_) | BridgeError::PolicyError(_) => ExitCode::Config,
            BridgeError::ChannelError(_) => ExitCode::Network,
            BridgeError::StorageFatal(_) | BridgeError::LedgerError(_) => {
                ExitCode::StateCorruption
            }
            BridgeError::PilotError(_) => ExitCode::Environment,
            BridgeError::StoreError(_) | BridgeError::IllegalTransition(_) => ExitCode::Error,
        }
    }
}

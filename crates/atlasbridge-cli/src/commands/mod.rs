//! CLI command implementations.
//!
//! Every command returns an [`ExitCode`]; errors print a one-sentence
//! cause and a one-sentence remedy to stderr via [`fail`].

pub mod autopilot;
pub mod daemon;
pub mod doctor;
pub mod logs;
pub mod policy;
pub mod run;
pub mod sessions;
pub mod status;

use atlasbridge_types::ExitCode;

/// Print cause + remedy + exit code to stderr, returning the code.
pub fn fail(cause: &str, remedy: &str, code: ExitCode) -> ExitCode {
    eprintln!("{cause}.");
    eprintln!("{remedy}. (exit {})", code.code());
    code
}

/// Load the configuration snapshot for a data directory.
pub fn load_config(
    data_dir: &atlasbridge_types::paths::DataDir,
) -> Result<atlasbridge_types::BridgeConfig, atlasbridge_types::BridgeError> {
    atlasbridge_types::BridgeConfig::load(&data_dir.config_path())
}

//! Persistent state layout and legacy directory migration.
//!
//! All durable state lives under one data directory, resolved in priority
//! order: `ATLASBRIDGE_HOME` env var, `$XDG_DATA_HOME/atlasbridge`, then
//! `~/.atlasbridge`. A legacy `~/.aegis` directory is copied forward once
//! if the current directory does not exist yet.

use std::path::{Path, PathBuf};

use crate::error::BridgeError;

pub const DB_FILENAME: &str = "prompts.db";
pub const AUDIT_FILENAME: &str = "audit.log";
pub const DECISION_TRACE_FILENAME: &str = "autopilot_decisions.jsonl";
pub const POLICY_FILENAME: &str = "policy.yaml";
pub const PID_FILENAME: &str = "daemon.pid";
pub const CONFIG_FILENAME: &str = "config.toml";
pub const AUTOPILOT_STATE_FILENAME: &str = "autopilot.state";

const LEGACY_DIR_NAME: &str = ".aegis";
const DIR_NAME: &str = ".atlasbridge";

/// The resolved data directory and the file paths inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Use an explicit directory (tests, `--data-dir` flag).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the data directory from the environment.
    pub fn resolve() -> Result<Self, BridgeError> {
        if let Ok(dir) = std::env::var("ATLASBRIDGE_HOME") {
            if !dir.is_empty() {
                return Ok(Self::at(dir));
            }
        }
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            if !xdg.is_empty() {
                return Ok(Self::at(Path::new(&xdg).join("atlasbridge")));
            }
        }
        let home = std::env::var("HOME")
            .map_err(|_| BridgeError::ConfigError("HOME is not set".into()))?;
        Ok(Self::at(Path::new(&home).join(DIR_NAME)))
    }

    /// Create the directory (mode 0700) if missing, migrating a legacy
    /// `~/.aegis` directory forward first when one exists.
    pub fn ensure(&self) -> Result<(), BridgeError> {
        if !self.root.exists() {
            if let Some(legacy) = legacy_dir() {
                if legacy.exists() {
                    tracing::info!(
                        from = %legacy.display(),
                        to = %self.root.display(),
                        "migrating legacy data directory"
                    );
                    copy_tree(&legacy, &self.root)?;
                }
            }
        }
        std::fs::create_dir_all(&self.root)
            .map_err(|e| BridgeError::ConfigError(format!("cannot create data dir: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700));
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILENAME)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.root.join(AUDIT_FILENAME)
    }

    pub fn decision_trace_path(&self) -> PathBuf {
        self.root.join(DECISION_TRACE_FILENAME)
    }

    pub fn policy_path(&self) -> PathBuf {
        self.root.join(POLICY_FILENAME)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join(PID_FILENAME)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILENAME)
    }

    pub fn autopilot_state_path(&self) -> PathBuf {
        self.root.join(AUTOPILOT_STATE_FILENAME)
    }
}

fn legacy_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| Path::new(&h).join(LEGACY_DIR_NAME))
}

/// Recursively copy a directory tree. The legacy tree is left untouched.
fn copy_tree(from: &Path, to: &Path) -> Result<(), BridgeError> {
    std::fs::create_dir_all(to)
        .map_err(|e| BridgeError::ConfigError(format!("cannot create {}: {e}", to.display())))?;
    let entries = std::fs::read_dir(from)
        .map_err(|e| BridgeError::ConfigError(format!("cannot read {}: {e}", from.display())))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| BridgeError::ConfigError(format!("cannot read entry: {e}")))?;
        let target = to.join(entry.file_name());
        let ty = entry
            .file_type()
            .map_err(|e| BridgeError::ConfigError(format!("cannot stat entry: {e}")))?;
        if ty.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if ty.is_file() {
            std::fs::copy(entry.path(), &target).map_err(|e| {
                BridgeError::ConfigError(format!("cannot copy {}: {e}", entry.path().display()))
            })?;
        }
    }
    Ok(())
}

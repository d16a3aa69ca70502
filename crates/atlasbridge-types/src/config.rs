//! Immutable configuration snapshot built at process startup.
//!
//! Values merge in precedence order: CLI flag > `ATLASBRIDGE_*` environment
//! variable > `config.toml` > built-in default. The legacy `AEGIS_*` prefix
//! is honored as the lowest-precedence environment fallback. The snapshot is
//! passed explicitly to components; nothing reads the environment after
//! startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Prompt detection and lifecycle tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Prompt TTL: how long a prompt waits for a reply before expiring.
    pub ttl_seconds: u64,
    /// Silence threshold for the low-confidence detection signal.
    pub silence_ms: u64,
    /// Detection mute window after any injection.
    pub post_inject_suppress_ms: u64,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            silence_ms: 2000,
            post_inject_suppress_ms: 500,
        }
    }
}

/// A secret that is either inline or a `keyring:<service>:<key>` pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretValue(pub String);

impl SecretValue {
    /// Resolve the secret. Keyring pointers are looked up through the
    /// `ATLASBRIDGE_SECRET_<SERVICE>_<KEY>` environment convention so the
    /// plaintext never has to live in `config.toml`.
    pub fn resolve(&self) -> Result<String, BridgeError> {
        match self.0.strip_prefix("keyring:") {
            None => Ok(self.0.clone()),
            Some(rest) => {
                let (service, key) = rest.split_once(':').ok_or_else(|| {
                    BridgeError::ConfigError(format!(
                        "malformed keyring pointer {:?} (expected keyring:<service>:<key>)",
                        self.0
                    ))
                })?;
                let var = format!(
                    "ATLASBRIDGE_SECRET_{}_{}",
                    service.to_uppercase().replace('-', "_"),
                    key.to_uppercase().replace('-', "_")
                );
                std::env::var(&var).map_err(|_| {
                    BridgeError::ConfigError(format!(
                        "keyring pointer {:?} unresolved ({var} not set)",
                        self.0
                    ))
                })
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Telegram transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: SecretValue,
    /// Telegram user ids allowed to reply.
    pub allowed_user_ids: Vec<i64>,
    /// Long-poll timeout in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: SecretValue::default(),
            allowed_user_ids: Vec::new(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

fn default_poll_timeout() -> u64 {
    30
}

impl Default for SecretValue {
    fn default() -> Self {
        Self(String::new())
    }
}

/// Which messaging channel carries prompts to the human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel backend name: `console` or `telegram`.
    pub kind: String,
    /// Delivery deadline before a transient failure is retried.
    pub delivery_timeout_secs: u64,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: "console".into(),
            delivery_timeout_secs: 30,
            telegram: None,
        }
    }
}

/// Autopilot engine mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutopilotMode {
    #[default]
    Off,
    Assist,
    Full,
}

impl AutopilotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutopilotMode::Off => "off",
            AutopilotMode::Assist => "assist",
            AutopilotMode::Full => "full",
        }
    }
}

impl std::str::FromStr for AutopilotMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(AutopilotMode::Off),
            "assist" => Ok(AutopilotMode::Assist),
            "full" => Ok(AutopilotMode::Full),
            other => Err(format!("unknown autopilot mode: {other:?} (off|assist|full)")),
        }
    }
}

/// Autopilot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutopilotConfig {
    pub mode: AutopilotMode,
    /// Assist-mode override window before a suggestion auto-injects.
    pub override_window_secs: u64,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            mode: AutopilotMode::Off,
            override_window_secs: 10,
        }
    }
}

/// The top-level immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// Data directory override; `None` means resolve from the environment.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub autopilot: AutopilotConfig,
}

impl BridgeConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, BridgeError> {
        toml::from_str(content).map_err(|e| BridgeError::ConfigError(e.to_string()))
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, BridgeError> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::ConfigError(e.to_string()))
    }

    /// Load the snapshot: defaults, then `config.toml` if present, then
    /// environment overrides. CLI flags are applied by the caller on top.
    pub fn load(config_path: &Path) -> Result<Self, BridgeError> {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path).map_err(|e| {
                BridgeError::ConfigError(format!("cannot read {}: {e}", config_path.display()))
            })?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };
        // Legacy prefix first so the current prefix wins on conflict.
        config.apply_env("AEGIS");
        config.apply_env("ATLASBRIDGE");
        Ok(config)
    }

    /// Apply `<PREFIX>_*` environment variables onto the snapshot.
    fn apply_env(&mut self, prefix: &str) {
        let get = |name: &str| std::env::var(format!("{prefix}_{name}")).ok();

        if let Some(v) = get("DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("TTL_SECONDS").and_then(|v| v.parse().ok()) {
            self.prompts.ttl_seconds = v;
        }
        if let Some(v) = get("SILENCE_MS").and_then(|v| v.parse().ok()) {
            self.prompts.silence_ms = v;
        }
        if let Some(v) = get("SUPPRESS_MS").and_then(|v| v.parse().ok()) {
            self.prompts.post_inject_suppress_ms = v;
        }
        if let Some(v) = get("CHANNEL") {
            self.channel.kind = v;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            let telegram = self.channel.telegram.get_or_insert_with(Default::default);
            telegram.bot_token = SecretValue(v);
        }
        if let Some(v) = get("TELEGRAM_ALLOWED_IDS") {
            let ids: Vec<i64> = v.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if !ids.is_empty() {
                let telegram = self.channel.telegram.get_or_insert_with(Default::default);
                telegram.allowed_user_ids = ids;
            }
        }
        if let Some(v) = get("AUTOPILOT_MODE").and_then(|v| v.parse().ok()) {
            self.autopilot.mode = v;
        }
        if let Some(v) = get("OVERRIDE_WINDOW_SECS").and_then(|v| v.parse().ok()) {
            self.autopilot.override_window_secs = v;
        }
    }
}

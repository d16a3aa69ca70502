//! Session model: one supervised child run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Whether a session is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Ended => "ended",
        }
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionState::Active),
            "ended" => Ok(SessionState::Ended),
            other => Err(format!("unknown session state: {other:?}")),
        }
    }
}

/// An active or completed supervised child run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    /// Adapter name the session runs under (e.g. `claude`).
    pub tool: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Optional human tag, e.g. `deploy-v2.1`.
    pub label: Option<String>,
    pub state: SessionState,
}

impl Session {
    /// Create a new active session starting now.
    pub fn start(tool: impl Into<String>, label: Option<String>) -> Self {
        Self {
            session_id: SessionId::generate(),
            tool: tool.into(),
            started_at: Utc::now(),
            ended_at: None,
            label,
            state: SessionState::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_creates_active_session() {
        let s = Session::start("claude", Some("demo".into()));
        assert_eq!(s.state, SessionState::Active);
        assert_eq!(s.tool, "claude");
        assert_eq!(s.label.as_deref(), Some("demo"));
        assert!(s.ended_at.is_none());
    }

    #[test]
    fn state_round_trip() {
        assert_eq!("active".parse::<SessionState>().unwrap(), SessionState::Active);
        assert_eq!(SessionState::Ended.as_str(), "ended");
        assert!("running".parse::<SessionState>().is_err());
    }
}

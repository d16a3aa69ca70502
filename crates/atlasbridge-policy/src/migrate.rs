//! Migration from the legacy v0 policy format.
//!
//! v0 files were a flat list of `pattern`/`response` pairs:
//!
//! ```yaml
//! rules:
//!   - name: approve-tests
//!     pattern: "Run tests?"
//!     response: "y"
//!   - name: block-push
//!     pattern: "git push --force"
//!     deny: true
//! ```
//!
//! Migration is mechanical: every v0 rule becomes a v1 rule whose
//! `text_contains` is the old pattern, with `auto_reply` (or `deny`) as
//! the action. Evaluating a migrated policy against the same prompt
//! yields the same effective decision as the v0 engine did.

use serde::Deserialize;

use atlasbridge_types::BridgeError;

use crate::schema::{ActionSpec, Defaults, MatchSpec, Policy, PolicyRule};

#[derive(Debug, Deserialize)]
struct V0Policy {
    #[serde(default)]
    rules: Vec<V0Rule>,
}

#[derive(Debug, Deserialize)]
struct V0Rule {
    name: String,
    pattern: String,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    deny: bool,
}

/// Convert a v0 YAML document into a validated v1 [`Policy`].
pub fn migrate_v0_to_v1(content: &str) -> Result<Policy, BridgeError> {
    // If it already parses as v1, there is nothing to migrate.
    if let Ok(policy) = Policy::from_yaml(content) {
        return Ok(policy);
    }

    let v0: V0Policy = serde_yaml::from_str(content)
        .map_err(|e| BridgeError::PolicyError(format!("cannot parse v0 policy: {e}")))?;

    let mut rules = Vec::with_capacity(v0.rules.len());
    for old in v0.rules {
        let action = if old.deny {
            ActionSpec::Deny {
                value: "n".into(),
                reason: Some(format!("migrated v0 rule {:?}", old.name)),
                risk_level: None,
            }
        } else {
            let value = old.response.unwrap_or_default();
            if value.trim().is_empty() {
                return Err(BridgeError::PolicyError(format!(
                    "v0 rule {:?} has neither response nor deny",
                    old.name
                )));
            }
            ActionSpec::AutoReply {
                value,
                risk_level: None,
            }
        };
        rules.push(PolicyRule {
            id: old.name,
            description: Some("migrated from v0".into()),
            matcher: MatchSpec {
                text_contains: Some(old.pattern),
                ..MatchSpec::default()
            },
            action,
        });
    }

    let policy = Policy {
        version: 1,
        defaults: Defaults::default(),
        rules,
    };
    policy.validate()?;
    Ok(policy)
}

//! Policy schema (v1), validation, and compilation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use atlasbridge_types::{BridgeError, Confidence, PromptId, PromptType, SessionId};

/// What to do when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    #[default]
    RequireHuman,
    Deny,
}

/// No-match defaults, split by confidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Defaults {
    #[serde(default)]
    pub no_match: FallbackAction,
    #[serde(default)]
    pub low_confidence: FallbackAction,
}

/// Risk annotation on an action. Recorded in traces, never a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Match criteria of one rule. Unspecified criteria always match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSpec {
    /// Adapter name, or `"*"` for any tool.
    #[serde(default = "wildcard")]
    pub tool: String,
    /// Exact session label.
    #[serde(default)]
    pub session_label: Option<String>,
    /// Prompt types the rule applies to; empty means all.
    #[serde(default)]
    pub prompt_type: Vec<PromptType>,
    #[serde(default = "min_confidence_default")]
    pub min_confidence: Confidence,
    #[serde(default)]
    pub max_confidence: Option<Confidence>,
    /// Case-insensitive substring over the excerpt.
    #[serde(default)]
    pub text_contains: Option<String>,
    /// Case-insensitive regex over the excerpt.
    #[serde(default)]
    pub text_regex: Option<String>,
    /// At least one of these substrings must be present.
    #[serde(default)]
    pub any_of: Vec<String>,
    /// None of these substrings may be present.
    #[serde(default)]
    pub none_of: Vec<String>,
    /// Whether the rule may auto-reply at low confidence.
    #[serde(default)]
    pub allow_low: bool,
}

fn wildcard() -> String {
    "*".into()
}

fn min_confidence_default() -> Confidence {
    Confidence::Low
}

impl Default for MatchSpec {
    fn default() -> Self {
        Self {
            tool: wildcard(),
            session_label: None,
            prompt_type: Vec::new(),
            min_confidence: Confidence::Low,
            max_confidence: None,
            text_contains: None,
            text_regex: None,
            any_of: Vec::new(),
            none_of: Vec::new(),
            allow_low: false,
        }
    }
}

impl MatchSpec {
    /// Whether the rule has any text criterion at all.
    pub fn has_text_criteria(&self) -> bool {
        self.text_contains.is_some() || self.text_regex.is_some() || !self.any_of.is_empty()
    }
}

/// A rule's action as written in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    AutoReply {
        value: String,
        #[serde(default)]
        risk_level: Option<RiskLevel>,
    },
    Deny {
        #[serde(default = "deny_value_default")]
        value: String,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        risk_level: Option<RiskLevel>,
    },
    RequireHuman {
        #[serde(default)]
        message: Option<String>,
    },
    NotifyOnly {
        #[serde(default)]
        message: Option<String>,
    },
}

fn deny_value_default() -> String {
    "n".into()
}

impl ActionSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionSpec::AutoReply { .. } => "auto_reply",
            ActionSpec::Deny { .. } => "deny",
            ActionSpec::RequireHuman { .. } => "require_human",
            ActionSpec::NotifyOnly { .. } => "notify_only",
        }
    }

    pub fn risk_level(&self) -> Option<RiskLevel> {
        match self {
            ActionSpec::AutoReply { risk_level, .. } | ActionSpec::Deny { risk_level, .. } => {
                *risk_level
            }
            _ => None,
        }
    }
}

/// One ordered policy rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "match")]
    pub matcher: MatchSpec,
    pub action: ActionSpec,
}

/// The parsed policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub version: u32,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl Policy {
    /// Parse and validate a v1 policy from YAML.
    pub fn from_yaml(content: &str) -> Result<Self, BridgeError> {
        let policy: Policy = serde_yaml::from_str(content)
            .map_err(|e| BridgeError::PolicyError(format!("cannot parse policy: {e}")))?;
        policy.validate()?;
        Ok(policy)
    }

    /// An empty, valid policy (everything goes to the human).
    pub fn empty() -> Self {
        Self {
            version: 1,
            defaults: Defaults::default(),
            rules: Vec::new(),
        }
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.version != 1 {
            return Err(BridgeError::PolicyError(format!(
                "unsupported policy version {} (expected 1); run `policy migrate`",
                self.version
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err(BridgeError::PolicyError("rule with empty id".into()));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(BridgeError::PolicyError(format!(
                    "duplicate rule id {:?}",
                    rule.id
                )));
            }
            if let ActionSpec::AutoReply { value, .. } = &rule.action {
                if value.trim().is_empty() {
                    return Err(BridgeError::PolicyError(format!(
                        "rule {:?}: auto_reply needs a value",
                        rule.id
                    )));
                }
                // A blanket "answer y to any yes/no anywhere" rule is the
                // unsafe default the relay exists to prevent. Approving
                // auto-replies must be scoped by tool or by text.
                let approves = matches!(value.trim().to_ascii_lowercase().as_str(), "y" | "yes");
                let covers_yes_no = rule.matcher.prompt_type.is_empty()
                    || rule.matcher.prompt_type.contains(&PromptType::YesNo);
                if approves
                    && covers_yes_no
                    && rule.matcher.tool == "*"
                    && !rule.matcher.has_text_criteria()
                {
                    return Err(BridgeError::PolicyError(format!(
                        "rule {:?}: blanket yes/no approval needs a tool or text criterion",
                        rule.id
                    )));
                }
            }
            if let (Some(max), min) = (rule.matcher.max_confidence, rule.matcher.min_confidence) {
                if max < min {
                    return Err(BridgeError::PolicyError(format!(
                        "rule {:?}: max_confidence below min_confidence",
                        rule.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// SHA-256 over the canonical JSON form of the policy.
    pub fn content_hash(&self) -> String {
        let value = serde_json::to_value(self).expect("policy serializes");
        let mut hasher = Sha256::new();
        hasher.update(canonical(&value).as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Canonical JSON with sorted object keys, so the hash does not depend on
/// map iteration order.
fn canonical(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).expect("string serializes"),
                        canonical(&map[*k])
                    )
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        serde_json::Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

/// A rule with its regex compiled ahead of evaluation.
pub struct CompiledRule {
    pub rule: PolicyRule,
    pub regex: Option<Regex>,
}

/// A validated policy ready for evaluation.
pub struct CompiledPolicy {
    pub defaults: Defaults,
    pub rules: Vec<CompiledRule>,
    pub content_hash: String,
}

impl CompiledPolicy {
    /// Compile a validated policy: pre-build every regex with a bounded
    /// automaton size.
    pub fn compile(policy: Policy) -> Result<Self, BridgeError> {
        policy.validate()?;
        let content_hash = policy.content_hash();
        let mut rules = Vec::with_capacity(policy.rules.len());
        for rule in policy.rules {
            let regex = match &rule.matcher.text_regex {
                Some(pattern) => Some(
                    regex::RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .size_limit(1 << 20)
                        .build()
                        .map_err(|e| {
                            BridgeError::PolicyError(format!(
                                "rule {:?}: bad regex {pattern:?}: {e}",
                                rule.id
                            ))
                        })?,
                ),
                None => None,
            };
            rules.push(CompiledRule { rule, regex });
        }
        Ok(Self {
            defaults: policy.defaults,
            rules,
            content_hash,
        })
    }

    /// Parse, validate, and compile straight from YAML.
    pub fn from_yaml(content: &str) -> Result<Self, BridgeError> {
        Self::compile(Policy::from_yaml(content)?)
    }
}

/// The action part of an evaluated decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyAction {
    AutoReply { value: String },
    Deny { value: String, reason: String },
    RequireHuman,
    NotifyOnly { message: String },
}

impl PolicyAction {
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyAction::AutoReply { .. } => "auto_reply",
            PolicyAction::Deny { .. } => "deny",
            PolicyAction::RequireHuman => "require_human",
            PolicyAction::NotifyOnly { .. } => "notify_only",
        }
    }
}

/// Output of one evaluation. Everything a trace entry needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub prompt_id: PromptId,
    pub session_id: SessionId,
    pub matched_rule_id: Option<String>,
    pub action: PolicyAction,
    pub risk_level: Option<RiskLevel>,
    /// Whether the matched rule opted into low-confidence auto-replies.
    pub allow_low: bool,
    pub policy_hash: String,
    /// Per-criterion reasons for `policy test` output.
    pub explanation: String,
    pub confidence: Confidence,
    pub prompt_type: PromptType,
}

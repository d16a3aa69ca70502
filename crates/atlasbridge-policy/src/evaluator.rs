//! Deterministic first-match-wins evaluation.
//!
//! Rules are tried in order; the first whose every criterion passes wins.
//! No match falls back to `defaults.no_match` (or `defaults.low_confidence`
//! for low-confidence prompts). Identical `(policy, facts)` inputs always
//! produce identical decisions; nothing here consults a clock or any
//! ambient state.

use tracing::debug;

use atlasbridge_types::{Confidence, PromptId, PromptType, SessionId};

use crate::schema::{
    ActionSpec, CompiledPolicy, CompiledRule, FallbackAction, PolicyAction, PolicyDecision,
};

/// The facts one prompt presents to the evaluator.
#[derive(Debug, Clone)]
pub struct PromptFacts<'a> {
    pub prompt_id: &'a PromptId,
    pub session_id: &'a SessionId,
    pub prompt_type: PromptType,
    pub confidence: Confidence,
    pub excerpt: &'a str,
    pub tool: &'a str,
    pub session_label: Option<&'a str>,
}

/// Evaluate the policy against one prompt. First match wins.
pub fn evaluate(policy: &CompiledPolicy, facts: &PromptFacts<'_>) -> PolicyDecision {
    for compiled in &policy.rules {
        let (matched, reasons) = match_rule(compiled, facts);
        if matched {
            debug!(
                rule = compiled.rule.id,
                action = compiled.rule.action.kind(),
                "policy rule matched"
            );
            return PolicyDecision {
                prompt_id: facts.prompt_id.clone(),
                session_id: facts.session_id.clone(),
                matched_rule_id: Some(compiled.rule.id.clone()),
                action: action_of(&compiled.rule.action),
                risk_level: compiled.rule.action.risk_level(),
                allow_low: compiled.rule.matcher.allow_low,
                policy_hash: policy.content_hash.clone(),
                explanation: format!(
                    "rule {:?} matched: {}",
                    compiled.rule.id,
                    reasons.join("; ")
                ),
                confidence: facts.confidence,
                prompt_type: facts.prompt_type,
            };
        }
    }

    let (fallback, explanation) = if facts.confidence == Confidence::Low {
        (
            policy.defaults.low_confidence,
            "no rule matched and confidence is low",
        )
    } else {
        (policy.defaults.no_match, "no rule matched")
    };
    let action = match fallback {
        FallbackAction::RequireHuman => PolicyAction::RequireHuman,
        FallbackAction::Deny => PolicyAction::Deny {
            value: "n".into(),
            reason: "no policy rule matched (default: deny)".into(),
        },
    };
    debug!(fallback = action.kind(), "policy no-match fallback");
    PolicyDecision {
        prompt_id: facts.prompt_id.clone(),
        session_id: facts.session_id.clone(),
        matched_rule_id: None,
        action,
        risk_level: None,
        allow_low: false,
        policy_hash: policy.content_hash.clone(),
        explanation: explanation.into(),
        confidence: facts.confidence,
        prompt_type: facts.prompt_type,
    }
}

fn action_of(spec: &ActionSpec) -> PolicyAction {
    match spec {
        ActionSpec::AutoReply { value, .. } => PolicyAction::AutoReply {
            value: value.clone(),
        },
        ActionSpec::Deny { value, reason, .. } => PolicyAction::Deny {
            value: value.clone(),
            reason: reason
                .clone()
                .unwrap_or_else(|| "denied by policy".into()),
        },
        ActionSpec::RequireHuman { .. } => PolicyAction::RequireHuman,
        ActionSpec::NotifyOnly { message } => PolicyAction::NotifyOnly {
            message: message.clone().unwrap_or_else(|| "policy notice".into()),
        },
    }
}

/// Evaluate one rule, short-circuiting on the first failed criterion.
/// Returns the pass/fail plus per-criterion reasons for `policy test`.
fn match_rule(compiled: &CompiledRule, facts: &PromptFacts<'_>) -> (bool, Vec<String>) {
    let matcher = &compiled.rule.matcher;
    let mut reasons = Vec::new();
    let excerpt_lower = facts.excerpt.to_lowercase();

    // tool
    if matcher.tool != "*" && matcher.tool != facts.tool {
        reasons.push(format!("tool {:?} != {:?}", matcher.tool, facts.tool));
        return (false, reasons);
    }
    reasons.push(format!("tool {:?} ok", matcher.tool));

    // session label
    if let Some(wanted) = &matcher.session_label {
        if facts.session_label != Some(wanted.as_str()) {
            reasons.push(format!("label {:?} != {:?}", wanted, facts.session_label));
            return (false, reasons);
        }
        reasons.push(format!("label {wanted:?} ok"));
    }

    // prompt type
    if !matcher.prompt_type.is_empty() && !matcher.prompt_type.contains(&facts.prompt_type) {
        reasons.push(format!(
            "type {} not in rule set",
            facts.prompt_type.as_str()
        ));
        return (false, reasons);
    }

    // confidence range
    if facts.confidence < matcher.min_confidence {
        reasons.push(format!(
            "confidence {} below {}",
            facts.confidence.as_str(),
            matcher.min_confidence.as_str()
        ));
        return (false, reasons);
    }
    if let Some(max) = matcher.max_confidence {
        if facts.confidence > max {
            reasons.push(format!(
                "confidence {} above {}",
                facts.confidence.as_str(),
                max.as_str()
            ));
            return (false, reasons);
        }
    }
    reasons.push(format!("confidence {} ok", facts.confidence.as_str()));

    // text_contains
    if let Some(needle) = &matcher.text_contains {
        if !excerpt_lower.contains(&needle.to_lowercase()) {
            reasons.push(format!("contains {needle:?} failed"));
            return (false, reasons);
        }
        reasons.push(format!("contains {needle:?} ok"));
    }

    // text_regex (pre-compiled)
    if let Some(regex) = &compiled.regex {
        if !regex.is_match(facts.excerpt) {
            reasons.push(format!("regex {:?} failed", regex.as_str()));
            return (false, reasons);
        }
        reasons.push(format!("regex {:?} ok", regex.as_str()));
    }

    // any_of
    if !matcher.any_of.is_empty() {
        let hit = matcher
            .any_of
            .iter()
            .any(|s| excerpt_lower.contains(&s.to_lowercase()));
        if !hit {
            reasons.push("any_of: none present".into());
            return (false, reasons);
        }
        reasons.push("any_of ok".into());
    }

    // none_of
    for forbidden in &matcher.none_of {
        if excerpt_lower.contains(&forbidden.to_lowercase()) {
            reasons.push(format!("none_of: {forbidden:?} present"));
            return (false, reasons);
        }
    }
    if !matcher.none_of.is_empty() {
        reasons.push("none_of ok".into());
    }

    (true, reasons)
}

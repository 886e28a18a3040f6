// property-change evaluator - per-change triage verdicts

use serde::Serialize;
use serde_json::Value;

use super::flatten::PropertyChangeKind;
use crate::patterns::PatternStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvalStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "noise_confirmed")]
    NoiseConfirmed,
    /// produced by a later review stage, never by this evaluator; the
    /// aggregator still reports the bucket at zero
    #[serde(rename = "drift_candidate")]
    DriftCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EvalReason {
    ReadOnly,
    ArmReference,
    NoEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// triage verdict for one flattened property change
///
/// invariant: status is NoiseConfirmed exactly when reason is present
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub status: EvalStatus,
    pub reason: Option<EvalReason>,
    pub confidence: Option<Confidence>,
}

/// strip one leading "properties." segment before rule matching
pub fn strip_properties_prefix(path: &str) -> &str {
    path.strip_prefix("properties.").unwrap_or(path)
}

/// whether the path matches a configured read-only rule
///
/// rules are tested as substring-anchored searches, not full-string matches
pub fn is_readonly_property(store: &PatternStore, path: &str, resource_type: &str) -> bool {
    let check_path = strip_properties_prefix(path);
    for rule in store.readonly_rules(resource_type) {
        if rule.regex.is_match(check_path) {
            store.record_match(&rule.raw, "readonly_patterns", resource_type);
            return true;
        }
    }
    false
}

/// whether a value textually contains an ARM reference expression
///
/// only string values can match; anything else never does
pub fn contains_arm_reference(store: &PatternStore, value: Option<&Value>) -> bool {
    let Some(Value::String(text)) = value else {
        return false;
    };
    for rule in store.arm_reference_rules() {
        if rule.regex.is_match(text) {
            store.record_match(&rule.raw, "arm_reference_patterns", "");
            return true;
        }
    }
    false
}

/// classify one property change; first matching tier wins
pub fn evaluate_property_change(
    store: &PatternStore,
    path: &str,
    change_kind: PropertyChangeKind,
    before: Option<&Value>,
    after: Option<&Value>,
    resource_type: &str,
) -> Evaluation {
    // NoEffect changes are ignored by ARM regardless of values
    if change_kind == PropertyChangeKind::NoEffect {
        return Evaluation {
            status: EvalStatus::NoiseConfirmed,
            reason: Some(EvalReason::NoEffect),
            confidence: Some(Confidence::High),
        };
    }

    if is_readonly_property(store, path, resource_type) {
        return Evaluation {
            status: EvalStatus::NoiseConfirmed,
            reason: Some(EvalReason::ReadOnly),
            confidence: Some(Confidence::High),
        };
    }

    if contains_arm_reference(store, before) || contains_arm_reference(store, after) {
        return Evaluation {
            status: EvalStatus::NoiseConfirmed,
            reason: Some(EvalReason::ArmReference),
            confidence: Some(Confidence::High),
        };
    }

    // everything else needs a human or a later review stage
    Evaluation {
        status: EvalStatus::Pending,
        reason: None,
        confidence: None,
    }
}

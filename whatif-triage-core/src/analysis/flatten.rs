// change-tree flattener - nested what-if deltas to annotated leaf records

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::evaluator::{
    evaluate_property_change, is_readonly_property, strip_properties_prefix, Evaluation,
};
use super::locator::{find_definition, DefinitionResult, DefinitionStatus, SourceFileCache};
use crate::patterns::{KnownDefault, PatternStore};

/// per-property change kind reported by the what-if engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyChangeKind {
    Create,
    Delete,
    Modify,
    NoEffect,
    #[default]
    #[serde(other)]
    Unknown,
}

/// one node of the nested what-if delta tree
///
/// a node with children carries no before/after; a leaf has no children
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNode {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub property_change_type: PropertyChangeKind,
    #[serde(default)]
    pub before: Option<Value>,
    #[serde(default)]
    pub after: Option<Value>,
    #[serde(default)]
    pub children: Vec<ChangeNode>,
}

/// one leaf change with its triage verdict and source provenance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenedChange {
    pub path: String,
    pub change_type: PropertyChangeKind,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub evaluation: Evaluation,
    pub bicep_definition: DefinitionResult,
    pub reference_info: String,
}

/// all flattened changes for one resource in the what-if document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChange {
    pub operation: String,
    pub resource_id: String,
    pub resource_type: String,
    pub resource_name: String,
    pub property_changes: Vec<FlattenedChange>,
}

/// flatten the delta tree depth-first
///
/// a node with children is never itself emitted; each leaf is emitted once
/// with its dot-joined full path, evaluated and located
pub fn flatten_property_changes(
    store: &PatternStore,
    cache: &mut SourceFileCache,
    delta: &[ChangeNode],
    prefix: &str,
    source_dir: &Path,
    resource_type: &str,
) -> Vec<FlattenedChange> {
    let mut changes = Vec::new();

    for node in delta {
        let full_path = if prefix.is_empty() {
            node.path.clone()
        } else {
            format!("{prefix}.{}", node.path)
        };

        if !node.children.is_empty() {
            changes.extend(flatten_property_changes(
                store,
                cache,
                &node.children,
                &full_path,
                source_dir,
                resource_type,
            ));
            continue;
        }

        let evaluation = evaluate_property_change(
            store,
            &full_path,
            node.property_change_type,
            node.before.as_ref(),
            node.after.as_ref(),
            resource_type,
        );
        let bicep_definition = find_definition(cache, &full_path, source_dir, resource_type);
        let reference_info = reference_info(
            store,
            &full_path,
            node.before.as_ref(),
            node.after.as_ref(),
            &bicep_definition,
            resource_type,
        );

        changes.push(FlattenedChange {
            path: full_path,
            change_type: node.property_change_type,
            before: node.before.clone(),
            after: node.after.clone(),
            evaluation,
            bicep_definition,
            reference_info,
        });
    }

    changes
}

/// match a value against the known-default table
///
/// the path suffix matches on the final segment or as a full-path suffix;
/// null values never match
pub fn match_known_default<'a>(
    check_path: &str,
    value: Option<&Value>,
    known_defaults: &[&'a KnownDefault],
) -> Option<&'a str> {
    let value = value?;
    if value.is_null() {
        return None;
    }

    let path_end = check_path.rsplit('.').next().unwrap_or(check_path);
    for default in known_defaults {
        if (path_end == default.path_suffix || check_path.ends_with(&default.path_suffix))
            && *value == default.value
        {
            return Some(&default.description);
        }
    }
    None
}

/// human-readable annotation for a property change
///
/// priority chain, independent of the evaluation verdict: custom pattern,
/// read-only, auto-managed, known default, defined-in-source, uncategorized
pub fn reference_info(
    store: &PatternStore,
    path: &str,
    before: Option<&Value>,
    after: Option<&Value>,
    definition: &DefinitionResult,
    resource_type: &str,
) -> String {
    let check_path = strip_properties_prefix(path);

    for rule in store.custom_rules(resource_type) {
        if rule.regex.is_match(check_path) {
            store.record_match(&rule.raw, "custom_patterns", resource_type);
            return format!("⚠️ {}", rule.description);
        }
    }

    if is_readonly_property(store, path, resource_type) {
        return "🔒 readOnly (set by Azure)".to_string();
    }

    for rule in store.auto_managed_rules(resource_type) {
        if rule.regex.is_match(check_path) {
            store.record_match(&rule.raw, "auto_managed_patterns", resource_type);
            return format!("📘 {}", rule.description);
        }
    }

    let known_defaults = store.known_defaults(resource_type);
    let default_description = match_known_default(check_path, before, &known_defaults)
        .or_else(|| match_known_default(check_path, after, &known_defaults));
    if let Some(description) = default_description {
        return format!("📘 {description}");
    }

    if definition.status == DefinitionStatus::Defined {
        if let (Some(file), Some(line)) = (&definition.file, definition.line) {
            return format!("📍 defined in Bicep ({file}:{line})");
        }
        return "📍 defined in Bicep".to_string();
    }

    "❓ uncategorized, review recommended".to_string()
}

/// reconstruct the provider/type path from a resource id
///
/// walks alternating name/type segments after the first provider marker so
/// nested child resource types come out as Provider/parentType/childType
pub fn resource_type_from_id(resource_id: &str) -> String {
    let Some(pos) = resource_id.find("providers/") else {
        return String::new();
    };
    let after_provider = &resource_id[pos + "providers/".len()..];
    let type_parts: Vec<&str> = after_provider.split('/').collect();
    if type_parts.len() < 2 {
        return String::new();
    }

    let mut segments = vec![type_parts[0], type_parts[1]];
    let mut i = 3;
    while i < type_parts.len() {
        segments.push(type_parts[i]);
        i += 2;
    }
    segments.join("/")
}

/// pull every resource change out of the raw what-if document
pub fn extract_resource_changes(
    store: &PatternStore,
    cache: &mut SourceFileCache,
    what_if: &Value,
    source_dir: &Path,
) -> Vec<ResourceChange> {
    let mut changes = Vec::new();

    let Some(entries) = what_if.get("changes").and_then(Value::as_array) else {
        return changes;
    };

    for entry in entries {
        let resource_id = entry
            .get("resourceId")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let operation = entry
            .get("changeType")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let resource_name = resource_id.rsplit('/').next().unwrap_or("").to_string();
        let resource_type = resource_type_from_id(&resource_id);

        let delta: Vec<ChangeNode> = match entry.get("delta") {
            Some(Value::Null) | None => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
                warn!("unreadable delta for {resource_id}: {e}");
                Vec::new()
            }),
        };

        let property_changes =
            flatten_property_changes(store, cache, &delta, "", source_dir, &resource_type);

        changes.push(ResourceChange {
            operation,
            resource_id,
            resource_type,
            resource_name,
            property_changes,
        });
    }

    changes
}

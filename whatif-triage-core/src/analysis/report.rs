// report aggregation - summaries, pending breakdown and the text renderer

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

use super::evaluator::EvalStatus;
use super::flatten::{PropertyChangeKind, ResourceChange};
use super::locator::DefinitionStatus;
use crate::display::DisplayConfig;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMetadata {
    pub template: String,
    pub location: String,
    pub bicep_dir: String,
    pub timestamp: String,
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub create: u32,
    pub modify: u32,
    pub delete: u32,
    pub no_change: u32,
    pub ignore: u32,
}

// evaluation statuses keep their snake_case wire keys
#[derive(Debug, Default, Clone, Serialize)]
pub struct EvaluationSummary {
    pub noise_confirmed: u32,
    pub pending: u32,
    pub drift_candidate: u32,
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionSummary {
    pub defined: u32,
    pub not_defined: u32,
    pub unknown: u32,
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEvaluations {
    pub count: u32,
    pub by_resource_type: BTreeMap<String, u32>,
}

/// the full structured output consumed by the renderer or emitted as JSON
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutput {
    pub metadata: OutputMetadata,
    pub summary: OperationSummary,
    pub evaluation_summary: EvaluationSummary,
    pub bicep_summary: DefinitionSummary,
    pub changes: Vec<ResourceChange>,
    pub pending_evaluations: PendingEvaluations,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

/// pending leaf changes per resource type, Modify/Delete resources only
///
/// a brand-new resource's pending properties are not drift; Create,
/// NoChange and Ignore resources are excluded
pub fn build_pending_evaluations(changes: &[ResourceChange]) -> PendingEvaluations {
    let mut pending = PendingEvaluations::default();

    for change in changes {
        if !matches!(change.operation.as_str(), "Modify" | "Delete") {
            continue;
        }
        for property_change in &change.property_changes {
            if property_change.evaluation.status == EvalStatus::Pending {
                pending.count += 1;
                *pending
                    .by_resource_type
                    .entry(change.resource_type.clone())
                    .or_insert(0) += 1;
            }
        }
    }

    pending
}

/// aggregate all summaries and assemble the output document
pub fn build_output(
    changes: Vec<ResourceChange>,
    template: &str,
    location: &str,
    bicep_dir: &str,
) -> AnalysisOutput {
    let mut summary = OperationSummary::default();
    for change in &changes {
        match change.operation.to_lowercase().as_str() {
            "create" => summary.create += 1,
            "modify" => summary.modify += 1,
            "delete" => summary.delete += 1,
            "nochange" => summary.no_change += 1,
            "ignore" => summary.ignore += 1,
            _ => {}
        }
    }

    let mut evaluation_summary = EvaluationSummary::default();
    let mut bicep_summary = DefinitionSummary::default();
    for change in &changes {
        for property_change in &change.property_changes {
            match property_change.evaluation.status {
                EvalStatus::NoiseConfirmed => evaluation_summary.noise_confirmed += 1,
                EvalStatus::Pending => evaluation_summary.pending += 1,
                EvalStatus::DriftCandidate => evaluation_summary.drift_candidate += 1,
            }
            match property_change.bicep_definition.status {
                DefinitionStatus::Defined => bicep_summary.defined += 1,
                DefinitionStatus::NotDefined => bicep_summary.not_defined += 1,
                DefinitionStatus::Unknown => bicep_summary.unknown += 1,
            }
        }
    }

    let pending_evaluations = build_pending_evaluations(&changes);

    let notice = (bicep_summary.not_defined > 0).then(|| {
        format!(
            "ℹ️ {} properties are not defined in Bicep files. Review the \
             bicepDefinition.status='notDefined' items to determine if they represent \
             drift (unintended changes) or noise (expected Azure-managed values).",
            bicep_summary.not_defined
        )
    });

    AnalysisOutput {
        metadata: OutputMetadata {
            template: template.to_string(),
            location: location.to_string(),
            bicep_dir: bicep_dir.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        },
        summary,
        evaluation_summary,
        bicep_summary,
        changes,
        pending_evaluations,
        notice,
    }
}

/// whether a resource is surfaced in compact reports
///
/// child and extension resources (more than 3 id segments after the last
/// provider marker) are folded into their parent, and configured types are
/// excluded outright
pub fn is_primary_resource(
    display: &DisplayConfig,
    resource_type: &str,
    resource_id: &str,
) -> bool {
    if !resource_id.is_empty() {
        let lower = resource_id.to_lowercase();
        if let Some(idx) = lower.rfind("/providers/") {
            let provider_path = &resource_id[idx + "/providers/".len()..];
            let segments = provider_path.split('/').filter(|s| !s.is_empty()).count();
            if segments > 3 {
                return false;
            }
        }
    }

    !display.is_filtered(resource_type)
}

/// render the output the way `azd provision --preview` lists resources
pub fn format_text_output(output: &AnalysisOutput, display: &DisplayConfig) -> String {
    let mut lines = vec!["Resources:".to_string(), String::new()];

    let primary: Vec<&ResourceChange> = output
        .changes
        .iter()
        .filter(|c| is_primary_resource(display, &c.resource_type, &c.resource_id))
        .collect();

    let op_width = 8;
    let type_width = primary
        .iter()
        .map(|c| display.display_name(&c.resource_type).len())
        .max()
        .unwrap_or(0);

    for change in &primary {
        let display_op = match change.operation.as_str() {
            "NoChange" | "Ignore" => "Skip",
            op => op,
        };
        let display_type = display.display_name(&change.resource_type);
        lines.push(format!(
            "  {display_op:<op_width$} : {display_type:<type_width$} : {}",
            change.resource_name
        ));

        let skipped = matches!(change.operation.as_str(), "NoChange" | "Ignore");
        if skipped || change.property_changes.is_empty() {
            continue;
        }

        for property_change in &change.property_changes {
            let symbol = match property_change.change_type {
                PropertyChangeKind::Delete => '-',
                PropertyChangeKind::Create => '+',
                PropertyChangeKind::Modify => '~',
                _ => '*',
            };
            if property_change.reference_info.is_empty() {
                lines.push(format!("      {symbol} {}", property_change.path));
            } else {
                lines.push(format!(
                    "      {symbol} {}  {}",
                    property_change.path, property_change.reference_info
                ));
            }
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::evaluator::{Confidence, EvalReason, Evaluation};
    use crate::analysis::flatten::FlattenedChange;
    use crate::analysis::locator::DefinitionResult;
    use std::path::Path;

    fn pending_change(path: &str) -> FlattenedChange {
        FlattenedChange {
            path: path.to_string(),
            change_type: PropertyChangeKind::Modify,
            before: None,
            after: None,
            evaluation: Evaluation {
                status: EvalStatus::Pending,
                reason: None,
                confidence: None,
            },
            bicep_definition: DefinitionResult {
                status: DefinitionStatus::NotDefined,
                ..Default::default()
            },
            reference_info: String::new(),
        }
    }

    fn noise_change(path: &str) -> FlattenedChange {
        FlattenedChange {
            evaluation: Evaluation {
                status: EvalStatus::NoiseConfirmed,
                reason: Some(EvalReason::ReadOnly),
                confidence: Some(Confidence::High),
            },
            ..pending_change(path)
        }
    }

    fn resource(operation: &str, resource_type: &str, changes: Vec<FlattenedChange>) -> ResourceChange {
        ResourceChange {
            operation: operation.to_string(),
            resource_id: format!(
                "/subscriptions/sub/resourceGroups/rg/providers/{resource_type}/name"
            ),
            resource_type: resource_type.to_string(),
            resource_name: "name".to_string(),
            property_changes: changes,
        }
    }

    #[test]
    fn pending_breakdown_excludes_create_resources() {
        let changes = vec![
            resource(
                "Modify",
                "Microsoft.Network/virtualNetworks",
                vec![pending_change("properties.a"), pending_change("properties.b")],
            ),
            resource(
                "Create",
                "Microsoft.KeyVault/vaults",
                vec![pending_change("properties.c")],
            ),
        ];
        let pending = build_pending_evaluations(&changes);
        assert_eq!(pending.count, 2);
        assert_eq!(
            pending.by_resource_type["Microsoft.Network/virtualNetworks"],
            2
        );
        assert!(!pending
            .by_resource_type
            .contains_key("Microsoft.KeyVault/vaults"));
    }

    #[test]
    fn operation_counts_normalize_case() {
        let changes = vec![
            resource("Create", "t", vec![]),
            resource("modify", "t", vec![]),
            resource("NoChange", "t", vec![]),
            resource("IGNORE", "t", vec![]),
            resource("Deploy", "t", vec![]),
        ];
        let output = build_output(changes, "main.bicep", "japaneast", "./infra");
        assert_eq!(output.summary.create, 1);
        assert_eq!(output.summary.modify, 1);
        assert_eq!(output.summary.no_change, 1);
        assert_eq!(output.summary.ignore, 1);
        assert_eq!(output.summary.delete, 0);
    }

    #[test]
    fn evaluation_summary_counts_all_leaves_and_drift_stays_zero() {
        let changes = vec![resource(
            "Modify",
            "t",
            vec![pending_change("a"), noise_change("b"), noise_change("c")],
        )];
        let output = build_output(changes, "main.bicep", "japaneast", "./infra");
        assert_eq!(output.evaluation_summary.pending, 1);
        assert_eq!(output.evaluation_summary.noise_confirmed, 2);
        assert_eq!(output.evaluation_summary.drift_candidate, 0);
    }

    #[test]
    fn notice_appears_only_when_something_is_not_defined() {
        let with = build_output(
            vec![resource("Modify", "t", vec![pending_change("a")])],
            "main.bicep",
            "japaneast",
            "./infra",
        );
        assert!(with.notice.as_deref().unwrap_or("").contains("notDefined"));

        let without = build_output(vec![resource("Create", "t", vec![])], "m", "l", "d");
        assert!(without.notice.is_none());
    }

    #[test]
    fn child_resources_are_not_primary() {
        let display = DisplayConfig::load(Path::new("/nonexistent/display_config.json"));
        assert!(is_primary_resource(
            &display,
            "Microsoft.Network/virtualNetworks",
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet"
        ));
        assert!(!is_primary_resource(
            &display,
            "Microsoft.ContainerService/managedClusters/agentPools",
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/aks/agentPools/system"
        ));
        // extension resources judge from the last provider marker
        assert!(is_primary_resource(
            &display,
            "Microsoft.Chaos/targets",
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/aks/providers/Microsoft.Chaos/targets/t1"
        ));
    }

    #[test]
    fn text_output_aligns_and_annotates() {
        let display = DisplayConfig::load(Path::new("/nonexistent/display_config.json"));
        let mut property = pending_change("properties.enableRBAC");
        property.reference_info = "❓ uncategorized, review recommended".to_string();
        let changes = vec![
            resource("Modify", "Microsoft.Network/virtualNetworks", vec![property]),
            resource("NoChange", "Microsoft.KeyVault/vaults", vec![pending_change("x")]),
        ];
        let output = build_output(changes, "main.bicep", "japaneast", "./infra");
        let text = format_text_output(&output, &display);

        assert!(text.starts_with("Resources:"));
        assert!(text.contains("Modify"));
        assert!(text.contains("Skip"));
        assert!(text.contains("~ properties.enableRBAC  ❓"));
        // skipped resources do not list their property changes
        assert!(!text.contains("* x"));
    }
}

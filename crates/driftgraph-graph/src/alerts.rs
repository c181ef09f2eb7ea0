use crate::detector::DriftReport;
use driftgraph_core::{
    AlertQuery, DriftAlert, DriftType, GraphNode, GraphRepository, NewDriftAlert, NodeId, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Templated alert text for a drift between two nodes.
pub fn describe_drift(drift_type: DriftType, source: &GraphNode, target: &GraphNode) -> String {
    let what = match drift_type {
        DriftType::CodeDrift => "Code changed",
        DriftType::RequirementsDrift => "Requirements changed",
        DriftType::FoundationDrift => "Shared foundation changed",
        DriftType::WorkOrderDrift => "Source document changed",
    };
    format!(
        "{what}: {} '{}' was updated after {} '{}' was last synced",
        source.entity_type, source.label, target.entity_type, target.label
    )
}

/// Whether an open or acknowledged alert already covers this drift.
pub async fn has_active_alert(
    repo: &dyn GraphRepository,
    project_id: &str,
    source: NodeId,
    target: Option<NodeId>,
    drift_type: DriftType,
) -> Result<bool> {
    let query = AlertQuery::project(project_id)
        .with_drift_type(drift_type)
        .between(source, target);
    Ok(repo
        .list_drift_alerts(&query)
        .await?
        .iter()
        .any(|a| a.status.is_active() && a.dedup_key() == (source, target, drift_type)))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertGenerationSummary {
    pub created: Vec<DriftAlert>,
    pub skipped_duplicates: usize,
}

/// Persists drift report entries as alerts, skipping those already covered
/// by an active alert.
pub struct AlertGenerator {
    repo: Arc<dyn GraphRepository>,
}

impl AlertGenerator {
    pub fn new(repo: Arc<dyn GraphRepository>) -> Self {
        Self { repo }
    }

    pub async fn generate(&self, report: &DriftReport) -> Result<AlertGenerationSummary> {
        let mut summary = AlertGenerationSummary::default();

        for entry in &report.entries {
            let target = Some(entry.target_node_id);
            if has_active_alert(
                self.repo.as_ref(),
                &entry.project_id,
                entry.source_node_id,
                target,
                entry.drift_type,
            )
            .await?
            {
                debug!(
                    source_node = %entry.source_node_id,
                    target_node = %entry.target_node_id,
                    drift_type = %entry.drift_type,
                    "active alert exists, skipping"
                );
                summary.skipped_duplicates += 1;
                continue;
            }

            let alert = self
                .repo
                .create_drift_alert(NewDriftAlert {
                    project_id: entry.project_id.clone(),
                    source_node_id: entry.source_node_id,
                    target_node_id: target,
                    drift_type: entry.drift_type,
                    description: entry.description.clone(),
                    severity: entry.severity,
                })
                .await?;
            summary.created.push(alert);
        }

        info!(
            created = summary.created.len(),
            skipped = summary.skipped_duplicates,
            "drift alerts generated"
        );
        Ok(summary)
    }
}

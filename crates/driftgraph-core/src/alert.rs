use crate::{AlertId, AlertStatus, DriftType, NodeId, ProjectId, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A flagged inconsistency between two nodes.
///
/// Alerts are never hard-deleted; only `status` and the resolution fields move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftAlert {
    pub id: AlertId,
    pub project_id: ProjectId,
    pub source_node_id: NodeId,
    pub target_node_id: Option<NodeId>,
    pub drift_type: DriftType,
    pub description: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DriftAlert {
    /// Identity used for deduplication of active alerts.
    pub fn dedup_key(&self) -> (NodeId, Option<NodeId>, DriftType) {
        (self.source_node_id, self.target_node_id, self.drift_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDriftAlert {
    pub project_id: ProjectId,
    pub source_node_id: NodeId,
    pub target_node_id: Option<NodeId>,
    pub drift_type: DriftType,
    pub description: String,
    pub severity: Severity,
}

/// Alert listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertQuery {
    pub project_id: ProjectId,
    pub status: Option<AlertStatus>,
    pub drift_type: Option<DriftType>,
    pub source_node_id: Option<NodeId>,
    pub target_node_id: Option<NodeId>,
}

impl AlertQuery {
    pub fn project(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: AlertStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_drift_type(mut self, drift_type: DriftType) -> Self {
        self.drift_type = Some(drift_type);
        self
    }

    pub fn between(mut self, source: NodeId, target: Option<NodeId>) -> Self {
        self.source_node_id = Some(source);
        self.target_node_id = target;
        self
    }

    pub fn matches(&self, alert: &DriftAlert) -> bool {
        alert.project_id == self.project_id
            && self.status.map_or(true, |s| s == alert.status)
            && self.drift_type.map_or(true, |t| t == alert.drift_type)
            && self.source_node_id.map_or(true, |s| s == alert.source_node_id)
            && self
                .target_node_id
                .map_or(true, |t| alert.target_node_id == Some(t))
    }
}

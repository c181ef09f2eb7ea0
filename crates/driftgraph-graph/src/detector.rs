use crate::alerts::describe_drift;
use crate::classifier::classify_drift;
use chrono::{DateTime, Utc};
use driftgraph_core::{
    Clock, DriftType, EdgeId, EdgeQuery, EdgeType, GraphEdge, GraphError, GraphNode,
    GraphRepository, NodeId, ProjectId, Result, Severity,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReportEntry {
    pub project_id: ProjectId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub edge_id: EdgeId,
    pub edge_type: EdgeType,
    pub drift_type: DriftType,
    pub severity: Severity,
    pub source_label: String,
    pub target_label: String,
    pub source_synced_at: DateTime<Utc>,
    pub target_synced_at: DateTime<Utc>,
    pub description: String,
}

/// Result of a reconciliation scan. Nothing in it is persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub scanned_at: DateTime<Utc>,
    pub total_nodes_scanned: usize,
    pub entries: Vec<DriftReportEntry>,
}

/// Timestamp reconciliation over existing edges.
pub struct DriftDetector {
    repo: Arc<dyn GraphRepository>,
    staleness_threshold: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl DriftDetector {
    pub fn new(
        repo: Arc<dyn GraphRepository>,
        staleness_threshold: chrono::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            staleness_threshold,
            clock,
        }
    }

    /// Checks every outgoing edge of every node in the project.
    #[instrument(skip(self))]
    pub async fn scan_project(&self, project_id: &str) -> Result<DriftReport> {
        let nodes = self.repo.list_nodes(project_id, None).await?;
        let by_id: HashMap<NodeId, &GraphNode> = nodes.iter().map(|n| (n.id, n)).collect();
        let mut entries = Vec::new();

        for source in &nodes {
            let edges = self
                .repo
                .find_edges(&EdgeQuery::project(project_id).from_source(source.id))
                .await?;
            for edge in &edges {
                // Edges may point at a node created after the listing above.
                let target = match by_id.get(&edge.target_node_id) {
                    Some(t) => (*t).clone(),
                    None => match self.repo.find_node_by_id(edge.target_node_id).await? {
                        Some(t) => t,
                        None => continue,
                    },
                };
                if let Some(entry) = self.check_edge(source, &target, edge) {
                    entries.push(entry);
                }
            }
        }

        info!(
            nodes = nodes.len(),
            drifted = entries.len(),
            "project drift scan finished"
        );
        Ok(DriftReport {
            scanned_at: self.clock.now(),
            total_nodes_scanned: nodes.len(),
            entries,
        })
    }

    /// Same check as [`scan_project`](Self::scan_project), restricted to the
    /// edges touching one node in either direction.
    #[instrument(skip(self))]
    pub async fn scan_node(&self, project_id: &str, node_id: NodeId) -> Result<DriftReport> {
        let node = self
            .repo
            .find_node_by_id(node_id)
            .await?
            .ok_or(GraphError::NodeIdNotFound(node_id))?;

        let mut entries = Vec::new();
        let outgoing = self
            .repo
            .find_edges(&EdgeQuery::project(project_id).from_source(node_id))
            .await?;
        for edge in &outgoing {
            if let Some(target) = self.repo.find_node_by_id(edge.target_node_id).await? {
                entries.extend(self.check_edge(&node, &target, edge));
            }
        }
        let incoming = self
            .repo
            .find_edges(&EdgeQuery::project(project_id).to_target(node_id))
            .await?;
        for edge in &incoming {
            if let Some(source) = self.repo.find_node_by_id(edge.source_node_id).await? {
                entries.extend(self.check_edge(&source, &node, edge));
            }
        }

        Ok(DriftReport {
            scanned_at: self.clock.now(),
            total_nodes_scanned: 1,
            entries,
        })
    }

    fn check_edge(
        &self,
        source: &GraphNode,
        target: &GraphNode,
        edge: &GraphEdge,
    ) -> Option<DriftReportEntry> {
        let drift_type = classify_drift(source.entity_type, target.entity_type, edge.edge_type)?;
        let (Some(source_synced_at), Some(target_synced_at)) =
            (source.last_synced_at, target.last_synced_at)
        else {
            debug!(edge = %edge.id, "unsynced endpoint, cannot judge staleness");
            return None;
        };
        if !source.synced_after(target, self.staleness_threshold)? {
            return None;
        }

        Some(DriftReportEntry {
            project_id: edge.project_id.clone(),
            source_node_id: source.id,
            target_node_id: target.id,
            edge_id: edge.id,
            edge_type: edge.edge_type,
            drift_type,
            severity: drift_type.scan_severity(),
            source_label: source.label.clone(),
            target_label: target.label.clone(),
            source_synced_at,
            target_synced_at,
            description: describe_drift(drift_type, source, target),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryGraphRepository;
    use chrono::Duration;
    use driftgraph_core::{EntityType, ManualClock, NewEdge, NewNode};

    async fn setup(gap_secs: i64) -> (Arc<InMemoryGraphRepository>, DriftDetector, NodeId) {
        let repo = Arc::new(InMemoryGraphRepository::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let base = clock.now();
        let code = repo
            .create_node(
                NewNode::new("p1", EntityType::CodebaseFile, "src/lib.rs", "lib.rs")
                    .with_synced_at(base + Duration::seconds(gap_secs)),
            )
            .await
            .unwrap();
        let feature = repo
            .create_node(
                NewNode::new("p1", EntityType::Feature, "f-1", "Login").with_synced_at(base),
            )
            .await
            .unwrap();
        repo.create_edge(NewEdge::new("p1", code.id, feature.id, EdgeType::Implements))
            .await
            .unwrap();
        let detector = DriftDetector::new(repo.clone(), Duration::seconds(60), clock);
        (repo, detector, feature.id)
    }

    #[tokio::test]
    async fn gap_within_threshold_is_not_drift() {
        let (_, detector, _) = setup(60).await;
        let report = detector.scan_project("p1").await.unwrap();
        assert_eq!(report.total_nodes_scanned, 2);
        assert!(report.entries.is_empty());
    }

    #[tokio::test]
    async fn gap_beyond_threshold_is_reported() {
        let (_, detector, _) = setup(61).await;
        let report = detector.scan_project("p1").await.unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].drift_type, DriftType::CodeDrift);
        assert_eq!(report.entries[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn scan_node_checks_incoming_edges() {
        let (_, detector, feature) = setup(3600).await;
        let report = detector.scan_node("p1", feature).await.unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].target_node_id, feature);
    }

    #[tokio::test]
    async fn unsynced_nodes_are_skipped() {
        let repo = Arc::new(InMemoryGraphRepository::new());
        let a = repo
            .create_node(
                NewNode::new("p1", EntityType::Document, "a", "A").with_synced_at(Utc::now()),
            )
            .await
            .unwrap();
        let b = repo
            .create_node(NewNode::new("p1", EntityType::Document, "b", "B"))
            .await
            .unwrap();
        repo.create_edge(NewEdge::new("p1", a.id, b.id, EdgeType::DerivesFrom))
            .await
            .unwrap();
        let detector = DriftDetector::new(
            repo,
            Duration::zero(),
            Arc::new(driftgraph_core::SystemClock),
        );
        assert!(detector.scan_project("p1").await.unwrap().entries.is_empty());
    }
}

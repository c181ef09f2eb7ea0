use crate::alerts::{describe_drift, has_active_alert};
use crate::classifier::classify_drift;
use driftgraph_core::{
    DriftAlert, EdgeQuery, GraphError, GraphEngineConfig, GraphNode, GraphRepository,
    NewDriftAlert, NodeId, Result, Severity,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagatorConfig {
    pub max_depth: usize,
    pub batch_size: usize,
    /// Skip targets already covered by an open or acknowledged alert.
    pub dedupe_open_alerts: bool,
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            batch_size: 50,
            dedupe_open_alerts: false,
        }
    }
}

impl From<&GraphEngineConfig> for PropagatorConfig {
    fn from(config: &GraphEngineConfig) -> Self {
        Self {
            max_depth: config.propagator_max_depth,
            batch_size: config.propagator_batch_size,
            dedupe_open_alerts: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationResult {
    pub source_node_id: NodeId,
    pub total_affected: usize,
    pub alerts_created: usize,
    /// Nodes first reached at each depth, in discovery order.
    pub affected_by_depth: BTreeMap<usize, Vec<NodeId>>,
    pub alerts: Vec<DriftAlert>,
}

impl PropagationResult {
    fn empty(source_node_id: NodeId) -> Self {
        Self {
            source_node_id,
            total_affected: 0,
            alerts_created: 0,
            affected_by_depth: BTreeMap::new(),
            alerts: Vec::new(),
        }
    }

    /// Affected nodes in breadth-first order.
    pub fn affected_nodes(&self) -> Vec<NodeId> {
        self.affected_by_depth.values().flatten().copied().collect()
    }
}

/// Breadth-first walk of outgoing edges from one changed node, persisting a
/// drift alert for every classified edge it crosses.
///
/// A single visited set spans the whole walk, so cycles and diamonds reach
/// each node once. Layers are processed in `batch_size` chunks, sequentially.
pub struct ChangePropagator {
    repo: Arc<dyn GraphRepository>,
    config: PropagatorConfig,
}

impl ChangePropagator {
    pub fn new(repo: Arc<dyn GraphRepository>, config: PropagatorConfig) -> Self {
        Self {
            repo,
            config: PropagatorConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
        }
    }

    pub fn config(&self) -> &PropagatorConfig {
        &self.config
    }

    pub async fn propagate(&self, project_id: &str, source_node_id: NodeId) -> Result<PropagationResult> {
        self.propagate_with_depth(project_id, source_node_id, self.config.max_depth)
            .await
    }

    #[instrument(skip(self))]
    pub async fn propagate_with_depth(
        &self,
        project_id: &str,
        source_node_id: NodeId,
        max_depth: usize,
    ) -> Result<PropagationResult> {
        let root = self
            .repo
            .find_node_by_id(source_node_id)
            .await?
            .ok_or(GraphError::NodeIdNotFound(source_node_id))?;

        let mut result = PropagationResult::empty(source_node_id);
        let mut visited: HashSet<NodeId> = HashSet::from([root.id]);
        let mut frontier: Vec<GraphNode> = vec![root.clone()];

        for depth in 1..=max_depth {
            if frontier.is_empty() {
                break;
            }
            let severity = Severity::for_depth(depth);
            let mut next = Vec::new();

            for batch in frontier.chunks(self.config.batch_size) {
                debug!(depth, batch = batch.len(), "processing propagation batch");
                for parent in batch {
                    let edges = self
                        .repo
                        .find_edges(&EdgeQuery::project(project_id).from_source(parent.id))
                        .await?;
                    for edge in edges {
                        if !visited.insert(edge.target_node_id) {
                            continue;
                        }
                        let Some(target) = self.repo.find_node_by_id(edge.target_node_id).await?
                        else {
                            warn!(node = %edge.target_node_id, "node vanished during propagation");
                            continue;
                        };

                        if let Some(drift_type) =
                            classify_drift(parent.entity_type, target.entity_type, edge.edge_type)
                        {
                            let duplicate = self.config.dedupe_open_alerts
                                && has_active_alert(
                                    self.repo.as_ref(),
                                    project_id,
                                    root.id,
                                    Some(target.id),
                                    drift_type,
                                )
                                .await?;
                            if duplicate {
                                debug!(node = %target.id, %drift_type, "active alert exists, skipping");
                            } else {
                                let alert = self
                                    .repo
                                    .create_drift_alert(NewDriftAlert {
                                        project_id: project_id.to_string(),
                                        source_node_id: root.id,
                                        target_node_id: Some(target.id),
                                        drift_type,
                                        description: describe_drift(drift_type, &root, &target),
                                        severity,
                                    })
                                    .await?;
                                result.alerts_created += 1;
                                result.alerts.push(alert);
                            }
                        }

                        result.total_affected += 1;
                        result
                            .affected_by_depth
                            .entry(depth)
                            .or_default()
                            .push(target.id);
                        next.push(target);
                    }
                }
            }
            frontier = next;
        }

        info!(
            affected = result.total_affected,
            alerts = result.alerts_created,
            "change propagated"
        );
        Ok(result)
    }

    /// Runs [`propagate`](Self::propagate) once per root, in order. Alerts are
    /// not deduplicated across roots.
    pub async fn propagate_batch(
        &self,
        project_id: &str,
        source_node_ids: &[NodeId],
    ) -> Result<Vec<PropagationResult>> {
        let mut results = Vec::with_capacity(source_node_ids.len());
        for id in source_node_ids {
            results.push(self.propagate(project_id, *id).await?);
        }
        Ok(results)
    }
}

use crate::alerts::{describe_drift, has_active_alert};
use crate::classifier::classify_drift;
use crate::detector::DriftDetector;
use crate::propagator::{ChangePropagator, PropagatorConfig};
use driftgraph_core::{
    content_hash, AlertId, AlertQuery, AlertStatus, Clock, DriftAlert, EdgeQuery, EdgeType,
    EntityType, GraphEdge, GraphEngineConfig, GraphError, GraphNode, GraphRepository, Metadata,
    NewDriftAlert, NewEdge, NewNode, NodeId, NodeSync, Result, Severity, SystemClock,
    TraversalDirection, TraversalResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// `(entity_type, entity_id)` handle used to address a node within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationEvent {
    pub changed_node: GraphNode,
    /// False when the new content hashed to the stored digest.
    pub content_changed: bool,
    pub affected_nodes: Vec<NodeId>,
    pub alerts: Vec<DriftAlert>,
}

impl PropagationEvent {
    fn unchanged(node: GraphNode) -> Self {
        Self {
            changed_node: node,
            content_changed: false,
            affected_nodes: Vec::new(),
            alerts: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.content_changed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    pub node: GraphNode,
    pub edge_type: EdgeType,
    pub depth: usize,
}

/// Layered neighbourhood of one node plus the active alerts touching it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphContext {
    pub node: GraphNode,
    pub upstream: Vec<ContextEntry>,
    pub downstream: Vec<ContextEntry>,
    pub open_alerts: Vec<DriftAlert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationDirection {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedNode {
    pub node: GraphNode,
    pub edge: GraphEdge,
    pub direction: RelationDirection,
}

/// Node and edge lifecycle used by every domain write-path, plus the
/// read-side queries and alert resolution exposed to callers.
pub struct GraphService {
    repo: Arc<dyn GraphRepository>,
    config: GraphEngineConfig,
    clock: Arc<dyn Clock>,
}

impl GraphService {
    pub fn new(repo: Arc<dyn GraphRepository>, config: GraphEngineConfig) -> Self {
        Self {
            repo,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn repository(&self) -> Arc<dyn GraphRepository> {
        self.repo.clone()
    }

    pub fn config(&self) -> &GraphEngineConfig {
        &self.config
    }

    /// Propagator built from this service's engine settings.
    pub fn propagator(&self, dedupe_open_alerts: bool) -> ChangePropagator {
        ChangePropagator::new(
            self.repo.clone(),
            PropagatorConfig {
                dedupe_open_alerts,
                ..PropagatorConfig::from(&self.config)
            },
        )
    }

    pub fn detector(&self) -> DriftDetector {
        DriftDetector::new(
            self.repo.clone(),
            self.config.staleness_threshold(),
            self.clock.clone(),
        )
    }

    async fn require_node(
        &self,
        project_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<GraphNode> {
        self.repo
            .find_node(project_id, entity_type, entity_id)
            .await?
            .ok_or_else(|| GraphError::node_not_found(project_id, entity_type, entity_id))
    }

    /// Creates or refreshes the node for an entity. Identical label and
    /// content leave the stored node untouched. Never raises alerts.
    #[instrument(skip(self, content))]
    pub async fn ensure_node(
        &self,
        project_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        label: &str,
        content: &str,
    ) -> Result<GraphNode> {
        let hash = content_hash(content);

        for attempt in 0..=self.config.cas_max_retries {
            let Some(existing) = self.repo.find_node(project_id, entity_type, entity_id).await?
            else {
                let new_node = NewNode::new(project_id, entity_type, entity_id, label)
                    .with_content_hash(hash.clone())
                    .with_synced_at(self.clock.now());
                match self.repo.create_node(new_node).await {
                    Ok(node) => {
                        debug!(node = %node.id, "node created");
                        return Ok(node);
                    }
                    Err(GraphError::Conflict(reason)) => {
                        warn!(attempt, %reason, "node created concurrently, retrying");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            };

            if existing.label == label && existing.content_hash.as_deref() == Some(hash.as_str()) {
                return Ok(existing);
            }

            let sync = NodeSync {
                label: label.to_string(),
                content_hash: hash.clone(),
                last_synced_at: self.clock.now(),
            };
            match self
                .repo
                .update_node_if_hash(existing.id, existing.content_hash.as_deref(), sync)
                .await?
            {
                Some(node) => {
                    debug!(node = %node.id, "node refreshed");
                    return Ok(node);
                }
                None => warn!(attempt, node = %existing.id, "content hash moved, retrying"),
            }
        }

        Err(GraphError::Conflict(format!(
            "{entity_type}/{entity_id} kept changing across {} attempts",
            self.config.cas_max_retries + 1
        )))
    }

    /// Deletes the entity's node and its edges. Returns whether one existed.
    #[instrument(skip(self))]
    pub async fn remove_node(
        &self,
        project_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<bool> {
        match self.repo.find_node(project_id, entity_type, entity_id).await? {
            Some(node) => self.repo.delete_node(node.id).await,
            None => Ok(false),
        }
    }

    /// Links two existing entities. An identical edge is returned as is.
    #[instrument(skip(self, metadata))]
    pub async fn connect(
        &self,
        project_id: &str,
        source: &EntityRef,
        target: &EntityRef,
        edge_type: EdgeType,
        metadata: Option<Metadata>,
    ) -> Result<GraphEdge> {
        let source_node = self
            .require_node(project_id, source.entity_type, &source.entity_id)
            .await?;
        let target_node = self
            .require_node(project_id, target.entity_type, &target.entity_id)
            .await?;

        let query = EdgeQuery::project(project_id)
            .from_source(source_node.id)
            .to_target(target_node.id)
            .of_type(edge_type);
        if let Some(existing) = self.repo.find_edges(&query).await?.into_iter().next() {
            return Ok(existing);
        }

        let edge = NewEdge::new(project_id, source_node.id, target_node.id, edge_type)
            .with_metadata(metadata.unwrap_or_default());
        match self.repo.create_edge(edge).await {
            Err(GraphError::Conflict(_)) => self
                .repo
                .find_edges(&query)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| GraphError::Conflict("edge vanished after conflict".to_string())),
            other => other,
        }
    }

    /// Deletes every edge matching the triple. Returns how many went.
    #[instrument(skip(self))]
    pub async fn disconnect(
        &self,
        project_id: &str,
        source_node_id: NodeId,
        target_node_id: NodeId,
        edge_type: EdgeType,
    ) -> Result<usize> {
        let query = EdgeQuery::project(project_id)
            .from_source(source_node_id)
            .to_target(target_node_id)
            .of_type(edge_type);
        let mut removed = 0;
        for edge in self.repo.find_edges(&query).await? {
            if self.repo.delete_edge(edge.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Records new content for an entity and, if its hash moved, flags
    /// downstream drift up to `propagate_change_depth` hops away.
    #[instrument(skip(self, new_content))]
    pub async fn propagate_change(
        &self,
        project_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        new_content: &str,
    ) -> Result<PropagationEvent> {
        let hash = content_hash(new_content);
        let mut updated = None;

        for attempt in 0..=self.config.cas_max_retries {
            let node = self.require_node(project_id, entity_type, entity_id).await?;
            if node.content_hash.as_deref() == Some(hash.as_str()) {
                debug!(node = %node.id, "content unchanged, nothing to propagate");
                return Ok(PropagationEvent::unchanged(node));
            }

            let sync = NodeSync {
                label: node.label.clone(),
                content_hash: hash.clone(),
                last_synced_at: self.clock.now(),
            };
            updated = self
                .repo
                .update_node_if_hash(node.id, node.content_hash.as_deref(), sync)
                .await?;
            if updated.is_some() {
                break;
            }
            warn!(attempt, node = %node.id, "content hash moved, retrying");
        }

        let changed_node = updated.ok_or_else(|| {
            GraphError::Conflict(format!(
                "{entity_type}/{entity_id} kept changing across {} attempts",
                self.config.cas_max_retries + 1
            ))
        })?;

        let result = self
            .propagator(false)
            .propagate_with_depth(project_id, changed_node.id, self.config.propagate_change_depth)
            .await?;

        Ok(PropagationEvent {
            content_changed: true,
            affected_nodes: result.affected_nodes(),
            alerts: result.alerts,
            changed_node,
        })
    }

    /// Backfill scan: one medium alert per classified edge whose source was
    /// synced after its target, skipping pairs with an active alert.
    #[instrument(skip(self))]
    pub async fn detect_drift(&self, project_id: &str) -> Result<Vec<DriftAlert>> {
        let mut created = Vec::new();

        for source in self.repo.list_nodes(project_id, None).await? {
            let edges = self
                .repo
                .find_edges(&EdgeQuery::project(project_id).from_source(source.id))
                .await?;
            for edge in edges {
                let Some(target) = self.repo.find_node_by_id(edge.target_node_id).await? else {
                    continue;
                };
                let Some(drift_type) =
                    classify_drift(source.entity_type, target.entity_type, edge.edge_type)
                else {
                    continue;
                };
                if source.synced_after(&target, chrono::Duration::zero()) != Some(true) {
                    continue;
                }
                if has_active_alert(
                    self.repo.as_ref(),
                    project_id,
                    source.id,
                    Some(target.id),
                    drift_type,
                )
                .await?
                {
                    continue;
                }

                let alert = self
                    .repo
                    .create_drift_alert(NewDriftAlert {
                        project_id: project_id.to_string(),
                        source_node_id: source.id,
                        target_node_id: Some(target.id),
                        drift_type,
                        description: describe_drift(drift_type, &source, &target),
                        severity: Severity::Medium,
                    })
                    .await?;
                created.push(alert);
            }
        }

        info!(created = created.len(), "drift detection finished");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_context(
        &self,
        project_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        depth: usize,
    ) -> Result<GraphContext> {
        let node = self.require_node(project_id, entity_type, entity_id).await?;

        let upstream = self
            .context_entries(
                self.repo
                    .traverse(node.id, TraversalDirection::Upstream, depth)
                    .await?,
            )
            .await?;
        let downstream = self
            .context_entries(
                self.repo
                    .traverse(node.id, TraversalDirection::Downstream, depth)
                    .await?,
            )
            .await?;

        let open_alerts = self
            .repo
            .list_drift_alerts(&AlertQuery::project(project_id))
            .await?
            .into_iter()
            .filter(|a| a.status.is_active())
            .filter(|a| a.source_node_id == node.id || a.target_node_id == Some(node.id))
            .collect();

        Ok(GraphContext {
            node,
            upstream,
            downstream,
            open_alerts,
        })
    }

    async fn context_entries(&self, traversal: TraversalResult) -> Result<Vec<ContextEntry>> {
        let mut entries = Vec::with_capacity(traversal.len());
        for step in traversal.layers.into_iter().flatten() {
            if let Some(node) = self.repo.find_node_by_id(step.node_id).await? {
                entries.push(ContextEntry {
                    node,
                    edge_type: step.edge_type,
                    depth: step.depth,
                });
            }
        }
        Ok(entries)
    }

    /// Direct neighbours, optionally restricted to one edge type.
    #[instrument(skip(self))]
    pub async fn get_related(
        &self,
        project_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        edge_type: Option<EdgeType>,
    ) -> Result<Vec<RelatedNode>> {
        let node = self.require_node(project_id, entity_type, entity_id).await?;

        let mut outgoing = EdgeQuery::project(project_id).from_source(node.id);
        let mut incoming = EdgeQuery::project(project_id).to_target(node.id);
        if let Some(t) = edge_type {
            outgoing = outgoing.of_type(t);
            incoming = incoming.of_type(t);
        }

        let mut related = Vec::new();
        for (query, direction) in [
            (outgoing, RelationDirection::Outgoing),
            (incoming, RelationDirection::Incoming),
        ] {
            for edge in self.repo.find_edges(&query).await? {
                let other = match direction {
                    RelationDirection::Outgoing => edge.target_node_id,
                    RelationDirection::Incoming => edge.source_node_id,
                };
                if let Some(node) = self.repo.find_node_by_id(other).await? {
                    related.push(RelatedNode {
                        node,
                        edge,
                        direction,
                    });
                }
            }
        }
        Ok(related)
    }

    pub async fn get_drift_alerts(&self, query: &AlertQuery) -> Result<Vec<DriftAlert>> {
        self.repo.list_drift_alerts(query).await
    }

    async fn transition_alert(
        &self,
        alert_id: AlertId,
        to: AlertStatus,
        resolved_by: Option<&str>,
    ) -> Result<DriftAlert> {
        for attempt in 0..=self.config.cas_max_retries {
            let mut alert = self
                .repo
                .find_drift_alert(alert_id)
                .await?
                .ok_or(GraphError::AlertNotFound(alert_id))?;
            let from = alert.status;
            if !from.can_transition_to(to) {
                return Err(GraphError::InvalidAlertTransition { from, to });
            }
            alert.status = to;
            if to.is_terminal() {
                alert.resolved_by = resolved_by.map(str::to_string);
                alert.resolved_at = Some(self.clock.now());
            }
            match self.repo.update_drift_alert_if_status(alert, from).await? {
                Some(updated) => return Ok(updated),
                None => warn!(attempt, alert = %alert_id, "alert status moved, retrying"),
            }
        }

        Err(GraphError::Conflict(format!(
            "alert {alert_id} kept changing across {} attempts",
            self.config.cas_max_retries + 1
        )))
    }

    #[instrument(skip(self))]
    pub async fn acknowledge_drift_alert(&self, alert_id: AlertId) -> Result<DriftAlert> {
        self.transition_alert(alert_id, AlertStatus::Acknowledged, None)
            .await
    }

    /// Closes an alert as `Resolved` or `Dismissed` on behalf of `user_id`.
    #[instrument(skip(self))]
    pub async fn resolve_drift_alert(
        &self,
        alert_id: AlertId,
        user_id: &str,
        status: AlertStatus,
    ) -> Result<DriftAlert> {
        if !status.is_terminal() {
            return Err(GraphError::InvalidOperation(format!(
                "alerts can only be resolved or dismissed, not {status}"
            )));
        }
        self.transition_alert(alert_id, status, Some(user_id)).await
    }
}

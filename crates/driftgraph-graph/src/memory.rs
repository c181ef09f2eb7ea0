use async_trait::async_trait;
use chrono::Utc;
use driftgraph_core::{
    AlertId, AlertQuery, AlertStatus, DriftAlert, EdgeId, EdgeQuery, EntityType, GraphEdge, GraphError,
    GraphNode, GraphRepository, NewDriftAlert, NewEdge, NewNode, NodeId, NodeSync, ProjectId,
    Result, TraversalDirection, TraversalResult, TraversalStep,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

type EntityKey = (ProjectId, EntityType, String);

#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeId, GraphNode>,
    /// Insertion sequence, for stable listing order.
    node_seq: HashMap<NodeId, u64>,
    next_seq: u64,
    by_entity: HashMap<EntityKey, NodeId>,
    edges: HashMap<EdgeId, GraphEdge>,
    outgoing: HashMap<NodeId, Vec<EdgeId>>,
    incoming: HashMap<NodeId, Vec<EdgeId>>,
    alerts: Vec<DriftAlert>,
    alert_index: HashMap<AlertId, usize>,
}

impl GraphState {
    fn edge_ids(&self, node: NodeId, direction: TraversalDirection) -> Vec<EdgeId> {
        let out = self.outgoing.get(&node).into_iter().flatten();
        let inc = self.incoming.get(&node).into_iter().flatten();
        match direction {
            TraversalDirection::Downstream => out.copied().collect(),
            TraversalDirection::Upstream => inc.copied().collect(),
            TraversalDirection::Both => out.chain(inc).copied().collect(),
        }
    }

    fn detach_edge(&mut self, id: EdgeId) -> Option<GraphEdge> {
        let edge = self.edges.remove(&id)?;
        if let Some(ids) = self.outgoing.get_mut(&edge.source_node_id) {
            ids.retain(|e| *e != id);
        }
        if let Some(ids) = self.incoming.get_mut(&edge.target_node_id) {
            ids.retain(|e| *e != id);
        }
        Some(edge)
    }
}

/// Process-local [`GraphRepository`] backed by adjacency maps.
///
/// Nodes and edges are arena records keyed by id; every call takes the state
/// lock once, which makes each call atomic on its own.
#[derive(Default)]
pub struct InMemoryGraphRepository {
    state: RwLock<GraphState>,
}

impl InMemoryGraphRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state.read().edges.len()
    }

    pub fn alert_count(&self) -> usize {
        self.state.read().alerts.len()
    }
}

#[async_trait]
impl GraphRepository for InMemoryGraphRepository {
    async fn find_node(
        &self,
        project_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<GraphNode>> {
        let state = self.state.read();
        let key = (project_id.to_string(), entity_type, entity_id.to_string());
        Ok(state
            .by_entity
            .get(&key)
            .and_then(|id| state.nodes.get(id))
            .cloned())
    }

    async fn find_node_by_id(&self, id: NodeId) -> Result<Option<GraphNode>> {
        Ok(self.state.read().nodes.get(&id).cloned())
    }

    async fn create_node(&self, node: NewNode) -> Result<GraphNode> {
        let mut state = self.state.write();
        let key = (node.project_id.clone(), node.entity_type, node.entity_id.clone());
        if state.by_entity.contains_key(&key) {
            return Err(GraphError::Conflict(format!(
                "node already exists for {}/{} in project {}",
                node.entity_type, node.entity_id, node.project_id
            )));
        }

        let now = Utc::now();
        let created = GraphNode {
            id: Uuid::new_v4(),
            project_id: node.project_id,
            entity_type: node.entity_type,
            entity_id: node.entity_id,
            label: node.label,
            metadata: node.metadata,
            content_hash: node.content_hash,
            last_synced_at: node.last_synced_at,
            created_at: now,
            updated_at: now,
        };
        let seq = state.next_seq;
        state.next_seq += 1;
        state.node_seq.insert(created.id, seq);
        state.by_entity.insert(key, created.id);
        state.nodes.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_node(&self, node: GraphNode) -> Result<GraphNode> {
        let mut state = self.state.write();
        let stored = state
            .nodes
            .get_mut(&node.id)
            .ok_or(GraphError::NodeIdNotFound(node.id))?;
        if (&stored.project_id, stored.entity_type, &stored.entity_id)
            != (&node.project_id, node.entity_type, &node.entity_id)
        {
            return Err(GraphError::InvalidOperation(
                "a node's entity identity cannot change".to_string(),
            ));
        }
        *stored = GraphNode {
            updated_at: Utc::now(),
            ..node
        };
        Ok(stored.clone())
    }

    async fn update_node_if_hash(
        &self,
        id: NodeId,
        expected_hash: Option<&str>,
        sync: NodeSync,
    ) -> Result<Option<GraphNode>> {
        let mut state = self.state.write();
        let stored = state
            .nodes
            .get_mut(&id)
            .ok_or(GraphError::NodeIdNotFound(id))?;
        if stored.content_hash.as_deref() != expected_hash {
            return Ok(None);
        }
        stored.label = sync.label;
        stored.content_hash = Some(sync.content_hash);
        stored.last_synced_at = Some(sync.last_synced_at);
        stored.updated_at = Utc::now();
        Ok(Some(stored.clone()))
    }

    async fn delete_node(&self, id: NodeId) -> Result<bool> {
        let mut state = self.state.write();
        let Some(node) = state.nodes.remove(&id) else {
            return Ok(false);
        };
        state.node_seq.remove(&id);
        state
            .by_entity
            .remove(&(node.project_id, node.entity_type, node.entity_id));
        for edge_id in state.edge_ids(id, TraversalDirection::Both) {
            state.detach_edge(edge_id);
        }
        state.outgoing.remove(&id);
        state.incoming.remove(&id);
        Ok(true)
    }

    async fn list_nodes(
        &self,
        project_id: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<GraphNode>> {
        let state = self.state.read();
        let mut nodes: Vec<&GraphNode> = state
            .nodes
            .values()
            .filter(|n| n.project_id == project_id)
            .filter(|n| entity_type.map_or(true, |t| t == n.entity_type))
            .collect();
        nodes.sort_by_key(|n| state.node_seq.get(&n.id).copied().unwrap_or(u64::MAX));
        Ok(nodes.into_iter().cloned().collect())
    }

    async fn create_edge(&self, edge: NewEdge) -> Result<GraphEdge> {
        let mut state = self.state.write();
        for endpoint in [edge.source_node_id, edge.target_node_id] {
            if !state.nodes.contains_key(&endpoint) {
                return Err(GraphError::NodeIdNotFound(endpoint));
            }
        }
        let duplicate = state
            .outgoing
            .get(&edge.source_node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.edges.get(id))
            .any(|e| e.target_node_id == edge.target_node_id && e.edge_type == edge.edge_type);
        if duplicate {
            return Err(GraphError::Conflict(format!(
                "edge {} -[{}]-> {} already exists",
                edge.source_node_id, edge.edge_type, edge.target_node_id
            )));
        }

        let created = GraphEdge {
            id: Uuid::new_v4(),
            project_id: edge.project_id,
            source_node_id: edge.source_node_id,
            target_node_id: edge.target_node_id,
            edge_type: edge.edge_type,
            metadata: edge.metadata,
            created_at: Utc::now(),
        };
        state
            .outgoing
            .entry(created.source_node_id)
            .or_default()
            .push(created.id);
        state
            .incoming
            .entry(created.target_node_id)
            .or_default()
            .push(created.id);
        state.edges.insert(created.id, created.clone());
        Ok(created)
    }

    async fn delete_edge(&self, id: EdgeId) -> Result<bool> {
        Ok(self.state.write().detach_edge(id).is_some())
    }

    async fn find_edges(&self, query: &EdgeQuery) -> Result<Vec<GraphEdge>> {
        let state = self.state.read();
        let candidates: Vec<EdgeId> = match (query.source_node_id, query.target_node_id) {
            (Some(source), _) => state.edge_ids(source, TraversalDirection::Downstream),
            (None, Some(target)) => state.edge_ids(target, TraversalDirection::Upstream),
            (None, None) => {
                let mut all: Vec<&GraphEdge> = state.edges.values().collect();
                all.sort_by_key(|e| (e.created_at, e.id));
                all.into_iter().map(|e| e.id).collect()
            }
        };
        Ok(candidates
            .into_iter()
            .filter_map(|id| state.edges.get(&id))
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    async fn traverse(
        &self,
        node_id: NodeId,
        direction: TraversalDirection,
        max_depth: usize,
    ) -> Result<TraversalResult> {
        let state = self.state.read();
        if !state.nodes.contains_key(&node_id) {
            return Err(GraphError::NodeIdNotFound(node_id));
        }

        let mut result = TraversalResult {
            root: Some(node_id),
            layers: Vec::new(),
        };
        let mut visited = HashSet::from([node_id]);
        let mut queue = VecDeque::from([(node_id, 0usize)]);

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge_id in state.edge_ids(current, direction) {
                let Some(edge) = state.edges.get(&edge_id) else {
                    continue;
                };
                let Some(next) = edge.other_end(current) else {
                    continue;
                };
                if !visited.insert(next) {
                    continue;
                }
                let step_depth = depth + 1;
                if result.layers.len() < step_depth {
                    result.layers.resize_with(step_depth, Vec::new);
                }
                result.layers[step_depth - 1].push(TraversalStep {
                    node_id: next,
                    via_edge: edge.id,
                    edge_type: edge.edge_type,
                    depth: step_depth,
                });
                queue.push_back((next, step_depth));
            }
        }

        Ok(result)
    }

    async fn create_drift_alert(&self, alert: NewDriftAlert) -> Result<DriftAlert> {
        let mut state = self.state.write();
        let now = Utc::now();
        let created = DriftAlert {
            id: Uuid::new_v4(),
            project_id: alert.project_id,
            source_node_id: alert.source_node_id,
            target_node_id: alert.target_node_id,
            drift_type: alert.drift_type,
            description: alert.description,
            severity: alert.severity,
            status: AlertStatus::Open,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        let index = state.alerts.len();
        state.alert_index.insert(created.id, index);
        state.alerts.push(created.clone());
        Ok(created)
    }

    async fn find_drift_alert(&self, id: AlertId) -> Result<Option<DriftAlert>> {
        let state = self.state.read();
        Ok(state
            .alert_index
            .get(&id)
            .and_then(|i| state.alerts.get(*i))
            .cloned())
    }

    async fn list_drift_alerts(&self, query: &AlertQuery) -> Result<Vec<DriftAlert>> {
        Ok(self
            .state
            .read()
            .alerts
            .iter()
            .filter(|a| query.matches(a))
            .cloned()
            .collect())
    }

    async fn update_drift_alert(&self, alert: DriftAlert) -> Result<DriftAlert> {
        let mut state = self.state.write();
        let index = *state
            .alert_index
            .get(&alert.id)
            .ok_or(GraphError::AlertNotFound(alert.id))?;
        let updated = DriftAlert {
            updated_at: Utc::now(),
            ..alert
        };
        state.alerts[index] = updated.clone();
        Ok(updated)
    }

    async fn update_drift_alert_if_status(
        &self,
        alert: DriftAlert,
        expected: AlertStatus,
    ) -> Result<Option<DriftAlert>> {
        let mut state = self.state.write();
        let index = *state
            .alert_index
            .get(&alert.id)
            .ok_or(GraphError::AlertNotFound(alert.id))?;
        if state.alerts[index].status != expected {
            return Ok(None);
        }
        let updated = DriftAlert {
            updated_at: Utc::now(),
            ..alert
        };
        state.alerts[index] = updated.clone();
        Ok(Some(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftgraph_core::EdgeType;

    async fn node(repo: &InMemoryGraphRepository, id: &str) -> GraphNode {
        repo.create_node(NewNode::new("p1", EntityType::Document, id, id))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn entity_identity_is_unique() {
        let repo = InMemoryGraphRepository::new();
        node(&repo, "doc-1").await;
        let err = repo
            .create_node(NewNode::new("p1", EntityType::Document, "doc-1", "again"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Conflict(_)));
        // Same entity id in another project or of another type is a different node.
        repo.create_node(NewNode::new("p2", EntityType::Document, "doc-1", "x"))
            .await
            .unwrap();
        repo.create_node(NewNode::new("p1", EntityType::WorkOrder, "doc-1", "x"))
            .await
            .unwrap();
        assert_eq!(repo.node_count(), 3);
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_hash() {
        let repo = InMemoryGraphRepository::new();
        let n = node(&repo, "doc-1").await;
        let sync = |hash: &str| NodeSync {
            label: "doc".into(),
            content_hash: hash.into(),
            last_synced_at: Utc::now(),
        };

        let first = repo.update_node_if_hash(n.id, None, sync("h1")).await.unwrap();
        assert_eq!(first.unwrap().content_hash.as_deref(), Some("h1"));

        let stale = repo.update_node_if_hash(n.id, None, sync("h2")).await.unwrap();
        assert!(stale.is_none());
        let stored = repo.find_node_by_id(n.id).await.unwrap().unwrap();
        assert_eq!(stored.content_hash.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn deleting_a_node_drops_incident_edges() {
        let repo = InMemoryGraphRepository::new();
        let a = node(&repo, "a").await;
        let b = node(&repo, "b").await;
        let c = node(&repo, "c").await;
        repo.create_edge(NewEdge::new("p1", a.id, b.id, EdgeType::DerivesFrom))
            .await
            .unwrap();
        repo.create_edge(NewEdge::new("p1", b.id, c.id, EdgeType::DerivesFrom))
            .await
            .unwrap();

        assert!(repo.delete_node(b.id).await.unwrap());
        assert!(!repo.delete_node(b.id).await.unwrap());
        assert_eq!(repo.edge_count(), 0);
        assert!(repo
            .find_node("p1", EntityType::Document, "b")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_edges_and_dangling_endpoints_are_rejected() {
        let repo = InMemoryGraphRepository::new();
        let a = node(&repo, "a").await;
        let b = node(&repo, "b").await;
        repo.create_edge(NewEdge::new("p1", a.id, b.id, EdgeType::Blocks))
            .await
            .unwrap();
        let dup = repo
            .create_edge(NewEdge::new("p1", a.id, b.id, EdgeType::Blocks))
            .await;
        assert!(matches!(dup, Err(GraphError::Conflict(_))));
        // A different type between the same endpoints is allowed.
        repo.create_edge(NewEdge::new("p1", a.id, b.id, EdgeType::RelatedTo))
            .await
            .unwrap();
        let dangling = repo
            .create_edge(NewEdge::new("p1", a.id, Uuid::new_v4(), EdgeType::Blocks))
            .await;
        assert!(matches!(dangling, Err(GraphError::NodeIdNotFound(_))));
    }

    #[test]
    fn alerts_keep_creation_order_across_updates() {
        use driftgraph_core::{AlertQuery, AlertStatus, DriftType, Severity};
        use tokio_test::block_on;

        let repo = InMemoryGraphRepository::new();
        let a = block_on(node(&repo, "a"));
        let b = block_on(node(&repo, "b"));
        let mut ids = Vec::new();
        for target in [Some(b.id), None] {
            let alert = block_on(repo.create_drift_alert(NewDriftAlert {
                project_id: "p1".into(),
                source_node_id: a.id,
                target_node_id: target,
                drift_type: DriftType::RequirementsDrift,
                description: "stale".into(),
                severity: Severity::Low,
            }))
            .unwrap();
            ids.push(alert.id);
        }

        let mut first = block_on(repo.find_drift_alert(ids[0])).unwrap().unwrap();
        first.status = AlertStatus::Dismissed;
        block_on(repo.update_drift_alert(first)).unwrap();

        let listed = block_on(repo.list_drift_alerts(&AlertQuery::project("p1"))).unwrap();
        assert_eq!(listed.iter().map(|a| a.id).collect::<Vec<_>>(), ids);
        assert_eq!(listed[0].status, AlertStatus::Dismissed);

        let missing = DriftAlert {
            id: Uuid::new_v4(),
            ..listed[1].clone()
        };
        assert!(matches!(
            block_on(repo.update_drift_alert(missing)),
            Err(GraphError::AlertNotFound(_))
        ));
    }

    #[tokio::test]
    async fn alert_status_swap_rejects_stale_status() {
        use driftgraph_core::{DriftType, Severity};

        let repo = InMemoryGraphRepository::new();
        let a = node(&repo, "a").await;
        let alert = repo
            .create_drift_alert(NewDriftAlert {
                project_id: "p1".into(),
                source_node_id: a.id,
                target_node_id: None,
                drift_type: DriftType::FoundationDrift,
                description: "stale".into(),
                severity: Severity::Medium,
            })
            .await
            .unwrap();
        let id = alert.id;

        let resolved = DriftAlert {
            status: AlertStatus::Resolved,
            resolved_by: Some("u1".into()),
            ..alert.clone()
        };
        let swapped = repo
            .update_drift_alert_if_status(resolved, AlertStatus::Open)
            .await
            .unwrap();
        assert_eq!(swapped.unwrap().status, AlertStatus::Resolved);

        let acked = DriftAlert {
            status: AlertStatus::Acknowledged,
            ..alert
        };
        let lost = repo
            .update_drift_alert_if_status(acked, AlertStatus::Open)
            .await
            .unwrap();
        assert!(lost.is_none());
        let stored = repo.find_drift_alert(id).await.unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Resolved);
        assert_eq!(stored.resolved_by.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn traverse_is_layered_and_cycle_safe() {
        let repo = InMemoryGraphRepository::new();
        let a = node(&repo, "a").await;
        let b = node(&repo, "b").await;
        let c = node(&repo, "c").await;
        for (s, t) in [(a.id, b.id), (b.id, c.id), (c.id, a.id)] {
            repo.create_edge(NewEdge::new("p1", s, t, EdgeType::RelatedTo))
                .await
                .unwrap();
        }

        let down = repo
            .traverse(a.id, TraversalDirection::Downstream, 10)
            .await
            .unwrap();
        assert_eq!(down.layers.len(), 2);
        assert_eq!(down.layers[0][0].node_id, b.id);
        assert_eq!(down.layers[1][0].node_id, c.id);

        let up = repo
            .traverse(a.id, TraversalDirection::Upstream, 1)
            .await
            .unwrap();
        assert_eq!(up.node_ids().collect::<Vec<_>>(), vec![c.id]);

        let both = repo
            .traverse(b.id, TraversalDirection::Both, 1)
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
    }
}

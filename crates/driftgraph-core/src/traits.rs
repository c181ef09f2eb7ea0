use crate::{
    AlertId, AlertQuery, AlertStatus, DriftAlert, EdgeId, EdgeQuery, EntityType, GraphEdge, GraphNode, NewDriftAlert,
    NewEdge, NewNode, NodeId, NodeSync, Result, TraversalDirection, TraversalResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Persistence contract for nodes, edges and drift alerts.
///
/// Each call is assumed transactional on its own; nothing spans a traversal.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    async fn find_node(
        &self,
        project_id: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<GraphNode>>;

    async fn find_node_by_id(&self, id: NodeId) -> Result<Option<GraphNode>>;

    /// Fails with `GraphError::Conflict` if the entity already has a node.
    async fn create_node(&self, node: NewNode) -> Result<GraphNode>;

    async fn update_node(&self, node: GraphNode) -> Result<GraphNode>;

    /// Compare-and-swap on `content_hash`. Returns `None` when the stored hash
    /// no longer equals `expected_hash`, leaving the node untouched.
    async fn update_node_if_hash(
        &self,
        id: NodeId,
        expected_hash: Option<&str>,
        sync: NodeSync,
    ) -> Result<Option<GraphNode>>;

    /// Removes the node and its incident edges. Returns whether it existed.
    async fn delete_node(&self, id: NodeId) -> Result<bool>;

    async fn list_nodes(
        &self,
        project_id: &str,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<GraphNode>>;

    /// Fails with `GraphError::Conflict` on a duplicate `(source, target, type)`.
    async fn create_edge(&self, edge: NewEdge) -> Result<GraphEdge>;

    async fn delete_edge(&self, id: EdgeId) -> Result<bool>;

    async fn find_edges(&self, query: &EdgeQuery) -> Result<Vec<GraphEdge>>;

    async fn traverse(
        &self,
        node_id: NodeId,
        direction: TraversalDirection,
        max_depth: usize,
    ) -> Result<TraversalResult>;

    async fn create_drift_alert(&self, alert: NewDriftAlert) -> Result<DriftAlert>;

    async fn find_drift_alert(&self, id: AlertId) -> Result<Option<DriftAlert>>;

    async fn list_drift_alerts(&self, query: &AlertQuery) -> Result<Vec<DriftAlert>>;

    async fn update_drift_alert(&self, alert: DriftAlert) -> Result<DriftAlert>;

    /// Compare-and-swap on `status`. Returns `None` when the stored status no
    /// longer equals `expected`, leaving the alert untouched.
    async fn update_drift_alert_if_status(
        &self,
        alert: DriftAlert,
        expected: AlertStatus,
    ) -> Result<Option<DriftAlert>>;
}

/// Coordinates of a codebase connection, as known to the indexing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodebaseConnection {
    pub connection_id: String,
    pub owner: String,
    pub repo: String,
    pub git_ref: String,
}

/// Reads file content from a connected code host.
#[async_trait]
pub trait FileContentReader: Send + Sync {
    async fn get_file_content(
        &self,
        connection_id: &str,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> anyhow::Result<Option<String>>;
}

/// Maps an indexed file path to the entity id of its graph node.
#[async_trait]
pub trait FileEntityResolver: Send + Sync {
    async fn resolve_file_entity_id(
        &self,
        project_id: &str,
        connection_id: &str,
        path: &str,
    ) -> anyhow::Result<Option<String>>;
}

/// Looks up codebase connection coordinates by id.
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    async fn connection(&self, connection_id: &str) -> anyhow::Result<Option<CodebaseConnection>>;
}

use crate::{EdgeId, EdgeType, Metadata, NodeId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Directed, typed relationship. `(source, target, edge_type)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: EdgeId,
    pub project_id: ProjectId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub edge_type: EdgeType,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl GraphEdge {
    /// The endpoint opposite to `node`, if `node` is incident to this edge.
    pub fn other_end(&self, node: NodeId) -> Option<NodeId> {
        if self.source_node_id == node {
            Some(self.target_node_id)
        } else if self.target_node_id == node {
            Some(self.source_node_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEdge {
    pub project_id: ProjectId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub edge_type: EdgeType,
    pub metadata: Metadata,
}

impl NewEdge {
    pub fn new(
        project_id: impl Into<ProjectId>,
        source_node_id: NodeId,
        target_node_id: NodeId,
        edge_type: EdgeType,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            source_node_id,
            target_node_id,
            edge_type,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Edge lookup filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeQuery {
    pub project_id: ProjectId,
    pub source_node_id: Option<NodeId>,
    pub target_node_id: Option<NodeId>,
    pub edge_type: Option<EdgeType>,
}

impl EdgeQuery {
    pub fn project(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn from_source(mut self, node: NodeId) -> Self {
        self.source_node_id = Some(node);
        self
    }

    pub fn to_target(mut self, node: NodeId) -> Self {
        self.target_node_id = Some(node);
        self
    }

    pub fn of_type(mut self, edge_type: EdgeType) -> Self {
        self.edge_type = Some(edge_type);
        self
    }

    pub fn matches(&self, edge: &GraphEdge) -> bool {
        edge.project_id == self.project_id
            && self.source_node_id.map_or(true, |s| s == edge.source_node_id)
            && self.target_node_id.map_or(true, |t| t == edge.target_node_id)
            && self.edge_type.map_or(true, |t| t == edge.edge_type)
    }
}

/// One node reached by a repository traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalStep {
    pub node_id: NodeId,
    pub via_edge: EdgeId,
    pub edge_type: EdgeType,
    pub depth: usize,
}

/// Layered traversal output; `layers[0]` holds depth-1 nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraversalResult {
    pub root: Option<NodeId>,
    pub layers: Vec<Vec<TraversalStep>>,
}

impl TraversalResult {
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.layers.iter().flatten().map(|s| s.node_id)
    }

    pub fn len(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

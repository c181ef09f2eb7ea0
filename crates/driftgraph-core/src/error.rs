use crate::{AlertId, AlertStatus, EntityType, NodeId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Node not found: {entity_type}/{entity_id} in project {project_id}")]
    NodeNotFound {
        project_id: String,
        entity_type: EntityType,
        entity_id: String,
    },

    #[error("Node not found: {0}")]
    NodeIdNotFound(NodeId),

    #[error("Alert not found: {0}")]
    AlertNotFound(AlertId),

    #[error("Invalid alert transition: {from} -> {to}")]
    InvalidAlertTransition { from: AlertStatus, to: AlertStatus },

    #[error("Concurrent modification conflict: {0}")]
    Conflict(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl GraphError {
    pub fn node_not_found(project_id: &str, entity_type: EntityType, entity_id: &str) -> Self {
        Self::NodeNotFound {
            project_id: project_id.to_string(),
            entity_type,
            entity_id: entity_id.to_string(),
        }
    }

    /// True for either flavour of missing-node error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NodeNotFound { .. } | Self::NodeIdNotFound(_))
    }

    /// Failures a queue retry can plausibly clear.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Repository(_) | Self::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;

use crate::{EntityType, Metadata, NodeId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Graph-visible identity of one domain entity.
///
/// `(project_id, entity_type, entity_id)` is unique across the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: NodeId,
    pub project_id: ProjectId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub label: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Hex digest of the entity's last-seen content; `None` until first sync.
    pub content_hash: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GraphNode {
    /// Both timestamps are required before staleness can be judged.
    pub fn synced_after(&self, other: &GraphNode, threshold: chrono::Duration) -> Option<bool> {
        let mine = self.last_synced_at?;
        let theirs = other.last_synced_at?;
        Some(mine > theirs + threshold)
    }
}

/// Insert request for a node; the repository assigns id and bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNode {
    pub project_id: ProjectId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub label: String,
    pub metadata: Metadata,
    pub content_hash: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl NewNode {
    pub fn new(
        project_id: impl Into<ProjectId>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            entity_type,
            entity_id: entity_id.into(),
            label: label.into(),
            metadata: Metadata::new(),
            content_hash: None,
            last_synced_at: None,
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_synced_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_synced_at = Some(at);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Fields rewritten when an entity's tracked content or label changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSync {
    pub label: String,
    pub content_hash: String,
    pub last_synced_at: DateTime<Utc>,
}

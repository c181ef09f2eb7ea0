use chrono::{DateTime, Utc};
use driftgraph_core::{EntityType, ProjectId};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type JobId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedFile {
    pub path: String,
    /// Missing content is fetched from the code host before syncing.
    #[serde(default)]
    pub content: Option<String>,
}

/// Work items understood by the graph worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    #[serde(rename_all = "camelCase")]
    FullScan { project_id: ProjectId },
    #[serde(rename_all = "camelCase")]
    PropagateChange {
        project_id: ProjectId,
        entity_type: EntityType,
        entity_id: String,
        new_content: String,
    },
    #[serde(rename_all = "camelCase")]
    CodeDriftCheck {
        project_id: ProjectId,
        connection_id: String,
        changed_files: Vec<ChangedFile>,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::FullScan { .. } => JobKind::FullScan,
            JobPayload::PropagateChange { .. } => JobKind::PropagateChange,
            JobPayload::CodeDriftCheck { .. } => JobKind::CodeDriftCheck,
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            JobPayload::FullScan { project_id }
            | JobPayload::PropagateChange { project_id, .. }
            | JobPayload::CodeDriftCheck { project_id, .. } => project_id,
        }
    }

    /// Stable id for payloads that must not be queued twice. Only full scans
    /// have one.
    pub fn dedup_id(&self) -> Option<JobId> {
        match self {
            JobPayload::FullScan { project_id } => Some(full_scan_job_id(project_id)),
            JobPayload::PropagateChange { .. } | JobPayload::CodeDriftCheck { .. } => None,
        }
    }
}

pub fn full_scan_job_id(project_id: &str) -> JobId {
    format!("full-scan:{project_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    FullScan,
    PropagateChange,
    CodeDriftCheck,
}

impl JobKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            JobKind::FullScan => "full_scan",
            JobKind::PropagateChange => "propagate_change",
            JobKind::CodeDriftCheck => "code_drift_check",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Overrides the payload's own dedup id.
    pub job_id: Option<JobId>,
    /// Hold the job back before its first attempt.
    pub delay: Option<std::time::Duration>,
}

impl AddOptions {
    pub fn with_job_id(mut self, id: impl Into<JobId>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Snapshot of one job as tracked by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    pub state: JobState,
    /// Attempts started so far.
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_use_kind_tag() {
        let payload = JobPayload::CodeDriftCheck {
            project_id: "p1".into(),
            connection_id: "conn".into(),
            changed_files: vec![ChangedFile {
                path: "src/main.rs".into(),
                content: None,
            }],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "code_drift_check");
        assert_eq!(json["projectId"], "p1");
        assert_eq!(json["changedFiles"][0]["path"], "src/main.rs");

        let parsed: JobPayload = serde_json::from_str(
            r#"{"kind":"propagate_change","projectId":"p1","entityType":"work_order","entityId":"wo-1","newContent":"x"}"#,
        )
        .unwrap();
        assert_eq!(parsed.kind(), JobKind::PropagateChange);
        assert_eq!(parsed.project_id(), "p1");
    }

    #[test]
    fn only_full_scans_are_deduplicated() {
        let scan = JobPayload::FullScan {
            project_id: "p1".into(),
        };
        assert_eq!(scan.dedup_id().as_deref(), Some("full-scan:p1"));

        let change = JobPayload::PropagateChange {
            project_id: "p1".into(),
            entity_type: EntityType::Document,
            entity_id: "d".into(),
            new_content: "c".into(),
        };
        assert!(change.dedup_id().is_none());
    }
}

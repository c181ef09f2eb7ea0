//! Status machines of the codebase indexing pipeline, whose completion events
//! feed code-drift checks.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileIndexStatus {
    Pending,
    Indexing,
    Complete,
    Failed,
}

impl FileIndexStatus {
    pub const fn can_transition_to(&self, next: FileIndexStatus) -> bool {
        use FileIndexStatus::*;
        matches!(
            (self, next),
            (Pending, Indexing) | (Indexing, Complete) | (Indexing, Failed) | (Failed, Pending)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionIndexStatus {
    Pending,
    Indexing,
    Completed,
    Failed,
}

impl ConnectionIndexStatus {
    pub const fn can_transition_to(&self, next: ConnectionIndexStatus) -> bool {
        use ConnectionIndexStatus::*;
        matches!(
            (self, next),
            (Pending, Indexing) | (Indexing, Completed) | (Indexing, Failed) | (Failed, Pending)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_status_flow() {
        use FileIndexStatus::*;
        assert!(Pending.can_transition_to(Indexing));
        assert!(Indexing.can_transition_to(Complete));
        assert!(Indexing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(Indexing));
        assert_eq!(serde_json::to_string(&Indexing).unwrap(), "\"INDEXING\"");
    }

    #[test]
    fn connection_status_flow() {
        use ConnectionIndexStatus::*;
        assert!(Pending.can_transition_to(Indexing));
        assert!(Indexing.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert_eq!(serde_json::to_string(&Completed).unwrap(), "\"completed\"");
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type NodeId = Uuid;
pub type EdgeId = Uuid;
pub type AlertId = Uuid;
pub type ProjectId = String;

/// Open key/value bag attached to nodes and edges.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Domain entity kinds that can own a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Document,
    WorkOrder,
    Feature,
    FeedbackItem,
    Artifact,
    CodebaseFile,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Document,
        EntityType::WorkOrder,
        EntityType::Feature,
        EntityType::FeedbackItem,
        EntityType::Artifact,
        EntityType::CodebaseFile,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityType::Document => "document",
            EntityType::WorkOrder => "work_order",
            EntityType::Feature => "feature",
            EntityType::FeedbackItem => "feedback_item",
            EntityType::Artifact => "artifact",
            EntityType::CodebaseFile => "codebase_file",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// Directed relationship kinds between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    DerivesFrom,
    SharedContext,
    Implements,
    FeedbackOn,
    ParentOf,
    References,
    Blocks,
    RelatedTo,
}

impl EdgeType {
    pub const ALL: [EdgeType; 8] = [
        EdgeType::DerivesFrom,
        EdgeType::SharedContext,
        EdgeType::Implements,
        EdgeType::FeedbackOn,
        EdgeType::ParentOf,
        EdgeType::References,
        EdgeType::Blocks,
        EdgeType::RelatedTo,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            EdgeType::DerivesFrom => "derives_from",
            EdgeType::SharedContext => "shared_context",
            EdgeType::Implements => "implements",
            EdgeType::FeedbackOn => "feedback_on",
            EdgeType::ParentOf => "parent_of",
            EdgeType::References => "references",
            EdgeType::Blocks => "blocks",
            EdgeType::RelatedTo => "related_to",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdgeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown edge type: {s}"))
    }
}

/// Kind of inconsistency a drift alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftType {
    CodeDrift,
    RequirementsDrift,
    FoundationDrift,
    WorkOrderDrift,
}

impl DriftType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DriftType::CodeDrift => "code_drift",
            DriftType::RequirementsDrift => "requirements_drift",
            DriftType::FoundationDrift => "foundation_drift",
            DriftType::WorkOrderDrift => "work_order_drift",
        }
    }

    /// Severity used by reconciliation scans, which have no traversal depth.
    pub const fn scan_severity(&self) -> Severity {
        match self {
            DriftType::CodeDrift | DriftType::RequirementsDrift => Severity::High,
            DriftType::FoundationDrift | DriftType::WorkOrderDrift => Severity::Medium,
        }
    }
}

impl fmt::Display for DriftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse urgency ranking. Ordering is `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Severity decays with traversal depth: 1 is high, 2 is medium, deeper is low.
    pub const fn for_depth(depth: usize) -> Severity {
        match depth {
            0 | 1 => Severity::High,
            2 => Severity::Medium,
            _ => Severity::Low,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a drift alert. `Resolved` and `Dismissed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl AlertStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::Dismissed)
    }

    /// Alerts still demanding attention; used for deduplication.
    pub const fn is_active(&self) -> bool {
        matches!(self, AlertStatus::Open | AlertStatus::Acknowledged)
    }

    /// Transitions only move forward. `Open` is never re-entered.
    pub const fn can_transition_to(&self, next: AlertStatus) -> bool {
        match (self, next) {
            (AlertStatus::Open, AlertStatus::Acknowledged) => true,
            (AlertStatus::Open | AlertStatus::Acknowledged, AlertStatus::Resolved) => true,
            (AlertStatus::Open | AlertStatus::Acknowledged, AlertStatus::Dismissed) => true,
            _ => false,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a traversal relative to edge orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalDirection {
    /// Follow edges backwards, towards sources.
    Upstream,
    /// Follow edges forwards, towards targets.
    Downstream,
    Both,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_and_edge_types_round_trip_through_strings() {
        for t in EntityType::ALL {
            assert_eq!(t.as_str().parse::<EntityType>().unwrap(), t);
        }
        for t in EdgeType::ALL {
            assert_eq!(t.to_string().parse::<EdgeType>().unwrap(), t);
        }
        assert!("feature_blueprint".parse::<EntityType>().is_err());
    }

    #[test]
    fn serde_uses_snake_case_wire_names() {
        let json = serde_json::to_string(&EntityType::CodebaseFile).unwrap();
        assert_eq!(json, "\"codebase_file\"");
        let parsed: EdgeType = serde_json::from_str("\"shared_context\"").unwrap();
        assert_eq!(parsed, EdgeType::SharedContext);
    }

    #[test]
    fn severity_decays_with_depth() {
        assert_eq!(Severity::for_depth(1), Severity::High);
        assert_eq!(Severity::for_depth(2), Severity::Medium);
        assert_eq!(Severity::for_depth(3), Severity::Low);
        assert_eq!(Severity::for_depth(10), Severity::Low);
        assert!(Severity::High > Severity::Medium && Severity::Medium > Severity::Low);
    }

    #[test]
    fn alert_status_transitions_are_monotonic() {
        use AlertStatus::*;
        assert!(Open.can_transition_to(Acknowledged));
        assert!(Open.can_transition_to(Resolved));
        assert!(Acknowledged.can_transition_to(Dismissed));
        assert!(!Acknowledged.can_transition_to(Open));
        assert!(!Resolved.can_transition_to(Open));
        assert!(!Dismissed.can_transition_to(Resolved));
        assert!(!Open.can_transition_to(Open));
        assert!(Resolved.is_terminal() && !Acknowledged.is_terminal());
    }
}

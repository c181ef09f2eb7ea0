use driftgraph_core::{DriftType, EdgeType, EntityType};

/// Maps an edge's `(source type, target type, edge type)` to the drift it
/// implies, or `None` when the relationship carries no drift semantics.
///
/// The outer match is exhaustive over [`EdgeType`], so a new edge type does not
/// compile until it is given a drift rule.
pub fn classify_drift(
    source: EntityType,
    target: EntityType,
    edge_type: EdgeType,
) -> Option<DriftType> {
    use EntityType::{CodebaseFile, Document, WorkOrder};

    match edge_type {
        EdgeType::Implements => (source == CodebaseFile).then_some(DriftType::CodeDrift),
        EdgeType::DerivesFrom => match (source, target) {
            (Document, Document) => Some(DriftType::RequirementsDrift),
            (Document, WorkOrder) => Some(DriftType::WorkOrderDrift),
            _ => None,
        },
        EdgeType::SharedContext => Some(DriftType::FoundationDrift),
        EdgeType::FeedbackOn
        | EdgeType::ParentOf
        | EdgeType::References
        | EdgeType::Blocks
        | EdgeType::RelatedTo => None,
    }
}

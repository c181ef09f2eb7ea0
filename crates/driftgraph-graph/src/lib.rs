//! Drift detection and change propagation over the DriftGraph model.
//!
//! [`GraphService`] is the entry point for domain write-paths. The
//! [`ChangePropagator`], [`DriftDetector`] and [`AlertGenerator`] are also
//! usable on their own, e.g. from background jobs.

pub mod alerts;
pub mod classifier;
pub mod detector;
pub mod memory;
pub mod propagator;
pub mod service;

pub use alerts::{describe_drift, has_active_alert, AlertGenerationSummary, AlertGenerator};
pub use classifier::classify_drift;
pub use detector::{DriftDetector, DriftReport, DriftReportEntry};
pub use memory::InMemoryGraphRepository;
pub use propagator::{ChangePropagator, PropagationResult, PropagatorConfig};
pub use service::{
    ContextEntry, EntityRef, GraphContext, GraphService, PropagationEvent, RelatedNode,
    RelationDirection,
};

//! Background reconciliation for DriftGraph: job payloads, an in-process
//! retrying queue, a rate-limited worker and per-project repeat scheduling.

pub mod handlers;
pub mod job;
pub mod queue;
pub mod scheduler;
pub mod worker;

pub use handlers::{CodeDriftOutcome, CodebaseSources, GraphJobHandler, PropagateChangeOutcome};
pub use job::{full_scan_job_id, AddOptions, ChangedFile, Job, JobId, JobKind, JobPayload, JobState};
pub use queue::{JobCounts, JobQueue, QueueError};
pub use scheduler::RepeatScheduler;
pub use worker::{JobHandler, Worker};

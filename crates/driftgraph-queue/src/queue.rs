use crate::job::{AddOptions, Job, JobId, JobPayload, JobState};
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use driftgraph_core::QueueSettings;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use priority_queue::PriorityQueue;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),
    #[error("Job {id} is {state:?}, expected it to be active")]
    NotActive { id: JobId, state: JobState },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Ready-time ordering; the sequence number keeps ties first-in first-out.
type ReadyAt = Reverse<(Instant, u64)>;

/// In-process job queue with id deduplication, delayed retries and bounded
/// retention of finished jobs.
pub struct JobQueue {
    settings: QueueSettings,
    jobs: DashMap<JobId, Job>,
    ready: Mutex<PriorityQueue<JobId, ReadyAt>>,
    seq: AtomicU64,
    notify: Notify,
    completed: Mutex<VecDeque<JobId>>,
    failed: Mutex<VecDeque<JobId>>,
}

impl JobQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            jobs: DashMap::new(),
            ready: Mutex::new(PriorityQueue::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
            completed: Mutex::new(VecDeque::new()),
            failed: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Enqueues a payload. If a job with the same id is still waiting,
    /// delayed or active, nothing is added and that job's id is returned.
    pub fn add(&self, payload: JobPayload, options: AddOptions) -> JobId {
        let id = options
            .job_id
            .or_else(|| payload.dedup_id())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let state = if options.delay.is_some() {
            JobState::Delayed
        } else {
            JobState::Waiting
        };
        let kind = payload.kind();
        let job = Job {
            id: id.clone(),
            payload,
            state,
            attempts_made: 0,
            max_attempts: self.settings.attempts.max(1),
            last_error: None,
            created_at: Utc::now(),
            finished_at: None,
        };

        // Check and insert under the same shard lock.
        match self.jobs.entry(id.clone()) {
            Entry::Occupied(existing) if !existing.get().state.is_terminal() => {
                debug!(queue = %self.settings.name, job = %id, "duplicate job id, skipping add");
                return id;
            }
            Entry::Occupied(mut finished) => {
                finished.insert(job);
            }
            Entry::Vacant(slot) => {
                slot.insert(job);
            }
        }
        self.forget_finished(&id);
        self.schedule(&id, Instant::now() + options.delay.unwrap_or_default());

        counter!("jobs_added", "queue" => self.settings.name.clone(), "kind" => kind.as_str())
            .increment(1);
        info!(queue = %self.settings.name, job = %id, %kind, "job added");
        id
    }

    fn schedule(&self, id: &JobId, at: Instant) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut ready = self.ready.lock();
        ready.push(id.clone(), Reverse((at, seq)));
        gauge!("queue_waiting", "queue" => self.settings.name.clone()).set(ready.len() as f64);
        drop(ready);
        self.notify.notify_one();
    }

    fn forget_finished(&self, id: &JobId) {
        self.completed.lock().retain(|j| j != id);
        self.failed.lock().retain(|j| j != id);
    }

    /// Pops the next due job and marks it active. Returns `None` once
    /// `cancel` fires.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<Job> {
        loop {
            let due = self.ready.lock().peek().map(|(_, Reverse((at, _)))| *at);
            match due {
                Some(at) if at <= Instant::now() => {
                    let popped = {
                        let mut ready = self.ready.lock();
                        let popped = ready.pop();
                        gauge!("queue_waiting", "queue" => self.settings.name.clone())
                            .set(ready.len() as f64);
                        popped
                    };
                    if let Some(job) = popped.and_then(|(id, _)| self.activate(&id)) {
                        return Some(job);
                    }
                }
                Some(at) => tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep_until(at) => {}
                },
                None => tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = self.notify.notified() => {}
                },
            }
        }
    }

    fn activate(&self, id: &JobId) -> Option<Job> {
        let mut job = self.jobs.get_mut(id)?;
        if job.state.is_terminal() || job.state == JobState::Active {
            return None;
        }
        job.state = JobState::Active;
        job.attempts_made += 1;
        Some(job.clone())
    }

    pub fn complete(&self, id: &JobId) -> Result<(), QueueError> {
        let kind = {
            let mut job = self.active_job(id)?;
            job.state = JobState::Completed;
            job.finished_at = Some(Utc::now());
            job.payload.kind()
        };
        counter!("jobs_completed", "queue" => self.settings.name.clone(), "kind" => kind.as_str())
            .increment(1);
        self.retain_bounded(&self.completed, id, self.settings.remove_on_complete);
        Ok(())
    }

    /// Records a failed attempt. The job is delayed for another attempt with
    /// exponential backoff, or marked failed once attempts are exhausted.
    pub fn fail(&self, id: &JobId, error: impl Into<String>) -> Result<JobState, QueueError> {
        let error = error.into();
        let (attempts_made, max_attempts, kind) = {
            let mut job = self.active_job(id)?;
            job.last_error = Some(error.clone());
            if job.attempts_made < job.max_attempts {
                job.state = JobState::Delayed;
            } else {
                job.state = JobState::Failed;
                job.finished_at = Some(Utc::now());
            }
            (job.attempts_made, job.max_attempts, job.payload.kind())
        };

        if attempts_made < max_attempts {
            let delay = self.backoff_for(attempts_made);
            warn!(
                queue = %self.settings.name,
                job = %id,
                attempt = attempts_made,
                retry_in_ms = delay.as_millis() as u64,
                %error,
                "job attempt failed, retrying"
            );
            counter!("jobs_retried", "queue" => self.settings.name.clone(), "kind" => kind.as_str())
                .increment(1);
            self.schedule(id, Instant::now() + delay);
            Ok(JobState::Delayed)
        } else {
            counter!("jobs_failed", "queue" => self.settings.name.clone(), "kind" => kind.as_str())
                .increment(1);
            self.retain_bounded(&self.failed, id, self.settings.remove_on_fail);
            Ok(JobState::Failed)
        }
    }

    /// Delay before the attempt following attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.settings.backoff_initial().saturating_mul(1u32 << exp)
    }

    fn active_job(
        &self,
        id: &JobId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, JobId, Job>, QueueError> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;
        if job.state != JobState::Active {
            return Err(QueueError::NotActive {
                id: id.clone(),
                state: job.state,
            });
        }
        Ok(job)
    }

    fn retain_bounded(&self, list: &Mutex<VecDeque<JobId>>, id: &JobId, keep: usize) {
        let evicted: Vec<JobId> = {
            let mut list = list.lock();
            list.push_back(id.clone());
            let excess = list.len().saturating_sub(keep);
            list.drain(..excess).collect()
        };
        for old in evicted {
            // A re-added job with the same id is no longer terminal.
            self.jobs.remove_if(&old, |_, job| job.state.is_terminal());
        }
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|j| j.clone())
    }

    pub fn job_state(&self, id: &str) -> Option<JobState> {
        self.jobs.get(id).map(|j| j.state)
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for job in self.jobs.iter() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

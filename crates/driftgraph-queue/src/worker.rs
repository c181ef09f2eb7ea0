use crate::job::{Job, JobState};
use crate::queue::JobQueue;
use anyhow::anyhow;
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use metrics::histogram;
use std::any::Any;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Executes one job attempt. An `Err` or a panic hands the job back to the
/// queue's retry policy.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;
}

/// Pulls jobs from a [`JobQueue`] and runs them with bounded concurrency
/// under a per-minute rate limit.
pub struct Worker {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    concurrency: usize,
}

impl Worker {
    pub fn new(queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>) -> Self {
        let settings = queue.settings();
        let per_minute = NonZeroU32::new(settings.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            concurrency: settings.concurrency.max(1),
            queue,
            handler,
        }
    }

    /// Runs until `cancel` fires, then waits for in-flight jobs to finish.
    pub async fn run(self, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        info!(
            queue = %self.queue.name(),
            concurrency = self.concurrency,
            "worker started"
        );

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.limiter.until_ready() => {}
            }

            let Some(job) = self.queue.next(&cancel).await else {
                break;
            };

            let queue = self.queue.clone();
            let handler = self.handler.clone();
            tokio::spawn(async move {
                let _permit = permit;
                process(&queue, handler, job).await;
            });
        }

        // Every permit back means every spawned attempt has finished.
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
        info!(queue = %self.queue.name(), "worker stopped");
    }
}

async fn process(queue: &JobQueue, handler: Arc<dyn JobHandler>, job: Job) {
    let kind = job.payload.kind();
    let started = Instant::now();
    let attempt = job.clone();
    let outcome = match tokio::spawn(async move { handler.handle(&attempt).await }).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(anyhow!(
            "job handler panicked: {}",
            panic_message(&*e.into_panic())
        )),
        Err(e) => Err(anyhow!("job handler was cancelled: {e}")),
    };
    histogram!("job_duration", "queue" => queue.name().to_string(), "kind" => kind.as_str())
        .record(started.elapsed());

    let recorded = match outcome {
        Ok(()) => {
            info!(job = %job.id, %kind, attempt = job.attempts_made, "job completed");
            queue.complete(&job.id).map(|_| JobState::Completed)
        }
        Err(e) => {
            let message = format!("{e:#}");
            match queue.fail(&job.id, message.clone()) {
                Ok(JobState::Failed) => {
                    error!(job = %job.id, %kind, attempts = job.attempts_made, error = %message, "job failed permanently");
                    Ok(JobState::Failed)
                }
                other => other,
            }
        }
    };
    if let Err(e) = recorded {
        warn!(job = %job.id, error = %e, "could not record job outcome");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

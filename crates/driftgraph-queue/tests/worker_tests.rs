use async_trait::async_trait;
use driftgraph_core::{EntityType, QueueSettings};
use driftgraph_queue::{
    AddOptions, Job, JobHandler, JobPayload, JobQueue, JobState, Worker,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_settings() -> QueueSettings {
    QueueSettings {
        backoff_initial_ms: 5,
        concurrency: 2,
        rate_limit_per_minute: 600,
        ..QueueSettings::graph()
    }
}

/// Fails each job id a configured number of times before succeeding.
#[derive(Default)]
struct FlakyHandler {
    failures_left: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FlakyHandler {
    fn failing(id: &str, times: usize) -> Self {
        let handler = Self::default();
        handler.failures_left.lock().insert(id.to_string(), times);
        handler
    }
}

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut failures = self.failures_left.lock();
        match failures.get_mut(&job.id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                anyhow::bail!("transient failure for {}", job.id)
            }
            _ => Ok(()),
        }
    }
}

struct PanickingHandler;

#[async_trait]
impl JobHandler for PanickingHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        panic!("scan of {} blew up", job.id);
    }
}

async fn wait_until(queue: &JobQueue, done: impl Fn(&JobQueue) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(queue) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue did not settle in time");
}

fn change(entity: &str) -> JobPayload {
    JobPayload::PropagateChange {
        project_id: "proj".into(),
        entity_type: EntityType::Document,
        entity_id: entity.into(),
        new_content: "body".into(),
    }
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let queue = Arc::new(JobQueue::new(fast_settings()));
    let id = queue.add(change("doc"), AddOptions::default().with_job_id("flaky"));
    let handler = Arc::new(FlakyHandler::failing(&id, 2));

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(Worker::new(queue.clone(), handler.clone()).run(cancel.clone()));

    wait_until(&queue, |q| q.job_state("flaky") == Some(JobState::Completed)).await;
    let job = queue.job("flaky").unwrap();
    assert_eq!(job.attempts_made, 3);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_mark_job_failed() {
    let queue = Arc::new(JobQueue::new(fast_settings()));
    queue.add(change("doc"), AddOptions::default().with_job_id("doomed"));
    let handler = Arc::new(FlakyHandler::failing("doomed", 10));

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(Worker::new(queue.clone(), handler.clone()).run(cancel.clone()));

    wait_until(&queue, |q| q.job_state("doomed") == Some(JobState::Failed)).await;
    let job = queue.job("doomed").unwrap();
    assert_eq!(job.attempts_made, 3);
    assert!(job.last_error.unwrap().contains("transient failure"));
    assert_eq!(queue.counts().failed, 1);

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let queue = Arc::new(JobQueue::new(fast_settings()));
    for i in 0..8 {
        queue.add(change(&format!("doc-{i}")), AddOptions::default());
    }
    let handler = Arc::new(FlakyHandler::default());

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(Worker::new(queue.clone(), handler.clone()).run(cancel.clone()));

    wait_until(&queue, |q| q.counts().completed == 8).await;
    assert!(handler.max_in_flight.load(Ordering::SeqCst) <= 2);

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_rate_limit_caps_job_starts() {
    let settings = QueueSettings {
        rate_limit_per_minute: 2,
        ..fast_settings()
    };
    let queue = Arc::new(JobQueue::new(settings));
    for i in 0..4 {
        queue.add(change(&format!("doc-{i}")), AddOptions::default());
    }
    let handler = Arc::new(FlakyHandler::default());

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(Worker::new(queue.clone(), handler.clone()).run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    // The burst allowance is spent; the rest wait for the next slot.
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.counts().waiting, 2);

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_panicking_handler_is_retried_then_failed() {
    let queue = Arc::new(JobQueue::new(fast_settings()));
    let scan = || JobPayload::FullScan {
        project_id: "p1".into(),
    };
    let id = queue.add(scan(), AddOptions::default());

    let cancel = CancellationToken::new();
    let handler = Arc::new(PanickingHandler);
    let worker = tokio::spawn(Worker::new(queue.clone(), handler).run(cancel.clone()));

    wait_until(&queue, |q| q.job_state(&id) == Some(JobState::Failed)).await;
    let job = queue.job(&id).unwrap();
    assert_eq!(job.attempts_made, 3);
    assert!(job.last_error.unwrap().contains("blew up"));

    cancel.cancel();
    worker.await.unwrap();

    // The stable full-scan id is free again once the job has failed.
    assert_eq!(queue.counts().active, 0);
    assert_eq!(queue.add(scan(), AddOptions::default()), id);
    assert_eq!(queue.job_state(&id), Some(JobState::Waiting));
}

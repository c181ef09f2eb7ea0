use crate::job::{AddOptions, JobPayload};
use crate::queue::JobQueue;
use dashmap::{mapref::entry::Entry, DashMap};
use driftgraph_core::ProjectId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Periodic per-project full scans. Each registration is a timer task that
/// enqueues a deduplicated `full_scan` job on every tick.
pub struct RepeatScheduler {
    queue: Arc<JobQueue>,
    every: Duration,
    tasks: DashMap<ProjectId, JoinHandle<()>>,
}

impl RepeatScheduler {
    pub fn new(queue: Arc<JobQueue>, every: Duration) -> Self {
        Self {
            queue,
            every,
            tasks: DashMap::new(),
        }
    }

    /// Registers a periodic full scan. Returns false if one already exists.
    pub fn schedule_full_scan(&self, project_id: &str) -> bool {
        let Entry::Vacant(slot) = self.tasks.entry(project_id.to_string()) else {
            return false;
        };

        let queue = self.queue.clone();
        let every = self.every;
        let project = project_id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + every, every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let id = queue.add(
                    JobPayload::FullScan {
                        project_id: project.clone(),
                    },
                    AddOptions::default(),
                );
                debug!(job = %id, "periodic full scan enqueued");
            }
        });

        slot.insert(handle);
        info!(project = %project_id, every_secs = self.every.as_secs(), "full scan scheduled");
        true
    }

    /// Stops a periodic full scan. Returns whether one was registered.
    pub fn remove_full_scan(&self, project_id: &str) -> bool {
        match self.tasks.remove(project_id) {
            Some((_, handle)) => {
                handle.abort();
                info!(project = %project_id, "full scan unscheduled");
                true
            }
            None => false,
        }
    }

    pub fn scheduled_projects(&self) -> Vec<ProjectId> {
        let mut projects: Vec<ProjectId> = self.tasks.iter().map(|e| e.key().clone()).collect();
        projects.sort();
        projects
    }

    pub fn shutdown(&self) {
        self.tasks.retain(|_, handle| {
            handle.abort();
            false
        });
    }
}

impl Drop for RepeatScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::full_scan_job_id;
    use crate::queue::JobQueue;
    use driftgraph_core::QueueSettings;

    #[tokio::test]
    async fn ticks_enqueue_one_deduplicated_scan() {
        let queue = Arc::new(JobQueue::new(QueueSettings::graph()));
        let scheduler = RepeatScheduler::new(queue.clone(), Duration::from_millis(10));

        assert!(scheduler.schedule_full_scan("p1"));
        assert!(!scheduler.schedule_full_scan("p1"));
        assert_eq!(queue.counts().waiting, 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Several ticks fired, but the job id is stable while it waits.
        assert_eq!(queue.counts().waiting, 1);
        assert!(queue.job(&full_scan_job_id("p1")).is_some());

        assert!(scheduler.remove_full_scan("p1"));
        assert!(!scheduler.remove_full_scan("p1"));
        assert!(scheduler.scheduled_projects().is_empty());
    }
}

//! In-process job queue and producer API.
//!
//! Jobs are appended to partitions keyed by `team:action`. At most one job
//! per partition is ever active, which is what keeps two automations from
//! fighting over the same external account (or the same persistent browser
//! session). Producers never block on execution: `add_job` validates,
//! assigns an id, and returns.

use crate::error::{Error, Result};
use crate::job::{
    generate_job_id, now_millis, ActionOutcome, JobId, JobRecord, JobRequest, JobState,
    JobStatusView, QueueStats,
};
use crate::metrics;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// A job handed to a worker. The partition stays blocked until the worker
/// reports back through `mark_done`/`mark_failed`.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job_id: JobId,
    pub request: JobRequest,
    pub partition: String,
}

#[derive(Default)]
struct QueueInner {
    jobs: HashMap<JobId, JobRecord>,
    /// Waiting job ids per partition, in enqueue order.
    waiting: HashMap<String, VecDeque<JobId>>,
    /// Partitions currently owned by a worker.
    active: HashSet<String>,
}

/// Producer/consumer queue for automation jobs.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    fn partition_key(request: &JobRequest) -> String {
        format!("{}:{}", request.team_id, request.action)
    }

    /// Validate and enqueue a job. Returns the assigned id immediately;
    /// malformed payloads are rejected synchronously and never enter the
    /// queue.
    pub fn add_job(&self, request: JobRequest) -> Result<JobId> {
        if request.action.trim().is_empty() {
            return Err(Error::Validation("action is required".to_string()));
        }
        if request.game_name.trim().is_empty() {
            return Err(Error::Validation("gameName is required".to_string()));
        }

        let job_id = generate_job_id();
        let partition = Self::partition_key(&request);
        let record = JobRecord {
            job_id: job_id.clone(),
            request,
            state: JobState::Waiting,
            partition: partition.clone(),
            outcome: None,
            error: None,
            created_ms: now_millis(),
            started_ms: None,
            finished_ms: None,
        };

        {
            let mut inner = self.inner.lock().unwrap();
            inner
                .waiting
                .entry(partition)
                .or_default()
                .push_back(job_id.clone());
            inner.jobs.insert(job_id.clone(), record);
        }
        metrics::record_job_enqueued();
        self.notify.notify_one();
        Ok(job_id)
    }

    /// Pop the oldest waiting job from some partition with no active job.
    /// Returns `None` when no job is currently eligible.
    pub fn dequeue(&self) -> Option<LeasedJob> {
        let mut inner = self.inner.lock().unwrap();
        let partition = inner
            .waiting
            .iter()
            .filter(|(key, queue)| !queue.is_empty() && !inner.active.contains(*key))
            .map(|(key, _)| key.clone())
            .min()?;

        let job_id = inner.waiting.get_mut(&partition)?.pop_front()?;
        inner.active.insert(partition.clone());

        let record = inner.jobs.get_mut(&job_id)?;
        record.state = JobState::Active;
        record.started_ms = Some(now_millis());
        Some(LeasedJob {
            job_id,
            request: record.request.clone(),
            partition,
        })
    }

    /// Wait until a job is eligible and lease it.
    pub async fn next_job(&self) -> LeasedJob {
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.dequeue() {
                return job;
            }
            notified.await;
        }
    }

    /// Record the outcome of a finished job and release its partition.
    ///
    /// A job cancelled while in flight keeps its `Cancelled` state; the late
    /// outcome is dropped.
    pub fn mark_done(&self, job_id: &str, outcome: ActionOutcome) -> Result<()> {
        self.finish(job_id, Some(outcome), None)
    }

    /// Record an infrastructure failure (the job never produced an outcome).
    pub fn mark_failed(&self, job_id: &str, message: impl Into<String>) -> Result<()> {
        self.finish(job_id, None, Some(message.into()))
    }

    fn finish(
        &self,
        job_id: &str,
        outcome: Option<ActionOutcome>,
        error: Option<String>,
    ) -> Result<()> {
        let state;
        {
            let mut inner = self.inner.lock().unwrap();
            let record = inner
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

            if record.state == JobState::Cancelled {
                // Cancelled while in flight; drop the late result.
                state = JobState::Cancelled;
            } else {
                record.state = if error.is_some() {
                    JobState::Failed
                } else {
                    JobState::Completed
                };
                record.outcome = outcome;
                record.error = error;
                record.finished_ms = Some(now_millis());
                state = record.state;
            }
            let partition = record.partition.clone();
            inner.active.remove(&partition);
        }
        if state != JobState::Cancelled {
            metrics::record_job_finished(state);
        }
        // The partition is free again; wake a worker.
        self.notify.notify_one();
        Ok(())
    }

    /// Current lifecycle state plus result payload once terminal. Returns
    /// `None` for unknown ids and for jobs owned by another team.
    pub fn get_job_status(&self, job_id: &str, team_id: i64) -> Option<JobStatusView> {
        let inner = self.inner.lock().unwrap();
        let record = inner.jobs.get(job_id)?;
        if record.request.team_id != team_id {
            return None;
        }
        Some(JobStatusView {
            job_id: record.job_id.clone(),
            state: record.state,
            outcome: record.outcome.clone(),
            error: record.error.clone(),
        })
    }

    /// Aggregate counts for one team without dequeuing anything.
    pub fn get_queue_stats(&self, team_id: i64) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        let mut stats = QueueStats::default();
        for record in inner.jobs.values() {
            if record.request.team_id != team_id {
                continue;
            }
            match record.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
                JobState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Cancel a waiting or active job.
    ///
    /// Waiting jobs are removed from their partition outright. Active jobs
    /// are marked cancelled at the queue level only; the in-flight browser
    /// script is not interrupted and its late result is dropped. Cancelling
    /// a terminal job is an explicit error.
    pub fn cancel_job(&self, job_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;

        match record.state {
            JobState::Waiting => {
                record.state = JobState::Cancelled;
                record.finished_ms = Some(now_millis());
                let partition = record.partition.clone();
                if let Some(queue) = inner.waiting.get_mut(&partition) {
                    queue.retain(|id| id != job_id);
                }
            }
            JobState::Active => {
                // Bookkeeping removal only; the partition stays blocked
                // until the worker reports back.
                record.state = JobState::Cancelled;
                record.finished_ms = Some(now_millis());
            }
            state => {
                return Err(Error::NotCancellable {
                    job_id: job_id.to_string(),
                    state: state.to_string(),
                });
            }
        }
        metrics::record_job_finished(JobState::Cancelled);
        Ok(())
    }

    /// Evict terminal records that finished more than `window` ago.
    /// Returns the number of records removed.
    pub fn evict_terminal(&self, window: Duration) -> usize {
        let cutoff = now_millis().saturating_sub(window.as_millis() as u64);
        let mut inner = self.inner.lock().unwrap();
        let before = inner.jobs.len();
        inner.jobs.retain(|_, record| {
            !(record.state.is_terminal() && record.finished_ms.unwrap_or(0) <= cutoff)
        });
        before - inner.jobs.len()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

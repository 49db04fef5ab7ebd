//! Queue consumer.
//!
//! One worker executes one job to completion, synchronously: resolve the
//! credential, acquire a browser session, run the action through the
//! executor, persist session state, report back to the queue. The
//! screenshot sampler is the only concurrent piece, and stopping it is the
//! one bit of per-job cleanup not delegated to the resource registry
//! (it is a timer, not a browser resource). Everything browser-shaped is
//! reclaimed by a registry sweep after each job.

use crate::broadcast::{CaptureSource, FrameTag, ScreenshotBroadcaster, ScreenshotSampler};
use crate::config::Config;
use crate::error::Result;
use crate::executor::ActionExecutor;
use crate::job::JobRequest;
use crate::panel::PanelPage;
use crate::queue::{JobQueue, LeasedJob};
use crate::registry::ResourceRegistry;
use crate::store::{GameCredential, SessionStore};
use async_trait::async_trait;
use std::sync::Arc;

/// A browser session acquired for one job.
pub struct AcquiredSession {
    pub page: Arc<dyn PanelPage>,
    pub capture: Arc<dyn CaptureSource>,
    /// Registry id of the page, for persistence bookkeeping.
    pub page_id: String,
    /// Persistent sessions survive the post-job sweep and skip the next
    /// login; ephemeral ones are reclaimed.
    pub persistent: bool,
    /// Login/session state to persist for reuse.
    pub session_token: Option<String>,
    pub session_data: Option<String>,
}

/// Resolves or creates the browser session a job needs. The chromiumoxide
/// implementation lives in [`crate::browser`]; tests plug in doubles.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn acquire(
        &self,
        request: &JobRequest,
        credential: &GameCredential,
    ) -> Result<AcquiredSession>;
}

pub struct Worker {
    queue: Arc<JobQueue>,
    store: Arc<SessionStore>,
    registry: Arc<ResourceRegistry>,
    executor: Arc<ActionExecutor>,
    broadcaster: ScreenshotBroadcaster,
    factory: Arc<dyn SessionFactory>,
    config: Config,
}

impl Worker {
    pub fn new(
        queue: Arc<JobQueue>,
        store: Arc<SessionStore>,
        registry: Arc<ResourceRegistry>,
        executor: Arc<ActionExecutor>,
        broadcaster: ScreenshotBroadcaster,
        factory: Arc<dyn SessionFactory>,
        config: Config,
    ) -> Self {
        Self {
            queue,
            store,
            registry,
            executor,
            broadcaster,
            factory,
            config,
        }
    }

    /// Consume jobs forever.
    pub async fn run_loop(&self) {
        loop {
            self.run_next().await;
        }
    }

    /// Wait for the next eligible job and process it.
    pub async fn run_next(&self) {
        let job = self.queue.next_job().await;
        self.process(job).await;
    }

    /// Process one eligible job if there is one. Returns whether a job ran.
    pub async fn try_run_next(&self) -> bool {
        match self.queue.dequeue() {
            Some(job) => {
                self.process(job).await;
                true
            }
            None => false,
        }
    }

    async fn process(&self, job: LeasedJob) {
        let request = &job.request;
        eprintln!(
            "[worker] Running job {} ({} for team {})",
            job.job_id, request.action, request.team_id
        );

        let credential = match self.store.get_credential_by_id(request.game_credential_id) {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                self.fail(&job, format!("Credential {} not found", request.game_credential_id));
                return;
            }
            Err(e) => {
                self.fail(&job, format!("Credential lookup failed: {}", e));
                return;
            }
        };

        let session = match self.factory.acquire(request, &credential).await {
            Ok(session) => session,
            Err(e) => {
                self.fail(&job, format!("Failed to acquire browser session: {}", e));
                self.sweep().await;
                return;
            }
        };

        // The sampler runs concurrently with the sequential script steps;
        // its guard stops it on every exit path.
        let sampler = ScreenshotSampler::start(
            session.capture.clone(),
            FrameTag {
                game_id: request.game_id,
                game_name: request.game_name.clone(),
                action: request.action.clone(),
                team_id: request.team_id,
                session_id: request.session_id.clone(),
            },
            self.broadcaster.clone(),
            self.config.screenshot_interval(),
        );

        let outcome = self.executor.run(request, session.page.as_ref()).await;

        if session.session_token.is_some() || session.session_data.is_some() {
            if let Err(e) = self.store.get_or_create_session(
                request.user_id,
                credential.id,
                session.session_token.as_deref(),
                session.session_data.as_deref(),
                self.config.session_ttl(),
            ) {
                eprintln!("[worker] Failed to persist session state: {}", e);
            }
        }

        sampler.stop().await;

        if let Err(e) = self.queue.mark_done(&job.job_id, outcome) {
            eprintln!("[worker] Failed to record job outcome: {}", e);
        }

        self.sweep().await;
    }

    fn fail(&self, job: &LeasedJob, message: String) {
        eprintln!("[worker] Job {} failed: {}", job.job_id, message);
        if let Err(e) = self.queue.mark_failed(&job.job_id, message) {
            eprintln!("[worker] Failed to record job failure: {}", e);
        }
    }

    /// Reclaim everything ephemeral the job touched. Persistent sessions
    /// are protected inside the registry and survive.
    async fn sweep(&self) {
        if let Err(e) = self
            .registry
            .cleanup_all_with_timeout(self.config.cleanup_timeout())
            .await
        {
            eprintln!("[worker] Post-job cleanup incomplete: {}", e);
        }
    }
}

/// Convenience bundle wiring one worker's collaborators together.
pub struct WorkerHandles {
    pub queue: Arc<JobQueue>,
    pub store: Arc<SessionStore>,
    pub registry: Arc<ResourceRegistry>,
    pub broadcaster: ScreenshotBroadcaster,
}

impl Worker {
    /// Build a worker and return it with its shared collaborators.
    pub fn bootstrap(
        store: Arc<SessionStore>,
        actions: Arc<crate::actions::ActionRegistry>,
        factory: Arc<dyn SessionFactory>,
        config: Config,
    ) -> (Self, WorkerHandles) {
        let queue = Arc::new(JobQueue::new());
        let registry = Arc::new(ResourceRegistry::new());
        let broadcaster = ScreenshotBroadcaster::default();
        let executor = Arc::new(ActionExecutor::new(actions, store.clone()));
        let worker = Worker::new(
            queue.clone(),
            store.clone(),
            registry.clone(),
            executor,
            broadcaster.clone(),
            factory,
            config,
        );
        let handles = WorkerHandles {
            queue,
            store,
            registry,
            broadcaster,
        };
        (worker, handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::error::Error;
    use crate::job::JobState;
    use serde_json::json;

    struct FailingFactory;

    #[async_trait]
    impl SessionFactory for FailingFactory {
        async fn acquire(
            &self,
            _request: &JobRequest,
            _credential: &GameCredential,
        ) -> Result<AcquiredSession> {
            Err(Error::Browser("chrome did not start".to_string()))
        }
    }

    fn request(game_credential_id: i64) -> JobRequest {
        JobRequest {
            user_id: 1,
            team_id: 1,
            game_id: 7,
            game_name: "orionstars".to_string(),
            action: "recharge".to_string(),
            params: json!({"account": "PlayerOne", "amount": "1"}),
            game_credential_id,
            session_id: None,
        }
    }

    #[tokio::test]
    async fn unknown_credential_fails_the_job() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let (worker, handles) = Worker::bootstrap(
            store,
            Arc::new(ActionRegistry::new()),
            Arc::new(FailingFactory),
            Config::default(),
        );

        let job_id = handles.queue.add_job(request(999)).unwrap();
        assert!(worker.try_run_next().await);

        let status = handles.queue.get_job_status(&job_id, 1).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn session_acquisition_failure_fails_the_job() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let credential = store.upsert_credential(1, 7, "admin", "pw").unwrap();
        let (worker, handles) = Worker::bootstrap(
            store,
            Arc::new(ActionRegistry::new()),
            Arc::new(FailingFactory),
            Config::default(),
        );

        let job_id = handles.queue.add_job(request(credential.id)).unwrap();
        assert!(worker.try_run_next().await);

        let status = handles.queue.get_job_status(&job_id, 1).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.unwrap().contains("chrome did not start"));
    }

    #[tokio::test]
    async fn no_eligible_job_is_a_noop() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let (worker, _handles) = Worker::bootstrap(
            store,
            Arc::new(ActionRegistry::new()),
            Arc::new(FailingFactory),
            Config::default(),
        );
        assert!(!worker.try_run_next().await);
    }
}

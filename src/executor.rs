//! Action execution wrapper.
//!
//! Runs one registered script against an acquired page, normalizes every
//! failure into a structured [`ActionOutcome`], and appends exactly one
//! audit row per invocation. Browser-interaction errors stop here; nothing
//! ever propagates to the queue layer as an unhandled fault.

use crate::actions::ActionRegistry;
use crate::error::Error;
use crate::job::{now_millis, ActionOutcome, JobRequest};
use crate::metrics;
use crate::panel::PanelPage;
use crate::store::{ActionAudit, SessionStore};
use std::sync::Arc;
use std::time::Instant;

pub struct ActionExecutor {
    registry: Arc<ActionRegistry>,
    store: Arc<SessionStore>,
}

impl ActionExecutor {
    pub fn new(registry: Arc<ActionRegistry>, store: Arc<SessionStore>) -> Self {
        Self { registry, store }
    }

    /// Run the job's action against the page. Infallible by design: every
    /// error becomes an outcome, and the audit row is written regardless.
    pub async fn run(&self, request: &JobRequest, page: &dyn PanelPage) -> ActionOutcome {
        let started = Instant::now();

        let outcome = match self.registry.get(&request.action) {
            Some(script) => match script.run(page, &request.params).await {
                Ok(outcome) => outcome,
                Err(e) => Self::normalize(e),
            },
            None => ActionOutcome::fail(format!("Unknown action: {}", request.action)),
        };

        let elapsed_secs = started.elapsed().as_secs_f64();
        let status = outcome.audit_status();
        metrics::record_action(&request.action, &status.to_string(), elapsed_secs);

        let audit = ActionAudit {
            team_id: request.team_id,
            game_id: request.game_id,
            action: request.action.clone(),
            status,
            inputs: request.params.to_string(),
            execution_time_secs: elapsed_secs,
            message: outcome.message.clone(),
            updated_ms: now_millis(),
        };
        if let Err(e) = self.store.record_action(&audit) {
            // The outcome is already determined; losing the audit row is
            // logged loudly but cannot fail the job.
            eprintln!(
                "[executor] Failed to record audit row for {}: {}",
                request.action, e
            );
        }

        outcome
    }

    fn normalize(error: Error) -> ActionOutcome {
        if error.is_indeterminate() {
            ActionOutcome::unknown(error.to_string())
        } else {
            ActionOutcome::fail(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionScript;
    use crate::error::Result;
    use crate::job::AuditStatus;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct DeadPage;

    #[async_trait]
    impl PanelPage for DeadPage {
        async fn goto(&self, _url: &str) -> Result<()> {
            Ok(())
        }
        async fn fill(&self, _selector: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        async fn click(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn wait_for(&self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn inner_text(&self, _selector: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn screenshot(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct FixedScript(Result<ActionOutcome>);

    #[async_trait]
    impl ActionScript for FixedScript {
        async fn run(&self, _page: &dyn PanelPage, _params: &Value) -> Result<ActionOutcome> {
            match &self.0 {
                Ok(outcome) => Ok(outcome.clone()),
                Err(Error::StepTimeout(d)) => Err(Error::StepTimeout(*d)),
                Err(Error::Indeterminate(m)) => Err(Error::Indeterminate(m.clone())),
                Err(e) => Err(Error::Browser(e.to_string())),
            }
        }
    }

    fn request(action: &str) -> JobRequest {
        JobRequest {
            user_id: 1,
            team_id: 1,
            game_id: 7,
            game_name: "orionstars".to_string(),
            action: action.to_string(),
            params: json!({"account": "PlayerOne"}),
            game_credential_id: 11,
            session_id: None,
        }
    }

    fn executor_with(script: FixedScript, action: &str) -> (ActionExecutor, Arc<SessionStore>) {
        let mut registry = ActionRegistry::new();
        registry.register(action, Arc::new(script));
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        (
            ActionExecutor::new(Arc::new(registry), store.clone()),
            store,
        )
    }

    #[tokio::test]
    async fn successful_run_writes_one_success_audit_row() {
        let (executor, store) = executor_with(
            FixedScript(Ok(ActionOutcome::ok("Recharged").with_amount(1.0))),
            "recharge",
        );

        let outcome = executor.run(&request("recharge"), &DeadPage).await;
        assert!(outcome.success);

        let rows = store.latest_actions(1, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, AuditStatus::Success);
        assert_eq!(rows[0].action, "recharge");
        assert!(rows[0].inputs.contains("PlayerOne"));
    }

    #[tokio::test]
    async fn step_timeout_becomes_failure_outcome() {
        let (executor, store) = executor_with(
            FixedScript(Err(Error::StepTimeout(Duration::from_secs(5)))),
            "recharge",
        );

        let outcome = executor.run(&request("recharge"), &DeadPage).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("timed out"));

        let rows = store.latest_actions(1, 10).unwrap();
        assert_eq!(rows[0].status, AuditStatus::Fail);
    }

    #[tokio::test]
    async fn indeterminate_error_is_audited_as_unknown() {
        let (executor, store) = executor_with(
            FixedScript(Err(Error::Indeterminate("no banner found".to_string()))),
            "recharge",
        );

        let outcome = executor.run(&request("recharge"), &DeadPage).await;
        assert!(!outcome.success);
        assert!(outcome.indeterminate);

        let rows = store.latest_actions(1, 10).unwrap();
        assert_eq!(rows[0].status, AuditStatus::Unknown);
    }

    #[tokio::test]
    async fn unknown_action_fails_and_is_still_audited() {
        let (executor, store) = executor_with(
            FixedScript(Ok(ActionOutcome::ok("unreachable"))),
            "recharge",
        );

        let outcome = executor.run(&request("teleport"), &DeadPage).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("Unknown action"));

        let rows = store.latest_actions(1, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "teleport");
    }
}

//! Action scripts and their dispatch registry.
//!
//! Each automation action (new-account, recharge, ...) is one registered
//! script; adding an action is adding an entry to the registry, not
//! branching logic. The standard mutating-action policy (pre-check, submit,
//! confirmation resolution) lives in [`scripts`]; the literal click/fill
//! sequences stay behind the [`scripts::PanelForm`] seam.

pub mod matching;
pub mod scripts;

pub use matching::match_account;
pub use scripts::{ConfirmSignal, MutatingScript, MutationKind, NewAccountScript, PanelForm};

use crate::error::Result;
use crate::job::ActionOutcome;
use crate::panel::PanelPage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One named automation script.
#[async_trait]
pub trait ActionScript: Send + Sync {
    /// Drive the page through the scripted interaction sequence.
    ///
    /// Expected failures (unmatched account, bad amount, confirmed panel
    /// error) come back as `Ok` outcomes; `Err` is reserved for faults the
    /// executor normalizes (timeouts, lost pages, missing parameters).
    async fn run(&self, page: &dyn PanelPage, params: &serde_json::Value)
        -> Result<ActionOutcome>;
}

/// Mapping from action identifier to its registered script.
#[derive(Default)]
pub struct ActionRegistry {
    scripts: HashMap<String, Arc<dyn ActionScript>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, script: Arc<dyn ActionScript>) {
        self.scripts.insert(name.into(), script);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionScript>> {
        self.scripts.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.scripts.keys().map(String::as_str).collect()
    }

    /// Registry preloaded with the four standard panel actions, all driven
    /// through one externally supplied form implementation.
    pub fn with_standard_scripts(form: Arc<dyn PanelForm>) -> Self {
        let mut registry = Self::new();
        registry.register("new-account", Arc::new(NewAccountScript::new(form.clone())));
        registry.register(
            "recharge",
            Arc::new(MutatingScript::new(MutationKind::Recharge, form.clone())),
        );
        registry.register(
            "redeem",
            Arc::new(MutatingScript::new(MutationKind::Redeem, form.clone())),
        );
        registry.register(
            "password-reset",
            Arc::new(MutatingScript::new(MutationKind::PasswordReset, form)),
        );
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopScript;

    #[async_trait]
    impl ActionScript for NoopScript {
        async fn run(
            &self,
            _page: &dyn PanelPage,
            _params: &serde_json::Value,
        ) -> Result<ActionOutcome> {
            Ok(ActionOutcome::ok("noop"))
        }
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = ActionRegistry::new();
        registry.register("noop", Arc::new(NoopScript));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn standard_scripts_cover_all_actions() {
        struct NullForm;

        #[async_trait]
        impl PanelForm for NullForm {
            async fn search_account(
                &self,
                _page: &dyn PanelPage,
                _account: &str,
            ) -> Result<Vec<crate::panel::AccountRow>> {
                Ok(Vec::new())
            }
            async fn submit(
                &self,
                _page: &dyn PanelPage,
                _params: &serde_json::Value,
            ) -> Result<()> {
                Ok(())
            }
            async fn read_confirmation(&self, _page: &dyn PanelPage) -> Result<ConfirmSignal> {
                Ok(ConfirmSignal::NotFound)
            }
        }

        let registry = ActionRegistry::with_standard_scripts(Arc::new(NullForm));
        for name in ["new-account", "recharge", "redeem", "password-reset"] {
            assert!(registry.get(name).is_some(), "missing script: {}", name);
        }
    }
}

//! Standard panel action scripts.
//!
//! The execution policy for mutating actions is fixed here: verify the
//! target account first, then submit, then resolve the outcome from the
//! panel's confirmation signals in priority order. The literal selector
//! sequences behind each step are supplied externally through [`PanelForm`],
//! one implementation per panel family.

use super::matching::match_account;
use super::ActionScript;
use crate::error::{Error, Result};
use crate::job::ActionOutcome;
use crate::panel::{AccountRow, PanelPage};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Confirmation signal read from the page after a submission, already
/// resolved in priority order by the form implementation: a known success
/// marker first, then a known error marker, then a generic banner. When
/// nothing recognizable appears within the bounded wait, `NotFound`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmSignal {
    Success(String),
    Failure(String),
    /// A generic banner with no success/error marker. Treated as a
    /// confirmed failure carrying the banner text.
    Banner(String),
    NotFound,
}

/// The externally defined click/fill sequences for one panel family.
#[async_trait]
pub trait PanelForm: Send + Sync {
    /// Search for the target account and scrape the result rows.
    async fn search_account(&self, page: &dyn PanelPage, account: &str)
        -> Result<Vec<AccountRow>>;

    /// Fill and submit the mutating form for the current action.
    async fn submit(&self, page: &dyn PanelPage, params: &Value) -> Result<()>;

    /// Read the post-submit confirmation signal within a bounded wait.
    async fn read_confirmation(&self, page: &dyn PanelPage) -> Result<ConfirmSignal>;
}

/// Which mutating action a [`MutatingScript`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Recharge,
    Redeem,
    PasswordReset,
}

impl MutationKind {
    fn needs_amount(self) -> bool {
        matches!(self, MutationKind::Recharge | MutationKind::Redeem)
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::Validation(format!("{} parameter is required", key)))
}

/// Parse an amount parameter to a float. Accepts numbers and numeric
/// strings; anything else is a caller error surfaced in the outcome.
fn parse_amount(params: &Value) -> std::result::Result<f64, String> {
    match params.get("amount") {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| n.to_string()),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| s.clone()),
        Some(other) => Err(other.to_string()),
        None => Err("(missing)".to_string()),
    }
}

fn resolve(signal: ConfirmSignal) -> ActionOutcome {
    match signal {
        ConfirmSignal::Success(message) => ActionOutcome::ok(message),
        ConfirmSignal::Failure(message) => ActionOutcome::fail(message),
        ConfirmSignal::Banner(message) => ActionOutcome::fail(message),
        ConfirmSignal::NotFound => {
            ActionOutcome::unknown("Could not determine the result of the submission")
        }
    }
}

/// Recharge/redeem/password-reset against a verified existing account.
///
/// Never mutates state against an unverified target: zero matching rows,
/// or a row whose identifying cell does not match, abort before the
/// submission step.
pub struct MutatingScript {
    kind: MutationKind,
    form: Arc<dyn PanelForm>,
}

impl MutatingScript {
    pub fn new(kind: MutationKind, form: Arc<dyn PanelForm>) -> Self {
        Self { kind, form }
    }
}

#[async_trait]
impl ActionScript for MutatingScript {
    async fn run(&self, page: &dyn PanelPage, params: &Value) -> Result<ActionOutcome> {
        let account = required_str(params, "account")?;

        let rows = self.form.search_account(page, account).await?;
        let Some(row) = match_account(&rows, account) else {
            return Ok(ActionOutcome::fail("No user exists"));
        };
        let username = row.account.trim().to_string();

        let amount = if self.kind.needs_amount() {
            match parse_amount(params) {
                Ok(v) => Some(v),
                Err(raw) => {
                    return Ok(ActionOutcome::fail(format!("Invalid amount: {}", raw)));
                }
            }
        } else {
            None
        };

        self.form.submit(page, params).await?;

        let mut outcome = resolve(self.form.read_confirmation(page).await?);
        outcome.username = Some(username);
        if outcome.success {
            outcome.amount = amount;
        }
        Ok(outcome)
    }
}

/// Create a fresh account on the panel. No pre-check applies; the target
/// does not exist yet.
pub struct NewAccountScript {
    form: Arc<dyn PanelForm>,
}

impl NewAccountScript {
    pub fn new(form: Arc<dyn PanelForm>) -> Self {
        Self { form }
    }
}

#[async_trait]
impl ActionScript for NewAccountScript {
    async fn run(&self, page: &dyn PanelPage, params: &Value) -> Result<ActionOutcome> {
        let username = required_str(params, "account")?.trim().to_string();

        self.form.submit(page, params).await?;

        let mut outcome = resolve(self.form.read_confirmation(page).await?);
        outcome.username = Some(username);
        Ok(outcome)
    }
}

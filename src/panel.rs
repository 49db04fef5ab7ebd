//! Abstract UI surface the action scripts drive.
//!
//! Concrete interaction scripts are defined outside the core; they talk to
//! the panel through this trait so the queue, executor and worker layers
//! never depend on a real browser. The chromiumoxide implementation lives
//! in [`crate::browser`]; every method there carries an explicit per-step
//! timeout.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One row scraped from the panel's account search result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRow {
    /// The identifying account-name cell, as rendered (may carry whitespace
    /// or newline padding from the UI).
    pub account: String,
    /// Remaining cells of the row, as rendered.
    #[serde(default)]
    pub cells: Vec<String>,
}

impl AccountRow {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            cells: Vec::new(),
        }
    }
}

/// Async UI operations against one admin-panel page.
#[async_trait]
pub trait PanelPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    /// Focus the element and type the value into it.
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    /// Wait until the element exists, within the implementation's bound.
    async fn wait_for(&self, selector: &str) -> Result<()>;

    /// Visible text of the element, `None` when it is absent.
    async fn inner_text(&self, selector: &str) -> Result<Option<String>>;

    /// Current rendered state as PNG bytes.
    async fn screenshot(&self) -> Result<Vec<u8>>;
}

//! Browser session backend using chromiumoxide (CDP).
//!
//! Compiled only with the `browser` feature; the rest of the crate works
//! against the [`crate::panel::PanelPage`] and registry handle traits and
//! never needs a Chrome binary.
//!
//! Every persistent session gets its own browser process. The registry's
//! sweep never closes a browser hosting a protected page, so keeping the
//! authenticated page, its context and its browser together in one
//! dedicated process is what makes session reuse safe.

use crate::actions::ActionScript;
use crate::broadcast::CaptureSource;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::job::{now_millis, JobRequest};
use crate::panel::PanelPage;
use crate::registry::{BrowserHandle, ContextHandle, PageHandle, ResourceRegistry};
use crate::store::{GameCredential, SessionStore};
use crate::worker::{AcquiredSession, SessionFactory};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A launched Chrome process and its CDP event pump.
pub struct CdpBrowser {
    id: String,
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl CdpBrowser {
    async fn launch(config: &Config) -> Result<Arc<Self>> {
        let mut builder = BrowserConfig::builder().viewport(None);
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(|e| Error::Browser(format!("Failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| Error::Browser(format!("Failed to launch browser: {}", e)))?;

        // The event pump must run for the browser to function at all.
        let pump = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Arc::new(Self {
            id: format!("browser-{:x}", now_millis()),
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(pump)),
        }))
    }

    async fn new_page(&self, url: &str) -> Result<Page> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| Error::Browser("browser already closed".to_string()))?;
        browser
            .new_page(url)
            .await
            .map_err(|e| Error::Browser(format!("Failed to open page: {}", e)))
    }
}

#[async_trait]
impl BrowserHandle for CdpBrowser {
    fn id(&self) -> &str {
        &self.id
    }

    async fn close(&self) -> Result<()> {
        // Dropping the Browser tears down the CDP connection and the
        // process with it.
        let _ = self.browser.lock().await.take();
        if let Some(pump) = self.handler.lock().await.take() {
            pump.abort();
        }
        Ok(())
    }
}

/// The default browser context of one [`CdpBrowser`]. Closing it is a no-op
/// on its own; closing the browser reclaims it.
pub struct CdpContext {
    id: String,
    browser_id: String,
}

#[async_trait]
impl ContextHandle for CdpContext {
    fn id(&self) -> &str {
        &self.id
    }

    fn browser_id(&self) -> &str {
        &self.browser_id
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// One CDP page with bounded interactions.
pub struct CdpPage {
    id: String,
    context_id: String,
    browser_id: String,
    page: Page,
    step_timeout: Duration,
}

impl CdpPage {
    fn new(page: Page, browser_id: &str, context_id: &str, step_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: format!("page-{:x}", now_millis()),
            context_id: context_id.to_string(),
            browser_id: browser_id.to_string(),
            page,
            step_timeout,
        })
    }

    /// Run one interaction under the per-step bound.
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, chromiumoxide::error::CdpError>>,
    {
        match tokio::time::timeout(self.step_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::Browser(e.to_string())),
            Err(_) => Err(Error::StepTimeout(self.step_timeout)),
        }
    }

    /// Current cookie string, persisted as serialized session state.
    pub async fn session_snapshot(&self) -> Result<String> {
        let evaluation = self.bounded(self.page.evaluate("document.cookie")).await?;
        Ok(evaluation.into_value().unwrap_or_default())
    }
}

#[async_trait]
impl PanelPage for CdpPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.bounded(async {
            self.page.goto(url).await?;
            Ok(())
        })
        .await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.bounded(async {
            let element = self.page.find_element(selector).await?;
            element.click().await?;
            element.type_str(value).await?;
            Ok(())
        })
        .await
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.bounded(async {
            let element = self.page.find_element(selector).await?;
            element.click().await?;
            Ok(())
        })
        .await
    }

    async fn wait_for(&self, selector: &str) -> Result<()> {
        // chromiumoxide has no built-in wait; poll within the step bound.
        let deadline = Instant::now() + self.step_timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::StepTimeout(self.step_timeout));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn inner_text(&self, selector: &str) -> Result<Option<String>> {
        let element = match self.page.find_element(selector).await {
            Ok(element) => element,
            Err(_) => return Ok(None),
        };
        self.bounded(async { element.inner_text().await }).await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.bounded(async {
            self.page
                .screenshot(
                    chromiumoxide::page::ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Png)
                        .build(),
                )
                .await
        })
        .await
    }
}

#[async_trait]
impl CaptureSource for CdpPage {
    async fn capture(&self) -> Result<Vec<u8>> {
        // A closed page surfaces as a CDP error; the sampler treats any
        // error as "source gone" and stops.
        PanelPage::screenshot(self).await
    }
}

#[async_trait]
impl PageHandle for CdpPage {
    fn id(&self) -> &str {
        &self.id
    }

    fn context_id(&self) -> &str {
        &self.context_id
    }

    fn browser_id(&self) -> &str {
        &self.browser_id
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| Error::ResourceLeak(e.to_string()))
    }
}

/// Launches and reuses authenticated CDP sessions, one browser process per
/// team+game.
pub struct CdpSessionFactory {
    registry: Arc<ResourceRegistry>,
    store: Arc<SessionStore>,
    /// External login sequence for the panel family.
    login: Arc<dyn ActionScript>,
    config: Config,
    sessions: Mutex<HashMap<String, Arc<CdpPage>>>,
}

impl CdpSessionFactory {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        store: Arc<SessionStore>,
        login: Arc<dyn ActionScript>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            store,
            login,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn session_key(request: &JobRequest) -> String {
        format!("{}:{}", request.team_id, request.game_id)
    }

    async fn create_session(
        &self,
        request: &JobRequest,
        credential: &GameCredential,
    ) -> Result<Arc<CdpPage>> {
        let browser = CdpBrowser::launch(&self.config).await?;
        let context = Arc::new(CdpContext {
            id: format!("context-{:x}", now_millis()),
            browser_id: browser.id.clone(),
        });
        let page = CdpPage::new(
            browser.new_page("about:blank").await?,
            &browser.id,
            &context.id,
            self.config.step_timeout(),
        );

        self.registry.register_browser(browser.clone());
        self.registry.register_context(context);
        self.registry.register_page(page.clone());

        let outcome = self
            .login
            .run(
                page.as_ref(),
                &json!({
                    "username": credential.username,
                    "password": credential.password,
                    "gameName": request.game_name,
                }),
            )
            .await?;
        if !outcome.success {
            return Err(Error::Browser(format!("Login failed: {}", outcome.message)));
        }

        self.registry.register_persistent_page(&page.id);
        Ok(page)
    }
}

#[async_trait]
impl SessionFactory for CdpSessionFactory {
    async fn acquire(
        &self,
        request: &JobRequest,
        credential: &GameCredential,
    ) -> Result<AcquiredSession> {
        let key = Self::session_key(request);
        let mut sessions = self.sessions.lock().await;

        if let Some(page) = sessions.get(&key).cloned() {
            let valid = self
                .store
                .check_session(credential.id)
                .map_err(|e| Error::Browser(e.to_string()))?;
            if valid {
                return Ok(AcquiredSession {
                    page: page.clone(),
                    capture: page.clone(),
                    page_id: page.id.clone(),
                    persistent: true,
                    session_token: None,
                    session_data: None,
                });
            }
            // Stored session expired; retire the page and log in fresh.
            self.registry.unregister_persistent_page(&page.id);
            sessions.remove(&key);
        }

        let page = self.create_session(request, credential).await?;
        sessions.insert(key, page.clone());

        let session_data = page.session_snapshot().await.unwrap_or_default();
        Ok(AcquiredSession {
            page: page.clone(),
            capture: page.clone(),
            page_id: page.id.clone(),
            persistent: true,
            session_token: Some(format!("cdp-{:x}", now_millis())),
            session_data: Some(session_data),
        })
    }
}

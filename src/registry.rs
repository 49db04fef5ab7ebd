//! Browser resource lifecycle registry.
//!
//! Flaky third-party panels routinely leave dangling pages and contexts
//! behind after an unhandled script error. Instead of relying on each
//! script's own try/finally discipline, every browser-level object is
//! registered here at creation, and one sweep reclaims whatever a crashed
//! job touched. Pages carrying an authenticated session are marked
//! persistent and survive the sweep, together with the context and browser
//! that host them.
//!
//! The registry works over object-safe handle traits so the cleanup logic
//! is testable without a Chrome binary; the chromiumoxide implementations
//! live in [`crate::browser`].

use crate::error::{Error, Result};
use crate::metrics;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A live browser process.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    fn id(&self) -> &str;
    async fn close(&self) -> Result<()>;
}

/// An isolated context inside a browser.
#[async_trait]
pub trait ContextHandle: Send + Sync {
    fn id(&self) -> &str;
    fn browser_id(&self) -> &str;
    async fn close(&self) -> Result<()>;
}

/// A page inside a context.
#[async_trait]
pub trait PageHandle: Send + Sync {
    fn id(&self) -> &str;
    fn context_id(&self) -> &str;
    fn browser_id(&self) -> &str;
    async fn close(&self) -> Result<()>;
}

#[derive(Default)]
struct Tracked {
    browsers: HashMap<String, Arc<dyn BrowserHandle>>,
    contexts: HashMap<String, Arc<dyn ContextHandle>>,
    pages: HashMap<String, Arc<dyn PageHandle>>,
    /// Page ids protected from the cleanup sweep.
    persistent: HashSet<String>,
}

/// Result of one cleanup sweep. Close failures are counted, not fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub pages_closed: usize,
    pub contexts_closed: usize,
    pub browsers_closed: usize,
    pub failures: usize,
}

/// Bookkeeping for all live browser-level objects in this process.
///
/// Constructed once and passed by reference; never ambient global state.
pub struct ResourceRegistry {
    tracked: Mutex<Tracked>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            tracked: Mutex::new(Tracked::default()),
        }
    }

    pub fn register_browser(&self, browser: Arc<dyn BrowserHandle>) {
        let mut tracked = self.tracked.lock().unwrap();
        tracked.browsers.insert(browser.id().to_string(), browser);
    }

    pub fn unregister_browser(&self, id: &str) {
        self.tracked.lock().unwrap().browsers.remove(id);
    }

    pub fn register_context(&self, context: Arc<dyn ContextHandle>) {
        let mut tracked = self.tracked.lock().unwrap();
        tracked.contexts.insert(context.id().to_string(), context);
    }

    pub fn unregister_context(&self, id: &str) {
        self.tracked.lock().unwrap().contexts.remove(id);
    }

    pub fn register_page(&self, page: Arc<dyn PageHandle>) {
        let mut tracked = self.tracked.lock().unwrap();
        tracked.pages.insert(page.id().to_string(), page);
    }

    pub fn unregister_page(&self, id: &str) {
        let mut tracked = self.tracked.lock().unwrap();
        tracked.pages.remove(id);
        tracked.persistent.remove(id);
    }

    /// Protect a tracked page (and transitively its context and browser)
    /// from cleanup sweeps. This is what lets one authenticated session be
    /// reused by many sequential jobs without repeated logins.
    pub fn register_persistent_page(&self, page_id: &str) {
        let mut tracked = self.tracked.lock().unwrap();
        if tracked.pages.contains_key(page_id) {
            tracked.persistent.insert(page_id.to_string());
        }
    }

    /// Remove a page from the protected set. The page stays tracked and the
    /// next sweep will close it.
    pub fn unregister_persistent_page(&self, page_id: &str) {
        self.tracked.lock().unwrap().persistent.remove(page_id);
    }

    pub fn is_persistent(&self, page_id: &str) -> bool {
        self.tracked.lock().unwrap().persistent.contains(page_id)
    }

    /// (browsers, contexts, pages, persistent pages) currently tracked.
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let tracked = self.tracked.lock().unwrap();
        (
            tracked.browsers.len(),
            tracked.contexts.len(),
            tracked.pages.len(),
            tracked.persistent.len(),
        )
    }

    /// Best-effort sweep of everything not protected.
    ///
    /// Closes every tracked page outside the protected set, every context
    /// holding no protected page, and every browser hosting no protected
    /// page. A failing close is logged and counted; the sweep always runs
    /// to completion.
    pub async fn cleanup_all(&self) -> CleanupReport {
        // Snapshot the sweep targets; resources stay tracked until a close
        // attempt actually finishes, so a sweep whose future is dropped
        // mid-close (timeout race) leaves the hung resource for the next
        // pass instead of silently forgetting it.
        let (pages, contexts, browsers) = {
            let tracked = self.tracked.lock().unwrap();

            let protected_contexts: HashSet<String> = tracked
                .pages
                .values()
                .filter(|p| tracked.persistent.contains(p.id()))
                .map(|p| p.context_id().to_string())
                .collect();
            let protected_browsers: HashSet<String> = tracked
                .pages
                .values()
                .filter(|p| tracked.persistent.contains(p.id()))
                .map(|p| p.browser_id().to_string())
                .collect();

            let pages: Vec<Arc<dyn PageHandle>> = tracked
                .pages
                .values()
                .filter(|p| !tracked.persistent.contains(p.id()))
                .cloned()
                .collect();
            let contexts: Vec<Arc<dyn ContextHandle>> = tracked
                .contexts
                .values()
                .filter(|c| !protected_contexts.contains(c.id()))
                .cloned()
                .collect();
            let browsers: Vec<Arc<dyn BrowserHandle>> = tracked
                .browsers
                .values()
                .filter(|b| !protected_browsers.contains(b.id()))
                .cloned()
                .collect();

            (pages, contexts, browsers)
        };

        let mut report = CleanupReport::default();

        // Close order: pages, then contexts, then browsers. Each failure is
        // swallowed so the rest of the sweep still runs.
        for page in pages {
            let result = page.close().await;
            self.tracked.lock().unwrap().pages.remove(page.id());
            match result {
                Ok(()) => {
                    report.pages_closed += 1;
                    metrics::record_resource_closed("page");
                }
                Err(e) => {
                    report.failures += 1;
                    metrics::record_cleanup_failure();
                    eprintln!("[registry] Failed to close page {}: {}", page.id(), e);
                }
            }
        }
        for context in contexts {
            let result = context.close().await;
            self.tracked.lock().unwrap().contexts.remove(context.id());
            match result {
                Ok(()) => {
                    report.contexts_closed += 1;
                    metrics::record_resource_closed("context");
                }
                Err(e) => {
                    report.failures += 1;
                    metrics::record_cleanup_failure();
                    eprintln!("[registry] Failed to close context {}: {}", context.id(), e);
                }
            }
        }
        for browser in browsers {
            let result = browser.close().await;
            self.tracked.lock().unwrap().browsers.remove(browser.id());
            match result {
                Ok(()) => {
                    report.browsers_closed += 1;
                    metrics::record_resource_closed("browser");
                }
                Err(e) => {
                    report.failures += 1;
                    metrics::record_cleanup_failure();
                    eprintln!("[registry] Failed to close browser {}: {}", browser.id(), e);
                }
            }
        }

        report
    }

    /// Race [`Self::cleanup_all`] against a timer. A hung close call cannot
    /// block the caller forever: on expiry one more best-effort sweep is
    /// attempted (also bounded), then the timeout is propagated.
    pub async fn cleanup_all_with_timeout(&self, timeout: Duration) -> Result<CleanupReport> {
        match tokio::time::timeout(timeout, self.cleanup_all()).await {
            Ok(report) => Ok(report),
            Err(_) => {
                eprintln!(
                    "[registry] Cleanup exceeded {:?}; attempting one more best-effort sweep",
                    timeout
                );
                let _ = tokio::time::timeout(timeout, self.cleanup_all()).await;
                Err(Error::CleanupTimeout(timeout))
            }
        }
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Test handle usable as a browser, context or page.
    struct FakeResource {
        id: String,
        context_id: String,
        browser_id: String,
        closed: AtomicBool,
        fail_close: bool,
        hang_close: bool,
    }

    impl FakeResource {
        fn new(id: &str, context_id: &str, browser_id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                context_id: context_id.to_string(),
                browser_id: browser_id.to_string(),
                closed: AtomicBool::new(false),
                fail_close: false,
                hang_close: false,
            })
        }

        fn failing(id: &str, context_id: &str, browser_id: &str) -> Arc<Self> {
            Arc::new(Self {
                fail_close: true,
                ..Self::unwrapped(id, context_id, browser_id)
            })
        }

        fn hanging(id: &str, context_id: &str, browser_id: &str) -> Arc<Self> {
            Arc::new(Self {
                hang_close: true,
                ..Self::unwrapped(id, context_id, browser_id)
            })
        }

        fn unwrapped(id: &str, context_id: &str, browser_id: &str) -> Self {
            Self {
                id: id.to_string(),
                context_id: context_id.to_string(),
                browser_id: browser_id.to_string(),
                closed: AtomicBool::new(false),
                fail_close: false,
                hang_close: false,
            }
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn do_close(&self) -> Result<()> {
            if self.hang_close {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail_close {
                return Err(Error::ResourceLeak(format!("{} refused to close", self.id)));
            }
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl BrowserHandle for FakeResource {
        fn id(&self) -> &str {
            &self.id
        }
        async fn close(&self) -> Result<()> {
            self.do_close().await
        }
    }

    #[async_trait]
    impl ContextHandle for FakeResource {
        fn id(&self) -> &str {
            &self.id
        }
        fn browser_id(&self) -> &str {
            &self.browser_id
        }
        async fn close(&self) -> Result<()> {
            self.do_close().await
        }
    }

    #[async_trait]
    impl PageHandle for FakeResource {
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
            self.do_close().await
        }
    }

    #[tokio::test]
    async fn sweep_closes_everything_unprotected() {
        let registry = ResourceRegistry::new();
        let browser = FakeResource::new("b1", "", "");
        let context = FakeResource::new("c1", "", "b1");
        let page = FakeResource::new("p1", "c1", "b1");

        registry.register_browser(browser.clone());
        registry.register_context(context.clone());
        registry.register_page(page.clone());

        let report = registry.cleanup_all().await;
        assert_eq!(report.pages_closed, 1);
        assert_eq!(report.contexts_closed, 1);
        assert_eq!(report.browsers_closed, 1);
        assert_eq!(report.failures, 0);
        assert!(page.is_closed());
        assert!(context.is_closed());
        assert!(browser.is_closed());
        assert_eq!(registry.counts(), (0, 0, 0, 0));
    }

    #[tokio::test]
    async fn persistent_page_preserves_context_and_browser() {
        let registry = ResourceRegistry::new();
        let keep_browser = FakeResource::new("b1", "", "");
        let keep_context = FakeResource::new("c1", "", "b1");
        let keep_page = FakeResource::new("p1", "c1", "b1");
        let other_browser = FakeResource::new("b2", "", "");
        let other_context = FakeResource::new("c2", "", "b2");
        let other_page = FakeResource::new("p2", "c2", "b2");

        registry.register_browser(keep_browser.clone());
        registry.register_context(keep_context.clone());
        registry.register_page(keep_page.clone());
        registry.register_browser(other_browser.clone());
        registry.register_context(other_context.clone());
        registry.register_page(other_page.clone());
        registry.register_persistent_page("p1");

        let report = registry.cleanup_all().await;
        assert_eq!(report.pages_closed, 1);
        assert_eq!(report.contexts_closed, 1);
        assert_eq!(report.browsers_closed, 1);

        assert!(!keep_page.is_closed());
        assert!(!keep_context.is_closed());
        assert!(!keep_browser.is_closed());
        assert!(other_page.is_closed());
        assert!(other_context.is_closed());
        assert!(other_browser.is_closed());

        // The protected triple is still tracked for later sweeps.
        assert_eq!(registry.counts(), (1, 1, 1, 1));
    }

    #[tokio::test]
    async fn throwing_close_does_not_abort_the_sweep() {
        let registry = ResourceRegistry::new();
        let bad_page = FakeResource::failing("p-bad", "c1", "b1");
        let keep_page = FakeResource::new("p-keep", "c1", "b1");
        let context = FakeResource::new("c1", "", "b1");
        let browser = FakeResource::new("b1", "", "");

        registry.register_page(bad_page.clone());
        registry.register_page(keep_page.clone());
        registry.register_context(context.clone());
        registry.register_browser(browser.clone());
        registry.register_persistent_page("p-keep");

        let report = registry.cleanup_all().await;
        assert_eq!(report.failures, 1);

        // The failing close never stopped the rest of the sweep, and the
        // persistent page (plus its context and browser) survived.
        assert!(!keep_page.is_closed());
        assert!(!context.is_closed());
        assert!(!browser.is_closed());
    }

    #[tokio::test]
    async fn unregister_persistent_exposes_page_to_sweep() {
        let registry = ResourceRegistry::new();
        let page = FakeResource::new("p1", "c1", "b1");
        registry.register_page(page.clone());
        registry.register_persistent_page("p1");
        assert!(registry.is_persistent("p1"));

        registry.unregister_persistent_page("p1");
        let report = registry.cleanup_all().await;
        assert_eq!(report.pages_closed, 1);
        assert!(page.is_closed());
    }

    #[tokio::test]
    async fn fast_cleanup_resolves_within_timeout() {
        let registry = ResourceRegistry::new();
        registry.register_page(FakeResource::new("p1", "c1", "b1"));

        let report = registry
            .cleanup_all_with_timeout(Duration::from_millis(250))
            .await
            .unwrap();
        assert_eq!(report.pages_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_cleanup_times_out_with_extra_sweep() {
        let registry = ResourceRegistry::new();
        let hung = FakeResource::hanging("p-hung", "c1", "b1");
        registry.register_page(hung);

        let err = registry
            .cleanup_all_with_timeout(Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CleanupTimeout(_)));

        // The hung page was never confirmed closed, so it is still tracked
        // and a later sweep will retry it.
        assert_eq!(registry.counts(), (0, 0, 1, 0));
    }
}

//! Per-domain browser lifecycle: lazy launch, tab leasing, idle shutdown.
//!
//! One [`BrowserManager`] owns at most one [`chromiumoxide::Browser`] process
//! for a single domain. Tabs are leased out via [`TabLease`], a scope guard
//! that returns the tab and decrements the active-tab count on drop. When the
//! count reaches zero a single background task is armed to stop the browser
//! after the configured idle window, unless another tab is leased first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chromiumoxide::cdp::browser_protocol::dom::EnableParams as DomEnableParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, SetCookiesParams,
};
use chromiumoxide::cdp::browser_protocol::page::EnableParams as PageEnableParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::config::{build_headless_config, find_chrome_executable};
use crate::cookies::{self, CookieState};

struct Inner {
    exe: String,
    headless: bool,
    disable_sandbox: bool,
    idle: Duration,
    browser: Mutex<Option<Arc<Browser>>>,
    active_tabs: AtomicU64,
    last_used: Mutex<Instant>,
    shutdown_task: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the lifecycle of the browser process for a single domain.
pub struct BrowserManager {
    domain: String,
    inner: Arc<Inner>,
}

impl BrowserManager {
    pub fn new(domain: String, headless: bool, disable_sandbox: bool, idle: Duration) -> Result<Self> {
        let exe = find_chrome_executable()
            .ok_or_else(|| anyhow!("no Chromium-family browser found; set CHROME_EXECUTABLE"))?;
        Ok(Self {
            domain,
            inner: Arc::new(Inner {
                exe,
                headless,
                disable_sandbox,
                idle,
                browser: Mutex::new(None),
                active_tabs: AtomicU64::new(0),
                last_used: Mutex::new(Instant::now()),
                shutdown_task: Mutex::new(None),
            }),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Lease a fresh tab, seeding it with `cookies` scoped to `url`. The
    /// returned [`TabLease`] releases the tab and decrements the active-tab
    /// count when dropped.
    pub async fn tab(&self, cookies: &[CookieState], url: &str) -> Result<TabLease> {
        let browser = self.ensure_browser_and_mark_in_use().await?;

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                self.inner.active_tabs.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow!("failed to open tab: {err}"));
            }
        };

        if let Err(err) = enable_default_domains(&page).await {
            warn!(domain = %self.domain, "failed to enable CDP domains on new tab: {err}");
        }

        if !cookies.is_empty() {
            let params: Vec<_> = cookies
                .iter()
                .map(|c| cookies::to_protocol_param(c, url))
                .collect();
            if let Err(err) = page.execute(SetCookiesParams::new(params)).await {
                warn!(domain = %self.domain, "failed to seed cookies into tab: {err}");
            }
        }

        Ok(TabLease {
            page: Some(page),
            inner: Arc::clone(&self.inner),
            domain: self.domain.clone(),
        })
    }

    /// Cookies currently held by the browser that apply to `url`. Empty if
    /// the browser has never been launched (or has since shut down idle).
    pub async fn export_cookies(&self, url: &url::Url) -> Vec<CookieState> {
        let guard = self.inner.browser.lock().await;
        let Some(browser) = guard.as_ref() else {
            return Vec::new();
        };
        match browser
            .execute(
                chromiumoxide::cdp::browser_protocol::network::GetAllCookiesParams::default(),
            )
            .await
        {
            Ok(resp) => resp
                .result
                .cookies
                .iter()
                .map(cookies::from_protocol_cookie)
                .filter(|c| cookies::matches_url(c, url))
                .collect(),
            Err(err) => {
                warn!(domain = %self.domain, "failed to read cookies back from browser: {err}");
                Vec::new()
            }
        }
    }

    /// Cancel any pending idle-shutdown task and stop the browser if running.
    pub async fn shutdown(&self) {
        if let Some(task) = self.inner.shutdown_task.lock().await.take() {
            task.abort();
        }
        let mut guard = self.inner.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            close_browser(&mut browser, &self.domain).await;
        }
    }

    /// Ensure the browser is running and count this caller's tab against
    /// `active_tabs`, both under the same `browser` lock acquisition. This
    /// has to be one critical section: incrementing `active_tabs` after
    /// releasing the lock would leave a window where the idle-shutdown task
    /// reads `active_tabs == 0`, takes the lock, and closes the browser this
    /// call already resolved to use, so the subsequent `new_page` fails
    /// against a closed browser.
    async fn ensure_browser_and_mark_in_use(&self) -> Result<Arc<Browser>> {
        let mut guard = self.inner.browser.lock().await;
        if let Some(browser) = guard.as_ref() {
            let browser = Arc::clone(browser);
            self.inner.active_tabs.fetch_add(1, Ordering::SeqCst);
            return Ok(browser);
        }
        info!(domain = %self.domain, exe = %self.inner.exe, "launching browser");
        let config = build_headless_config(
            &self.inner.exe,
            self.inner.headless,
            self.inner.disable_sandbox,
            1280,
            900,
        )?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| anyhow!("failed to launch browser ({}): {err}", self.inner.exe))?;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!("CDP handler error: {err}");
                }
            }
        });
        let browser = Arc::new(browser);
        *guard = Some(Arc::clone(&browser));
        self.inner.active_tabs.fetch_add(1, Ordering::SeqCst);
        Ok(browser)
    }
}

async fn enable_default_domains(page: &Page) -> Result<()> {
    page.execute(NetworkEnableParams::default()).await?;
    page.execute(PageEnableParams::default()).await?;
    page.execute(DomEnableParams::default()).await?;
    Ok(())
}

/// Close the underlying browser process. Requires sole ownership of the
/// `Arc`; if a concurrent `tab()` call is mid-flight and still holds a
/// clone, the close is skipped and retried on the next idle check or an
/// explicit `shutdown()`.
async fn close_browser(browser: &mut Arc<Browser>, domain: &str) {
    match Arc::get_mut(browser) {
        Some(browser) => {
            if let Err(err) = browser.close().await {
                warn!(domain = %domain, "error closing browser: {err}");
            }
        }
        None => {
            debug!(domain = %domain, "skipping browser close, still in use elsewhere");
        }
    }
}

/// A scope-guarded tab. Dereferences to [`Page`]; dropping it releases the
/// tab and, if it was the last active tab, arms idle shutdown.
pub struct TabLease {
    page: Option<Page>,
    inner: Arc<Inner>,
    domain: String,
}

impl std::ops::Deref for TabLease {
    type Target = Page;
    fn deref(&self) -> &Page {
        self.page.as_ref().expect("page taken before drop")
    }
}

impl Drop for TabLease {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let domain = self.domain.clone();
        tokio::spawn(async move {
            if let Err(err) = page.close().await {
                debug!(domain = %domain, "error closing tab: {err}");
            }
            *inner.last_used.lock().await = Instant::now();
            let remaining = inner.active_tabs.fetch_sub(1, Ordering::SeqCst) - 1;
            if remaining == 0 {
                schedule_idle_shutdown(inner, domain).await;
            }
        });
    }
}

/// Arm a single idle-shutdown task, replacing (cancelling) any prior one so
/// at most one is ever pending. The task re-checks both `active_tabs` and
/// elapsed time since `last_used` under the lock before acting, so a release
/// that lands just before the timer fires doesn't get shut down early.
async fn schedule_idle_shutdown(inner: Arc<Inner>, domain: String) {
    let mut slot = inner.shutdown_task.lock().await;
    if let Some(existing) = slot.take() {
        existing.abort();
    }
    let task_inner = Arc::clone(&inner);
    *slot = Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(task_inner.idle).await;
            if task_inner.active_tabs.load(Ordering::SeqCst) != 0 {
                return;
            }
            let elapsed = task_inner.last_used.lock().await.elapsed();
            if elapsed < task_inner.idle {
                continue;
            }
            let mut guard = task_inner.browser.lock().await;
            if task_inner.active_tabs.load(Ordering::SeqCst) != 0 {
                return;
            }
            if let Some(mut browser) = guard.take() {
                info!(domain = %domain, "idle timeout reached, stopping browser");
                close_browser(&mut browser, &domain).await;
            }
            return;
        }
    }));
}

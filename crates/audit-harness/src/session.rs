//! Browser session lifecycle
//!
//! A [`BrowserSession`] wraps a connected Chromium instance plus the spawned
//! task draining its CDP event handler. Sessions are opened fresh per
//! measurement target and torn down on every exit path, whether the target's
//! attempts completed, failed, or were abandoned as stuck.
//!
//! Two backends are supported: launching a local headless Chrome process, or
//! attaching to an already-running browser over its DevTools websocket.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, SetCookiesParams, TimeSinceEpoch,
};
use chromiumoxide::Page;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vitals_types::BackendKind;

use crate::config::BrowserSettings;
use crate::error::HarnessError;

/// Opens browser sessions. One implementation per [`BackendKind`].
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn open(&self) -> Result<BrowserSession, HarnessError>;
}

/// Build the session backend selected by the browser settings.
pub fn backend_from_settings(
    settings: &BrowserSettings,
) -> Result<Box<dyn SessionBackend>, HarnessError> {
    match settings.backend {
        BackendKind::HeadlessChrome => Ok(Box::new(HeadlessChrome::new(settings.clone()))),
        BackendKind::RemoteDebugger => {
            let ws_url = settings.remote_ws_url.clone().ok_or_else(|| {
                HarnessError::Config(
                    "browser.remote_ws_url is required for the remote_debugger backend".into(),
                )
            })?;
            Ok(Box::new(RemoteDebugger::new(ws_url)))
        }
    }
}

/// Launches a local headless Chrome process per session.
pub struct HeadlessChrome {
    settings: BrowserSettings,
}

impl HeadlessChrome {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self) -> Result<BrowserConfig, HarnessError> {
        let mut builder = BrowserConfig::builder();
        if let Some(executable) = &self.settings.chrome_executable {
            builder = builder.chrome_executable(executable);
        }
        if self.settings.no_sandbox {
            builder = builder.no_sandbox();
        }
        for arg in &self.settings.chrome_args {
            builder = builder.arg(arg);
        }
        builder.build().map_err(HarnessError::Config)
    }
}

#[async_trait]
impl SessionBackend for HeadlessChrome {
    fn kind(&self) -> BackendKind {
        BackendKind::HeadlessChrome
    }

    async fn open(&self) -> Result<BrowserSession, HarnessError> {
        info!("Launching headless browser");
        let (browser, handler) = Browser::launch(self.browser_config()?).await?;
        let session = BrowserSession::new(BackendKind::HeadlessChrome, browser, handler);
        info!("Browser launched");
        Ok(session)
    }
}

/// Attaches to an already-running browser over its DevTools websocket.
pub struct RemoteDebugger {
    ws_url: String,
}

impl RemoteDebugger {
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }
}

#[async_trait]
impl SessionBackend for RemoteDebugger {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteDebugger
    }

    async fn open(&self) -> Result<BrowserSession, HarnessError> {
        info!("Attaching to remote browser at {}", self.ws_url);
        let (browser, handler) = Browser::connect(&self.ws_url).await?;
        let session = BrowserSession::new(BackendKind::RemoteDebugger, browser, handler);
        info!("Attached to remote browser");
        Ok(session)
    }
}

/// A live browser session
///
/// The browser sits behind a mutex-wrapped `Option` so that teardown can take
/// ownership through a shared reference: an abandoned attempt task may still
/// hold a clone of the session when the runner tears it down.
pub struct BrowserSession {
    backend: BackendKind,
    browser: tokio::sync::Mutex<Option<Browser>>,
    handler_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BrowserSession {
    fn new(
        backend: BackendKind,
        browser: Browser,
        mut handler: chromiumoxide::Handler,
    ) -> Self {
        // Drain CDP events for the lifetime of the session
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Self {
            backend,
            browser: tokio::sync::Mutex::new(Some(browser)),
            handler_task: std::sync::Mutex::new(Some(handler_task)),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Open a blank page in this session.
    pub async fn new_page(&self) -> Result<Page, HarnessError> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(HarnessError::SessionClosed)?;
        Ok(browser.new_page("about:blank").await?)
    }

    /// Seed consent cookies for `host` so cookie banners are already dismissed
    /// when the first audited navigation happens. The cookies expire roughly a
    /// year from `now`, matching what the banners themselves would set.
    pub async fn seed_consent_cookies(
        &self,
        host: &str,
        now: DateTime<Utc>,
    ) -> Result<(), HarnessError> {
        let expires = (now + ChronoDuration::days(365)).timestamp() as f64;

        let mut cookies = Vec::new();
        for (name, value) in consent_cookie_values() {
            let cookie = CookieParam::builder()
                .name(name)
                .value(value)
                .domain(host)
                .path("/")
                .expires(TimeSinceEpoch::new(expires))
                .build()
                .map_err(HarnessError::Config)?;
            cookies.push(cookie);
        }

        debug!(host, count = cookies.len(), "Seeding consent cookies");
        let page = self.new_page().await?;
        let result = page.execute(SetCookiesParams::new(cookies)).await;
        let _ = page.close().await;
        result?;
        Ok(())
    }

    /// Tear the session down: close the browser and stop the event drain.
    /// Errors are logged rather than surfaced since teardown runs on failure
    /// paths too.
    pub async fn close(&self) {
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser cleanly: {e}");
            }
            if self.backend == BackendKind::HeadlessChrome {
                if let Err(e) = browser.wait().await {
                    warn!("Failed to reap browser process: {e}");
                }
            }
        }
        let task = self
            .handler_task
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Cookie name/value pairs understood by the consent banners on the audited
/// sites. Keyed by cookie name.
fn consent_cookie_values() -> Vec<(&'static str, &'static str)> {
    vec![
        ("cookie_consent", "accepted"),
        ("cookieconsent_status", "dismiss"),
    ]
}

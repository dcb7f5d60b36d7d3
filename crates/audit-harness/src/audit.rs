//! Single audit attempts
//!
//! [`TargetAuditor`] is the seam between the attempt loop and the browser: one
//! call performs one page load under a given cache state and returns the
//! observed vitals. [`ChromiumAuditor`] is the real implementation; tests
//! drive the loop with stubs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCacheParams;
use chromiumoxide::cdp::browser_protocol::storage::ClearDataForOriginParams;
use chromiumoxide::Page;
use tracing::debug;

use vitals_types::{CacheState, MeasurementTarget};

use crate::config::RunnerSettings;
use crate::error::HarnessError;
use crate::session::BrowserSession;
use crate::vitals::{ObservedVitals, VitalsCollector};

/// Performs one audit attempt against a target.
#[async_trait]
pub trait TargetAuditor: Send + Sync + 'static {
    async fn run_attempt(
        &self,
        target: &MeasurementTarget,
        cache_state: CacheState,
    ) -> Result<ObservedVitals, HarnessError>;
}

/// Audits pages through a live browser session.
pub struct ChromiumAuditor {
    session: Arc<BrowserSession>,
    settings: RunnerSettings,
}

impl ChromiumAuditor {
    pub fn new(session: Arc<BrowserSession>, settings: RunnerSettings) -> Self {
        Self { session, settings }
    }

    async fn audit_on_page(
        &self,
        page: &Page,
        target: &MeasurementTarget,
        cache_state: CacheState,
    ) -> Result<ObservedVitals, HarnessError> {
        if cache_state == CacheState::Uncached {
            // Cold visit: flush the HTTP cache and origin storage so the load
            // hits the network. Cookies are left alone so seeded consent
            // state survives.
            page.execute(ClearBrowserCacheParams::default()).await?;
            let origin = format!("https://{}", target.host);
            page.execute(ClearDataForOriginParams::new(
                origin,
                "appcache,cache_storage,indexeddb,local_storage,service_workers,websql",
            ))
            .await?;
        }

        let collector = VitalsCollector::new();
        collector.inject_into_page(page).await?;
        let handle = collector.start_collecting(page).await?;

        debug!(url = %target.url(), cache = %cache_state, "Navigating");
        bounded_navigation(self.settings.max_load_wait(), async {
            page.goto(target.url()).await?;
            page.wait_for_navigation().await?;
            Ok(())
        })
        .await?;

        // Let late LCP/CLS/longtask entries land before taking the snapshot.
        // The settle phase is covered by the caller's stuck race, not by the
        // page-load ceiling.
        tokio::time::sleep(self.settings.metric_settle()).await;

        Ok(handle.collect().await)
    }
}

#[async_trait]
impl TargetAuditor for ChromiumAuditor {
    async fn run_attempt(
        &self,
        target: &MeasurementTarget,
        cache_state: CacheState,
    ) -> Result<ObservedVitals, HarnessError> {
        let page = self.session.new_page().await?;
        let result = self.audit_on_page(&page, target, cache_state).await;
        let _ = page.close().await;
        result
    }
}

/// Caps the load phase at the configured ceiling. A page that never finishes
/// navigating fails the attempt instead of eating into the settle window.
pub(crate) async fn bounded_navigation<F>(limit: Duration, navigate: F) -> Result<(), HarnessError>
where
    F: Future<Output = Result<(), HarnessError>>,
{
    match tokio::time::timeout(limit, navigate).await {
        Ok(result) => result,
        Err(_) => Err(HarnessError::LoadTimedOut(limit)),
    }
}

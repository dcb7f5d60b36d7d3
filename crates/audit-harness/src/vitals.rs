//! Web vitals collection via chromiumoxide
//!
//! The [`VitalsCollector`] injects a small PerformanceObserver harness into
//! pages before navigation. The injected script reports each metric via
//! `console.log()` with the prefix `__PAGEWATCH_METRIC__:`, and a background
//! task listening for `Runtime.consoleAPICalled` events accumulates the
//! latest value per metric.
//!
//! Collected metrics: FCP, LCP, CLS, TBT (accumulated long-task blocking
//! time), and INP. Time-based values are reported in milliseconds; CLS is
//! unitless.

use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

const METRIC_PREFIX: &str = "__PAGEWATCH_METRIC__:";

/// A single metric report from the injected script
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VitalsReport {
    /// "FCP", "LCP", "CLS", "TBT", or "INP"
    pub name: String,
    /// Milliseconds for FCP/LCP/TBT/INP, unitless for CLS
    pub value: f64,
}

/// Metrics observed on a page so far
///
/// `None` means the corresponding observer never fired. For CLS and TBT that
/// is a meaningful zero (no shifts, no long tasks); for FCP and LCP it means
/// the page never painted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedVitals {
    /// First contentful paint in milliseconds
    pub fcp_ms: Option<f64>,
    /// Largest contentful paint in milliseconds
    pub lcp_ms: Option<f64>,
    /// Cumulative layout shift, unitless
    pub cls: Option<f64>,
    /// Total blocking time in milliseconds
    pub tbt_ms: Option<f64>,
    /// Interaction to next paint in milliseconds
    pub inp_ms: Option<f64>,
}

/// Handle to a running vitals collection task
pub struct VitalsHandle {
    vitals: Arc<Mutex<ObservedVitals>>,
    task: tokio::task::JoinHandle<()>,
}

impl VitalsHandle {
    /// Stop listening and return the metrics captured so far.
    pub async fn collect(self) -> ObservedVitals {
        self.task.abort();
        self.vitals.lock().await.clone()
    }
}

/// Injects the observer harness and accumulates reported vitals.
#[derive(Debug, Clone, Default)]
pub struct VitalsCollector {
    _private: (),
}

impl VitalsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject the observer harness into a page
    ///
    /// Must run before navigation; the script is registered with
    /// `addScriptToEvaluateOnNewDocument` so it executes ahead of any page
    /// scripts.
    pub async fn inject_into_page(&self, page: &Page) -> Result<()> {
        debug!("Injecting vitals observer script");
        let params = AddScriptToEvaluateOnNewDocumentParams::new(Self::observer_script());
        page.execute(params)
            .await
            .context("Failed to inject vitals observer script")?;
        Ok(())
    }

    /// Start accumulating metrics in the background
    ///
    /// Spawns a task that listens for console events and keeps the latest
    /// value per metric. Call this before navigating so reports emitted during
    /// page load are captured.
    pub async fn start_collecting(&self, page: &Page) -> Result<VitalsHandle> {
        let vitals = Arc::new(Mutex::new(ObservedVitals::default()));
        let vitals_clone = vitals.clone();

        let mut events = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .context("Failed to subscribe to console events")?;

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Some(report) = parse_metric_event(&event) {
                    let mut v = vitals_clone.lock().await;
                    apply_report(&mut v, &report);
                }
            }
        });

        Ok(VitalsHandle { vitals, task })
    }

    /// The injected PerformanceObserver harness
    ///
    /// TBT is reported cumulatively: each long task adds `max(0, duration-50)`
    /// and the running total is re-reported, so the last report wins.
    fn observer_script() -> String {
        r#"
(function() {
    'use strict';

    const METRIC_PREFIX = '__PAGEWATCH_METRIC__:';

    function report(name, value) {
        console.log(METRIC_PREFIX + JSON.stringify({ name: name, value: value }));
    }

    // FCP
    try {
        const paintObserver = new PerformanceObserver((list) => {
            for (const entry of list.getEntries()) {
                if (entry.name === 'first-contentful-paint') {
                    report('FCP', entry.startTime);
                }
            }
        });
        paintObserver.observe({ type: 'paint', buffered: true });
    } catch (e) {
        console.warn('paint observer not supported:', e);
    }

    // LCP: the last entry before the page settles wins
    try {
        const lcpObserver = new PerformanceObserver((list) => {
            const entries = list.getEntries();
            const lastEntry = entries[entries.length - 1];
            report('LCP', lastEntry.renderTime || lastEntry.loadTime);
        });
        lcpObserver.observe({ type: 'largest-contentful-paint', buffered: true });
    } catch (e) {
        console.warn('LCP observer not supported:', e);
    }

    // CLS: running total of unexpected shifts
    try {
        let clsValue = 0;
        const clsObserver = new PerformanceObserver((list) => {
            for (const entry of list.getEntries()) {
                if (!entry.hadRecentInput) {
                    clsValue += entry.value;
                    report('CLS', clsValue);
                }
            }
        });
        clsObserver.observe({ type: 'layout-shift', buffered: true });
    } catch (e) {
        console.warn('CLS observer not supported:', e);
    }

    // TBT: sum of long-task time beyond the 50ms budget
    try {
        let tbtValue = 0;
        const tbtObserver = new PerformanceObserver((list) => {
            for (const entry of list.getEntries()) {
                tbtValue += Math.max(0, entry.duration - 50);
            }
            report('TBT', tbtValue);
        });
        tbtObserver.observe({ type: 'longtask', buffered: true });
    } catch (e) {
        console.warn('longtask observer not supported:', e);
    }

    // INP: worst interaction latency seen so far
    try {
        let inpValue = 0;
        const inpObserver = new PerformanceObserver((list) => {
            for (const entry of list.getEntries()) {
                if (entry.interactionId) {
                    inpValue = Math.max(inpValue, entry.duration);
                    report('INP', inpValue);
                }
            }
        });
        inpObserver.observe({ type: 'event', buffered: true, durationThreshold: 16 });
    } catch (e) {
        console.warn('event timing observer not supported:', e);
    }
})();
"#
        .to_string()
    }
}

/// Extract a vitals report from a console event, if it carries one.
fn parse_metric_event(event: &EventConsoleApiCalled) -> Option<VitalsReport> {
    let first_arg = event.args.first()?;
    let message = first_arg.value.as_ref()?.as_str()?;
    let json_str = message.strip_prefix(METRIC_PREFIX)?;

    match serde_json::from_str::<VitalsReport>(json_str) {
        Ok(report) => {
            trace!(name = %report.name, value = report.value, "Captured vitals report");
            Some(report)
        }
        Err(e) => {
            warn!("Failed to parse vitals payload: {json_str} - {e}");
            None
        }
    }
}

fn apply_report(vitals: &mut ObservedVitals, report: &VitalsReport) {
    match report.name.as_str() {
        "FCP" => vitals.fcp_ms = Some(report.value),
        "LCP" => vitals.lcp_ms = Some(report.value),
        "CLS" => vitals.cls = Some(report.value),
        "TBT" => vitals.tbt_ms = Some(report.value),
        "INP" => vitals.inp_ms = Some(report.value),
        other => trace!("Ignoring unknown metric {other}"),
    }
}

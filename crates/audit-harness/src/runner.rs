//! The batch audit runner
//!
//! One batch pass enumerates the active hosts and pathnames (pathname-major,
//! least-recently-tested pathname first), opens a fresh browser session per
//! target, runs the configured number of attempts while alternating cache
//! state, and records every attempt that produced a scorable page load.
//!
//! Failure isolation rules:
//! - an attempt that errors or runs past the stuck deadline is logged and
//!   skipped; the remaining attempts for the target still run
//! - a target whose session cannot be opened is logged and skipped; the rest
//!   of the batch still runs
//! - a failed report-artifact upload never drops the sample
//! - storage errors and target-enumeration errors are surfaced as batch
//!   failures

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use metrics_store::{MetricStore, SampleDraft};
use vitals_types::{CacheState, MeasurementTarget};

use crate::audit::{ChromiumAuditor, TargetAuditor};
use crate::config::CollectorConfig;
use crate::error::HarnessError;
use crate::report::{AuditReport, FsReportSink, ReportSink};
use crate::retry::retry_with_delay;
use crate::score::{score_vitals, ScoredVitals};
use crate::session::{backend_from_settings, SessionBackend};
use crate::vitals::ObservedVitals;

/// Counters for one completed batch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Targets for which a session open was attempted
    pub targets_attempted: usize,
    /// Targets skipped because their session could not be opened
    pub targets_skipped: usize,
    /// Attempts that produced a recorded sample
    pub samples_recorded: usize,
    /// Attempts that failed, timed out, or could not be recorded
    pub attempts_failed: usize,
}

/// Per-target attempt counters
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TargetOutcome {
    pub recorded: usize,
    pub failed: usize,
}

/// Drives batch passes against the configured browser backend.
pub struct AuditRunner {
    store: MetricStore,
    config: CollectorConfig,
    backend: Box<dyn SessionBackend>,
    sink: Option<Box<dyn ReportSink>>,
}

impl AuditRunner {
    pub fn new(config: CollectorConfig, store: MetricStore) -> Result<Self, HarnessError> {
        let backend = backend_from_settings(&config.browser)?;
        let sink: Option<Box<dyn ReportSink>> = if config.artifacts.enabled {
            Some(Box::new(FsReportSink::new(config.artifacts.dir.clone())))
        } else {
            None
        };
        Ok(Self {
            store,
            config,
            backend,
            sink,
        })
    }

    /// Replace the artifact sink, regardless of the `artifacts.enabled` flag.
    pub fn with_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run one full batch pass over every active (pathname, host) pair.
    pub async fn run_batch(&self) -> Result<BatchSummary, HarnessError> {
        let pathnames = self.store.active_pathnames().await?;
        let hosts = self.store.active_hosts().await?;

        if pathnames.is_empty() || hosts.is_empty() {
            info!(
                pathnames = pathnames.len(),
                hosts = hosts.len(),
                "No active targets, batch pass is a no-op"
            );
            return Ok(BatchSummary::default());
        }

        info!(
            pathnames = pathnames.len(),
            hosts = hosts.len(),
            backend = %self.backend.kind(),
            "Starting batch pass"
        );

        let mut summary = BatchSummary::default();
        for entry in &pathnames {
            // Rotation bookkeeping happens before the host loop, so a pathname
            // that fails on every host still rotates out of first position.
            self.store.mark_tested(&entry.pathname, Utc::now()).await?;

            for host in &hosts {
                let target = MeasurementTarget {
                    host: host.host.clone(),
                    pathname: entry.pathname.clone(),
                    last_tested_at: entry.last_tested_at,
                };
                summary.targets_attempted += 1;

                match self.run_target(&target).await {
                    Ok(outcome) => {
                        summary.samples_recorded += outcome.recorded;
                        summary.attempts_failed += outcome.failed;
                    }
                    Err(e) => {
                        error!(url = %target.url(), "Skipping target, session failed: {e}");
                        summary.targets_skipped += 1;
                    }
                }
            }
        }

        info!(
            targets = summary.targets_attempted,
            skipped = summary.targets_skipped,
            recorded = summary.samples_recorded,
            failed = summary.attempts_failed,
            "Batch pass finished"
        );
        Ok(summary)
    }

    /// Audit one target in a fresh session. The session is torn down on every
    /// path once open; only a failed open propagates.
    async fn run_target(&self, target: &MeasurementTarget) -> Result<TargetOutcome, HarnessError> {
        info!(url = %target.url(), "Measuring target");
        let session = Arc::new(self.backend.open().await?);

        if self.config.consent.enabled {
            if let Err(e) = session.seed_consent_cookies(&target.host, Utc::now()).await {
                warn!(host = %target.host, "Failed to seed consent cookies: {e}");
            }
        }

        let auditor: Arc<dyn TargetAuditor> = Arc::new(ChromiumAuditor::new(
            session.clone(),
            self.config.runner.clone(),
        ));
        let outcome = self.run_attempts(auditor, target).await;

        session.close().await;
        Ok(outcome)
    }

    /// The attempt loop: attempt 1 is uncached, later attempts are cached.
    /// Never fails; every attempt error is absorbed into the outcome counters.
    pub(crate) async fn run_attempts(
        &self,
        auditor: Arc<dyn TargetAuditor>,
        target: &MeasurementTarget,
    ) -> TargetOutcome {
        let attempts = self.config.runner.runs_per_target.max(1);
        let mut outcome = TargetOutcome::default();

        for attempt in 1..=attempts {
            let cache_state = CacheState::for_attempt(attempt);
            let deadline = self.config.runner.stuck_deadline();

            match run_attempt_with_deadline(auditor.clone(), target, cache_state, deadline).await {
                Ok(observed) => match self.finalize_attempt(target, cache_state, &observed).await {
                    Ok(()) => outcome.recorded += 1,
                    Err(e) => {
                        error!(url = %target.url(), %cache_state, "Attempt not recorded: {e}");
                        outcome.failed += 1;
                    }
                },
                Err(e) => {
                    warn!(url = %target.url(), %cache_state, "Attempt failed: {e}");
                    outcome.failed += 1;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.runner.settle_delay()).await;
            }
        }

        outcome
    }

    /// Score the observation, upload the artifact if a sink is configured,
    /// and append the sample.
    async fn finalize_attempt(
        &self,
        target: &MeasurementTarget,
        cache_state: CacheState,
        observed: &ObservedVitals,
    ) -> Result<(), HarnessError> {
        let scored = score_vitals(observed).ok_or(HarnessError::NoUsableScore)?;
        let timestamp = Utc::now();
        let backend = self.backend.kind();

        let report_ref = match &self.sink {
            Some(sink) => {
                self.upload_report(sink.as_ref(), target, timestamp, cache_state, &scored)
                    .await
            }
            None => None,
        };

        let draft = SampleDraft {
            host: target.host.clone(),
            pathname: target.pathname.clone(),
            timestamp,
            cache_state,
            browser_backend: backend,
            performance_score: Some(scored.performance_score),
            // Paint timings and speed index are stored in seconds, blocking
            // and interaction latencies in milliseconds.
            first_contentful_paint: Some(scored.first_contentful_paint_ms / 1_000.0),
            largest_contentful_paint: Some(scored.largest_contentful_paint_ms / 1_000.0),
            speed_index: Some(scored.speed_index_ms / 1_000.0),
            total_blocking_time: Some(scored.total_blocking_time_ms),
            cumulative_layout_shift: Some(scored.cumulative_layout_shift),
            interaction_to_next_paint: scored.interaction_to_next_paint_ms,
            report_ref,
        };

        let sample = self.store.record_sample(draft).await?;
        debug!(
            url = %target.url(),
            %cache_state,
            score = sample.performance_score,
            "Recorded sample"
        );
        Ok(())
    }

    async fn upload_report(
        &self,
        sink: &dyn ReportSink,
        target: &MeasurementTarget,
        timestamp: chrono::DateTime<Utc>,
        cache_state: CacheState,
        scored: &ScoredVitals,
    ) -> Option<String> {
        let report = AuditReport::new(target, timestamp, cache_state, self.backend.kind(), scored);
        let body = match report.to_json() {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to serialize report artifact: {e}");
                return None;
            }
        };
        let key = report.key();

        match retry_with_delay(
            self.config.artifacts.upload_attempts,
            self.config.artifacts.upload_retry_delay(),
            || sink.upload(&key, &body),
        )
        .await
        {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!(key = %key, "Report upload failed, recording sample without artifact: {e}");
                None
            }
        }
    }
}

/// Race one attempt against the stuck deadline. A timed-out attempt is left
/// running detached; closing the session afterwards unblocks whatever it was
/// waiting on.
async fn run_attempt_with_deadline(
    auditor: Arc<dyn TargetAuditor>,
    target: &MeasurementTarget,
    cache_state: CacheState,
    deadline: Duration,
) -> Result<ObservedVitals, HarnessError> {
    let task = tokio::spawn({
        let target = target.clone();
        async move { auditor.run_attempt(&target, cache_state).await }
    });

    tokio::select! {
        joined = task => match joined {
            Ok(result) => result,
            Err(e) => Err(HarnessError::AttemptTask(e.to_string())),
        },
        _ = tokio::time::sleep(deadline) => Err(HarnessError::Stuck(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArtifactSettings, StoreSettings};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn test_config() -> CollectorConfig {
        let mut config = CollectorConfig {
            store: StoreSettings {
                database_url: "sqlite::memory:".into(),
            },
            browser: Default::default(),
            runner: Default::default(),
            consent: Default::default(),
            artifacts: ArtifactSettings::default(),
        };
        // Keep test attempts fast
        config.runner.settle_delay_ms = 1;
        config.runner.max_load_wait_ms = 40;
        config.runner.stuck_grace_ms = 10;
        config
    }

    fn target() -> MeasurementTarget {
        MeasurementTarget {
            host: "www.example.com".into(),
            pathname: "/".into(),
            last_tested_at: None,
        }
    }

    fn good_vitals() -> ObservedVitals {
        ObservedVitals {
            fcp_ms: Some(900.0),
            lcp_ms: Some(1_500.0),
            cls: Some(0.02),
            tbt_ms: Some(80.0),
            inp_ms: None,
        }
    }

    async fn runner_with(config: CollectorConfig) -> (AuditRunner, MetricStore) {
        let store = MetricStore::in_memory().await.unwrap();
        let runner = AuditRunner::new(config, store.clone()).unwrap();
        (runner, store)
    }

    /// Records which (attempt, cache state) calls were made and replays a
    /// scripted response per call.
    struct ScriptedAuditor {
        calls: Mutex<Vec<CacheState>>,
        script: Vec<ScriptStep>,
    }

    enum ScriptStep {
        Succeed(ObservedVitals),
        Fail,
        HangForever,
    }

    impl ScriptedAuditor {
        fn new(script: Vec<ScriptStep>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                script,
            })
        }

        fn calls(&self) -> Vec<CacheState> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TargetAuditor for ScriptedAuditor {
        async fn run_attempt(
            &self,
            _target: &MeasurementTarget,
            cache_state: CacheState,
        ) -> Result<ObservedVitals, HarnessError> {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(cache_state);
                calls.len() - 1
            };
            match self.script.get(index) {
                Some(ScriptStep::Succeed(vitals)) => Ok(vitals.clone()),
                Some(ScriptStep::Fail) => Err(HarnessError::NoUsableScore),
                Some(ScriptStep::HangForever) => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
                None => Err(HarnessError::AttemptTask("script exhausted".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_attempts_alternate_cache_state() {
        let (runner, store) = runner_with(test_config()).await;
        let auditor = ScriptedAuditor::new(vec![
            ScriptStep::Succeed(good_vitals()),
            ScriptStep::Succeed(good_vitals()),
        ]);

        let outcome = runner.run_attempts(auditor.clone(), &target()).await;

        assert_eq!(outcome.recorded, 2);
        assert_eq!(outcome.failed, 0);
        assert_eq!(
            auditor.calls(),
            vec![CacheState::Uncached, CacheState::Cached]
        );

        let samples = store
            .fetch_raw_series(&Default::default())
            .await
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].cache_state, CacheState::Uncached);
        assert_eq!(samples[1].cache_state, CacheState::Cached);
        // Stored in seconds
        assert!((samples[0].first_contentful_paint - 0.9).abs() < 1e-9);
        assert!((samples[0].largest_contentful_paint - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stuck_attempt_records_nothing_and_next_attempt_runs() {
        let (runner, store) = runner_with(test_config()).await;
        let auditor = ScriptedAuditor::new(vec![
            ScriptStep::HangForever,
            ScriptStep::Succeed(good_vitals()),
        ]);

        let outcome = runner.run_attempts(auditor.clone(), &target()).await;

        assert_eq!(outcome.recorded, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(
            auditor.calls(),
            vec![CacheState::Uncached, CacheState::Cached]
        );

        // Only the cached attempt landed
        let samples = store
            .fetch_raw_series(&Default::default())
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].cache_state, CacheState::Cached);
    }

    #[tokio::test]
    async fn test_failed_attempt_does_not_abort_siblings() {
        let (runner, store) = runner_with(test_config()).await;
        let auditor = ScriptedAuditor::new(vec![
            ScriptStep::Fail,
            ScriptStep::Succeed(good_vitals()),
        ]);

        let outcome = runner.run_attempts(auditor.clone(), &target()).await;

        assert_eq!(outcome.recorded, 1);
        assert_eq!(outcome.failed, 1);
        let samples = store
            .fetch_raw_series(&Default::default())
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[tokio::test]
    async fn test_unscorable_page_load_is_a_failed_attempt() {
        let (runner, store) = runner_with(test_config()).await;
        // Page never painted: vitals observed but no FCP/LCP
        let auditor = ScriptedAuditor::new(vec![
            ScriptStep::Succeed(ObservedVitals::default()),
            ScriptStep::Succeed(good_vitals()),
        ]);

        let outcome = runner.run_attempts(auditor.clone(), &target()).await;

        assert_eq!(outcome.recorded, 1);
        assert_eq!(outcome.failed, 1);
        let samples = store
            .fetch_raw_series(&Default::default())
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_inp_is_stored_as_sentinel() {
        let mut config = test_config();
        config.runner.runs_per_target = 1;
        let (runner, store) = runner_with(config).await;
        let auditor = ScriptedAuditor::new(vec![ScriptStep::Succeed(good_vitals())]);

        let outcome = runner.run_attempts(auditor, &target()).await;

        assert_eq!(outcome.recorded, 1);
        let samples = store
            .fetch_raw_series(&Default::default())
            .await
            .unwrap();
        assert_eq!(samples[0].interaction_to_next_paint, -1.0);
        assert!(!samples[0].has_inp());
    }

    #[tokio::test]
    async fn test_failed_upload_still_records_the_sample() {
        struct FailingSink;

        #[async_trait]
        impl ReportSink for FailingSink {
            async fn upload(&self, _key: &str, _body: &[u8]) -> Result<String, HarnessError> {
                Err(HarnessError::Artifact(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "sink offline",
                )))
            }
        }

        let mut config = test_config();
        config.runner.runs_per_target = 1;
        config.artifacts.upload_attempts = 2;
        config.artifacts.upload_retry_delay_ms = 1;
        let store = MetricStore::in_memory().await.unwrap();
        let runner = AuditRunner::new(config, store.clone())
            .unwrap()
            .with_sink(Box::new(FailingSink));

        let auditor = ScriptedAuditor::new(vec![ScriptStep::Succeed(good_vitals())]);
        let outcome = runner.run_attempts(auditor, &target()).await;

        assert_eq!(outcome.recorded, 1);
        let samples = store
            .fetch_raw_series(&Default::default())
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].report_ref, None);
    }

    #[tokio::test]
    async fn test_successful_upload_attaches_the_reference() {
        struct RecordingSink;

        #[async_trait]
        impl ReportSink for RecordingSink {
            async fn upload(&self, key: &str, _body: &[u8]) -> Result<String, HarnessError> {
                Ok(key.to_string())
            }
        }

        let mut config = test_config();
        config.runner.runs_per_target = 1;
        let store = MetricStore::in_memory().await.unwrap();
        let runner = AuditRunner::new(config, store.clone())
            .unwrap()
            .with_sink(Box::new(RecordingSink));

        let auditor = ScriptedAuditor::new(vec![ScriptStep::Succeed(good_vitals())]);
        let outcome = runner.run_attempts(auditor, &target()).await;

        assert_eq!(outcome.recorded, 1);
        let samples = store
            .fetch_raw_series(&Default::default())
            .await
            .unwrap();
        let reference = samples[0].report_ref.as_deref().unwrap();
        assert!(reference.starts_with("www.example.com/"));
        assert!(reference.ends_with("-uncached.json"));
    }
}

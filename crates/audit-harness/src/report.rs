//! Report artifacts
//!
//! Each recorded sample can carry an opaque reference to a JSON report
//! artifact with the full per-attempt detail. Uploads go through the
//! [`ReportSink`] trait; the filesystem sink writes under a configured
//! directory and returns the relative path as the reference.
//!
//! A failed upload never blocks recording: the sample is stored with no
//! report reference instead.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use vitals_types::{BackendKind, CacheState, MeasurementTarget};

use crate::error::HarnessError;
use crate::score::ScoredVitals;

/// Destination for report artifacts. Returns the opaque reference stored on
/// the sample.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn upload(&self, key: &str, body: &[u8]) -> Result<String, HarnessError>;
}

/// Full per-attempt detail serialized into the artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub host: String,
    pub pathname: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub cache_state: CacheState,
    pub browser_backend: BackendKind,
    pub performance_score: f64,
    /// Milliseconds
    pub first_contentful_paint_ms: f64,
    /// Milliseconds
    pub largest_contentful_paint_ms: f64,
    /// Milliseconds
    pub speed_index_ms: f64,
    /// Milliseconds
    pub total_blocking_time_ms: f64,
    pub cumulative_layout_shift: f64,
    /// Milliseconds; absent when the page saw no qualifying interaction
    pub interaction_to_next_paint_ms: Option<f64>,
}

impl AuditReport {
    pub fn new(
        target: &MeasurementTarget,
        timestamp: DateTime<Utc>,
        cache_state: CacheState,
        backend: BackendKind,
        scored: &ScoredVitals,
    ) -> Self {
        Self {
            host: target.host.clone(),
            pathname: target.pathname.clone(),
            url: target.url(),
            timestamp,
            cache_state,
            browser_backend: backend,
            performance_score: scored.performance_score,
            first_contentful_paint_ms: scored.first_contentful_paint_ms,
            largest_contentful_paint_ms: scored.largest_contentful_paint_ms,
            speed_index_ms: scored.speed_index_ms,
            total_blocking_time_ms: scored.total_blocking_time_ms,
            cumulative_layout_shift: scored.cumulative_layout_shift,
            interaction_to_next_paint_ms: scored.interaction_to_next_paint_ms,
        }
    }

    /// Artifact key: one directory per host, filename from pathname,
    /// timestamp, and cache state.
    pub fn key(&self) -> String {
        let slug = if self.pathname == "/" {
            "root".to_string()
        } else {
            self.pathname.trim_matches('/').replace('/', "-")
        };
        format!(
            "{}/{}-{}-{}.json",
            self.host,
            slug,
            self.timestamp.format("%Y%m%dT%H%M%SZ"),
            self.cache_state
        )
    }

    pub fn to_json(&self) -> Result<Vec<u8>, HarnessError> {
        serde_json::to_vec_pretty(self).map_err(|e| {
            HarnessError::Artifact(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

/// Writes report artifacts under a local directory.
pub struct FsReportSink {
    root: PathBuf,
}

impl FsReportSink {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ReportSink for FsReportSink {
    async fn upload(&self, key: &str, body: &[u8]) -> Result<String, HarnessError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        debug!(path = %path.display(), "Wrote report artifact");
        Ok(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> AuditReport {
        let target = MeasurementTarget {
            host: "www.example.com".into(),
            pathname: "/pricing/plans".into(),
            last_tested_at: None,
        };
        let scored = ScoredVitals {
            performance_score: 92.5,
            first_contentful_paint_ms: 900.0,
            largest_contentful_paint_ms: 1_500.0,
            speed_index_ms: 1_200.0,
            total_blocking_time_ms: 80.0,
            cumulative_layout_shift: 0.02,
            interaction_to_next_paint_ms: None,
        };
        let timestamp = "2026-03-01T12:30:45Z".parse().unwrap();
        AuditReport::new(
            &target,
            timestamp,
            CacheState::Uncached,
            BackendKind::HeadlessChrome,
            &scored,
        )
    }

    #[test]
    fn test_key_layout() {
        let report = sample_report();
        assert_eq!(
            report.key(),
            "www.example.com/pricing-plans-20260301T123045Z-uncached.json"
        );
    }

    #[test]
    fn test_root_pathname_key() {
        let mut report = sample_report();
        report.pathname = "/".into();
        assert!(report.key().contains("/root-"));
    }

    #[test]
    fn test_json_roundtrip() {
        let report = sample_report();
        let body = report.to_json().unwrap();
        let parsed: AuditReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.host, report.host);
        assert_eq!(parsed.performance_score, report.performance_score);
        assert_eq!(parsed.interaction_to_next_paint_ms, None);
    }

    #[tokio::test]
    async fn test_fs_sink_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsReportSink::new(dir.path().to_path_buf());
        let report = sample_report();

        let reference = sink
            .upload(&report.key(), &report.to_json().unwrap())
            .await
            .unwrap();

        assert_eq!(reference, report.key());
        let written = dir.path().join(&reference);
        assert!(written.exists());
        let parsed: AuditReport =
            serde_json::from_slice(&std::fs::read(written).unwrap()).unwrap();
        assert_eq!(parsed.url, "https://www.example.com/pricing/plans");
    }
}

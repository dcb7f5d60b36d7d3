//! Collector configuration
//!
//! TOML-based configuration for the periodic audit collector: which browser
//! backend to use, how many attempts to run per target, how long to wait
//! before declaring a page load stuck, and where report artifacts go.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vitals_types::BackendKind;

/// Main configuration structure loaded from TOML files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Metrics database settings
    pub store: StoreSettings,
    /// Browser backend settings
    #[serde(default)]
    pub browser: BrowserSettings,
    /// Attempt loop settings
    #[serde(default)]
    pub runner: RunnerSettings,
    /// Consent cookie seeding
    #[serde(default)]
    pub consent: ConsentSettings,
    /// Report artifact output
    #[serde(default)]
    pub artifacts: ArtifactSettings,
}

impl CollectorConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML is malformed,
    /// or required fields are missing
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("Failed to parse TOML configuration")
    }
}

/// Metrics database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite connection URL, e.g. `sqlite:pagewatch.db?mode=rwc`
    pub database_url: String,
}

/// Browser backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Which backend drives the audits (default: headless_chrome)
    #[serde(default)]
    pub backend: BackendKind,
    /// DevTools websocket URL, required for the remote_debugger backend
    #[serde(default)]
    pub remote_ws_url: Option<String>,
    /// Explicit Chrome/Chromium executable for the headless backend
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
    /// Launch with --no-sandbox, needed in most container environments
    #[serde(default = "default_no_sandbox")]
    pub no_sandbox: bool,
    /// Extra command-line arguments passed to the launched browser
    #[serde(default)]
    pub chrome_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            remote_ws_url: None,
            chrome_executable: None,
            no_sandbox: default_no_sandbox(),
            chrome_args: Vec::new(),
        }
    }
}

fn default_no_sandbox() -> bool {
    true
}

/// Attempt loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Attempts per target; attempt 1 is uncached, later attempts are cached
    /// (default: 2)
    #[serde(default = "default_runs_per_target")]
    pub runs_per_target: u32,
    /// Pause between attempts so the browser settles (default: 500ms)
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Maximum time to wait for a page load (default: 45s)
    #[serde(default = "default_max_load_wait_ms")]
    pub max_load_wait_ms: u64,
    /// Grace added on top of the page-load wait before an attempt is declared
    /// stuck and abandoned (default: 5s)
    #[serde(default = "default_stuck_grace_ms")]
    pub stuck_grace_ms: u64,
    /// Quiet period after load during which late vitals entries are still
    /// collected (default: 3s)
    #[serde(default = "default_metric_settle_ms")]
    pub metric_settle_ms: u64,
}

impl RunnerSettings {
    /// Deadline after which a hung attempt is abandoned. The page-load wait
    /// plus the grace period, so a merely slow load is never treated as stuck.
    pub fn stuck_deadline(&self) -> Duration {
        Duration::from_millis(self.max_load_wait_ms + self.stuck_grace_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn max_load_wait(&self) -> Duration {
        Duration::from_millis(self.max_load_wait_ms)
    }

    pub fn metric_settle(&self) -> Duration {
        Duration::from_millis(self.metric_settle_ms)
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            runs_per_target: default_runs_per_target(),
            settle_delay_ms: default_settle_delay_ms(),
            max_load_wait_ms: default_max_load_wait_ms(),
            stuck_grace_ms: default_stuck_grace_ms(),
            metric_settle_ms: default_metric_settle_ms(),
        }
    }
}

fn default_runs_per_target() -> u32 {
    2
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_max_load_wait_ms() -> u64 {
    45_000
}

fn default_stuck_grace_ms() -> u64 {
    5_000
}

fn default_metric_settle_ms() -> u64 {
    3_000
}

/// Consent cookie seeding
///
/// When enabled, cookies that pre-dismiss common consent banners are seeded
/// into the session before the first navigation, so banner rendering does not
/// pollute layout-shift and paint measurements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentSettings {
    /// Seed consent cookies before the first navigation (default: true)
    #[serde(default = "default_consent_enabled")]
    pub enabled: bool,
}

impl Default for ConsentSettings {
    fn default() -> Self {
        Self {
            enabled: default_consent_enabled(),
        }
    }
}

fn default_consent_enabled() -> bool {
    true
}

/// Report artifact output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSettings {
    /// Write a JSON report per recorded sample (default: false)
    #[serde(default)]
    pub enabled: bool,
    /// Directory report artifacts are written under (default: `reports`)
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
    /// Upload retry attempts before the artifact is given up on (default: 3)
    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,
    /// Delay between upload retries (default: 250ms)
    #[serde(default = "default_upload_retry_delay_ms")]
    pub upload_retry_delay_ms: u64,
}

impl ArtifactSettings {
    pub fn upload_retry_delay(&self) -> Duration {
        Duration::from_millis(self.upload_retry_delay_ms)
    }
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_artifact_dir(),
            upload_attempts: default_upload_attempts(),
            upload_retry_delay_ms: default_upload_retry_delay_ms(),
        }
    }
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_upload_attempts() -> u32 {
    3
}

fn default_upload_retry_delay_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let toml = r#"
            [store]
            database_url = "sqlite::memory:"
        "#;
        let config = CollectorConfig::from_str(toml).unwrap();

        assert_eq!(config.store.database_url, "sqlite::memory:");
        assert_eq!(config.browser.backend, BackendKind::HeadlessChrome);
        assert!(config.browser.no_sandbox);
        assert_eq!(config.runner.runs_per_target, 2);
        assert_eq!(config.runner.settle_delay_ms, 500);
        assert_eq!(config.runner.max_load_wait_ms, 45_000);
        assert_eq!(config.runner.stuck_grace_ms, 5_000);
        assert!(config.consent.enabled);
        assert!(!config.artifacts.enabled);
    }

    #[test]
    fn test_stuck_deadline_is_load_wait_plus_grace() {
        let runner = RunnerSettings::default();
        assert_eq!(runner.stuck_deadline(), Duration::from_millis(50_000));
    }

    #[test]
    fn test_remote_debugger_config() {
        let toml = r#"
            [store]
            database_url = "sqlite:pagewatch.db?mode=rwc"

            [browser]
            backend = "remote_debugger"
            remote_ws_url = "ws://localhost:9222/devtools/browser/abc"

            [runner]
            runs_per_target = 3
            max_load_wait_ms = 10000
        "#;
        let config = CollectorConfig::from_str(toml).unwrap();

        assert_eq!(config.browser.backend, BackendKind::RemoteDebugger);
        assert_eq!(
            config.browser.remote_ws_url.as_deref(),
            Some("ws://localhost:9222/devtools/browser/abc")
        );
        assert_eq!(config.runner.runs_per_target, 3);
        assert_eq!(
            config.runner.stuck_deadline(),
            Duration::from_millis(15_000)
        );
    }

    #[test]
    fn test_missing_store_section_is_an_error() {
        assert!(CollectorConfig::from_str("[browser]\n").is_err());
    }
}

use chrono::{DateTime, Utc};

/// Sentinel stored for interaction-to-next-paint when the audit produced no
/// interaction measurement. The column is non-nullable; consumers that must
/// ignore unavailable INP compare against this value.
pub const INP_UNAVAILABLE: f64 = -1.0;

/// Maximum number of rows any derived view is computed over. The same capped
/// set feeds the raw series, the rolling average, and the summary statistics.
pub const SERIES_ROW_CAP: i64 = 2000;

/// Whether an audit attempt represents a cold first visit or a warm repeat
/// visit within the same browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Uncached,
    Cached,
}

impl CacheState {
    /// Cache state for the n-th attempt of a target (1-based): the first
    /// visit is always cold, every later visit reuses session state.
    pub fn for_attempt(attempt: u32) -> Self {
        if attempt <= 1 {
            CacheState::Uncached
        } else {
            CacheState::Cached
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Uncached => "uncached",
            CacheState::Cached => "cached",
        }
    }
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CacheState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uncached" => Ok(CacheState::Uncached),
            "cached" => Ok(CacheState::Cached),
            other => Err(format!("unknown cache state: {other}")),
        }
    }
}

/// Which browser automation backend produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Locally launched headless Chrome process.
    #[default]
    HeadlessChrome,
    /// Attached to a remote DevTools websocket endpoint.
    RemoteDebugger,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::HeadlessChrome => "headless_chrome",
            BackendKind::RemoteDebugger => "remote_debugger",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "headless_chrome" => Ok(BackendKind::HeadlessChrome),
            "remote_debugger" => Ok(BackendKind::RemoteDebugger),
            other => Err(format!("unknown browser backend: {other}")),
        }
    }
}

/// A host row from the configuration tables. Owned externally; read-only here.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Host {
    pub host: String,
    pub is_active: bool,
}

/// A (host, pathname) pair due for measurement, with the rotation timestamp
/// the enumerator maintains.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MeasurementTarget {
    pub host: String,
    pub pathname: String,
    pub last_tested_at: Option<DateTime<Utc>>,
}

impl MeasurementTarget {
    /// Full URL the audit navigates to.
    pub fn url(&self) -> String {
        format!("https://{}{}", self.host, self.pathname)
    }
}

/// One completed audit, immutable once recorded.
///
/// Units follow the original series: FCP/LCP/speed index in seconds, TBT and
/// INP in milliseconds, CLS unitless, score 0-100.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricSample {
    pub host: String,
    pub pathname: String,
    pub timestamp: DateTime<Utc>,
    pub cache_state: CacheState,
    pub browser_backend: BackendKind,
    pub performance_score: f64,
    pub first_contentful_paint: f64,
    pub largest_contentful_paint: f64,
    pub total_blocking_time: f64,
    pub cumulative_layout_shift: f64,
    pub speed_index: f64,
    pub interaction_to_next_paint: f64,
    /// Opaque reference to an uploaded report artifact, if one was produced
    /// and its upload succeeded. Retrieval is owned by an external viewer.
    pub report_ref: Option<String>,
}

impl MetricSample {
    /// Whether the INP field carries a real measurement.
    pub fn has_inp(&self) -> bool {
        self.interaction_to_next_paint != INP_UNAVAILABLE
    }
}

/// Filter for the derived views. Omitted fields are wildcards.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SeriesFilter {
    pub host: Option<String>,
    pub pathname: Option<String>,
    /// `None` selects both cached and uncached samples.
    pub cache_state: Option<CacheState>,
    /// Lookback window in hours. `None` means the default of 24.
    pub timespan_hours: Option<u32>,
}

impl SeriesFilter {
    pub const DEFAULT_TIMESPAN_HOURS: u32 = 24;

    pub fn timespan_hours(&self) -> u32 {
        self.timespan_hours.unwrap_or(Self::DEFAULT_TIMESPAN_HOURS)
    }
}

/// One point of the rolling-average series. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AggregatedPoint {
    pub timestamp: DateTime<Utc>,
    pub performance_score: f64,
    pub first_contentful_paint: f64,
    pub largest_contentful_paint: f64,
    pub total_blocking_time: f64,
    pub cumulative_layout_shift: f64,
    pub speed_index: f64,
    pub interaction_to_next_paint: f64,
}

/// Population mean and standard deviation for one metric.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    /// Population standard deviation, `sqrt(E[x^2] - E[x]^2)` (divide by N,
    /// no Bessel correction).
    pub std_dev: f64,
}

/// Per-metric summary statistics over one filtered set. Ephemeral.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SummaryStats {
    pub performance_score: MetricStats,
    pub first_contentful_paint: MetricStats,
    pub largest_contentful_paint: MetricStats,
    pub total_blocking_time: MetricStats,
    pub cumulative_layout_shift: MetricStats,
    pub speed_index: MetricStats,
    /// Computed excluding sentinel rows; `None` when every row in the set
    /// carried the sentinel.
    pub interaction_to_next_paint: Option<MetricStats>,
    /// Number of rows the statistics were computed over.
    pub sample_count: usize,
}

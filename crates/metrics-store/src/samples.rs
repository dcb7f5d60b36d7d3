//! The metrics recorder and the shared filtered/capped row selection.

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::debug;
use vitals_types::{
    BackendKind, CacheState, MetricSample, SeriesFilter, INP_UNAVAILABLE, SERIES_ROW_CAP,
};

use crate::{MetricStore, StoreError};

/// A not-yet-validated sample as produced by the audit runner. Numeric fields
/// the audit may have failed to observe are optional here; validation turns a
/// draft into an immutable [`MetricSample`] or rejects it.
#[derive(Debug, Clone)]
pub struct SampleDraft {
    pub host: String,
    pub pathname: String,
    pub timestamp: DateTime<Utc>,
    pub cache_state: CacheState,
    pub browser_backend: BackendKind,
    pub performance_score: Option<f64>,
    pub first_contentful_paint: Option<f64>,
    pub largest_contentful_paint: Option<f64>,
    pub total_blocking_time: Option<f64>,
    pub cumulative_layout_shift: Option<f64>,
    pub speed_index: Option<f64>,
    /// `None` means genuinely unavailable and is stored as the sentinel.
    pub interaction_to_next_paint: Option<f64>,
    pub report_ref: Option<String>,
}

impl SampleDraft {
    /// Validate the draft. Every required metric must be present and finite;
    /// only interaction-to-next-paint may be absent, in which case the
    /// sentinel value is stored.
    pub fn into_sample(self) -> Result<MetricSample, StoreError> {
        Ok(MetricSample {
            host: self.host,
            pathname: self.pathname,
            timestamp: self.timestamp,
            cache_state: self.cache_state,
            browser_backend: self.browser_backend,
            performance_score: required(self.performance_score, "performance_score")?,
            first_contentful_paint: required(
                self.first_contentful_paint,
                "first_contentful_paint",
            )?,
            largest_contentful_paint: required(
                self.largest_contentful_paint,
                "largest_contentful_paint",
            )?,
            total_blocking_time: required(self.total_blocking_time, "total_blocking_time")?,
            cumulative_layout_shift: required(
                self.cumulative_layout_shift,
                "cumulative_layout_shift",
            )?,
            speed_index: required(self.speed_index, "speed_index")?,
            interaction_to_next_paint: match self.interaction_to_next_paint {
                Some(v) if v.is_finite() => v,
                _ => INP_UNAVAILABLE,
            },
            report_ref: self.report_ref,
        })
    }
}

fn required(value: Option<f64>, field: &'static str) -> Result<f64, StoreError> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(StoreError::IncompleteSample(field)),
    }
}

#[derive(Debug, FromRow)]
struct DbSample {
    host: String,
    pathname: String,
    timestamp: DateTime<Utc>,
    is_cached: bool,
    browser_backend: String,
    performance_score: f64,
    first_contentful_paint: f64,
    largest_contentful_paint: f64,
    total_blocking_time: f64,
    cumulative_layout_shift: f64,
    speed_index: f64,
    interaction_to_next_paint: f64,
    report_ref: Option<String>,
}

impl DbSample {
    fn into_sample(self) -> Result<MetricSample, StoreError> {
        let browser_backend = self
            .browser_backend
            .parse::<BackendKind>()
            .map_err(StoreError::MalformedRow)?;
        Ok(MetricSample {
            host: self.host,
            pathname: self.pathname,
            timestamp: self.timestamp,
            cache_state: if self.is_cached {
                CacheState::Cached
            } else {
                CacheState::Uncached
            },
            browser_backend,
            performance_score: self.performance_score,
            first_contentful_paint: self.first_contentful_paint,
            largest_contentful_paint: self.largest_contentful_paint,
            total_blocking_time: self.total_blocking_time,
            cumulative_layout_shift: self.cumulative_layout_shift,
            speed_index: self.speed_index,
            interaction_to_next_paint: self.interaction_to_next_paint,
            report_ref: self.report_ref,
        })
    }
}

const SAMPLE_COLUMNS: &str = "host, pathname, timestamp, is_cached, browser_backend, \
     performance_score, first_contentful_paint, largest_contentful_paint, \
     total_blocking_time, cumulative_layout_shift, speed_index, \
     interaction_to_next_paint, report_ref";

impl MetricStore {
    /// Validate and persist one completed audit. Returns the recorded sample.
    /// Rows are append-only; nothing here updates or deletes.
    pub async fn record_sample(&self, draft: SampleDraft) -> Result<MetricSample, StoreError> {
        let sample = draft.into_sample()?;
        self.append_sample(&sample).await?;
        Ok(sample)
    }

    /// Persist an already-validated sample.
    pub async fn append_sample(&self, sample: &MetricSample) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO samples (
                host, pathname, timestamp, is_cached, browser_backend,
                performance_score, first_contentful_paint, largest_contentful_paint,
                total_blocking_time, cumulative_layout_shift, speed_index,
                interaction_to_next_paint, report_ref
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sample.host)
        .bind(&sample.pathname)
        .bind(sample.timestamp)
        .bind(sample.cache_state == CacheState::Cached)
        .bind(sample.browser_backend.as_str())
        .bind(sample.performance_score)
        .bind(sample.first_contentful_paint)
        .bind(sample.largest_contentful_paint)
        .bind(sample.total_blocking_time)
        .bind(sample.cumulative_layout_shift)
        .bind(sample.speed_index)
        .bind(sample.interaction_to_next_paint)
        .bind(sample.report_ref.as_deref())
        .execute(&self.pool)
        .await?;

        debug!(
            host = %sample.host,
            pathname = %sample.pathname,
            cache_state = %sample.cache_state,
            score = sample.performance_score,
            "Recorded sample"
        );
        Ok(())
    }

    /// The one row selection all derived views share: samples within the
    /// filter's timespan matching its non-wildcard fields, capped to the most
    /// recent [`SERIES_ROW_CAP`] rows, returned ascending by timestamp.
    pub(crate) async fn fetch_capped_series(
        &self,
        filter: &SeriesFilter,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let cutoff = Utc::now() - Duration::hours(i64::from(filter.timespan_hours()));

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {SAMPLE_COLUMNS} FROM samples WHERE timestamp >= "
        ));
        qb.push_bind(cutoff);
        if let Some(host) = &filter.host {
            qb.push(" AND host = ");
            qb.push_bind(host);
        }
        if let Some(pathname) = &filter.pathname {
            qb.push(" AND pathname = ");
            qb.push_bind(pathname);
        }
        if let Some(cache_state) = filter.cache_state {
            qb.push(" AND is_cached = ");
            qb.push_bind(cache_state == CacheState::Cached);
        }
        qb.push(" ORDER BY timestamp DESC LIMIT ");
        qb.push_bind(SERIES_ROW_CAP);

        let rows: Vec<DbSample> = qb.build_query_as().fetch_all(&self.pool).await?;

        // Newest-first capped the set; flip to time-ascending for the views.
        let mut samples = rows
            .into_iter()
            .map(DbSample::into_sample)
            .collect::<Result<Vec<_>, _>>()?;
        samples.reverse();
        Ok(samples)
    }
}

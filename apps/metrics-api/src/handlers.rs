//! HTTP handlers for the metrics API

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use metrics_store::aggregate::DEFAULT_WINDOW_HOURS;
use metrics_store::MetricStore;
use vitals_types::{AggregatedPoint, MetricSample, SeriesFilter, SummaryStats};

use crate::error::ApiError;

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Common query parameters across the series endpoints. Omitted parameters
/// are wildcards; `cache` accepts `cached` or `uncached`.
#[derive(Debug, Default, Deserialize)]
pub struct SeriesQuery {
    pub host: Option<String>,
    pub pathname: Option<String>,
    pub cache: Option<String>,
    /// Lookback in hours (default 24)
    pub timespan_hours: Option<u32>,
    /// Rolling-average window in hours (default 4), only used by /api/rolling
    pub window_hours: Option<u32>,
}

impl SeriesQuery {
    fn filter(&self) -> Result<SeriesFilter, ApiError> {
        let cache_state = self
            .cache
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(ApiError::InvalidRequest)?;

        if let Some(0) = self.timespan_hours {
            return Err(ApiError::InvalidRequest(
                "timespan_hours must be at least 1".to_string(),
            ));
        }

        Ok(SeriesFilter {
            host: self.host.clone(),
            pathname: self.pathname.clone(),
            cache_state,
            timespan_hours: self.timespan_hours,
        })
    }

    fn window_hours(&self) -> Result<u32, ApiError> {
        match self.window_hours {
            Some(0) => Err(ApiError::InvalidRequest(
                "window_hours must be at least 1".to_string(),
            )),
            Some(hours) => Ok(hours),
            None => Ok(DEFAULT_WINDOW_HOURS),
        }
    }
}

/// Raw samples, ascending by timestamp
pub async fn raw_series(
    State(store): State<MetricStore>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<Vec<MetricSample>>, ApiError> {
    let samples = store.fetch_raw_series(&query.filter()?).await?;
    Ok(Json(samples))
}

/// Rolling-average series over the same capped sample set
pub async fn rolling_series(
    State(store): State<MetricStore>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<Vec<AggregatedPoint>>, ApiError> {
    let filter = query.filter()?;
    let window = query.window_hours()?;
    let points = store.fetch_rolling_average(&filter, window).await?;
    Ok(Json(points))
}

/// Mean and population standard deviation per metric; `null` when the filter
/// matches no samples
pub async fn summary_stats(
    State(store): State<MetricStore>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<Option<SummaryStats>>, ApiError> {
    let stats = store.fetch_summary_stats(&query.filter()?).await?;
    Ok(Json(stats))
}

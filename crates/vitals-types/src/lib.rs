//! Shared data model for the audit collector and aggregation engine.

pub mod types;

pub use types::{
    AggregatedPoint, BackendKind, CacheState, Host, MeasurementTarget, MetricSample,
    MetricStats, SeriesFilter, SummaryStats, INP_UNAVAILABLE, SERIES_ROW_CAP,
};

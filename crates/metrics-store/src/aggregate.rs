//! The aggregation engine: raw, rolling-average, and summary-statistic views.
//!
//! All three views are computed over the same filtered, time-ordered, capped
//! row set and nothing is cached between calls; every call recomputes from
//! current store contents. The rolling window is sized as a fraction of the
//! sampled population, not as a wall-clock span: for window `W` hours against
//! the 24-hour reference span, the per-row window radius in ranks is
//! `floor(N * (W / 24) / 2)`. The original system expressed this as a
//! windowed SQL self-join; here it is an explicit rank-window pass, formula
//! preserved exactly.

use chrono::{DateTime, Utc};
use vitals_types::{
    AggregatedPoint, MetricSample, MetricStats, SeriesFilter, SummaryStats,
};

use crate::{MetricStore, StoreError};

/// Reference span the window fraction is taken against, in hours.
const REFERENCE_SPAN_HOURS: f64 = 24.0;

/// Default smoothing window, in hours.
pub const DEFAULT_WINDOW_HOURS: u32 = 4;

impl MetricStore {
    /// The capped, filtered, time-ascending samples themselves.
    pub async fn fetch_raw_series(
        &self,
        filter: &SeriesFilter,
    ) -> Result<Vec<MetricSample>, StoreError> {
        self.fetch_capped_series(filter).await
    }

    /// Rolling-average series over the same capped set as the raw series.
    pub async fn fetch_rolling_average(
        &self,
        filter: &SeriesFilter,
        window_hours: u32,
    ) -> Result<Vec<AggregatedPoint>, StoreError> {
        let samples = self.fetch_capped_series(filter).await?;
        Ok(rolling_average(&samples, window_hours))
    }

    /// Per-metric population statistics over the same capped set. `None` for
    /// an empty selection.
    pub async fn fetch_summary_stats(
        &self,
        filter: &SeriesFilter,
    ) -> Result<Option<SummaryStats>, StoreError> {
        let samples = self.fetch_capped_series(filter).await?;
        Ok(summary_stats(&samples))
    }
}

fn metric_values(sample: &MetricSample) -> [f64; 7] {
    [
        sample.performance_score,
        sample.first_contentful_paint,
        sample.largest_contentful_paint,
        sample.total_blocking_time,
        sample.cumulative_layout_shift,
        sample.speed_index,
        sample.interaction_to_next_paint,
    ]
}

fn point_from(timestamp: DateTime<Utc>, values: [f64; 7]) -> AggregatedPoint {
    AggregatedPoint {
        timestamp,
        performance_score: values[0],
        first_contentful_paint: values[1],
        largest_contentful_paint: values[2],
        total_blocking_time: values[3],
        cumulative_layout_shift: values[4],
        speed_index: values[5],
        interaction_to_next_paint: values[6],
    }
}

/// Compute the rolling-average series over time-ascending `samples`.
///
/// Each row gets a rank 1..N; its value per metric is the mean over all rows
/// whose rank lies within the window radius, clipped at the sequence edges.
/// Rows sharing a timestamp collapse to a single averaged output row.
///
/// Sentinel-valued interaction-to-next-paint rows are averaged as-is here,
/// matching the original series' behavior; only the summary statistics
/// exclude the sentinel.
pub fn rolling_average(samples: &[MetricSample], window_hours: u32) -> Vec<AggregatedPoint> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }

    let radius = window_radius(n, window_hours);

    let mut points: Vec<AggregatedPoint> = Vec::with_capacity(n);
    for (i, sample) in samples.iter().enumerate() {
        let lo = i.saturating_sub(radius);
        let hi = (i + radius).min(n - 1);
        let count = (hi - lo + 1) as f64;

        let mut sums = [0.0f64; 7];
        for neighbor in &samples[lo..=hi] {
            let values = metric_values(neighbor);
            for (sum, value) in sums.iter_mut().zip(values) {
                *sum += value;
            }
        }
        for sum in &mut sums {
            *sum /= count;
        }
        points.push(point_from(sample.timestamp, sums));
    }

    collapse_duplicate_timestamps(points)
}

/// Window radius in ranks: `floor(N * (W / 24) / 2)`.
fn window_radius(n: usize, window_hours: u32) -> usize {
    (n as f64 * (f64::from(window_hours) / REFERENCE_SPAN_HOURS) / 2.0).floor() as usize
}

fn point_values(point: &AggregatedPoint) -> [f64; 7] {
    [
        point.performance_score,
        point.first_contentful_paint,
        point.largest_contentful_paint,
        point.total_blocking_time,
        point.cumulative_layout_shift,
        point.speed_index,
        point.interaction_to_next_paint,
    ]
}

/// Rows are time-ascending, so duplicates are adjacent; average each run of
/// equal timestamps into one output row.
fn collapse_duplicate_timestamps(points: Vec<AggregatedPoint>) -> Vec<AggregatedPoint> {
    let mut collapsed: Vec<AggregatedPoint> = Vec::with_capacity(points.len());
    let mut start = 0;

    while start < points.len() {
        let timestamp = points[start].timestamp;
        let mut end = start;
        while end < points.len() && points[end].timestamp == timestamp {
            end += 1;
        }

        let count = (end - start) as f64;
        let mut sums = [0.0f64; 7];
        for point in &points[start..end] {
            for (sum, value) in sums.iter_mut().zip(point_values(point)) {
                *sum += value;
            }
        }
        for sum in &mut sums {
            *sum /= count;
        }
        collapsed.push(point_from(timestamp, sums));
        start = end;
    }

    collapsed
}

/// Population mean and standard deviation per metric, computed as
/// `sqrt(E[x^2] - E[x]^2)` with no Bessel correction. Sentinel-valued rows
/// are excluded from the interaction-to-next-paint statistic specifically.
pub fn summary_stats(samples: &[MetricSample]) -> Option<SummaryStats> {
    if samples.is_empty() {
        return None;
    }

    let mut accums = [Accum::default(); 6];
    let mut inp = Accum::default();

    for sample in samples {
        let values = metric_values(sample);
        for (accum, value) in accums.iter_mut().zip(values) {
            accum.push(value);
        }
        if sample.has_inp() {
            inp.push(sample.interaction_to_next_paint);
        }
    }

    Some(SummaryStats {
        performance_score: accums[0].stats(),
        first_contentful_paint: accums[1].stats(),
        largest_contentful_paint: accums[2].stats(),
        total_blocking_time: accums[3].stats(),
        cumulative_layout_shift: accums[4].stats(),
        speed_index: accums[5].stats(),
        interaction_to_next_paint: (inp.count > 0.0).then(|| inp.stats()),
        sample_count: samples.len(),
    })
}

#[derive(Debug, Default, Clone, Copy)]
struct Accum {
    sum: f64,
    sum_sq: f64,
    count: f64,
}

impl Accum {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.sum_sq += value * value;
        self.count += 1.0;
    }

    fn stats(&self) -> MetricStats {
        let mean = self.sum / self.count;
        // Guard against tiny negative variance from float rounding.
        let variance = (self.sum_sq / self.count - mean * mean).max(0.0);
        MetricStats {
            mean,
            std_dev: variance.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use vitals_types::{BackendKind, CacheState, INP_UNAVAILABLE};

    fn sample_at(timestamp: DateTime<Utc>, score: f64) -> MetricSample {
        MetricSample {
            host: "www.example.com".to_string(),
            pathname: "/".to_string(),
            timestamp,
            cache_state: CacheState::Uncached,
            browser_backend: BackendKind::HeadlessChrome,
            performance_score: score,
            first_contentful_paint: score / 10.0,
            largest_contentful_paint: score / 5.0,
            total_blocking_time: score * 2.0,
            cumulative_layout_shift: 0.01,
            speed_index: score / 8.0,
            interaction_to_next_paint: INP_UNAVAILABLE,
            report_ref: None,
        }
    }

    fn hourly_samples(count: usize) -> Vec<MetricSample> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| sample_at(start + Duration::hours(i as i64), i as f64))
            .collect()
    }

    #[test]
    fn window_radius_matches_row_fraction_formula() {
        // 24 rows, 4-hour window: floor(24 * (4/24) / 2) = 2.
        assert_eq!(window_radius(24, 4), 2);
        assert_eq!(window_radius(24, 24), 12);
        assert_eq!(window_radius(5, 4), 0);
        assert_eq!(window_radius(0, 4), 0);
    }

    #[test]
    fn rolling_average_uses_five_row_interior_windows() {
        // 24 rows one per hour, default window: radius 2, so interior points
        // average themselves plus 2 neighbors each side.
        let samples = hourly_samples(24);
        let points = rolling_average(&samples, 4);
        assert_eq!(points.len(), 24);

        // Interior rank r=10 (0-based) averages scores 8..=12.
        assert!((points[10].performance_score - 10.0).abs() < 1e-9);

        // Edge points use clipped windows: rank 0 averages scores 0..=2.
        assert!((points[0].performance_score - 1.0).abs() < 1e-9);
        // Rank 1 averages scores 0..=3.
        assert!((points[1].performance_score - 1.5).abs() < 1e-9);
        // Last rank averages scores 21..=23.
        assert!((points[23].performance_score - 22.0).abs() < 1e-9);
    }

    #[test]
    fn rolling_average_collapses_duplicate_timestamps() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut samples = vec![sample_at(ts, 10.0), sample_at(ts, 30.0)];
        samples.push(sample_at(ts + Duration::hours(1), 50.0));

        let points = rolling_average(&samples, 4);
        // Two distinct timestamps remain.
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, ts);
    }

    #[test]
    fn rolling_average_keeps_inp_sentinel_rows() {
        // Historical behavior: the smoothed series averages the raw column,
        // sentinel included.
        let samples = hourly_samples(3);
        let points = rolling_average(&samples, 24);
        assert!(points
            .iter()
            .all(|p| (p.interaction_to_next_paint - INP_UNAVAILABLE).abs() < 1e-9));
    }

    #[test]
    fn rolling_average_of_empty_set_is_empty() {
        assert!(rolling_average(&[], 4).is_empty());
    }

    #[test]
    fn population_std_dev_divides_by_n() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let samples: Vec<_> = [10.0, 20.0, 30.0]
            .iter()
            .enumerate()
            .map(|(i, &score)| sample_at(start + Duration::hours(i as i64), score))
            .collect();

        let stats = summary_stats(&samples).unwrap();
        assert!((stats.performance_score.mean - 20.0).abs() < 1e-9);
        // sqrt(466.667 - 400) ~= 8.165, not the N-1-corrected 10.0.
        assert!((stats.performance_score.std_dev - 8.16496580927726).abs() < 1e-9);
    }

    #[test]
    fn summary_stats_empty_set_is_none() {
        assert!(summary_stats(&[]).is_none());
    }

    #[test]
    fn summary_stats_excludes_inp_sentinel() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut samples = hourly_samples(2); // both sentinel INP
        let mut with_inp = sample_at(start + Duration::hours(3), 40.0);
        with_inp.interaction_to_next_paint = 120.0;
        samples.push(with_inp);

        let stats = summary_stats(&samples).unwrap();
        let inp = stats.interaction_to_next_paint.unwrap();
        assert!((inp.mean - 120.0).abs() < 1e-9);
        assert!(inp.std_dev.abs() < 1e-9);
    }

    #[test]
    fn summary_stats_all_sentinel_inp_is_none_for_inp_only() {
        let samples = hourly_samples(4);
        let stats = summary_stats(&samples).unwrap();
        assert!(stats.interaction_to_next_paint.is_none());
        assert_eq!(stats.sample_count, 4);
    }

    #[test]
    fn summary_stats_is_idempotent() {
        let samples = hourly_samples(12);
        let a = summary_stats(&samples);
        let b = summary_stats(&samples);
        assert_eq!(a, b);
    }
}

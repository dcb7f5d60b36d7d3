//! Composite performance score
//!
//! Scores each vital against its published good/poor thresholds with a linear
//! ramp in between, then blends the per-metric scores with fixed weights into
//! a 0-100 composite. Speed index is approximated as the midpoint of FCP and
//! LCP since no filmstrip capture is available.

use crate::vitals::ObservedVitals;

/// Good/poor cutoffs for one metric. At or below `good` scores 1.0, at or
/// above `poor` scores 0.0, linear in between.
#[derive(Debug, Clone, Copy)]
struct Curve {
    good: f64,
    poor: f64,
}

const FCP_CURVE: Curve = Curve { good: 1_800.0, poor: 3_000.0 };
const SI_CURVE: Curve = Curve { good: 3_400.0, poor: 5_800.0 };
const LCP_CURVE: Curve = Curve { good: 2_500.0, poor: 4_000.0 };
const TBT_CURVE: Curve = Curve { good: 200.0, poor: 600.0 };
const CLS_CURVE: Curve = Curve { good: 0.1, poor: 0.25 };

const FCP_WEIGHT: f64 = 0.10;
const SI_WEIGHT: f64 = 0.10;
const LCP_WEIGHT: f64 = 0.25;
const TBT_WEIGHT: f64 = 0.30;
const CLS_WEIGHT: f64 = 0.25;

/// The derived per-attempt metrics that feed a recorded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredVitals {
    /// Composite score, 0-100
    pub performance_score: f64,
    pub first_contentful_paint_ms: f64,
    pub largest_contentful_paint_ms: f64,
    /// Approximated as the FCP/LCP midpoint
    pub speed_index_ms: f64,
    pub total_blocking_time_ms: f64,
    pub cumulative_layout_shift: f64,
    /// `None` when the page saw no qualifying interaction
    pub interaction_to_next_paint_ms: Option<f64>,
}

/// Derive the composite score and per-metric values from observed vitals.
///
/// Returns `None` when FCP or LCP is missing: without paint timings the page
/// load cannot be scored. Absent CLS and TBT observations count as zero, since
/// a page with no layout shifts and no long tasks genuinely scores perfectly
/// on those metrics.
pub fn score_vitals(observed: &ObservedVitals) -> Option<ScoredVitals> {
    let fcp = observed.fcp_ms?;
    let lcp = observed.lcp_ms?;
    let cls = observed.cls.unwrap_or(0.0);
    let tbt = observed.tbt_ms.unwrap_or(0.0);
    let speed_index = (fcp + lcp) / 2.0;

    let weighted = FCP_WEIGHT * metric_score(fcp, FCP_CURVE)
        + SI_WEIGHT * metric_score(speed_index, SI_CURVE)
        + LCP_WEIGHT * metric_score(lcp, LCP_CURVE)
        + TBT_WEIGHT * metric_score(tbt, TBT_CURVE)
        + CLS_WEIGHT * metric_score(cls, CLS_CURVE);

    Some(ScoredVitals {
        performance_score: weighted * 100.0,
        first_contentful_paint_ms: fcp,
        largest_contentful_paint_ms: lcp,
        speed_index_ms: speed_index,
        total_blocking_time_ms: tbt,
        cumulative_layout_shift: cls,
        interaction_to_next_paint_ms: observed.inp_ms,
    })
}

fn metric_score(value: f64, curve: Curve) -> f64 {
    if value <= curve.good {
        1.0
    } else if value >= curve.poor {
        0.0
    } else {
        (curve.poor - value) / (curve.poor - curve.good)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vitals(fcp: f64, lcp: f64, cls: f64, tbt: f64) -> ObservedVitals {
        ObservedVitals {
            fcp_ms: Some(fcp),
            lcp_ms: Some(lcp),
            cls: Some(cls),
            tbt_ms: Some(tbt),
            inp_ms: None,
        }
    }

    #[test]
    fn test_all_good_scores_100() {
        let scored = score_vitals(&vitals(900.0, 1_500.0, 0.01, 50.0)).unwrap();
        assert!((scored.performance_score - 100.0).abs() < 1e-9);
        assert_eq!(scored.speed_index_ms, 1_200.0);
    }

    #[test]
    fn test_all_poor_scores_0() {
        let scored = score_vitals(&vitals(5_000.0, 9_000.0, 0.5, 2_000.0)).unwrap();
        assert!(scored.performance_score.abs() < 1e-9);
    }

    #[test]
    fn test_linear_ramp_between_thresholds() {
        // TBT 400ms is exactly halfway between good (200) and poor (600)
        assert!((metric_score(400.0, TBT_CURVE) - 0.5).abs() < 1e-9);
        // LCP 3250ms is halfway between 2500 and 4000
        assert!((metric_score(3_250.0, LCP_CURVE) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_fcp_means_no_score() {
        let observed = ObservedVitals {
            fcp_ms: None,
            lcp_ms: Some(2_000.0),
            ..ObservedVitals::default()
        };
        assert!(score_vitals(&observed).is_none());
    }

    #[test]
    fn test_missing_cls_and_tbt_count_as_zero() {
        let observed = ObservedVitals {
            fcp_ms: Some(1_000.0),
            lcp_ms: Some(1_800.0),
            ..ObservedVitals::default()
        };
        let scored = score_vitals(&observed).unwrap();
        assert_eq!(scored.cumulative_layout_shift, 0.0);
        assert_eq!(scored.total_blocking_time_ms, 0.0);
        assert!((scored.performance_score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total = FCP_WEIGHT + SI_WEIGHT + LCP_WEIGHT + TBT_WEIGHT + CLS_WEIGHT;
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_inp_is_passed_through() {
        let mut observed = vitals(1_000.0, 1_800.0, 0.0, 0.0);
        observed.inp_ms = Some(180.0);
        let scored = score_vitals(&observed).unwrap();
        assert_eq!(scored.interaction_to_next_paint_ms, Some(180.0));
    }
}

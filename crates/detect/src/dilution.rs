//! Classify an ordered list of concentrations as a dilution scheme.
//!
//! Pure and deterministic: the same series always yields the same pattern.

use crate::config::DilutionConfig;
use crate::model::{ConcentrationRange, DilutionPattern, DilutionType};

const SQRT_10: f64 = 3.162_277_660_168_379_5;

/// Canonical factors in tie-break order.
const CANONICAL: [(f64, DilutionType); 5] = [
    (2.0, DilutionType::Serial),
    (3.0, DilutionType::Serial),
    (5.0, DilutionType::Serial),
    (10.0, DilutionType::LogScale),
    (SQRT_10, DilutionType::HalfLog),
];

/// Normalized nanomolar concentrations and the line indices they were read from.
///
/// Only positive finite values are kept; everything else is dropped on construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConcentrationSeries {
    pub values: Vec<f64>,
    pub indices: Vec<usize>,
}

impl ConcentrationSeries {
    pub fn new(points: impl IntoIterator<Item = (usize, f64)>) -> Self {
        let (indices, values) = points
            .into_iter()
            .filter(|(_, v)| v.is_finite() && *v > 0.0)
            .unzip();
        Self { values, indices }
    }

    pub fn from_values(values: &[f64]) -> Self {
        Self::new(values.iter().copied().enumerate())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Classify a series.
pub fn analyze_series(series: &ConcentrationSeries, config: &DilutionConfig) -> DilutionPattern {
    let n = series.len();
    let mut sorted = series.values.clone();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let range = concentration_range(&sorted);

    if n < 3 {
        let detected_ratio = if n == 2 { sorted[0] / sorted[1] } else { 0.0 };
        return DilutionPattern {
            kind: DilutionType::Unknown,
            factor: None,
            confidence: 0.0,
            detected_ratio,
            range,
            consistency: 0.0,
            missing_points: Vec::new(),
            irregularities: vec![format!(
                "insufficient data points: {n} valid concentration(s), need at least 3"
            )],
        };
    }

    let ratios: Vec<f64> = sorted.windows(2).map(|w| w[0] / w[1]).collect();
    let (mean, sd) = mean_sd(&ratios);
    let cv = if mean > 0.0 { sd / mean } else { f64::INFINITY };
    let consistency = (1.0 - cv).max(0.0);
    let mut irregularities = Vec::new();

    let (kind, factor, confidence) = if mean <= config.min_dilution_ratio {
        irregularities.push("no dilution: concentrations are (nearly) constant".to_string());
        (DilutionType::Irregular, None, config.irregular_confidence)
    } else if let Some((f, kind, deviation)) = canonical_match(mean, cv, config) {
        (kind, Some(f), 1.0 - deviation / config.canonical_tolerance)
    } else if let Some(confidence) = log_spacing(&ratios, range.order_of_magnitude, consistency, config) {
        (DilutionType::LogScale, Some(10.0), confidence)
    } else if cv < config.custom_max_cv {
        (DilutionType::Custom, Some(mean), 1.0 - cv / config.custom_max_cv)
    } else {
        (DilutionType::Irregular, None, config.irregular_confidence)
    };

    if cv > config.high_variation_cv {
        irregularities.push(format!("high ratio variation (CV {cv:.2})"));
    }
    if let Some(msg) = direction_irregularity(&series.values) {
        irregularities.push(msg);
    }

    let missing_points = match kind {
        DilutionType::Serial | DilutionType::LogScale => {
            missing_points(&sorted, median(&ratios), config.missing_point_tolerance)
        }
        _ => Vec::new(),
    };
    if !missing_points.is_empty() {
        irregularities.push(format!(
            "{} expected dilution point(s) missing",
            missing_points.len()
        ));
    }

    DilutionPattern {
        kind,
        factor,
        confidence: confidence.clamp(0.0, 1.0),
        detected_ratio: mean,
        range,
        consistency,
        missing_points,
        irregularities,
    }
}

fn concentration_range(sorted_desc: &[f64]) -> ConcentrationRange {
    match (sorted_desc.first(), sorted_desc.last()) {
        (Some(&max), Some(&min)) => ConcentrationRange {
            min,
            max,
            order_of_magnitude: (max / min).log10(),
        },
        _ => ConcentrationRange {
            min: 0.0,
            max: 0.0,
            order_of_magnitude: 0.0,
        },
    }
}

fn mean_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Closest canonical factor within tolerance; earlier factors win exact ties.
fn canonical_match(mean: f64, cv: f64, config: &DilutionConfig) -> Option<(f64, DilutionType, f64)> {
    if cv >= config.canonical_max_cv {
        return None;
    }
    let mut best: Option<(f64, DilutionType, f64)> = None;
    for (factor, kind) in CANONICAL {
        let deviation = (mean - factor).abs() / factor;
        if deviation > config.canonical_tolerance {
            continue;
        }
        if best.map_or(true, |(_, _, d)| deviation < d) {
            best = Some((factor, kind, deviation));
        }
    }
    best
}

/// Confidence that ratios are evenly spaced decades, if the range is wide enough to tell.
fn log_spacing(ratios: &[f64], orders: f64, consistency: f64, config: &DilutionConfig) -> Option<f64> {
    if orders < config.log_spacing_min_orders {
        return None;
    }
    let mean_log = ratios.iter().map(|r| r.log10()).sum::<f64>() / ratios.len() as f64;
    let distance = (mean_log - 1.0).abs();
    if distance > config.log_spacing_tolerance {
        return None;
    }
    Some((1.0 - distance / config.log_spacing_tolerance) * consistency)
}

/// Steps that go against the dominant direction of the series as given.
fn direction_irregularity(values: &[f64]) -> Option<String> {
    let (mut up, mut down) = (0usize, 0usize);
    for w in values.windows(2) {
        if w[1] > w[0] {
            up += 1;
        } else if w[1] < w[0] {
            down += 1;
        }
    }
    if up == 0 || down == 0 {
        return None;
    }
    if down >= up {
        Some(format!(
            "concentration increases instead of decreases at {up} step(s)"
        ))
    } else {
        Some(format!(
            "concentration decreases instead of increases at {down} step(s)"
        ))
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.get(sorted.len() / 2).copied().unwrap_or(0.0)
}

/// Positions of the geometric walk from max down to min, stepping by the
/// observed `step`, that have no value within `tolerance`. The walk re-anchors
/// on every observed value so an off-nominal step does not drift into gaps.
fn missing_points(sorted_desc: &[f64], step: f64, tolerance: f64) -> Vec<usize> {
    let (Some(&max), Some(&min)) = (sorted_desc.first(), sorted_desc.last()) else {
        return Vec::new();
    };
    if step <= 1.0 {
        return Vec::new();
    }
    let floor = min * (1.0 - tolerance);
    let mut missing = Vec::new();
    let mut current = max;
    for position in 1..64 {
        let expected = current / step;
        if expected < floor {
            break;
        }
        match sorted_desc
            .iter()
            .find(|v| (*v - expected).abs() / expected <= tolerance)
        {
            Some(&observed) => current = observed,
            None => {
                missing.push(position);
                current = expected;
            }
        }
    }
    missing
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(values: &[f64]) -> DilutionPattern {
        analyze_series(&ConcentrationSeries::from_values(values), &DilutionConfig::default())
    }

    #[test]
    fn threefold_serial() {
        let p = analyze(&[1000.0, 333.33, 111.11, 37.04, 12.35]);
        assert_eq!(p.kind, DilutionType::Serial);
        assert!((p.factor.unwrap() - 3.0).abs() <= 0.1);
        assert!(p.confidence > 0.8, "confidence {}", p.confidence);
        assert!(p.missing_points.is_empty());
    }

    #[test]
    fn tenfold_log_scale() {
        let p = analyze(&[10000.0, 1000.0, 100.0, 10.0, 1.0]);
        assert_eq!(p.kind, DilutionType::LogScale);
        assert_eq!(p.factor, Some(10.0));
        assert!(p.confidence > 0.9);
        assert!((p.range.order_of_magnitude - 4.0).abs() < 1e-9);
        assert_eq!(p.consistency, 1.0);
        assert!(p.irregularities.is_empty());
    }

    #[test]
    fn half_log() {
        let p = analyze(&[100.0, 31.62, 10.0, 3.162, 1.0]);
        assert_eq!(p.kind, DilutionType::HalfLog);
        assert!((p.factor.unwrap() - 3.162).abs() < 0.01);
        assert!(p.confidence > 0.9);
    }

    #[test]
    fn ascending_input_is_sorted_first() {
        let p = analyze(&[1.0, 10.0, 100.0, 1000.0]);
        assert_eq!(p.kind, DilutionType::LogScale);
        assert!(p.irregularities.is_empty());
    }

    #[test]
    fn irregular_series() {
        let p = analyze(&[1000.0, 500.0, 300.0, 50.0, 5.0]);
        assert_eq!(p.kind, DilutionType::Irregular);
        assert!(p.confidence < 0.5);
        assert!(!p.irregularities.is_empty());
        assert!(p.irregularities.iter().any(|i| i.contains("high ratio variation")));
    }

    #[test]
    fn two_points_are_unknown() {
        let p = analyze(&[100.0, 10.0]);
        assert_eq!(p.kind, DilutionType::Unknown);
        assert_eq!(p.confidence, 0.0);
        assert_eq!(p.detected_ratio, 10.0);
        assert!(p.irregularities[0].contains("insufficient"));
    }

    #[test]
    fn empty_and_single_are_unknown() {
        for values in [&[][..], &[5.0][..]] {
            let p = analyze(values);
            assert_eq!(p.kind, DilutionType::Unknown);
            assert_eq!(p.confidence, 0.0);
        }
    }

    #[test]
    fn invalid_values_are_dropped_not_coerced() {
        let series = ConcentrationSeries::new(vec![
            (0, 100.0),
            (1, f64::NAN),
            (2, 10.0),
            (3, -5.0),
            (4, 1.0),
            (5, 0.0),
            (6, 0.1),
        ]);
        assert_eq!(series.values, vec![100.0, 10.0, 1.0, 0.1]);
        assert_eq!(series.indices, vec![0, 2, 4, 6]);
        let p = analyze_series(&series, &DilutionConfig::default());
        assert_eq!(p.kind, DilutionType::LogScale);
    }

    #[test]
    fn fourfold_is_custom() {
        let p = analyze(&[256.0, 64.0, 16.0, 4.0]);
        assert_eq!(p.kind, DilutionType::Custom);
        assert_eq!(p.factor, Some(4.0));
        assert!((p.confidence - 1.0).abs() < 1e-12);
    }

    #[test]
    fn uneven_decades_fall_back_to_log_spacing() {
        let p = analyze(&[10000.0, 2000.0, 100.0, 10.0]);
        assert_eq!(p.kind, DilutionType::LogScale);
        assert!(p.confidence < 0.9);
    }

    #[test]
    fn constant_series_is_irregular() {
        let p = analyze(&[5.0, 5.0, 5.0, 5.0]);
        assert_eq!(p.kind, DilutionType::Irregular);
        assert!(p.irregularities[0].contains("constant"));
    }

    #[test]
    fn detects_missing_point() {
        let p = analyze(&[
            1000.0, 500.0, 250.0, 125.0, 62.5, 31.25, 15.625, 7.8125, 1.953125,
        ]);
        assert_eq!(p.kind, DilutionType::Serial);
        assert_eq!(p.factor, Some(2.0));
        assert_eq!(p.missing_points, vec![8]);
        assert!(p.irregularities.iter().any(|i| i.contains("missing")));
    }

    #[test]
    fn off_nominal_factor_has_no_gaps() {
        let values: Vec<f64> = (0..8).map(|i| 1000.0 / 2.25f64.powi(i)).collect();
        let p = analyze(&values);
        assert_eq!(p.kind, DilutionType::Serial);
        assert_eq!(p.factor, Some(2.0));
        assert!(p.missing_points.is_empty(), "missing {:?}", p.missing_points);
        assert!(!p.irregularities.iter().any(|i| i.contains("missing")));
    }

    #[test]
    fn gap_found_by_walking_the_observed_step() {
        let mut values: Vec<f64> = (0..8).map(|i| 1000.0 / 2.25f64.powi(i)).collect();
        values.remove(3);
        assert_eq!(missing_points(&values, 2.25, 0.15), vec![3]);
        assert!(missing_points(&values, 1.0, 0.15).is_empty());
    }

    #[test]
    fn direction_reversal_is_reported() {
        let p = analyze(&[1000.0, 100.0, 300.0, 10.0, 1.0]);
        assert!(p
            .irregularities
            .iter()
            .any(|i| i.contains("increases instead of decreases")));
    }

    #[test]
    fn analysis_is_deterministic() {
        let values = [1000.0, 333.0, 120.0, 36.0, 13.0, 4.0];
        assert_eq!(analyze(&values), analyze(&values));
    }
}

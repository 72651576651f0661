//! Final quality checks applied to every candidate before ranking. Each check
//! appends an issue and scales the confidence by its penalty.

use crate::cell::Grid;
use crate::config::DetectConfig;
use crate::layout::candidate_concentrations;
use crate::model::{DatasetCandidate, DetectionIssue, DilutionType};

pub fn validate_candidate(
    grid: &Grid,
    mut candidate: DatasetCandidate,
    config: &DetectConfig,
) -> DatasetCandidate {
    let v = &config.validation;
    let mut factor = 1.0;
    let mut issues = Vec::new();

    let missing_concentration = candidate.concentration_axis.is_none();
    let missing_response = candidate.response_axes.is_empty();
    if missing_concentration || missing_response {
        let what = match (missing_concentration, missing_response) {
            (true, true) => "no concentration or response axis found",
            (true, false) => "no concentration axis found",
            _ => "no response axis found",
        };
        issues.push(
            DetectionIssue::error(what)
                .with_suggestion("check that the block holds a numeric dilution series and readouts"),
        );
        factor *= v.missing_axis_penalty;
    }

    let rows = candidate.concentration_count();
    if rows < v.min_data_rows {
        issues.push(DetectionIssue::warning(format!(
            "only {rows} data line(s), at least {} expected",
            v.min_data_rows
        )));
        factor *= v.few_rows_penalty;
    }

    if let Some(pattern) = &candidate.dilution_pattern {
        if pattern.confidence < v.low_pattern_confidence {
            issues.push(DetectionIssue::warning(format!(
                "dilution pattern confidence is low ({:.2})",
                pattern.confidence
            )));
            factor *= v.low_pattern_penalty;
        }
        if pattern.kind == DilutionType::Irregular {
            issues.push(
                DetectionIssue::warning("concentrations do not follow a regular dilution scheme")
                    .with_suggestion("verify the concentration column for typos or mixed units"),
            );
            factor *= v.irregular_penalty;
        }
        let orders = pattern.range.order_of_magnitude;
        if pattern.range.max > 0.0 && (orders < v.min_orders || orders > v.max_orders) {
            issues.push(DetectionIssue::info(format!(
                "concentration range spans {orders:.1} orders of magnitude, expected {}-{}",
                v.min_orders, v.max_orders
            )));
            factor *= v.range_penalty;
        }
        if !pattern.missing_points.is_empty() {
            issues.push(DetectionIssue::warning(format!(
                "{} point(s) of the dilution series are missing",
                pattern.missing_points.len()
            )));
            factor *= v.missing_values_penalty;
        }
    }

    let blanks = candidate_concentrations(grid, &candidate, &config.vocabulary)
        .iter()
        .filter(|(_, nm)| !nm.is_finite())
        .count();
    if blanks > 0 {
        issues.push(
            DetectionIssue::warning(format!(
                "{blanks} data line(s) have no readable concentration"
            ))
            .with_suggestion("those lines are skipped when extracting data points"),
        );
        factor *= v.missing_values_penalty;
    }

    candidate.confidence = (candidate.confidence * factor).clamp(0.0, 1.0);
    candidate.issues.extend(issues);
    candidate
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::RawValue;
    use crate::model::{
        BoundingBox, ConcentrationAxis, ConcentrationRange, DataSpan, DilutionPattern,
        Orientation, ScoreBreakdown, Severity,
    };

    fn pattern(kind: DilutionType, confidence: f64, min: f64, max: f64) -> DilutionPattern {
        DilutionPattern {
            kind,
            factor: None,
            confidence,
            detected_ratio: 10.0,
            range: ConcentrationRange {
                min,
                max,
                order_of_magnitude: (max / min).log10(),
            },
            consistency: 1.0,
            missing_points: Vec::new(),
            irregularities: Vec::new(),
        }
    }

    fn grid(concentrations: &[RawValue]) -> Grid {
        let mut rows = vec![vec![RawValue::from("Conc"), RawValue::from("Signal")]];
        for c in concentrations {
            rows.push(vec![c.clone(), RawValue::from(1.0)]);
        }
        Grid::from_rows(rows)
    }

    fn candidate(rows: usize, pattern: Option<DilutionPattern>) -> DatasetCandidate {
        DatasetCandidate {
            bounding_box: BoundingBox::new(0, 0, rows, 1),
            orientation: Orientation::Vertical,
            header_line: Some(0),
            concentration_axis: Some(ConcentrationAxis {
                index: 0,
                orientation: Orientation::Vertical,
            }),
            response_axes: vec![1],
            data_span: DataSpan { start: 1, end: rows },
            dilution_pattern: pattern,
            confidence: 1.0,
            scores: ScoreBreakdown::default(),
            issues: Vec::new(),
            segment: None,
        }
    }

    fn decades(n: usize) -> Vec<RawValue> {
        (0..n).map(|i| RawValue::from(10f64.powi(4 - i as i32))).collect()
    }

    #[test]
    fn clean_candidate_is_untouched() {
        let g = grid(&decades(5));
        let c = candidate(5, Some(pattern(DilutionType::LogScale, 1.0, 1.0, 10_000.0)));
        let out = validate_candidate(&g, c, &DetectConfig::default());
        assert_eq!(out.confidence, 1.0);
        assert!(out.issues.is_empty());
    }

    #[test]
    fn missing_axes_are_errors() {
        let g = grid(&decades(5));
        let mut c = candidate(5, None);
        c.concentration_axis = None;
        c.response_axes.clear();
        let out = validate_candidate(&g, c, &DetectConfig::default());
        assert!((out.confidence - 0.3).abs() < 1e-12);
        assert_eq!(out.issues[0].severity, Severity::Error);
        assert!(out.issues[0].message.contains("concentration or response"));
    }

    #[test]
    fn penalties_multiply() {
        let g = grid(&decades(2));
        let c = candidate(2, Some(pattern(DilutionType::Irregular, 0.1, 5.0, 10.0)));
        let out = validate_candidate(&g, c, &DetectConfig::default());
        // few rows, low confidence, irregular, narrow range
        let expected = 0.8 * 0.9 * 0.8 * 0.95;
        assert!((out.confidence - expected).abs() < 1e-12);
        assert_eq!(out.issues.len(), 4);
        assert_eq!(
            out.issues.iter().filter(|i| i.severity == Severity::Info).count(),
            1
        );
    }

    #[test]
    fn blank_concentrations_penalized_once() {
        let mut values = decades(6);
        values[2] = RawValue::Empty;
        values[4] = RawValue::from("n/a");
        let g = grid(&values);
        let c = candidate(6, Some(pattern(DilutionType::LogScale, 1.0, 1.0, 10_000.0)));
        let out = validate_candidate(&g, c, &DetectConfig::default());
        assert!((out.confidence - 0.9).abs() < 1e-12);
        assert!(out.issues[0].message.starts_with("2 data line(s)"));
    }

    #[test]
    fn missing_dilution_points_penalized() {
        let g = grid(&decades(5));
        let mut p = pattern(DilutionType::Serial, 1.0, 1.0, 10_000.0);
        p.missing_points = vec![3];
        let out = validate_candidate(&g, candidate(5, Some(p)), &DetectConfig::default());
        assert!((out.confidence - 0.9).abs() < 1e-12);
    }
}

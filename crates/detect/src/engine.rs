use std::cmp::Reverse;

use ordered_float::OrderedFloat;

use crate::biological::{is_oversized, segment_candidate};
use crate::cell::Grid;
use crate::config::DetectConfig;
use crate::error::DetectError;
use crate::layout::detect_layout;
use crate::model::{
    BoundingBox, DatasetCandidate, DetectionIssue, DetectionResult, Rejection, RejectionReason,
};
use crate::region::segment_regions;
use crate::trace::{LogObserver, TraceEvent, TraceObserver};
use crate::validate::validate_candidate;

/// Find every dose-response dataset on a sheet.
///
/// Never fails: structural problems come back as issues and zero-confidence
/// fallback candidates. Checkpoints go to the `log` facade.
pub fn analyze(grid: &Grid, config: &DetectConfig) -> DetectionResult {
    analyze_traced(grid, config, &mut LogObserver)
}

/// [`analyze`] with a caller-supplied trace observer.
pub fn analyze_traced(
    grid: &Grid,
    config: &DetectConfig,
    observer: &mut dyn TraceObserver,
) -> DetectionResult {
    let mut result = DetectionResult::default();
    if grid.is_empty() {
        result.issues.push(
            DetectionIssue::error(DetectError::EmptyGrid.to_string())
                .with_suggestion("load a sheet that contains data"),
        );
        return result;
    }

    let regions = segment_regions(grid, &config.region);
    for region in &regions {
        observer.on_event(&TraceEvent::RegionFound {
            bounding_box: region.bounding_box,
            confidence: region.confidence,
        });
    }
    if regions.is_empty() {
        result.issues.push(
            DetectionIssue::warning(format!(
                "no data block of at least {} x {} cells found",
                config.region.min_rows, config.region.min_cols
            ))
            .with_suggestion("draw a gate around the data to analyze it directly"),
        );
    }

    let mut pending = Vec::new();
    for region in &regions {
        analyze_block(grid, region.bounding_box, config, observer, &mut pending, &mut result);
    }
    result.regions = regions;
    rank(pending, config, observer, &mut result);
    result
}

/// Analyze one user-drawn gate, skipping region segmentation. The gate is
/// clipped to the grid first.
pub fn analyze_gate(grid: &Grid, gate: BoundingBox, config: &DetectConfig) -> DetectionResult {
    analyze_gate_traced(grid, gate, config, &mut LogObserver)
}

pub fn analyze_gate_traced(
    grid: &Grid,
    gate: BoundingBox,
    config: &DetectConfig,
    observer: &mut dyn TraceObserver,
) -> DetectionResult {
    let mut result = DetectionResult::default();
    if grid.is_empty() {
        result
            .issues
            .push(DetectionIssue::error(DetectError::EmptyGrid.to_string()));
        return result;
    }

    let sheet = BoundingBox::new(0, 0, grid.height() - 1, grid.width() - 1);
    let Some(clipped) = gate.intersection(&sheet) else {
        let err = DetectError::GateOutOfBounds {
            gate,
            height: grid.height(),
            width: grid.width(),
        };
        result.issues.push(
            DetectionIssue::error(err.to_string())
                .with_suggestion(format!("draw the gate inside {sheet}")),
        );
        return result;
    };
    if clipped != gate {
        result
            .issues
            .push(DetectionIssue::info(format!("gate {gate} clipped to {clipped}")));
    }

    let mut pending = Vec::new();
    analyze_block(grid, clipped, config, observer, &mut pending, &mut result);
    rank(pending, config, observer, &mut result);
    result
}

// ---------------------------------------------------------------------------
// Per block
// ---------------------------------------------------------------------------

fn analyze_block(
    grid: &Grid,
    bbox: BoundingBox,
    config: &DetectConfig,
    observer: &mut dyn TraceObserver,
    pending: &mut Vec<DatasetCandidate>,
    result: &mut DetectionResult,
) {
    let outcome = match detect_layout(grid, bbox, config, observer) {
        Ok(outcome) => outcome,
        Err(e) => {
            log::debug!("block {bbox} falls back: {e}");
            let mut issue = DetectionIssue::error(e.to_string());
            if e.is_structural() {
                issue = issue.with_suggestion("block skipped; draw a gate around the data to analyze it directly");
            }
            result.issues.push(issue.clone());
            pending.push(DatasetCandidate::fallback(bbox, issue));
            return;
        }
    };

    let candidate = outcome.candidate;
    let bio = &config.biology;
    if bio.segmentation_enabled
        && is_oversized(candidate.sample_count(), candidate.concentration_count(), bio)
    {
        let segmentation = segment_candidate(grid, &candidate, outcome.ambiguous, config, observer);
        result.rejections.extend(segmentation.rejections);
        pending.extend(
            segmentation
                .candidates
                .into_iter()
                .map(|c| validate_candidate(grid, cap_responses(c, config), config)),
        );
    } else {
        pending.push(validate_candidate(grid, cap_responses(candidate, config), config));
    }
}

fn cap_responses(mut candidate: DatasetCandidate, config: &DetectConfig) -> DatasetCandidate {
    let cap = config.layout.max_response_axes;
    if candidate.response_axes.len() > cap {
        let dropped = candidate.response_axes.len() - cap;
        candidate.response_axes.truncate(cap);
        candidate.issues.push(
            DetectionIssue::info(format!(
                "{dropped} response axis/axes beyond the first {cap} ignored"
            ))
            .with_suggestion("enable segmentation or draw one gate per experiment"),
        );
    }
    candidate
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

fn reject(
    result: &mut DetectionResult,
    observer: &mut dyn TraceObserver,
    candidate: &DatasetCandidate,
    reason: RejectionReason,
    message: String,
) {
    observer.on_event(&TraceEvent::CandidateRejected {
        bounding_box: candidate.bounding_box,
        reason,
    });
    result.rejections.push(Rejection {
        reason,
        bounding_box: candidate.bounding_box,
        sample_count: candidate.sample_count(),
        concentration_count: candidate.concentration_count(),
        message,
    });
}

/// Quality floor, then descending confidence (ties by position), overlap
/// suppression and the candidate cap.
fn rank(
    pending: Vec<DatasetCandidate>,
    config: &DetectConfig,
    observer: &mut dyn TraceObserver,
    result: &mut DetectionResult,
) {
    let floor = config.biology.quality_threshold;
    let mut ordered = Vec::with_capacity(pending.len());
    for candidate in pending {
        match &candidate.segment {
            Some(info) if info.biological_confidence < floor => {
                let message = format!(
                    "biological confidence {:.2} below quality threshold {floor:.2}",
                    info.biological_confidence
                );
                reject(
                    result,
                    observer,
                    &candidate,
                    RejectionReason::LowBiologicalConfidence,
                    message,
                );
            }
            _ => ordered.push(candidate),
        }
    }

    ordered.sort_by_key(|c| {
        let b = c.bounding_box;
        (
            Reverse(OrderedFloat(c.confidence)),
            b.start_row,
            b.start_col,
            b.end_row,
            b.end_col,
        )
    });

    let output = &config.output;
    let mut kept: Vec<DatasetCandidate> = Vec::new();
    for candidate in ordered {
        let covering = kept.iter().find_map(|k| {
            let ratio = candidate.bounding_box.overlap_ratio(&k.bounding_box);
            (ratio > output.overlap_threshold).then_some((k.bounding_box, ratio))
        });
        if let Some((other, ratio)) = covering {
            let message = format!("{:.0}% covered by higher-ranked {other}", ratio * 100.0);
            reject(result, observer, &candidate, RejectionReason::Overlap, message);
            continue;
        }
        if kept.len() >= output.max_candidates {
            let message = format!("beyond the top {} candidates", output.max_candidates);
            reject(result, observer, &candidate, RejectionReason::CandidateLimit, message);
            continue;
        }
        observer.on_event(&TraceEvent::CandidateAccepted {
            bounding_box: candidate.bounding_box,
            confidence: candidate.confidence,
        });
        kept.push(candidate);
    }

    if kept.is_empty() && !result.has_errors() {
        result.issues.push(
            DetectionIssue::warning("no dose-response dataset found")
                .with_suggestion("check that concentrations and responses are numeric"),
        );
    }
    log::debug!(
        "detection finished: {} candidate(s), {} rejection(s)",
        kept.len(),
        result.rejections.len()
    );
    result.candidates = kept;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::RawValue;
    use crate::model::{Orientation, Severity};
    use crate::trace::NoopObserver;

    fn tce_rows() -> Vec<Vec<RawValue>> {
        vec![
            vec![
                RawValue::from("TCE [nM]"),
                RawValue::from("Sample A"),
                RawValue::from("Sample B"),
                RawValue::from("Sample C"),
            ],
            vec![100.0.into(), 90.0.into(), 85.0.into(), 88.0.into()],
            vec![10.0.into(), 70.0.into(), 65.0.into(), 72.0.into()],
            vec![1.0.into(), 30.0.into(), 25.0.into(), 35.0.into()],
            vec![0.1.into(), 10.0.into(), 8.0.into(), 12.0.into()],
        ]
    }

    #[test]
    fn empty_grid_is_an_issue_not_a_failure() {
        let grid = Grid::from_rows(Vec::<Vec<RawValue>>::new());
        let result = analyze(&grid, &DetectConfig::default());
        assert!(result.candidates.is_empty());
        assert!(result.has_errors());
        assert!(result.issues[0].message.contains("empty"));
    }

    #[test]
    fn gate_outside_grid() {
        let grid = Grid::from_rows(tce_rows());
        let result = analyze_gate(&grid, BoundingBox::new(20, 20, 30, 30), &DetectConfig::default());
        assert!(result.candidates.is_empty());
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].severity, Severity::Error);
        assert!(result.issues[0].message.contains("outside"));
    }

    #[test]
    fn gate_is_clipped() {
        let grid = Grid::from_rows(tce_rows());
        let result = analyze_gate(&grid, BoundingBox::new(0, 0, 9, 9), &DetectConfig::default());
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].bounding_box, BoundingBox::new(0, 0, 4, 3));
        assert!(result.issues.iter().any(|i| i.message.contains("clipped")));
        assert!(result.regions.is_empty());
    }

    #[test]
    fn tiny_gate_becomes_fallback_candidate() {
        let grid = Grid::from_rows(tce_rows());
        let gate = BoundingBox::new(1, 1, 2, 2);
        let result = analyze_gate(&grid, gate, &DetectConfig::default());
        assert_eq!(result.candidates.len(), 1);
        let c = &result.candidates[0];
        assert_eq!(c.confidence, 0.0);
        assert_eq!(c.bounding_box, gate);
        assert_eq!(c.issues[0].severity, Severity::Error);
        assert!(c.issues[0].suggestion.as_deref().is_some_and(|s| s.contains("gate")));
        assert!(result.has_errors());
    }

    #[test]
    fn response_cap_applies_without_segmentation() {
        let mut header = vec![RawValue::from("Conc (nM)")];
        header.extend((1..=14).map(|i| RawValue::from(format!("Sample {i}"))));
        let mut rows = vec![header];
        for k in 0..8 {
            let mut row = vec![RawValue::from(1000.0 / 3f64.powi(k))];
            row.extend((0..14).map(|s| RawValue::from(90.0 - 10.0 * k as f64 + s as f64 * 0.1)));
            rows.push(row);
        }
        let grid = Grid::from_rows(rows);
        let mut config = DetectConfig::default();
        config.biology.segmentation_enabled = false;
        let result = analyze(&grid, &config);
        assert_eq!(result.candidates.len(), 1);
        let c = &result.candidates[0];
        assert_eq!(c.orientation, Orientation::Vertical);
        assert_eq!(c.response_axes.len(), 12);
        assert!(c.issues.iter().any(|i| i.message.contains("2 response")));
        assert!(result.rejections.is_empty());
    }

    #[test]
    fn overlap_and_cap_are_recorded() {
        let grid = Grid::from_rows(tce_rows());
        let config = DetectConfig::default();
        let mut result = DetectionResult::default();
        let base = analyze(&grid, &config).candidates[0].clone();
        let mut inner = base.clone();
        inner.bounding_box = BoundingBox::new(1, 0, 4, 3);
        inner.confidence = base.confidence / 2.0;
        let mut apart = base.clone();
        apart.bounding_box = BoundingBox::new(10, 10, 12, 12);
        apart.confidence = 0.1;

        let mut capped = config.clone();
        capped.output.max_candidates = 1;
        rank(vec![apart, inner, base.clone()], &capped, &mut NoopObserver, &mut result);

        assert_eq!(result.candidates, vec![base]);
        let reasons: Vec<_> = result.rejections.iter().map(|r| r.reason).collect();
        assert_eq!(
            reasons,
            vec![RejectionReason::Overlap, RejectionReason::CandidateLimit]
        );
    }
}

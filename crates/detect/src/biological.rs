//! Biological plausibility limits and the splitting of oversized blocks into
//! individual dose-response curves.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cell::Grid;
use crate::config::{BiologyConfig, DetectConfig};
use crate::dilution::{analyze_series, ConcentrationSeries};
use crate::layout::{axis_concentrations, candidate_concentrations, header_label};
use crate::model::{
    BoundingBox, DataSpan, DatasetCandidate, Orientation, Rejection, RejectionReason, SegmentInfo,
    SegmentStrategy,
};
use crate::trace::{TraceEvent, TraceObserver};

/// `DrugA_1`, `DrugA-2`, `Cmpd 7 Rep3`, `Control B`: base label plus a replicate suffix.
/// A bare number only counts after `_` or `-`, so `Sample 1`..`Sample 19` stay distinct.
static REPLICATE_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(.+?)(?:[\s_-]+rep(?:licate)?[\s_-]*\d+|[_-]\d+|[\s_-]+[a-d])$").unwrap()
});

pub fn is_oversized(samples: usize, concentrations: usize, config: &BiologyConfig) -> bool {
    samples > config.max_samples || concentrations > config.max_concentrations
}

/// Plausibility of one curve with `samples` replicate series over `concentrations` points.
pub fn biological_confidence(samples: usize, concentrations: usize, config: &BiologyConfig) -> f64 {
    sample_term(samples, config) * concentration_term(concentrations, config)
}

fn sample_term(samples: usize, config: &BiologyConfig) -> f64 {
    if samples == 0 {
        0.0
    } else if samples == 1 {
        1.0
    } else if samples > config.max_samples {
        0.2
    } else if samples <= 3 {
        0.9
    } else {
        0.7
    }
}

fn concentration_term(concentrations: usize, config: &BiologyConfig) -> f64 {
    if concentrations < config.min_concentrations {
        0.1
    } else if (config.ideal_min_concentrations..=config.ideal_max_concentrations)
        .contains(&concentrations)
    {
        1.0
    } else if concentrations <= config.max_concentrations {
        0.8
    } else {
        0.5
    }
}

// ---------------------------------------------------------------------------
// Replicate grouping
// ---------------------------------------------------------------------------

/// Label with any replicate suffix removed, in its original case.
pub fn replicate_base(label: &str) -> &str {
    let trimmed = label.trim();
    REPLICATE_SUFFIX
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str().trim())
}

/// Comparison key for replicate grouping.
pub fn normalize_label(label: &str) -> String {
    replicate_base(label).to_lowercase()
}

/// Group adjacent samples whose labels share a base. Runs shorter than
/// `min_replicates` stay single; longer runs are chunked at `max_replicates`.
/// Returns positions into `labels`, covering every position once, in order.
pub fn replicate_groups(labels: &[Option<String>], config: &BiologyConfig) -> Vec<Vec<usize>> {
    let keys: Vec<Option<String>> = labels
        .iter()
        .map(|l| {
            l.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(normalize_label)
        })
        .collect();

    let mut groups = Vec::new();
    let mut i = 0;
    while i < keys.len() {
        let mut j = i + 1;
        if keys[i].is_some() {
            while j < keys.len() && keys[j] == keys[i] {
                j += 1;
            }
        }
        let mut k = i;
        while k < j {
            let len = (j - k).min(config.max_replicates);
            if len >= config.min_replicates {
                groups.push((k..k + len).collect());
            } else {
                groups.extend((k..k + len).map(|p| vec![p]));
            }
            k += len;
        }
        i = j;
    }
    groups
}

fn mean_confidence(groups: &[Vec<usize>], concentrations: usize, config: &BiologyConfig) -> f64 {
    if groups.is_empty() {
        return 0.0;
    }
    groups
        .iter()
        .map(|g| biological_confidence(g.len(), concentrations, config))
        .sum::<f64>()
        / groups.len() as f64
}

/// Pick the grouping for an oversized sample set. Replicate grouping is the
/// default; ambiguous blocks keep whichever strategy scores higher on average.
fn choose_grouping(
    labels: &[Option<String>],
    concentrations: usize,
    ambiguous: bool,
    config: &BiologyConfig,
) -> (SegmentStrategy, Vec<Vec<usize>>) {
    let singles: Vec<Vec<usize>> = (0..labels.len()).map(|i| vec![i]).collect();
    let replicate = replicate_groups(labels, config);
    if !replicate.iter().any(|g| g.len() > 1) {
        return (SegmentStrategy::OnePerSample, singles);
    }
    if ambiguous
        && mean_confidence(&singles, concentrations, config)
            > mean_confidence(&replicate, concentrations, config)
    {
        return (SegmentStrategy::OnePerSample, singles);
    }
    (SegmentStrategy::ReplicateGroups, replicate)
}

// ---------------------------------------------------------------------------
// Segmentation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    pub candidates: Vec<DatasetCandidate>,
    pub rejections: Vec<Rejection>,
}

impl Segmentation {
    fn reject(
        &mut self,
        observer: &mut dyn TraceObserver,
        reason: RejectionReason,
        bounding_box: BoundingBox,
        sample_count: usize,
        concentration_count: usize,
        message: String,
    ) {
        observer.on_event(&TraceEvent::CandidateRejected {
            bounding_box,
            reason,
        });
        self.rejections.push(Rejection {
            reason,
            bounding_box,
            sample_count,
            concentration_count,
            message,
        });
    }
}

/// Split an oversized candidate into biologically plausible curves.
///
/// The parent always yields an `Oversized` rejection. Concentration runs that
/// restart are split first; each run with too few points is rejected, the rest
/// are grouped by sample. Segments under the biological floor are dropped.
pub fn segment_candidate(
    grid: &Grid,
    parent: &DatasetCandidate,
    ambiguous: bool,
    config: &DetectConfig,
    observer: &mut dyn TraceObserver,
) -> Segmentation {
    let bio = &config.biology;
    let samples = parent.sample_count();
    let concentrations = parent.concentration_count();
    let mut out = Segmentation::default();

    out.reject(
        observer,
        RejectionReason::Oversized,
        parent.bounding_box,
        samples,
        concentrations,
        format!(
            "{samples} sample(s) x {concentrations} concentration(s) exceeds the {} x {} limit of one curve",
            bio.max_samples, bio.max_concentrations
        ),
    );

    let spans = if concentrations > bio.max_concentrations {
        restart_spans(grid, parent, config)
    } else {
        vec![parent.data_span]
    };
    let restarted = spans.len() > 1;

    let labels: Vec<Option<String>> = parent
        .response_axes
        .iter()
        .map(|&axis| {
            header_label(grid, parent.orientation, parent.header_line, axis).map(str::to_string)
        })
        .collect();

    for span in spans {
        if span.len() < bio.min_concentrations {
            let bbox = span_box(parent, &parent.response_axes, span);
            out.reject(
                observer,
                RejectionReason::TooFewConcentrations,
                bbox,
                samples,
                span.len(),
                format!(
                    "{} concentration point(s), need at least {} to fit a curve",
                    span.len(),
                    bio.min_concentrations
                ),
            );
            continue;
        }

        let (strategy, groups) = if samples <= bio.max_samples {
            let strategy = if restarted {
                SegmentStrategy::SeriesRestart
            } else {
                SegmentStrategy::WholeBlock
            };
            (strategy, vec![(0..samples).collect::<Vec<_>>()])
        } else {
            choose_grouping(&labels, span.len(), ambiguous, bio)
        };
        observer.on_event(&TraceEvent::BlockSegmented {
            bounding_box: parent.bounding_box,
            strategy,
            segments: groups.len(),
        });

        for group in groups {
            let label = segment_label(&labels, &group, strategy);
            let confidence = biological_confidence(group.len(), span.len(), bio);
            let segment = build_segment(grid, parent, &group, span, strategy, confidence, label, config);
            if confidence < bio.min_segment_confidence {
                out.reject(
                    observer,
                    RejectionReason::LowBiologicalConfidence,
                    segment.bounding_box,
                    group.len(),
                    span.len(),
                    format!(
                        "biological confidence {confidence:.2} below {:.2}",
                        bio.min_segment_confidence
                    ),
                );
                continue;
            }
            out.candidates.push(segment);
        }
    }
    out
}

/// Split the data span wherever the concentration series turns against its dominant direction.
fn restart_spans(grid: &Grid, parent: &DatasetCandidate, config: &DetectConfig) -> Vec<DataSpan> {
    let valid: Vec<(usize, f64)> = candidate_concentrations(grid, parent, &config.vocabulary)
        .into_iter()
        .filter(|(_, v)| v.is_finite())
        .collect();
    if valid.len() < 3 {
        return vec![parent.data_span];
    }

    let (mut up, mut down) = (0usize, 0usize);
    for w in valid.windows(2) {
        if w[1].1 > w[0].1 {
            up += 1;
        } else if w[1].1 < w[0].1 {
            down += 1;
        }
    }
    let descending = down >= up;

    let mut spans = Vec::new();
    let mut start = parent.data_span.start;
    for w in valid.windows(2) {
        let restart = if descending {
            w[1].1 > w[0].1
        } else {
            w[1].1 < w[0].1
        };
        if restart {
            spans.push(DataSpan {
                start,
                end: w[1].0 - 1,
            });
            start = w[1].0;
        }
    }
    spans.push(DataSpan {
        start,
        end: parent.data_span.end,
    });
    spans
}

/// Box covering a segment's own sample axes across `span`. The shared
/// concentration axis stays outside so sibling segments never overlap.
fn span_box(parent: &DatasetCandidate, axes: &[usize], span: DataSpan) -> BoundingBox {
    let pb = &parent.bounding_box;
    let (lo, hi) = match (axes.iter().min(), axes.iter().max()) {
        (Some(&lo), Some(&hi)) => (lo, hi),
        _ => match parent.orientation {
            Orientation::Vertical => (pb.start_col, pb.end_col),
            Orientation::Horizontal => (pb.start_row, pb.end_row),
        },
    };
    match parent.orientation {
        Orientation::Vertical => BoundingBox::new(span.start, lo, span.end, hi),
        Orientation::Horizontal => BoundingBox::new(lo, span.start, hi, span.end),
    }
}

fn segment_label(
    labels: &[Option<String>],
    group: &[usize],
    strategy: SegmentStrategy,
) -> Option<String> {
    let first = labels.get(*group.first()?)?.as_deref()?;
    match strategy {
        SegmentStrategy::ReplicateGroups if group.len() > 1 => Some(replicate_base(first).to_string()),
        SegmentStrategy::ReplicateGroups | SegmentStrategy::OnePerSample => {
            Some(first.trim().to_string())
        }
        SegmentStrategy::SeriesRestart | SegmentStrategy::WholeBlock => None,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_segment(
    grid: &Grid,
    parent: &DatasetCandidate,
    group: &[usize],
    span: DataSpan,
    strategy: SegmentStrategy,
    biological_confidence: f64,
    label: Option<String>,
    config: &DetectConfig,
) -> DatasetCandidate {
    let axes: Vec<usize> = group
        .iter()
        .filter_map(|&p| parent.response_axes.get(p).copied())
        .collect();

    let dilution_pattern = match parent.concentration_axis {
        Some(axis) if span != parent.data_span => {
            let points = axis_concentrations(
                grid,
                parent.orientation,
                parent.header_line,
                axis.index,
                span,
                &config.vocabulary,
            );
            Some(analyze_series(
                &ConcentrationSeries::new(points),
                &config.dilution,
            ))
        }
        _ => parent.dilution_pattern.clone(),
    };

    DatasetCandidate {
        bounding_box: span_box(parent, &axes, span),
        orientation: parent.orientation,
        header_line: parent.header_line,
        concentration_axis: parent.concentration_axis,
        data_span: span,
        dilution_pattern,
        confidence: (parent.confidence * biological_confidence).clamp(0.0, 1.0),
        scores: parent.scores,
        issues: parent.issues.clone(),
        segment: Some(SegmentInfo {
            parent_box: parent.bounding_box,
            strategy,
            sample_count: axes.len(),
            concentration_count: span.len(),
            biological_confidence,
            label,
        }),
        response_axes: axes,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

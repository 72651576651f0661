//! Per-block layout detection: header line, concentration axis, response axes
//! and orientation.
//!
//! Both orientations share one scoring pass. A [`BlockView`] presents a block
//! as "lines" (where concentrations advance) by "axes" (one per sample), so the
//! horizontal pass is the vertical pass over the transposed block.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cell::{
    cell_concentration, has_explicit_unit, normalize, unit_in_text, Cell, CellKind, Grid,
    DEFAULT_UNIT,
};
use crate::config::{DetectConfig, Vocabulary};
use crate::dilution::{analyze_series, ConcentrationSeries};
use crate::error::DetectError;
use crate::model::{
    BoundingBox, ConcentrationAxis, DataSpan, DatasetCandidate, DetectionIssue, DilutionPattern,
    Orientation, ScoreBreakdown,
};
use crate::trace::{TraceEvent, TraceObserver};

/// Orders of magnitude at which the log-range term of the orientation score saturates.
const LOG_RANGE_SATURATION: f64 = 4.0;

/// Valid concentrations a labelled axis needs before a pattern can be claimed.
const MIN_AXIS_POINTS: usize = 3;

/// Well ids (`A1`..`P24`) and sample-style labels (`Sample A`, `Rep 2`, `S12`).
static SAMPLE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:[a-p](?:0?[1-9]|1\d|2[0-4])|(?:sample|well|rep(?:licate)?)[\s_#-]*[a-z0-9]+|[sr][\s_#-]*\d+)$",
    )
    .unwrap()
});

// ---------------------------------------------------------------------------
// Oriented access
// ---------------------------------------------------------------------------

/// Cell at absolute `line`/`axis` coordinates. Vertical layouts run lines down
/// rows and axes across columns; horizontal layouts swap the two.
pub fn oriented_cell(grid: &Grid, orientation: Orientation, line: usize, axis: usize) -> &Cell {
    match orientation {
        Orientation::Vertical => grid.cell(line, axis),
        Orientation::Horizontal => grid.cell(axis, line),
    }
}

/// Text in the header line for `axis`, if there is a header and it holds text.
pub fn header_label(
    grid: &Grid,
    orientation: Orientation,
    header_line: Option<usize>,
    axis: usize,
) -> Option<&str> {
    header_line.and_then(|line| oriented_cell(grid, orientation, line, axis).kind.as_text())
}

/// Unit applied to bare numbers on an axis: the one named in its header, else nM.
pub fn axis_unit(
    grid: &Grid,
    orientation: Orientation,
    header_line: Option<usize>,
    axis: usize,
) -> String {
    header_label(grid, orientation, header_line, axis)
        .and_then(unit_in_text)
        .unwrap_or_else(|| DEFAULT_UNIT.to_string())
}

/// `(line, nM)` for every data line of the candidate's concentration axis.
/// Unparseable cells come back as NaN so callers can count them.
pub fn candidate_concentrations(
    grid: &Grid,
    candidate: &DatasetCandidate,
    vocabulary: &Vocabulary,
) -> Vec<(usize, f64)> {
    match candidate.concentration_axis {
        Some(axis) => axis_concentrations(
            grid,
            candidate.orientation,
            candidate.header_line,
            axis.index,
            candidate.data_span,
            vocabulary,
        ),
        None => Vec::new(),
    }
}

pub(crate) fn axis_concentrations(
    grid: &Grid,
    orientation: Orientation,
    header_line: Option<usize>,
    axis: usize,
    span: DataSpan,
    vocabulary: &Vocabulary,
) -> Vec<(usize, f64)> {
    let unit = axis_unit(grid, orientation, header_line, axis);
    span.iter()
        .map(|line| {
            let cell = oriented_cell(grid, orientation, line, axis);
            (line, normalize(&cell_concentration(cell, &unit), vocabulary))
        })
        .collect()
}

/// A block seen in one orientation, indexed relative to its top-left corner.
#[derive(Clone, Copy)]
struct BlockView<'g> {
    grid: &'g Grid,
    bbox: BoundingBox,
    orientation: Orientation,
}

impl<'g> BlockView<'g> {
    fn lines(&self) -> usize {
        match self.orientation {
            Orientation::Vertical => self.bbox.rows(),
            Orientation::Horizontal => self.bbox.cols(),
        }
    }

    fn axes(&self) -> usize {
        match self.orientation {
            Orientation::Vertical => self.bbox.cols(),
            Orientation::Horizontal => self.bbox.rows(),
        }
    }

    fn line_index(&self, i: usize) -> usize {
        match self.orientation {
            Orientation::Vertical => self.bbox.start_row + i,
            Orientation::Horizontal => self.bbox.start_col + i,
        }
    }

    fn axis_index(&self, j: usize) -> usize {
        match self.orientation {
            Orientation::Vertical => self.bbox.start_col + j,
            Orientation::Horizontal => self.bbox.start_row + j,
        }
    }

    fn cell(&self, i: usize, j: usize) -> &'g Cell {
        oriented_cell(self.grid, self.orientation, self.line_index(i), self.axis_index(j))
    }

    fn line_is_empty(&self, i: usize) -> bool {
        (0..self.axes()).all(|j| self.cell(i, j).kind.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Layout of a block in one orientation, with its orientation score
/// (horizontal preference already applied).
#[derive(Debug, Clone, PartialEq)]
pub struct OrientedLayout {
    pub candidate: DatasetCandidate,
    pub orientation_score: f64,
}

/// The winning layout of a block plus the evidence used to pick it.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutOutcome {
    pub candidate: DatasetCandidate,
    pub vertical_score: Option<f64>,
    pub horizontal_score: Option<f64>,
    /// The two orientation scores were within the ambiguity margin.
    pub ambiguous: bool,
}

/// Score both orientations of `bbox` and keep the better one.
pub fn detect_layout(
    grid: &Grid,
    bbox: BoundingBox,
    config: &DetectConfig,
    observer: &mut dyn TraceObserver,
) -> Result<LayoutOutcome, DetectError> {
    check_block(grid, bbox, config)?;

    let vertical = detect_oriented(grid, bbox, Orientation::Vertical, config, observer);
    let horizontal = detect_oriented(grid, bbox, Orientation::Horizontal, config, observer);

    let outcome = match (vertical, horizontal) {
        (Ok(v), Ok(h)) => {
            let (vs, hs) = (v.orientation_score, h.orientation_score);
            LayoutOutcome {
                candidate: if vs > hs { v.candidate } else { h.candidate },
                vertical_score: Some(vs),
                horizontal_score: Some(hs),
                ambiguous: (vs - hs).abs() < config.biology.ambiguity_margin,
            }
        }
        (Ok(v), Err(e)) => {
            log::debug!("{bbox}: horizontal pass failed: {e}");
            LayoutOutcome {
                vertical_score: Some(v.orientation_score),
                candidate: v.candidate,
                horizontal_score: None,
                ambiguous: false,
            }
        }
        (Err(e), Ok(h)) => {
            log::debug!("{bbox}: vertical pass failed: {e}");
            LayoutOutcome {
                horizontal_score: Some(h.orientation_score),
                candidate: h.candidate,
                vertical_score: None,
                ambiguous: false,
            }
        }
        (Err(e), Err(_)) => return Err(e),
    };

    observer.on_event(&TraceEvent::OrientationChosen {
        bounding_box: bbox,
        orientation: outcome.candidate.orientation,
        vertical_score: outcome.vertical_score,
        horizontal_score: outcome.horizontal_score,
        ambiguous: outcome.ambiguous,
    });
    Ok(outcome)
}

fn check_block(grid: &Grid, bbox: BoundingBox, config: &DetectConfig) -> Result<(), DetectError> {
    let region = &config.region;
    if bbox.rows() < region.min_rows || bbox.cols() < region.min_cols {
        return Err(DetectError::BlockTooSmall {
            bbox,
            rows: bbox.rows(),
            cols: bbox.cols(),
            min_rows: region.min_rows,
            min_cols: region.min_cols,
        });
    }
    let filled = (bbox.start_row..=bbox.end_row)
        .any(|r| (bbox.start_col..=bbox.end_col).any(|c| grid.is_filled(r, c)));
    if !filled {
        return Err(DetectError::EmptyBlock(bbox));
    }
    Ok(())
}

/// Run the full scoring pass over `bbox` in one orientation.
pub fn detect_oriented(
    grid: &Grid,
    bbox: BoundingBox,
    orientation: Orientation,
    config: &DetectConfig,
    observer: &mut dyn TraceObserver,
) -> Result<OrientedLayout, DetectError> {
    let view = BlockView {
        grid,
        bbox,
        orientation,
    };
    let layout = &config.layout;
    let mut issues = Vec::new();

    let header = find_header(&view, config);
    let header_score = header.map_or(0.0, |(_, raw)| (raw / layout.header.normalizer).clamp(0.0, 1.0));
    observer.on_event(&TraceEvent::HeaderScored {
        bounding_box: bbox,
        orientation,
        line: header.map(|(i, _)| view.line_index(i)),
        score: header_score,
    });
    if header.is_none() {
        issues.push(
            DetectionIssue::info("no header line detected; data assumed to start at the first line")
                .with_suggestion("add a header naming the concentration and sample axes"),
        );
    }

    let (start, end) = data_lines(&view, header.map(|(i, _)| i));
    if start == end {
        return Err(if header.is_some() {
            DetectError::NoDataLines(bbox)
        } else {
            DetectError::EmptyBlock(bbox)
        });
    }
    let span = DataSpan {
        start: view.line_index(start),
        end: view.line_index(end - 1),
    };
    let header_rel = header.map(|(i, _)| i);

    let axis = best_concentration_axis(&view, header_rel, start, end, config, observer, &mut issues);
    let (responses, response_score) =
        response_axes(&view, header_rel, start, end, axis.as_ref().map(|a| a.axis), config);
    let layout_score = structural_density(&view, start, end);

    let (concentration_score, pattern) = match axis.as_ref() {
        Some(a) => (a.normalized, Some(&a.pattern)),
        None => (0.0, None),
    };
    let pattern_confidence = pattern.map_or(0.0, |p| p.confidence);
    let [w_header, w_axis, w_response, w_layout] = layout.combine;
    let split = layout.concentration_split;
    let confidence = (w_header * header_score
        + w_axis * (split * concentration_score + (1.0 - split) * pattern_confidence)
        + w_response * response_score
        + w_layout * layout_score)
        .clamp(0.0, 1.0);

    let (consistency, orders) = pattern.map_or((0.0, 0.0), |p| {
        (p.consistency, p.range.order_of_magnitude)
    });
    let [o_conf, o_consistency, o_density, o_range] = layout.orientation;
    let mut orientation_score = o_conf * confidence
        + o_consistency * consistency
        + o_density * layout_score
        + o_range * (orders / LOG_RANGE_SATURATION).clamp(0.0, 1.0);
    if orientation == Orientation::Horizontal {
        orientation_score *= layout.horizontal_preference;
    }

    let candidate = DatasetCandidate {
        bounding_box: bbox,
        orientation,
        header_line: header.map(|(i, _)| view.line_index(i)),
        concentration_axis: axis.as_ref().map(|a| ConcentrationAxis {
            index: view.axis_index(a.axis),
            orientation,
        }),
        response_axes: responses,
        data_span: span,
        dilution_pattern: axis.map(|a| a.pattern),
        confidence,
        scores: ScoreBreakdown {
            header: header_score,
            concentration: concentration_score,
            pattern: pattern_confidence,
            response: response_score,
            layout: layout_score,
        },
        issues,
        segment: None,
    };
    Ok(OrientedLayout {
        candidate,
        orientation_score,
    })
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

fn header_score(view: &BlockView<'_>, i: usize, config: &DetectConfig) -> f64 {
    let vocab = &config.vocabulary;
    let w = &config.layout.header;
    let (mut text, mut numeric, mut response_hits) = (0usize, 0usize, 0usize);
    let mut concentration_hint = false;
    for j in 0..view.axes() {
        match &view.cell(i, j).kind {
            CellKind::Text(s) => {
                text += 1;
                concentration_hint |=
                    vocab.has_concentration_keyword(s) || unit_in_text(s).is_some();
                response_hits += vocab.response_keyword_count(s);
            }
            CellKind::Number(_) => numeric += 1,
            _ => {}
        }
    }
    let mut score = w.text_cell * text as f64 + w.response_keyword * response_hits as f64
        - w.row_index_penalty * i as f64;
    if concentration_hint {
        score += w.concentration_keyword;
    }
    if numeric > text {
        score -= w.numeric_majority_penalty;
    }
    score
}

/// Best-scoring leading line with a positive score. Earlier lines win ties.
fn find_header(view: &BlockView<'_>, config: &DetectConfig) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for i in 0..view.lines().min(config.layout.header_scan_rows) {
        let score = header_score(view, i, config);
        if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best
}

/// Data lines after the header with empty leading/trailing lines trimmed, as `[start, end)`.
fn data_lines(view: &BlockView<'_>, header: Option<usize>) -> (usize, usize) {
    let mut start = header.map_or(0, |h| h + 1);
    let mut end = view.lines();
    while start < end && view.line_is_empty(start) {
        start += 1;
    }
    while end > start && view.line_is_empty(end - 1) {
        end -= 1;
    }
    (start, end)
}

// ---------------------------------------------------------------------------
// Concentration axis
// ---------------------------------------------------------------------------

struct AxisScore {
    axis: usize,
    raw: f64,
    normalized: f64,
    pattern: DilutionPattern,
}

/// Highest-scoring concentration axis; lower index wins ties. Axes with fewer
/// than two parseable concentrations are not candidates. An axis whose header
/// names a concentration but holds too few readable values is reported as an
/// error issue.
fn best_concentration_axis(
    view: &BlockView<'_>,
    header: Option<usize>,
    start: usize,
    end: usize,
    config: &DetectConfig,
    observer: &mut dyn TraceObserver,
    issues: &mut Vec<DetectionIssue>,
) -> Option<AxisScore> {
    let w = &config.layout.axis;
    let data_len = (end - start) as f64;
    let ceiling = w.pattern_confidence
        + w.keyword
        + w.explicit_unit
        + w.first_line
        + w.recognized_pattern
        + w.consistency
        + w.numeric_row * data_len;

    let mut best: Option<AxisScore> = None;
    for j in 0..view.axes() {
        let label = header.and_then(|h| view.cell(h, j).kind.as_text());
        let header_unit = label.and_then(unit_in_text);
        let default_unit = header_unit.as_deref().unwrap_or(DEFAULT_UNIT);

        let mut numeric = 0usize;
        let mut explicit_unit = header_unit.is_some();
        let mut points = Vec::with_capacity(end - start);
        for i in start..end {
            let cell = view.cell(i, j);
            if matches!(cell.kind, CellKind::Number(_)) {
                numeric += 1;
            }
            explicit_unit |= has_explicit_unit(cell);
            let nm = normalize(&cell_concentration(cell, default_unit), &config.vocabulary);
            points.push((view.line_index(i), nm));
        }
        let series = ConcentrationSeries::new(points);
        let labelled = label.is_some_and(|t| config.vocabulary.has_concentration_keyword(t))
            || header_unit.is_some();
        if labelled && series.len() < MIN_AXIS_POINTS {
            let err = DetectError::TooFewPoints {
                axis: view.axis_index(j),
                found: series.len(),
                needed: MIN_AXIS_POINTS,
            };
            log::debug!("{}: {err}", view.bbox);
            issues.push(
                DetectionIssue::error(err.to_string())
                    .with_suggestion("check the concentration cells for typos, text or missing values"),
            );
        }
        if series.len() < 2 {
            continue;
        }

        let pattern = analyze_series(&series, &config.dilution);
        let mut raw = w.pattern_confidence * pattern.confidence
            + w.numeric_row * numeric as f64
            + w.consistency * pattern.consistency;
        if label.is_some_and(|t| config.vocabulary.has_concentration_keyword(t)) {
            raw += w.keyword;
        }
        if explicit_unit {
            raw += w.explicit_unit;
        }
        if j == 0 {
            raw += w.first_line;
        }
        if pattern.kind.is_recognized() {
            raw += w.recognized_pattern;
        }
        let normalized = if ceiling > 0.0 {
            (raw / ceiling).clamp(0.0, 1.0)
        } else {
            0.0
        };

        observer.on_event(&TraceEvent::AxisScored {
            bounding_box: view.bbox,
            orientation: view.orientation,
            axis: view.axis_index(j),
            score: normalized,
            pattern: pattern.kind,
        });

        if best.as_ref().map_or(true, |b| raw > b.raw) {
            best = Some(AxisScore {
                axis: j,
                raw,
                normalized,
                pattern,
            });
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Responses + density
// ---------------------------------------------------------------------------

/// Accepted response axes (absolute, ascending) and their mean normalized score.
fn response_axes(
    view: &BlockView<'_>,
    header: Option<usize>,
    start: usize,
    end: usize,
    concentration_axis: Option<usize>,
    config: &DetectConfig,
) -> (Vec<usize>, f64) {
    let w = &config.layout.response;
    let data_len = (end - start) as f64;
    let mut accepted = Vec::new();
    let mut total = 0.0;

    for j in 0..view.axes() {
        if Some(j) == concentration_axis {
            continue;
        }
        let numeric = (start..end)
            .filter(|&i| view.cell(i, j).kind.as_number().is_some())
            .count();
        if numeric == 0 {
            continue;
        }
        let label = header.and_then(|h| view.cell(h, j).kind.as_text());
        let mut score = w.fill * numeric as f64 / data_len;
        if label.is_some_and(|t| config.vocabulary.response_keyword_count(t) > 0) {
            score += w.keyword;
        }
        if label.is_some_and(is_sample_label) {
            score += w.sample_pattern;
        }
        if score >= w.min_score {
            accepted.push(view.axis_index(j));
            total += score;
        }
    }

    let ceiling = w.keyword + w.sample_pattern + w.fill;
    let score = if accepted.is_empty() || ceiling <= 0.0 {
        0.0
    } else {
        (total / accepted.len() as f64 / ceiling).clamp(0.0, 1.0)
    };
    (accepted, score)
}

/// Well id or sample-style label.
pub fn is_sample_label(text: &str) -> bool {
    SAMPLE_LABEL.is_match(text.trim())
}

/// Filled fraction of the data lines.
fn structural_density(view: &BlockView<'_>, start: usize, end: usize) -> f64 {
    let total = (end - start) * view.axes();
    if total == 0 {
        return 0.0;
    }
    let filled = (start..end)
        .map(|i| (0..view.axes()).filter(|&j| !view.cell(i, j).kind.is_empty()).count())
        .sum::<usize>();
    filled as f64 / total as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

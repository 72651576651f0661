use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Inclusive rectangle of grid coordinates. `end_row >= start_row`, `end_col >= start_col`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BoundingBox {
    pub start_row: usize,
    pub end_row: usize,
    pub start_col: usize,
    pub end_col: usize,
}

impl BoundingBox {
    /// Build a box from two corners in any order.
    pub fn new(row_a: usize, col_a: usize, row_b: usize, col_b: usize) -> Self {
        Self {
            start_row: row_a.min(row_b),
            end_row: row_a.max(row_b),
            start_col: col_a.min(col_b),
            end_col: col_a.max(col_b),
        }
    }

    pub fn rows(&self) -> usize {
        self.end_row - self.start_row + 1
    }

    pub fn cols(&self) -> usize {
        self.end_col - self.start_col + 1
    }

    pub fn area(&self) -> usize {
        self.rows() * self.cols()
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.start_row && row <= self.end_row && col >= self.start_col && col <= self.end_col
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let start_row = self.start_row.max(other.start_row);
        let end_row = self.end_row.min(other.end_row);
        let start_col = self.start_col.max(other.start_col);
        let end_col = self.end_col.min(other.end_col);
        if start_row > end_row || start_col > end_col {
            return None;
        }
        Some(BoundingBox {
            start_row,
            end_row,
            start_col,
            end_col,
        })
    }

    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.intersection(other).is_some()
    }

    /// Intersection area divided by this box's own area.
    pub fn overlap_ratio(&self, other: &BoundingBox) -> f64 {
        match self.intersection(other) {
            Some(i) => i.area() as f64 / self.area() as f64,
            None => 0.0,
        }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            start_row: self.start_row.min(other.start_row),
            end_row: self.end_row.max(other.end_row),
            start_col: self.start_col.min(other.start_col),
            end_col: self.end_col.max(other.end_col),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}{}",
            column_letters(self.start_col),
            self.start_row + 1,
            column_letters(self.end_col),
            self.end_row + 1
        )
    }
}

/// Spreadsheet column name for a 0-based index (0 → A, 25 → Z, 26 → AA).
pub fn column_letters(col: usize) -> String {
    let mut n = col + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    out.iter().rev().collect()
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Which way the concentrations run.
///
/// `Vertical`: concentrations fill a column, each response is another column,
/// the header is a row. `Horizontal`: concentrations fill a row, each sample is
/// a row, the header is a column of labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Vertical,
    Horizontal,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertical => write!(f, "vertical"),
            Self::Horizontal => write!(f, "horizontal"),
        }
    }
}

/// Absolute index of the concentration line: a column for vertical layouts, a row for horizontal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConcentrationAxis {
    pub index: usize,
    pub orientation: Orientation,
}

/// Inclusive range of data lines along the concentration axis (rows when vertical, columns when horizontal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DataSpan {
    pub start: usize,
    pub end: usize,
}

impl DataSpan {
    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

// ---------------------------------------------------------------------------
// Dilution patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DilutionType {
    Serial,
    LogScale,
    HalfLog,
    Custom,
    Irregular,
    Unknown,
}

impl DilutionType {
    /// Serial, log-scale and half-log are the canonical laboratory schemes.
    pub fn is_recognized(&self) -> bool {
        matches!(self, Self::Serial | Self::LogScale | Self::HalfLog)
    }
}

impl fmt::Display for DilutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::LogScale => write!(f, "log-scale"),
            Self::HalfLog => write!(f, "half-log"),
            Self::Custom => write!(f, "custom"),
            Self::Irregular => write!(f, "irregular"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConcentrationRange {
    pub min: f64,
    pub max: f64,
    pub order_of_magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DilutionPattern {
    #[serde(rename = "type")]
    pub kind: DilutionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
    pub confidence: f64,
    pub detected_ratio: f64,
    pub range: ConcentrationRange,
    pub consistency: f64,
    /// Positions in the expected geometric sequence (max → min) with no observed value.
    pub missing_points: Vec<usize>,
    pub irregularities: Vec<String>,
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionIssue {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl DetectionIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Normalized sub-scores that fed a candidate's combined confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub header: f64,
    pub concentration: f64,
    pub pattern: f64,
    pub response: f64,
    pub layout: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStrategy {
    /// Adjacent samples whose labels differ only by a replicate suffix form one curve.
    ReplicateGroups,
    /// Every sample becomes its own curve.
    OnePerSample,
    /// The concentration series restarts; each repeat keeps its samples together.
    SeriesRestart,
    /// Too many concentrations but no restart to split on; the block is kept whole.
    WholeBlock,
}

impl fmt::Display for SegmentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplicateGroups => write!(f, "replicate_groups"),
            Self::OnePerSample => write!(f, "one_per_sample"),
            Self::SeriesRestart => write!(f, "series_restart"),
            Self::WholeBlock => write!(f, "whole_block"),
        }
    }
}

/// Provenance of a candidate produced by splitting an oversized block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentInfo {
    pub parent_box: BoundingBox,
    pub strategy: SegmentStrategy,
    pub sample_count: usize,
    pub concentration_count: usize,
    pub biological_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetCandidate {
    pub bounding_box: BoundingBox,
    pub orientation: Orientation,
    /// Header line: a row for vertical layouts, a column for horizontal ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concentration_axis: Option<ConcentrationAxis>,
    /// Columns (vertical) or rows (horizontal) holding responses, ascending.
    pub response_axes: Vec<usize>,
    pub data_span: DataSpan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dilution_pattern: Option<DilutionPattern>,
    pub confidence: f64,
    pub scores: ScoreBreakdown,
    pub issues: Vec<DetectionIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<SegmentInfo>,
}

impl DatasetCandidate {
    /// Zero-confidence stand-in for a block whose analysis failed.
    pub fn fallback(bbox: BoundingBox, issue: DetectionIssue) -> Self {
        Self {
            bounding_box: bbox,
            orientation: Orientation::Vertical,
            header_line: None,
            concentration_axis: None,
            response_axes: Vec::new(),
            data_span: DataSpan {
                start: bbox.start_row,
                end: bbox.end_row,
            },
            dilution_pattern: None,
            confidence: 0.0,
            scores: ScoreBreakdown::default(),
            issues: vec![issue],
            segment: None,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.response_axes.len()
    }

    pub fn concentration_count(&self) -> usize {
        self.data_span.len()
    }
}

// ---------------------------------------------------------------------------
// Regions + Output
// ---------------------------------------------------------------------------

/// One block found by the region segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Region {
    pub bounding_box: BoundingBox,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Too many samples or concentrations for one curve; the block was split.
    Oversized,
    /// Fewer concentration points than a curve fit needs.
    TooFewConcentrations,
    /// Segment's biological confidence fell below the floor.
    LowBiologicalConfidence,
    /// Candidate overlapped a higher-ranked one.
    Overlap,
    /// Candidate fell outside the result cap.
    CandidateLimit,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oversized => write!(f, "oversized"),
            Self::TooFewConcentrations => write!(f, "too_few_concentrations"),
            Self::LowBiologicalConfidence => write!(f, "low_biological_confidence"),
            Self::Overlap => write!(f, "overlap"),
            Self::CandidateLimit => write!(f, "candidate_limit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub bounding_box: BoundingBox,
    pub sample_count: usize,
    pub concentration_count: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DetectionResult {
    pub candidates: Vec<DatasetCandidate>,
    pub issues: Vec<DetectionIssue>,
    pub regions: Vec<Region>,
    pub rejections: Vec<Rejection>,
}

impl DetectionResult {
    pub fn best(&self) -> Option<&DatasetCandidate> {
        self.candidates.first()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

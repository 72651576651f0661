use thiserror::Error;

use crate::model::BoundingBox;

#[derive(Debug, Error)]
pub enum DetectError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (fraction out of range, min > max, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// The grid holds no non-empty cell at all.
    #[error("grid is empty")]
    EmptyGrid,
    /// A block is smaller than the minimum viable dataset.
    #[error("block {bbox} is too small: {rows} row(s) x {cols} col(s), need at least {min_rows} x {min_cols}")]
    BlockTooSmall {
        bbox: BoundingBox,
        rows: usize,
        cols: usize,
        min_rows: usize,
        min_cols: usize,
    },
    /// A block or gate holds no non-empty cell.
    #[error("block {0} holds no data")]
    EmptyBlock(BoundingBox),
    /// Everything after the header line is empty.
    #[error("block {0} has a header but no data lines")]
    NoDataLines(BoundingBox),
    /// A user-drawn gate does not intersect the grid.
    #[error("gate {gate} lies outside the grid ({height} x {width})")]
    GateOutOfBounds {
        gate: BoundingBox,
        height: usize,
        width: usize,
    },
    /// Too few parseable values on an axis to claim anything about it.
    #[error("axis {axis} has {found} valid value(s), need at least {needed}")]
    TooFewPoints {
        axis: usize,
        found: usize,
        needed: usize,
    },
}

impl DetectError {
    /// Structural errors short-circuit a single block; everything else is a setup problem.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::EmptyGrid
                | Self::EmptyBlock(_)
                | Self::NoDataLines(_)
                | Self::BlockTooSmall { .. }
                | Self::GateOutOfBounds { .. }
                | Self::TooFewPoints { .. }
        )
    }
}

use serde::Serialize;

use crate::cell::Grid;
use crate::config::Vocabulary;
use crate::layout::{candidate_concentrations, oriented_cell};
use crate::model::DatasetCandidate;

/// One concentration of a detected dataset with its replicate responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub concentration_nm: f64,
    /// Row (vertical) or column (horizontal) the point was read from.
    pub source_index: usize,
    /// One entry per response axis, in axis order; `None` where the cell is not numeric.
    pub responses: Vec<Option<f64>>,
}

/// Concrete `(concentration, responses)` rows of a candidate, highest concentration first.
///
/// Lines whose concentration cannot be read are skipped. Equal concentrations
/// keep their sheet order.
pub fn extract_points(
    grid: &Grid,
    candidate: &DatasetCandidate,
    vocabulary: &Vocabulary,
) -> Vec<DataPoint> {
    let mut points: Vec<DataPoint> = candidate_concentrations(grid, candidate, vocabulary)
        .into_iter()
        .filter(|(_, nm)| nm.is_finite())
        .map(|(line, nm)| DataPoint {
            concentration_nm: nm,
            source_index: line,
            responses: candidate
                .response_axes
                .iter()
                .map(|&axis| {
                    oriented_cell(grid, candidate.orientation, line, axis)
                        .kind
                        .as_number()
                })
                .collect(),
        })
        .collect();
    points.sort_by(|a, b| b.concentration_nm.total_cmp(&a.concentration_nm));
    points
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

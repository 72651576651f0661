//! Split one sheet into independent rectangular data blocks.
//!
//! Pass 1 finds gap bands: runs of at least `min_gap_band` rows (or columns)
//! that are mostly empty. The bands cut the sheet into a lattice of partition
//! cells; each band is a partition of its own, since a line that is mostly
//! empty across the whole sheet can still hold a narrow or short block.
//! Pass 2 flood-fills each partition cell over a density map that keeps
//! isolated blanks inside their block, then merges components whose spacing is
//! small relative to the spacing observed in that cell.

use log::debug;

use crate::cell::Grid;
use crate::config::RegionConfig;
use crate::model::{BoundingBox, Region};

/// Segment the grid into disjoint regions, ordered top-to-bottom then left-to-right.
pub fn segment_regions(grid: &Grid, config: &RegionConfig) -> Vec<Region> {
    let Some(extent) = filled_extent(grid) else {
        return Vec::new();
    };

    let row_empty: Vec<f64> = (extent.start_row..=extent.end_row)
        .map(|r| {
            let empty = (extent.start_col..=extent.end_col)
                .filter(|&c| !grid.is_filled(r, c))
                .count();
            empty as f64 / extent.cols() as f64
        })
        .collect();
    let col_empty: Vec<f64> = (extent.start_col..=extent.end_col)
        .map(|c| {
            let empty = (extent.start_row..=extent.end_row)
                .filter(|&r| !grid.is_filled(r, c))
                .count();
            empty as f64 / extent.rows() as f64
        })
        .collect();

    let row_bands = gap_bands(&row_empty, config.gap_emptiness, config.min_gap_band);
    let col_bands = gap_bands(&col_empty, config.gap_emptiness, config.min_gap_band);
    debug!(
        "extent {extent}: {} row band(s), {} column band(s)",
        row_bands.len(),
        col_bands.len()
    );

    let mut boxes = if row_bands.is_empty() && col_bands.is_empty() {
        vec![extent]
    } else {
        let row_segments = partition(&row_bands, row_empty.len(), extent.start_row);
        let col_segments = partition(&col_bands, col_empty.len(), extent.start_col);
        let mut found = Vec::new();
        for &(r0, r1) in &row_segments {
            for &(c0, c1) in &col_segments {
                let area = BoundingBox::new(r0, c0, r1, c1);
                found.extend(components_in(grid, area, config));
            }
        }
        found
    };

    merge_overlapping(&mut boxes);

    let mut regions: Vec<Region> = boxes
        .into_iter()
        .filter(|b| b.rows() >= config.min_rows && b.cols() >= config.min_cols)
        .map(|b| Region {
            bounding_box: b,
            confidence: region_confidence(grid, b, config),
        })
        .collect();
    regions.sort_by_key(|r| (r.bounding_box.start_row, r.bounding_box.start_col));
    regions
}

/// Smallest box holding every non-empty cell.
pub fn filled_extent(grid: &Grid) -> Option<BoundingBox> {
    let mut extent: Option<BoundingBox> = None;
    for r in 0..grid.height() {
        for c in 0..grid.width() {
            if grid.is_filled(r, c) {
                let cell_box = BoundingBox::new(r, c, r, c);
                extent = Some(match extent {
                    Some(e) => e.union(&cell_box),
                    None => cell_box,
                });
            }
        }
    }
    extent
}

/// Runs of gap lines at least `min_len` long, as inclusive local index pairs.
fn gap_bands(emptiness: &[f64], threshold: f64, min_len: usize) -> Vec<(usize, usize)> {
    let mut bands = Vec::new();
    let mut run_start: Option<usize> = None;
    for (i, &e) in emptiness.iter().enumerate() {
        let is_gap = e >= threshold;
        match (is_gap, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(s)) => {
                if i - s >= min_len {
                    bands.push((s, i - 1));
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = run_start {
        if emptiness.len() - s >= min_len {
            bands.push((s, emptiness.len() - 1));
        }
    }
    bands
}

/// Absolute index ranges covering `0..len`, cut at band edges. Bands are kept
/// as segments of their own.
fn partition(bands: &[(usize, usize)], len: usize, offset: usize) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut cursor = 0;
    for &(s, e) in bands {
        if s > cursor {
            segments.push((offset + cursor, offset + s - 1));
        }
        segments.push((offset + s, offset + e));
        cursor = e + 1;
    }
    if cursor < len {
        segments.push((offset + cursor, offset + len - 1));
    }
    segments
}

// ---------------------------------------------------------------------------
// Flood fill
// ---------------------------------------------------------------------------

/// Summed-area table of filled cells inside one partition cell.
struct DensityMap {
    area: BoundingBox,
    sums: Vec<usize>,
}

impl DensityMap {
    fn new(grid: &Grid, area: BoundingBox) -> Self {
        let (h, w) = (area.rows(), area.cols());
        let mut sums = vec![0usize; (h + 1) * (w + 1)];
        for r in 0..h {
            for c in 0..w {
                let filled = usize::from(grid.is_filled(area.start_row + r, area.start_col + c));
                sums[(r + 1) * (w + 1) + c + 1] = filled + sums[r * (w + 1) + c + 1]
                    + sums[(r + 1) * (w + 1) + c]
                    - sums[r * (w + 1) + c];
            }
        }
        Self { area, sums }
    }

    /// Fraction of filled cells in the window of `radius` around a local
    /// coordinate, clipped to the area.
    fn local_density(&self, r: usize, c: usize, radius: usize) -> f64 {
        let w = self.area.cols();
        let r0 = r.saturating_sub(radius);
        let c0 = c.saturating_sub(radius);
        let r1 = (r + radius).min(self.area.rows() - 1);
        let c1 = (c + radius).min(w - 1);
        let at = |rr: usize, cc: usize| self.sums[rr * (w + 1) + cc];
        let filled = at(r1 + 1, c1 + 1) + at(r0, c0) - at(r0, c1 + 1) - at(r1 + 1, c0);
        let cells = (r1 - r0 + 1) * (c1 - c0 + 1);
        filled as f64 / cells as f64
    }
}

/// Connected components of one partition cell, each trimmed to its filled cells.
fn components_in(grid: &Grid, area: BoundingBox, config: &RegionConfig) -> Vec<BoundingBox> {
    let (h, w) = (area.rows(), area.cols());
    let density = DensityMap::new(grid, area);
    let filled = |r: usize, c: usize| grid.is_filled(area.start_row + r, area.start_col + c);
    let inside = |r: usize, c: usize| {
        filled(r, c) || density.local_density(r, c, config.density_radius) >= config.density_threshold
    };

    let mut visited = vec![false; h * w];
    let mut components = Vec::new();
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for sr in 0..h {
        for sc in 0..w {
            if visited[sr * w + sc] || !filled(sr, sc) {
                continue;
            }
            visited[sr * w + sc] = true;
            stack.push((sr, sc));
            let mut bbox: Option<BoundingBox> = None;

            while let Some((r, c)) = stack.pop() {
                if filled(r, c) {
                    let (ar, ac) = (area.start_row + r, area.start_col + c);
                    let abs = BoundingBox::new(ar, ac, ar, ac);
                    bbox = Some(bbox.map_or(abs, |b| b.union(&abs)));
                }
                for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        if dr == 0 && dc == 0 {
                            continue;
                        }
                        let nr = r as i64 + dr;
                        let nc = c as i64 + dc;
                        if nr < 0 || nc < 0 || nr >= h as i64 || nc >= w as i64 {
                            continue;
                        }
                        let (nr, nc) = (nr as usize, nc as usize);
                        if !visited[nr * w + nc] && inside(nr, nc) {
                            visited[nr * w + nc] = true;
                            stack.push((nr, nc));
                        }
                    }
                }
            }

            if let Some(b) = bbox {
                components.push(b);
            }
        }
    }

    merge_close_components(components, config)
}

/// Blank lines between two boxes along the axis that separates them most.
fn separation(a: &BoundingBox, b: &BoundingBox) -> usize {
    let gap = |a0: usize, a1: usize, b0: usize, b1: usize| {
        if b0 > a1 {
            b0 - a1 - 1
        } else if a0 > b1 {
            a0 - b1 - 1
        } else {
            0
        }
    };
    let rows = gap(a.start_row, a.end_row, b.start_row, b.end_row);
    let cols = gap(a.start_col, a.end_col, b.start_col, b.end_col);
    rows.max(cols)
}

/// Merge components whose spacing is below `mean + sigma * sd` of the
/// nearest-neighbour spacings, never at or beyond a full gap band.
fn merge_close_components(mut boxes: Vec<BoundingBox>, config: &RegionConfig) -> Vec<BoundingBox> {
    if boxes.len() < 2 {
        return boxes;
    }

    let nearest: Vec<f64> = boxes
        .iter()
        .enumerate()
        .map(|(i, a)| {
            boxes
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, b)| separation(a, b))
                .min()
                .unwrap_or(0) as f64
        })
        .collect();
    let mean = nearest.iter().sum::<f64>() / nearest.len() as f64;
    let var = nearest.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / nearest.len() as f64;
    let threshold = (mean + config.adaptive_sigma * var.sqrt()).min(config.min_gap_band as f64);
    debug!(
        "{} component(s), nearest spacing mean {mean:.2}, merge below {threshold:.2}",
        boxes.len()
    );

    loop {
        let mut merged = false;
        'outer: for i in 0..boxes.len() {
            for j in (i + 1)..boxes.len() {
                let sep = separation(&boxes[i], &boxes[j]);
                if boxes[i].overlaps(&boxes[j]) || sep == 0 || (sep as f64) < threshold {
                    let b = boxes.remove(j);
                    boxes[i] = boxes[i].union(&b);
                    merged = true;
                    break 'outer;
                }
            }
        }
        if !merged {
            break;
        }
    }
    boxes
}

/// Union overlapping boxes until every pair is disjoint.
fn merge_overlapping(boxes: &mut Vec<BoundingBox>) {
    loop {
        let mut merged = false;
        'outer: for i in 0..boxes.len() {
            for j in (i + 1)..boxes.len() {
                if boxes[i].overlaps(&boxes[j]) {
                    let b = boxes.remove(j);
                    boxes[i] = boxes[i].union(&b);
                    merged = true;
                    break 'outer;
                }
            }
        }
        if !merged {
            break;
        }
    }
}

/// `density_weight * avg local density + (1 - density_weight) * avg connectivity`.
fn region_confidence(grid: &Grid, bbox: BoundingBox, config: &RegionConfig) -> f64 {
    let density = DensityMap::new(grid, bbox);
    let mut density_sum = 0.0;
    let mut connectivity_sum = 0.0;
    let mut filled = 0usize;

    for r in bbox.start_row..=bbox.end_row {
        for c in bbox.start_col..=bbox.end_col {
            if !grid.is_filled(r, c) {
                continue;
            }
            filled += 1;
            let (lr, lc) = (r - bbox.start_row, c - bbox.start_col);
            density_sum += density.local_density(lr, lc, config.density_radius);

            let mut neighbours = 0usize;
            let mut positions = 0usize;
            for nr in r.saturating_sub(1)..=(r + 1).min(bbox.end_row) {
                for nc in c.saturating_sub(1)..=(c + 1).min(bbox.end_col) {
                    if (nr, nc) == (r, c) || !bbox.contains(nr, nc) {
                        continue;
                    }
                    positions += 1;
                    if grid.is_filled(nr, nc) {
                        neighbours += 1;
                    }
                }
            }
            if positions > 0 {
                connectivity_sum += neighbours as f64 / positions as f64;
            }
        }
    }

    if filled == 0 {
        return 0.0;
    }
    let avg_density = density_sum / filled as f64;
    let avg_connectivity = connectivity_sum / filled as f64;
    (config.density_weight * avg_density + (1.0 - config.density_weight) * avg_connectivity)
        .clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

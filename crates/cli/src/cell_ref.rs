// A1-style cell and range references

use dosegrid_detect::BoundingBox;

/// Parse `B7` into zero-based `(row, col)`.
pub fn parse_cell_ref(s: &str) -> Option<(usize, usize)> {
    let s = s.trim().trim_start_matches('$').to_uppercase();
    let mut col_str = String::new();
    let mut row_str = String::new();

    for c in s.chars() {
        if c == '$' && !col_str.is_empty() && row_str.is_empty() {
            continue;
        }
        if c.is_ascii_alphabetic() && row_str.is_empty() {
            col_str.push(c);
        } else if c.is_ascii_digit() {
            row_str.push(c);
        } else {
            return None;
        }
    }

    if col_str.is_empty() || row_str.is_empty() || col_str.len() > 3 {
        return None;
    }

    // A=1 .. Z=26, AA=27 ..
    let mut col: usize = 0;
    for c in col_str.chars() {
        col = col * 26 + (c as usize - 'A' as usize + 1);
    }

    let row: usize = row_str.parse().ok()?;
    if row == 0 {
        return None;
    }

    Some((row - 1, col - 1))
}

/// Parse a gate such as `A1:D20` (or a single cell) into a bounding box.
/// Corners may be given in either order.
pub fn parse_gate(s: &str) -> Option<BoundingBox> {
    let (start, end) = match s.split_once(':') {
        Some((a, b)) => (a, b),
        None => (s, s),
    };
    let (r1, c1) = parse_cell_ref(start)?;
    let (r2, c2) = parse_cell_ref(end)?;
    Some(BoundingBox::new(r1, c1, r2, c2))
}

//! Cell classification and the immutable grid the engine reads from.
//!
//! A raw scalar from the spreadsheet reader is classified exactly once into a
//! [`CellKind`]; every later stage matches on the kind instead of re-inspecting
//! the raw value.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::Vocabulary;

/// A cell exactly as the spreadsheet reader produced it.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    Date(NaiveDateTime),
    /// Spreadsheet error literal such as `#DIV/0!`.
    Error(String),
}

impl From<f64> for RawValue {
    fn from(n: f64) -> Self {
        RawValue::Number(n)
    }
}

impl From<i64> for RawValue {
    fn from(n: i64) -> Self {
        RawValue::Number(n as f64)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(RawValue::Empty)
    }
}

/// Classified cell content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum CellKind {
    Empty,
    Number(f64),
    Text(String),
    Date(NaiveDateTime),
    Error(String),
}

impl CellKind {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellKind::Empty)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellKind::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellKind::Text(s) => Some(s),
            _ => None,
        }
    }
}

static EMPTY_CELL: Lazy<Cell> = Lazy::new(|| Cell {
    row: usize::MAX,
    col: usize::MAX,
    raw: RawValue::Empty,
    kind: CellKind::Empty,
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    pub raw: RawValue,
    pub kind: CellKind,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

static ERROR_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(?:[A-Z0-9/]+[!?]|N/A|NULL!|GETTING_DATA)$").unwrap());

/// Leading numeric literal (sign, decimals, exponent) and an optional unit token.
static CONCENTRATION_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)\s*([A-Za-zµμ]+)?").unwrap()
});

/// A whole cell that is a number followed by a molar unit, e.g. `10 nM`.
static NUMBER_WITH_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?\s*(?:[fpnuµμm]?M)$").unwrap()
});

/// Classify a raw value into its kind.
pub fn classify(value: &RawValue) -> CellKind {
    match value {
        RawValue::Empty => CellKind::Empty,
        RawValue::Number(n) if n.is_finite() => CellKind::Number(*n),
        RawValue::Number(n) => CellKind::Error(format!("non-finite number {n}")),
        RawValue::Bool(b) => CellKind::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        RawValue::Date(d) => CellKind::Date(*d),
        RawValue::Error(e) => CellKind::Error(e.clone()),
        RawValue::Text(s) => classify_text(s),
    }
}

fn classify_text(s: &str) -> CellKind {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return CellKind::Empty;
    }
    if ERROR_LITERAL.is_match(trimmed) {
        return CellKind::Error(trimmed.to_string());
    }
    if let Some(n) = parse_decorated_number(trimmed) {
        return CellKind::Number(n);
    }
    CellKind::Text(trimmed.to_string())
}

/// Parse numbers wrapped in spreadsheet decoration: thousands separators,
/// a trailing percent sign, or a trailing molar unit.
fn parse_decorated_number(s: &str) -> Option<f64> {
    if let Ok(n) = s.parse::<f64>() {
        return n.is_finite().then_some(n);
    }

    let body = s.strip_suffix('%').unwrap_or(s).trim_end();
    let stripped = strip_thousands(body)?;
    if let Ok(n) = stripped.parse::<f64>() {
        return n.is_finite().then_some(n);
    }

    if NUMBER_WITH_UNIT.is_match(s) {
        let caps = CONCENTRATION_LITERAL.captures(s)?;
        return caps.get(1)?.as_str().parse::<f64>().ok();
    }
    None
}

/// Remove `,` separators only when they sit between digit groups of three.
fn strip_thousands(s: &str) -> Option<String> {
    if !s.contains(',') {
        return Some(s.to_string());
    }
    let (int_part, frac) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    let digits = int_part.trim_start_matches(['+', '-']);
    let mut groups = digits.split(',');
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 || !first.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    for g in groups {
        if g.len() != 3 || !g.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }
    let mut out = int_part.replace(',', "");
    if let Some(f) = frac {
        out.push('.');
        out.push_str(f);
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Concentrations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentrationInfo {
    pub value: f64,
    pub unit: String,
    pub is_valid: bool,
}

impl ConcentrationInfo {
    fn invalid(value: f64, unit: &str) -> Self {
        Self {
            value,
            unit: unit.to_string(),
            is_valid: false,
        }
    }
}

pub const DEFAULT_UNIT: &str = "nM";

/// Parse a concentration literal. Negative magnitudes are never valid.
pub fn parse_concentration(value: &RawValue) -> ConcentrationInfo {
    match value {
        RawValue::Number(n) => ConcentrationInfo {
            value: *n,
            unit: DEFAULT_UNIT.to_string(),
            is_valid: n.is_finite() && *n >= 0.0,
        },
        RawValue::Text(s) => parse_concentration_str(s),
        _ => ConcentrationInfo::invalid(f64::NAN, DEFAULT_UNIT),
    }
}

pub fn parse_concentration_str(s: &str) -> ConcentrationInfo {
    parse_with_default_unit(s, DEFAULT_UNIT)
}

fn parse_with_default_unit(s: &str, default_unit: &str) -> ConcentrationInfo {
    let Some(caps) = CONCENTRATION_LITERAL.captures(s) else {
        return ConcentrationInfo::invalid(f64::NAN, default_unit);
    };
    let unit = caps.get(2).map_or(default_unit, |m| m.as_str());
    let value = caps
        .get(1)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(f64::NAN);
    ConcentrationInfo {
        value,
        unit: unit.to_string(),
        is_valid: value.is_finite() && value >= 0.0,
    }
}

/// Concentration held by a classified cell. `default_unit` applies when the
/// cell itself names no unit (typically the unit from the axis header).
/// Only cells classified as numbers carry a concentration.
pub fn cell_concentration(cell: &Cell, default_unit: &str) -> ConcentrationInfo {
    match (&cell.kind, &cell.raw) {
        (CellKind::Number(_), RawValue::Text(s)) if has_unit_suffix(s) => {
            parse_with_default_unit(s, default_unit)
        }
        (CellKind::Number(n), _) => ConcentrationInfo {
            value: *n,
            unit: default_unit.to_string(),
            is_valid: *n >= 0.0,
        },
        _ => ConcentrationInfo::invalid(f64::NAN, default_unit),
    }
}

/// True when the cell was written as a number followed by a molar unit.
pub fn has_explicit_unit(cell: &Cell) -> bool {
    matches!(&cell.raw, RawValue::Text(s) if has_unit_suffix(s))
}

fn has_unit_suffix(s: &str) -> bool {
    NUMBER_WITH_UNIT.is_match(s.trim())
}

/// Convert to nanomolar. Unknown units use factor 1; invalid input yields NaN.
pub fn normalize(info: &ConcentrationInfo, vocabulary: &Vocabulary) -> f64 {
    if !info.is_valid {
        return f64::NAN;
    }
    info.value * vocabulary.unit_factor(&info.unit).unwrap_or(1.0)
}

static HEADER_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s\[(/_-])([fpnuµμm]?M)(?:$|[\s\])/_,.-])").unwrap()
});

/// Molar unit mentioned in a header label such as `Conc [µM]` or `Dose (nM)`.
pub fn unit_in_text(text: &str) -> Option<String> {
    HEADER_UNIT
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// Immutable, classified view of one worksheet. Rows may be jagged; cells
/// beyond a row's end read as empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    rows: Vec<Vec<Cell>>,
    width: usize,
}

impl Grid {
    pub fn from_rows<R, V>(rows: R) -> Self
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = V>,
        V: Into<RawValue>,
    {
        let rows: Vec<Vec<Cell>> = rows
            .into_iter()
            .enumerate()
            .map(|(r, row)| {
                row.into_iter()
                    .enumerate()
                    .map(|(c, v)| {
                        let raw = v.into();
                        let kind = classify(&raw);
                        Cell { row: r, col: c, raw, kind }
                    })
                    .collect()
            })
            .collect();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        Self { rows, width }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Cell at `(row, col)`, or a shared empty cell outside the stored data.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.get(row, col).unwrap_or(&EMPTY_CELL)
    }

    pub fn kind(&self, row: usize, col: usize) -> &CellKind {
        &self.cell(row, col).kind
    }

    pub fn is_filled(&self, row: usize, col: usize) -> bool {
        !self.kind(row, col).is_empty()
    }

    pub fn number(&self, row: usize, col: usize) -> Option<f64> {
        self.kind(row, col).as_number()
    }

    pub fn text(&self, row: usize, col: usize) -> Option<&str> {
        self.kind(row, col).as_text()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().flatten().all(|c| c.kind.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn text(s: &str) -> RawValue {
        RawValue::Text(s.to_string())
    }

    #[test]
    fn classify_basic_kinds() {
        assert_eq!(classify(&RawValue::Empty), CellKind::Empty);
        assert_eq!(classify(&text("   ")), CellKind::Empty);
        assert_eq!(classify(&RawValue::Number(3.5)), CellKind::Number(3.5));
        assert_eq!(classify(&text("Sample A")), CellKind::Text("Sample A".into()));
        let d = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(classify(&RawValue::Date(d)), CellKind::Date(d));
    }

    #[test]
    fn classify_decorated_numbers() {
        assert_eq!(classify(&text(" 12 ")), CellKind::Number(12.0));
        assert_eq!(classify(&text("1,000")), CellKind::Number(1000.0));
        assert_eq!(classify(&text("1,234.5")), CellKind::Number(1234.5));
        assert_eq!(classify(&text("45%")), CellKind::Number(45.0));
        assert_eq!(classify(&text("10 nM")), CellKind::Number(10.0));
        assert_eq!(classify(&text("1e-3")), CellKind::Number(0.001));
    }

    #[test]
    fn well_ids_and_labels_stay_text() {
        assert!(matches!(classify(&text("A1")), CellKind::Text(_)));
        assert!(matches!(classify(&text("S12")), CellKind::Text(_)));
        assert!(matches!(classify(&text("1,23")), CellKind::Text(_)));
        assert!(matches!(classify(&text("TCE [nM]")), CellKind::Text(_)));
    }

    #[test]
    fn classify_errors() {
        assert!(matches!(classify(&text("#DIV/0!")), CellKind::Error(_)));
        assert!(matches!(classify(&text("#N/A")), CellKind::Error(_)));
        assert!(matches!(classify(&RawValue::Number(f64::NAN)), CellKind::Error(_)));
        assert!(matches!(classify(&RawValue::Error("#REF!".into())), CellKind::Error(_)));
    }

    #[test]
    fn parse_concentration_units() {
        let info = parse_concentration(&text("2.5 µM"));
        assert!(info.is_valid);
        assert_eq!(info.value, 2.5);
        assert_eq!(info.unit, "µM");
        assert_eq!(normalize(&info, &Vocabulary::default()), 2500.0);

        let info = parse_concentration(&text("100"));
        assert_eq!(info.unit, "nM");
        assert_eq!(normalize(&info, &Vocabulary::default()), 100.0);

        let info = parse_concentration(&text("3e2pM"));
        assert!((normalize(&info, &Vocabulary::default()) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn unknown_unit_defaults_to_factor_one() {
        let info = parse_concentration(&text("7 widgets"));
        assert!(info.is_valid);
        assert_eq!(normalize(&info, &Vocabulary::default()), 7.0);
    }

    #[test]
    fn invalid_concentrations_normalize_to_nan() {
        assert!(!parse_concentration(&text("n/a")).is_valid);
        assert!(!parse_concentration(&RawValue::Empty).is_valid);
        assert!(!parse_concentration(&RawValue::Number(-1.0)).is_valid);
        let info = parse_concentration(&text("-10 nM"));
        assert!(!info.is_valid);
        assert!(normalize(&info, &Vocabulary::default()).is_nan());
    }

    #[test]
    fn zero_is_a_valid_concentration() {
        assert!(parse_concentration(&RawValue::Number(0.0)).is_valid);
        assert!(parse_concentration(&text("0 nM")).is_valid);
    }

    #[test]
    fn cell_concentration_inherits_default_unit() {
        let grid = Grid::from_rows(vec![vec![
            RawValue::from(2.0),
            RawValue::from("5 nM"),
            RawValue::from("1,000"),
            RawValue::from("n/a"),
        ]]);
        let vocab = Vocabulary::default();
        let header_unit = "µM";
        assert_eq!(normalize(&cell_concentration(grid.cell(0, 0), header_unit), &vocab), 2000.0);
        assert_eq!(normalize(&cell_concentration(grid.cell(0, 1), header_unit), &vocab), 5.0);
        assert_eq!(
            normalize(&cell_concentration(grid.cell(0, 2), header_unit), &vocab),
            1_000_000.0
        );
        assert!(!cell_concentration(grid.cell(0, 3), header_unit).is_valid);
        assert!(has_explicit_unit(grid.cell(0, 1)));
        assert!(!has_explicit_unit(grid.cell(0, 0)));
        assert!(!has_explicit_unit(grid.cell(0, 2)));
    }

    #[test]
    fn header_units() {
        assert_eq!(unit_in_text("TCE [nM]").as_deref(), Some("nM"));
        assert_eq!(unit_in_text("Conc (µM)").as_deref(), Some("µM"));
        assert_eq!(unit_in_text("Dose mM").as_deref(), Some("mM"));
        assert_eq!(unit_in_text("Sample A"), None);
        assert_eq!(unit_in_text("Compound"), None);
    }

    #[test]
    fn grid_is_jagged_tolerant() {
        let grid = Grid::from_rows(vec![
            vec![RawValue::from("a"), RawValue::from(1.0)],
            vec![RawValue::from(2.0)],
        ]);
        assert_eq!(grid.height(), 2);
        assert_eq!(grid.width(), 2);
        assert_eq!(grid.number(0, 1), Some(1.0));
        assert!(!grid.is_filled(1, 1));
        assert!(!grid.is_filled(10, 10));
        assert_eq!(grid.text(0, 0), Some("a"));
        assert_eq!(grid.cell(1, 0).row, 1);
    }

    #[test]
    fn empty_grid() {
        let grid = Grid::from_rows(Vec::<Vec<RawValue>>::new());
        assert!(grid.is_empty());
        assert_eq!(grid.width(), 0);
    }

    proptest! {
        #[test]
        fn unit_conversion_round_trip(
            x in 1e-6f64..1e6,
            unit in prop::sample::select(vec!["M", "mM", "μM", "nM", "pM"]),
        ) {
            let vocab = Vocabulary::default();
            let factor = vocab.unit_factor(unit).unwrap();
            let info = parse_concentration(&RawValue::Text(format!("{x} {unit}")));
            prop_assert!(info.is_valid);
            let got = normalize(&info, &vocab);
            let want = x * factor;
            prop_assert!((got - want).abs() <= want.abs() * 1e-12);
        }

        #[test]
        fn negative_magnitudes_rejected(x in 1e-6f64..1e6) {
            let info = parse_concentration(&RawValue::Text(format!("-{x} nM")));
            prop_assert!(!info.is_valid);
            prop_assert!(!parse_concentration(&RawValue::Number(-x)).is_valid);
        }
    }
}

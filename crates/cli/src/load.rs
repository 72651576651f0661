//! Spreadsheet readers: turn a file on disk into the raw grid the detector
//! consumes. CSV/TSV go through `csv` with delimiter sniffing, workbooks
//! through `calamine`.

use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use dosegrid_detect::{Grid, RawValue};

use crate::CliError;

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// A loaded sheet plus the name it was read from (workbooks only).
pub struct LoadedSheet {
    pub grid: Grid,
    pub sheet_name: Option<String>,
}

pub fn load(path: &Path, sheet: Option<&str>) -> Result<LoadedSheet, CliError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if WORKBOOK_EXTENSIONS.contains(&ext.as_str()) {
        return load_workbook(path, sheet);
    }
    if sheet.is_some() {
        return Err(CliError::args("--sheet only applies to workbook files")
            .with_hint("CSV and TSV files hold a single sheet"));
    }

    let content = read_file_as_utf8(path)?;
    let delimiter = if ext == "tsv" || ext == "tab" {
        b'\t'
    } else {
        sniff_delimiter(&content)
    };
    let rows = parse_delimited(&content, delimiter)?;
    log::debug!(
        "read {} row(s) from {} (delimiter {:?})",
        rows.len(),
        path.display(),
        delimiter as char
    );
    Ok(LoadedSheet {
        grid: Grid::from_rows(rows),
        sheet_name: None,
    })
}

// ---------------------------------------------------------------------------
// CSV / TSV
// ---------------------------------------------------------------------------

/// Pick the delimiter that splits the first lines into the most consistent
/// number of fields. Ties go to the wider split.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample: Vec<&str> = content.lines().take(10).collect();

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let Some(&target) = counts.first() else {
            continue;
        };
        if target <= 1 {
            continue;
        }
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Read a text file, falling back to Windows-1252 when it is not valid UTF-8
/// (common for CSVs exported by Excel on Windows).
fn read_file_as_utf8(path: &Path) -> Result<String, CliError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| CliError::io(format!("cannot open {}: {}", path.display(), e)))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| CliError::io(format!("cannot read {}: {}", path.display(), e)))?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s.trim_start_matches('\u{feff}').to_string()),
        Err(e) => {
            log::debug!("{} is not UTF-8, decoding as Windows-1252", path.display());
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(e.as_bytes());
            Ok(decoded.into_owned())
        }
    }
}

fn parse_delimited(content: &str, delimiter: u8) -> Result<Vec<Vec<RawValue>>, CliError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| CliError::parse(e.to_string()))?;
        rows.push(
            record
                .iter()
                .map(|field| {
                    if field.trim().is_empty() {
                        RawValue::Empty
                    } else {
                        RawValue::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Workbooks
// ---------------------------------------------------------------------------

fn load_workbook(path: &Path, sheet: Option<&str>) -> Result<LoadedSheet, CliError> {
    if !path.exists() {
        return Err(CliError::io(format!("{}: no such file", path.display())));
    }
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| CliError::parse(format!("failed to open workbook: {}", e)))?;

    let names: Vec<String> = workbook.sheet_names().to_vec();
    let name = match sheet {
        Some(wanted) => names
            .iter()
            .find(|n| n.as_str() == wanted)
            .or_else(|| names.iter().find(|n| n.eq_ignore_ascii_case(wanted)))
            .cloned()
            .ok_or_else(|| {
                CliError::args(format!("sheet '{}' not found", wanted))
                    .with_hint(format!("available sheets: {}", names.join(", ")))
            })?,
        None => names
            .first()
            .cloned()
            .ok_or_else(|| CliError::parse("workbook contains no sheets"))?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| CliError::parse(format!("failed to read sheet '{}': {}", name, e)))?;

    // The range starts at its first used cell; pad so grid coordinates match A1 refs.
    let (row_offset, col_offset) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut rows: Vec<Vec<RawValue>> = vec![Vec::new(); row_offset];
    for row in range.rows() {
        let mut out = vec![RawValue::Empty; col_offset];
        out.extend(row.iter().map(raw_from_data));
        rows.push(out);
    }
    log::debug!("read {} row(s) from sheet '{}'", rows.len(), name);

    Ok(LoadedSheet {
        grid: Grid::from_rows(rows),
        sheet_name: Some(name),
    })
}

fn raw_from_data(cell: &Data) -> RawValue {
    match cell {
        Data::Empty => RawValue::Empty,
        Data::String(s) => RawValue::Text(s.clone()),
        Data::Float(n) => RawValue::Number(*n),
        Data::Int(n) => RawValue::Number(*n as f64),
        Data::Bool(b) => RawValue::Bool(*b),
        Data::Error(e) => RawValue::Error(e.to_string()),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
            .map(RawValue::Date)
            .unwrap_or(RawValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .map(RawValue::Date)
            .unwrap_or_else(|_| RawValue::Text(s.clone())),
        Data::DurationIso(s) => RawValue::Text(s.clone()),
    }
}

/// Convert a 1900-system Excel serial to a datetime. Serial 1 is 1900-01-01;
/// the epoch sits at 1899-12-30 to absorb Excel's phantom 1900-02-29.
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_semicolon_with_decimal_commas() {
        let content = "Conc;Signal\n100;1,5\n10;2,5\n";
        assert_eq!(sniff_delimiter(content), b';');
    }

    #[test]
    fn sniffs_tab_and_comma() {
        assert_eq!(sniff_delimiter("a\tb\tc\n1\t2\t3\n"), b'\t');
        assert_eq!(sniff_delimiter("a,b\n1,2\n"), b',');
        assert_eq!(sniff_delimiter(""), b',');
    }

    #[test]
    fn blank_fields_become_empty() {
        let rows = parse_delimited("Dose,A\n10, \n1,5\n", b',').unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][1], RawValue::Empty);
        assert_eq!(rows[2][0], RawValue::Text("1".into()));
    }

    #[test]
    fn excel_serials_map_to_dates() {
        let dt = excel_serial_to_datetime(45292.5).unwrap();
        assert_eq!(dt.to_string(), "2024-01-01 12:00:00");
        assert_eq!(excel_serial_to_datetime(-1.0), None);
    }

    #[test]
    fn workbook_cells_map_to_raw_values() {
        assert_eq!(raw_from_data(&Data::Int(3)), RawValue::Number(3.0));
        assert_eq!(raw_from_data(&Data::Bool(true)), RawValue::Bool(true));
        assert_eq!(
            raw_from_data(&Data::String("TCE [nM]".into())),
            RawValue::Text("TCE [nM]".into())
        );
        assert_eq!(raw_from_data(&Data::Empty), RawValue::Empty);
    }

    #[test]
    fn windows_1252_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin.csv");
        // "Dose (µM)" with µ as 0xB5
        std::fs::write(&path, b"Dose (\xb5M),A\n10,1\n").unwrap();
        let text = read_file_as_utf8(&path).unwrap();
        assert!(text.starts_with("Dose (\u{b5}M)"));
    }
}

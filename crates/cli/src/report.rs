// Human-readable and JSON rendering of a detection result

use std::io::{self, Write};

use dosegrid_detect::model::{column_letters, Orientation, Severity};
use dosegrid_detect::{DataPoint, DatasetCandidate, DetectionResult};
use serde::Serialize;

/// Everything printed for one run. `points` is parallel to `result.candidates`.
pub struct Report<'a> {
    pub file: &'a str,
    pub sheet: Option<&'a str>,
    pub result: &'a DetectionResult,
    pub points: Option<Vec<Vec<DataPoint>>>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    file: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sheet: Option<&'a str>,
    candidate_count: usize,
    #[serde(flatten)]
    result: &'a DetectionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    points: Option<&'a [Vec<DataPoint>]>,
}

pub fn to_json(report: &Report<'_>) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport {
        file: report.file,
        sheet: report.sheet,
        candidate_count: report.result.candidates.len(),
        result: report.result,
        points: report.points.as_deref(),
    })
}

pub fn write_text(out: &mut impl Write, report: &Report<'_>) -> io::Result<()> {
    let result = report.result;
    match report.sheet {
        Some(sheet) => write!(out, "{} [{}]", report.file, sheet)?,
        None => write!(out, "{}", report.file)?,
    }
    writeln!(
        out,
        ": {} candidate(s) in {} region(s)",
        result.candidates.len(),
        result.regions.len()
    )?;

    for issue in &result.issues {
        write_issue(out, "  ", issue.severity, &issue.message, issue.suggestion.as_deref())?;
    }

    for (i, candidate) in result.candidates.iter().enumerate() {
        writeln!(out)?;
        write_candidate(out, i + 1, candidate)?;
        if let Some(points) = report.points.as_ref().and_then(|p| p.get(i)) {
            write_points(out, points)?;
        }
    }

    if !result.rejections.is_empty() {
        writeln!(out)?;
        writeln!(out, "rejected:")?;
        for r in &result.rejections {
            writeln!(
                out,
                "  {}  {}  ({} sample(s), {} concentration(s)) {}",
                r.bounding_box, r.reason, r.sample_count, r.concentration_count, r.message
            )?;
        }
    }
    Ok(())
}

fn write_candidate(out: &mut impl Write, rank: usize, c: &DatasetCandidate) -> io::Result<()> {
    writeln!(
        out,
        "#{}  {}  {}  confidence {:.2}",
        rank, c.bounding_box, c.orientation, c.confidence
    )?;

    if let Some(axis) = c.concentration_axis {
        let header = c
            .header_line
            .map(|h| format!(" (header {})", line_name(header_orientation(c.orientation), h)))
            .unwrap_or_default();
        writeln!(
            out,
            "    concentrations: {}{}, {} point(s)",
            line_name(c.orientation, axis.index),
            header,
            c.concentration_count()
        )?;
    }
    if !c.response_axes.is_empty() {
        let names: Vec<String> = c
            .response_axes
            .iter()
            .map(|&a| short_name(c.orientation, a))
            .collect();
        writeln!(out, "    responses: {}", names.join(", "))?;
    }
    if let Some(p) = &c.dilution_pattern {
        let factor = p.factor.map(|f| format!(" x{:.2}", f)).unwrap_or_default();
        writeln!(
            out,
            "    dilution: {}{} (confidence {:.2}), {} - {} nM",
            p.kind, factor, p.confidence, p.range.min, p.range.max
        )?;
    }
    if let Some(seg) = &c.segment {
        let label = seg.label.as_deref().map(|l| format!(" '{}'", l)).unwrap_or_default();
        writeln!(
            out,
            "    segment{} of {}: {} (biological confidence {:.2})",
            label, seg.parent_box, seg.strategy, seg.biological_confidence
        )?;
    }
    for issue in &c.issues {
        write_issue(out, "    ", issue.severity, &issue.message, issue.suggestion.as_deref())?;
    }
    Ok(())
}

fn write_points(out: &mut impl Write, points: &[DataPoint]) -> io::Result<()> {
    for p in points {
        let values: Vec<String> = p
            .responses
            .iter()
            .map(|r| r.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()))
            .collect();
        writeln!(out, "      {:>12}  {}", p.concentration_nm, values.join("  "))?;
    }
    Ok(())
}

fn write_issue(
    out: &mut impl Write,
    indent: &str,
    severity: Severity,
    message: &str,
    suggestion: Option<&str>,
) -> io::Result<()> {
    writeln!(out, "{}{}: {}", indent, severity, message)?;
    if let Some(s) = suggestion {
        writeln!(out, "{}  hint: {}", indent, s)?;
    }
    Ok(())
}

fn header_orientation(orientation: Orientation) -> Orientation {
    match orientation {
        Orientation::Vertical => Orientation::Horizontal,
        Orientation::Horizontal => Orientation::Vertical,
    }
}

/// `column B` for a vertical axis, `row 2` for a horizontal one.
fn line_name(orientation: Orientation, index: usize) -> String {
    match orientation {
        Orientation::Vertical => format!("column {}", column_letters(index)),
        Orientation::Horizontal => format!("row {}", index + 1),
    }
}

fn short_name(orientation: Orientation, index: usize) -> String {
    match orientation {
        Orientation::Vertical => column_letters(index),
        Orientation::Horizontal => (index + 1).to_string(),
    }
}

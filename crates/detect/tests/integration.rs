use dosegrid_detect::model::{
    DilutionType, Orientation, RejectionReason, SegmentStrategy, Severity,
};
use dosegrid_detect::trace::TraceEvent;
use dosegrid_detect::{
    analyze, analyze_gate, analyze_traced, extract_points, BoundingBox, DetectConfig, Grid,
    RawValue,
};
use proptest::prelude::*;

fn text(s: &str) -> RawValue {
    RawValue::from(s)
}

fn num(n: f64) -> RawValue {
    RawValue::from(n)
}

fn tce_rows() -> Vec<Vec<RawValue>> {
    vec![
        vec![text("TCE [nM]"), text("Sample A"), text("Sample B"), text("Sample C")],
        vec![num(100.0), num(90.0), num(85.0), num(88.0)],
        vec![num(10.0), num(70.0), num(65.0), num(72.0)],
        vec![num(1.0), num(30.0), num(25.0), num(35.0)],
        vec![num(0.1), num(10.0), num(8.0), num(12.0)],
    ]
}

/// 51 samples as rows, 10 three-fold concentrations across the first row.
fn wide_plate() -> Grid {
    let mut header = vec![text("Compound (nM)")];
    header.extend((0..10).map(|k| num(10_000.0 / 3f64.powi(k))));
    let mut rows = vec![header];
    for s in 0..51 {
        let mut row = vec![RawValue::from(format!("S{}", s + 1))];
        row.extend((0..10).map(|k| num(100.0 - 9.0 * k as f64 + (s % 3) as f64 * 0.5)));
        rows.push(row);
    }
    Grid::from_rows(rows)
}

// -------------------------------------------------------------------------
// End-to-end
// -------------------------------------------------------------------------

#[test]
fn tce_block_end_to_end() {
    let grid = Grid::from_rows(tce_rows());
    let result = analyze(&grid, &DetectConfig::default());

    assert_eq!(result.candidates.len(), 1);
    let c = result.best().unwrap();
    assert_eq!(c.orientation, Orientation::Vertical);
    assert_eq!(c.concentration_axis.map(|a| a.index), Some(0));
    assert_eq!(c.response_axes, vec![1, 2, 3]);
    assert_eq!(c.header_line, Some(0));
    assert_eq!(
        c.dilution_pattern.as_ref().map(|p| p.kind),
        Some(DilutionType::LogScale)
    );
    assert!(c.confidence > 0.7, "confidence {}", c.confidence);
    assert!(!result.has_errors());
    assert_eq!(result.regions.len(), 1);
}

#[test]
fn extracted_points_follow_the_candidate() {
    let grid = Grid::from_rows(tce_rows());
    let config = DetectConfig::default();
    let result = analyze(&grid, &config);
    let points = extract_points(&grid, result.best().unwrap(), &config.vocabulary);

    let concentrations: Vec<f64> = points.iter().map(|p| p.concentration_nm).collect();
    assert_eq!(concentrations, vec![100.0, 10.0, 1.0, 0.1]);
    assert_eq!(points[0].responses, vec![Some(90.0), Some(85.0), Some(88.0)]);
    assert_eq!(points[3].source_index, 4);
}

// -------------------------------------------------------------------------
// Regions
// -------------------------------------------------------------------------

fn two_block_rows() -> Vec<Vec<RawValue>> {
    let mut rows = tce_rows();
    rows.push(vec![RawValue::Empty; 4]);
    rows.push(vec![RawValue::Empty; 4]);
    rows.extend(vec![
        vec![text("Dose (µM)"), text("Rep 1"), text("Rep 2"), RawValue::Empty],
        vec![num(10.0), num(95.0), num(92.0), RawValue::Empty],
        vec![num(1.0), num(80.0), num(78.0), RawValue::Empty],
        vec![num(0.1), num(40.0), num(45.0), RawValue::Empty],
        vec![num(0.01), num(10.0), num(12.0), RawValue::Empty],
    ]);
    rows
}

#[test]
fn blocks_split_by_empty_rows() {
    let grid = Grid::from_rows(two_block_rows());
    let result = analyze(&grid, &DetectConfig::default());

    assert_eq!(result.regions.len(), 2);
    let a = result.regions[0].bounding_box;
    let b = result.regions[1].bounding_box;
    assert!(!a.overlaps(&b));
    for region in &result.regions {
        let bbox = region.bounding_box;
        assert!(!bbox.contains(5, 0) && !bbox.contains(6, 0));
    }
    assert_eq!(a, BoundingBox::new(0, 0, 4, 3));
    assert_eq!(b, BoundingBox::new(7, 0, 11, 2));

    assert_eq!(result.candidates.len(), 2);
    for c in &result.candidates {
        assert_eq!(c.concentration_axis.map(|a| a.index), Some(0));
        assert_eq!(
            c.dilution_pattern.as_ref().map(|p| p.kind),
            Some(DilutionType::LogScale)
        );
    }
}

#[test]
fn narrow_block_above_wide_block_is_kept() {
    let mut rows: Vec<Vec<RawValue>> = tce_rows()
        .into_iter()
        .map(|mut row| {
            row.resize(20, RawValue::Empty);
            row
        })
        .collect();
    rows.push(vec![RawValue::Empty; 20]);
    rows.push(vec![RawValue::Empty; 20]);
    let mut header = vec![text("Dose (nM)")];
    header.extend((1..20).map(|k| RawValue::from(format!("R{k}"))));
    rows.push(header);
    for k in 0..6 {
        let mut row = vec![num(1000.0 / 3f64.powi(k))];
        row.extend((0..19).map(|s| num(95.0 - 12.0 * k as f64 + s as f64 * 0.1)));
        rows.push(row);
    }
    let grid = Grid::from_rows(rows);
    let mut config = DetectConfig::default();
    config.biology.segmentation_enabled = false;
    let result = analyze(&grid, &config);

    assert_eq!(result.regions.len(), 2);
    assert_eq!(result.regions[0].bounding_box, BoundingBox::new(0, 0, 4, 3));
    assert_eq!(result.regions[1].bounding_box, BoundingBox::new(7, 0, 13, 19));
    assert!(result
        .candidates
        .iter()
        .any(|c| c.bounding_box == BoundingBox::new(0, 0, 4, 3)
            && c.concentration_axis.map(|a| a.index) == Some(0)));
}

#[test]
fn gate_overrides_segmentation() {
    let grid = Grid::from_rows(two_block_rows());
    let result = analyze_gate(&grid, BoundingBox::new(7, 0, 11, 2), &DetectConfig::default());
    assert!(result.regions.is_empty());
    assert_eq!(result.candidates.len(), 1);
    let c = &result.candidates[0];
    assert_eq!(c.response_axes, vec![1, 2]);
    let pattern = c.dilution_pattern.as_ref().unwrap();
    // µM header: 10 µM is 10 000 nM.
    assert_eq!(pattern.range.max, 10_000.0);
}

// -------------------------------------------------------------------------
// Biological segmentation
// -------------------------------------------------------------------------

#[test]
fn oversized_plate_is_segmented() {
    let grid = wide_plate();
    let result = analyze(&grid, &DetectConfig::default());

    let oversized: Vec<_> = result
        .rejections
        .iter()
        .filter(|r| r.reason == RejectionReason::Oversized)
        .collect();
    assert_eq!(oversized.len(), 1);
    assert_eq!(oversized[0].sample_count, 51);
    assert_eq!(oversized[0].concentration_count, 10);

    assert!(result.candidates.len() >= 5);
    for c in &result.candidates {
        assert_eq!(c.orientation, Orientation::Horizontal);
        assert!(c.sample_count() <= 8);
        let info = c.segment.as_ref().unwrap();
        assert_eq!(info.strategy, SegmentStrategy::OnePerSample);
        assert_eq!(info.concentration_count, 10);
    }
    for (i, a) in result.candidates.iter().enumerate() {
        for b in &result.candidates[i + 1..] {
            assert!(!a.bounding_box.overlaps(&b.bounding_box));
        }
    }
}

#[test]
fn segmentation_can_be_disabled() {
    let grid = wide_plate();
    let mut config = DetectConfig::default();
    config.biology.segmentation_enabled = false;
    let result = analyze(&grid, &config);

    assert_eq!(result.candidates.len(), 1);
    let c = &result.candidates[0];
    assert!(c.segment.is_none());
    assert_eq!(c.response_axes.len(), config.layout.max_response_axes);
    assert!(c
        .issues
        .iter()
        .any(|i| i.severity == Severity::Info && i.message.contains("39 response")));
}

// -------------------------------------------------------------------------
// Config + tracing
// -------------------------------------------------------------------------

#[test]
fn alternate_vocabulary_raises_header_score() {
    let rows = vec![
        vec![text("Konzentration"), text("Antwort 1"), text("Antwort 2")],
        vec![num(900.0), num(95.0), num(93.0)],
        vec![num(300.0), num(80.0), num(82.0)],
        vec![num(100.0), num(50.0), num(55.0)],
        vec![num(33.3), num(20.0), num(22.0)],
    ];
    let grid = Grid::from_rows(rows);
    let german = DetectConfig::from_toml(
        r#"
[vocabulary]
concentration_keywords = ["konzentration"]
response_keywords = ["antwort"]
"#,
    )
    .unwrap();

    let default_result = analyze(&grid, &DetectConfig::default());
    let german_result = analyze(&grid, &german);
    let d = default_result.best().unwrap();
    let g = german_result.best().unwrap();
    assert_eq!(g.concentration_axis.map(|a| a.index), Some(0));
    assert!(g.scores.header > d.scores.header);
    assert!(g.confidence > d.confidence);
}

#[test]
fn trace_reports_checkpoints() {
    let grid = Grid::from_rows(two_block_rows());
    let mut events: Vec<TraceEvent> = Vec::new();
    let result = analyze_traced(&grid, &DetectConfig::default(), &mut events);

    let regions = events
        .iter()
        .filter(|e| matches!(e, TraceEvent::RegionFound { .. }))
        .count();
    let accepted = events
        .iter()
        .filter(|e| matches!(e, TraceEvent::CandidateAccepted { .. }))
        .count();
    let chosen = events
        .iter()
        .filter(|e| matches!(e, TraceEvent::OrientationChosen { .. }))
        .count();
    assert_eq!(regions, 2);
    assert_eq!(chosen, 2);
    assert_eq!(accepted, result.candidates.len());
}

// -------------------------------------------------------------------------
// Idempotence
// -------------------------------------------------------------------------

#[test]
fn repeated_analysis_is_identical() {
    let grid = wide_plate();
    let config = DetectConfig::default();
    let first = analyze(&grid, &config);
    let second = analyze(&grid, &config);
    assert_eq!(first, second);
}

fn cell_value() -> impl Strategy<Value = RawValue> {
    prop_oneof![
        3 => Just(RawValue::Empty),
        4 => (1e-3f64..1e6).prop_map(RawValue::Number),
        2 => "[A-Za-z]{1,6}( [A-Z])?".prop_map(RawValue::Text),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn analysis_is_idempotent(
        rows in prop::collection::vec(prop::collection::vec(cell_value(), 1..7), 1..10)
    ) {
        let grid = Grid::from_rows(rows);
        let config = DetectConfig::default();
        let first = analyze(&grid, &config);
        let second = analyze(&grid, &config);
        prop_assert_eq!(format!("{first:?}"), format!("{second:?}"));
        let bits = |r: &dosegrid_detect::DetectionResult| -> Vec<u64> {
            r.candidates.iter().map(|c| c.confidence.to_bits()).collect()
        };
        prop_assert_eq!(bits(&first), bits(&second));
        for c in &first.candidates {
            prop_assert!((0.0..=1.0).contains(&c.confidence));
        }
    }
}

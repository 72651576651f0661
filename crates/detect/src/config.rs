use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DetectError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Immutable configuration handed to every analysis call.
///
/// All tuning constants live here with their empirically chosen defaults, so
/// callers can swap vocabularies (e.g. non-English headers) or tighten the
/// biological limits without touching the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectConfig {
    pub vocabulary: Vocabulary,
    pub region: RegionConfig,
    pub dilution: DilutionConfig,
    pub layout: LayoutConfig,
    pub biology: BiologyConfig,
    pub validation: ValidationConfig,
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Vocabulary {
    /// Header words announcing a concentration axis. Matched as word prefixes.
    pub concentration_keywords: Vec<String>,
    /// Header words announcing a response axis. Matched as word prefixes.
    pub response_keywords: Vec<String>,
    /// Unit symbol → nanomolar multiplier.
    pub units: BTreeMap<String, f64>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        let units = [
            ("M", 1e9),
            ("mM", 1e6),
            ("μM", 1e3),
            ("µM", 1e3),
            ("uM", 1e3),
            ("nM", 1.0),
            ("pM", 1e-3),
            ("fM", 1e-6),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            concentration_keywords: words(&[
                "conc",
                "dose",
                "dilution",
                "titration",
                "compound",
                "drug",
                "inhibitor",
                "agonist",
                "antagonist",
                "ligand",
                "molar",
            ]),
            response_keywords: words(&[
                "response",
                "signal",
                "inhibition",
                "activity",
                "viability",
                "effect",
                "readout",
                "absorbance",
                "fluorescence",
                "luminescence",
                "intensity",
                "normalized",
                "rep",
                "sample",
                "well",
                "%",
            ]),
            units,
        }
    }
}

impl Vocabulary {
    pub fn has_concentration_keyword(&self, text: &str) -> bool {
        self.concentration_keywords
            .iter()
            .any(|kw| keyword_matches(text, kw))
    }

    /// Number of distinct response keywords present in `text`.
    pub fn response_keyword_count(&self, text: &str) -> usize {
        self.response_keywords
            .iter()
            .filter(|kw| keyword_matches(text, kw))
            .count()
    }

    /// Multiplier to nanomolar for a unit symbol. Exact match first, then case-insensitive.
    pub fn unit_factor(&self, unit: &str) -> Option<f64> {
        if let Some(f) = self.units.get(unit) {
            return Some(*f);
        }
        // "m" and "M" differ only in case for milli vs molar, so only fall back
        // when the lowercase form is unambiguous.
        let matches: Vec<f64> = self
            .units
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(unit))
            .map(|(_, v)| *v)
            .collect();
        match matches.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}

/// Alphanumeric keywords match the start of any word; anything else matches as a substring.
fn keyword_matches(text: &str, keyword: &str) -> bool {
    let kw = keyword.to_lowercase();
    if kw.is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    if kw.chars().all(char::is_alphanumeric) {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word.starts_with(&kw))
    } else {
        lower.contains(&kw)
    }
}

// ---------------------------------------------------------------------------
// Stage configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegionConfig {
    /// A row/column is a gap line when at least this fraction of it is empty.
    pub gap_emptiness: f64,
    /// Consecutive gap lines needed to form a separating band.
    pub min_gap_band: usize,
    pub min_rows: usize,
    pub min_cols: usize,
    /// Half-width of the local density window used by the flood fill.
    pub density_radius: usize,
    /// An empty cell with at least this local density is still part of its region.
    pub density_threshold: f64,
    /// Sigma multiplier of the adaptive component-merge threshold.
    pub adaptive_sigma: f64,
    /// Weight of local density in region confidence; connectivity gets the rest.
    pub density_weight: f64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            gap_emptiness: 0.8,
            min_gap_band: 2,
            min_rows: 3,
            min_cols: 2,
            density_radius: 2,
            density_threshold: 0.3,
            adaptive_sigma: 1.5,
            density_weight: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DilutionConfig {
    /// Relative tolerance when comparing the mean ratio with a canonical factor.
    pub canonical_tolerance: f64,
    /// Ratio CV above which no canonical factor is claimed.
    pub canonical_max_cv: f64,
    /// Allowed distance of the mean log10 ratio from 1.0.
    pub log_spacing_tolerance: f64,
    /// Orders of magnitude needed before log spacing is tested.
    pub log_spacing_min_orders: f64,
    pub custom_max_cv: f64,
    /// CV above which "high ratio variation" is reported.
    pub high_variation_cv: f64,
    pub missing_point_tolerance: f64,
    /// Mean ratio at or below which the series is not a dilution at all.
    pub min_dilution_ratio: f64,
    pub irregular_confidence: f64,
}

impl Default for DilutionConfig {
    fn default() -> Self {
        Self {
            canonical_tolerance: 0.15,
            canonical_max_cv: 0.3,
            log_spacing_tolerance: 0.2,
            log_spacing_min_orders: 2.0,
            custom_max_cv: 0.3,
            high_variation_cv: 0.2,
            missing_point_tolerance: 0.15,
            min_dilution_ratio: 1.05,
            irregular_confidence: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeaderWeights {
    pub text_cell: f64,
    pub concentration_keyword: f64,
    pub response_keyword: f64,
    pub numeric_majority_penalty: f64,
    pub row_index_penalty: f64,
    /// Raw score that maps to a normalized header score of 1.0.
    pub normalizer: f64,
}

impl Default for HeaderWeights {
    fn default() -> Self {
        Self {
            text_cell: 2.0,
            concentration_keyword: 10.0,
            response_keyword: 3.0,
            numeric_majority_penalty: 5.0,
            row_index_penalty: 0.5,
            normalizer: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AxisWeights {
    pub pattern_confidence: f64,
    pub keyword: f64,
    pub explicit_unit: f64,
    pub numeric_row: f64,
    pub first_line: f64,
    pub recognized_pattern: f64,
    pub consistency: f64,
}

impl Default for AxisWeights {
    fn default() -> Self {
        Self {
            pattern_confidence: 20.0,
            keyword: 8.0,
            explicit_unit: 6.0,
            numeric_row: 0.5,
            first_line: 3.0,
            recognized_pattern: 10.0,
            consistency: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResponseWeights {
    pub keyword: f64,
    pub sample_pattern: f64,
    pub fill: f64,
    /// Axes scoring below this are not responses.
    pub min_score: f64,
}

impl Default for ResponseWeights {
    fn default() -> Self {
        Self {
            keyword: 10.0,
            sample_pattern: 8.0,
            fill: 10.0,
            min_score: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    /// Leading lines of a block considered as header candidates.
    pub header_scan_rows: usize,
    pub max_response_axes: usize,
    /// Multiplier applied to the horizontal orientation's score.
    pub horizontal_preference: f64,
    pub header: HeaderWeights,
    pub axis: AxisWeights,
    pub response: ResponseWeights,
    /// Weights of header / concentration / response / layout in the combined confidence.
    pub combine: [f64; 4],
    /// Share of the concentration term taken by the axis score; the pattern confidence gets the rest.
    pub concentration_split: f64,
    /// Weights of confidence / consistency / density / log range in the orientation score.
    pub orientation: [f64; 4],
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            header_scan_rows: 10,
            max_response_axes: 12,
            horizontal_preference: 1.1,
            header: HeaderWeights::default(),
            axis: AxisWeights::default(),
            response: ResponseWeights::default(),
            combine: [0.3, 0.4, 0.2, 0.1],
            concentration_split: 0.6,
            orientation: [0.5, 0.2, 0.2, 0.1],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BiologyConfig {
    pub segmentation_enabled: bool,
    pub max_samples: usize,
    pub max_concentrations: usize,
    pub min_concentrations: usize,
    /// Concentration counts that earn full biological confidence.
    pub ideal_min_concentrations: usize,
    pub ideal_max_concentrations: usize,
    /// Segments below this biological confidence are dropped by the segmenter.
    pub min_segment_confidence: f64,
    /// Global floor applied to segments by the orchestrator.
    pub quality_threshold: f64,
    pub min_replicates: usize,
    pub max_replicates: usize,
    /// Orientation score gap under which a block counts as ambiguous.
    pub ambiguity_margin: f64,
}

impl Default for BiologyConfig {
    fn default() -> Self {
        Self {
            segmentation_enabled: true,
            max_samples: 8,
            max_concentrations: 15,
            min_concentrations: 6,
            ideal_min_concentrations: 8,
            ideal_max_concentrations: 12,
            min_segment_confidence: 0.3,
            quality_threshold: 0.5,
            min_replicates: 2,
            max_replicates: 4,
            ambiguity_margin: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    pub min_data_rows: usize,
    pub low_pattern_confidence: f64,
    pub min_orders: f64,
    pub max_orders: f64,
    pub missing_axis_penalty: f64,
    pub few_rows_penalty: f64,
    pub low_pattern_penalty: f64,
    pub irregular_penalty: f64,
    pub range_penalty: f64,
    pub missing_values_penalty: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_data_rows: 3,
            low_pattern_confidence: 0.5,
            min_orders: 2.0,
            max_orders: 6.0,
            missing_axis_penalty: 0.3,
            few_rows_penalty: 0.8,
            low_pattern_penalty: 0.9,
            irregular_penalty: 0.8,
            range_penalty: 0.95,
            missing_values_penalty: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub max_candidates: usize,
    /// A candidate covered by a better one beyond this fraction of its own area is dropped.
    pub overlap_threshold: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_candidates: 12,
            overlap_threshold: 0.7,
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl DetectConfig {
    pub fn from_toml(input: &str) -> Result<Self, DetectError> {
        let config: DetectConfig =
            toml::from_str(input).map_err(|e| DetectError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, DetectError> {
        toml::to_string_pretty(self).map_err(|e| DetectError::ConfigParse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), DetectError> {
        let fractions = [
            ("region.gap_emptiness", self.region.gap_emptiness),
            ("region.density_threshold", self.region.density_threshold),
            ("region.density_weight", self.region.density_weight),
            ("layout.concentration_split", self.layout.concentration_split),
            ("dilution.canonical_tolerance", self.dilution.canonical_tolerance),
            ("dilution.missing_point_tolerance", self.dilution.missing_point_tolerance),
            ("dilution.irregular_confidence", self.dilution.irregular_confidence),
            ("biology.min_segment_confidence", self.biology.min_segment_confidence),
            ("biology.quality_threshold", self.biology.quality_threshold),
            ("validation.low_pattern_confidence", self.validation.low_pattern_confidence),
            ("validation.missing_axis_penalty", self.validation.missing_axis_penalty),
            ("validation.few_rows_penalty", self.validation.few_rows_penalty),
            ("validation.low_pattern_penalty", self.validation.low_pattern_penalty),
            ("validation.irregular_penalty", self.validation.irregular_penalty),
            ("validation.range_penalty", self.validation.range_penalty),
            ("validation.missing_values_penalty", self.validation.missing_values_penalty),
            ("output.overlap_threshold", self.output.overlap_threshold),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectError::ConfigValidation(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.region.min_gap_band == 0 || self.region.min_rows == 0 || self.region.min_cols == 0 {
            return Err(DetectError::ConfigValidation(
                "region.min_gap_band, min_rows and min_cols must be at least 1".into(),
            ));
        }

        if self.layout.header_scan_rows == 0 || self.layout.max_response_axes == 0 {
            return Err(DetectError::ConfigValidation(
                "layout.header_scan_rows and max_response_axes must be at least 1".into(),
            ));
        }

        if self.layout.horizontal_preference <= 0.0 || self.layout.header.normalizer <= 0.0 {
            return Err(DetectError::ConfigValidation(
                "layout.horizontal_preference and header.normalizer must be positive".into(),
            ));
        }

        if self.dilution.min_dilution_ratio < 1.0 {
            return Err(DetectError::ConfigValidation(format!(
                "dilution.min_dilution_ratio must be >= 1, got {}",
                self.dilution.min_dilution_ratio
            )));
        }

        let d = &self.dilution;
        if d.canonical_tolerance <= 0.0 || d.log_spacing_tolerance <= 0.0 || d.custom_max_cv <= 0.0 {
            return Err(DetectError::ConfigValidation(
                "dilution tolerances and custom_max_cv must be positive".into(),
            ));
        }

        let bio = &self.biology;
        if bio.max_samples == 0 || bio.max_concentrations == 0 {
            return Err(DetectError::ConfigValidation(
                "biology.max_samples and max_concentrations must be at least 1".into(),
            ));
        }
        if bio.min_concentrations > bio.max_concentrations {
            return Err(DetectError::ConfigValidation(format!(
                "biology.min_concentrations ({}) exceeds max_concentrations ({})",
                bio.min_concentrations, bio.max_concentrations
            )));
        }
        if bio.ideal_min_concentrations > bio.ideal_max_concentrations {
            return Err(DetectError::ConfigValidation(format!(
                "biology.ideal_min_concentrations ({}) exceeds ideal_max_concentrations ({})",
                bio.ideal_min_concentrations, bio.ideal_max_concentrations
            )));
        }
        if bio.min_replicates < 2 || bio.min_replicates > bio.max_replicates {
            return Err(DetectError::ConfigValidation(format!(
                "biology replicate group bounds must satisfy 2 <= min ({}) <= max ({})",
                bio.min_replicates, bio.max_replicates
            )));
        }

        if self.validation.min_orders > self.validation.max_orders {
            return Err(DetectError::ConfigValidation(
                "validation.min_orders exceeds max_orders".into(),
            ));
        }

        if self.output.max_candidates == 0 {
            return Err(DetectError::ConfigValidation(
                "output.max_candidates must be at least 1".into(),
            ));
        }

        if self.vocabulary.units.is_empty() {
            return Err(DetectError::ConfigValidation(
                "vocabulary.units must define at least one unit".into(),
            ));
        }
        for (unit, factor) in &self.vocabulary.units {
            if !factor.is_finite() || *factor <= 0.0 {
                return Err(DetectError::ConfigValidation(format!(
                    "unit '{unit}' has non-positive factor {factor}"
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        DetectConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_toml_is_default() {
        let config = DetectConfig::from_toml("").unwrap();
        assert_eq!(config, DetectConfig::default());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = DetectConfig::from_toml(
            r#"
[biology]
max_samples = 12

[output]
max_candidates = 5
"#,
        )
        .unwrap();
        assert_eq!(config.biology.max_samples, 12);
        assert_eq!(config.biology.min_concentrations, 6);
        assert_eq!(config.output.max_candidates, 5);
        assert_eq!(config.output.overlap_threshold, 0.7);
    }

    #[test]
    fn alternate_vocabulary() {
        let config = DetectConfig::from_toml(
            r#"
[vocabulary]
concentration_keywords = ["konzentration"]
response_keywords = ["antwort", "messung"]
"#,
        )
        .unwrap();
        assert!(config.vocabulary.has_concentration_keyword("Konzentration (nM)"));
        assert!(!config.vocabulary.has_concentration_keyword("Concentration"));
        assert_eq!(config.vocabulary.response_keyword_count("Messung 1 Antwort"), 2);
        // Units section was not given, so the default table stays.
        assert_eq!(config.vocabulary.unit_factor("mM"), Some(1e6));
    }

    #[test]
    fn rejects_unknown_field() {
        let err = DetectConfig::from_toml("[biology]\nmax_sample = 3\n").unwrap_err();
        assert!(matches!(err, DetectError::ConfigParse(_)));
    }

    #[test]
    fn rejects_fraction_out_of_range() {
        let err = DetectConfig::from_toml("[output]\noverlap_threshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("output.overlap_threshold"));
    }

    #[test]
    fn rejects_inverted_concentration_bounds() {
        let err = DetectConfig::from_toml(
            "[biology]\nmin_concentrations = 20\nmax_concentrations = 10\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("min_concentrations"));
    }

    #[test]
    fn rejects_negative_unit_factor() {
        let err = DetectConfig::from_toml("[vocabulary.units]\nnM = -1.0\n").unwrap_err();
        assert!(err.to_string().contains("non-positive"));
    }

    #[test]
    fn toml_round_trip_preserves_config() {
        let mut config = DetectConfig::default();
        config.biology.max_samples = 4;
        let text = config.to_toml().unwrap();
        assert_eq!(DetectConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn keyword_prefix_and_substring() {
        let vocab = Vocabulary::default();
        assert!(vocab.has_concentration_keyword("Conc. (uM)"));
        assert!(vocab.has_concentration_keyword("Concentration"));
        assert!(vocab.has_concentration_keyword("Dose"));
        assert!(!vocab.has_concentration_keyword("TCE [nM]"));
        assert_eq!(vocab.response_keyword_count("% Inhibition"), 2);
        assert_eq!(vocab.response_keyword_count("Sample A"), 1);
        assert_eq!(vocab.response_keyword_count("Time"), 0);
    }

    #[test]
    fn unit_lookup_is_case_aware() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.unit_factor("M"), Some(1e9));
        assert_eq!(vocab.unit_factor("mM"), Some(1e6));
        assert_eq!(vocab.unit_factor("NM"), Some(1.0));
        assert_eq!(vocab.unit_factor("UM"), Some(1e3));
        assert_eq!(vocab.unit_factor("MM"), Some(1e6));
        assert_eq!(vocab.unit_factor("kg"), None);
    }
}

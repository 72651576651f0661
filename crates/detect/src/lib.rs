//! `dosegrid-detect` - Dose-response layout detection engine.
//!
//! Pure engine crate: receives a classified grid, returns ranked dataset
//! candidates with confidences and issues. No CLI or IO dependencies.

pub mod biological;
pub mod cell;
pub mod config;
pub mod dilution;
pub mod engine;
pub mod error;
pub mod extract;
pub mod layout;
pub mod model;
pub mod region;
pub mod trace;
pub mod validate;

pub use cell::{Grid, RawValue};
pub use config::DetectConfig;
pub use engine::{analyze, analyze_gate, analyze_gate_traced, analyze_traced};
pub use error::DetectError;
pub use extract::{extract_points, DataPoint};
pub use model::{BoundingBox, DatasetCandidate, DetectionIssue, DetectionResult};
pub use trace::{TraceEvent, TraceObserver};

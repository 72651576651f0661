//! Structured checkpoints emitted while the pipeline runs.
//!
//! Tests collect events into a `Vec<TraceEvent>`; the default entry point
//! forwards them to the `log` facade.

use serde::Serialize;

use crate::model::{BoundingBox, DilutionType, Orientation, RejectionReason, SegmentStrategy};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    RegionFound {
        bounding_box: BoundingBox,
        confidence: f64,
    },
    HeaderScored {
        bounding_box: BoundingBox,
        orientation: Orientation,
        line: Option<usize>,
        score: f64,
    },
    AxisScored {
        bounding_box: BoundingBox,
        orientation: Orientation,
        axis: usize,
        score: f64,
        pattern: DilutionType,
    },
    OrientationChosen {
        bounding_box: BoundingBox,
        orientation: Orientation,
        vertical_score: Option<f64>,
        horizontal_score: Option<f64>,
        ambiguous: bool,
    },
    BlockSegmented {
        bounding_box: BoundingBox,
        strategy: SegmentStrategy,
        segments: usize,
    },
    CandidateAccepted {
        bounding_box: BoundingBox,
        confidence: f64,
    },
    CandidateRejected {
        bounding_box: BoundingBox,
        reason: RejectionReason,
    },
}

pub trait TraceObserver {
    fn on_event(&mut self, event: &TraceEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TraceObserver for NoopObserver {
    fn on_event(&mut self, _event: &TraceEvent) {}
}

/// Forwards events to the `log` facade: per-axis scoring at `trace`, the rest at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl TraceObserver for LogObserver {
    fn on_event(&mut self, event: &TraceEvent) {
        match event {
            TraceEvent::RegionFound {
                bounding_box,
                confidence,
            } => log::debug!("region {bounding_box} found (confidence {confidence:.3})"),
            TraceEvent::HeaderScored {
                bounding_box,
                orientation,
                line,
                score,
            } => log::trace!("{bounding_box} {orientation}: header {line:?} scored {score:.3}"),
            TraceEvent::AxisScored {
                bounding_box,
                orientation,
                axis,
                score,
                pattern,
            } => log::trace!(
                "{bounding_box} {orientation}: axis {axis} scored {score:.3} ({pattern})"
            ),
            TraceEvent::OrientationChosen {
                bounding_box,
                orientation,
                vertical_score,
                horizontal_score,
                ambiguous,
            } => log::debug!(
                "{bounding_box}: {orientation} chosen (vertical {vertical_score:?}, horizontal {horizontal_score:?}, ambiguous {ambiguous})"
            ),
            TraceEvent::BlockSegmented {
                bounding_box,
                strategy,
                segments,
            } => log::debug!("{bounding_box} split into {segments} segment(s) by {strategy}"),
            TraceEvent::CandidateAccepted {
                bounding_box,
                confidence,
            } => log::debug!("candidate {bounding_box} accepted (confidence {confidence:.3})"),
            TraceEvent::CandidateRejected {
                bounding_box,
                reason,
            } => log::debug!("candidate {bounding_box} rejected: {reason}"),
        }
    }
}

impl TraceObserver for Vec<TraceEvent> {
    fn on_event(&mut self, event: &TraceEvent) {
        self.push(event.clone());
    }
}

/// Adapts a closure into an observer.
pub struct FnObserver<F>(pub F);

impl<F: FnMut(&TraceEvent)> TraceObserver for FnObserver<F> {
    fn on_event(&mut self, event: &TraceEvent) {
        (self.0)(event)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

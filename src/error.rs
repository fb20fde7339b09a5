//! Error taxonomy for the perception pipeline.
//! Calibration failures abort the attempt and carry enough detail for the
//! operator to retake the empty-board photo. Per-frame ambiguity is not an
//! error at all: it surfaces as `success = false` on the update result.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("board boundary not found: {0}")]
    BoundaryNotFound(String),

    #[error(
        "too few grid lines after clustering: {horizontal} horizontal, {vertical} vertical (need 9)"
    )]
    InsufficientLines { horizontal: usize, vertical: usize },

    #[error(
        "expected 81 grid intersections, found {found} ({degenerate} degenerate line pairs skipped)"
    )]
    InsufficientIntersections { found: usize, degenerate: usize },

    #[error("corner grid is not 9x9 ({rows} rows): {detail}")]
    MalformedGrid { rows: usize, detail: String },
}

#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("frame size {current:?} does not match previous frame {previous:?}")]
    FrameMismatch {
        previous: (u32, u32),
        current: (u32, u32),
    },

    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

//! Board perception for a physical chess set watched by a camera.
//!
//! Calibrate once against a photo of the empty board, register the populated
//! starting position, then feed one frame per move to keep the Black/White/Empty
//! occupancy matrix in sync with the real board.

pub mod board;
pub mod calibrate;
pub mod capture;
pub mod change;
pub mod config;
pub mod error;
pub mod geometry;
pub mod perception;
pub mod square;

pub use board::{Board, OccupancyMatrix, SquarePosition, format_matrix};
pub use config::Config;
pub use error::{CalibrationError, PerceptionError};
pub use perception::{BoardUpdate, Perception};
pub use square::{DepthImage, Occupancy};

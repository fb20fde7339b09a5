//! Perception facade.
//! Sequences calibration, change detection, square resolution and partial
//! re-classification into the two operations the game loop needs:
//! `calibrate` once per game and `update` once per move.

use image::RgbImage;
use log::{debug, info, warn};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crate::board::{Board, OccupancyMatrix, SquarePosition};
use crate::calibrate::extract_board;
use crate::capture::save_debug_image;
use crate::change::detect_changes;
use crate::config::Config;
use crate::error::{CalibrationError, PerceptionError};
use crate::square::DepthImage;

/// Result of one update cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct BoardUpdate {
    pub matrix: OccupancyMatrix,
    /// False when the move could not be recognised; the board is then unchanged
    /// and the operator should repeat the move.
    pub success: bool,
    /// Indices of squares whose state flipped in this cycle.
    pub changed: Vec<usize>,
}

pub struct Perception {
    config: Config,
    board: Arc<RwLock<Board>>,
    positions: Vec<SquarePosition>,
    previous: Option<RgbImage>,
}

impl Perception {
    /// Builds the board from an empty-board photo and its aligned depth frame.
    pub fn calibrate(
        config: Config,
        empty: &RgbImage,
        depth: &DepthImage,
    ) -> Result<Self, CalibrationError> {
        let board = extract_board(empty, &config)?;
        let positions = board.square_positions(depth);
        let missing = positions.iter().filter(|p| p.depth.is_none()).count();
        if missing > 0 {
            warn!("{} squares have no depth reading", missing);
        }
        Ok(Self::with_board(config, board, positions))
    }

    /// Wraps an already calibrated board.
    pub fn with_board(config: Config, board: Board, positions: Vec<SquarePosition>) -> Self {
        Self {
            config,
            board: Arc::new(RwLock::new(board)),
            positions,
            previous: None,
        }
    }

    /// Registers the populated starting position as the reference frame and
    /// resets the occupancy to the standard layout.
    pub fn set_reference(&mut self, populated: RgbImage) {
        self.board
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .assign_starting_position();
        self.previous = Some(populated);
        info!("Reference frame set, board in starting position");
    }

    /// Shared handle for readers on other threads.
    pub fn board(&self) -> Arc<RwLock<Board>> {
        Arc::clone(&self.board)
    }

    pub fn occupancy_matrix(&self) -> OccupancyMatrix {
        self.board.read().unwrap_or_else(PoisonError::into_inner).occupancy_matrix()
    }

    pub fn bwe_string(&self) -> String {
        self.board.read().unwrap_or_else(PoisonError::into_inner).bwe_string()
    }

    pub fn square_positions(&self) -> &[SquarePosition] {
        &self.positions
    }

    pub fn previous_frame(&self) -> Option<&RgbImage> {
        self.previous.as_ref()
    }

    /// Compares `current` with the previous frame and re-classifies only the
    /// squares where something moved. On success `current` becomes the new
    /// previous frame.
    pub fn update(&mut self, current: RgbImage) -> Result<BoardUpdate, PerceptionError> {
        let start = Instant::now();
        let Some(previous) = self.previous.as_ref() else {
            warn!("No reference frame registered yet");
            return Ok(self.unsuccessful());
        };

        let centers = detect_changes(previous, &current, &self.config.change)?;
        if centers.is_empty() {
            info!("No change detected between frames");
            return Ok(self.unsuccessful());
        }

        // Classify under the read lock, publish under the write lock.
        let states = {
            let board = self.board.read().unwrap_or_else(PoisonError::into_inner);
            let matched = board.resolve_squares(&centers);
            debug!("{} change regions -> squares {:?}", centers.len(), matched);
            if matched.is_empty() {
                info!("Change regions do not map to any square");
                return Ok(BoardUpdate {
                    matrix: board.occupancy_matrix(),
                    success: false,
                    changed: Vec::new(),
                });
            }
            board.classify_squares(&matched, &current)
        };

        let (changed, matrix) = {
            let mut board = self.board.write().unwrap_or_else(PoisonError::into_inner);
            let changed = board.apply(&states);
            (changed, board.occupancy_matrix())
        };

        if changed.is_empty() {
            info!("Changed squares kept their previous state");
            return Ok(BoardUpdate {
                matrix,
                success: false,
                changed,
            });
        }

        if crate::capture::debug_enabled() {
            let mut overlay = current.clone();
            self.board.read().unwrap_or_else(PoisonError::into_inner).draw(&mut overlay);
            save_debug_image("update_board.png", &overlay);
        }

        self.previous = Some(current);
        info!("Board updated: {} squares changed in {:?}", changed.len(), start.elapsed());
        Ok(BoardUpdate {
            matrix,
            success: true,
            changed,
        })
    }

    fn unsuccessful(&self) -> BoardUpdate {
        BoardUpdate {
            matrix: self.occupancy_matrix(),
            success: false,
            changed: Vec::new(),
        }
    }
}

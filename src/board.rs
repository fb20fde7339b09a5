//! Board state container.
//! Owns the 64 squares, maps pixel locations to square indices and keeps the
//! occupancy (BWE) matrix current through partial re-classification.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_hollow_polygon_mut};
use log::debug;
use rayon::prelude::*;
use shakmaty::{Color, File, Rank, Square as Label};
use std::collections::BTreeSet;

use crate::config::Config;
use crate::error::CalibrationError;
use crate::geometry::{Corner, CornerGrid, GRID_LINES, distance};
use crate::square::{DepthImage, Occupancy, ReferenceColors, Square};

pub const BOARD_SIZE: usize = 8;
pub const SQUARE_COUNT: usize = BOARD_SIZE * BOARD_SIZE;

/// Row 0 is rank 8, row 7 is rank 1; column 0 is file a, column 7 is file h.
pub type OccupancyMatrix = [[Occupancy; BOARD_SIZE]; BOARD_SIZE];

/// Camera-frame position of a square center plus its depth reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SquarePosition {
    pub label: Label,
    pub x: f32,
    pub y: f32,
    pub depth: Option<f32>,
}

#[derive(Clone, Debug)]
pub struct Board {
    squares: Vec<Square>,
    by_label: [usize; SQUARE_COUNT],
    references: ReferenceColors,
    fallback_side_factor: f32,
}

/// Board label for grid cell (row, col). The camera looks at the board from the
/// side: image rows run from file h down to file a, columns from rank 8 to rank 1.
pub fn cell_label(row: usize, col: usize) -> Label {
    Label::from_coords(
        File::new((BOARD_SIZE - 1 - row) as u32),
        Rank::new((BOARD_SIZE - 1 - col) as u32),
    )
}

impl Board {
    /// Builds the 64 squares from a calibrated corner grid and sets the starting layout.
    pub fn from_grid(grid: &CornerGrid, config: &Config) -> Result<Self, CalibrationError> {
        let roi_radius = config.classification.roi_radius;
        let mut squares = Vec::with_capacity(SQUARE_COUNT);
        for row in 0..GRID_LINES - 1 {
            for col in 0..GRID_LINES - 1 {
                let index = row * BOARD_SIZE + col;
                let corners = grid.cell(row, col);
                squares.push(Square::new(cell_label(row, col), index, corners, roi_radius));
            }
        }

        let mut board = Self::new(squares, config)?;
        board.assign_starting_position();
        Ok(board)
    }

    /// Takes ownership of exactly 64 squares with unique indices 0..64 and unique labels.
    pub fn new(squares: Vec<Square>, config: &Config) -> Result<Self, CalibrationError> {
        let malformed = |detail: String| CalibrationError::MalformedGrid {
            rows: GRID_LINES,
            detail,
        };
        if squares.len() != SQUARE_COUNT {
            return Err(malformed(format!("expected 64 squares, got {}", squares.len())));
        }

        let mut squares = squares;
        squares.sort_by_key(|s| s.index);
        if squares.iter().enumerate().any(|(i, s)| s.index != i) {
            return Err(malformed("square indices are not 0..64".to_string()));
        }

        let mut by_label = [usize::MAX; SQUARE_COUNT];
        for sq in &squares {
            let slot = &mut by_label[usize::from(sq.label)];
            if *slot != usize::MAX {
                return Err(malformed(format!("label {} used twice", sq.label)));
            }
            *slot = sq.index;
        }

        Ok(Self {
            squares,
            by_label,
            references: ReferenceColors::from_params(&config.classification),
            fallback_side_factor: config.resolve.fallback_side_factor,
        })
    }

    pub fn squares(&self) -> &[Square] {
        &self.squares
    }

    pub fn square(&self, index: usize) -> Option<&Square> {
        self.squares.get(index)
    }

    pub fn index_of(&self, label: Label) -> usize {
        self.by_label[usize::from(label)]
    }

    pub fn state(&self, label: Label) -> Occupancy {
        self.squares[self.index_of(label)].state
    }

    /// White on ranks 1-2, black on ranks 7-8, everything else empty.
    pub fn assign_starting_position(&mut self) {
        let start = shakmaty::Board::new();
        for sq in &mut self.squares {
            sq.state = match start.color_at(sq.label) {
                Some(Color::White) => Occupancy::White,
                Some(Color::Black) => Occupancy::Black,
                None => Occupancy::Empty,
            };
        }
    }

    /// Square indices hit by the given points: polygon containment first, then the
    /// nearest centroid if it is close enough. Sorted, without duplicates.
    pub fn resolve_squares(&self, points: &[Corner]) -> Vec<usize> {
        let mut matched = BTreeSet::new();
        for &p in points {
            if let Some(sq) = self.squares.iter().find(|s| s.contains(p)) {
                matched.insert(sq.index);
                continue;
            }

            let nearest = self
                .squares
                .iter()
                .map(|s| (s, distance(s.centroid, p)))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            match nearest {
                Some((sq, d)) if d <= sq.area.sqrt() * self.fallback_side_factor => {
                    debug!("({:.0}, {:.0}) outside all squares, snapped to {}", p.x, p.y, sq.label);
                    matched.insert(sq.index);
                }
                _ => debug!("({:.0}, {:.0}) is off the board", p.x, p.y),
            }
        }
        matched.into_iter().collect()
    }

    /// Fresh states for the given squares. Reads only; squares whose ROI lies
    /// outside `image` are left out.
    pub fn classify_squares(&self, indices: &[usize], image: &RgbImage) -> Vec<(usize, Occupancy)> {
        indices
            .par_iter()
            .filter_map(|&i| {
                let sq = self.squares.get(i)?;
                sq.classify(image, &self.references).map(|state| (i, state))
            })
            .collect()
    }

    /// Writes new states and returns the indices whose state actually changed.
    pub fn apply(&mut self, states: &[(usize, Occupancy)]) -> Vec<usize> {
        let mut changed = Vec::new();
        for &(i, state) in states {
            if let Some(sq) = self.squares.get_mut(i) {
                if sq.state != state {
                    debug!("{}: {} -> {}", sq.label, sq.state, state);
                    sq.state = state;
                    changed.push(i);
                }
            }
        }
        changed
    }

    /// Re-classifies exactly `indices` against `image`; every other square keeps its state.
    pub fn update(&mut self, indices: &[usize], image: &RgbImage) -> Vec<usize> {
        let states = self.classify_squares(indices, image);
        self.apply(&states)
    }

    pub fn occupancy_matrix(&self) -> OccupancyMatrix {
        let mut matrix = [[Occupancy::Empty; BOARD_SIZE]; BOARD_SIZE];
        for sq in &self.squares {
            let row = BOARD_SIZE - 1 - u32::from(sq.label.rank()) as usize;
            let col = u32::from(sq.label.file()) as usize;
            matrix[row][col] = sq.state;
        }
        matrix
    }

    /// The matrix flattened row by row as 'B'/'W'/'E', the form the engine consumes.
    pub fn bwe_string(&self) -> String {
        self.occupancy_matrix()
            .iter()
            .flat_map(|row| row.iter().map(|s| s.as_char()))
            .collect()
    }

    pub fn square_positions(&self, depth: &DepthImage) -> Vec<SquarePosition> {
        self.squares
            .iter()
            .map(|sq| SquarePosition {
                label: sq.label,
                x: sq.centroid.x,
                y: sq.centroid.y,
                depth: sq.sample_depth(depth),
            })
            .collect()
    }

    /// Outlines every square, its ROI and a dot colored by state.
    pub fn draw(&self, image: &mut RgbImage) {
        let outline = Rgb([255, 0, 0]);
        for sq in &self.squares {
            draw_hollow_polygon_mut(image, &sq.corners, outline);
            let (center, radius) = sq.roi();
            draw_hollow_circle_mut(image, center, radius as i32, outline);
            match sq.state {
                Occupancy::White => draw_filled_circle_mut(image, center, 3, Rgb([255, 255, 255])),
                Occupancy::Black => draw_filled_circle_mut(image, center, 3, Rgb([0, 0, 0])),
                Occupancy::Empty => {}
            }
        }
    }
}

/// Renders a matrix as eight lines, rank 8 first.
pub fn format_matrix(matrix: &OccupancyMatrix) -> String {
    matrix
        .iter()
        .enumerate()
        .map(|(r, row)| {
            let cells: Vec<String> = row.iter().map(|s| s.to_string()).collect();
            format!("{} {}", BOARD_SIZE - r, cells.join(" "))
        })
        .chain(std::iter::once("  a b c d e f g h".to_string()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::regular_rows;
    use imageproc::point::Point;
    use std::collections::HashSet;

    fn board() -> Board {
        let grid = CornerGrid::from_rows(regular_rows(Point::new(50.0, 50.0), 50.0)).unwrap();
        Board::from_grid(&grid, &Config::default()).unwrap()
    }

    #[test]
    fn test_labels_and_indices_unique() {
        let board = board();
        assert_eq!(board.squares().len(), 64);
        let labels: HashSet<String> = board.squares().iter().map(|s| s.label.to_string()).collect();
        assert_eq!(labels.len(), 64);
        for (i, sq) in board.squares().iter().enumerate() {
            assert_eq!(sq.index, i);
            assert_eq!(board.index_of(sq.label), i);
        }
    }

    #[test]
    fn test_label_orientation() {
        assert_eq!(cell_label(0, 0), Label::H8);
        assert_eq!(cell_label(0, 7), Label::H1);
        assert_eq!(cell_label(7, 0), Label::A8);
        assert_eq!(cell_label(7, 7), Label::A1);
    }

    #[test]
    fn test_starting_position_matrix() {
        let board = board();
        let matrix = board.occupancy_matrix();
        assert!(matrix[0].iter().all(|&s| s == Occupancy::Black));
        assert!(matrix[1].iter().all(|&s| s == Occupancy::Black));
        assert!(matrix[2..6].iter().flatten().all(|&s| s == Occupancy::Empty));
        assert!(matrix[6].iter().all(|&s| s == Occupancy::White));
        assert!(matrix[7].iter().all(|&s| s == Occupancy::White));
        assert_eq!(
            board.bwe_string(),
            format!("{}{}{}", "B".repeat(16), "E".repeat(32), "W".repeat(16))
        );
        assert_eq!(board.state(Label::E2), Occupancy::White);
    }

    #[test]
    fn test_resolve_inside_and_fallback() {
        let board = board();
        // Cell (row 2, col 3) spans x 200..250, y 150..200
        let inside = board.resolve_squares(&[Point::new(225.0, 175.0), Point::new(226.0, 170.0)]);
        assert_eq!(inside, vec![2 * 8 + 3]);

        // Just outside the board edge snaps to the corner square
        let snapped = board.resolve_squares(&[Point::new(45.0, 45.0)]);
        assert_eq!(snapped, vec![0]);

        // Far away resolves to nothing
        assert!(board.resolve_squares(&[Point::new(900.0, 900.0)]).is_empty());
    }

    #[test]
    fn test_update_touches_only_matched_squares() {
        let mut board = board();
        let before = board.occupancy_matrix();

        // A frame that would classify every square as a white piece
        let frame = RgbImage::from_pixel(500, 500, Rgb([222, 146, 96]));
        let target = board.index_of(Label::E5);
        let changed = board.update(&[target], &frame);

        assert_eq!(changed, vec![target]);
        let after = board.occupancy_matrix();
        for r in 0..8 {
            for c in 0..8 {
                if (r, c) == (3, 4) {
                    assert_eq!(after[r][c], Occupancy::White);
                } else {
                    assert_eq!(after[r][c], before[r][c]);
                }
            }
        }
    }

    #[test]
    fn test_update_unchanged_state_reports_nothing() {
        let mut board = board();
        let frame = RgbImage::from_pixel(500, 500, Rgb([222, 146, 96]));
        let target = board.index_of(Label::A1);
        assert!(board.update(&[target], &frame).is_empty());
    }

    #[test]
    fn test_new_rejects_duplicate_labels() {
        let board = board();
        let mut squares = board.squares().to_vec();
        squares[1].label = squares[0].label;
        assert!(Board::new(squares, &Config::default()).is_err());
    }

    #[test]
    fn test_square_positions_and_draw() {
        let board = board();
        let depth = DepthImage::from_pixel(500, 500, image::Luma([1200]));
        let positions = board.square_positions(&depth);
        assert_eq!(positions.len(), 64);
        assert!(positions.iter().all(|p| p.depth == Some(1200.0)));

        let gray = Rgb([128, 128, 128]);
        let mut canvas = RgbImage::from_pixel(500, 500, gray);
        board.draw(&mut canvas);
        // h8 holds a black piece, h1 a white one, h5 is empty
        assert_eq!(canvas.get_pixel(75, 75), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(425, 75), &Rgb([255, 255, 255]));
        assert_eq!(canvas.get_pixel(225, 75), &gray);
        // Square outlines
        assert_eq!(canvas.get_pixel(50, 60), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_format_matrix() {
        let text = format_matrix(&board().occupancy_matrix());
        assert!(text.starts_with("8 B B B B B B B B"));
        assert!(text.ends_with("a b c d e f g h"));
    }
}

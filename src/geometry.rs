//! Geometry primitives: detected lines, their intersections and the 9x9 corner grid.
//! Everything here is pure math on pixel coordinates; no image access.

use imageproc::geometry::arc_length;
use imageproc::hough::PolarLine;
use imageproc::point::Point;
use log::debug;

use crate::error::CalibrationError;

/// Grid lines per orientation on a chessboard (8 cells need 9 lines).
pub const GRID_LINES: usize = 9;

/// A pixel location (sub-pixel precision).
pub type Corner = Point<f32>;

/// Minimum |sin| of the angle between two lines before they count as parallel.
const MIN_INTERSECTION_SIN: f32 = 1e-3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// A straight segment detected in the edge image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Line {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub dx: f32,
    pub dy: f32,
    pub center: Corner,
    pub orientation: Orientation,
    /// Implicit-line coefficient: the line satisfies `dy*x - dx*y = -c`.
    pub c: f32,
}

impl Line {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let dx = x2 - x1;
        let dy = y2 - y1;
        let orientation = if dx.abs() > dy.abs() {
            Orientation::Horizontal
        } else {
            Orientation::Vertical
        };

        Self {
            x1,
            y1,
            x2,
            y2,
            dx,
            dy,
            center: Point::new((x1 + x2) / 2.0, (y1 + y2) / 2.0),
            orientation,
            c: -(x1 * y2 - x2 * y1),
        }
    }

    /// Clips a Hough line (`x*cos(t) + y*sin(t) = r`) to the image rectangle.
    /// Returns `None` when the line misses the image.
    pub fn from_polar(line: PolarLine, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let theta = (line.angle_in_degrees as f32).to_radians();
        let (sin, cos) = theta.sin_cos();
        let max_x = (width - 1) as f32;
        let max_y = (height - 1) as f32;
        let eps = 1e-3;

        let mut hits: Vec<Corner> = Vec::with_capacity(4);
        if sin.abs() > eps {
            for x in [0.0, max_x] {
                let y = (line.r - x * cos) / sin;
                if (-eps..=max_y + eps).contains(&y) {
                    hits.push(Point::new(x, y.clamp(0.0, max_y)));
                }
            }
        }
        if cos.abs() > eps {
            for y in [0.0, max_y] {
                let x = (line.r - y * sin) / cos;
                if (-eps..=max_x + eps).contains(&x) {
                    hits.push(Point::new(x.clamp(0.0, max_x), y));
                }
            }
        }

        let mut best: Option<(Corner, Corner, f32)> = None;
        for (i, a) in hits.iter().enumerate() {
            for b in &hits[i + 1..] {
                let d = distance(*a, *b);
                if best.is_none_or(|(_, _, bd)| d > bd) {
                    best = Some((*a, *b, d));
                }
            }
        }

        match best {
            Some((a, b, d)) if d > 0.0 => Some(Line::new(a.x, a.y, b.x, b.y)),
            _ => None,
        }
    }

    /// Solves both implicit equations for their common point.
    /// `None` when the lines are (nearly) parallel.
    pub fn intersect(&self, other: &Line) -> Option<Corner> {
        // a*x + b*y = e with a = dy, b = -dx, e = -c
        let (a1, b1, e1) = (self.dy, -self.dx, -self.c);
        let (a2, b2, e2) = (other.dy, -other.dx, -other.c);

        let det = a1 * b2 - a2 * b1;
        let lengths = self.length() * other.length();
        if lengths == 0.0 || (det / lengths).abs() < MIN_INTERSECTION_SIN {
            return None;
        }

        let x = (e1 * b2 - e2 * b1) / det;
        let y = (a1 * e2 - a2 * e1) / det;
        Some(Point::new(x, y))
    }

    pub fn length(&self) -> f32 {
        self.dx.hypot(self.dy)
    }

    /// Center coordinate along the axis the lines of this orientation are stacked on.
    fn sort_key(&self) -> f32 {
        match self.orientation {
            Orientation::Horizontal => self.center.y,
            Orientation::Vertical => self.center.x,
        }
    }
}

pub fn distance(a: Corner, b: Corner) -> f32 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Splits lines by orientation; horizontals sorted by center y, verticals by center x.
pub fn categorize_lines(lines: &[Line]) -> (Vec<Line>, Vec<Line>) {
    let (mut horizontal, mut vertical): (Vec<Line>, Vec<Line>) = lines
        .iter()
        .copied()
        .partition(|l| l.orientation == Orientation::Horizontal);

    horizontal.sort_by(|a, b| a.sort_key().total_cmp(&b.sort_key()));
    vertical.sort_by(|a, b| a.sort_key().total_cmp(&b.sort_key()));
    (horizontal, vertical)
}

/// Collapses runs of near-coincident lines (already sorted by `categorize_lines`)
/// into one representative each: the median member of the run.
pub fn cluster_lines(sorted: &[Line], threshold: f32) -> Vec<Line> {
    let mut representatives = Vec::new();
    let mut start = 0;

    for i in 1..=sorted.len() {
        let split =
            i == sorted.len() || sorted[i].sort_key() - sorted[i - 1].sort_key() > threshold;
        if split {
            let run = &sorted[start..i];
            if !run.is_empty() {
                representatives.push(run[run.len() / 2]);
            }
            start = i;
        }
    }

    representatives
}

/// All horizontal x vertical intersections. Degenerate pairs are skipped and counted.
pub fn find_intersections(horizontal: &[Line], vertical: &[Line]) -> (Vec<Corner>, usize) {
    let mut points = Vec::with_capacity(horizontal.len() * vertical.len());
    let mut degenerate = 0;

    for h in horizontal {
        for v in vertical {
            match h.intersect(v) {
                Some(p) => points.push(p),
                None => degenerate += 1,
            }
        }
    }

    if degenerate > 0 {
        debug!("Skipped {} near-parallel line pairs", degenerate);
    }
    (points, degenerate)
}

/// Drops every point closer than `min_distance` to one already kept (first seen wins),
/// which also removes exact repeats.
pub fn filter_intersections(points: &[Corner], min_distance: f32) -> Vec<Corner> {
    let mut kept: Vec<Corner> = Vec::with_capacity(points.len());
    for &p in points {
        if !kept.iter().any(|&k| k == p || distance(k, p) < min_distance) {
            kept.push(p);
        }
    }
    kept
}

/// The 9x9 lattice of board corners. Rows ascend in y, columns in x.
#[derive(Clone, Debug, PartialEq)]
pub struct CornerGrid {
    rows: [[Corner; GRID_LINES]; GRID_LINES],
}

impl CornerGrid {
    /// Groups loose intersections into rows: a new row starts whenever consecutive
    /// y values (in y order) differ by more than `row_threshold`.
    pub fn assign(points: &[Corner], row_threshold: f32) -> Result<Self, CalibrationError> {
        let mut sorted = points.to_vec();
        sorted.sort_by(|a, b| a.y.total_cmp(&b.y));

        let mut rows: Vec<Vec<Corner>> = Vec::new();
        let mut previous_y: Option<f32> = None;
        for p in sorted {
            match previous_y {
                Some(y) if p.y - y <= row_threshold => {
                    if let Some(row) = rows.last_mut() {
                        row.push(p);
                    }
                }
                _ => rows.push(vec![p]),
            }
            previous_y = Some(p.y);
        }

        for row in &mut rows {
            row.sort_by(|a, b| a.x.total_cmp(&b.x));
        }

        Self::from_rows(rows)
    }

    /// Validates an explicit table of rows. Rejects anything that is not 9x9,
    /// rows out of y order, or a row out of x order.
    pub fn from_rows(rows: Vec<Vec<Corner>>) -> Result<Self, CalibrationError> {
        let row_count = rows.len();
        if row_count != GRID_LINES {
            return Err(CalibrationError::MalformedGrid {
                rows: row_count,
                detail: format!("expected {} rows", GRID_LINES),
            });
        }

        let mut grid = [[Point::new(0.0, 0.0); GRID_LINES]; GRID_LINES];
        for (r, row) in rows.into_iter().enumerate() {
            let len = row.len();
            let row: [Corner; GRID_LINES] =
                row.try_into().map_err(|_| CalibrationError::MalformedGrid {
                    rows: row_count,
                    detail: format!("row {} has {} corners", r, len),
                })?;

            if row.windows(2).any(|w| w[1].x < w[0].x) {
                return Err(CalibrationError::MalformedGrid {
                    rows: row_count,
                    detail: format!("row {} is not sorted by x", r),
                });
            }
            grid[r] = row;
        }

        let mean_y =
            |row: &[Corner; GRID_LINES]| row.iter().map(|p| p.y).sum::<f32>() / GRID_LINES as f32;
        if grid.windows(2).any(|w| mean_y(&w[1]) < mean_y(&w[0])) {
            return Err(CalibrationError::MalformedGrid {
                rows: row_count,
                detail: "rows are not sorted by y".to_string(),
            });
        }

        Ok(Self { rows: grid })
    }

    pub fn corner(&self, row: usize, col: usize) -> Corner {
        self.rows[row][col]
    }

    pub fn rows(&self) -> &[[Corner; GRID_LINES]; GRID_LINES] {
        &self.rows
    }

    /// Corners of cell (row, col) in winding order: top-left, top-right, bottom-right, bottom-left.
    pub fn cell(&self, row: usize, col: usize) -> [Corner; 4] {
        [
            self.rows[row][col],
            self.rows[row][col + 1],
            self.rows[row + 1][col + 1],
            self.rows[row + 1][col],
        ]
    }
}

/// Absolute shoelace area.
pub fn polygon_area(polygon: &[Corner]) -> f32 {
    signed_area(polygon).abs()
}

fn signed_area(polygon: &[Corner]) -> f32 {
    let n = polygon.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f32 = (0..n)
        .map(|i| {
            let (a, b) = (polygon[i], polygon[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice / 2.0
}

pub fn polygon_perimeter(polygon: &[Corner]) -> f32 {
    arc_length(polygon, true) as f32
}

/// Area centroid (first moments over area). Degenerate polygons fall back to the vertex mean.
pub fn polygon_centroid(polygon: &[Corner]) -> Corner {
    let n = polygon.len();
    let area = signed_area(polygon);
    if area.abs() < f32::EPSILON {
        let (sx, sy) = polygon.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        let n = n.max(1) as f32;
        return Point::new(sx / n, sy / n);
    }

    let (mut cx, mut cy) = (0.0, 0.0);
    for i in 0..n {
        let (a, b) = (polygon[i], polygon[(i + 1) % n]);
        let cross = a.x * b.y - b.x * a.y;
        cx += (a.x + b.x) * cross;
        cy += (a.y + b.y) * cross;
    }
    Point::new(cx / (6.0 * area), cy / (6.0 * area))
}

/// Even-odd ray casting. Points exactly on an edge may land on either side.
pub fn polygon_contains(polygon: &[Corner], p: Corner) -> bool {
    let n = polygon.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Shoelace area of an integer contour, as traced by `imageproc::contours`.
pub fn contour_area(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: i64 = (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64
        })
        .sum();
    (twice as f64 / 2.0).abs()
}

/// A regular lattice; handy for synthetic boards.
pub fn regular_rows(origin: Corner, step: f32) -> Vec<Vec<Corner>> {
    (0..GRID_LINES)
        .map(|r| {
            (0..GRID_LINES)
                .map(|c| Point::new(origin.x + c as f32 * step, origin.y + r as f32 * step))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_orientation_and_coefficient() {
        let h = Line::new(0.0, 10.0, 100.0, 12.0);
        assert_eq!(h.orientation, Orientation::Horizontal);
        assert_eq!(h.center, Point::new(50.0, 11.0));

        let v = Line::new(40.0, 0.0, 41.0, 100.0);
        assert_eq!(v.orientation, Orientation::Vertical);

        // |dx| == |dy| counts as vertical
        assert_eq!(Line::new(0.0, 0.0, 5.0, 5.0).orientation, Orientation::Vertical);
        assert_eq!(Line::new(1.0, 2.0, 3.0, 4.0).c, -(1.0 * 4.0 - 3.0 * 2.0));
    }

    #[test]
    fn test_intersect_axis_aligned() {
        let h = Line::new(0.0, 50.0, 400.0, 50.0);
        let v = Line::new(120.0, 0.0, 120.0, 400.0);
        let p = h.intersect(&v).unwrap();
        assert!((p.x - 120.0).abs() < 1e-3 && (p.y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_intersect_slanted() {
        // y = x and y = -x + 100 meet at (50, 50)
        let a = Line::new(0.0, 0.0, 100.0, 100.0);
        let b = Line::new(0.0, 100.0, 100.0, 0.0);
        let p = a.intersect(&b).unwrap();
        assert!((p.x - 50.0).abs() < 1e-3 && (p.y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_parallel_lines_do_not_intersect() {
        let a = Line::new(0.0, 10.0, 100.0, 10.0);
        let b = Line::new(0.0, 60.0, 100.0, 60.0);
        assert!(a.intersect(&b).is_none());

        let (points, degenerate) = find_intersections(&[a], &[b]);
        assert!(points.is_empty());
        assert_eq!(degenerate, 1);
    }

    #[test]
    fn test_from_polar_vertical_and_horizontal() {
        let v = Line::from_polar(PolarLine { r: 100.0, angle_in_degrees: 0 }, 500, 400).unwrap();
        assert_eq!(v.orientation, Orientation::Vertical);
        assert!((v.center.x - 100.0).abs() < 1e-3);
        assert!((v.center.y - 199.5).abs() < 1e-3);

        let h = Line::from_polar(PolarLine { r: 250.0, angle_in_degrees: 90 }, 500, 400).unwrap();
        assert_eq!(h.orientation, Orientation::Horizontal);
        assert!((h.center.y - 250.0).abs() < 1e-2);
    }

    #[test]
    fn test_from_polar_outside_image() {
        assert!(Line::from_polar(PolarLine { r: 900.0, angle_in_degrees: 0 }, 500, 400).is_none());
    }

    #[test]
    fn test_categorize_sorts_by_center() {
        let lines = [
            Line::new(0.0, 80.0, 100.0, 80.0),
            Line::new(30.0, 0.0, 30.0, 100.0),
            Line::new(0.0, 20.0, 100.0, 20.0),
            Line::new(10.0, 0.0, 10.0, 100.0),
        ];
        let (h, v) = categorize_lines(&lines);
        assert_eq!(h.iter().map(|l| l.center.y).collect::<Vec<_>>(), vec![20.0, 80.0]);
        assert_eq!(v.iter().map(|l| l.center.x).collect::<Vec<_>>(), vec![10.0, 30.0]);
    }

    #[test]
    fn test_cluster_picks_median_per_run() {
        let ys = [10.0, 12.0, 15.0, 60.0, 61.0, 110.0];
        let lines: Vec<Line> = ys.iter().map(|&y| Line::new(0.0, y, 200.0, y)).collect();
        let reps = cluster_lines(&lines, 20.0);
        assert_eq!(reps.iter().map(|l| l.center.y).collect::<Vec<_>>(), vec![12.0, 61.0, 110.0]);
    }

    #[test]
    fn test_cluster_chains_consecutive_gaps() {
        // Each gap is below the threshold, so the whole run is one cluster.
        let ys = [0.0, 15.0, 30.0, 45.0];
        let lines: Vec<Line> = ys.iter().map(|&y| Line::new(0.0, y, 200.0, y)).collect();
        assert_eq!(cluster_lines(&lines, 20.0).len(), 1);
        assert!(cluster_lines(&[], 20.0).is_empty());
    }

    #[test]
    fn test_filter_removes_near_and_exact_duplicates() {
        let points = [
            Point::new(10.0, 10.0),
            Point::new(12.0, 11.0),
            Point::new(10.0, 10.0),
            Point::new(60.0, 10.0),
        ];
        let kept = filter_intersections(&points, 15.0);
        assert_eq!(kept, vec![Point::new(10.0, 10.0), Point::new(60.0, 10.0)]);
    }

    #[test]
    fn test_assign_regular_grid() {
        let mut points: Vec<Corner> = regular_rows(Point::new(50.0, 50.0), 50.0).concat();
        // Jitter rows slightly and shuffle order
        points.reverse();
        for (i, p) in points.iter_mut().enumerate() {
            p.y += (i % 3) as f32;
        }

        let grid = CornerGrid::assign(&points, 10.0).unwrap();
        for row in grid.rows() {
            assert!(row.windows(2).all(|w| w[0].x < w[1].x));
        }
        assert!((grid.corner(0, 0).x - 50.0).abs() < 1e-3);
        assert!((grid.corner(8, 8).x - 450.0).abs() < 1e-3);
        assert!(grid.corner(8, 0).y >= 450.0);
    }

    #[test]
    fn test_assign_rejects_missing_corner() {
        let mut points: Vec<Corner> = regular_rows(Point::new(0.0, 0.0), 50.0).concat();
        points.pop();
        let err = CornerGrid::assign(&points, 10.0).unwrap_err();
        assert!(matches!(err, CalibrationError::MalformedGrid { .. }));
    }

    #[test]
    fn test_from_rows_rejects_unsorted() {
        let mut rows = regular_rows(Point::new(0.0, 0.0), 50.0);
        rows[3].swap(0, 1);
        assert!(matches!(
            CornerGrid::from_rows(rows),
            Err(CalibrationError::MalformedGrid { .. })
        ));

        let mut rows = regular_rows(Point::new(0.0, 0.0), 50.0);
        rows.swap(2, 5);
        assert!(CornerGrid::from_rows(rows).is_err());
    }

    #[test]
    fn test_polygon_metrics() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert_eq!(polygon_area(&square), 100.0);
        assert!((polygon_perimeter(&square) - 40.0).abs() < 1e-4);
        assert_eq!(polygon_centroid(&square), Point::new(5.0, 5.0));
        assert!(polygon_contains(&square, Point::new(3.0, 7.0)));
        assert!(!polygon_contains(&square, Point::new(11.0, 7.0)));
    }

    #[test]
    fn test_contour_area_integer() {
        let contour = [Point::new(0, 0), Point::new(20, 0), Point::new(20, 10), Point::new(0, 10)];
        assert_eq!(contour_area(&contour), 200.0);
        assert_eq!(contour_area(&[Point::new(3, 3)]), 0.0);
    }
}

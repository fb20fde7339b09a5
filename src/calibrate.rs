//! Calibration module.
//! One-time setup against a photo of the empty board: isolate the board region,
//! find its grid lines, intersect them into a 9x9 corner lattice and build the
//! 64 squares from it.
//! Set `BOARDSIGHT_DEBUG=1` to dump every intermediate stage to `screenshots/`.

use image::{GrayImage, Luma, Rgb, RgbImage, imageops};
use imageproc::contours::find_contours;
use imageproc::distance_transform::Norm;
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::edges::canny;
use imageproc::filter::{box_filter, gaussian_blur_f32};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::hough::{LineDetectionOptions, detect_lines};
use imageproc::morphology::erode;
use imageproc::point::Point;
use log::{debug, info};
use std::time::Instant;

use crate::board::Board;
use crate::capture::save_debug_image;
use crate::config::{Config, ExtractionParams};
use crate::error::CalibrationError;
use crate::geometry::{
    CornerGrid, GRID_LINES, Line, categorize_lines, cluster_lines, contour_area,
    filter_intersections, find_intersections,
};

/// Runs the whole extraction and returns a board in the starting position.
pub fn extract_board(image: &RgbImage, config: &Config) -> Result<Board, CalibrationError> {
    let start = Instant::now();
    let grid = find_corner_grid(image, &config.extraction)?;
    let board = Board::from_grid(&grid, config)?;

    if crate::capture::debug_enabled() {
        let mut overlay = image.clone();
        board.draw(&mut overlay);
        save_debug_image("calibration_squares.png", &overlay);
    }

    info!("Board calibrated: 64 squares in {:?}", start.elapsed());
    Ok(board)
}

pub fn find_corner_grid(
    image: &RgbImage,
    params: &ExtractionParams,
) -> Result<CornerGrid, CalibrationError> {
    let blurred = if params.blur_sigma > 0.0 {
        gaussian_blur_f32(image, params.blur_sigma)
    } else {
        image.clone()
    };

    let binary = binarize(&imageops::grayscale(&blurred), params);
    save_debug_image("calibration_binary.png", &binary);

    let boundary = find_board_boundary(&binary, params.polygon_epsilon_ratio)?;
    debug!("Board boundary polygon: {:?}", boundary);

    let extracted = extract_region(&blurred, &boundary, params);
    save_debug_image("calibration_extracted.png", &extracted);

    let edges = canny(&imageops::grayscale(&extracted), params.canny_low, params.canny_high);
    save_debug_image("calibration_edges.png", &edges);

    let lines = detect_grid_lines(&edges, params);
    let (horizontal, vertical) = categorize_lines(&lines);
    let horizontal = cluster_lines(&horizontal, params.line_cluster_threshold);
    let vertical = cluster_lines(&vertical, params.line_cluster_threshold);
    debug!(
        "{} raw lines -> {} horizontal, {} vertical after clustering",
        lines.len(),
        horizontal.len(),
        vertical.len()
    );

    if crate::capture::debug_enabled() {
        let mut overlay = extracted.clone();
        for line in horizontal.iter().chain(&vertical) {
            let (start, end) = ((line.x1, line.y1), (line.x2, line.y2));
            draw_line_segment_mut(&mut overlay, start, end, Rgb([0, 0, 255]));
        }
        save_debug_image("calibration_lines.png", &overlay);
    }

    if horizontal.len() < GRID_LINES || vertical.len() < GRID_LINES {
        return Err(CalibrationError::InsufficientLines {
            horizontal: horizontal.len(),
            vertical: vertical.len(),
        });
    }

    let (points, degenerate) = find_intersections(&horizontal, &vertical);
    let filtered = filter_intersections(&points, params.duplicate_distance);
    if filtered.len() != GRID_LINES * GRID_LINES {
        return Err(CalibrationError::InsufficientIntersections {
            found: filtered.len(),
            degenerate,
        });
    }

    CornerGrid::assign(&filtered, params.row_threshold)
}

/// Local-mean adaptive threshold: foreground where a pixel beats its
/// neighbourhood mean minus the offset.
pub fn binarize(gray: &GrayImage, params: &ExtractionParams) -> GrayImage {
    let radius = params.threshold_block_radius;
    let mean = box_filter(gray, radius, radius);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = i16::from(gray.get_pixel(x, y).0[0]);
        let local = i16::from(mean.get_pixel(x, y).0[0]);
        if value > local - params.threshold_offset {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Picks the contour with the best area/perimeter ratio (the one big, nearly
/// square outline) and simplifies it to a polygon.
pub fn find_board_boundary(
    binary: &GrayImage,
    epsilon_ratio: f64,
) -> Result<Vec<Point<i32>>, CalibrationError> {
    let (width, height) = (binary.width() as i32, binary.height() as i32);
    let contours = find_contours::<i32>(binary);

    let mut best: Option<(f64, f64, &[Point<i32>])> = None;
    for contour in &contours {
        let points = contour.points.as_slice();
        let touches_border = points
            .iter()
            .any(|p| p.x <= 0 || p.y <= 0 || p.x >= width - 1 || p.y >= height - 1);
        if touches_border {
            continue;
        }

        let perimeter = arc_length(points, true);
        if perimeter <= 0.0 {
            continue;
        }
        let ratio = contour_area(points) / perimeter;
        if best.is_none_or(|(r, _, _)| ratio > r) {
            best = Some((ratio, perimeter, points));
        }
    }

    let (ratio, perimeter, points) = best.ok_or_else(|| {
        CalibrationError::BoundaryNotFound(format!(
            "none of {} contours lies inside the frame",
            contours.len()
        ))
    })?;
    debug!("Board contour: {} points, area/perimeter {:.1}", points.len(), ratio);

    let mut polygon = approximate_polygon_dp(points, epsilon_ratio * perimeter, true);
    polygon.dedup();
    while polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }

    if polygon.len() < 3 {
        return Err(CalibrationError::BoundaryNotFound(format!(
            "boundary simplified to {} vertices",
            polygon.len()
        )));
    }
    Ok(polygon)
}

/// Copies the board pixels into a fresh image painted with the matte color.
/// The mask is shrunk by `matte_border` first so the rim around the physical
/// board does not produce edges of its own.
pub fn extract_region(
    image: &RgbImage,
    boundary: &[Point<i32>],
    params: &ExtractionParams,
) -> RgbImage {
    let mut mask = GrayImage::new(image.width(), image.height());
    draw_polygon_mut(&mut mask, boundary, Luma([255]));
    if params.matte_border > 0 {
        mask = erode(&mask, Norm::LInf, params.matte_border);
    }

    let matte = Rgb(params.matte_color);
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        if mask.get_pixel(x, y).0[0] > 0 {
            *image.get_pixel(x, y)
        } else {
            matte
        }
    })
}

pub fn detect_grid_lines(edges: &GrayImage, params: &ExtractionParams) -> Vec<Line> {
    let options = LineDetectionOptions {
        vote_threshold: params.hough_vote_threshold,
        suppression_radius: params.hough_suppression_radius,
    };
    detect_lines(edges, options)
        .into_iter()
        .filter_map(|polar| Line::from_polar(polar, edges.width(), edges.height()))
        .collect()
}

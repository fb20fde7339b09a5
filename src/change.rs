//! Change detection between consecutive frames.
//! Structural similarity (SSIM) localizes where the board looks different;
//! every sufficiently large dissimilar region yields one candidate point.

use image::{GrayImage, Luma, RgbImage, imageops};
use imageproc::contours::{BorderType, find_contours};
use imageproc::contrast::otsu_level;
use imageproc::geometry::arc_length;
use imageproc::point::Point;
use log::debug;
use std::time::Instant;

use crate::capture::save_debug_image;
use crate::config::ChangeParams;
use crate::error::PerceptionError;
use crate::geometry::{Corner, contour_area};

const K1: f32 = 0.01;
const K2: f32 = 0.03;
const DYNAMIC_RANGE: f32 = 255.0;

/// Measurements of one traced region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    pub area: f64,
    pub perimeter: f64,
    pub min: Point<i32>,
    pub max: Point<i32>,
}

impl Region {
    /// `None` for degenerate outlines (single pixel, zero perimeter).
    pub fn measure(points: &[Point<i32>]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let perimeter = arc_length(points, true);
        if perimeter <= 0.0 {
            return None;
        }

        let (mut min, mut max) = (points[0], points[0]);
        for p in points {
            min = Point::new(min.x.min(p.x), min.y.min(p.y));
            max = Point::new(max.x.max(p.x), max.y.max(p.y));
        }

        Some(Self {
            area: contour_area(points),
            perimeter,
            min,
            max,
        })
    }

    /// Center of the bounding box.
    pub fn center(&self) -> Corner {
        Point::new(
            (self.min.x + self.max.x) as f32 / 2.0,
            (self.min.y + self.max.y) as f32 / 2.0,
        )
    }
}

/// Bounding-box centers of every region whose area exceeds `min_area`.
/// Degenerate outlines are skipped without affecting the rest.
pub fn region_centroids<'a>(
    contours: impl IntoIterator<Item = &'a [Point<i32>]>,
    min_area: f64,
) -> Vec<Corner> {
    let mut centers = Vec::new();
    for points in contours {
        let Some(region) = Region::measure(points) else {
            debug!("Skipping degenerate contour with {} points", points.len());
            continue;
        };
        if region.area > min_area {
            centers.push(region.center());
        }
    }
    centers
}

/// Centers of the regions where `current` differs structurally from `previous`.
pub fn detect_changes(
    previous: &RgbImage,
    current: &RgbImage,
    params: &ChangeParams,
) -> Result<Vec<Corner>, PerceptionError> {
    if previous.dimensions() != current.dimensions() {
        return Err(PerceptionError::FrameMismatch {
            previous: previous.dimensions(),
            current: current.dimensions(),
        });
    }
    let start = Instant::now();

    let similarity = ssim_image(
        &imageops::grayscale(previous),
        &imageops::grayscale(current),
        params.ssim_window,
    );
    save_debug_image("change_ssim.png", &similarity);

    let mut values = similarity.pixels().map(|p| p.0[0]);
    let first = values.next().unwrap_or(u8::MAX);
    if values.all(|v| v == first) {
        debug!("Frames are structurally identical");
        return Ok(Vec::new());
    }

    // Dissimilar (dark) pixels become foreground
    let level = otsu_level(&similarity);
    let mask = GrayImage::from_fn(similarity.width(), similarity.height(), |x, y| {
        if similarity.get_pixel(x, y).0[0] <= level {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    save_debug_image("change_mask.png", &mask);

    let contours = find_contours::<i32>(&mask);
    let external = contours
        .iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|c| c.points.as_slice());
    let centers = region_centroids(external, params.min_area);

    debug!(
        "Otsu level {}: {} changed regions in {:?}",
        level,
        centers.len(),
        start.elapsed()
    );
    Ok(centers)
}

/// Per-pixel SSIM scaled to 0..=255 (255 = identical neighbourhoods).
pub fn ssim_image(a: &GrayImage, b: &GrayImage, window: u32) -> GrayImage {
    let (w, h) = a.dimensions();
    let map = ssim_map(a, b, window);
    GrayImage::from_fn(w, h, |x, y| {
        let s = map[(y * w + x) as usize];
        Luma([(s.clamp(0.0, 1.0) * 255.0) as u8])
    })
}

/// SSIM with a uniform `window` x `window` neighbourhood and sample covariance.
pub fn ssim_map(a: &GrayImage, b: &GrayImage, window: u32) -> Vec<f32> {
    let (w, h) = a.dimensions();
    let (w, h) = (w as usize, h as usize);
    let radius = (window / 2) as usize;

    let x: Vec<f32> = a.pixels().map(|p| f32::from(p.0[0])).collect();
    let y: Vec<f32> = b.pixels().map(|p| f32::from(p.0[0])).collect();
    let xx: Vec<f32> = x.iter().map(|v| v * v).collect();
    let yy: Vec<f32> = y.iter().map(|v| v * v).collect();
    let xy: Vec<f32> = x.iter().zip(&y).map(|(p, q)| p * q).collect();

    let ux = box_mean(&x, w, h, radius);
    let uy = box_mean(&y, w, h, radius);
    let uxx = box_mean(&xx, w, h, radius);
    let uyy = box_mean(&yy, w, h, radius);
    let uxy = box_mean(&xy, w, h, radius);

    let n = ((2 * radius + 1) * (2 * radius + 1)) as f32;
    let cov_norm = n / (n - 1.0);
    let c1 = (K1 * DYNAMIC_RANGE).powi(2);
    let c2 = (K2 * DYNAMIC_RANGE).powi(2);

    (0..w * h)
        .map(|i| {
            let vx = cov_norm * (uxx[i] - ux[i] * ux[i]);
            let vy = cov_norm * (uyy[i] - uy[i] * uy[i]);
            let vxy = cov_norm * (uxy[i] - ux[i] * uy[i]);
            let numerator = (2.0 * ux[i] * uy[i] + c1) * (2.0 * vxy + c2);
            let denominator = (ux[i] * ux[i] + uy[i] * uy[i] + c1) * (vx + vy + c2);
            numerator / denominator
        })
        .collect()
}

/// Separable box mean; samples past the border repeat the edge pixel.
fn box_mean(values: &[f32], w: usize, h: usize, radius: usize) -> Vec<f32> {
    let span = (2 * radius + 1) as f32;
    let clamp = |i: isize, len: usize| i.clamp(0, len as isize - 1) as usize;

    let mut rows = vec![0.0; w * h];
    for y in 0..h {
        let line = &values[y * w..(y + 1) * w];
        for x in 0..w {
            let sum: f32 = (-(radius as isize)..=radius as isize)
                .map(|d| line[clamp(x as isize + d, w)])
                .sum();
            rows[y * w + x] = sum / span;
        }
    }

    let mut out = vec![0.0; w * h];
    for y in 0..h {
        for x in 0..w {
            let sum: f32 = (-(radius as isize)..=radius as isize)
                .map(|d| rows[clamp(y as isize + d, h) * w + x])
                .sum();
            out[y * w + x] = sum / span;
        }
    }
    out
}

//! One cell of the board: its polygon, a circular sampling region around the
//! centroid, and color-based occupancy classification.

use image::{ImageBuffer, Luma, RgbImage};
use shakmaty::Square as Label;
use std::fmt;

use crate::config::ClassificationParams;
use crate::geometry::{Corner, polygon_area, polygon_centroid, polygon_contains, polygon_perimeter};

/// Aligned depth frame (raw sensor units, 0 = no reading).
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// What sits on a square.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Occupancy {
    #[default]
    Empty,
    White,
    Black,
}

impl Occupancy {
    pub fn as_char(self) -> char {
        match self {
            Occupancy::Empty => 'E',
            Occupancy::White => 'W',
            Occupancy::Black => 'B',
        }
    }
}

impl fmt::Display for Occupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// The four reference appearances, in tie-break order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reference {
    EmptyOnDark,
    EmptyOnLight,
    WhitePiece,
    BlackPiece,
}

impl Reference {
    pub fn occupancy(self) -> Occupancy {
        match self {
            Reference::EmptyOnDark | Reference::EmptyOnLight => Occupancy::Empty,
            Reference::WhitePiece => Occupancy::White,
            Reference::BlackPiece => Occupancy::Black,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceColors {
    colors: [(Reference, [f32; 3]); 4],
}

impl ReferenceColors {
    pub fn from_params(params: &ClassificationParams) -> Self {
        let rgb = |c: [u8; 3]| c.map(f32::from);
        Self {
            colors: [
                (Reference::EmptyOnDark, rgb(params.empty_on_dark)),
                (Reference::EmptyOnLight, rgb(params.empty_on_light)),
                (Reference::WhitePiece, rgb(params.white_piece)),
                (Reference::BlackPiece, rgb(params.black_piece)),
            ],
        }
    }

    /// Nearest reference by squared RGB distance. Exact ties go to the earlier reference.
    pub fn nearest(&self, color: [f32; 3]) -> Reference {
        let mut best = self.colors[0].0;
        let mut best_distance = f32::INFINITY;
        for (reference, reference_color) in &self.colors {
            let d: f32 = color
                .iter()
                .zip(reference_color)
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            if d < best_distance {
                best = *reference;
                best_distance = d;
            }
        }
        best
    }

    pub fn classify(&self, color: [f32; 3]) -> Occupancy {
        self.nearest(color).occupancy()
    }
}

impl Default for ReferenceColors {
    fn default() -> Self {
        Self::from_params(&ClassificationParams::default())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Square {
    pub label: Label,
    pub index: usize,
    /// Top-left, top-right, bottom-right, bottom-left as seen by the camera.
    pub corners: [Corner; 4],
    pub area: f32,
    pub perimeter: f32,
    pub centroid: Corner,
    roi_center: (i32, i32),
    roi_radius: u32,
    pub state: Occupancy,
}

impl Square {
    pub fn new(label: Label, index: usize, corners: [Corner; 4], roi_radius: u32) -> Self {
        let centroid = polygon_centroid(&corners);
        Self {
            label,
            index,
            corners,
            area: polygon_area(&corners),
            perimeter: polygon_perimeter(&corners),
            centroid,
            roi_center: (centroid.x.round() as i32, centroid.y.round() as i32),
            roi_radius,
            state: Occupancy::Empty,
        }
    }

    pub fn roi(&self) -> ((i32, i32), u32) {
        (self.roi_center, self.roi_radius)
    }

    pub fn contains(&self, p: Corner) -> bool {
        polygon_contains(&self.corners, p)
    }

    /// Pixels of the ROI disk that fall inside a `width` x `height` frame.
    fn roi_pixels(&self, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> + '_ {
        let (cx, cy) = self.roi_center;
        let r = self.roi_radius as i32;
        (cy - r..=cy + r).flat_map(move |y| {
            (cx - r..=cx + r).filter_map(move |x| {
                let (dx, dy) = (x - cx, y - cy);
                let inside = dx * dx + dy * dy <= r * r
                    && x >= 0
                    && y >= 0
                    && (x as u32) < width
                    && (y as u32) < height;
                inside.then_some((x as u32, y as u32))
            })
        })
    }

    /// Mean RGB over the ROI disk. `None` if the disk lies outside the image.
    pub fn sample_color(&self, image: &RgbImage) -> Option<[f32; 3]> {
        let mut sum = [0.0f64; 3];
        let mut count = 0u32;
        for (x, y) in self.roi_pixels(image.width(), image.height()) {
            let px = image.get_pixel(x, y);
            for (s, v) in sum.iter_mut().zip(px.0) {
                *s += f64::from(v);
            }
            count += 1;
        }

        (count > 0).then(|| sum.map(|s| (s / f64::from(count)) as f32))
    }

    pub fn classify(&self, image: &RgbImage, references: &ReferenceColors) -> Option<Occupancy> {
        self.sample_color(image).map(|c| references.classify(c))
    }

    /// Mean of the valid (non-zero) depth readings in the ROI.
    pub fn sample_depth(&self, depth: &DepthImage) -> Option<f32> {
        let readings: Vec<u16> = self
            .roi_pixels(depth.width(), depth.height())
            .map(|(x, y)| depth.get_pixel(x, y).0[0])
            .filter(|&d| d > 0)
            .collect();

        if readings.is_empty() {
            return None;
        }
        let total: f64 = readings.iter().map(|&d| f64::from(d)).sum();
        Some((total / readings.len() as f64) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use imageproc::point::Point;

    fn square_at(x: f32, y: f32, side: f32) -> Square {
        let corners = [
            Point::new(x, y),
            Point::new(x + side, y),
            Point::new(x + side, y + side),
            Point::new(x, y + side),
        ];
        Square::new(Label::E4, 28, corners, 5)
    }

    #[test]
    fn test_derived_geometry() {
        let sq = square_at(100.0, 50.0, 50.0);
        assert_eq!(sq.area, 2500.0);
        assert!((sq.perimeter - 200.0).abs() < 1e-3);
        assert_eq!(sq.centroid, Point::new(125.0, 75.0));
        assert_eq!(sq.roi(), ((125, 75), 5));
        assert!(sq.contains(Point::new(101.0, 99.0)));
        assert!(!sq.contains(Point::new(99.0, 60.0)));
    }

    #[test]
    fn test_sample_color_is_disk_mean() {
        let mut image = RgbImage::from_pixel(200, 200, Rgb([10, 20, 30]));
        let sq = square_at(100.0, 50.0, 50.0);
        // Pixels just outside the radius must not leak in
        image.put_pixel(125 + 6, 75, Rgb([255, 255, 255]));
        image.put_pixel(125 + 4, 75 + 4, Rgb([255, 255, 255]));

        assert_eq!(sq.sample_color(&image), Some([10.0, 20.0, 30.0]));
    }

    #[test]
    fn test_sample_color_outside_image() {
        let image = RgbImage::new(50, 50);
        let sq = square_at(300.0, 300.0, 50.0);
        assert_eq!(sq.sample_color(&image), None);
        assert_eq!(sq.classify(&image, &ReferenceColors::default()), None);
    }

    #[test]
    fn test_classify_reference_colors() {
        let refs = ReferenceColors::default();
        assert_eq!(refs.classify([70.0, 25.0, 25.0]), Occupancy::Empty);
        assert_eq!(refs.classify([205.0, 155.0, 150.0]), Occupancy::Empty);
        assert_eq!(refs.classify([220.0, 140.0, 100.0]), Occupancy::White);
        assert_eq!(refs.classify([100.0, 36.0, 30.0]), Occupancy::Black);
    }

    #[test]
    fn test_classify_tie_goes_to_earlier_reference() {
        let params = ClassificationParams {
            empty_on_dark: [0, 0, 0],
            empty_on_light: [200, 200, 200],
            white_piece: [100, 100, 120],
            black_piece: [100, 100, 80],
            ..ClassificationParams::default()
        };
        let refs = ReferenceColors::from_params(&params);
        // Equidistant from WhitePiece and BlackPiece
        assert_eq!(refs.nearest([100.0, 100.0, 100.0]), Reference::WhitePiece);
    }

    #[test]
    fn test_classify_is_pure() {
        let refs = ReferenceColors::default();
        let image = RgbImage::from_pixel(200, 200, Rgb([222, 146, 96]));
        let sq = square_at(0.0, 0.0, 50.0);
        let first = sq.classify(&image, &refs);
        for _ in 0..3 {
            assert_eq!(sq.classify(&image, &refs), first);
        }
        assert_eq!(first, Some(Occupancy::White));
    }

    #[test]
    fn test_sample_depth_ignores_holes() {
        let mut depth = DepthImage::from_pixel(200, 200, Luma([800]));
        depth.put_pixel(125, 75, Luma([0]));
        let sq = square_at(100.0, 50.0, 50.0);
        assert_eq!(sq.sample_depth(&depth), Some(800.0));

        let empty = DepthImage::new(200, 200);
        assert_eq!(sq.sample_depth(&empty), None);
    }

    #[test]
    fn test_occupancy_chars() {
        assert_eq!(Occupancy::Empty.to_string(), "E");
        assert_eq!(Occupancy::White.as_char(), 'W');
        assert_eq!(Occupancy::Black.as_char(), 'B');
    }
}

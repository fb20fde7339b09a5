//! Config module.
//! Manages I/O for board_config.json (extraction, classification and change-detection tunables).
//! Uses serde for JSON serialization.
//! Falls back to built-in defaults when the file is missing; partial files only
//! override what they name.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "board_config.json";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extraction: ExtractionParams,
    pub classification: ClassificationParams,
    pub change: ChangeParams,
    pub resolve: ResolveParams,
}

/// Tunables for turning the empty-board photo into a corner grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionParams {
    pub blur_sigma: f32,
    /// Half-size of the local-mean window used for binarization (57 => 115 px block).
    pub threshold_block_radius: u32,
    /// A pixel is foreground when it exceeds `local_mean - threshold_offset`.
    pub threshold_offset: i16,
    /// Polygon approximation tolerance as a fraction of the boundary perimeter.
    pub polygon_epsilon_ratio: f64,
    /// RGB fill for everything outside the board.
    pub matte_color: [u8; 3],
    /// Pixels shaved off the inside of the board boundary to hide the colored rim.
    pub matte_border: u8,
    pub canny_low: f32,
    pub canny_high: f32,
    pub hough_vote_threshold: u32,
    pub hough_suppression_radius: u32,
    /// Consecutive line centers further apart than this start a new cluster.
    pub line_cluster_threshold: f32,
    /// Intersections closer than this are treated as the same corner.
    pub duplicate_distance: f32,
    /// Consecutive corners whose y differs by more than this start a new row.
    pub row_threshold: f32,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            threshold_block_radius: 57,
            threshold_offset: 1,
            polygon_epsilon_ratio: 0.1,
            matte_color: [100, 0, 0],
            matte_border: 7,
            canny_low: 50.0,
            canny_high: 100.0,
            hough_vote_threshold: 150,
            hough_suppression_radius: 8,
            line_cluster_threshold: 20.0,
            duplicate_distance: 15.0,
            row_threshold: 10.0,
        }
    }
}

/// ROI size and the four reference colors (RGB) squares are compared against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationParams {
    pub roi_radius: u32,
    pub empty_on_dark: [u8; 3],
    pub empty_on_light: [u8; 3],
    pub white_piece: [u8; 3],
    pub black_piece: [u8; 3],
}

impl Default for ClassificationParams {
    fn default() -> Self {
        Self {
            roi_radius: 5,
            empty_on_dark: [70, 25, 25],
            empty_on_light: [205, 155, 150],
            white_piece: [222, 146, 96],
            black_piece: [103, 35, 32],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeParams {
    /// Side of the uniform SSIM window; must be odd.
    pub ssim_window: u32,
    /// Regions at or below this area (px²) are noise.
    pub min_area: f64,
}

impl Default for ChangeParams {
    fn default() -> Self {
        Self {
            ssim_window: 7,
            min_area: 100.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveParams {
    /// A point outside every polygon snaps to the nearest square only when it lies
    /// within this many square side lengths of that square's centroid.
    pub fallback_side_factor: f32,
}

impl Default for ResolveParams {
    fn default() -> Self {
        Self {
            fallback_side_factor: 1.0,
        }
    }
}

/// Loads the config at `path`, or the defaults when the file does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    if config.change.ssim_window % 2 == 0 || config.change.ssim_window < 3 {
        anyhow::bail!(
            "change.ssim_window must be an odd number >= 3 (got {})",
            config.change.ssim_window
        );
    }

    Ok(config)
}

pub fn save_config(config: &Config, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write config file {}", path.display()))?;
    Ok(())
}

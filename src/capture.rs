//! Frame I/O module.
//! The camera feed itself lives outside this crate; frames reach us as image files
//! (color PNG/JPEG plus an aligned 16-bit depth PNG).
//! Debug: set env var `BOARDSIGHT_DEBUG=1` to dump intermediate images to `screenshots/`.

use anyhow::{Context, Result, bail};
use image::{DynamicImage, GenericImageView, RgbImage};
use log::{debug, warn};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::square::DepthImage;

pub const DEBUG_ENV: &str = "BOARDSIGHT_DEBUG";
pub const DEBUG_DIR: &str = "screenshots";

/// Smallest frame that can hold a usable 8x8 grid.
const MIN_FRAME_SIDE: u32 = 64;

pub fn debug_enabled() -> bool {
    env::var_os(DEBUG_ENV).is_some()
}

/// Loads a color frame and converts it to RGB8.
pub fn load_frame(path: impl AsRef<Path>) -> Result<RgbImage> {
    let path = path.as_ref();
    let start = Instant::now();

    let image =
        image::open(path).with_context(|| format!("Failed to open frame {}", path.display()))?;
    let (w, h) = image.dimensions();
    if w < MIN_FRAME_SIDE || h < MIN_FRAME_SIDE {
        bail!(
            "Frame {} is {}x{}, too small for a chessboard (min {}x{})",
            path.display(),
            w,
            h,
            MIN_FRAME_SIDE,
            MIN_FRAME_SIDE
        );
    }

    debug!("Loaded {} ({}x{}) in {:?}", path.display(), w, h, start.elapsed());
    Ok(image.into_rgb8())
}

/// Loads a depth frame. 8-bit files are widened so the same sampling code works.
pub fn load_depth(path: impl AsRef<Path>) -> Result<DepthImage> {
    let path = path.as_ref();
    let image = image::open(path)
        .with_context(|| format!("Failed to open depth frame {}", path.display()))?;
    Ok(match image {
        DynamicImage::ImageLuma16(depth) => depth,
        other => other.into_luma16(),
    })
}

/// Writes `image` to `screenshots/<name>` when debugging is enabled.
/// Failures are logged, never propagated.
pub fn save_debug_image<I>(name: &str, image: &I)
where
    I: Clone + Into<DynamicImage>,
{
    if !debug_enabled() {
        return;
    }
    if let Err(e) = write_image(Path::new(DEBUG_DIR).join(name), image.clone().into()) {
        warn!("Could not save debug image {}: {:#}", name, e);
    }
}

pub fn write_image(path: PathBuf, image: DynamicImage) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    image
        .save(&path)
        .with_context(|| format!("Failed to save image to {}", path.display()))?;
    Ok(())
}

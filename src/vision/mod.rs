//! Vision matcher: reference-image storage and template comparison against
//! captured screen content.
//!
//! Matching uses a normalized mean-absolute-difference similarity over RGB:
//! `1.0` is a pixel-perfect match, `0.0` maximal difference. Absence of a
//! match is an expected outcome, never an error; errors are reserved for
//! unusable inputs (zero-size images) and capture failures.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, trace};

pub mod capture;

pub use capture::{CaptureError, FrameCapture, NullCapture, ScreenCapture};

/// Best template placement found by [`find_match`]. Coordinates are the
/// top-left corner of the placement within the searched image.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Match {
    pub x: u32,
    pub y: u32,
    pub score: f64,
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("{0} image has zero size")]
    EmptyImage(&'static str),
}

/// Search `screen` for the best placement of `template`.
///
/// Returns `Ok(None)` when no placement reaches `tolerance` (or the template
/// cannot fit at all). The global maximum wins; among equal scores the first
/// placement in row-major order (top-most, then left-most) is kept, so the
/// result is deterministic.
pub fn find_match(
    screen: &RgbaImage,
    template: &RgbaImage,
    tolerance: f64,
) -> Result<Option<Match>, VisionError> {
    let (sw, sh) = screen.dimensions();
    let (tw, th) = template.dimensions();
    if sw == 0 || sh == 0 {
        return Err(VisionError::EmptyImage("screen"));
    }
    if tw == 0 || th == 0 {
        return Err(VisionError::EmptyImage("template"));
    }
    if tw > sw || th > sh {
        trace!(target: "gmacro::vision", tw, th, sw, sh, "template larger than search area");
        return Ok(None);
    }

    // Worst case: every channel differs by 255.
    let max_diff = (u64::from(tw) * u64::from(th) * 3 * 255) as f64;
    let mut best: Option<Match> = None;

    for oy in 0..=(sh - th) {
        for ox in 0..=(sw - tw) {
            let mut sad: u64 = 0;
            'placement: for ty in 0..th {
                for tx in 0..tw {
                    let s = screen.get_pixel(ox + tx, oy + ty).0;
                    let t = template.get_pixel(tx, ty).0;
                    sad += u64::from(s[0].abs_diff(t[0]))
                        + u64::from(s[1].abs_diff(t[1]))
                        + u64::from(s[2].abs_diff(t[2]));
                    if let Some(b) = &best {
                        // Cannot beat the current best anymore.
                        if 1.0 - sad as f64 / max_diff <= b.score {
                            break 'placement;
                        }
                    }
                }
            }
            let score = 1.0 - sad as f64 / max_diff;
            // Strictly-greater keeps the first (top-left-most) maximum.
            if best.is_none_or(|b| score > b.score) {
                best = Some(Match { x: ox, y: oy, score });
            }
        }
    }

    Ok(best.filter(|m| m.score >= tolerance))
}

/// Resolved reference images, keyed by the name blocks use to refer to them.
/// Resolution happens before a run starts; a missing name is a load-time
/// structural error, not a runtime one.
#[derive(Debug, Clone, Default)]
pub struct ImageStore {
    images: BTreeMap<String, RgbaImage>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, image: RgbaImage) {
        self.images.insert(name.into(), image);
    }

    pub fn get(&self, name: &str) -> Option<&RgbaImage> {
        self.images.get(name)
    }

    /// Names available for reference resolution during validation.
    pub fn names(&self) -> BTreeSet<String> {
        self.images.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Load every `.png`/`.jpg`/`.jpeg` in a directory; the file stem becomes
    /// the reference name.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut store = Self::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read image directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            if !matches!(ext.as_deref(), Some("png" | "jpg" | "jpeg")) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let img = image::open(&path)
                .with_context(|| format!("Failed to decode image {}", path.display()))?
                .to_rgba8();
            debug!(
                target: "gmacro::vision",
                name, width = img.width(), height = img.height(),
                "Loaded reference image"
            );
            store.insert(name, img);
        }
        Ok(store)
    }
}

//! Screen capture capability.
//!
//! Capture is an external OS service; the engine only depends on the
//! [`ScreenCapture`] trait. Hosts plug in a platform backend; the crate
//! ships [`NullCapture`] (no backend configured) and [`FrameCapture`]
//! (a fixed frame, used for dry runs and tests).

use image::RgbaImage;
use thiserror::Error;
use tracing::trace;

use crate::model::Rect;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no screen capture backend configured")]
    Unavailable,

    #[error("invalid capture region {0:?}")]
    InvalidRegion(Rect),

    #[error("screen capture failed: {0}")]
    Backend(String),
}

/// External capture capability: grab the given region, or the full screen
/// when unspecified.
pub trait ScreenCapture: Send {
    fn capture(&mut self, region: Option<Rect>) -> Result<RgbaImage, CaptureError>;
}

/// Placeholder backend: every capture fails. Used when a macro contains no
/// vision blocks or the host has not provided a real backend.
#[derive(Debug, Default)]
pub struct NullCapture;

impl ScreenCapture for NullCapture {
    fn capture(&mut self, _region: Option<Rect>) -> Result<RgbaImage, CaptureError> {
        Err(CaptureError::Unavailable)
    }
}

/// Backend serving a fixed frame, cropped per request.
#[derive(Debug, Clone)]
pub struct FrameCapture {
    frame: RgbaImage,
}

impl FrameCapture {
    pub fn new(frame: RgbaImage) -> Self {
        Self { frame }
    }

    /// Replace the served frame (e.g., to script a condition flipping).
    pub fn set_frame(&mut self, frame: RgbaImage) {
        self.frame = frame;
    }
}

impl ScreenCapture for FrameCapture {
    fn capture(&mut self, region: Option<Rect>) -> Result<RgbaImage, CaptureError> {
        match region {
            None => Ok(self.frame.clone()),
            Some(r) => crop_region(&self.frame, r),
        }
    }
}

/// Cut `region` out of `frame`, rejecting zero-size or out-of-bounds regions.
pub fn crop_region(frame: &RgbaImage, region: Rect) -> Result<RgbaImage, CaptureError> {
    if region.width == 0 || region.height == 0 || region.x < 0 || region.y < 0 {
        return Err(CaptureError::InvalidRegion(region));
    }
    let (x, y) = (region.x as u32, region.y as u32);
    if x + region.width > frame.width() || y + region.height > frame.height() {
        return Err(CaptureError::InvalidRegion(region));
    }
    trace!(target: "gmacro::vision", ?region, "cropping captured frame");
    Ok(image::imageops::crop_imm(frame, x, y, region.width, region.height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn null_capture_is_unavailable() {
        assert!(matches!(
            NullCapture.capture(None),
            Err(CaptureError::Unavailable)
        ));
    }

    #[test]
    fn frame_capture_crops() {
        let mut frame = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 255]));
        frame.put_pixel(5, 6, Rgba([255, 0, 0, 255]));
        let mut cap = FrameCapture::new(frame);

        let full = cap.capture(None).unwrap();
        assert_eq!(full.dimensions(), (16, 16));

        let region = Rect {
            x: 4,
            y: 5,
            width: 4,
            height: 4,
        };
        let cropped = cap.capture(Some(region)).unwrap();
        assert_eq!(cropped.dimensions(), (4, 4));
        assert_eq!(cropped.get_pixel(1, 1).0, [255, 0, 0, 255]);
    }

    #[test]
    fn bad_regions_are_rejected() {
        let mut cap = FrameCapture::new(RgbaImage::new(8, 8));
        for region in [
            Rect { x: 0, y: 0, width: 0, height: 4 },
            Rect { x: -1, y: 0, width: 4, height: 4 },
            Rect { x: 6, y: 6, width: 4, height: 4 },
        ] {
            assert!(matches!(
                cap.capture(Some(region)),
                Err(CaptureError::InvalidRegion(_))
            ));
        }
    }
}

//! Mapping detections from the downscaled detection frame back to the original frame.

use crate::types::FaceBox;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("downscale factor must be in (0, 1], got {0}")]
pub struct InvalidScale(pub f32);

/// Detection scale `s` relative to the original frame, `0 < s <= 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownscaleFactor(f32);

impl DownscaleFactor {
    pub const FULL: DownscaleFactor = DownscaleFactor(1.0);

    pub fn new(s: f32) -> Result<Self, InvalidScale> {
        if s.is_finite() && s > 0.0 && s <= 1.0 {
            Ok(Self(s))
        } else {
            Err(InvalidScale(s))
        }
    }

    pub fn get(&self) -> f32 {
        self.0
    }

    /// Map one coordinate from detection space to original-frame space.
    pub fn upscale_coord(&self, v: i32) -> i32 {
        (v as f32 / self.0).round() as i32
    }

    /// Map a box found on the downscaled frame into original-frame pixels.
    pub fn to_original(&self, b: FaceBox) -> FaceBox {
        FaceBox {
            top: self.upscale_coord(b.top),
            right: self.upscale_coord(b.right),
            bottom: self.upscale_coord(b.bottom),
            left: self.upscale_coord(b.left),
        }
    }
}

impl Default for DownscaleFactor {
    fn default() -> Self {
        DownscaleFactor(0.25)
    }
}

// THEORY:
// The `region` module is the bridge between the external detector's output and the
// appearance analysis. The detector speaks in floating-point corner boxes over the
// full frame; the feature extractor needs a concrete, non-empty patch of pixels.
//
// Key architectural principles:
// 1.  **Supplier, not analyzer**: `BoundingBox::crop` only clamps and copies. It knows
//     nothing about histograms or scores.
// 2.  **Degenerate boxes never escape**: a box whose clamped area is zero (or whose
//     coordinates are not finite) yields `None`. A `Region` therefore always has a
//     non-zero width and height, so downstream code never has to re-check.
// 3.  **Owned patches**: a `Region` owns its pixels. A candidate lives for one frame,
//     and the frame buffer can be recycled as soon as cropping is done.

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// A full camera frame as handed to the engine.
pub type Frame = RgbImage;

/// An axis-aligned box in frame pixel coordinates, `(x1, y1)` top-left and
/// `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Integer pixel center of the box (coordinates truncated toward zero).
    pub fn center(&self) -> (i32, i32) {
        (((self.x1 + self.x2) / 2.0) as i32, ((self.y1 + self.y2) / 2.0) as i32)
    }

    /// Clamps the box to the frame and returns the integer pixel span
    /// `(left, top, width, height)`, or `None` if nothing of positive area remains.
    pub fn clamped_span(
        &self,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<(u32, u32, u32, u32)> {
        if ![self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite()) {
            return None;
        }
        let (fw, fh) = (frame_width as f32, frame_height as f32);
        let left = self.x1.clamp(0.0, fw) as u32;
        let top = self.y1.clamp(0.0, fh) as u32;
        let right = self.x2.clamp(0.0, fw) as u32;
        let bottom = self.y2.clamp(0.0, fh) as u32;
        if right <= left || bottom <= top {
            return None;
        }
        Some((left, top, right - left, bottom - top))
    }

    /// Crops the box out of `frame`. Degenerate boxes yield `None`.
    pub fn crop(&self, frame: &Frame) -> Option<Region> {
        let (left, top, width, height) = self.clamped_span(frame.width(), frame.height())?;
        let patch = image::imageops::crop_imm(frame, left, top, width, height).to_image();
        Region::new(patch)
    }
}

/// One detector hit: a box and the detector's confidence in it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self { bbox, confidence }
    }
}

/// A non-empty patch of pixels cut out of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pixels: RgbImage,
}

impl Region {
    /// Wraps an image as a region. Returns `None` for zero-width or zero-height input.
    pub fn new(pixels: RgbImage) -> Option<Self> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return None;
        }
        Some(Self { pixels })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

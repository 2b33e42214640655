//! Per-frame plate data.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Axis-aligned region in frame pixel coordinates: origin plus size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a box from corner coordinates, rounding outward-safe to whole pixels.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let left = x1.min(x2).floor();
        let top = y1.min(y2).floor();
        let right = x1.max(x2).ceil();
        let bottom = y1.max(y2).ceil();
        Self {
            x: left as i32,
            y: top as i32,
            width: (right - left).max(0.0) as u32,
            height: (bottom - top).max(0.0) as u32,
        }
    }

    pub fn as_tuple(&self) -> (i32, i32, u32, u32) {
        (self.x, self.y, self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when the whole box lies inside a `width` x `height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        if self.is_empty() || self.x < 0 || self.y < 0 {
            return false;
        }
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        right <= width as u64 && bottom <= height as u64
    }

    /// Intersection with the frame, or `None` when nothing of the box is visible.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let left = (self.x as i64).max(0);
        let top = (self.y as i64).max(0);
        let right = (self.x as i64 + self.width as i64).min(width as i64);
        let bottom = (self.y as i64 + self.height as i64).min(height as i64);
        if right <= left || bottom <= top {
            return None;
        }
        Some(BoundingBox {
            x: left as i32,
            y: top as i32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

/// Unvalidated output of the detection stage for one proposed region.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateCandidate {
    pub bbox: BoundingBox,
    pub raw_text: String,
    pub ocr_confidence: f32,
    pub detector_confidence: f32,
}

/// A candidate that passed the confidence and grammar checks.
///
/// `plate` always satisfies [`crate::plate::is_valid_plate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedDetection {
    pub plate: String,
    /// Detector confidence for the region.
    pub confidence: f32,
    pub ocr_confidence: f32,
    pub bbox: BoundingBox,
    pub frame_timestamp: DateTime<Local>,
}

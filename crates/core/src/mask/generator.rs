//! Landmark contour masks.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detect::LandmarkSet;
use crate::extract::FrameRecord;

use super::geometry::{clip_below, dedup_closed, polygon_area};

/// Mask pixel value inside the face region.
pub const MASK_ON: u8 = 255;

/// Which part of the landmark contour is masked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskRegion {
    /// The full convex contour of all landmarks.
    #[default]
    FullFace,
    /// The contour below its vertical midline (mouth and jaw).
    LowerHalf,
}

/// A frame's mask could not be built. Marks the frame `mask_failed`.
#[derive(Debug, Clone, Error)]
pub enum MaskError {
    #[error("Degenerate contour for frame {frame_index}: {reason}")]
    Degenerate { frame_index: usize, reason: String },
}

impl MaskError {
    fn degenerate(frame_index: usize, reason: impl Into<String>) -> Self {
        Self::Degenerate {
            frame_index,
            reason: reason.into(),
        }
    }
}

/// Binary mask of one frame, `MASK_ON` inside the region and 0 elsewhere.
#[derive(Debug, Clone)]
pub struct MaskArtifact {
    pub frame_index: usize,
    pub mask: GrayImage,
}

impl MaskArtifact {
    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    /// Row-major L8 pixels.
    pub fn raw_bytes(&self) -> Vec<u8> {
        self.mask.as_raw().clone()
    }

    /// Number of pixels inside the mask.
    pub fn coverage(&self) -> usize {
        self.mask.pixels().filter(|p| p.0[0] == MASK_ON).count()
    }
}

/// Rasterises landmark contours into frame-sized masks.
#[derive(Debug, Clone)]
pub struct MaskGenerator {
    region: MaskRegion,
    min_area_px: f64,
}

impl MaskGenerator {
    pub fn new(region: MaskRegion, min_area_px: f64) -> Self {
        Self {
            region,
            min_area_px: min_area_px.max(0.0),
        }
    }

    /// Builds the mask for `frame` from its landmarks.
    ///
    /// Output is a pure function of the frame size, the landmarks and the
    /// generator settings.
    pub fn generate(
        &self,
        frame: &FrameRecord,
        landmarks: &LandmarkSet,
    ) -> Result<MaskArtifact, MaskError> {
        let (width, height) = (frame.width(), frame.height());
        let index = frame.index;
        if width == 0 || height == 0 {
            return Err(MaskError::degenerate(index, "empty frame"));
        }
        if !landmarks.points.iter().all(|p| p.is_finite()) {
            return Err(MaskError::degenerate(index, "non-finite landmark coordinates"));
        }

        let (max_x, max_y) = ((width - 1) as f32, (height - 1) as f32);
        let mut points: Vec<Point<i32>> = landmarks
            .points
            .iter()
            .map(|p| {
                Point::new(
                    p.x().clamp(0.0, max_x).round() as i32,
                    p.y().clamp(0.0, max_y).round() as i32,
                )
            })
            .collect();
        points.sort_by_key(|p| (p.x, p.y));
        points.dedup();
        if points.len() < 3 {
            return Err(MaskError::degenerate(
                index,
                format!("{} distinct points", points.len()),
            ));
        }

        let mut contour = dedup_closed(convex_hull(points.as_slice()));
        if self.region == MaskRegion::LowerHalf {
            let (top, bottom) = contour
                .iter()
                .fold((i32::MAX, i32::MIN), |(lo, hi), p| (lo.min(p.y), hi.max(p.y)));
            contour = clip_below(&contour, (top + bottom) as f64 / 2.0);
        }

        let area = polygon_area(&contour);
        if contour.len() < 3 || area <= 0.0 {
            return Err(MaskError::degenerate(index, "contour has no area"));
        }
        if area < self.min_area_px {
            return Err(MaskError::degenerate(
                index,
                format!("area {:.1}px below minimum {:.1}px", area, self.min_area_px),
            ));
        }

        let mut mask = GrayImage::new(width, height);
        draw_polygon_mut(&mut mask, &contour, Luma([MASK_ON]));
        Ok(MaskArtifact {
            frame_index: index,
            mask,
        })
    }
}

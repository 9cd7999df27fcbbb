//! Geometry and detection result types.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in normalized frame coordinates (0.0-1.0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left x coordinate (normalized 0.0-1.0)
    pub x1: f32,
    /// Top y coordinate (normalized 0.0-1.0)
    pub y1: f32,
    /// Right x coordinate (normalized 0.0-1.0)
    pub x2: f32,
    /// Bottom y coordinate (normalized 0.0-1.0)
    pub y2: f32,
}

impl BoundingBox {
    /// Builds a normalized box from pixel corners, clamped into a `width` x `height` frame.
    ///
    /// Returns `None` if the clamped box has no area or a coordinate is not finite.
    pub fn from_pixels(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        width: u32,
        height: u32,
    ) -> Option<Self> {
        if width == 0 || height == 0 || ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return None;
        }
        let (w, h) = (width as f32, height as f32);
        let bbox = Self {
            x1: (x1.min(x2) / w).clamp(0.0, 1.0),
            y1: (y1.min(y2) / h).clamp(0.0, 1.0),
            x2: (x1.max(x2) / w).clamp(0.0, 1.0),
            y2: (y1.max(y2) / h).clamp(0.0, 1.0),
        };
        (bbox.area() > 0.0).then_some(bbox)
    }

    /// Calculate box width
    #[inline]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    /// Calculate box height
    #[inline]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Calculate box area
    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Pixel rectangle for a `width` x `height` frame, never exceeding it.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let x = (self.x1 * width as f32).floor() as u32;
        let y = (self.y1 * height as f32).floor() as u32;
        let right = ((self.x2 * width as f32).ceil() as u32).min(width);
        let bottom = ((self.y2 * height as f32).ceil() as u32).min(height);
        PixelRect {
            x: x.min(width),
            y: y.min(height),
            width: right.saturating_sub(x),
            height: bottom.saturating_sub(y),
        }
    }
}

/// Rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A single landmark in pixel coordinates, serialized as `[x, y]` or `[x, y, z]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LandmarkPoint {
    Planar([f32; 2]),
    Spatial([f32; 3]),
}

impl LandmarkPoint {
    pub fn x(&self) -> f32 {
        match self {
            Self::Planar(p) => p[0],
            Self::Spatial(p) => p[0],
        }
    }

    pub fn y(&self) -> f32 {
        match self {
            Self::Planar(p) => p[1],
            Self::Spatial(p) => p[1],
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Self::Planar(p) => p.iter().all(|v| v.is_finite()),
            Self::Spatial(p) => p.iter().all(|v| v.is_finite()),
        }
    }
}

/// Raw face candidate from a detector model, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFace {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

/// Raw landmark model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLandmarks {
    pub points: Vec<LandmarkPoint>,
    pub confidence: f32,
}

/// The primary face of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub frame_index: usize,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Facial landmarks of one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub frame_index: usize,
    pub points: Vec<LandmarkPoint>,
    pub confidence: f32,
}

/// On-storage form of a landmark set.
#[derive(Serialize, Deserialize)]
struct LandmarkDocument<'a> {
    points: std::borrow::Cow<'a, [LandmarkPoint]>,
    confidence: f32,
}

impl LandmarkSet {
    /// Serializes as `{"points": [[x, y], ...], "confidence": c}`.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&LandmarkDocument {
            points: std::borrow::Cow::Borrowed(&self.points),
            confidence: self.confidence,
        })
    }

    /// Parses a stored landmark document.
    pub fn from_json(frame_index: usize, bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let doc: LandmarkDocument<'static> = serde_json::from_slice(bytes)?;
        Ok(Self {
            frame_index,
            points: doc.points.into_owned(),
            confidence: doc.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pixels_clamps_into_frame() {
        let bbox = BoundingBox::from_pixels(-20.0, 10.0, 700.0, 90.0, 640, 480).unwrap();
        assert!([bbox.x1, bbox.y1, bbox.x2, bbox.y2]
            .iter()
            .all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(bbox.x1, 0.0);
        assert_eq!(bbox.x2, 1.0);

        let rect = bbox.to_pixels(640, 480);
        assert!(rect.x + rect.width <= 640);
        assert!(rect.y + rect.height <= 480);
    }

    #[test]
    fn test_from_pixels_rejects_degenerate() {
        assert!(BoundingBox::from_pixels(10.0, 10.0, 10.0, 50.0, 100, 100).is_none());
        assert!(BoundingBox::from_pixels(200.0, 200.0, 300.0, 300.0, 100, 100).is_none());
        assert!(BoundingBox::from_pixels(f32::NAN, 0.0, 10.0, 10.0, 100, 100).is_none());
    }

    #[test]
    fn test_swapped_corners_are_normalized() {
        let bbox = BoundingBox::from_pixels(50.0, 50.0, 10.0, 10.0, 100, 100).unwrap();
        assert!(bbox.x1 < bbox.x2 && bbox.y1 < bbox.y2);
    }

    #[test]
    fn test_landmark_json_layout() {
        let set = LandmarkSet {
            frame_index: 3,
            points: vec![LandmarkPoint::Planar([1.0, 2.0]), LandmarkPoint::Planar([3.5, 4.0])],
            confidence: 0.75,
        };
        let json: serde_json::Value = serde_json::from_slice(&set.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"points": [[1.0, 2.0], [3.5, 4.0]], "confidence": 0.75})
        );

        let back = LandmarkSet::from_json(3, &set.to_json().unwrap()).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_spatial_points_parse() {
        let set =
            LandmarkSet::from_json(0, br#"{"points": [[1, 2, 3]], "confidence": 1}"#).unwrap();
        assert_eq!(set.points[0], LandmarkPoint::Spatial([1.0, 2.0, 3.0]));
        assert_eq!(set.points[0].y(), 2.0);
    }
}

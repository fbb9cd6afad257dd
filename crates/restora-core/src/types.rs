use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceBox {
    /// Center of the box in frame coordinates.
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One restored face: the aligned input crop and its restored counterpart,
/// both at the canonical face size.
#[derive(Debug, Clone)]
pub struct RestoredFace {
    pub cropped: RgbImage,
    pub restored: RgbImage,
}

/// Per-image restoration output.
///
/// `faces` is ordered by detection order. `restored_image` is the full
/// composited frame; it is `None` for pre-aligned inputs, which have no
/// full-frame context to paste into.
#[derive(Debug, Clone)]
pub struct EnhanceResult {
    pub faces: Vec<RestoredFace>,
    pub restored_image: Option<RgbImage>,
}

/// Per-call knobs for [`FaceRestorer::enhance`].
#[derive(Debug, Clone, Copy)]
pub struct EnhanceOptions {
    /// Input is already a single aligned face crop; skip detection.
    pub has_aligned: bool,
    /// Restore only the face closest to the frame center.
    pub only_center_face: bool,
    /// Composite restored faces back into the full frame.
    pub paste_back: bool,
    /// Blend factor in [0, 1]: 0 leaves the crop untouched, 1 is the full
    /// model output.
    pub weight: f32,
}

impl Default for EnhanceOptions {
    fn default() -> Self {
        Self {
            has_aligned: false,
            only_center_face: false,
            paste_back: true,
            weight: 0.5,
        }
    }
}

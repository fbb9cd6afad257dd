//! The face restoration engine handle.
//!
//! `GfpRestorer` is configured once per run (variant, upscale factor,
//! background upsampler) and then drives the per-image cycle: detect →
//! align → generate → blend → paste back. Construction is fail-fast: a
//! missing or corrupt weight file aborts before any image is touched,
//! since the engine is shared across the whole batch.

use image::{imageops, Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

use crate::alignment::{self, Similarity, FACE_SIZE, FACE_TEMPLATE_512};
use crate::background::{BackgroundUpsampler, UpsampleError};
use crate::detector::{DetectorError, FaceDetector};
use crate::types::{EnhanceOptions, EnhanceResult, FaceBox, RestoredFace};
use crate::variant::ModelVariant;

/// Generator I/O normalization: pixels map to [-1, 1].
const GEN_MEAN: f32 = 0.5;
const GEN_STD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum RestorerError {
    #[error("restoration weights not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load restoration weights: {0}")]
    WeightLoad(String),
    #[error("generator inference failed: {0}")]
    Inference(String),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Background(#[from] UpsampleError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// The restoration contract the batch orchestrator drives.
pub trait FaceRestorer {
    fn enhance(
        &mut self,
        image: &RgbImage,
        options: &EnhanceOptions,
    ) -> Result<EnhanceResult, RestorerError>;
}

pub struct GfpRestorer {
    generator: Session,
    detector: FaceDetector,
    variant: ModelVariant,
    upscale: u32,
    background: BackgroundUpsampler,
}

impl GfpRestorer {
    /// Load the generator and detector sessions. Any failure here is fatal
    /// to the run.
    pub fn new(
        generator_path: &Path,
        detector_path: &Path,
        variant: ModelVariant,
        upscale: u32,
        background: BackgroundUpsampler,
    ) -> Result<Self, RestorerError> {
        if !generator_path.is_file() {
            return Err(RestorerError::ModelNotFound(
                generator_path.display().to_string(),
            ));
        }

        let generator = Session::builder()
            .and_then(|b| b.with_intra_threads(2))
            .and_then(|b| b.commit_from_file(generator_path))
            .map_err(|e| RestorerError::WeightLoad(e.to_string()))?;

        let detector = FaceDetector::load(detector_path)?;

        tracing::info!(
            variant = %variant,
            arch = ?variant.arch(),
            channel_multiplier = variant.channel_multiplier(),
            path = %generator_path.display(),
            upscale,
            background = background.is_enabled(),
            "restoration engine ready"
        );

        Ok(Self {
            generator,
            detector,
            variant,
            upscale,
            background,
        })
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    /// Run the generator on one aligned crop and blend with the input.
    fn restore_face(&mut self, cropped: &RgbImage, weight: f32) -> Result<RgbImage, RestorerError> {
        let input = face_to_tensor(cropped);
        let outputs = self
            .generator
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RestorerError::Inference(e.to_string()))?;

        let size = FACE_SIZE as usize;
        if data.len() != 3 * size * size {
            return Err(RestorerError::Inference(format!(
                "generator returned {} values, expected {}",
                data.len(),
                3 * size * size
            )));
        }

        let restored = tensor_to_face(data, FACE_SIZE);
        Ok(blend_faces(cropped, &restored, weight))
    }
}

impl FaceRestorer for GfpRestorer {
    fn enhance(
        &mut self,
        image: &RgbImage,
        options: &EnhanceOptions,
    ) -> Result<EnhanceResult, RestorerError> {
        if options.has_aligned {
            // Pre-aligned single face crop; normalize the size and restore.
            let cropped = if image.dimensions() == (FACE_SIZE, FACE_SIZE) {
                image.clone()
            } else {
                imageops::resize(image, FACE_SIZE, FACE_SIZE, imageops::FilterType::Lanczos3)
            };
            let restored = self.restore_face(&cropped, options.weight)?;
            return Ok(EnhanceResult {
                faces: vec![RestoredFace { cropped, restored }],
                restored_image: None,
            });
        }

        let detected = self.detector.detect(image)?;
        let (width, height) = image.dimensions();
        let selected = select_faces(detected, options.only_center_face, width, height);
        tracing::debug!(faces = selected.len(), "faces selected for restoration");

        let mut placed: Vec<(Similarity, RestoredFace)> = Vec::with_capacity(selected.len());
        for face in &selected {
            let Some(landmarks) = face.landmarks else {
                tracing::warn!(
                    confidence = face.confidence,
                    "detection has no landmarks, skipping face"
                );
                continue;
            };
            let transform = Similarity::estimate(&landmarks, &FACE_TEMPLATE_512);
            let cropped = alignment::warp_crop(image, &transform, FACE_SIZE);
            let restored = self.restore_face(&cropped, options.weight)?;
            placed.push((transform, RestoredFace { cropped, restored }));
        }

        let restored_image = if options.paste_back {
            let outscale = self.upscale as f32;
            let mut canvas = self.background.render(image, outscale)?;
            for (transform, face) in &placed {
                alignment::paste_face(&mut canvas, &face.restored, transform, outscale);
            }
            Some(canvas)
        } else {
            None
        };

        Ok(EnhanceResult {
            faces: placed.into_iter().map(|(_, f)| f).collect(),
            restored_image,
        })
    }
}

/// Apply the face-selection mode: everything, or only the detection whose
/// box center is nearest the frame center.
pub fn select_faces(faces: Vec<FaceBox>, only_center: bool, width: u32, height: u32) -> Vec<FaceBox> {
    if !only_center || faces.len() <= 1 {
        return faces;
    }
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    faces
        .into_iter()
        .min_by(|a, b| {
            let da = dist2(a.center(), (cx, cy));
            let db = dist2(b.center(), (cx, cy));
            da.total_cmp(&db)
        })
        .into_iter()
        .collect()
}

fn dist2((x1, y1): (f32, f32), (x2, y2): (f32, f32)) -> f32 {
    (x1 - x2).powi(2) + (y1 - y2).powi(2)
}

/// Interpolate between the aligned input crop and the model output.
/// `weight` 0 returns the crop untouched, 1 the full model output.
pub fn blend_faces(cropped: &RgbImage, restored: &RgbImage, weight: f32) -> RgbImage {
    let w = weight.clamp(0.0, 1.0);
    if w >= 1.0 {
        return restored.clone();
    }
    if w <= 0.0 {
        return cropped.clone();
    }

    let mut out = RgbImage::new(restored.width(), restored.height());
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let r = restored.get_pixel(x, y).0;
        let c = cropped.get_pixel(x, y).0;
        let mut blended = [0u8; 3];
        for i in 0..3 {
            blended[i] =
                (r[i] as f32 * w + c[i] as f32 * (1.0 - w)).round().clamp(0.0, 255.0) as u8;
        }
        *pixel = Rgb(blended);
    }
    out
}

/// Aligned crop → NCHW tensor in [-1, 1], RGB order.
fn face_to_tensor(face: &RgbImage) -> Array4<f32> {
    let (w, h) = face.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel.0[c] as f32 / 255.0 - GEN_MEAN) / GEN_STD;
        }
    }
    tensor
}

/// Generator output ([-1, 1], NCHW) → RGB image.
fn tensor_to_face(data: &[f32], size: u32) -> RgbImage {
    let plane = (size * size) as usize;
    let mut out = RgbImage::new(size, size);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let idx = y as usize * size as usize + x as usize;
        let mut rgb = [0u8; 3];
        for c in 0..3 {
            let v = (data[c * plane + idx] * GEN_STD + GEN_MEAN) * 255.0;
            rgb[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        *pixel = Rgb(rgb);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_at(x: f32, y: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: 50.0,
            height: 50.0,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn select_faces_keeps_all_by_default() {
        let faces = vec![face_at(0.0, 0.0), face_at(100.0, 100.0), face_at(500.0, 0.0)];
        let selected = select_faces(faces, false, 640, 480);
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn select_faces_picks_the_most_central_of_three() {
        // Frame center is (320, 240); the second face straddles it.
        let faces = vec![face_at(0.0, 0.0), face_at(295.0, 215.0), face_at(500.0, 400.0)];
        let selected = select_faces(faces, true, 640, 480);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].x, 295.0);
    }

    #[test]
    fn select_faces_single_face_is_returned_unconditionally() {
        let faces = vec![face_at(600.0, 400.0)];
        let selected = select_faces(faces, true, 640, 480);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn blend_weight_zero_is_the_input_crop() {
        let cropped = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        let restored = RgbImage::from_pixel(8, 8, Rgb([200, 210, 220]));
        assert_eq!(blend_faces(&cropped, &restored, 0.0), cropped);
    }

    #[test]
    fn blend_weight_one_is_the_model_output() {
        let cropped = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        let restored = RgbImage::from_pixel(8, 8, Rgb([200, 210, 220]));
        assert_eq!(blend_faces(&cropped, &restored, 1.0), restored);
    }

    #[test]
    fn blend_midpoint_interpolates() {
        let cropped = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        let restored = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
        let blended = blend_faces(&cropped, &restored, 0.5);
        assert_eq!(blended.get_pixel(0, 0).0, [150, 150, 150]);
    }

    #[test]
    fn blend_clamps_out_of_range_weight() {
        let cropped = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        let restored = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
        assert_eq!(blend_faces(&cropped, &restored, 7.0), restored);
        assert_eq!(blend_faces(&cropped, &restored, -1.0), cropped);
    }

    #[test]
    fn face_tensor_round_trip() {
        let mut face = RgbImage::new(4, 4);
        for (i, pixel) in face.pixels_mut().enumerate() {
            *pixel = Rgb([(i * 16) as u8, 128, 255 - (i * 16) as u8]);
        }
        let tensor = face_to_tensor(&face);
        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);
        // Mid-gray maps close to 0.
        assert!(tensor[[0, 1, 0, 0]].abs() < 0.01);

        let (data, _) = tensor.into_raw_vec_and_offset();
        let back = tensor_to_face(&data, 4);
        for (a, b) in face.pixels().zip(back.pixels()) {
            for c in 0..3 {
                assert!((a.0[c] as i16 - b.0[c] as i16).abs() <= 1);
            }
        }
    }
}

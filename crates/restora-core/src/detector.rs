//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the frame to 640×640, runs the 3-stride anchor-free decode
//! with five-point landmarks, and returns NMS-filtered boxes in descending
//! confidence order. That order is the pipeline's "detection order": face
//! index 00 is always the most confident detection.

use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

use crate::types::FaceBox;
use crate::weights::WeightSpec;

const DET_INPUT_SIZE: u32 = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_NMS_THRESHOLD: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;

/// Detector weight file, resolved through the same directories as the
/// generator weights.
pub const DETECTOR_WEIGHTS: WeightSpec = WeightSpec {
    file_name: "scrfd_10g_bnkps.onnx",
    url: "https://huggingface.co/deepinsight/insightface/resolve/main/models/scrfd_10g_bnkps.onnx",
};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("detector inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and offset metadata for mapping letterboxed coordinates back to
/// the original frame.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Per-stride output tensor indices: (score, bbox, kps).
type StrideIndices = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    /// Output indices for strides [8, 16, 32], discovered by name at load
    /// time with a positional fallback.
    stride_indices: [StrideIndices; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.is_file() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD export needs 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_indices,
            "face detector loaded"
        );

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
        let (input, letterbox) = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            decode_stride(scores, bboxes, kps, stride, &letterbox, &mut detections);
        }

        let mut faces = nms(detections, DET_NMS_THRESHOLD);
        faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(faces)
    }
}

/// Letterbox the frame into a normalized NCHW tensor.
///
/// The image crate handles the bilinear resize; padding uses the mean value
/// so padded cells normalize to exactly zero.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (w, h) = image.dimensions();
    let scale = (DET_INPUT_SIZE as f32 / w as f32).min(DET_INPUT_SIZE as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    let pad_x = (DET_INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (DET_INPUT_SIZE - new_h) as f32 / 2.0;

    let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);
    let (ox, oy) = (pad_x.floor() as u32, pad_y.floor() as u32);

    let size = DET_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..DET_INPUT_SIZE {
        for x in 0..DET_INPUT_SIZE {
            // Padding stays at the mean so it normalizes to exactly 0.
            let rgb = if x >= ox && x < ox + new_w && y >= oy && y < oy + new_h {
                resized.get_pixel(x - ox, y - oy).0.map(|v| v as f32)
            } else {
                [DET_MEAN; 3]
            };
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (rgb[c] - DET_MEAN) / DET_STD;
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

/// Discover output tensor ordering by name ("score_8", "bbox_16", ...),
/// falling back to the standard positional layout
/// [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn discover_output_indices(names: &[String]) -> [StrideIndices; 3] {
    let find = |prefix: &str, stride: usize| names
        .iter()
        .position(|n| n == &format!("{prefix}_{stride}"));

    let named = DET_STRIDES.iter().all(|&s| {
        find("score", s).is_some() && find("bbox", s).is_some() && find("kps", s).is_some()
    });

    if named {
        std::array::from_fn(|i| {
            let s = DET_STRIDES[i];
            (
                find("score", s).unwrap(),
                find("bbox", s).unwrap(),
                find("kps", s).unwrap(),
            )
        })
    } else {
        [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
    }
}

/// Decode one stride level into frame-space boxes.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    out: &mut Vec<FaceBox>,
) {
    let grid = DET_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;
    let unmap = |x: f32, y: f32| {
        (
            (x - letterbox.pad_x) / letterbox.scale,
            (y - letterbox.pad_y) / letterbox.scale,
        )
    };

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= DET_CONFIDENCE_THRESHOLD {
            continue;
        }

        let cell = idx / DET_ANCHORS_PER_CELL;
        let anchor_cx = ((cell % grid) * stride) as f32;
        let anchor_cy = ((cell / grid) * stride) as f32;

        let b = idx * 4;
        if b + 3 >= bboxes.len() {
            continue;
        }
        let (x1, y1) = unmap(
            anchor_cx - bboxes[b] * stride as f32,
            anchor_cy - bboxes[b + 1] * stride as f32,
        );
        let (x2, y2) = unmap(
            anchor_cx + bboxes[b + 2] * stride as f32,
            anchor_cy + bboxes[b + 3] * stride as f32,
        );

        let k = idx * 10;
        let landmarks = if k + 9 < kps.len() {
            let mut points = [(0.0f32, 0.0f32); 5];
            for (i, point) in points.iter_mut().enumerate() {
                *point = unmap(
                    anchor_cx + kps[k + i * 2] * stride as f32,
                    anchor_cy + kps[k + i * 2 + 1] * stride as f32,
                );
            }
            Some(points)
        } else {
            None
        };

        out.push(FaceBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
}

/// Non-maximum suppression over confidence-sorted detections.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn face(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn iou_identical_boxes() {
        let a = face(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_disjoint_boxes() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = face(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn iou_half_overlap() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = face(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn nms_suppresses_overlaps_and_keeps_the_rest() {
        let detections = vec![
            face(5.0, 5.0, 100.0, 100.0, 0.8),
            face(0.0, 0.0, 100.0, 100.0, 0.9),
            face(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = nms(detections, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn nms_empty_input() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn letterbox_round_trip() {
        let image = RgbImage::from_pixel(320, 240, Rgb([128, 128, 128]));
        let (_, lb) = preprocess(&image);

        let (ox, oy) = (100.0f32, 50.0f32);
        let mapped = (ox * lb.scale + lb.pad_x, oy * lb.scale + lb.pad_y);
        let back = (
            (mapped.0 - lb.pad_x) / lb.scale,
            (mapped.1 - lb.pad_y) / lb.scale,
        );
        assert!((back.0 - ox).abs() < 0.1);
        assert!((back.1 - oy).abs() < 0.1);
    }

    #[test]
    fn preprocess_pads_to_zero() {
        // A wide frame letterboxes with bands at top and bottom; padded
        // cells must normalize to 0.
        let image = RgbImage::from_pixel(640, 320, Rgb([10, 10, 10]));
        let (tensor, _) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!(tensor[[0, 0, 0, 0]].abs() < 1e-6);
        assert!(tensor[[0, 0, 320, 320]] < 0.0); // dark content pixel
    }

    #[test]
    fn output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "kps_8", "kps_16",
            "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            discover_output_indices(&names),
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        );
    }

    #[test]
    fn output_indices_shuffled_names() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            discover_output_indices(&names),
            [(2, 0, 1), (5, 3, 4), (8, 6, 7)]
        );
    }

    #[test]
    fn output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(
            discover_output_indices(&names),
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        );
    }

    #[test]
    fn decode_keeps_only_confident_anchors() {
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let grid = DET_INPUT_SIZE as usize / 32;
        let anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[0] = 0.9;
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.5f32; anchors * 10];

        let mut out = Vec::new();
        decode_stride(&scores, &bboxes, &kps, 32, &lb, &mut out);

        assert_eq!(out.len(), 1);
        let det = &out[0];
        // Anchor (0,0), offsets of 1.0 cell in every direction: a 64×64 box
        // centered on the anchor.
        assert!((det.x + 32.0).abs() < 1e-3);
        assert!((det.width - 64.0).abs() < 1e-3);
        assert!(det.landmarks.is_some());
    }
}

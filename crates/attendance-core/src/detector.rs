//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the photo to 640×640, runs the model, decodes the three
//! anchor-free stride levels and applies non-maximum suppression.

use crate::photo::Photo;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download it from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Where the photo sits inside the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - new_w) / 2.0).floor(),
            pad_y: ((target as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Model-input coordinates back to photo coordinates.
    fn to_photo(&self, (x, y): (f32, f32)) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LevelOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    levels: [LevelOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            "loaded SCRFD model"
        );

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                names.len()
            )));
        }

        let levels = match named_levels(&names) {
            Some(levels) => {
                tracing::debug!(?levels, "SCRFD: name-based output mapping");
                levels
            }
            None => {
                tracing::debug!("SCRFD: positional output mapping");
                positional_levels()
            }
        };

        Ok(Self { session, levels })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, photo: &Photo) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = prepare_input(photo);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in self.levels.iter().zip(SCRFD_STRIDES.iter()) {
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let scores = tensor(level.score, "scores")?;
            let bboxes = tensor(level.bbox, "bboxes")?;
            let kps = tensor(level.kps, "kps")?;

            candidates.extend(decode_level(
                scores,
                bboxes,
                kps,
                stride,
                SCRFD_INPUT_SIZE as usize,
                &letterbox,
            ));
        }

        let faces = suppress(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection done");
        Ok(faces)
    }
}

/// Letterbox the photo into a normalised NCHW tensor (RGB order).
fn prepare_input(photo: &Photo) -> (Array4<f32>, Letterbox) {
    let size = SCRFD_INPUT_SIZE;
    let letterbox = Letterbox::fit(photo.width(), photo.height(), size);

    let new_w = ((photo.width() as f32 * letterbox.scale).round() as u32).clamp(1, size);
    let new_h = ((photo.height() as f32 * letterbox.scale).round() as u32).clamp(1, size);
    let resized = imageops::resize(&photo.rgb, new_w, new_h, FilterType::Triangle);

    // Padding stays 0.0, i.e. SCRFD_MEAN after normalisation.
    let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
    let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (off_x + x as usize, off_y + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Map outputs named `score_8`, `bbox_8`, `kps_8`, ... to stride levels.
fn named_levels(names: &[String]) -> Option<[LevelOutputs; 3]> {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let level = |stride: usize| {
        Some(LevelOutputs {
            score: find("score", stride)?,
            bbox: find("bbox", stride)?,
            kps: find("kps", stride)?,
        })
    };
    Some([
        level(SCRFD_STRIDES[0])?,
        level(SCRFD_STRIDES[1])?,
        level(SCRFD_STRIDES[2])?,
    ])
}

/// Standard export order: [0-2] scores, [3-5] bboxes, [6-8] kps.
fn positional_levels() -> [LevelOutputs; 3] {
    std::array::from_fn(|i| LevelOutputs {
        score: i,
        bbox: i + 3,
        kps: i + 6,
    })
}

/// Decode one stride level into candidate boxes in photo coordinates.
fn decode_level(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let step = stride as f32;

    scores
        .iter()
        .take(grid * grid * SCRFD_ANCHORS_PER_CELL)
        .enumerate()
        .filter(|&(_, &score)| score > SCRFD_CONFIDENCE_THRESHOLD)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * step;
            let cy = (cell / grid) as f32 * step;

            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.to_photo((cx - d[0] * step, cy - d[1] * step));
            let (x2, y2) = letterbox.to_photo((cx + d[2] * step, cy + d[3] * step));

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.to_photo((cx + k[i * 2] * step, cy + k[i * 2 + 1] * step))
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; result is sorted by confidence.
fn suppress(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-Union between two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
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
    use image::{Rgb, RgbImage};

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // 50 / (100 + 100 - 50)
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_suppress_keeps_best_of_overlapping() {
        let faces = suppress(
            vec![
                bbox(1.0, 1.0, 100.0, 100.0, 0.7),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
                bbox(300.0, 300.0, 50.0, 50.0, 0.8),
            ],
            0.4,
        );
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].confidence, 0.9);
        assert_eq!(faces[1].confidence, 0.8);
    }

    #[test]
    fn test_named_levels_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let levels = named_levels(&names).unwrap();
        assert_eq!(levels[0], LevelOutputs { score: 2, bbox: 0, kps: 1 });
        assert_eq!(levels[2], LevelOutputs { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_numeric_names_fall_back_to_positions() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert!(named_levels(&names).is_none());
        let levels = positional_levels();
        assert_eq!(levels[1], LevelOutputs { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_letterbox_wide_photo() {
        let lb = Letterbox::fit(1280, 640, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 160.0);
        assert_eq!(lb.to_photo((320.0, 320.0)), (640.0, 320.0));
    }

    #[test]
    fn test_prepare_input_pads_with_mean() {
        let photo = Photo::from_rgb(RgbImage::from_pixel(64, 32, Rgb([255, 0, 0])));
        let (tensor, lb) = prepare_input(&photo);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.pad_y, 160.0);
        // padding row
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        // inside the photo: red channel high, blue low
        assert!(tensor[[0, 0, 320, 320]] > 0.9);
        assert!(tensor[[0, 2, 320, 320]] < -0.9);
    }

    #[test]
    fn test_decode_level_single_anchor() {
        // stride 32 on a 64px input = 2x2 grid, 8 anchors
        let mut scores = vec![0.0f32; 8];
        scores[6] = 0.9; // cell 3 = (1, 1)
        let mut bboxes = vec![0.0f32; 32];
        bboxes[24..28].copy_from_slice(&[0.5, 0.5, 0.5, 0.5]);
        let kps = vec![0.0f32; 80];
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };

        let faces = decode_level(&scores, &bboxes, &kps, 32, 64, &lb);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert_eq!((f.x, f.y, f.width, f.height), (16.0, 16.0, 32.0, 32.0));
        assert_eq!(f.landmarks.unwrap()[0], (32.0, 32.0));
    }
}

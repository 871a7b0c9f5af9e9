//! Object Detector (§4.3).
//!
//! Grounded on `TODO/detector.rs`'s `Detector` (YOLOv8-class ONNX model over
//! `ort`, letterbox resize, CHW conversion, per-box class-confidence scan),
//! generalized from "single best detection in a crop" to the spec's
//! `detect(frame) -> [Detection]` contract: every box above
//! `det_confidence_floor` across the whole frame, not just the top one
//! within a pre-cropped region.

use crate::config::SessionConfig;
use crate::frame::Frame;
use ndarray::{Array, CowArray};
use opencv::core::{Mat, Scalar, Size};
use opencv::imgproc;
use opencv::prelude::*;
use ort::{Environment, ExecutionProvider, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::sync::Arc;

/// COCO class names, index-addressed exactly as YOLOv8 emits them.
const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// `detect(frame) -> [Detection]` (§4.3 "Detector contract"). Implementations
/// are expected to be local and synchronous; the scheduler calls them only
/// from the analysis worker so they never block capture.
pub trait ObjectDetector: Send {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<Detection>>;
}

/// A bounding box in frame coordinates (§3 `Detection`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BBox {
    pub fn centroid(&self) -> (f64, f64) {
        (self.x as f64 + self.w as f64 / 2.0, self.y as f64 + self.h as f64 / 2.0)
    }

    pub fn area(&self) -> f64 {
        (self.w.max(0) as f64) * (self.h.max(0) as f64)
    }

    /// Intersection-over-union with another box (§4.3 association).
    pub fn iou(&self, other: &BBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);
        let inter_w = (x2 - x1).max(0) as f64;
        let inter_h = (y2 - y1).max(0) as f64;
        let inter = inter_w * inter_h;
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One detection within a frame (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub class: String,
    pub confidence: f32,
    pub track_id: Option<u64>,
}

/// YOLOv8-class ONNX model wrapper. One instance per session, called only
/// from the analysis worker.
pub struct Detector {
    session: Session,
    input_size: i32,
    det_confidence_floor: f32,
}

impl Detector {
    pub fn new(model_path: &str, input_size: i32, config: &SessionConfig) -> anyhow::Result<Self> {
        let env = Arc::new(Environment::builder().with_name("vigilcore_detector").build()?);

        let builder = SessionBuilder::new(&env)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .with_execution_providers([
                ExecutionProvider::XNNPACK(Default::default()),
                ExecutionProvider::CPU(Default::default()),
            ])?;

        let session = builder.with_model_from_file(model_path)?;

        Ok(Self {
            session,
            input_size,
            det_confidence_floor: config.det_confidence_floor,
        })
    }

    /// `detect(frame) -> [Detection]` (§4.3). Returns detections in
    /// descending-confidence order; the caller applies the `focus` filter.
    pub fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        let image = frame.image();
        let (letterboxed, scale, pad_x, pad_y) = letterbox(image, self.input_size)?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&letterboxed, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let data = mat_to_chw_f32(&rgb, self.input_size as usize)?;

        let sz = self.input_size as usize;
        let array = CowArray::from(Array::from_shape_vec((1, 3, sz, sz), data)?.into_dyn());
        let inputs = vec![Value::from_array(self.session.allocator(), &array)?];
        let outputs = self.session.run(inputs)?;

        let output = outputs[0].try_extract::<f32>()?;
        let view = output.view();
        let shape = view.shape();
        let num_boxes = shape[2];
        let num_classes = shape[1] - 4;

        let mut detections = Vec::new();
        let s = self.input_size as f32;

        for i in 0..num_boxes {
            let cx = view[[0, 0, i]];
            let cy = view[[0, 1, i]];
            let bw = view[[0, 2, i]];
            let bh = view[[0, 3, i]];

            let mut best_score = 0f32;
            let mut best_class = 0usize;
            for c in 0..num_classes.min(COCO_CLASSES.len()) {
                let score = view[[0, 4 + c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }

            if best_score < self.det_confidence_floor {
                continue;
            }

            let x1 = ((cx - bw / 2.0 - pad_x as f32) / scale as f32).max(0.0);
            let y1 = ((cy - bh / 2.0 - pad_y as f32) / scale as f32).max(0.0);
            let x2 = ((cx + bw / 2.0 - pad_x as f32) / scale as f32).min(s / scale as f32);
            let y2 = ((cy + bh / 2.0 - pad_y as f32) / scale as f32).min(s / scale as f32);

            detections.push(Detection {
                bbox: BBox {
                    x: x1 as i32,
                    y: y1 as i32,
                    w: (x2 - x1).max(0.0) as i32,
                    h: (y2 - y1).max(0.0) as i32,
                },
                class: COCO_CLASSES[best_class].to_string(),
                confidence: best_score,
                track_id: None,
            });
        }

        // Stable order per §3: descending confidence, ties by class then position.
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.class.cmp(&b.class))
                .then_with(|| a.bbox.x.cmp(&b.bbox.x))
                .then_with(|| a.bbox.y.cmp(&b.bbox.y))
        });

        Ok(detections)
    }
}

impl ObjectDetector for Detector {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        self.detect(frame)
    }
}

/// Discards detections whose class is not in `focus` (§4.3 "Focus filter").
/// An empty `focus` keeps everything.
pub fn apply_focus_filter(detections: Vec<Detection>, focus: &std::collections::HashSet<String>) -> Vec<Detection> {
    if focus.is_empty() {
        return detections;
    }
    detections.into_iter().filter(|d| focus.contains(&d.class)).collect()
}

fn letterbox(src: &Mat, target: i32) -> opencv::Result<(Mat, f64, i32, i32)> {
    let w = src.cols();
    let h = src.rows();
    let scale = (target as f64 / w.max(h) as f64).min(1.0);
    let new_w = (w as f64 * scale) as i32;
    let new_h = (h as f64 * scale) as i32;

    let mut resized = Mat::default();
    imgproc::resize(src, &mut resized, Size::new(new_w, new_h), 0.0, 0.0, imgproc::INTER_LINEAR)?;

    let pad_x = (target - new_w) / 2;
    let pad_y = (target - new_h) / 2;

    let mut padded = Mat::default();
    opencv::core::copy_make_border(
        &resized,
        &mut padded,
        pad_y,
        target - new_h - pad_y,
        pad_x,
        target - new_w - pad_x,
        opencv::core::BORDER_CONSTANT,
        Scalar::new(114.0, 114.0, 114.0, 0.0),
    )?;

    Ok((padded, scale, pad_x, pad_y))
}

fn mat_to_chw_f32(mat: &Mat, size: usize) -> opencv::Result<Vec<f32>> {
    let total = 3 * size * size;
    let mut out = vec![0f32; total];
    let data = mat.data_bytes()?;

    for h in 0..size {
        for w in 0..size {
            let pixel_idx = (h * size + w) * 3;
            for c in 0..3usize {
                let chw_idx = c * size * size + h * size + w;
                out[chw_idx] = data[pixel_idx + c] as f32 / 255.0;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BBox { x: 0, y: 0, w: 10, h: 10 };
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BBox { x: 0, y: 0, w: 10, h: 10 };
        let b = BBox { x: 100, y: 100, w: 10, h: 10 };
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn focus_filter_empty_set_keeps_everything() {
        let dets = vec![Detection {
            bbox: BBox { x: 0, y: 0, w: 1, h: 1 },
            class: "car".into(),
            confidence: 0.9,
            track_id: None,
        }];
        let kept = apply_focus_filter(dets.clone(), &Default::default());
        assert_eq!(kept, dets);
    }

    #[test]
    fn focus_filter_drops_non_matching_class() {
        let dets = vec![Detection {
            bbox: BBox { x: 0, y: 0, w: 1, h: 1 },
            class: "car".into(),
            confidence: 0.9,
            track_id: None,
        }];
        let mut focus = std::collections::HashSet::new();
        focus.insert("person".to_string());
        assert!(apply_focus_filter(dets, &focus).is_empty());
    }
}

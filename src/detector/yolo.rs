//! YOLO detector over ONNX Runtime
//!
//! Accepts yolov8/yolov11-style outputs in either layout,
//! `[1, features, anchors]` or `[1, anchors, features]`, with or without
//! an objectness column (features 84 vs 85 for COCO).

use super::Detector;
use crate::error::Result;
use crate::models::{BBox, Detection};
use ndarray::{Array4, CowArray};
use opencv::core::{self, Mat, MatTraitConst, Scalar, Size, Vec3f};
use opencv::imgproc;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// ONNX YOLO detector; one instance per channel
pub struct YoloDetector {
    session: Session,
    conf_threshold: f32,
    nms_threshold: f32,
    input_width: i32,
    input_height: i32,
}

impl YoloDetector {
    pub fn new(
        model_path: &str,
        conf_threshold: f32,
        nms_threshold: f32,
        input_width: i32,
        input_height: i32,
    ) -> Result<Self> {
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| crate::Error::Runtime(format!("model load failed: {e}")))?;

        tracing::info!(model = %model_path, "YOLO session ready");

        Ok(Self {
            session,
            conf_threshold,
            nms_threshold,
            input_width,
            input_height,
        })
    }

    /// Letterbox to the model input size and pack CHW float tensor
    fn preprocess(&self, image: &Mat) -> Result<(Array4<f32>, f32, i32, i32)> {
        let mut rgb = Mat::default();
        imgproc::cvt_color(image, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let (scale, pad_x, pad_y) = letterbox_params(
            image.cols(),
            image.rows(),
            self.input_width,
            self.input_height,
        );
        let new_width = (image.cols() as f32 * scale) as i32;
        let new_height = (image.rows() as f32 * scale) as i32;

        let mut resized = Mat::default();
        imgproc::resize(
            &rgb,
            &mut resized,
            Size::new(new_width, new_height),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut padded = Mat::default();
        core::copy_make_border(
            &resized,
            &mut padded,
            pad_y,
            self.input_height - new_height - pad_y,
            pad_x,
            self.input_width - new_width - pad_x,
            core::BORDER_CONSTANT,
            Scalar::new(114.0, 114.0, 114.0, 0.0),
        )?;

        let mut normalized = Mat::default();
        padded.convert_to(&mut normalized, core::CV_32FC3, 1.0 / 255.0, 0.0)?;

        let mut tensor =
            Array4::<f32>::zeros((1, 3, self.input_height as usize, self.input_width as usize));
        for y in 0..self.input_height {
            for x in 0..self.input_width {
                let px: &Vec3f = normalized.at_2d(y, x)?;
                for c in 0..3 {
                    tensor[[0, c, y as usize, x as usize]] = px[c];
                }
            }
        }

        Ok((tensor, scale, pad_x, pad_y))
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let orig_width = frame.cols();
        let orig_height = frame.rows();
        let (tensor, scale, pad_x, pad_y) = self.preprocess(frame)?;

        let input_dyn = CowArray::from(tensor).into_dyn();
        let input = ort::inputs![TensorRef::from_array_view(&input_dyn)
            .map_err(|e| crate::Error::Internal(format!("input tensor: {e}")))?];

        let outputs = self
            .session
            .run(input)
            .map_err(|e| crate::Error::Internal(format!("inference failed: {e}")))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| crate::Error::Internal(format!("output tensor: {e}")))?;
        let dims: Vec<i64> = shape.iter().copied().collect();

        let candidates = parse_output(
            data,
            &dims,
            self.conf_threshold,
            scale,
            pad_x,
            pad_y,
            orig_width,
            orig_height,
        );

        Ok(nms(candidates, self.nms_threshold))
    }

    fn update_thresholds(&mut self, conf_threshold: f32, nms_threshold: f32) {
        self.conf_threshold = conf_threshold;
        self.nms_threshold = nms_threshold;
    }
}

/// Scale factor and symmetric padding for aspect-preserving resize
fn letterbox_params(src_w: i32, src_h: i32, dst_w: i32, dst_h: i32) -> (f32, i32, i32) {
    let scale = (dst_w as f32 / src_w as f32).min(dst_h as f32 / src_h as f32);
    let new_w = (src_w as f32 * scale) as i32;
    let new_h = (src_h as f32 * scale) as i32;
    (scale, (dst_w - new_w) / 2, (dst_h - new_h) / 2)
}

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Decode raw output into pixel-space candidates (before NMS)
#[allow(clippy::too_many_arguments)]
fn parse_output(
    output: &[f32],
    shape: &[i64],
    conf_threshold: f32,
    scale: f32,
    pad_x: i32,
    pad_y: i32,
    orig_width: i32,
    orig_height: i32,
) -> Vec<Detection> {
    if shape.len() != 3 {
        tracing::warn!(dims = shape.len(), "Unsupported detector output rank");
        return Vec::new();
    }

    // [1, features, anchors] when dim1 < dim2, else [1, anchors, features]
    let transposed = shape[1] < shape[2];
    let (features, anchors) = if transposed {
        (shape[1] as usize, shape[2] as usize)
    } else {
        (shape[2] as usize, shape[1] as usize)
    };
    let has_objectness = features == 85;
    let class_start = if has_objectness { 5 } else { 4 };
    let num_classes = features - class_start;

    let at = |feature: usize, anchor: usize| -> f32 {
        if transposed {
            output[feature * anchors + anchor]
        } else {
            output[anchor * features + feature]
        }
    };

    // anchors below this are noise for this model family
    let threshold = conf_threshold.max(0.5);

    let mut detections = Vec::new();
    for i in 0..anchors {
        let objectness = if has_objectness {
            let o = at(4, i);
            if o < 0.1 {
                continue;
            }
            Some(o)
        } else {
            None
        };

        let mut max_logit = f32::MIN;
        let mut class_id = 0usize;
        for j in 0..num_classes {
            let logit = at(class_start + j, i);
            if logit > max_logit {
                max_logit = logit;
                class_id = j;
            }
        }

        let class_conf = sigmoid(max_logit);
        let confidence = match objectness {
            Some(o) => sigmoid(o) * class_conf,
            None => class_conf,
        };
        if confidence < threshold {
            continue;
        }

        // undo letterbox, convert center+size to top-left, clamp to frame
        let cx = (at(0, i) - pad_x as f32) / scale;
        let cy = (at(1, i) - pad_y as f32) / scale;
        let w = at(2, i) / scale;
        let h = at(3, i) / scale;

        let x = (cx - w / 2.0).clamp(0.0, orig_width as f32);
        let y = (cy - h / 2.0).clamp(0.0, orig_height as f32);
        let w = w.clamp(1.0, orig_width as f32 - x);
        let h = h.clamp(1.0, orig_height as f32 - y);

        detections.push(Detection {
            class_id: class_id as i64,
            class_name: COCO_CLASSES
                .get(class_id)
                .copied()
                .unwrap_or("unknown")
                .to_string(),
            confidence,
            bbox: BBox {
                x: x as i32,
                y: y as i32,
                width: w as i32,
                height: h as i32,
            },
        });
    }

    detections
}

/// Greedy per-frame NMS across all classes
fn nms(mut detections: Vec<Detection>, nms_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        let area = (det.bbox.width * det.bbox.height) as f32;
        if area <= 0.0 {
            continue;
        }
        let overlaps = keep.iter().any(|k| iou(&det.bbox, &k.bbox) > nms_threshold);
        if !overlaps {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &BBox, b: &BBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = ((x2 - x1) * (y2 - y1)) as f32;
    let union = (a.width * a.height + b.width * b.height) as f32 - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_params_wide_source() {
        // 1920x1080 into 640x640: scale by width, pad vertically
        let (scale, pad_x, pad_y) = letterbox_params(1920, 1080, 640, 640);
        assert!((scale - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(pad_x, 0);
        assert_eq!(pad_y, (640 - 360) / 2);
    }

    #[test]
    fn test_sigmoid_symmetry() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!((sigmoid(4.0) + sigmoid(-4.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_transposed_output() {
        // [1, 84, 2]: anchor 0 is a confident person, anchor 1 is noise
        let anchors = 2usize;
        let features = 84usize;
        let mut data = vec![0.0f32; features * anchors];
        // center 320,320 size 100x200 at input scale
        data[0 * anchors] = 320.0;
        data[1 * anchors] = 320.0;
        data[2 * anchors] = 100.0;
        data[3 * anchors] = 200.0;
        data[4 * anchors] = 6.0; // class 0 logit, sigmoid ~ 0.9975
        data[4 * anchors + 1] = -6.0;

        let dets = parse_output(&data, &[1, 84, 2], 0.6, 1.0, 0, 0, 640, 640);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_name, "person");
        assert_eq!(dets[0].bbox.x, 270);
        assert_eq!(dets[0].bbox.y, 220);
    }

    #[test]
    fn test_parse_undoes_letterbox() {
        let anchors = 1usize;
        let features = 84usize;
        let mut data = vec![0.0f32; features * anchors];
        data[0] = 320.0; // cx at input scale
        data[1] = 320.0;
        data[2] = 64.0;
        data[3] = 64.0;
        data[4] = 8.0;

        // scale 0.5, pad (0, 140): a 1280x720 source into 640x640
        let dets = parse_output(&data, &[1, 84, 1], 0.5, 0.5, 0, 140, 1280, 720);
        assert_eq!(dets.len(), 1);
        let b = &dets[0].bbox;
        // cx = 640, cy = 360, w = h = 128
        assert_eq!(b.x, 576);
        assert_eq!(b.y, 296);
        assert_eq!(b.width, 128);
        assert_eq!(b.height, 128);
    }

    #[test]
    fn test_nms_suppresses_overlap() {
        let mk = |x: i32, conf: f32| Detection {
            class_id: 0,
            class_name: "person".to_string(),
            confidence: conf,
            bbox: BBox {
                x,
                y: 0,
                width: 100,
                height: 100,
            },
        };

        // heavy overlap keeps only the strongest; the distant one survives
        let out = nms(vec![mk(0, 0.8), mk(10, 0.9), mk(500, 0.7)], 0.45);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.9);
        assert_eq!(out[1].bbox.x, 500);
    }
}

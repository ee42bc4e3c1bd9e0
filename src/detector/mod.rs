//! Object detection
//!
//! ## Responsibilities
//!
//! - Detector trait: BGR frame in, pixel-space detections out
//! - ONNX Runtime environment singleton (one per process)
//! - YOLO implementation over `ort`
//! - FrameCadencer: skip-N detection scheduling

mod cadencer;
mod yolo;

pub use cadencer::FrameCadencer;
pub use yolo::YoloDetector;

use crate::error::Result;
use crate::models::Detection;
use once_cell::sync::OnceCell;
use opencv::core::Mat;

static ORT_ENV: OnceCell<()> = OnceCell::new();

/// Initialize the process-wide ONNX Runtime environment.
///
/// Must be called exactly once before any detector is built; a second
/// call is a `Runtime` fault.
pub fn init_environment() -> Result<()> {
    ORT_ENV
        .set(())
        .map_err(|_| crate::Error::Runtime("detector environment already initialized".to_string()))?;

    ort::init()
        .with_name("detector_service")
        .commit()
        .map_err(|e| crate::Error::Runtime(format!("onnxruntime init failed: {e}")))?;

    Ok(())
}

/// Detection capability: one instance per channel, used sequentially
pub trait Detector: Send {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>>;

    /// Apply new thresholds to an already-built session; model and
    /// input size stay fixed for the detector's lifetime
    fn update_thresholds(&mut self, conf_threshold: f32, nms_threshold: f32);
}

/// Keep only detections whose class id is enabled; empty list = all
pub fn filter_by_classes(detections: Vec<Detection>, enabled_classes: &[i64]) -> Vec<Detection> {
    if enabled_classes.is_empty() {
        return detections;
    }
    detections
        .into_iter()
        .filter(|d| enabled_classes.contains(&d.class_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BBox;

    fn det(class_id: i64) -> Detection {
        Detection {
            class_id,
            class_name: format!("class{class_id}"),
            confidence: 0.9,
            bbox: BBox {
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            },
        }
    }

    #[test]
    fn test_empty_class_list_passes_all() {
        let detections = vec![det(0), det(2)];
        assert_eq!(filter_by_classes(detections, &[]).len(), 2);
    }

    #[test]
    fn test_class_filter() {
        let detections = vec![det(0), det(2), det(5)];
        let filtered = filter_by_classes(detections, &[0, 5]);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|d| d.class_id == 0 || d.class_id == 5));
    }

    #[test]
    fn test_double_init_rejected() {
        // first call may fail if onnxruntime is absent in the test
        // environment, but the second must always be a Runtime fault
        let _ = init_environment();
        assert!(matches!(
            init_environment(),
            Err(crate::Error::Runtime(_))
        ));
    }
}

//! Per-channel detection cadence
//!
//! Detection is the most expensive step of the pipeline; frames between
//! detection ticks reuse the previous result so the outbound stream still
//! runs at source rate.

use crate::models::Detection;

/// Decides per frame whether to invoke the detector
pub struct FrameCadencer {
    interval: u32,
    counter: u64,
    last: Vec<Detection>,
}

impl FrameCadencer {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            counter: 0,
            last: Vec::new(),
        }
    }

    /// Advance one frame; true means the detector should run now
    pub fn advance(&mut self) -> bool {
        let detect = self.counter % self.interval as u64 == 0;
        self.counter += 1;
        detect
    }

    /// Store a fresh detection result for reuse
    pub fn store(&mut self, detections: Vec<Detection>) {
        self.last = detections;
    }

    /// Previous detections (empty until the first detector run)
    pub fn last(&self) -> &[Detection] {
        &self.last
    }

    /// Apply a changed detection_interval without resetting the counter
    pub fn set_interval(&mut self, interval: u32) {
        self.interval = interval.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BBox;

    fn det() -> Detection {
        Detection {
            class_id: 0,
            class_name: "person".to_string(),
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
    fn test_detects_every_nth_frame() {
        let mut cadencer = FrameCadencer::new(3);
        let ticks: Vec<bool> = (0..9).map(|_| cadencer.advance()).collect();
        assert_eq!(
            ticks,
            vec![true, false, false, true, false, false, true, false, false]
        );
    }

    #[test]
    fn test_interval_one_always_detects() {
        let mut cadencer = FrameCadencer::new(1);
        assert!((0..5).all(|_| cadencer.advance()));
    }

    #[test]
    fn test_zero_interval_clamped() {
        let mut cadencer = FrameCadencer::new(0);
        assert!(cadencer.advance());
        assert!(cadencer.advance());
    }

    #[test]
    fn test_reuses_last_detections() {
        let mut cadencer = FrameCadencer::new(3);
        assert!(cadencer.last().is_empty());

        cadencer.advance();
        cadencer.store(vec![det()]);

        assert!(!cadencer.advance());
        assert_eq!(cadencer.last().len(), 1);
    }
}

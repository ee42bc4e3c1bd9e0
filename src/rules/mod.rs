//! Alert rule evaluation
//!
//! ## Responsibilities
//!
//! - RuleEvaluator: pure function from (detections, config, frame size)
//!   to the list of fired rules with their matched detections
//! - SuppressionTable: per (channel, rule) time-windowed suppression

mod geometry;
mod suppression;

pub use geometry::roi_contains;
pub use suppression::SuppressionTable;

use crate::config_store::{AlertRule, AlgorithmConfig};
use crate::models::Detection;

/// One rule that fired, with the detections that satisfied it
#[derive(Debug, Clone)]
pub struct FiredRule {
    pub rule: AlertRule,
    pub matched: Vec<Detection>,
}

impl FiredRule {
    /// Representative detection: highest confidence, first wins on ties
    pub fn representative(&self) -> Option<&Detection> {
        let mut best: Option<&Detection> = None;
        for d in &self.matched {
            match best {
                Some(b) if d.confidence <= b.confidence => {}
                _ => best = Some(d),
            }
        }
        best
    }

    /// Alert type label: rule name, or comma-joined unique class names
    pub fn alert_type(&self) -> String {
        if !self.rule.name.is_empty() {
            return self.rule.name.clone();
        }
        let mut names: Vec<&str> = Vec::new();
        for d in &self.matched {
            if !names.contains(&d.class_name.as_str()) {
                names.push(&d.class_name);
            }
        }
        names.join(",")
    }
}

/// Evaluate all enabled rules against one frame's detections.
///
/// ROI containment uses the detection bbox center, with normalized ROI
/// points scaled to the current frame dimensions.
pub fn evaluate(
    detections: &[Detection],
    config: &AlgorithmConfig,
    frame_width: i32,
    frame_height: i32,
) -> Vec<FiredRule> {
    let mut fired = Vec::new();

    for rule in config.alert_rules.iter().filter(|r| r.enabled) {
        let rois: Vec<_> = config
            .rois
            .iter()
            .filter(|roi| roi.enabled && rule.roi_ids.contains(&roi.id))
            .collect();

        let matched: Vec<Detection> = detections
            .iter()
            .filter(|d| {
                if !rule.target_classes.is_empty()
                    && !rule.target_classes.contains(&d.class_name)
                {
                    return false;
                }
                if d.confidence < rule.min_confidence {
                    return false;
                }
                if rule.roi_ids.is_empty() {
                    return true;
                }
                let (cx, cy) = d.bbox.center();
                rois.iter()
                    .any(|roi| roi_contains(roi, cx, cy, frame_width as f32, frame_height as f32))
            })
            .cloned()
            .collect();

        if should_trigger(rule, matched.len()) {
            fired.push(FiredRule {
                rule: rule.clone(),
                matched,
            });
        }
    }

    fired
}

/// Lower-bound satisfied, or upper bound (when set) violated
fn should_trigger(rule: &AlertRule, count: usize) -> bool {
    let count = count as u32;
    count >= rule.min_count || (rule.max_count > 0 && count > rule.max_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::{Roi, RoiPoint, RoiType};
    use crate::models::BBox;

    fn det(class: &str, conf: f32, x: i32, y: i32) -> Detection {
        Detection {
            class_id: 0,
            class_name: class.to_string(),
            confidence: conf,
            bbox: BBox {
                x,
                y,
                width: 100,
                height: 100,
            },
        }
    }

    fn config_with_rule(rule: AlertRule) -> AlgorithmConfig {
        let mut config = AlgorithmConfig::default_for(1);
        config.alert_rules.push(rule);
        config
    }

    #[test]
    fn test_class_and_confidence_filter() {
        let rule = AlertRule {
            id: 1,
            target_classes: vec!["person".to_string()],
            min_confidence: 0.6,
            ..Default::default()
        };
        let config = config_with_rule(rule);

        let detections = vec![
            det("person", 0.9, 100, 100),
            det("person", 0.5, 200, 200), // below threshold
            det("car", 0.95, 300, 300),   // wrong class
        ];

        let fired = evaluate(&detections, &config, 640, 480);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].matched.len(), 1);
        assert_eq!(fired[0].matched[0].confidence, 0.9);
    }

    #[test]
    fn test_roi_gates_by_bbox_center() {
        // rectangle covering the upper-left quadrant of a 1000x1000 frame
        let roi = Roi {
            id: 1,
            roi_type: RoiType::Rectangle,
            name: "gate".to_string(),
            enabled: true,
            points: vec![RoiPoint { x: 0.0, y: 0.0 }, RoiPoint { x: 0.5, y: 0.5 }],
            coordinate_space: None,
        };
        let rule = AlertRule {
            id: 1,
            roi_ids: vec![1],
            min_confidence: 0.5,
            ..Default::default()
        };
        let mut config = config_with_rule(rule);
        config.rois.push(roi);

        // center (650, 650) is outside the ROI
        let outside = vec![det("person", 0.9, 600, 600)];
        assert!(evaluate(&outside, &config, 1000, 1000).is_empty());

        // center (150, 150) is inside
        let inside = vec![det("person", 0.9, 100, 100)];
        let fired = evaluate(&inside, &config, 1000, 1000);
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn test_disabled_rule_and_roi_skipped() {
        let rule = AlertRule {
            id: 1,
            enabled: false,
            ..Default::default()
        };
        let config = config_with_rule(rule);
        let detections = vec![det("person", 0.9, 0, 0)];
        assert!(evaluate(&detections, &config, 640, 480).is_empty());
    }

    #[test]
    fn test_max_count_violation_fires() {
        let rule = AlertRule {
            id: 1,
            min_count: 5, // not reached
            max_count: 2, // exceeded
            ..Default::default()
        };
        let config = config_with_rule(rule);

        let detections = vec![
            det("person", 0.9, 0, 0),
            det("person", 0.9, 100, 0),
            det("person", 0.9, 200, 0),
        ];
        let fired = evaluate(&detections, &config, 640, 480);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].matched.len(), 3);
    }

    #[test]
    fn test_min_count_not_reached() {
        let rule = AlertRule {
            id: 1,
            min_count: 2,
            ..Default::default()
        };
        let config = config_with_rule(rule);
        let detections = vec![det("person", 0.9, 0, 0)];
        assert!(evaluate(&detections, &config, 640, 480).is_empty());
    }

    #[test]
    fn test_representative_highest_confidence_first_wins() {
        let fired = FiredRule {
            rule: AlertRule::default(),
            matched: vec![
                det("person", 0.7, 0, 0),
                det("person", 0.9, 100, 0),
                det("person", 0.9, 200, 0), // tie, first wins
            ],
        };
        let rep = fired.representative().unwrap();
        assert_eq!(rep.confidence, 0.9);
        assert_eq!(rep.bbox.x, 100);
    }

    #[test]
    fn test_alert_type_falls_back_to_class_names() {
        let fired = FiredRule {
            rule: AlertRule::default(), // empty name
            matched: vec![
                det("person", 0.9, 0, 0),
                det("car", 0.8, 100, 0),
                det("person", 0.7, 200, 0),
            ],
        };
        assert_eq!(fired.alert_type(), "person,car");

        let named = FiredRule {
            rule: AlertRule {
                name: "intrusion".to_string(),
                ..Default::default()
            },
            matched: vec![det("person", 0.9, 0, 0)],
        };
        assert_eq!(named.alert_type(), "intrusion");
    }
}

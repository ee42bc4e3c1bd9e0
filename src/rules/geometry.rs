//! ROI containment tests
//!
//! ROIs are stored normalized; at evaluation time points are scaled to
//! the current frame's pixel dimensions before testing.

use crate::config_store::{Roi, RoiType};

/// Test whether a pixel point falls inside an ROI, scaling the ROI's
/// normalized points by the given frame dimensions.
pub fn roi_contains(roi: &Roi, px: f32, py: f32, frame_width: f32, frame_height: f32) -> bool {
    let points: Vec<(f32, f32)> = roi
        .points
        .iter()
        .map(|p| (p.x as f32 * frame_width, p.y as f32 * frame_height))
        .collect();

    match roi.roi_type {
        RoiType::Rectangle => {
            if points.len() < 2 {
                return false;
            }
            point_in_rectangle(px, py, points[0], points[1])
        }
        RoiType::Polygon => {
            if points.len() < 3 {
                return false;
            }
            point_in_polygon(px, py, &points)
        }
    }
}

/// Axis-aligned rectangle test; corner order is normalized first
fn point_in_rectangle(px: f32, py: f32, a: (f32, f32), b: (f32, f32)) -> bool {
    let (min_x, max_x) = (a.0.min(b.0), a.0.max(b.0));
    let (min_y, max_y) = (a.1.min(b.1), a.1.max(b.1));
    px >= min_x && px <= max_x && py >= min_y && py <= max_y
}

/// Ray casting: count edge crossings of a horizontal ray from the point
fn point_in_polygon(px: f32, py: f32, points: &[(f32, f32)]) -> bool {
    let n = points.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = points[i];
        let (xj, yj) = points[j];
        if ((yi > py) != (yj > py)) && (px < (xj - xi) * (py - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::RoiPoint;

    fn rect_roi(p1: (f64, f64), p2: (f64, f64)) -> Roi {
        Roi {
            id: 1,
            roi_type: RoiType::Rectangle,
            name: "r".to_string(),
            enabled: true,
            points: vec![
                RoiPoint { x: p1.0, y: p1.1 },
                RoiPoint { x: p2.0, y: p2.1 },
            ],
            coordinate_space: None,
        }
    }

    fn poly_roi(pts: &[(f64, f64)]) -> Roi {
        Roi {
            id: 2,
            roi_type: RoiType::Polygon,
            name: "p".to_string(),
            enabled: true,
            points: pts.iter().map(|&(x, y)| RoiPoint { x, y }).collect(),
            coordinate_space: None,
        }
    }

    #[test]
    fn test_rectangle_containment_scaled_to_frame() {
        // normalized (0,0)-(0.5,0.5) over a 1000x1000 frame
        let roi = rect_roi((0.0, 0.0), (0.5, 0.5));
        assert!(roi_contains(&roi, 150.0, 150.0, 1000.0, 1000.0));
        assert!(!roi_contains(&roi, 650.0, 650.0, 1000.0, 1000.0));
    }

    #[test]
    fn test_rectangle_corner_order_normalized() {
        // bottom-right given first
        let roi = rect_roi((0.5, 0.5), (0.0, 0.0));
        assert!(roi_contains(&roi, 100.0, 100.0, 1000.0, 1000.0));
    }

    #[test]
    fn test_polygon_ray_casting() {
        // triangle covering the lower-left half
        let roi = poly_roi(&[(0.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        assert!(roi_contains(&roi, 100.0, 900.0, 1000.0, 1000.0));
        assert!(!roi_contains(&roi, 900.0, 100.0, 1000.0, 1000.0));
    }

    #[test]
    fn test_degenerate_shapes_reject() {
        let mut roi = rect_roi((0.0, 0.0), (1.0, 1.0));
        roi.points.truncate(1);
        assert!(!roi_contains(&roi, 10.0, 10.0, 100.0, 100.0));

        let mut poly = poly_roi(&[(0.0, 0.0), (1.0, 0.0), (0.5, 1.0)]);
        poly.points.truncate(2);
        assert!(!roi_contains(&poly, 50.0, 50.0, 100.0, 100.0));
    }
}

// src/geometry.rs
//
// Road membership test.
//
// A vehicle is on-road when its ground contact point (bottom-centre of the
// box) lies at least the configured tolerance inside a road polygon. Signed
// distance follows the pointPolygonTest convention: positive inside,
// negative outside, zero on an edge.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One road-class segmentation instance. Lives for a single frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoadPolygon {
    pub points: Vec<Point2>,
}

impl RoadPolygon {
    pub fn new(points: Vec<Point2>) -> Self {
        Self { points }
    }

    pub fn is_degenerate(&self) -> bool {
        self.points.len() < 3
    }

    pub fn signed_distance(&self, p: Point2) -> f32 {
        signed_distance(p, &self.points)
    }
}

/// Ground contact point of an `[x1, y1, x2, y2]` box.
pub fn bottom_center(bbox: &[f32; 4]) -> Point2 {
    Point2::new((bbox[0] + bbox[2]) / 2.0, bbox[3])
}

pub fn signed_distance(p: Point2, polygon: &[Point2]) -> f32 {
    if polygon.is_empty() {
        return f32::NEG_INFINITY;
    }

    let mut min_dist = f32::INFINITY;
    let n = polygon.len();
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        min_dist = min_dist.min(distance_to_segment(p, a, b));
    }

    if min_dist == 0.0 {
        return 0.0;
    }

    if contains(p, polygon) {
        min_dist
    } else {
        -min_dist
    }
}

/// Crossing-number inclusion test. Edge points are handled by the caller.
fn contains(p: Point2, polygon: &[Point2]) -> bool {
    let mut inside = false;
    let n = polygon.len();
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > p.y) != (pj.y > p.y) {
            let x_cross = pj.x + (p.y - pj.y) * (pi.x - pj.x) / (pi.y - pj.y);
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn distance_to_segment(p: Point2, a: Point2, b: Point2) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.x + t * dx, a.y + t * dy);
    ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()
}

/// No polygons means nothing is on-road, so vehicles accumulate off-road
/// frames while the road is not visible.
pub fn is_on_road(p: Point2, roads: &[RoadPolygon], tolerance: f32) -> bool {
    roads
        .iter()
        .filter(|road| !road.is_degenerate())
        .any(|road| road.signed_distance(p) >= tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f32, y0: f32, size: f32) -> RoadPolygon {
        RoadPolygon::new(vec![
            Point2::new(x0, y0),
            Point2::new(x0 + size, y0),
            Point2::new(x0 + size, y0 + size),
            Point2::new(x0, y0 + size),
        ])
    }

    #[test]
    fn test_signed_distance_inside_positive() {
        let road = square(0.0, 0.0, 100.0);
        assert!((road.signed_distance(Point2::new(50.0, 10.0)) - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_signed_distance_outside_negative() {
        let road = square(0.0, 0.0, 100.0);
        assert!((road.signed_distance(Point2::new(103.0, 50.0)) + 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_signed_distance_on_edge_is_zero() {
        let road = square(0.0, 0.0, 100.0);
        assert_eq!(road.signed_distance(Point2::new(100.0, 40.0)), 0.0);
    }

    #[test]
    fn test_tolerance_requires_margin_inside_edge() {
        let roads = vec![square(0.0, 0.0, 100.0)];
        // 3px, 5px and 6px inside the right edge.
        assert!(!is_on_road(Point2::new(97.0, 50.0), &roads, 5.0));
        assert!(is_on_road(Point2::new(95.0, 50.0), &roads, 5.0));
        assert!(is_on_road(Point2::new(94.0, 50.0), &roads, 5.0));
        // Just outside never counts.
        assert!(!is_on_road(Point2::new(103.0, 50.0), &roads, 5.0));
        assert!(!is_on_road(Point2::new(103.0, 50.0), &roads, 0.0));
        // Zero tolerance accepts the edge itself.
        assert!(is_on_road(Point2::new(100.0, 50.0), &roads, 0.0));
    }

    #[test]
    fn test_any_polygon_counts() {
        let roads = vec![square(0.0, 0.0, 10.0), square(200.0, 200.0, 50.0)];
        assert!(is_on_road(Point2::new(220.0, 220.0), &roads, 0.0));
    }

    #[test]
    fn test_no_roads_is_never_on_road() {
        assert!(!is_on_road(Point2::new(0.0, 0.0), &[], 1000.0));
    }

    #[test]
    fn test_degenerate_polygon_ignored() {
        let line = RoadPolygon::new(vec![Point2::new(0.0, 0.0), Point2::new(10.0, 0.0)]);
        assert!(!is_on_road(Point2::new(5.0, 0.0), &[line], 5.0));
    }

    #[test]
    fn test_concave_polygon() {
        // U shape: the notch between the arms is outside.
        let u = RoadPolygon::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(30.0, 0.0),
            Point2::new(30.0, 100.0),
            Point2::new(70.0, 100.0),
            Point2::new(70.0, 0.0),
            Point2::new(100.0, 0.0),
            Point2::new(100.0, 130.0),
            Point2::new(0.0, 130.0),
        ]);
        assert!(u.signed_distance(Point2::new(50.0, 50.0)) < 0.0);
        assert!(u.signed_distance(Point2::new(15.0, 50.0)) > 0.0);
    }

    #[test]
    fn test_bottom_center() {
        let p = bottom_center(&[10.0, 20.0, 30.0, 80.0]);
        assert_eq!(p, Point2::new(20.0, 80.0));
    }
}

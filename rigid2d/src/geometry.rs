//! Small planar geometry helpers shared by the edge predicates and the
//! collision tests.
use std::f64::consts::TAU;

use glam::{DMat2, DVec2};

/// Angle folded into [0, 2π).
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle % TAU;
    if a < 0.0 {
        a + TAU
    } else {
        a
    }
}

/// Rotates `v` counter-clockwise by `angle`.
pub fn rotate(v: DVec2, angle: f64) -> DVec2 {
    DMat2::from_angle(angle) * v
}

/// Projection parameter of `p` onto the line through `a` and `b`,
/// so that the closest point on the line is `a + t * (b - a)`.
/// The segment itself covers t in [0, 1].
pub fn project_param(a: DVec2, b: DVec2, p: DVec2) -> f64 {
    let d = b - a;
    let len2 = d.length_squared();
    if len2 == 0.0 {
        return 0.0;
    }
    (p - a).dot(d) / len2
}

/// Signed distance from `p` to the line through `a` and `b`, positive on
/// the side the left-hand perpendicular of `b - a` points to.
pub fn line_distance(a: DVec2, b: DVec2, p: DVec2) -> f64 {
    let d = b - a;
    let len = d.length();
    if len == 0.0 {
        return (p - a).length();
    }
    d.perp().dot(p - a) / len
}

/// Intersection of segments `a1-a2` and `b1-b2`, if any.
pub fn segment_intersection(a1: DVec2, a2: DVec2, b1: DVec2, b2: DVec2) -> Option<DVec2> {
    let da = a2 - a1;
    let db = b2 - b1;
    let denom = da.perp_dot(db);
    if denom == 0.0 {
        return None;
    }
    let t = (b1 - a1).perp_dot(db) / denom;
    let u = (b1 - a1).perp_dot(da) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some(a1 + t * da)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::dvec2;

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(-0.5) - (TAU - 0.5)).abs() < 1e-12);
        assert!((normalize_angle(TAU + 0.25) - 0.25).abs() < 1e-12);
        assert_eq!(normalize_angle(0.0), 0.0);
    }

    #[test]
    fn test_project_param() {
        let a = dvec2(0.0, 0.0);
        let b = dvec2(2.0, 0.0);
        assert!((project_param(a, b, dvec2(1.0, 5.0)) - 0.5).abs() < 1e-12);
        assert!(project_param(a, b, dvec2(-1.0, 0.0)) < 0.0);
        assert!(project_param(a, b, dvec2(3.0, 0.0)) > 1.0);
    }

    #[test]
    fn test_line_distance_sign() {
        let a = dvec2(0.0, 0.0);
        let b = dvec2(1.0, 0.0);
        assert!((line_distance(a, b, dvec2(0.5, 2.0)) - 2.0).abs() < 1e-12);
        assert!((line_distance(a, b, dvec2(0.5, -2.0)) + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_segment_intersection() {
        let p = segment_intersection(
            dvec2(-1.0, 0.0),
            dvec2(1.0, 0.0),
            dvec2(0.0, -1.0),
            dvec2(0.0, 1.0),
        );
        assert_eq!(p, Some(dvec2(0.0, 0.0)));
        let none = segment_intersection(
            dvec2(-1.0, 0.0),
            dvec2(1.0, 0.0),
            dvec2(2.0, -1.0),
            dvec2(2.0, 1.0),
        );
        assert_eq!(none, None);
    }
}

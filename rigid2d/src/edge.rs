//! Boundary elements of a polygon: vertices and the two edge kinds.
//!
//! All coordinates in this module are body coordinates; the owning polygon
//! applies the body-to-world transform. An edge's outward normal points away
//! from the material of the body.
use std::f64::consts::TAU;

use glam::{dvec2, DVec2};

use crate::error::BuildError;
use crate::geometry::{normalize_angle, project_param};

/// A point on the polygon boundary, with back-references to its incident
/// edges in counter-clockwise order.
#[derive(Clone, Debug)]
pub struct Vertex {
    pub pos: DVec2,
    pub edge_before: Option<usize>,
    pub edge_after: Option<usize>,
}

impl Vertex {
    pub fn new(pos: DVec2) -> Vertex {
        Vertex {
            pos,
            edge_before: None,
            edge_after: None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum EdgeShape {
    Straight {
        /// Which side of the line is outside the body: with the edge running
        /// left to right, `true` puts the outside above the edge. For a
        /// vertical edge `true` puts the outside toward positive x.
        outside_is_up: bool,
        /// Outward unit normal, fixed for the whole edge.
        normal: DVec2,
    },
    Circular {
        center: DVec2,
        radius: f64,
        /// Which of the two arcs between the endpoints the edge follows.
        clockwise: bool,
        /// `true` for a convex bump, `false` for a hollow (the material
        /// surrounds the arc).
        outside_is_out: bool,
        /// Angle of the start vertex about the center.
        start_angle: f64,
        /// Absolute angular span swept from the start in the `clockwise`
        /// direction; a span of 2π is a full circle.
        span: f64,
    },
}

/// One boundary edge. Start and end vertices are indices into the owning
/// polygon's vertex list; `p1`/`p2` cache their positions.
#[derive(Clone, Debug)]
pub struct Edge {
    /// Index of this edge within the owning polygon, assigned on finish.
    pub index: usize,
    pub v1: usize,
    pub v2: usize,
    pub p1: DVec2,
    pub p2: DVec2,
    pub shape: EdgeShape,
    /// Center of the tightest bounding circle we track for the edge.
    pub centroid: DVec2,
    /// Radius of that circle, overshooting the true maximum by 25% so that
    /// proximity pruning can never miss a genuine contact.
    pub centroid_radius: f64,
}

/// Overshoot applied to every centroid radius.
const CENTROID_OVERSHOOT: f64 = 1.25;

impl Edge {
    pub fn straight(
        v1: usize,
        v2: usize,
        p1: DVec2,
        p2: DVec2,
        outside_is_up: bool,
    ) -> Result<Edge, BuildError> {
        let d = p2 - p1;
        let len = d.length();
        if len == 0.0 {
            return Err(BuildError::ZeroLengthEdge { at: (p1.x, p1.y) });
        }
        let mut normal = d.perp() / len;
        let up = if normal.y != 0.0 {
            normal.y > 0.0
        } else {
            normal.x > 0.0
        };
        if up != outside_is_up {
            normal = -normal;
        }
        let centroid = (p1 + p2) / 2.0;
        Ok(Edge {
            index: 0,
            v1,
            v2,
            p1,
            p2,
            shape: EdgeShape::Straight {
                outside_is_up,
                normal,
            },
            centroid,
            centroid_radius: CENTROID_OVERSHOOT * len / 2.0,
        })
    }

    pub fn circular(
        v1: usize,
        v2: usize,
        p1: DVec2,
        p2: DVec2,
        center: DVec2,
        clockwise: bool,
        outside_is_out: bool,
    ) -> Result<Edge, BuildError> {
        let start_radius = (p1 - center).length();
        let end_radius = (p2 - center).length();
        if (start_radius - end_radius).abs() > 1e-8 * start_radius.max(1.0) {
            return Err(BuildError::InconsistentRadius {
                start_radius,
                end_radius,
            });
        }
        if start_radius == 0.0 {
            return Err(BuildError::ZeroLengthEdge { at: (p1.x, p1.y) });
        }
        let radius = start_radius;
        let start_angle = (p1.y - center.y).atan2(p1.x - center.x);
        let end_angle = (p2.y - center.y).atan2(p2.x - center.x);
        let mut span = if clockwise {
            normalize_angle(start_angle - end_angle)
        } else {
            normalize_angle(end_angle - start_angle)
        };
        // Coincident endpoints close the full circle.
        if span < 1e-12 {
            span = TAU;
        }
        let (centroid, max_dist) = if span >= TAU - 1e-12 {
            (center, radius)
        } else {
            let chord_mid = (p1 + p2) / 2.0;
            let mid_angle = if clockwise {
                start_angle - span / 2.0
            } else {
                start_angle + span / 2.0
            };
            let arc_mid = center + radius * dvec2(mid_angle.cos(), mid_angle.sin());
            let max = (p1 - chord_mid)
                .length()
                .max((arc_mid - chord_mid).length());
            (chord_mid, max)
        };
        Ok(Edge {
            index: 0,
            v1,
            v2,
            p1,
            p2,
            shape: EdgeShape::Circular {
                center,
                radius,
                clockwise,
                outside_is_out,
                start_angle,
                span,
            },
            centroid,
            centroid_radius: CENTROID_OVERSHOOT * max_dist,
        })
    }

    pub fn is_straight(&self) -> bool {
        matches!(self.shape, EdgeShape::Straight { .. })
    }

    /// Signed distance from a body-coordinate point to the edge, positive
    /// outside the body. Returns infinity when the point projects outside
    /// the segment band or the arc span, so a finite result always pairs
    /// with a meaningful normal.
    pub fn distance_to_point(&self, p: DVec2) -> f64 {
        match self.shape {
            EdgeShape::Straight { normal, .. } => {
                let t = project_param(self.p1, self.p2, p);
                if !(0.0..=1.0).contains(&t) {
                    return f64::INFINITY;
                }
                normal.dot(p - self.p1)
            }
            EdgeShape::Circular {
                center,
                radius,
                outside_is_out,
                ..
            } => {
                let rel = p - center;
                let angle = rel.y.atan2(rel.x);
                if !self.within_arc(angle) {
                    return f64::INFINITY;
                }
                let d = rel.length();
                if outside_is_out {
                    d - radius
                } else {
                    radius - d
                }
            }
        }
    }

    /// Signed distance to the edge's supporting line or circle, without the
    /// segment/arc capping of [`Edge::distance_to_point`].
    pub fn distance_to_line(&self, p: DVec2) -> f64 {
        match self.shape {
            EdgeShape::Straight { normal, .. } => normal.dot(p - self.p1),
            EdgeShape::Circular {
                center,
                radius,
                outside_is_out,
                ..
            } => {
                let d = (p - center).length();
                if outside_is_out {
                    d - radius
                } else {
                    radius - d
                }
            }
        }
    }

    /// Outward unit normal at a body-coordinate point on (or near) the edge.
    pub fn normal_at(&self, p: DVec2) -> DVec2 {
        match self.shape {
            EdgeShape::Straight { normal, .. } => normal,
            EdgeShape::Circular {
                center,
                outside_is_out,
                ..
            } => {
                let u = (p - center).try_normalize().unwrap_or(DVec2::X);
                if outside_is_out {
                    u
                } else {
                    -u
                }
            }
        }
    }

    /// Signed radius of curvature at a point on the edge: positive for a
    /// convex arc, negative for a hollow one, infinite for a straight edge.
    pub fn curvature(&self, _p: DVec2) -> f64 {
        match self.shape {
            EdgeShape::Straight { .. } => f64::INFINITY,
            EdgeShape::Circular {
                radius,
                outside_is_out,
                ..
            } => {
                if outside_is_out {
                    radius
                } else {
                    -radius
                }
            }
        }
    }

    pub fn max_distance_from_centroid(&self) -> f64 {
        self.centroid_radius / CENTROID_OVERSHOOT
    }

    /// Whether the polar angle about a circular edge's center falls on the
    /// arc. Straight edges answer true.
    pub fn within_arc(&self, angle: f64) -> bool {
        match self.shape {
            EdgeShape::Straight { .. } => true,
            EdgeShape::Circular {
                clockwise,
                start_angle,
                span,
                ..
            } => {
                if span >= TAU - 1e-12 {
                    return true;
                }
                let off = if clockwise {
                    normalize_angle(start_angle - angle)
                } else {
                    normalize_angle(angle - start_angle)
                };
                off <= span + 1e-12 || off >= TAU - 1e-12
            }
        }
    }
}

/// Circle-against-circle proximity test used to prune edge pairs before the
/// expensive contact tests. `swellage` widens the test, typically by twice
/// the distance tolerance.
pub fn intersection_possible(c1: DVec2, r1: f64, c2: DVec2, r2: f64, swellage: f64) -> bool {
    (c1 - c2).length() <= r1 + r2 + swellage
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn quarter_arc() -> Edge {
        // From (0,2) to (2,0) around the origin, clockwise, convex.
        Edge::circular(
            0,
            1,
            dvec2(0.0, 2.0),
            dvec2(2.0, 0.0),
            DVec2::ZERO,
            true,
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_circular_edge_geometry() {
        let e = quarter_arc();
        assert!((e.curvature(dvec2(2.0, 0.0)) - 2.0).abs() < 1e-12);
        let n = e.normal_at(dvec2(2.0, 0.0));
        assert!((n - DVec2::X).length() < 1e-12);
        assert!((e.distance_to_point(DVec2::ZERO) - (-2.0)).abs() < 1e-12);
        assert!((e.distance_to_point(dvec2(4.0, 0.0)) - 2.0).abs() < 1e-12);
        assert!((e.distance_to_point(dvec2(0.0, 3.0)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_arc_span_excludes_far_side() {
        let e = quarter_arc();
        // (-3, 0) sits at angle π, outside the first-quadrant arc.
        assert_eq!(e.distance_to_point(dvec2(-3.0, 0.0)), f64::INFINITY);
        assert!(e.within_arc(PI / 4.0));
        assert!(!e.within_arc(PI));
    }

    #[test]
    fn test_full_circle() {
        let p = dvec2(1.0, 0.0);
        let e = Edge::circular(0, 0, p, p, DVec2::ZERO, false, true).unwrap();
        assert!(e.within_arc(2.5));
        assert!((e.distance_to_point(dvec2(0.0, -4.0)) - 3.0).abs() < 1e-12);
        assert_eq!(e.centroid, DVec2::ZERO);
        assert!((e.centroid_radius - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_straight_edge_distance_and_caps() {
        // Floor edge along x from (-1,0) to (1,0) with the outside above.
        let e = Edge::straight(0, 1, dvec2(-1.0, 0.0), dvec2(1.0, 0.0), true).unwrap();
        assert!((e.distance_to_point(dvec2(0.5, 0.25)) - 0.25).abs() < 1e-12);
        assert!((e.distance_to_point(dvec2(0.5, -0.25)) + 0.25).abs() < 1e-12);
        assert_eq!(e.distance_to_point(dvec2(2.0, 0.25)), f64::INFINITY);
        assert_eq!(e.curvature(dvec2(0.0, 0.0)), f64::INFINITY);
    }

    #[test]
    fn test_straight_edge_normal_orientation() {
        let up = Edge::straight(0, 1, dvec2(0.0, 0.0), dvec2(1.0, 0.0), true).unwrap();
        assert!((up.normal_at(DVec2::ZERO) - DVec2::Y).length() < 1e-12);
        let down = Edge::straight(0, 1, dvec2(0.0, 0.0), dvec2(1.0, 0.0), false).unwrap();
        assert!((down.normal_at(DVec2::ZERO) + DVec2::Y).length() < 1e-12);
        // Vertical edge: outside-is-up means positive x.
        let right = Edge::straight(0, 1, dvec2(0.0, 0.0), dvec2(0.0, 1.0), true).unwrap();
        assert!((right.normal_at(DVec2::ZERO) - DVec2::X).length() < 1e-12);
    }

    #[test]
    fn test_centroid_radius_overshoot() {
        let e = Edge::straight(0, 1, dvec2(0.0, 0.0), dvec2(2.0, 0.0), true).unwrap();
        assert!((e.centroid_radius - 1.25).abs() < 1e-12);
        assert!((e.max_distance_from_centroid() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_inconsistent_radius_rejected() {
        let err = Edge::circular(
            0,
            1,
            dvec2(0.0, 2.0),
            dvec2(3.0, 0.0),
            DVec2::ZERO,
            true,
            true,
        );
        assert!(matches!(err, Err(BuildError::InconsistentRadius { .. })));
    }

    #[test]
    fn test_intersection_possible() {
        assert!(intersection_possible(
            DVec2::ZERO,
            1.0,
            dvec2(2.5, 0.0),
            1.0,
            0.6
        ));
        assert!(!intersection_possible(
            DVec2::ZERO,
            1.0,
            dvec2(2.7, 0.0),
            1.0,
            0.6
        ));
    }
}

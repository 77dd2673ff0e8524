//! Rigid polygonal bodies and their construction.
use glam::{dvec2, DVec2};
use tracing::debug;

use crate::edge::{Edge, EdgeShape, Vertex};
use crate::error::BuildError;
use crate::geometry::rotate;

/// Reference to a simulation body: either an index into the body arena or
/// the scrim, the conceptual immovable zero-size body that anchors fixed
/// joints and springs. The scrim has infinite mass and owns no state
/// variables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyRef {
    Body(usize),
    Scrim,
}

impl BodyRef {
    pub fn index(&self) -> Option<usize> {
        match self {
            BodyRef::Body(i) => Some(*i),
            BodyRef::Scrim => None,
        }
    }

    pub fn is_scrim(&self) -> bool {
        matches!(self, BodyRef::Scrim)
    }
}

/// A rigid body bounded by one or more closed loops of edges.
///
/// Positions are split between a fixed body frame (vertices, edges, center
/// of mass) and a world pose: `pos` is the world position of the center of
/// mass and `angle` the counter-clockwise rotation of the body frame.
#[derive(Clone, Debug)]
pub struct Polygon {
    pub name: String,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    /// May be infinite for immovable bodies (walls, floors).
    pub mass: f64,
    /// Moment of inertia about the center of mass; infinite with the mass.
    pub moment: f64,
    cm_body: DVec2,
    pub pos: DVec2,
    pub angle: f64,
    pub vel: DVec2,
    pub omega: f64,
    pub elasticity: f64,
    pub distance_tol: f64,
    pub velocity_tol: f64,
    pub accuracy: f64,
    left: f64,
    right: f64,
    bottom: f64,
    top: f64,
    centroid_body: DVec2,
    centroid_radius: f64,
    /// For wall-like bodies: the only edge that participates in collision.
    pub special_edge: Option<usize>,
    /// Edges that never collide (composite bodies share internal edges).
    pub non_collide_edges: Vec<usize>,
    /// Arena indices of bodies this one never collides with.
    pub non_collide_bodies: Vec<usize>,
    /// Start of this body's 6-variable block in the state vector; assigned
    /// when the body is added to a simulation.
    pub(crate) vars_index: Option<usize>,
}

impl Polygon {
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, index: usize) -> Result<&Edge, BuildError> {
        self.edges.get(index).ok_or(BuildError::BadEdgeIndex {
            index,
            count: self.edges.len(),
        })
    }

    pub fn vars_index(&self) -> Option<usize> {
        self.vars_index
    }

    pub fn is_movable(&self) -> bool {
        self.mass.is_finite()
    }

    pub fn inv_mass(&self) -> f64 {
        if self.mass.is_finite() {
            1.0 / self.mass
        } else {
            0.0
        }
    }

    pub fn inv_moment(&self) -> f64 {
        if self.moment.is_finite() {
            1.0 / self.moment
        } else {
            0.0
        }
    }

    /// Sets the mass, scaling the moment of inertia with it so the mass
    /// distribution keeps its shape.
    pub fn set_mass(&mut self, mass: f64) {
        assert!(mass > 0.0, "mass must be positive");
        if self.mass.is_finite() && self.moment.is_finite() && mass.is_finite() {
            self.moment *= mass / self.mass;
        }
        self.mass = mass;
        if !mass.is_finite() {
            self.moment = f64::INFINITY;
            self.vel = DVec2::ZERO;
            self.omega = 0.0;
        }
    }

    pub fn set_moment(&mut self, moment: f64) {
        self.moment = moment;
    }

    /// Makes the body immovable: infinite mass and moment, zero velocity.
    pub fn set_immovable(&mut self) {
        self.mass = f64::INFINITY;
        self.moment = f64::INFINITY;
        self.vel = DVec2::ZERO;
        self.omega = 0.0;
    }

    pub fn set_position(&mut self, pos: DVec2, angle: f64) {
        self.pos = pos;
        self.angle = angle;
    }

    pub fn set_velocity(&mut self, vel: DVec2, omega: f64) {
        self.vel = vel;
        self.omega = omega;
    }

    pub fn center_of_mass_body(&self) -> DVec2 {
        self.cm_body
    }

    pub fn body_to_world(&self, p: DVec2) -> DVec2 {
        self.pos + rotate(p - self.cm_body, self.angle)
    }

    pub fn world_to_body(&self, p: DVec2) -> DVec2 {
        rotate(p - self.pos, -self.angle) + self.cm_body
    }

    /// Rotates a body-frame direction into world frame.
    pub fn rotate_to_world(&self, v: DVec2) -> DVec2 {
        rotate(v, self.angle)
    }

    /// Velocity of the material point currently at `p_world`.
    pub fn velocity_at(&self, p_world: DVec2) -> DVec2 {
        let r = p_world - self.pos;
        self.vel + self.omega * r.perp()
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn left_body(&self) -> f64 {
        self.left
    }

    pub fn right_body(&self) -> f64 {
        self.right
    }

    pub fn top_body(&self) -> f64 {
        self.top
    }

    pub fn bottom_body(&self) -> f64 {
        self.bottom
    }

    pub fn centroid_body(&self) -> DVec2 {
        self.centroid_body
    }

    pub fn centroid_world(&self) -> DVec2 {
        self.body_to_world(self.centroid_body)
    }

    pub fn centroid_radius(&self) -> f64 {
        self.centroid_radius
    }

    /// Smallest distance from the center of mass to the boundary. Feeds the
    /// per-pair speed limit that decides when bounding-disc pruning is safe.
    pub fn min_height(&self) -> f64 {
        let mut min = f64::INFINITY;
        for e in &self.edges {
            let d = e.distance_to_line(self.cm_body).abs();
            if d < min {
                min = d;
            }
        }
        if min.is_finite() {
            min
        } else {
            0.5 * self.width().min(self.height())
        }
    }

    pub fn add_non_collide_body(&mut self, index: usize) {
        if !self.non_collide_bodies.contains(&index) {
            self.non_collide_bodies.push(index);
        }
    }

    pub fn does_not_collide_with(&self, index: usize) -> bool {
        self.non_collide_bodies.contains(&index)
    }

    pub fn set_non_collide_edges(&mut self, edges: &[usize]) {
        self.non_collide_edges = edges.to_vec();
    }

    pub fn set_special_edge(&mut self, index: usize) -> Result<(), BuildError> {
        if index >= self.edges.len() {
            return Err(BuildError::BadEdgeIndex {
                index,
                count: self.edges.len(),
            });
        }
        self.special_edge = Some(index);
        Ok(())
    }

    /// Whether `edge` takes part in collision testing.
    pub fn edge_collides(&self, edge: usize) -> bool {
        if self.non_collide_edges.contains(&edge) {
            return false;
        }
        match self.special_edge {
            Some(s) => s == edge,
            None => true,
        }
    }

    pub fn translational_energy(&self) -> f64 {
        if self.mass.is_finite() {
            0.5 * self.mass * self.vel.length_squared()
        } else {
            0.0
        }
    }

    pub fn rotational_energy(&self) -> f64 {
        if self.moment.is_finite() {
            0.5 * self.moment * self.omega * self.omega
        } else {
            0.0
        }
    }
}

/// Builds a polygon from one or more closed paths of edges. Each new edge
/// starts at the previous edge's end vertex; `close_path` verifies the loop
/// returns to its starting point and fuses the duplicate vertex.
#[derive(Debug)]
pub struct PolygonBuilder {
    name: String,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    path_start: Option<usize>,
}

impl PolygonBuilder {
    pub fn new(name: impl Into<String>) -> PolygonBuilder {
        PolygonBuilder {
            name: name.into(),
            vertices: Vec::new(),
            edges: Vec::new(),
            path_start: None,
        }
    }

    pub fn start_path(&mut self, p: DVec2) -> Result<(), BuildError> {
        if self.path_start.is_some() {
            return Err(BuildError::PathAlreadyOpen);
        }
        self.path_start = Some(self.vertices.len());
        self.vertices.push(Vertex::new(p));
        Ok(())
    }

    fn last_vertex(&self) -> Result<usize, BuildError> {
        if self.path_start.is_none() {
            return Err(BuildError::NoOpenPath);
        }
        Ok(self.vertices.len() - 1)
    }

    fn push_edge(&mut self, edge: Edge) -> usize {
        let index = self.edges.len();
        let mut edge = edge;
        edge.index = index;
        self.vertices[edge.v1].edge_after = Some(index);
        self.vertices[edge.v2].edge_before = Some(index);
        self.edges.push(edge);
        index
    }

    pub fn add_straight_edge(
        &mut self,
        end: DVec2,
        outside_is_up: bool,
    ) -> Result<usize, BuildError> {
        let v1 = self.last_vertex()?;
        let p1 = self.vertices[v1].pos;
        let v2 = self.vertices.len();
        self.vertices.push(Vertex::new(end));
        let edge = Edge::straight(v1, v2, p1, end, outside_is_up)?;
        Ok(self.push_edge(edge))
    }

    pub fn add_circular_edge(
        &mut self,
        end: DVec2,
        center: DVec2,
        clockwise: bool,
        outside_is_out: bool,
    ) -> Result<usize, BuildError> {
        let v1 = self.last_vertex()?;
        let p1 = self.vertices[v1].pos;
        let v2 = self.vertices.len();
        self.vertices.push(Vertex::new(end));
        let edge = Edge::circular(v1, v2, p1, end, center, clockwise, outside_is_out)?;
        Ok(self.push_edge(edge))
    }

    pub fn close_path(&mut self) -> Result<(), BuildError> {
        let start = self.path_start.ok_or(BuildError::NoOpenPath)?;
        let last = self.vertices.len() - 1;
        if last == start {
            return Err(BuildError::Empty);
        }
        let gap = (self.vertices[last].pos - self.vertices[start].pos).length();
        if gap > 1e-8 {
            return Err(BuildError::OpenLoop { gap });
        }
        // Fuse the duplicate end vertex with the path start. Only the last
        // edge can reference it.
        let last_edge = self.vertices[last].edge_before.expect("edge before end");
        self.edges[last_edge].v2 = start;
        self.vertices[start].edge_before = Some(last_edge);
        self.vertices.pop();
        self.path_start = None;
        Ok(())
    }

    /// Computes bounds, centroids, and freezes the polygon. Mass defaults to
    /// 1 with unit moment; use the shape factories or the setters to give
    /// the body its real mass distribution.
    pub fn finish(self) -> Result<Polygon, BuildError> {
        if self.path_start.is_some() {
            return Err(BuildError::OpenLoop { gap: f64::NAN });
        }
        if self.edges.is_empty() {
            return Err(BuildError::Empty);
        }
        let (mut left, mut right) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut bottom, mut top) = (f64::INFINITY, f64::NEG_INFINITY);
        let mut include = |p: DVec2| {
            left = left.min(p.x);
            right = right.max(p.x);
            bottom = bottom.min(p.y);
            top = top.max(p.y);
        };
        for e in &self.edges {
            include(e.p1);
            include(e.p2);
            if let EdgeShape::Circular { center, radius, .. } = e.shape {
                // Axis-extreme points of the circle that lie on the arc.
                for (angle, dir) in [
                    (0.0, dvec2(1.0, 0.0)),
                    (std::f64::consts::FRAC_PI_2, dvec2(0.0, 1.0)),
                    (std::f64::consts::PI, dvec2(-1.0, 0.0)),
                    (3.0 * std::f64::consts::FRAC_PI_2, dvec2(0.0, -1.0)),
                ] {
                    if e.within_arc(angle) {
                        include(center + radius * dir);
                    }
                }
            }
        }
        let centroid_body = dvec2((left + right) / 2.0, (bottom + top) / 2.0);
        let centroid_radius = self
            .edges
            .iter()
            .map(|e| (e.centroid - centroid_body).length() + e.centroid_radius)
            .fold(0.0, f64::max);
        debug!(name = %self.name, edges = self.edges.len(), "polygon finished");
        Ok(Polygon {
            name: self.name,
            vertices: self.vertices,
            edges: self.edges,
            mass: 1.0,
            moment: 1.0,
            cm_body: centroid_body,
            pos: DVec2::ZERO,
            angle: 0.0,
            vel: DVec2::ZERO,
            omega: 0.0,
            elasticity: 1.0,
            distance_tol: 0.01,
            velocity_tol: 0.5,
            accuracy: 0.6,
            left,
            right,
            bottom,
            top,
            centroid_body,
            centroid_radius,
            special_edge: None,
            non_collide_edges: Vec::new(),
            non_collide_bodies: Vec::new(),
            vars_index: None,
        })
    }
}

/// Rectangular block centered on its center of mass, built counter-clockwise
/// from the bottom-left corner. Unit mass; moment for a uniform rectangle.
pub fn make_block(name: impl Into<String>, width: f64, height: f64) -> Polygon {
    let w = width / 2.0;
    let h = height / 2.0;
    let mut b = PolygonBuilder::new(name);
    b.start_path(dvec2(-w, -h)).expect("fresh builder");
    b.add_straight_edge(dvec2(w, -h), false).expect("bottom");
    b.add_straight_edge(dvec2(w, h), true).expect("right");
    b.add_straight_edge(dvec2(-w, h), true).expect("top");
    b.add_straight_edge(dvec2(-w, -h), false).expect("left");
    b.close_path().expect("closed rectangle");
    let mut p = b.finish().expect("valid rectangle");
    p.moment = (width * width + height * height) / 12.0;
    p
}

/// Circular ball: a single full-circle edge. Unit mass; moment for a
/// uniform disc.
pub fn make_ball(name: impl Into<String>, radius: f64) -> Polygon {
    let start = dvec2(radius, 0.0);
    let mut b = PolygonBuilder::new(name);
    b.start_path(start).expect("fresh builder");
    b.add_circular_edge(start, DVec2::ZERO, false, true)
        .expect("full circle");
    b.close_path().expect("closed circle");
    let mut p = b.finish().expect("valid ball");
    p.moment = radius * radius / 2.0;
    p
}

/// Immovable wall: a block where only `edge` collides. Edges are indexed
/// counter-clockwise from the bottom one.
pub fn make_wall(name: impl Into<String>, width: f64, height: f64, edge: usize) -> Polygon {
    let mut p = make_block(name, width, height);
    p.set_special_edge(edge).expect("block edge index");
    p.set_immovable();
    p
}

/// Index of a block's bottom edge, as built by [`make_block`].
pub const BLOCK_BOTTOM: usize = 0;
pub const BLOCK_RIGHT: usize = 1;
pub const BLOCK_TOP: usize = 2;
pub const BLOCK_LEFT: usize = 3;

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_block_bounds() {
        let p = make_block("block", 2.0, 3.0);
        assert_eq!(p.width(), 2.0);
        assert_eq!(p.height(), 3.0);
        assert_eq!(p.left_body(), -1.0);
        assert_eq!(p.right_body(), 1.0);
        assert_eq!(p.top_body(), 1.5);
        assert_eq!(p.bottom_body(), -1.5);
        assert_eq!(p.edges().len(), 4);
        assert_eq!(p.vertices().len(), 4);
    }

    #[test]
    fn test_block_normals_point_outward() {
        let p = make_block("block", 2.0, 2.0);
        let expect = [
            dvec2(0.0, -1.0),
            dvec2(1.0, 0.0),
            dvec2(0.0, 1.0),
            dvec2(-1.0, 0.0),
        ];
        for (e, n) in p.edges().iter().zip(expect) {
            assert!((e.normal_at(e.centroid) - n).length() < 1e-12, "{:?}", e);
        }
    }

    #[test]
    fn test_edge_wiring() {
        let p = make_block("block", 1.0, 1.0);
        for e in p.edges() {
            let next = (e.index + 1) % 4;
            assert_eq!(p.edges()[next].v1, e.v2);
        }
        for (i, v) in p.vertices().iter().enumerate() {
            assert_eq!(v.edge_after, Some(i));
            assert_eq!(v.edge_before, Some((i + 3) % 4));
        }
    }

    #[test]
    fn test_body_world_round_trip() {
        let mut p = make_block("block", 1.0, 3.0);
        p.set_position(dvec2(5.0, -2.0), PI / 3.0);
        for q in [dvec2(0.5, 1.5), dvec2(-0.5, -1.5), dvec2(0.1, 0.2)] {
            let back = p.world_to_body(p.body_to_world(q));
            assert!((back - q).length() < 1e-12);
        }
    }

    #[test]
    fn test_velocity_at_point() {
        let mut p = make_ball("ball", 1.0);
        p.set_position(DVec2::ZERO, 0.0);
        p.set_velocity(dvec2(1.0, 0.0), 2.0);
        // Point at (1, 0): omega x r adds (0, 2).
        let v = p.velocity_at(dvec2(1.0, 0.0));
        assert!((v - dvec2(1.0, 2.0)).length() < 1e-12);
    }

    #[test]
    fn test_set_mass_scales_moment() {
        let mut p = make_block("block", 1.0, 1.0);
        let unit_moment = p.moment;
        p.set_mass(3.0);
        assert!((p.moment - 3.0 * unit_moment).abs() < 1e-12);
    }

    #[test]
    fn test_immovable() {
        let mut p = make_wall("wall", 10.0, 1.0, BLOCK_TOP);
        assert!(!p.is_movable());
        assert_eq!(p.inv_mass(), 0.0);
        assert_eq!(p.inv_moment(), 0.0);
        assert!(p.edge_collides(BLOCK_TOP));
        assert!(!p.edge_collides(BLOCK_BOTTOM));
        p.set_velocity(dvec2(1.0, 0.0), 0.0);
        p.set_immovable();
        assert_eq!(p.vel, DVec2::ZERO);
    }

    #[test]
    fn test_ball_centroid() {
        let p = make_ball("ball", 2.0);
        assert!((p.centroid_body() - DVec2::ZERO).length() < 1e-12);
        assert!((p.centroid_radius() - 2.5).abs() < 1e-12);
        assert_eq!(p.width(), 4.0);
    }

    #[test]
    fn test_min_height() {
        let p = make_block("block", 2.0, 1.0);
        assert!((p.min_height() - 0.5).abs() < 1e-12);
        let ball = make_ball("ball", 0.75);
        assert!((ball.min_height() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_open_path_rejected() {
        let mut b = PolygonBuilder::new("bad");
        b.start_path(dvec2(0.0, 0.0)).unwrap();
        b.add_straight_edge(dvec2(1.0, 0.0), true).unwrap();
        assert!(matches!(
            b.close_path(),
            Err(BuildError::OpenLoop { .. })
        ));
        let mut b = PolygonBuilder::new("bad");
        assert!(matches!(
            b.add_straight_edge(dvec2(1.0, 0.0), true),
            Err(BuildError::NoOpenPath)
        ));
    }
}

//! Contact records and the pairwise collision search.
use glam::DVec2;
use tracing::{instrument, trace};

use crate::body::{BodyRef, Polygon};
use crate::edge::{intersection_possible, Edge, EdgeShape};
use crate::error::SimError;
use crate::geometry::project_param;

/// Classification of a contact record against the owning bodies'
/// distance tolerance δ and velocity tolerance ν.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContactStatus {
    /// Interpenetration deeper than δ/2 while still approaching; the
    /// current integration sub-step must be rejected.
    Illegal,
    /// Within tolerance and approaching faster than ν; the impulse solver
    /// must handle it.
    Imminent,
    /// Within tolerance with small relative normal speed; the contact
    /// force solver keeps it resting.
    Contact,
    Separating,
}

/// A contact or collision between two bodies, produced by the detector or
/// by a connector. The normal points from the normal body into the primary
/// body; distance and normal velocity are positive when separating.
///
/// Once created for a time step a record is immutable except for the
/// solved impulse and force magnitudes.
#[derive(Clone, Debug)]
pub struct Contact {
    pub primary: BodyRef,
    pub normal_body: BodyRef,
    /// Edge on the primary body, when the contact came from an edge rather
    /// than a vertex or a joint.
    pub primary_edge: Option<usize>,
    pub normal_edge: Option<usize>,
    /// Impact point on the primary body, world coordinates.
    pub impact1: DVec2,
    /// Impact point on the normal body, world coordinates.
    pub impact2: DVec2,
    pub normal: DVec2,
    pub distance: f64,
    /// Relative normal velocity at detection time.
    pub normal_velocity: f64,
    pub joint: bool,
    /// Signed radius of curvature at the impact point on the primary body:
    /// 0 for a vertex, infinite for a straight edge, negative for a hollow.
    pub r1: f64,
    pub r2: f64,
    pub elasticity: f64,
    /// Time derivative of the normal, when the producing connector knows it
    /// (rotating body-frame joint normals).
    pub normal_dt: Option<DVec2>,
    /// Solved impulse magnitude, written by the impulse solver.
    pub impulse: f64,
    /// Solved contact force magnitude, written by the contact-force solver.
    pub force: f64,
    pub distance_tol: f64,
    pub velocity_tol: f64,
}

impl Contact {
    pub fn status(&self) -> ContactStatus {
        if self.joint {
            return ContactStatus::Contact;
        }
        if self.distance < -self.distance_tol / 2.0 && self.normal_velocity < 0.0 {
            ContactStatus::Illegal
        } else if self.normal_velocity < -self.velocity_tol {
            ContactStatus::Imminent
        } else if self.distance <= self.distance_tol
            && self.normal_velocity.abs() <= self.velocity_tol
        {
            ContactStatus::Contact
        } else {
            ContactStatus::Separating
        }
    }

    pub fn is_illegal(&self) -> bool {
        self.status() == ContactStatus::Illegal
    }

    /// Current relative normal velocity, from the bodies' live velocities.
    pub fn relative_normal_velocity(&self, bodies: &[Option<Polygon>]) -> f64 {
        let v1 = point_velocity(bodies, self.primary, self.impact1);
        let v2 = point_velocity(bodies, self.normal_body, self.impact2);
        self.normal.dot(v1 - v2)
    }

    /// Whether `other` describes the same physical contact: same bodies and
    /// edges, impact points within a curvature-scaled nearness, normals
    /// within 26 degrees.
    pub fn similar_to(&self, other: &Contact) -> bool {
        if self.primary != other.primary
            || self.normal_body != other.normal_body
            || self.primary_edge != other.primary_edge
            || self.normal_edge != other.normal_edge
            || self.joint != other.joint
        {
            return false;
        }
        if self.normal.dot(other.normal) < 0.9 {
            return false;
        }
        (self.impact1 - other.impact1).length() < self.nearness()
    }

    /// Distance below which two impact points count as the same contact.
    fn nearness(&self) -> f64 {
        let mut r = f64::INFINITY;
        for radius in [self.r1, self.r2] {
            if radius.is_finite() && radius.abs() > 0.0 {
                r = r.min(radius.abs());
            }
        }
        if r.is_finite() {
            self.distance_tol.max(0.1 * r)
        } else {
            self.distance_tol
        }
    }
}

/// Running tally over a simulation: how many collisions were handled, how
/// many impulses applied, how many steps were backed up.
#[derive(Clone, Copy, Debug, Default)]
pub struct CollisionTotals {
    pub collisions: u32,
    pub impulses: u32,
    pub backups: u32,
}

pub(crate) fn get_body<'a>(
    bodies: &'a [Option<Polygon>],
    r: BodyRef,
) -> Option<&'a Polygon> {
    match r {
        BodyRef::Body(i) => bodies.get(i).and_then(|b| b.as_ref()),
        BodyRef::Scrim => None,
    }
}

pub(crate) fn point_velocity(
    bodies: &[Option<Polygon>],
    r: BodyRef,
    p_world: DVec2,
) -> DVec2 {
    match get_body(bodies, r) {
        Some(b) => b.velocity_at(p_world),
        None => DVec2::ZERO,
    }
}

/// Raw geometry of a freshly detected contact, before velocities and
/// tolerances are filled in.
pub(crate) struct ContactGeometry {
    pub primary: BodyRef,
    pub normal_body: BodyRef,
    pub primary_edge: Option<usize>,
    pub normal_edge: Option<usize>,
    pub impact1: DVec2,
    pub impact2: DVec2,
    pub normal: DVec2,
    pub distance: f64,
    pub joint: bool,
    pub r1: f64,
    pub r2: f64,
    pub normal_dt: Option<DVec2>,
}

pub(crate) fn make_contact(bodies: &[Option<Polygon>], g: ContactGeometry) -> Contact {
    let primary = get_body(bodies, g.primary);
    let normal = get_body(bodies, g.normal_body);
    let elasticity = match (primary, normal) {
        (Some(a), Some(b)) => a.elasticity.min(b.elasticity),
        (Some(a), None) => a.elasticity,
        (None, Some(b)) => b.elasticity,
        (None, None) => 1.0,
    };
    let tol_source = primary.or(normal);
    let (distance_tol, velocity_tol) = match tol_source {
        Some(b) => (b.distance_tol, b.velocity_tol),
        None => (0.01, 0.5),
    };
    let mut c = Contact {
        primary: g.primary,
        normal_body: g.normal_body,
        primary_edge: g.primary_edge,
        normal_edge: g.normal_edge,
        impact1: g.impact1,
        impact2: g.impact2,
        normal: g.normal,
        distance: g.distance,
        normal_velocity: 0.0,
        joint: g.joint,
        r1: g.r1,
        r2: g.r2,
        elasticity,
        normal_dt: g.normal_dt,
        impulse: 0.0,
        force: 0.0,
        distance_tol,
        velocity_tol,
    };
    c.normal_velocity = c.relative_normal_velocity(bodies);
    c
}

/// Appends `c`, or if a similar record already exists keeps whichever of
/// the two is deeper.
pub(crate) fn add_contact(out: &mut Vec<Contact>, c: Contact) {
    for existing in out.iter_mut() {
        if existing.similar_to(&c) {
            if c.distance < existing.distance {
                *existing = c;
            }
            return;
        }
    }
    out.push(c);
}

/// Pairwise collision search over all bodies. Appends contact records,
/// including illegal ones; the caller decides whether the step stands.
#[instrument(level = "trace", skip_all)]
pub(crate) fn find_body_collisions(
    out: &mut Vec<Contact>,
    bodies: &[Option<Polygon>],
    step_size: f64,
) -> Result<(), SimError> {
    for body in bodies.iter().flatten() {
        if !body.is_movable() && (body.vel != DVec2::ZERO || body.omega != 0.0) {
            return Err(SimError::ImmovableBodyMoving {
                name: body.name.clone(),
                vx: body.vel.x,
                vy: body.vel.y,
                omega: body.omega,
            });
        }
    }
    for i in 0..bodies.len() {
        let Some(a) = bodies[i].as_ref() else { continue };
        for j in (i + 1)..bodies.len() {
            let Some(b) = bodies[j].as_ref() else { continue };
            if a.does_not_collide_with(j) || b.does_not_collide_with(i) {
                continue;
            }
            if !a.is_movable() && !b.is_movable() {
                continue;
            }
            let tol = a.distance_tol.max(b.distance_tol);
            // When the pair moves slowly relative to its own size, the
            // bounding discs cannot be tunneled through within one step and
            // a miss there is conclusive.
            let speed_limit = 2.0 * (a.min_height() + b.min_height()) / step_size;
            let speed = a.vel.length()
                + b.vel.length()
                + a.omega.abs() * a.centroid_radius()
                + b.omega.abs() * b.centroid_radius();
            if speed < speed_limit
                && !intersection_possible(
                    a.centroid_world(),
                    a.centroid_radius(),
                    b.centroid_world(),
                    b.centroid_radius(),
                    2.0 * tol,
                )
            {
                continue;
            }
            test_body_pair(out, bodies, i, a, j, b, tol);
        }
    }
    trace!(contacts = out.len(), "collision search done");
    Ok(())
}

fn test_body_pair(
    out: &mut Vec<Contact>,
    bodies: &[Option<Polygon>],
    ai: usize,
    a: &Polygon,
    bi: usize,
    b: &Polygon,
    tol: f64,
) {
    for ea in a.edges() {
        if !a.edge_collides(ea.index) {
            continue;
        }
        let ca = a.body_to_world(ea.centroid);
        for eb in b.edges() {
            if !b.edge_collides(eb.index) {
                continue;
            }
            let cb = b.body_to_world(eb.centroid);
            if !intersection_possible(ca, ea.centroid_radius, cb, eb.centroid_radius, 2.0 * tol)
            {
                continue;
            }
            test_edge_pair(out, bodies, ai, a, ea, bi, b, eb, tol);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn test_edge_pair(
    out: &mut Vec<Contact>,
    bodies: &[Option<Polygon>],
    ai: usize,
    a: &Polygon,
    ea: &Edge,
    bi: usize,
    b: &Polygon,
    eb: &Edge,
    tol: f64,
) {
    match (&ea.shape, &eb.shape) {
        (EdgeShape::Straight { .. }, EdgeShape::Straight { .. }) => {
            test_vertices_against_edge(out, bodies, bi, b, eb, ai, a, ea, tol);
            test_vertices_against_edge(out, bodies, ai, a, ea, bi, b, eb, tol);
        }
        (EdgeShape::Straight { .. }, EdgeShape::Circular { .. }) => {
            test_circle_against_straight(out, bodies, bi, b, eb, ai, a, ea, tol);
            test_vertices_against_edge(out, bodies, ai, a, ea, bi, b, eb, tol);
        }
        (EdgeShape::Circular { .. }, EdgeShape::Straight { .. }) => {
            test_circle_against_straight(out, bodies, ai, a, ea, bi, b, eb, tol);
            test_vertices_against_edge(out, bodies, bi, b, eb, ai, a, ea, tol);
        }
        (EdgeShape::Circular { .. }, EdgeShape::Circular { .. }) => {
            test_circle_against_circle(out, bodies, ai, a, ea, bi, b, eb, tol);
        }
    }
}

/// Tests the endpoints of `ve` (on the vertex body) against `edge` (on the
/// edge body). The vertex acts as a corner with zero curvature radius.
#[allow(clippy::too_many_arguments)]
fn test_vertices_against_edge(
    out: &mut Vec<Contact>,
    bodies: &[Option<Polygon>],
    vi: usize,
    vertex_body: &Polygon,
    ve: &Edge,
    ei: usize,
    edge_body: &Polygon,
    edge: &Edge,
    tol: f64,
) {
    for p_body in [ve.p1, ve.p2] {
        let w = vertex_body.body_to_world(p_body);
        let p_local = edge_body.world_to_body(w);
        let d = edge.distance_to_point(p_local);
        if !d.is_finite() || d > tol {
            continue;
        }
        let n_local = edge.normal_at(p_local);
        let n_world = edge_body.rotate_to_world(n_local);
        // Nearest point on the edge, along the normal.
        let impact2 = edge_body.body_to_world(p_local - d * n_local);
        let g = ContactGeometry {
            primary: BodyRef::Body(vi),
            normal_body: BodyRef::Body(ei),
            primary_edge: None,
            normal_edge: Some(edge.index),
            impact1: w,
            impact2,
            normal: n_world,
            distance: d,
            joint: false,
            r1: 0.0,
            r2: edge.curvature(p_local),
            normal_dt: None,
        };
        add_contact(out, make_contact(bodies, g));
    }
}

/// Convex circular edge against the flat of a straight edge. Corner cases
/// fall through to the vertex tests.
#[allow(clippy::too_many_arguments)]
fn test_circle_against_straight(
    out: &mut Vec<Contact>,
    bodies: &[Option<Polygon>],
    ci: usize,
    circle_body: &Polygon,
    circle: &Edge,
    si: usize,
    straight_body: &Polygon,
    straight: &Edge,
    tol: f64,
) {
    let EdgeShape::Circular {
        center,
        radius,
        outside_is_out,
        ..
    } = circle.shape
    else {
        return;
    };
    if !outside_is_out {
        // A hollow arc meets a straight edge at its corners first; the
        // vertex tests cover that.
        return;
    }
    let center_world = circle_body.body_to_world(center);
    let c_local = straight_body.world_to_body(center_world);
    let t = project_param(straight.p1, straight.p2, c_local);
    if !(0.0..=1.0).contains(&t) {
        return;
    }
    let n_local = straight.normal_at(c_local);
    let line_dist = n_local.dot(c_local - straight.p1);
    let gap = line_dist - radius;
    if gap > tol {
        return;
    }
    let n_world = straight_body.rotate_to_world(n_local);
    // The ball's near point must actually lie on the arc.
    let ball_point_world = center_world - radius * n_world;
    let ball_local = circle_body.world_to_body(ball_point_world) - center;
    if !circle.within_arc(ball_local.y.atan2(ball_local.x)) {
        return;
    }
    let impact2 = straight_body.body_to_world(c_local - line_dist * n_local);
    let g = ContactGeometry {
        primary: BodyRef::Body(ci),
        normal_body: BodyRef::Body(si),
        primary_edge: Some(circle.index),
        normal_edge: Some(straight.index),
        impact1: ball_point_world,
        impact2,
        normal: n_world,
        distance: gap,
        joint: false,
        r1: radius,
        r2: f64::INFINITY,
        normal_dt: None,
    };
    add_contact(out, make_contact(bodies, g));
}

#[allow(clippy::too_many_arguments)]
fn test_circle_against_circle(
    out: &mut Vec<Contact>,
    bodies: &[Option<Polygon>],
    ai: usize,
    a: &Polygon,
    ea: &Edge,
    bi: usize,
    b: &Polygon,
    eb: &Edge,
    tol: f64,
) {
    let EdgeShape::Circular {
        center: ca_body,
        radius: ra,
        outside_is_out: a_out,
        ..
    } = ea.shape
    else {
        return;
    };
    let EdgeShape::Circular {
        center: cb_body,
        radius: rb,
        outside_is_out: b_out,
        ..
    } = eb.shape
    else {
        return;
    };
    let ca = a.body_to_world(ca_body);
    let cb = b.body_to_world(cb_body);
    let dist = (ca - cb).length();
    if dist == 0.0 {
        return;
    }
    let (g, gap) = match (a_out, b_out) {
        (true, true) => {
            let u = (ca - cb) / dist;
            let gap = dist - ra - rb;
            (
                ContactGeometry {
                    primary: BodyRef::Body(ai),
                    normal_body: BodyRef::Body(bi),
                    primary_edge: Some(ea.index),
                    normal_edge: Some(eb.index),
                    impact1: ca - ra * u,
                    impact2: cb + rb * u,
                    normal: u,
                    distance: gap,
                    joint: false,
                    r1: ra,
                    r2: rb,
                    normal_dt: None,
                },
                gap,
            )
        }
        (false, true) => {
            // b nests inside a's hollow.
            let u = (cb - ca) / dist;
            let gap = ra - dist - rb;
            (
                ContactGeometry {
                    primary: BodyRef::Body(bi),
                    normal_body: BodyRef::Body(ai),
                    primary_edge: Some(eb.index),
                    normal_edge: Some(ea.index),
                    impact1: cb + rb * u,
                    impact2: ca + ra * u,
                    normal: -u,
                    distance: gap,
                    joint: false,
                    r1: rb,
                    r2: -ra,
                    normal_dt: None,
                },
                gap,
            )
        }
        (true, false) => {
            // a nests inside b's hollow.
            let u = (ca - cb) / dist;
            let gap = rb - dist - ra;
            (
                ContactGeometry {
                    primary: BodyRef::Body(ai),
                    normal_body: BodyRef::Body(bi),
                    primary_edge: Some(ea.index),
                    normal_edge: Some(eb.index),
                    impact1: ca + ra * u,
                    impact2: cb + rb * u,
                    normal: -u,
                    distance: gap,
                    joint: false,
                    r1: ra,
                    r2: -rb,
                    normal_dt: None,
                },
                gap,
            )
        }
        (false, false) => return,
    };
    if gap > tol {
        return;
    }
    // Both impact points must lie on their arcs.
    let pa_local = a.world_to_body(g.impact_on(ai)) - ca_body;
    let pb_local = b.world_to_body(g.impact_on(bi)) - cb_body;
    if !ea.within_arc(pa_local.y.atan2(pa_local.x)) || !eb.within_arc(pb_local.y.atan2(pb_local.x))
    {
        return;
    }
    add_contact(out, make_contact(bodies, g));
}

impl ContactGeometry {
    /// The impact point lying on the given body.
    fn impact_on(&self, body: usize) -> DVec2 {
        if self.primary == BodyRef::Body(body) {
            self.impact1
        } else {
            self.impact2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{make_ball, make_block, make_wall, BLOCK_TOP};
    use glam::dvec2;

    fn arena(bodies: Vec<Polygon>) -> Vec<Option<Polygon>> {
        bodies.into_iter().map(Some).collect()
    }

    #[test]
    fn test_ball_resting_on_wall() {
        let wall = {
            let mut w = make_wall("floor", 10.0, 1.0, BLOCK_TOP);
            w.set_position(dvec2(0.0, -0.5), 0.0);
            w
        };
        let ball = {
            let mut b = make_ball("ball", 0.5);
            b.set_position(dvec2(0.0, 0.505), 0.0);
            b
        };
        let bodies = arena(vec![wall, ball]);
        let mut out = Vec::new();
        find_body_collisions(&mut out, &bodies, 0.01).unwrap();
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!(c.primary, BodyRef::Body(1));
        assert_eq!(c.normal_body, BodyRef::Body(0));
        assert!((c.normal - dvec2(0.0, 1.0)).length() < 1e-12);
        assert!((c.distance - 0.005).abs() < 1e-12);
        assert_eq!(c.r1, 0.5);
        assert_eq!(c.r2, f64::INFINITY);
        assert_eq!(c.status(), ContactStatus::Contact);
    }

    #[test]
    fn test_block_corners_on_wall() {
        let wall = {
            let mut w = make_wall("floor", 10.0, 1.0, BLOCK_TOP);
            w.set_position(dvec2(0.0, -0.5), 0.0);
            w
        };
        let block = {
            let mut b = make_block("block", 1.0, 1.0);
            b.set_position(dvec2(0.0, 0.505), 0.0);
            b
        };
        let bodies = arena(vec![wall, block]);
        let mut out = Vec::new();
        find_body_collisions(&mut out, &bodies, 0.01).unwrap();
        // Two corner contacts, deduplicated across adjacent edge pairs.
        assert_eq!(out.len(), 2);
        for c in &out {
            assert!((c.distance - 0.005).abs() < 1e-9);
            assert!((c.normal - dvec2(0.0, 1.0)).length() < 1e-12);
            assert_eq!(c.r1, 0.0);
            assert_eq!(c.status(), ContactStatus::Contact);
        }
        let xs: Vec<f64> = out.iter().map(|c| c.impact1.x).collect();
        assert!(xs.iter().any(|&x| (x - 0.5).abs() < 1e-9));
        assert!(xs.iter().any(|&x| (x + 0.5).abs() < 1e-9));
    }

    #[test]
    fn test_two_balls_touching() {
        let mut b1 = make_ball("b1", 0.5);
        b1.set_position(dvec2(-0.503, 0.0), 0.0);
        b1.set_velocity(dvec2(1.0, 0.0), 0.0);
        let mut b2 = make_ball("b2", 0.5);
        b2.set_position(dvec2(0.503, 0.0), 0.0);
        b2.set_velocity(dvec2(-1.0, 0.0), 0.0);
        let bodies = arena(vec![b1, b2]);
        let mut out = Vec::new();
        find_body_collisions(&mut out, &bodies, 0.01).unwrap();
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert!((c.distance - 0.006).abs() < 1e-12);
        assert!((c.normal_velocity + 2.0).abs() < 1e-12);
        assert_eq!(c.status(), ContactStatus::Imminent);
    }

    #[test]
    fn test_deep_penetration_is_illegal() {
        let mut b1 = make_ball("b1", 0.5);
        b1.set_position(dvec2(-0.49, 0.0), 0.0);
        b1.set_velocity(dvec2(0.5, 0.0), 0.0);
        let mut b2 = make_ball("b2", 0.5);
        b2.set_position(dvec2(0.49, 0.0), 0.0);
        let bodies = arena(vec![b1, b2]);
        let mut out = Vec::new();
        find_body_collisions(&mut out, &bodies, 0.01).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_illegal());
    }

    #[test]
    fn test_immovable_body_moving_is_fatal() {
        let mut wall = make_wall("floor", 10.0, 1.0, BLOCK_TOP);
        wall.mass = f64::INFINITY;
        wall.vel = dvec2(1.0, 0.0);
        let bodies = arena(vec![wall]);
        let mut out = Vec::new();
        let err = find_body_collisions(&mut out, &bodies, 0.01);
        assert!(matches!(err, Err(SimError::ImmovableBodyMoving { .. })));
    }

    #[test]
    fn test_non_collide_pair_skipped() {
        let mut b1 = make_ball("b1", 0.5);
        b1.set_position(dvec2(-0.503, 0.0), 0.0);
        let mut b2 = make_ball("b2", 0.5);
        b2.set_position(dvec2(0.503, 0.0), 0.0);
        b2.add_non_collide_body(0);
        let bodies = arena(vec![b1, b2]);
        let mut out = Vec::new();
        find_body_collisions(&mut out, &bodies, 0.01).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_separated_pair_produces_nothing() {
        let mut b1 = make_ball("b1", 0.5);
        b1.set_position(dvec2(-5.0, 0.0), 0.0);
        let b2 = make_ball("b2", 0.5);
        let bodies = arena(vec![b1, b2]);
        let mut out = Vec::new();
        find_body_collisions(&mut out, &bodies, 0.01).unwrap();
        assert!(out.is_empty());
    }
}

//! Bilateral constraints connecting two bodies.
use core::fmt;

use dyn_clone::DynClone;
use glam::DVec2;

use crate::body::{BodyRef, Polygon};
use crate::collision::{get_body, make_contact, Contact, ContactGeometry};

/// Which frame a joint's normal is fixed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordType {
    World,
    /// The normal rotates with the joint's second body, contributing a
    /// normal-derivative term to the contact-force equations.
    Body,
}

/// A connector generates contact records for bilateral constraints and can
/// snap its bodies into alignment.
pub trait Connector: fmt::Debug + DynClone {
    /// Appends this connector's contact records for the current body poses.
    fn add_collisions(&self, out: &mut Vec<Contact>, bodies: &[Option<Polygon>], time: f64);

    /// Moves the lighter of the two bodies so the connector is satisfied.
    fn align(&self, bodies: &mut [Option<Polygon>]);

    fn body1(&self) -> BodyRef;

    fn body2(&self) -> BodyRef;

    fn position1(&self, bodies: &[Option<Polygon>]) -> DVec2;

    fn position2(&self, bodies: &[Option<Polygon>]) -> DVec2;
}

dyn_clone::clone_trait_object!(Connector);

/// A single-axis joint: holds the attachment points together along its
/// normal, leaving motion perpendicular to the normal free. Two joints with
/// perpendicular normals at the same point form a pin.
#[derive(Clone, Debug)]
pub struct Joint {
    pub body1: BodyRef,
    /// Attachment in `body1` coordinates, or world coordinates for the scrim.
    pub attach1: DVec2,
    pub body2: BodyRef,
    pub attach2: DVec2,
    pub normal: DVec2,
    pub normal_frame: CoordType,
}

impl Joint {
    pub fn new(
        body1: BodyRef,
        attach1: DVec2,
        body2: BodyRef,
        attach2: DVec2,
        normal: DVec2,
        normal_frame: CoordType,
    ) -> Joint {
        Joint {
            body1,
            attach1,
            body2,
            attach2,
            normal: normal.normalize(),
            normal_frame,
        }
    }

    /// A pair of joints with perpendicular world normals pinning the two
    /// attachment points together.
    pub fn pin(body1: BodyRef, attach1: DVec2, body2: BodyRef, attach2: DVec2) -> (Joint, Joint) {
        (
            Joint::new(body1, attach1, body2, attach2, DVec2::X, CoordType::World),
            Joint::new(body1, attach1, body2, attach2, DVec2::Y, CoordType::World),
        )
    }

    fn world_point(bodies: &[Option<Polygon>], body: BodyRef, attach: DVec2) -> DVec2 {
        match get_body(bodies, body) {
            Some(b) => b.body_to_world(attach),
            None => attach,
        }
    }

    fn world_normal(&self, bodies: &[Option<Polygon>]) -> (DVec2, Option<DVec2>) {
        match self.normal_frame {
            CoordType::World => (self.normal, None),
            CoordType::Body => match get_body(bodies, self.body2) {
                Some(b) => {
                    let n = b.rotate_to_world(self.normal);
                    (n, Some(b.omega * n.perp()))
                }
                None => (self.normal, None),
            },
        }
    }

    /// Signed gap along the joint normal.
    pub fn gap(&self, bodies: &[Option<Polygon>]) -> f64 {
        let p1 = Self::world_point(bodies, self.body1, self.attach1);
        let p2 = Self::world_point(bodies, self.body2, self.attach2);
        let (n, _) = self.world_normal(bodies);
        n.dot(p1 - p2)
    }
}

impl Connector for Joint {
    fn add_collisions(&self, out: &mut Vec<Contact>, bodies: &[Option<Polygon>], _time: f64) {
        let p1 = Self::world_point(bodies, self.body1, self.attach1);
        let p2 = Self::world_point(bodies, self.body2, self.attach2);
        let (n, normal_dt) = self.world_normal(bodies);
        let g = ContactGeometry {
            primary: self.body1,
            normal_body: self.body2,
            primary_edge: None,
            normal_edge: None,
            impact1: p1,
            impact2: p2,
            normal: n,
            distance: n.dot(p1 - p2),
            joint: true,
            r1: f64::INFINITY,
            r2: f64::INFINITY,
            normal_dt,
        };
        let mut c = make_contact(bodies, g);
        // Joints never bounce.
        c.elasticity = 0.0;
        out.push(c);
    }

    fn align(&self, bodies: &mut [Option<Polygon>]) {
        let p1 = Self::world_point(bodies, self.body1, self.attach1);
        let p2 = Self::world_point(bodies, self.body2, self.attach2);
        let shift = p1 - p2;
        let move_second = match (get_body(bodies, self.body1), get_body(bodies, self.body2)) {
            (_, Some(b2)) if b2.is_movable() => true,
            (Some(b1), _) if b1.is_movable() => false,
            _ => return,
        };
        if move_second {
            if let Some(i) = self.body2.index() {
                if let Some(b) = bodies[i].as_mut() {
                    b.pos += shift;
                }
            }
        } else if let Some(i) = self.body1.index() {
            if let Some(b) = bodies[i].as_mut() {
                b.pos -= shift;
            }
        }
    }

    fn body1(&self) -> BodyRef {
        self.body1
    }

    fn body2(&self) -> BodyRef {
        self.body2
    }

    fn position1(&self, bodies: &[Option<Polygon>]) -> DVec2 {
        Self::world_point(bodies, self.body1, self.attach1)
    }

    fn position2(&self, bodies: &[Option<Polygon>]) -> DVec2 {
        Self::world_point(bodies, self.body2, self.attach2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::make_block;
    use glam::dvec2;

    fn arena(bodies: Vec<Polygon>) -> Vec<Option<Polygon>> {
        bodies.into_iter().map(Some).collect()
    }

    #[test]
    fn test_joint_gap_and_records() {
        let mut rod = make_block("rod", 0.2, 2.0);
        // Pin wants the rod's top at the origin; the rod hangs shifted.
        rod.set_position(dvec2(0.03, -1.0), 0.0);
        let bodies = arena(vec![rod]);
        let joint = Joint::new(
            BodyRef::Body(0),
            dvec2(0.0, 1.0),
            BodyRef::Scrim,
            DVec2::ZERO,
            DVec2::X,
            CoordType::World,
        );
        assert!((joint.gap(&bodies) - 0.03).abs() < 1e-12);
        let mut out = Vec::new();
        joint.add_collisions(&mut out, &bodies, 0.0);
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert!(c.joint);
        assert_eq!(c.elasticity, 0.0);
        assert!((c.distance - 0.03).abs() < 1e-12);
        assert_eq!(c.r1, f64::INFINITY);
    }

    #[test]
    fn test_align_moves_movable_body() {
        let mut rod = make_block("rod", 0.2, 2.0);
        rod.set_position(dvec2(0.5, -1.3), 0.0);
        let mut bodies = arena(vec![rod]);
        let (jx, _jy) = Joint::pin(
            BodyRef::Scrim,
            DVec2::ZERO,
            BodyRef::Body(0),
            dvec2(0.0, 1.0),
        );
        jx.align(&mut bodies);
        let top = bodies[0].as_ref().unwrap().body_to_world(dvec2(0.0, 1.0));
        assert!(top.length() < 1e-12);
    }

    #[test]
    fn test_body_frame_normal_rotates() {
        let mut rod = make_block("rod", 0.2, 2.0);
        rod.set_position(DVec2::ZERO, std::f64::consts::FRAC_PI_2);
        rod.set_velocity(DVec2::ZERO, 2.0);
        let bodies = arena(vec![rod]);
        let joint = Joint::new(
            BodyRef::Scrim,
            DVec2::ZERO,
            BodyRef::Body(0),
            DVec2::ZERO,
            DVec2::X,
            CoordType::Body,
        );
        let mut out = Vec::new();
        joint.add_collisions(&mut out, &bodies, 0.0);
        let c = &out[0];
        assert!((c.normal - DVec2::Y).length() < 1e-12);
        // d/dt of a normal rotating at omega = 2.
        let ndt = c.normal_dt.unwrap();
        assert!((ndt - dvec2(-2.0, 0.0)).length() < 1e-12);
    }
}

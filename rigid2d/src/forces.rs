//! External force laws: gravity, damping, springs.
//!
//! A force law inspects the bodies and returns the forces it wants applied
//! during the current evaluation. It must not mutate anything; the
//! simulation turns the forces into accelerations.
use core::fmt;

use dyn_clone::DynClone;
use glam::DVec2;

use crate::body::{BodyRef, Polygon};

/// A single force on one body: a world-coordinate vector applied at a
/// world-coordinate point, plus an optional pure torque.
#[derive(Clone, Debug)]
pub struct Force {
    pub body: BodyRef,
    /// Application point, world coordinates.
    pub location: DVec2,
    /// Force vector, world coordinates.
    pub direction: DVec2,
    pub torque: f64,
}

impl Force {
    pub fn at_point(body: BodyRef, location: DVec2, direction: DVec2) -> Force {
        Force {
            body,
            location,
            direction,
            torque: 0.0,
        }
    }
}

pub trait ForceLaw: fmt::Debug + DynClone {
    fn calculate_forces(&self, bodies: &[Option<Polygon>]) -> Vec<Force>;

    /// Potential energy currently stored by this law.
    fn potential_energy(&self, _bodies: &[Option<Polygon>]) -> f64 {
        0.0
    }
}

dyn_clone::clone_trait_object!(ForceLaw);

/// Uniform gravity pulling every finite-mass body down.
#[derive(Clone, Debug)]
pub struct Gravity {
    pub gravity: f64,
    /// Height at which a body's potential energy reads zero.
    pub zero_energy_level: f64,
}

impl Gravity {
    pub fn new(gravity: f64) -> Gravity {
        Gravity {
            gravity,
            zero_energy_level: 0.0,
        }
    }
}

impl ForceLaw for Gravity {
    fn calculate_forces(&self, bodies: &[Option<Polygon>]) -> Vec<Force> {
        let mut forces = Vec::new();
        for (i, b) in bodies.iter().enumerate() {
            let Some(b) = b else { continue };
            if !b.is_movable() {
                continue;
            }
            forces.push(Force::at_point(
                BodyRef::Body(i),
                b.pos,
                DVec2::new(0.0, -self.gravity * b.mass),
            ));
        }
        forces
    }

    fn potential_energy(&self, bodies: &[Option<Polygon>]) -> f64 {
        bodies
            .iter()
            .flatten()
            .filter(|b| b.is_movable())
            .map(|b| b.mass * self.gravity * (b.pos.y - self.zero_energy_level))
            .sum()
    }
}

/// Velocity-proportional drag on every finite-mass body.
#[derive(Clone, Debug)]
pub struct Damping {
    pub linear: f64,
    pub angular: f64,
}

impl Damping {
    pub fn new(linear: f64) -> Damping {
        Damping {
            linear,
            angular: 0.0,
        }
    }
}

impl ForceLaw for Damping {
    fn calculate_forces(&self, bodies: &[Option<Polygon>]) -> Vec<Force> {
        let mut forces = Vec::new();
        for (i, b) in bodies.iter().enumerate() {
            let Some(b) = b else { continue };
            if !b.is_movable() {
                continue;
            }
            forces.push(Force {
                body: BodyRef::Body(i),
                location: b.pos,
                direction: -self.linear * b.vel,
                torque: -self.angular * b.omega,
            });
        }
        forces
    }
}

/// Linear spring between attachment points on two bodies. Either end may be
/// the scrim, in which case its attachment point is a fixed world point.
#[derive(Clone, Debug)]
pub struct Spring {
    pub body1: BodyRef,
    /// Body coordinates on `body1`, or world coordinates for the scrim.
    pub attach1: DVec2,
    pub body2: BodyRef,
    pub attach2: DVec2,
    pub rest_length: f64,
    pub stiffness: f64,
}

impl Spring {
    fn end_point(&self, bodies: &[Option<Polygon>], body: BodyRef, attach: DVec2) -> DVec2 {
        match crate::collision::get_body(bodies, body) {
            Some(b) => b.body_to_world(attach),
            None => attach,
        }
    }

    pub fn stretch(&self, bodies: &[Option<Polygon>]) -> f64 {
        let p1 = self.end_point(bodies, self.body1, self.attach1);
        let p2 = self.end_point(bodies, self.body2, self.attach2);
        (p2 - p1).length() - self.rest_length
    }
}

impl ForceLaw for Spring {
    fn calculate_forces(&self, bodies: &[Option<Polygon>]) -> Vec<Force> {
        let p1 = self.end_point(bodies, self.body1, self.attach1);
        let p2 = self.end_point(bodies, self.body2, self.attach2);
        let Some(dir) = (p2 - p1).try_normalize() else {
            return Vec::new();
        };
        let magnitude = self.stiffness * self.stretch(bodies);
        let mut forces = Vec::new();
        if !self.body1.is_scrim() {
            forces.push(Force::at_point(self.body1, p1, magnitude * dir));
        }
        if !self.body2.is_scrim() {
            forces.push(Force::at_point(self.body2, p2, -magnitude * dir));
        }
        forces
    }

    fn potential_energy(&self, bodies: &[Option<Polygon>]) -> f64 {
        let stretch = self.stretch(bodies);
        0.5 * self.stiffness * stretch * stretch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::make_ball;
    use glam::dvec2;

    fn arena(bodies: Vec<Polygon>) -> Vec<Option<Polygon>> {
        bodies.into_iter().map(Some).collect()
    }

    #[test]
    fn test_gravity_scales_with_mass() {
        let mut b = make_ball("ball", 1.0);
        b.set_mass(3.0);
        let bodies = arena(vec![b]);
        let g = Gravity::new(9.8);
        let forces = g.calculate_forces(&bodies);
        assert_eq!(forces.len(), 1);
        assert!((forces[0].direction - dvec2(0.0, -29.4)).length() < 1e-12);
    }

    #[test]
    fn test_gravity_skips_immovable() {
        let mut b = make_ball("wall", 1.0);
        b.set_immovable();
        let bodies = arena(vec![b]);
        assert!(Gravity::new(9.8).calculate_forces(&bodies).is_empty());
    }

    #[test]
    fn test_gravity_potential_energy() {
        let mut b = make_ball("ball", 1.0);
        b.set_mass(2.0);
        b.set_position(dvec2(0.0, 3.0), 0.0);
        let bodies = arena(vec![b]);
        let mut g = Gravity::new(10.0);
        g.zero_energy_level = 1.0;
        assert!((g.potential_energy(&bodies) - 40.0).abs() < 1e-12);
    }

    #[test]
    fn test_spring_to_scrim() {
        let mut b = make_ball("ball", 0.5);
        b.set_position(dvec2(3.0, 0.0), 0.0);
        let bodies = arena(vec![b]);
        let s = Spring {
            body1: BodyRef::Scrim,
            attach1: DVec2::ZERO,
            body2: BodyRef::Body(0),
            attach2: DVec2::ZERO,
            rest_length: 1.0,
            stiffness: 2.0,
        };
        assert!((s.stretch(&bodies) - 2.0).abs() < 1e-12);
        let forces = s.calculate_forces(&bodies);
        assert_eq!(forces.len(), 1);
        // Stretched spring pulls the ball back toward the origin.
        assert!((forces[0].direction - dvec2(-4.0, 0.0)).length() < 1e-12);
        assert!((s.potential_energy(&bodies) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_damping_opposes_motion() {
        let mut b = make_ball("ball", 0.5);
        b.set_velocity(dvec2(2.0, 0.0), 1.5);
        let bodies = arena(vec![b]);
        let d = Damping {
            linear: 0.5,
            angular: 0.25,
        };
        let forces = d.calculate_forces(&bodies);
        assert!((forces[0].direction - dvec2(-1.0, 0.0)).length() < 1e-12);
        assert!((forces[0].torque + 0.375).abs() < 1e-12);
    }
}

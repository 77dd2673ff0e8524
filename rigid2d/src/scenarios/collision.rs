use glam::dvec2;

use crate::body::make_ball;
use crate::sim::Simulation;

use super::Scenario;

/// Two equal balls in a head-on elastic collision.
pub struct Collision {}

impl Scenario for Collision {
    fn name(&self) -> &str {
        "Collision"
    }

    fn create(&self) -> Simulation {
        let mut sim = Simulation::new();
        let mut a = make_ball("a", 0.5);
        a.set_position(dvec2(-2.0, 0.0), 0.0);
        a.set_velocity(dvec2(1.0, 0.0), 0.0);
        sim.add_body(a);
        let mut b = make_ball("b", 0.5);
        b.set_position(dvec2(2.0, 0.0), 0.0);
        b.set_velocity(dvec2(-1.0, 0.0), 0.0);
        sim.add_body(b);
        sim
    }
}

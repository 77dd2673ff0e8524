use glam::dvec2;

use crate::body::{make_block, BodyRef};
use crate::forces::Gravity;
use crate::joint::Joint;
use crate::sim::Simulation;

use super::Scenario;

/// A rod pinned to the scrim by a double joint, swinging freely.
pub struct Pendulum {
    /// Initial swing angle in radians.
    pub start_angle: f64,
}

impl Default for Pendulum {
    fn default() -> Self {
        Pendulum { start_angle: 0.5 }
    }
}

impl Scenario for Pendulum {
    fn name(&self) -> &str {
        "Pendulum"
    }

    fn create(&self) -> Simulation {
        let pivot = dvec2(0.0, 2.0);
        let mut sim = Simulation::new();
        sim.add_force_law(Box::new(Gravity::new(9.8)));
        let mut rod = make_block("rod", 0.2, 2.0);
        rod.elasticity = 0.0;
        rod.set_position(pivot - dvec2(0.0, 1.0), self.start_angle);
        let i = sim.add_body(rod);
        // Perpendicular normals at the same point make the pin.
        let (jx, jy) = Joint::pin(BodyRef::Scrim, pivot, BodyRef::Body(i), dvec2(0.0, 1.0));
        sim.add_connector(Box::new(jx), None);
        sim.add_connector(Box::new(jy), None);
        sim.align_connectors();
        sim
    }
}

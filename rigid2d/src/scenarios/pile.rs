use glam::dvec2;

use crate::body::{make_block, make_wall, BLOCK_TOP};
use crate::forces::Gravity;
use crate::sim::Simulation;

use super::Scenario;

/// Three equal blocks stacked on an immovable floor. The aligned corners
/// produce redundant contacts, which is exactly what the force solver's
/// deferral mechanism exists for.
pub struct Pile {
    pub blocks: usize,
}

impl Default for Pile {
    fn default() -> Self {
        Pile { blocks: 3 }
    }
}

impl Scenario for Pile {
    fn name(&self) -> &str {
        "Pile"
    }

    fn create(&self) -> Simulation {
        let mut sim = Simulation::new();
        sim.add_force_law(Box::new(Gravity::new(9.8)));
        let mut floor = make_wall("floor", 20.0, 1.0, BLOCK_TOP);
        floor.set_position(dvec2(0.0, -0.5), 0.0);
        sim.add_body(floor);
        let gap = sim.distance_tol() / 2.0;
        for k in 0..self.blocks {
            let mut block = make_block(format!("block{k}"), 1.0, 1.0);
            let y = 0.5 + gap + k as f64 * (1.0 + gap);
            block.set_position(dvec2(0.0, y), 0.0);
            sim.add_body(block);
        }
        sim
    }
}

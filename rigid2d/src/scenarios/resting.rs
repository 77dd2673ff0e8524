use glam::dvec2;

use crate::body::{make_block, make_wall, BLOCK_TOP};
use crate::forces::Gravity;
use crate::sim::Simulation;

use super::Scenario;

/// A single block resting on an immovable floor under gravity.
pub struct Resting {}

impl Scenario for Resting {
    fn name(&self) -> &str {
        "Resting"
    }

    fn create(&self) -> Simulation {
        let mut sim = Simulation::new();
        sim.add_force_law(Box::new(Gravity::new(9.8)));
        let mut floor = make_wall("floor", 20.0, 1.0, BLOCK_TOP);
        floor.set_position(dvec2(0.0, -0.5), 0.0);
        sim.add_body(floor);
        let mut block = make_block("block", 1.0, 1.0);
        // Start at half the distance tolerance above the floor, where the
        // extra-acceleration terms want the gap to settle.
        block.set_position(dvec2(0.0, 0.505), 0.0);
        sim.add_body(block);
        sim
    }
}

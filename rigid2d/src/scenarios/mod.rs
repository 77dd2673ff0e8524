use crate::sim::Simulation;

pub mod collision;
pub mod pendulum;
pub mod pile;
pub mod resting;

pub use collision::*;
pub use pendulum::*;
pub use pile::*;
pub use resting::*;

pub trait Scenario {
    fn name(&self) -> &str;

    fn create(&self) -> Simulation;

    fn update(&self, _sim: &mut Simulation) {}
}

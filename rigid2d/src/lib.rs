//! A 2D rigid-body physics engine for planar polygonal bodies: external
//! force laws, elastic and inelastic collisions, resting contacts, and
//! bilateral joint constraints.
//!
//! The pieces fit together per integration sub-step as follows. The
//! integrator hands [`Simulation::evaluate`] a state vector; the simulation
//! moves the bodies there, lets the force laws fill in accelerations,
//! searches for contacts, and solves a linear complementarity problem for
//! the contact and joint forces that prevent interpenetration. When a
//! contact is found interpenetrating too deeply the sub-step is rejected
//! and [`CollisionAdvance`] binary-searches the collision instant, at which
//! point the impulse solver reverses the approaching velocities with the
//! bodies' elasticity.

pub mod body;

pub mod collision;

pub mod contact_force;

pub mod edge;

pub mod error;

pub mod forces;

pub mod geometry;

pub mod impulse;

pub mod integrate;

pub mod joint;

pub mod lcp;

pub mod rng;

pub mod scenarios;

pub mod sim;

pub mod state;

pub use body::{make_ball, make_block, make_wall, BodyRef, Polygon, PolygonBuilder};
pub use collision::{Contact, ContactStatus, CollisionTotals};
pub use contact_force::ExtraAccel;
pub use edge::{Edge, EdgeShape, Vertex};
pub use error::{BuildError, SimError};
pub use forces::{Damping, Force, ForceLaw, Gravity, Spring};
pub use impulse::CollisionHandling;
pub use integrate::{CollisionAdvance, CollisionSim, OdeSim, RungeKutta, StepResult};
pub use joint::{Connector, CoordType, Joint};
pub use lcp::{check_force_accel, LcpError, LcpSolver, OrderPolicy};
pub use rng::Lcg;
pub use sim::{EnergyInfo, Simulation};
pub use state::VarsList;

//! The simulation: bodies, force laws, connectors, and the ODE evaluation
//! that ties detection and the contact-force solver together.
use glam::dvec2;
use tracing::{debug, instrument, trace};

use crate::body::{BodyRef, Polygon};
use crate::collision::{find_body_collisions, Contact, CollisionTotals};
use crate::contact_force::ExtraAccel;
use crate::error::SimError;
use crate::forces::{Force, ForceLaw};
use crate::impulse::CollisionHandling;
use crate::joint::Connector;
use crate::lcp::LcpSolver;
use crate::rng::Lcg;
use crate::state::{self, VarsList};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnergyInfo {
    pub potential: f64,
    pub translational: f64,
    pub rotational: f64,
}

impl EnergyInfo {
    pub fn total(&self) -> f64 {
        self.potential + self.translational + self.rotational
    }
}

/// Planar rigid-body simulation with resting contacts, collisions and
/// joints. Bodies live in a stable-index arena; removing one tombstones its
/// slot and its six state variables, both reusable by a later addition.
#[derive(Clone, Debug)]
pub struct Simulation {
    pub(crate) bodies: Vec<Option<Polygon>>,
    pub(crate) vars: VarsList,
    pub(crate) force_laws: Vec<Box<dyn ForceLaw>>,
    pub(crate) connectors: Vec<Box<dyn Connector>>,
    pub(crate) lcp: LcpSolver,
    pub(crate) rng: Lcg,
    pub extra_accel: ExtraAccel,
    pub collision_handling: CollisionHandling,
    /// Approximate step length the extra-acceleration terms assume,
    /// independent of the integrator's actual sub-steps.
    pub extra_accel_step: f64,
    /// Solve weakly connected contact groups separately; the cubic solve
    /// cost makes this worthwhile for anything beyond a handful of
    /// contacts.
    pub subset_collisions: bool,
    pub show_forces: bool,
    pub show_collisions: bool,
    pub(crate) default_distance_tol: f64,
    pub(crate) default_velocity_tol: f64,
    pub(crate) default_accuracy: f64,
    pub totals: CollisionTotals,
    /// Contacts from the most recent successful evaluation, with solved
    /// forces. Display layers read these when showing forces or contacts.
    pub(crate) last_contacts: Vec<Contact>,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation {
            bodies: Vec::new(),
            vars: VarsList::new(),
            force_laws: Vec::new(),
            connectors: Vec::new(),
            lcp: LcpSolver::new(),
            rng: Lcg::new(0),
            extra_accel: ExtraAccel::VelocityAndDistanceJoints,
            collision_handling: CollisionHandling::SerialGroupedLastPass,
            extra_accel_step: 0.025,
            subset_collisions: true,
            show_forces: false,
            show_collisions: false,
            default_distance_tol: 0.01,
            default_velocity_tol: 0.5,
            default_accuracy: 0.6,
            totals: CollisionTotals::default(),
            last_contacts: Vec::new(),
        }
    }
}

impl Simulation {
    pub fn new() -> Simulation {
        Simulation::default()
    }

    /// Adds a body, allocating its six state variables (reusing tombstoned
    /// slots when possible) and publishing it in the body list. Returns the
    /// body's arena index.
    pub fn add_body(&mut self, mut body: Polygon) -> usize {
        let vars_index = self.vars.add_body_block(&body.name);
        body.vars_index = Some(vars_index);
        let index = match self.bodies.iter().position(|b| b.is_none()) {
            Some(free) => {
                self.bodies[free] = Some(body);
                free
            }
            None => {
                self.bodies.push(Some(body));
                self.bodies.len() - 1
            }
        };
        self.write_body_vars(index);
        debug!(index, vars_index, "body added");
        index
    }

    /// Removes a body, tombstoning its state variables. Other bodies keep
    /// their indices and variables.
    pub fn remove_body(&mut self, index: usize) -> Result<Polygon, SimError> {
        let body = self
            .bodies
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| SimError::NotFound(format!("body #{index}")))?;
        if let Some(vars_index) = body.vars_index {
            self.vars.delete_body_block(vars_index);
        }
        debug!(index, "body removed");
        Ok(body)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (usize, &Polygon)> {
        self.bodies
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_ref().map(|b| (i, b)))
    }

    pub fn body(&self, index: usize) -> Option<&Polygon> {
        self.bodies.get(index).and_then(|b| b.as_ref())
    }

    pub fn body_mut(&mut self, index: usize) -> Option<&mut Polygon> {
        self.bodies.get_mut(index).and_then(|b| b.as_mut())
    }

    pub fn get_body(&self, name: &str) -> Result<(usize, &Polygon), SimError> {
        self.bodies()
            .find(|(_, b)| b.name == name)
            .ok_or_else(|| SimError::NotFound(name.to_string()))
    }

    pub fn vars(&self) -> &VarsList {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut VarsList {
        &mut self.vars
    }

    pub fn add_force_law(&mut self, law: Box<dyn ForceLaw>) -> usize {
        self.force_laws.push(law);
        self.force_laws.len() - 1
    }

    pub fn remove_force_law(&mut self, index: usize) {
        if index < self.force_laws.len() {
            self.force_laws.remove(index);
        }
    }

    pub fn clear_force_laws(&mut self) {
        self.force_laws.clear();
    }

    /// Adds a connector, optionally right after another one so that
    /// alignment cascades in a sensible order.
    pub fn add_connector(
        &mut self,
        connector: Box<dyn Connector>,
        follow: Option<usize>,
    ) -> usize {
        match follow {
            Some(i) if i < self.connectors.len() => {
                self.connectors.insert(i + 1, connector);
                i + 1
            }
            _ => {
                self.connectors.push(connector);
                self.connectors.len() - 1
            }
        }
    }

    pub fn remove_connector(&mut self, index: usize) {
        if index < self.connectors.len() {
            self.connectors.remove(index);
        }
    }

    pub fn connectors(&self) -> &[Box<dyn Connector>] {
        &self.connectors
    }

    /// Snaps each connector's bodies into position, in list order.
    pub fn align_connectors(&mut self) {
        let connectors = self.connectors.clone();
        for c in &connectors {
            c.align(&mut self.bodies);
        }
        for i in 0..self.bodies.len() {
            if self.bodies[i].is_some() {
                self.write_body_vars(i);
            }
        }
    }

    pub fn set_elasticity(&mut self, elasticity: f64) {
        assert!((0.0..=1.0).contains(&elasticity));
        for b in self.bodies.iter_mut().flatten() {
            b.elasticity = elasticity;
        }
        debug!(elasticity, "elasticity set on all bodies");
    }

    pub fn set_distance_tol(&mut self, tol: f64) {
        self.default_distance_tol = tol;
        for b in self.bodies.iter_mut().flatten() {
            b.distance_tol = tol;
        }
    }

    pub fn set_velocity_tol(&mut self, tol: f64) {
        self.default_velocity_tol = tol;
        for b in self.bodies.iter_mut().flatten() {
            b.velocity_tol = tol;
        }
    }

    pub fn set_collision_accuracy(&mut self, accuracy: f64) {
        assert!(accuracy > 0.0 && accuracy <= 1.0);
        self.default_accuracy = accuracy;
        for b in self.bodies.iter_mut().flatten() {
            b.accuracy = accuracy;
        }
    }

    pub fn distance_tol(&self) -> f64 {
        self.default_distance_tol
    }

    pub fn velocity_tol(&self) -> f64 {
        self.default_velocity_tol
    }

    pub fn collision_accuracy(&self) -> f64 {
        self.default_accuracy
    }

    pub fn set_extra_accel(&mut self, policy: ExtraAccel) {
        self.extra_accel = policy;
    }

    pub fn set_collision_handling(&mut self, policy: CollisionHandling) {
        self.collision_handling = policy;
    }

    pub fn set_random_seed(&mut self, seed: u32) {
        self.rng.set_seed(seed);
    }

    pub fn random_seed(&self) -> u32 {
        self.rng.seed()
    }

    pub fn get_energy_info(&self) -> EnergyInfo {
        let potential = self
            .force_laws
            .iter()
            .map(|law| law.potential_energy(&self.bodies))
            .sum();
        let translational = self
            .bodies
            .iter()
            .flatten()
            .map(|b| b.translational_energy())
            .sum();
        let rotational = self
            .bodies
            .iter()
            .flatten()
            .map(|b| b.rotational_energy())
            .sum();
        EnergyInfo {
            potential,
            translational,
            rotational,
        }
    }

    /// Copies a body's pose and velocity into its state-vector block.
    pub(crate) fn write_body_vars(&mut self, index: usize) {
        let Some(body) = self.bodies.get(index).and_then(|b| b.as_ref()) else {
            return;
        };
        let Some(base) = body.vars_index else { return };
        let (pos, vel, angle, omega) = (body.pos, body.vel, body.angle, body.omega);
        self.vars.set(base + state::X, pos.x);
        self.vars.set(base + state::VX, vel.x);
        self.vars.set(base + state::Y, pos.y);
        self.vars.set(base + state::VY, vel.y);
        self.vars.set(base + state::ANGLE, angle);
        self.vars.set(base + state::OMEGA, omega);
    }

    /// Updates every body's pose and velocity from a state vector, which
    /// may be an intermediate stage of the integrator rather than the
    /// simulation's own.
    pub(crate) fn move_objects(&mut self, vars: &[f64]) {
        for body in self.bodies.iter_mut().flatten() {
            let Some(base) = body.vars_index else { continue };
            body.pos = dvec2(vars[base + state::X], vars[base + state::Y]);
            body.vel = dvec2(vars[base + state::VX], vars[base + state::VY]);
            body.angle = vars[base + state::ANGLE];
            body.omega = vars[base + state::OMEGA];
        }
    }

    /// Re-syncs bodies from the simulation's own state vector and refreshes
    /// the energy slots. Call after the integrator commits a step.
    pub fn modify_objects(&mut self) {
        let values = self.vars.values().to_vec();
        self.move_objects(&values);
        let energy = self.get_energy_info();
        self.vars.set(
            state::KINETIC_ENERGY,
            energy.translational + energy.rotational,
        );
        self.vars.set(state::POTENTIAL_ENERGY, energy.potential);
        self.vars.set(state::TOTAL_ENERGY, energy.total());
    }

    /// Appends all current contact records: pairwise body collisions plus
    /// connector constraints. Bodies are first moved to `vars`.
    pub fn find_collisions(
        &mut self,
        out: &mut Vec<Contact>,
        vars: &[f64],
        step_size: f64,
    ) -> Result<(), SimError> {
        self.move_objects(vars);
        find_body_collisions(out, &self.bodies, step_size)?;
        let time = vars[state::TIME];
        for c in &self.connectors {
            c.add_collisions(out, &self.bodies, time);
        }
        Ok(())
    }

    /// One evaluation of the equations of motion: writes the rates of all
    /// state variables into `change`. Returns `Some(records)` when an
    /// illegal interpenetration requires the caller to reject the step.
    #[instrument(level = "trace", skip_all)]
    pub fn evaluate(
        &mut self,
        vars: &[f64],
        change: &mut [f64],
        step_size: f64,
    ) -> Result<Option<Vec<Contact>>, SimError> {
        debug_assert_eq!(vars.len(), change.len());
        self.move_objects(vars);
        change.fill(0.0);
        change[state::TIME] = 1.0;
        for body in self.bodies.iter().flatten() {
            let Some(base) = body.vars_index else { continue };
            change[base + state::X] = body.vel.x;
            change[base + state::Y] = body.vel.y;
            change[base + state::ANGLE] = body.omega;
        }
        for law in &self.force_laws {
            for force in law.calculate_forces(&self.bodies) {
                if !force.direction.is_finite() || !force.torque.is_finite() {
                    let name = match force.body {
                        BodyRef::Body(i) => self
                            .bodies
                            .get(i)
                            .and_then(|b| b.as_ref())
                            .map(|b| b.name.clone())
                            .unwrap_or_default(),
                        BodyRef::Scrim => "scrim".to_string(),
                    };
                    return Err(SimError::NonFiniteForce { body: name });
                }
                apply_force(&self.bodies, change, &force);
            }
        }
        let mut contacts = Vec::new();
        find_body_collisions(&mut contacts, &self.bodies, step_size)?;
        let time = vars[state::TIME];
        for c in &self.connectors {
            c.add_collisions(&mut contacts, &self.bodies, time);
        }
        if contacts.iter().any(|c| c.is_illegal()) {
            trace!("illegal contact; step must be rejected");
            return Ok(Some(contacts));
        }
        self.compute_contact_forces(&mut contacts, change, step_size, time)?;
        self.last_contacts = contacts;
        Ok(None)
    }

    /// Contact records from the most recent successful evaluation,
    /// including their solved forces.
    pub fn last_contacts(&self) -> &[Contact] {
        &self.last_contacts
    }

}

/// Turns a force into acceleration rates on its target body.
pub(crate) fn apply_force(bodies: &[Option<Polygon>], change: &mut [f64], force: &Force) {
    let Some(i) = force.body.index() else { return };
    let Some(body) = bodies.get(i).and_then(|b| b.as_ref()) else {
        return;
    };
    if !body.is_movable() {
        return;
    }
    let Some(base) = body.vars_index else { return };
    let inv_mass = body.inv_mass();
    change[base + state::VX] += force.direction.x * inv_mass;
    change[base + state::VY] += force.direction.y * inv_mass;
    let arm = force.location - body.pos;
    let torque = arm.perp_dot(force.direction) + force.torque;
    change[base + state::OMEGA] += torque * body.inv_moment();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::make_block;
    use crate::state::{FIRST_BODY_SLOT, VarName};
    use std::f64::consts::PI;

    #[test]
    fn test_two_block_add_remove() {
        let mut sim = Simulation::new();
        let mut b1 = make_block("block1", 1.0, 3.0);
        b1.set_position(dvec2(-1.0, -1.0), PI / 4.0);
        let mut b2 = make_block("block2", 1.0, 3.0);
        b2.set_position(dvec2(5.0, 5.0), PI / 3.0);
        b2.set_velocity(dvec2(-1.0, -1.0), 2.0);
        let i1 = sim.add_body(b1);
        let i2 = sim.add_body(b2);
        assert_eq!(sim.body(i1).unwrap().vars_index(), Some(4));
        assert_eq!(sim.body(i2).unwrap().vars_index(), Some(10));
        assert_eq!(sim.vars().len(), 16);
        assert_eq!(sim.vars().get(10 + state::X), 5.0);
        assert_eq!(sim.vars().get(10 + state::VX), -1.0);
        assert_eq!(sim.vars().get(10 + state::OMEGA), 2.0);

        sim.remove_body(i1).unwrap();
        for slot in 4..10 {
            assert_eq!(*sim.vars().name(slot), VarName::Deleted);
        }
        assert!(matches!(
            sim.get_body("block1"),
            Err(SimError::NotFound(_))
        ));
        assert_eq!(sim.body(i2).unwrap().vars_index(), Some(10));
        assert_eq!(sim.vars().len(), 16);
    }

    #[test]
    fn test_removed_slots_are_reused() {
        let mut sim = Simulation::new();
        let i1 = sim.add_body(make_block("a", 1.0, 1.0));
        let _i2 = sim.add_body(make_block("b", 1.0, 1.0));
        sim.remove_body(i1).unwrap();
        let i3 = sim.add_body(make_block("c", 1.0, 1.0));
        assert_eq!(i3, i1);
        assert_eq!(sim.body(i3).unwrap().vars_index(), Some(FIRST_BODY_SLOT));
        assert_eq!(sim.vars().len(), 16);
    }

    #[test]
    fn test_energy_round_trip_on_add_remove() {
        let mut sim = Simulation::new();
        sim.add_force_law(Box::new(crate::forces::Gravity::new(9.8)));
        let before = sim.get_energy_info();
        let mut b = make_block("b", 1.0, 1.0);
        b.set_position(dvec2(0.0, 2.0), 0.0);
        let i = sim.add_body(b);
        assert!(sim.get_energy_info().potential > 0.0);
        sim.remove_body(i).unwrap();
        let after = sim.get_energy_info();
        assert_eq!(before, after);
    }

    #[test]
    fn test_evaluate_gravity_only() {
        let mut sim = Simulation::new();
        sim.add_force_law(Box::new(crate::forces::Gravity::new(9.8)));
        let mut b = make_block("b", 1.0, 1.0);
        b.set_position(dvec2(0.0, 10.0), 0.0);
        b.set_velocity(dvec2(3.0, 0.0), 0.0);
        let i = sim.add_body(b);
        let base = sim.body(i).unwrap().vars_index().unwrap();
        let vars = sim.vars().values().to_vec();
        let mut change = vec![0.0; vars.len()];
        let rejected = sim.evaluate(&vars, &mut change, 0.01).unwrap();
        assert!(rejected.is_none());
        assert_eq!(change[state::TIME], 1.0);
        assert_eq!(change[base + state::X], 3.0);
        assert!((change[base + state::VY] + 9.8).abs() < 1e-12);
        assert_eq!(change[base + state::OMEGA], 0.0);
    }

    #[test]
    fn test_mass_scaled_gravity_torque_free() {
        // An off-center force produces spin; gravity through the center
        // must not.
        let mut sim = Simulation::new();
        let mut b = make_block("b", 2.0, 1.0);
        b.set_mass(5.0);
        b.set_position(dvec2(1.0, 1.0), 0.3);
        let i = sim.add_body(b);
        sim.add_force_law(Box::new(crate::forces::Gravity::new(10.0)));
        let base = sim.body(i).unwrap().vars_index().unwrap();
        let vars = sim.vars().values().to_vec();
        let mut change = vec![0.0; vars.len()];
        sim.evaluate(&vars, &mut change, 0.01).unwrap();
        assert!((change[base + state::VY] + 10.0).abs() < 1e-12);
        assert_eq!(change[base + state::OMEGA], 0.0);
    }
}

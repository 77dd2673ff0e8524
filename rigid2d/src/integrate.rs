//! The integrator's view of the simulation, a classic Runge-Kutta stepper,
//! and the time-advance loop that localizes collision events by binary
//! subdivision.
use tracing::{debug, instrument, trace};

use crate::collision::{Contact, ContactStatus};
use crate::error::SimError;
use crate::sim::Simulation;

/// What the ODE stepper needs from a simulation.
pub trait OdeSim {
    fn var_values(&self) -> &[f64];

    fn set_var_values(&mut self, values: &[f64]);

    /// Writes the rates of all state variables into `change`. Returns
    /// `Some(records)` when the step must be rejected.
    fn evaluate(
        &mut self,
        vars: &[f64],
        change: &mut [f64],
        step_size: f64,
    ) -> Result<Option<Vec<Contact>>, SimError>;

    /// Called after a committed step so the simulation can refresh derived
    /// state (body poses, energy slots).
    fn modify_objects(&mut self);
}

/// What the time-advance loop needs beyond [`OdeSim`].
pub trait CollisionSim: OdeSim {
    fn find_collisions(
        &mut self,
        out: &mut Vec<Contact>,
        vars: &[f64],
        step_size: f64,
    ) -> Result<(), SimError>;

    fn handle_collisions(&mut self, collisions: &mut [Contact]) -> Result<bool, SimError>;

    fn collision_accuracy(&self) -> f64;

    fn note_backup(&mut self);
}

impl OdeSim for Simulation {
    fn var_values(&self) -> &[f64] {
        self.vars().values()
    }

    fn set_var_values(&mut self, values: &[f64]) {
        self.vars_mut().values_mut().copy_from_slice(values);
    }

    fn evaluate(
        &mut self,
        vars: &[f64],
        change: &mut [f64],
        step_size: f64,
    ) -> Result<Option<Vec<Contact>>, SimError> {
        Simulation::evaluate(self, vars, change, step_size)
    }

    fn modify_objects(&mut self) {
        Simulation::modify_objects(self)
    }
}

impl CollisionSim for Simulation {
    fn find_collisions(
        &mut self,
        out: &mut Vec<Contact>,
        vars: &[f64],
        step_size: f64,
    ) -> Result<(), SimError> {
        Simulation::find_collisions(self, out, vars, step_size)
    }

    fn handle_collisions(&mut self, collisions: &mut [Contact]) -> Result<bool, SimError> {
        Simulation::handle_collisions(self, collisions)
    }

    fn collision_accuracy(&self) -> f64 {
        Simulation::collision_accuracy(self)
    }

    fn note_backup(&mut self) {
        self.totals.backups += 1;
    }
}

pub enum StepResult {
    Accepted,
    /// The evaluation found an illegal interpenetration; the state vector
    /// is untouched.
    Rejected(Vec<Contact>),
}

/// Classic fourth-order Runge-Kutta with preallocated stage buffers.
#[derive(Clone, Debug, Default)]
pub struct RungeKutta {
    inp: Vec<f64>,
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
}

impl RungeKutta {
    pub fn new() -> RungeKutta {
        RungeKutta::default()
    }

    /// Advances the simulation's state vector by `h`, or rejects the step
    /// if any stage evaluation reports an illegal contact.
    pub fn step<S: OdeSim>(&mut self, sim: &mut S, h: f64) -> Result<StepResult, SimError> {
        let vars = sim.var_values().to_vec();
        let n = vars.len();
        for buf in [&mut self.inp, &mut self.k1, &mut self.k2, &mut self.k3, &mut self.k4] {
            buf.resize(n, 0.0);
        }
        macro_rules! stage {
            ($k:expr, $state:expr) => {
                if let Some(c) = sim.evaluate($state, $k, h)? {
                    return Ok(StepResult::Rejected(c));
                }
            };
        }
        stage!(&mut self.k1, &vars);
        for i in 0..n {
            self.inp[i] = vars[i] + 0.5 * h * self.k1[i];
        }
        stage!(&mut self.k2, &self.inp);
        for i in 0..n {
            self.inp[i] = vars[i] + 0.5 * h * self.k2[i];
        }
        stage!(&mut self.k3, &self.inp);
        for i in 0..n {
            self.inp[i] = vars[i] + h * self.k3[i];
        }
        stage!(&mut self.k4, &self.inp);
        let mut out = vars;
        for i in 0..n {
            out[i] += h / 6.0 * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }
        sim.set_var_values(&out);
        Ok(StepResult::Accepted)
    }
}

/// Drives the simulation forward through collisions. A rejected sub-step is
/// retried at half the size, binary-searching toward the collision
/// instant; once the approaching pair is within the accuracy band the
/// impulse solver handles it and full-size stepping resumes.
#[derive(Clone, Debug)]
pub struct CollisionAdvance {
    pub step_size: f64,
    rk: RungeKutta,
}

impl CollisionAdvance {
    pub fn new(step_size: f64) -> CollisionAdvance {
        CollisionAdvance {
            step_size,
            rk: RungeKutta::new(),
        }
    }

    #[instrument(level = "trace", skip_all)]
    pub fn advance<S: CollisionSim>(&mut self, sim: &mut S, dt: f64) -> Result<(), SimError> {
        let floor = self.step_size * 2f64.powi(-24);
        let mut remaining = dt;
        let mut h = self.step_size;
        while remaining > 1e-12 {
            let h_try = h.min(remaining);
            let saved = sim.var_values().to_vec();
            match self.rk.step(sim, h_try)? {
                StepResult::Rejected(_) => {
                    sim.set_var_values(&saved);
                    sim.modify_objects();
                    sim.note_backup();
                    h = h_try / 2.0;
                    if h < floor {
                        return Err(SimError::Stuck { step: h });
                    }
                    trace!(h, "step rejected; subdividing");
                    continue;
                }
                StepResult::Accepted => {}
            }
            sim.modify_objects();
            let vars = sim.var_values().to_vec();
            let mut collisions = Vec::new();
            sim.find_collisions(&mut collisions, &vars, h_try)?;
            let imminent: Vec<&Contact> = collisions
                .iter()
                .filter(|c| c.status() == ContactStatus::Imminent)
                .collect();
            if !imminent.is_empty() {
                let accuracy = sim.collision_accuracy();
                let close_enough = imminent
                    .iter()
                    .all(|c| c.distance < c.distance_tol * accuracy);
                if close_enough || h_try <= floor {
                    debug!(n = imminent.len(), "handling collisions");
                    drop(imminent);
                    sim.handle_collisions(&mut collisions)?;
                    sim.modify_objects();
                    remaining -= h_try;
                    h = self.step_size;
                } else {
                    // Collision seen but we are not yet close to its
                    // instant: back up and creep toward it.
                    sim.set_var_values(&saved);
                    sim.modify_objects();
                    sim.note_backup();
                    h = h_try / 2.0;
                }
                continue;
            }
            remaining -= h_try;
            h = self.step_size;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{make_ball, make_block, make_wall, BLOCK_TOP};
    use crate::forces::Gravity;
    use glam::dvec2;

    #[test]
    fn test_free_fall_matches_closed_form() {
        let mut sim = Simulation::new();
        sim.add_force_law(Box::new(Gravity::new(9.8)));
        let mut ball = make_ball("ball", 0.5);
        ball.set_position(dvec2(0.0, 100.0), 0.0);
        let i = sim.add_body(ball);
        let mut rk = RungeKutta::new();
        for _ in 0..100 {
            match rk.step(&mut sim, 0.01).unwrap() {
                StepResult::Accepted => sim.modify_objects(),
                StepResult::Rejected(_) => panic!("free fall cannot be rejected"),
            }
        }
        let b = sim.body(i).unwrap();
        // One second of free fall; RK4 is exact on quadratics.
        assert!((b.pos.y - (100.0 - 0.5 * 9.8)).abs() < 1e-9);
        assert!((b.vel.y + 9.8).abs() < 1e-9);
        assert!((sim.vars().time() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_resting_block_stays_put() {
        let mut sim = Simulation::new();
        sim.add_force_law(Box::new(Gravity::new(9.8)));
        let mut wall = make_wall("floor", 20.0, 1.0, BLOCK_TOP);
        wall.set_position(dvec2(0.0, -0.5), 0.0);
        sim.add_body(wall);
        let mut block = make_block("block", 1.0, 1.0);
        block.set_position(dvec2(0.0, 0.505), 0.0);
        let i = sim.add_body(block);
        let mut advance = CollisionAdvance::new(0.01);
        advance.advance(&mut sim, 0.01).unwrap();
        let b = sim.body(i).unwrap();
        assert!((b.pos - dvec2(0.0, 0.505)).length() < 1e-7);
        assert!(b.vel.length() < 1e-7);
    }

    #[test]
    fn test_elastic_collision_conserves_kinetic_energy() {
        let mut sim = Simulation::new();
        let mut a = make_ball("a", 0.5);
        a.set_position(dvec2(-0.6, 0.0), 0.0);
        a.set_velocity(dvec2(1.0, 0.0), 0.0);
        let mut b = make_ball("b", 0.5);
        b.set_position(dvec2(0.6, 0.0), 0.0);
        b.set_velocity(dvec2(-1.0, 0.0), 0.0);
        let ia = sim.add_body(a);
        let ib = sim.add_body(b);
        let initial = sim.get_energy_info();
        let mut advance = CollisionAdvance::new(0.025);
        for _ in 0..20 {
            advance.advance(&mut sim, 0.025).unwrap();
        }
        let va = sim.body(ia).unwrap().vel;
        let vb = sim.body(ib).unwrap().vel;
        assert!((va - dvec2(-1.0, 0.0)).length() < 1e-6, "va = {va}");
        assert!((vb - dvec2(1.0, 0.0)).length() < 1e-6);
        let after = sim.get_energy_info();
        assert!((after.total() - initial.total()).abs() < 1e-6);
        assert!(sim.totals.collisions > 0);
    }

    #[test]
    fn test_stack_is_stable() {
        let mut sim = Simulation::new();
        sim.add_force_law(Box::new(Gravity::new(9.8)));
        let mut wall = make_wall("floor", 20.0, 1.0, BLOCK_TOP);
        wall.set_position(dvec2(0.0, -0.5), 0.0);
        sim.add_body(wall);
        let gap = 0.005;
        let mut initial = Vec::new();
        for k in 0..3 {
            let mut block = make_block(format!("block{k}"), 1.0, 1.0);
            let y = 0.5 + gap + k as f64 * (1.0 + gap);
            block.set_position(dvec2(0.0, y), 0.0);
            initial.push(dvec2(0.0, y));
            sim.add_body(block);
        }
        let start = sim.get_energy_info().total();
        let mut advance = CollisionAdvance::new(0.01);
        for _ in 0..100 {
            advance.advance(&mut sim, 0.01).unwrap();
        }
        for (k, start_pos) in initial.iter().enumerate() {
            let b = sim.get_body(&format!("block{k}")).unwrap().1;
            assert!(
                (b.pos - *start_pos).length() < 0.01,
                "block{k} drifted to {}",
                b.pos
            );
        }
        let end = sim.get_energy_info().total();
        let scale = start.abs().max(1.0);
        assert!((end - start).abs() / scale < 0.005);
    }
}

//! Collision resolution: impulses that reverse approaching normal
//! velocities with the prescribed elasticity, for any number of
//! simultaneous collisions and joints.
use tracing::{debug, instrument, trace, warn};

use crate::collision::Contact;
use crate::contact_force::build_a_matrix;
use crate::error::SimError;
use crate::lcp::check_force_accel;
use crate::sim::Simulation;

/// Velocity below which a contact counts as resolved by the impulse
/// solver.
const IMPULSE_VELOCITY_TOL: f64 = 1e-5;

/// Impulses smaller than this are treated as no impulse at all.
const SMALL_IMPULSE: f64 = 1e-10;

/// How simultaneous collisions are grouped and ordered when computing
/// impulses. All policies reduce to the same LCP core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollisionHandling {
    /// One solve over every record at once.
    Simultaneous,
    /// Repeatedly solve the worst violator together with everything that
    /// shares a body with it, then a zero-elasticity cleanup.
    Hybrid,
    /// One random violator at a time, together with its connected joints.
    SerialGrouped,
    SerialGroupedLastPass,
    /// One random violator at a time, alone.
    SerialSeparate,
    SerialSeparateLastPass,
}

impl CollisionHandling {
    fn grouped(&self) -> bool {
        matches!(
            self,
            CollisionHandling::SerialGrouped | CollisionHandling::SerialGroupedLastPass
        )
    }

    fn last_pass(&self) -> bool {
        matches!(
            self,
            CollisionHandling::SerialGroupedLastPass
                | CollisionHandling::SerialSeparateLastPass
                | CollisionHandling::Hybrid
        )
    }
}

impl Simulation {
    /// Applies impulses so every record separates (or, for joints, stops)
    /// with its prescribed elasticity. Returns whether any non-trivial
    /// impulse was applied. Velocities are written back to the state
    /// vector.
    #[instrument(level = "trace", skip_all, fields(n = collisions.len()))]
    pub fn handle_collisions(&mut self, collisions: &mut [Contact]) -> Result<bool, SimError> {
        if collisions.is_empty() {
            return Ok(false);
        }
        let policy = self.collision_handling;
        match policy {
            CollisionHandling::Simultaneous => {
                let all: Vec<usize> = (0..collisions.len()).collect();
                self.solve_impulse_subset(collisions, &all, false)?;
            }
            CollisionHandling::Hybrid
            | CollisionHandling::SerialGrouped
            | CollisionHandling::SerialGroupedLastPass
            | CollisionHandling::SerialSeparate
            | CollisionHandling::SerialSeparateLastPass => {
                self.serial_impulses(collisions, policy)?;
            }
        }
        if policy.last_pass() {
            let needs: Vec<usize> = (0..collisions.len())
                .filter(|&i| {
                    let v = collisions[i].relative_normal_velocity(&self.bodies);
                    collisions[i].joint || v < 0.0
                })
                .collect();
            if !needs.is_empty() {
                trace!(n = needs.len(), "zero-elasticity last pass");
                self.solve_impulse_subset(collisions, &needs, true)?;
            }
        }
        for i in 0..self.bodies.len() {
            if self.bodies[i].is_some() {
                self.write_body_vars(i);
            }
        }
        let mut applied = false;
        for c in collisions.iter() {
            if c.impulse.abs() > SMALL_IMPULSE {
                applied = true;
                self.totals.impulses += 1;
            }
        }
        if applied {
            self.totals.collisions += 1;
        }
        Ok(applied)
    }

    /// Serial policies: fix one violating record at a time until all are
    /// within tolerance. A stalled loop doubles its velocity tolerance
    /// every `20 n` iterations rather than spinning forever.
    fn serial_impulses(
        &mut self,
        collisions: &mut [Contact],
        policy: CollisionHandling,
    ) -> Result<(), SimError> {
        let n = collisions.len();
        let mut eps = IMPULSE_VELOCITY_TOL;
        let cap = 1000 * n + 1000;
        for iter in 0..cap {
            if iter > 0 && iter % (20 * n) == 0 {
                eps *= 2.0;
                warn!(eps, iter, "impulse loop stalled; widening tolerance");
            }
            let violators: Vec<usize> = (0..n)
                .filter(|&i| {
                    let v = collisions[i].relative_normal_velocity(&self.bodies);
                    if collisions[i].joint {
                        v.abs() > eps
                    } else {
                        v < -eps
                    }
                })
                .collect();
            if violators.is_empty() {
                return Ok(());
            }
            let focus = match policy {
                CollisionHandling::Hybrid => {
                    // Largest violation first.
                    *violators
                        .iter()
                        .max_by(|&&x, &&y| {
                            let vx = collisions[x].relative_normal_velocity(&self.bodies).abs();
                            let vy = collisions[y].relative_normal_velocity(&self.bodies).abs();
                            vx.partial_cmp(&vy).expect("finite velocities")
                        })
                        .expect("non-empty violators")
                }
                _ => violators[self.rng.next_range(violators.len())],
            };
            let subset = match policy {
                CollisionHandling::Hybrid => {
                    hybrid_subset(collisions, focus)
                }
                _ if policy.grouped() => grouped_subset(collisions, focus),
                _ => vec![focus],
            };
            trace!(focus, subset = subset.len(), "serial impulse solve");
            self.solve_impulse_subset(collisions, &subset, false)?;
        }
        Err(SimError::IterationCap(cap))
    }

    /// Builds and solves the impulse LCP for a subset of records and
    /// applies the impulses to the bodies. With `zero_elasticity` the
    /// collisions are treated as perfectly inelastic (the "last pass").
    fn solve_impulse_subset(
        &mut self,
        collisions: &mut [Contact],
        subset: &[usize],
        zero_elasticity: bool,
    ) -> Result<(), SimError> {
        let refs: Vec<&Contact> = subset.iter().map(|&i| &collisions[i]).collect();
        let a_matrix = build_a_matrix(&self.bodies, &refs);
        let joint: Vec<bool> = refs.iter().map(|c| c.joint).collect();
        let mut b = vec![0.0; refs.len()];
        for (k, c) in refs.iter().enumerate() {
            let v = c.relative_normal_velocity(&self.bodies);
            let e = if c.joint || zero_elasticity {
                0.0
            } else {
                c.elasticity
            };
            b[k] = (1.0 + e) * v;
        }
        drop(refs);
        let mut f = vec![0.0; subset.len()];
        let result = self.lcp.solve(&a_matrix, &b, &joint, &mut f, &mut self.rng);
        let residual = check_force_accel(&f, self.lcp.accelerations(), &joint);
        if let Err(e) = result {
            if residual > 1e-4 {
                return Err(SimError::SolverFailed {
                    code: e.code(),
                    residual,
                    time: self.vars.time(),
                });
            }
            warn!(code = e.code(), residual, "accepting imperfect impulse solve");
        }
        for (k, &i) in subset.iter().enumerate() {
            if f[k] == 0.0 {
                continue;
            }
            collisions[i].impulse += f[k];
            self.apply_impulse(&collisions[i], f[k]);
        }
        Ok(())
    }

    /// Applies an impulse of magnitude `j` along the contact normal: the
    /// primary body is pushed, the normal body recoils.
    fn apply_impulse(&mut self, c: &Contact, j: f64) {
        debug!(impulse = j, "applying impulse");
        if let Some(i) = c.primary.index() {
            if let Some(b) = self.bodies[i].as_mut() {
                if b.is_movable() {
                    let r = c.impact1 - b.pos;
                    b.vel += j * c.normal * b.inv_mass();
                    b.omega += j * r.perp_dot(c.normal) * b.inv_moment();
                }
            }
        }
        if let Some(i) = c.normal_body.index() {
            if let Some(b) = self.bodies[i].as_mut() {
                if b.is_movable() {
                    let r = c.impact2 - b.pos;
                    b.vel -= j * c.normal * b.inv_mass();
                    b.omega -= j * r.perp_dot(c.normal) * b.inv_moment();
                }
            }
        }
    }
}

/// Whether two records touch a common body (the scrim does not count).
fn shares_body(a: &Contact, b: &Contact) -> bool {
    for r in [a.primary, a.normal_body] {
        if r.is_scrim() {
            continue;
        }
        if r == b.primary || r == b.normal_body {
            return true;
        }
    }
    false
}

/// The focus plus every joint reachable from it through shared bodies.
fn grouped_subset(collisions: &[Contact], focus: usize) -> Vec<usize> {
    let mut subset = vec![focus];
    loop {
        let mut grew = false;
        for i in 0..collisions.len() {
            if subset.contains(&i) || !collisions[i].joint {
                continue;
            }
            if subset
                .iter()
                .any(|&s| shares_body(&collisions[s], &collisions[i]))
            {
                subset.push(i);
                grew = true;
            }
        }
        if !grew {
            return subset;
        }
    }
}

/// The focus, its connected joints, and every collision sharing a body
/// with the focus directly.
fn hybrid_subset(collisions: &[Contact], focus: usize) -> Vec<usize> {
    let mut subset = grouped_subset(collisions, focus);
    for i in 0..collisions.len() {
        if !subset.contains(&i) && shares_body(&collisions[focus], &collisions[i]) {
            subset.push(i);
        }
    }
    subset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::make_ball;
    use glam::dvec2;

    fn two_ball_sim(handling: CollisionHandling) -> (Simulation, usize, usize) {
        let mut sim = Simulation::new();
        sim.collision_handling = handling;
        let mut a = make_ball("a", 0.5);
        a.set_position(dvec2(-0.503, 0.0), 0.0);
        a.set_velocity(dvec2(1.0, 0.0), 0.0);
        let mut b = make_ball("b", 0.5);
        b.set_position(dvec2(0.503, 0.0), 0.0);
        b.set_velocity(dvec2(-1.0, 0.0), 0.0);
        let ia = sim.add_body(a);
        let ib = sim.add_body(b);
        (sim, ia, ib)
    }

    #[test]
    fn test_elastic_head_on_swaps_velocities() {
        for handling in [
            CollisionHandling::Simultaneous,
            CollisionHandling::Hybrid,
            CollisionHandling::SerialGrouped,
            CollisionHandling::SerialSeparate,
            CollisionHandling::SerialGroupedLastPass,
            CollisionHandling::SerialSeparateLastPass,
        ] {
            let (mut sim, ia, ib) = two_ball_sim(handling);
            let vars = sim.vars().values().to_vec();
            let mut collisions = Vec::new();
            sim.find_collisions(&mut collisions, &vars, 0.01).unwrap();
            assert_eq!(collisions.len(), 1);
            let applied = sim.handle_collisions(&mut collisions).unwrap();
            assert!(applied);
            let va = sim.body(ia).unwrap().vel;
            let vb = sim.body(ib).unwrap().vel;
            assert!(
                (va - dvec2(-1.0, 0.0)).length() < 1e-9,
                "{handling:?}: va = {va}"
            );
            assert!((vb - dvec2(1.0, 0.0)).length() < 1e-9);
            // Impulse on a non-joint contact is never negative.
            assert!(collisions[0].impulse >= -1e-10);
        }
    }

    #[test]
    fn test_inelastic_collision_stops_approach() {
        let (mut sim, ia, ib) = two_ball_sim(CollisionHandling::SerialGroupedLastPass);
        sim.set_elasticity(0.0);
        let vars = sim.vars().values().to_vec();
        let mut collisions = Vec::new();
        sim.find_collisions(&mut collisions, &vars, 0.01).unwrap();
        sim.handle_collisions(&mut collisions).unwrap();
        let va = sim.body(ia).unwrap().vel;
        let vb = sim.body(ib).unwrap().vel;
        assert!(va.length() < 1e-9);
        assert!(vb.length() < 1e-9);
        let v_rel = collisions[0].relative_normal_velocity(&sim.bodies);
        assert!(v_rel.abs() < 1e-9);
    }

    #[test]
    fn test_unequal_masses_conserve_momentum_and_energy() {
        let (mut sim, ia, ib) = two_ball_sim(CollisionHandling::Simultaneous);
        sim.body_mut(ib).unwrap().set_mass(3.0);
        let vars = sim.vars().values().to_vec();
        let mut collisions = Vec::new();
        sim.find_collisions(&mut collisions, &vars, 0.01).unwrap();
        sim.handle_collisions(&mut collisions).unwrap();
        let va = sim.body(ia).unwrap().vel.x;
        let vb = sim.body(ib).unwrap().vel.x;
        let momentum = va + 3.0 * vb;
        let energy = 0.5 * va * va + 0.5 * 3.0 * vb * vb;
        assert!((momentum - (1.0 - 3.0)).abs() < 1e-9);
        assert!((energy - (0.5 + 1.5)).abs() < 1e-9);
        // One-dimensional elastic collision closed form.
        assert!((va + 2.0).abs() < 1e-9);
        assert!((vb - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_separating_pair_needs_no_impulse() {
        let (mut sim, ia, _ib) = two_ball_sim(CollisionHandling::SerialGroupedLastPass);
        // Reverse the velocities: the pair is already separating.
        sim.body_mut(ia).unwrap().set_velocity(dvec2(-1.0, 0.0), 0.0);
        sim.body_mut(1).unwrap().set_velocity(dvec2(1.0, 0.0), 0.0);
        let vars = {
            for i in 0..2 {
                sim.write_body_vars(i);
            }
            sim.vars().values().to_vec()
        };
        let mut collisions = Vec::new();
        sim.find_collisions(&mut collisions, &vars, 0.01).unwrap();
        let applied = sim.handle_collisions(&mut collisions).unwrap();
        assert!(!applied);
    }
}

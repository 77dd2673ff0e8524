//! Contact-force computation inside each ODE evaluation: assembles the
//! A-matrix and b-vector for the resting contacts and joints, solves the
//! LCP, and applies the resulting forces as accelerations.
use glam::DVec2;
use tracing::{instrument, trace, warn};

use crate::body::BodyRef;
use crate::collision::{get_body, Contact, ContactStatus};
use crate::error::SimError;
use crate::forces::Force;
use crate::lcp::check_force_accel;
use crate::sim::{apply_force, Simulation};
use crate::state;

/// Extra acceleration added to the b-vector to bleed off residual gap
/// velocity and penetration at persistent contacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtraAccel {
    None,
    /// `v/h` at contacts only.
    Velocity,
    /// `v/h` at contacts and joints.
    VelocityJoints,
    /// `(2 v h + x0)/h^2` at contacts only, targeting half tolerance.
    VelocityAndDistance,
    /// Same, including joints (which target zero gap).
    VelocityAndDistanceJoints,
}

impl ExtraAccel {
    fn applies_to(&self, joint: bool) -> bool {
        match self {
            ExtraAccel::None => false,
            ExtraAccel::Velocity | ExtraAccel::VelocityAndDistance => !joint,
            ExtraAccel::VelocityJoints | ExtraAccel::VelocityAndDistanceJoints => true,
        }
    }

    fn uses_distance(&self) -> bool {
        matches!(
            self,
            ExtraAccel::VelocityAndDistance | ExtraAccel::VelocityAndDistanceJoints
        )
    }
}

/// Entry of the A-matrix: change of normal acceleration (or velocity) at
/// contact `ci` per unit force (or impulse) at contact `ck`. Each body the
/// two contacts share contributes its inverse mass and inverse moment.
pub(crate) fn a_entry(
    bodies: &[Option<crate::body::Polygon>],
    ci: &Contact,
    ck: &Contact,
) -> f64 {
    let mut sum = 0.0;
    for (body, sign_i, pi) in [
        (ci.primary, 1.0, ci.impact1),
        (ci.normal_body, -1.0, ci.impact2),
    ] {
        let Some(b) = get_body(bodies, body) else { continue };
        if !b.is_movable() {
            continue;
        }
        let (sign_k, pk) = if ck.primary == body {
            (1.0, ck.impact1)
        } else if ck.normal_body == body {
            (-1.0, ck.impact2)
        } else {
            continue;
        };
        let force = sign_k * ck.normal;
        let ri = pi - b.pos;
        let rk = pk - b.pos;
        // Linear response plus the spin it imparts about the mass center.
        let alpha = rk.perp_dot(force) * b.inv_moment();
        let point_accel = force * b.inv_mass() + alpha * ri.perp();
        sum += sign_i * ci.normal.dot(point_accel);
    }
    sum
}

pub(crate) fn build_a_matrix(
    bodies: &[Option<crate::body::Polygon>],
    contacts: &[&Contact],
) -> Vec<Vec<f64>> {
    let n = contacts.len();
    let mut a = vec![vec![0.0; n]; n];
    for i in 0..n {
        for k in 0..n {
            a[i][k] = a_entry(bodies, contacts[i], contacts[k]);
        }
    }
    a
}

impl Simulation {
    /// Solves for contact and joint forces and adds their accelerations to
    /// `change`. Only true resting contacts and joints participate;
    /// imminent collisions are left to the impulse solver.
    #[instrument(level = "trace", skip_all)]
    pub(crate) fn compute_contact_forces(
        &mut self,
        contacts: &mut [Contact],
        change: &mut [f64],
        _step_size: f64,
        time: f64,
    ) -> Result<(), SimError> {
        let active: Vec<usize> = contacts
            .iter()
            .enumerate()
            .filter(|(_, c)| c.joint || c.status() == ContactStatus::Contact)
            .map(|(i, _)| i)
            .collect();
        if active.is_empty() {
            return Ok(());
        }
        let groups = if self.subset_collisions {
            connected_components(&self.bodies, contacts, &active)
        } else {
            vec![active.clone()]
        };
        for group in groups {
            self.solve_contact_group(contacts, &group, change, time)?;
        }
        Ok(())
    }

    fn solve_contact_group(
        &mut self,
        contacts: &mut [Contact],
        group: &[usize],
        change: &mut [f64],
        time: f64,
    ) -> Result<(), SimError> {
        let n = group.len();
        let h = self.extra_accel_step;
        let refs: Vec<&Contact> = group.iter().map(|&i| &contacts[i]).collect();
        let a_matrix = build_a_matrix(&self.bodies, &refs);
        let joint: Vec<bool> = refs.iter().map(|c| c.joint).collect();
        let mut b = vec![0.0; n];
        for (row, c) in refs.iter().enumerate() {
            b[row] = self.b_entry(c, change, h);
        }
        drop(refs);

        let mut f = vec![0.0; n];
        let result = self.lcp.solve(&a_matrix, &b, &joint, &mut f, &mut self.rng);
        let residual = check_force_accel(&f, self.lcp.accelerations(), &joint);
        match result {
            Ok(()) if residual <= 1e-4 => {}
            Err(e) if residual <= 1e-4 => {
                warn!(code = e.code(), residual, "accepting imperfect contact solve");
            }
            other => {
                let code = match other {
                    Err(e) => e.code(),
                    Ok(()) => -1,
                };
                return Err(SimError::SolverFailed {
                    code,
                    residual,
                    time,
                });
            }
        }
        for (k, &i) in group.iter().enumerate() {
            let c = &mut contacts[i];
            c.force = f[k];
            if f[k] == 0.0 {
                continue;
            }
            trace!(contact = i, force = f[k], "contact force");
            apply_force(
                &self.bodies,
                change,
                &Force::at_point(c.primary, c.impact1, f[k] * c.normal),
            );
            apply_force(
                &self.bodies,
                change,
                &Force::at_point(c.normal_body, c.impact2, -f[k] * c.normal),
            );
        }
        Ok(())
    }

    /// Force-independent part of the relative normal acceleration at a
    /// contact: the external accelerations of the two impact points, the
    /// rotation of curved normals, and the configured extra acceleration.
    fn b_entry(&self, c: &Contact, change: &[f64], h: f64) -> f64 {
        let mut b = c.normal.dot(
            self.point_acceleration(c.primary, c.impact1, change)
                - self.point_acceleration(c.normal_body, c.impact2, change),
        );
        let v1 = crate::collision::point_velocity(&self.bodies, c.primary, c.impact1);
        let v2 = crate::collision::point_velocity(&self.bodies, c.normal_body, c.impact2);
        let vab = v1 - v2;
        if let Some(ndt) = c.normal_dt {
            b += ndt.dot(vab);
        } else {
            let r_sum = c.r1 + c.r2;
            if r_sum.is_finite() && r_sum != 0.0 {
                let tangential = vab - c.normal * c.normal.dot(vab);
                b += tangential.dot(vab) / r_sum;
            } else if c.r1.is_finite() && !c.r2.is_finite() {
                // Curved primary edge resting on a straight one that may
                // itself be spinning.
                let omega2 = get_body(&self.bodies, c.normal_body)
                    .map(|b| b.omega)
                    .unwrap_or(0.0);
                b += -c.r1 * omega2 * omega2;
            }
        }
        if self.extra_accel.applies_to(c.joint) {
            let v = c.normal.dot(vab);
            if self.extra_accel.uses_distance() {
                let target = if c.joint { 0.0 } else { c.distance_tol / 2.0 };
                let x0 = c.distance - target;
                b += (2.0 * v * h + x0) / (h * h);
            } else {
                b += v / h;
            }
        }
        b
    }

    /// Acceleration of the material point at `p` under the current change
    /// vector, including the centripetal term.
    fn point_acceleration(&self, body: BodyRef, p: DVec2, change: &[f64]) -> DVec2 {
        let Some(b) = get_body(&self.bodies, body) else {
            return DVec2::ZERO;
        };
        let Some(base) = b.vars_index() else {
            return DVec2::ZERO;
        };
        let accel = DVec2::new(change[base + state::VX], change[base + state::VY]);
        let alpha = change[base + state::OMEGA];
        let r = p - b.pos;
        accel + alpha * r.perp() - b.omega * b.omega * r
    }
}

/// Splits the active contacts into weakly connected components: two
/// contacts join when they share a movable body.
fn connected_components(
    bodies: &[Option<crate::body::Polygon>],
    contacts: &[Contact],
    active: &[usize],
) -> Vec<Vec<usize>> {
    let n = active.len();
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut Vec<usize>, mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    let movable = |r: BodyRef| get_body(bodies, r).map(|b| b.is_movable()).unwrap_or(false);
    for x in 0..n {
        for y in (x + 1)..n {
            let (cx, cy) = (&contacts[active[x]], &contacts[active[y]]);
            let shares = [cx.primary, cx.normal_body]
                .into_iter()
                .filter(|&r| movable(r))
                .any(|r| r == cy.primary || r == cy.normal_body);
            if shares {
                let (rx, ry) = (find(&mut parent, x), find(&mut parent, y));
                parent[rx] = ry;
            }
        }
    }
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut root_of: Vec<Option<usize>> = vec![None; n];
    for x in 0..n {
        let r = find(&mut parent, x);
        let g = match root_of[r] {
            Some(g) => g,
            None => {
                groups.push(Vec::new());
                root_of[r] = Some(groups.len() - 1);
                groups.len() - 1
            }
        };
        groups[g].push(active[x]);
    }
    groups
}

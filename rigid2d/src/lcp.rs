//! Pivoting solver for the contact-force linear complementarity problem.
//!
//! Given a symmetric matrix `A`, vector `b` and joint mask, finds forces
//! `f` with accelerations `a = A f + b` such that at every index either
//! `a[i] = 0` with `f[i]` unrestricted (joints), or `a[i] >= 0`,
//! `f[i] >= 0` and `f[i] a[i] = 0` (contacts).
//!
//! The algorithm is Baraff's fast contact-force method: contacts are driven
//! to zero acceleration one at a time while the clamped set `C` absorbs the
//! force changes, with two extensions that matter in practice. Redundant
//! contacts whose rows would make the clamped submatrix singular are
//! deferred to a rejected set `R` and retried later, and the outer loop
//! snapshots its state to detect cycling among deferred contacts.
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::rng::Lcg;

/// Zero-equality tolerance for forces and accelerations.
pub const SMALL_POSITIVE: f64 = 1e-10;

/// A diagonal below this after elimination marks the submatrix singular.
const SINGULAR_DIAGONAL: f64 = 2e-3;

/// Steps larger than this mean the drive direction is unusable.
const MAX_STEP_LIMIT: f64 = 1e5;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LcpError {
    #[error("outer loop revisited an identical state; returning best solution so far")]
    Cycle,
    #[error("drive-to-zero exceeded the iteration cap")]
    IterationCap,
    #[error("no usable step while driving a contact to zero")]
    NoStep,
}

impl LcpError {
    pub fn code(&self) -> i32 {
        match self {
            LcpError::Cycle => 2,
            LcpError::IterationCap => 3,
            LcpError::NoStep => 4,
        }
    }
}

/// How the outer loop picks the next contact to treat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderPolicy {
    /// Joints first in random order, then contacts by most negative
    /// acceleration, finally rejects whose violation grew large.
    Hybrid,
    /// Most negative acceleration first.
    MinAccel,
    /// Uniformly random order.
    Random,
    /// Fixed order supplied by the caller.
    PreOrdered(Vec<usize>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ContactState {
    Untreated,
    /// Clamped: zero acceleration, force free to change.
    C,
    /// Not clamped: zero force, acceleration free to change.
    Nc,
    /// Deferred after (near-)singularity or a flip-flop.
    R,
}

enum Drive {
    Done,
    Defer(usize),
}

/// The solver with its reusable workspace. Scratch buffers grow on demand
/// and are kept across calls; the matrix pool only ever grows.
#[derive(Clone, Debug)]
pub struct LcpSolver {
    pub tolerance: f64,
    pub policy: OrderPolicy,
    accel: Vec<f64>,
    state: Vec<ContactState>,
    zero_steps: Vec<bool>,
    delta_f: Vec<f64>,
    delta_a: Vec<f64>,
    scratch: Vec<Vec<Vec<f64>>>,
    snapshots: Vec<(Vec<ContactState>, usize)>,
}

impl Default for LcpSolver {
    fn default() -> Self {
        LcpSolver {
            tolerance: SMALL_POSITIVE,
            policy: OrderPolicy::Hybrid,
            accel: Vec::new(),
            state: Vec::new(),
            zero_steps: Vec::new(),
            delta_f: Vec::new(),
            delta_a: Vec::new(),
            scratch: Vec::new(),
            snapshots: Vec::new(),
        }
    }
}

impl LcpSolver {
    pub fn new() -> LcpSolver {
        LcpSolver::default()
    }

    /// Solved accelerations from the last call.
    pub fn accelerations(&self) -> &[f64] {
        &self.accel
    }

    /// Solves the LCP, writing forces into `f` (which is cleared first).
    /// On error the best solution found so far remains in `f`; the caller
    /// judges it with [`check_force_accel`].
    #[instrument(level = "trace", skip_all, fields(n = b.len()))]
    pub fn solve(
        &mut self,
        a_matrix: &[Vec<f64>],
        b: &[f64],
        joint: &[bool],
        f: &mut [f64],
        rng: &mut Lcg,
    ) -> Result<(), LcpError> {
        let n = b.len();
        debug_assert_eq!(a_matrix.len(), n);
        debug_assert_eq!(joint.len(), n);
        debug_assert_eq!(f.len(), n);
        self.resize(n);
        f.fill(0.0);
        self.accel.copy_from_slice(b);
        self.state.fill(ContactState::Untreated);
        self.snapshots.clear();

        let max_outer = 10 * n + 1000;
        for _outer in 0..max_outer {
            let Some(d) = self.next_contact(joint, rng) else {
                return Ok(());
            };
            trace!(d, accel = self.accel[d], "treating contact");
            if !joint[d] && self.accel[d] >= -self.tolerance {
                self.state[d] = ContactState::Nc;
                continue;
            }
            if joint[d] && self.accel[d].abs() <= self.tolerance {
                self.state[d] = ContactState::Nc;
                continue;
            }
            let was_rejected = self.state[d] == ContactState::R;
            match self.drive_to_zero(d, a_matrix, joint, f)? {
                Drive::Done => {
                    if was_rejected {
                        // Progress on a previously rejected contact: the
                        // cycle memory is stale.
                        self.snapshots.clear();
                    }
                }
                Drive::Defer(j) => {
                    self.state[j] = ContactState::R;
                }
            }
            if self
                .state
                .iter()
                .all(|s| *s != ContactState::Untreated)
            {
                let snap = (self.state.clone(), d);
                if self.snapshots.contains(&snap) {
                    warn!("LCP cycling over deferred contacts");
                    return Err(LcpError::Cycle);
                }
                self.snapshots.push(snap);
            }
        }
        Err(LcpError::IterationCap)
    }

    fn resize(&mut self, n: usize) {
        self.accel.resize(n, 0.0);
        self.state.resize(n, ContactState::Untreated);
        self.zero_steps.resize(n, false);
        self.delta_f.resize(n, 0.0);
        self.delta_a.resize(n, 0.0);
    }

    fn violation(&self, i: usize, joint: &[bool]) -> f64 {
        if joint[i] {
            self.accel[i].abs()
        } else {
            -self.accel[i]
        }
    }

    fn next_contact(&self, joint: &[bool], rng: &mut Lcg) -> Option<usize> {
        let n = self.state.len();
        match &self.policy {
            OrderPolicy::Hybrid => {
                let joints: Vec<usize> = (0..n)
                    .filter(|&i| self.state[i] == ContactState::Untreated && joint[i])
                    .collect();
                if !joints.is_empty() {
                    return Some(joints[rng.next_range(joints.len())]);
                }
                self.most_violating_untreated(joint)
                    .or_else(|| self.worst_reject(joint))
            }
            OrderPolicy::MinAccel => self
                .most_violating_untreated(joint)
                .or_else(|| self.worst_reject(joint)),
            OrderPolicy::Random => {
                let untreated: Vec<usize> = (0..n)
                    .filter(|&i| self.state[i] == ContactState::Untreated)
                    .collect();
                if untreated.is_empty() {
                    self.worst_reject(joint)
                } else {
                    Some(untreated[rng.next_range(untreated.len())])
                }
            }
            OrderPolicy::PreOrdered(order) => order
                .iter()
                .copied()
                .find(|&i| self.state[i] == ContactState::Untreated)
                .or_else(|| self.worst_reject(joint)),
        }
    }

    fn most_violating_untreated(&self, joint: &[bool]) -> Option<usize> {
        let mut best = None;
        let mut best_v = f64::NEG_INFINITY;
        for i in 0..self.state.len() {
            if self.state[i] != ContactState::Untreated {
                continue;
            }
            let v = self.violation(i, joint);
            if best.is_none() || v > best_v {
                best = Some(i);
                best_v = v;
            }
        }
        best
    }

    /// A rejected contact is picked up again only once its violation has
    /// grown well past the tolerance. Unclamped contacts whose acceleration
    /// drifted far negative during later drives qualify the same way.
    fn worst_reject(&self, joint: &[bool]) -> Option<usize> {
        let mut best = None;
        let mut best_v = 100.0 * self.tolerance;
        for i in 0..self.state.len() {
            if self.state[i] != ContactState::R && self.state[i] != ContactState::Nc {
                continue;
            }
            let v = self.violation(i, joint);
            if v > best_v {
                best = Some(i);
                best_v = v;
            }
        }
        best
    }

    fn drive_to_zero(
        &mut self,
        d: usize,
        a_matrix: &[Vec<f64>],
        joint: &[bool],
        f: &mut [f64],
    ) -> Result<Drive, LcpError> {
        let n = f.len();
        // Would clamping d make the clamped submatrix singular? Defer d
        // unless it was already rejected once; then push on regardless.
        if self.submatrix_singular(a_matrix, d, None) && self.state[d] != ContactState::R {
            trace!(d, "deferring: would make C singular");
            return Ok(Drive::Defer(d));
        }
        self.zero_steps.fill(false);
        let mut eps = self.tolerance;
        let mut raised = false;
        let mut inner = 0usize;
        loop {
            let satisfied = if joint[d] {
                self.accel[d].abs() <= eps
            } else {
                self.accel[d] >= -eps
            };
            if satisfied {
                break;
            }
            inner += 1;
            if inner == 10 * n + 10 {
                debug!(d, inner, "drive-to-zero running long");
            }
            if inner > 1000 * n + 1000 {
                return Err(LcpError::IterationCap);
            }
            self.fdirection(a_matrix, d, f.len());
            let step = self.max_step(d, joint, f);
            let Some((s, j)) = step else {
                if f[d].abs() < 10.0 * self.tolerance {
                    trace!(d, "deferring: no step available");
                    return Ok(Drive::Defer(d));
                }
                if !raised {
                    raised = true;
                    eps *= 100.0;
                    continue;
                }
                return Err(LcpError::NoStep);
            };
            if s.abs() > MAX_STEP_LIMIT {
                if f[d].abs() < 10.0 * self.tolerance {
                    trace!(d, s, "deferring: unbounded step");
                    return Ok(Drive::Defer(d));
                }
                if !raised {
                    raised = true;
                    eps *= 100.0;
                    continue;
                }
                return Err(LcpError::NoStep);
            }
            trace!(d, j, s, "step");
            for i in 0..n {
                f[i] += s * self.delta_f[i];
                self.accel[i] += s * self.delta_a[i];
            }
            if s.abs() < 1e-12 {
                if self.zero_steps[j] {
                    // The same contact limited us twice with a zero-sized
                    // step: it flip-flops between C and NC. Reject it to
                    // break the cycle, which is safe while its force is
                    // negligible.
                    if j != d && f[j].abs() < 10.0 * self.tolerance {
                        trace!(j, "deferring flip-flopping contact");
                        self.state[j] = ContactState::R;
                        continue;
                    }
                } else {
                    self.zero_steps[j] = true;
                }
            }
            if j == d {
                break;
            }
            match self.state[j] {
                ContactState::C => {
                    // Force at j dropped to zero; unclamp. A sizable
                    // residual force means the step was bad: re-queue.
                    if f[j].abs() > 10.0 * self.tolerance {
                        self.state[j] = ContactState::R;
                    } else {
                        f[j] = 0.0;
                        self.state[j] = ContactState::Nc;
                    }
                }
                ContactState::Nc | ContactState::Untreated | ContactState::R => {
                    // Acceleration at j hit zero; clamp, unless that makes
                    // the clamped submatrix singular.
                    if self.submatrix_singular(a_matrix, d, Some(j))
                        && self.state[j] != ContactState::R
                    {
                        trace!(j, "deferring instead of clamping");
                        self.state[j] = ContactState::R;
                    } else if self.accel[j].abs() > 10.0 * self.tolerance {
                        self.state[j] = ContactState::R;
                    } else {
                        self.accel[j] = 0.0;
                        self.state[j] = ContactState::C;
                    }
                }
            }
        }
        self.state[d] = if f[d].abs() > self.tolerance {
            ContactState::C
        } else {
            ContactState::Nc
        };
        Ok(Drive::Done)
    }

    /// Computes the force direction that raises the force at `d` by one
    /// unit while keeping every clamped acceleration at zero, then the
    /// acceleration change it causes.
    fn fdirection(&mut self, a_matrix: &[Vec<f64>], d: usize, n: usize) {
        self.delta_f.fill(0.0);
        self.delta_f[d] = 1.0;
        let c_idx: Vec<usize> = (0..n).filter(|&i| self.state[i] == ContactState::C).collect();
        if !c_idx.is_empty() {
            let m = c_idx.len();
            let mut sub = self.take_scratch(m, m + 1);
            for (r, &i) in c_idx.iter().enumerate() {
                for (c, &k) in c_idx.iter().enumerate() {
                    sub[r][c] = a_matrix[i][k];
                }
                sub[r][m] = -a_matrix[i][d];
            }
            let x = solve_linear(&mut sub, m);
            for (k, &i) in c_idx.iter().enumerate() {
                self.delta_f[i] = x[k];
            }
            self.give_scratch(sub);
        }
        for i in 0..n {
            let mut sum = a_matrix[i][d];
            for &k in &c_idx {
                sum += a_matrix[i][k] * self.delta_f[k];
            }
            self.delta_a[i] = sum;
        }
    }

    /// Largest step along `(delta_f, delta_a)` before a constraint breaks,
    /// and the contact that limits it. Joints may require a negative step.
    fn max_step(&self, d: usize, joint: &[bool], f: &[f64]) -> Option<(f64, usize)> {
        let mut best: Option<(f64, usize)> = None;
        let mut consider = |s: f64, j: usize, best: &mut Option<(f64, usize)>| {
            if !s.is_finite() {
                return;
            }
            match best {
                Some((bs, _)) if s.abs() >= bs.abs() => {}
                _ => *best = Some((s, j)),
            }
        };
        // Direction of travel is set by what it takes to fix d.
        let dir = if self.delta_a[d] != 0.0 {
            let s = -self.accel[d] / self.delta_a[d];
            if s != 0.0 {
                s.signum()
            } else {
                1.0
            }
        } else {
            1.0
        };
        if self.delta_a[d] != 0.0 {
            let s = -self.accel[d] / self.delta_a[d];
            if joint[d] || s * dir >= 0.0 {
                consider(s, d, &mut best);
            }
        }
        for i in 0..f.len() {
            if i == d {
                continue;
            }
            match self.state[i] {
                ContactState::C => {
                    // Joint forces are unrestricted in sign and never
                    // limit the step.
                    if !joint[i] && self.delta_f[i] * dir < 0.0 {
                        consider(-f[i] / self.delta_f[i], i, &mut best);
                    }
                }
                ContactState::Nc => {
                    if joint[i] {
                        if self.delta_a[i] != 0.0 {
                            consider(-self.accel[i] / self.delta_a[i], i, &mut best);
                        }
                    } else if self.delta_a[i] * dir < 0.0 {
                        consider(-self.accel[i] / self.delta_a[i], i, &mut best);
                    }
                }
                _ => {}
            }
        }
        best
    }

    /// Gaussian elimination singularity probe for the clamped submatrix
    /// plus `d` (and optionally `extra`).
    fn submatrix_singular(&mut self, a_matrix: &[Vec<f64>], d: usize, extra: Option<usize>) -> bool {
        let mut idx: Vec<usize> = (0..self.state.len())
            .filter(|&i| self.state[i] == ContactState::C)
            .collect();
        if !idx.contains(&d) {
            idx.push(d);
        }
        if let Some(e) = extra {
            if !idx.contains(&e) {
                idx.push(e);
            }
        }
        let m = idx.len();
        if m == 1 {
            return a_matrix[idx[0]][idx[0]].abs() < SINGULAR_DIAGONAL;
        }
        let mut sub = self.take_scratch(m, m);
        for (r, &i) in idx.iter().enumerate() {
            for (c, &k) in idx.iter().enumerate() {
                sub[r][c] = a_matrix[i][k];
            }
        }
        // Reduce to upper triangular with partial pivoting, then look at
        // the smallest diagonal magnitude.
        let mut min_diag = f64::INFINITY;
        for col in 0..m {
            let mut pivot = col;
            for r in (col + 1)..m {
                if sub[r][col].abs() > sub[pivot][col].abs() {
                    pivot = r;
                }
            }
            sub.swap(col, pivot);
            let p = sub[col][col];
            min_diag = min_diag.min(p.abs());
            if p == 0.0 {
                break;
            }
            for r in (col + 1)..m {
                let factor = sub[r][col] / p;
                for c in col..m {
                    sub[r][c] -= factor * sub[col][c];
                }
            }
        }
        self.give_scratch(sub);
        min_diag < SINGULAR_DIAGONAL
    }

    fn take_scratch(&mut self, rows: usize, cols: usize) -> Vec<Vec<f64>> {
        let mut m = self.scratch.pop().unwrap_or_default();
        m.resize_with(rows, Vec::new);
        for row in &mut m {
            row.clear();
            row.resize(cols, 0.0);
        }
        m
    }

    fn give_scratch(&mut self, m: Vec<Vec<f64>>) {
        self.scratch.push(m);
    }
}

/// Solves the augmented system in place: `m` is `rows x (rows+1)` with the
/// right-hand side in the last column. Near-zero pivots are retried across
/// a ladder of singularity tolerances; the solution with the smallest
/// residual wins, with free variables set to zero.
fn solve_linear(m: &mut [Vec<f64>], rows: usize) -> Vec<f64> {
    let orig: Vec<Vec<f64>> = m.iter().map(|r| r.clone()).collect();
    let mut best: Option<(f64, Vec<f64>)> = None;
    let mut tol = 1e-3;
    while tol >= 1e-17 {
        for (r, row) in m.iter_mut().enumerate() {
            row.copy_from_slice(&orig[r]);
        }
        let x = eliminate(m, rows, tol);
        let mut residual = 0.0f64;
        for r in 0..rows {
            let mut sum = -orig[r][rows];
            for c in 0..rows {
                sum += orig[r][c] * x[c];
            }
            residual = residual.max(sum.abs());
        }
        if residual <= 1e-7 {
            return x;
        }
        match &best {
            Some((br, _)) if *br <= residual => {}
            _ => best = Some((residual, x)),
        }
        tol *= 1e-2;
    }
    let (residual, x) = best.expect("ladder always produces a candidate");
    warn!(residual, "linear solve kept a poor solution");
    x
}

fn eliminate(m: &mut [Vec<f64>], rows: usize, tol: f64) -> Vec<f64> {
    let mut pivot_of: Vec<Option<usize>> = vec![None; rows];
    let mut row = 0usize;
    for col in 0..rows {
        let mut pivot = row;
        for r in (row + 1)..rows {
            if m[r][col].abs() > m[pivot][col].abs() {
                pivot = r;
            }
        }
        if m[pivot][col].abs() < tol {
            continue;
        }
        m.swap(row, pivot);
        let p = m[row][col];
        for r in (row + 1)..rows {
            let factor = m[r][col] / p;
            for c in col..=rows {
                m[r][c] -= factor * m[row][c];
            }
        }
        pivot_of[col] = Some(row);
        row += 1;
        if row == rows {
            break;
        }
    }
    let mut x = vec![0.0; rows];
    for col in (0..rows).rev() {
        let Some(r) = pivot_of[col] else { continue };
        let mut sum = m[r][rows];
        for c in (col + 1)..rows {
            sum -= m[r][c] * x[c];
        }
        x[col] = sum / m[r][col];
    }
    x
}

/// Largest violation of the complementarity conditions: joints report
/// `|a|`, contacts report negative acceleration, negative force, and the
/// product `|f a|`.
pub fn check_force_accel(f: &[f64], accel: &[f64], joint: &[bool]) -> f64 {
    let mut worst = 0.0f64;
    for i in 0..f.len() {
        if joint[i] {
            worst = worst.max(accel[i].abs());
        } else {
            worst = worst.max(-accel[i]);
            worst = worst.max(-f[i]);
            worst = worst.max((f[i] * accel[i]).abs());
        }
    }
    worst
}

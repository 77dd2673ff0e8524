//! The dense state vector driven by the integrator.
//!
//! Layout: `[time, KE, PE, TE, (body)(body)...]` where each body block is
//! the 6-tuple `[x, vx, y, vy, angle, omega]`. Removing a body tombstones
//! its block; a later addition reuses the first free run of six slots.
use std::fmt;

/// Index of the simulation-time slot.
pub const TIME: usize = 0;
pub const KINETIC_ENERGY: usize = 1;
pub const POTENTIAL_ENERGY: usize = 2;
pub const TOTAL_ENERGY: usize = 3;
/// First slot available to body blocks.
pub const FIRST_BODY_SLOT: usize = 4;

/// Offsets of the body fields within a 6-variable block.
pub const X: usize = 0;
pub const VX: usize = 1;
pub const Y: usize = 2;
pub const VY: usize = 3;
pub const ANGLE: usize = 4;
pub const OMEGA: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarName {
    Time,
    KineticEnergy,
    PotentialEnergy,
    TotalEnergy,
    Body { body: String, field: usize },
    Deleted,
}

impl fmt::Display for VarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarName::Time => write!(f, "time"),
            VarName::KineticEnergy => write!(f, "kinetic_energy"),
            VarName::PotentialEnergy => write!(f, "potential_energy"),
            VarName::TotalEnergy => write!(f, "total_energy"),
            VarName::Body { body, field } => {
                let field = ["x", "vx", "y", "vy", "angle", "omega"][*field];
                write!(f, "{body}.{field}")
            }
            VarName::Deleted => write!(f, "deleted"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct VarsList {
    values: Vec<f64>,
    names: Vec<VarName>,
}

impl VarsList {
    pub fn new() -> VarsList {
        VarsList {
            values: vec![0.0; FIRST_BODY_SLOT],
            names: vec![
                VarName::Time,
                VarName::KineticEnergy,
                VarName::PotentialEnergy,
                VarName::TotalEnergy,
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn get(&self, i: usize) -> f64 {
        self.values[i]
    }

    pub fn set(&mut self, i: usize, v: f64) {
        self.values[i] = v;
    }

    pub fn name(&self, i: usize) -> &VarName {
        &self.names[i]
    }

    pub fn time(&self) -> f64 {
        self.values[TIME]
    }

    pub fn set_time(&mut self, t: f64) {
        self.values[TIME] = t;
    }

    /// Allocates a 6-variable block for a body, reusing the first run of
    /// six tombstoned slots when one exists.
    pub fn add_body_block(&mut self, body: &str) -> usize {
        let start = self.find_deleted_run(6).unwrap_or_else(|| {
            let at = self.values.len();
            self.values.resize(at + 6, 0.0);
            self.names.resize(at + 6, VarName::Deleted);
            at
        });
        for field in 0..6 {
            self.values[start + field] = 0.0;
            self.names[start + field] = VarName::Body {
                body: body.to_string(),
                field,
            };
        }
        start
    }

    /// Tombstones a body block; the slots become reusable but the vector
    /// never shrinks, so other bodies' indices stay valid.
    pub fn delete_body_block(&mut self, start: usize) {
        for i in start..start + 6 {
            self.values[i] = 0.0;
            self.names[i] = VarName::Deleted;
        }
    }

    fn find_deleted_run(&self, len: usize) -> Option<usize> {
        let mut run = 0;
        for i in FIRST_BODY_SLOT..self.names.len() {
            if self.names[i] == VarName::Deleted {
                run += 1;
                if run == len {
                    return Some(i + 1 - len);
                }
            } else {
                run = 0;
            }
        }
        None
    }
}

impl Default for VarsList {
    fn default() -> Self {
        VarsList::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_layout() {
        let v = VarsList::new();
        assert_eq!(v.len(), 4);
        assert_eq!(*v.name(TIME), VarName::Time);
        assert_eq!(*v.name(TOTAL_ENERGY), VarName::TotalEnergy);
    }

    #[test]
    fn test_add_extends() {
        let mut v = VarsList::new();
        assert_eq!(v.add_body_block("a"), 4);
        assert_eq!(v.add_body_block("b"), 10);
        assert_eq!(v.len(), 16);
        assert_eq!(
            *v.name(10),
            VarName::Body {
                body: "b".to_string(),
                field: X
            }
        );
    }

    #[test]
    fn test_delete_and_reuse() {
        let mut v = VarsList::new();
        let a = v.add_body_block("a");
        let b = v.add_body_block("b");
        v.set(a + VX, 3.0);
        v.delete_body_block(a);
        assert_eq!(v.len(), 16);
        assert_eq!(*v.name(a), VarName::Deleted);
        assert_eq!(v.get(a + VX), 0.0);
        // Reuse keeps the vector length and leaves b untouched.
        let c = v.add_body_block("c");
        assert_eq!(c, a);
        assert_eq!(v.len(), 16);
        assert_eq!(
            *v.name(b),
            VarName::Body {
                body: "b".to_string(),
                field: X
            }
        );
    }

    #[test]
    fn test_no_partial_run_reuse() {
        let mut v = VarsList::new();
        let a = v.add_body_block("a");
        let _b = v.add_body_block("b");
        v.delete_body_block(a);
        // A 6-slot request must not straddle live slots.
        let c = v.add_body_block("c");
        assert_eq!(c, a);
        let d = v.add_body_block("d");
        assert_eq!(d, 16);
        assert_eq!(v.len(), 22);
    }
}

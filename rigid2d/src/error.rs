use thiserror::Error;

/// Violations of the polygon construction rules. These are programming
/// errors in the caller and surface immediately from the builder.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("no open path; call start_path first")]
    NoOpenPath,
    #[error("path already open; close it before starting another")]
    PathAlreadyOpen,
    #[error("circular edge endpoints disagree about the radius: |start - center| = {start_radius}, |end - center| = {end_radius}")]
    InconsistentRadius { start_radius: f64, end_radius: f64 },
    #[error("close_path requires the last edge to end at the path start, gap = {gap}")]
    OpenLoop { gap: f64 },
    #[error("polygon has no edges")]
    Empty,
    #[error("edge index {index} out of range for polygon with {count} edges")]
    BadEdgeIndex { index: usize, count: usize },
    #[error("zero-length edge at {at:?}")]
    ZeroLengthEdge { at: (f64, f64) },
}

/// Runtime failures of the simulation core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("immovable body '{name}' has non-zero velocity ({vx}, {vy}, {omega})")]
    ImmovableBodyMoving {
        name: String,
        vx: f64,
        vy: f64,
        omega: f64,
    },
    #[error("no body named '{0}'")]
    NotFound(String),
    #[error("contact force solver failed (code {code}) with residual {residual} at time {time}")]
    SolverFailed { code: i32, residual: f64, time: f64 },
    #[error("force law produced a non-finite force on body '{body}'")]
    NonFiniteForce { body: String },
    #[error("LCP inner loop exceeded {0} iterations")]
    IterationCap(usize),
    #[error("time advance stuck: step shrank to {step} while seeking the collision instant")]
    Stuck { step: f64 },
}

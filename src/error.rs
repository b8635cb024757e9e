//! Error categories for the calibration engine.
//!
//! The five categories: `SystemError`,
//! `UsageError`, `MathError`, `SyntaxError` and `VersionError`. Rather than
//! five flat variants we give each category its own payload enum, so a
//! caller matching on `VnaCalError::Usage(..)` gets an exhaustive,
//! specific reason rather than a string to re-parse.

use std::fmt;

/// Coordinates of a conflicting parameter-matrix port mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct PortConflict {
    pub row: usize,
    pub column: usize,
    pub expected_port: usize,
    pub found_port: usize,
}

impl fmt::Display for PortConflict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "cell ({}, {}) maps to port {} but a prior cell already fixed this parameter's port to {}",
            self.row, self.column, self.found_port, self.expected_port
        )
    }
}

/// Reasons the caller handed the library something it cannot act on.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageError {
    /// A handle does not refer to a live parameter in the registry.
    InvalidParameter(usize),
    /// A query frequency lies outside a parameter's or calibration's
    /// ε-extrapolation envelope.
    FrequencyOutOfRange { frequency: f64, fmin: f64, fmax: f64 },
    /// Two structures that must agree in size did not.
    DimensionMismatch { context: &'static str, expected: (usize, usize), found: (usize, usize) },
    /// A parameter-matrix analysis found the same parameter mapped to two
    /// different ports.
    PortConflict(PortConflict),
    /// A standard's M-cell was required but never measured.
    MissingMeasurement { row: usize, column: usize },
    /// `solve()` was called before `set_frequency_vector`.
    FrequencyGridNotSet,
    /// `set_frequency_vector` was called twice.
    FrequencyGridAlreadySet,
    /// A parameter was deleted while its hold count was nonzero and the
    /// caller tried to use it anyway in a way that requires it to be live.
    ParameterHeld(usize),
    /// An operation needs at least one standard to have been added.
    NoStandards,
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UsageError::InvalidParameter(h) => write!(f, "handle {} does not refer to a live parameter", h),
            UsageError::FrequencyOutOfRange { frequency, fmin, fmax } => write!(
                f,
                "frequency {} is outside the extrapolation envelope of [{}, {}]",
                frequency, fmin, fmax
            ),
            UsageError::DimensionMismatch { context, expected, found } => write!(
                f,
                "{}: expected {}x{}, found {}x{}",
                context, expected.0, expected.1, found.0, found.1
            ),
            UsageError::PortConflict(c) => write!(f, "port conflict: {}", c),
            UsageError::MissingMeasurement { row, column } => {
                write!(f, "M-cell ({}, {}) was never measured", row, column)
            }
            UsageError::FrequencyGridNotSet => write!(f, "frequency vector must be set before solving"),
            UsageError::FrequencyGridAlreadySet => write!(f, "frequency vector is already set and cannot be changed"),
            UsageError::ParameterHeld(h) => write!(f, "parameter {} is still held", h),
            UsageError::NoStandards => write!(f, "at least one standard must be added before solving"),
        }
    }
}

/// Reasons the underlying numerics could not produce a calibration.
#[derive(Debug, Clone, PartialEq)]
pub enum MathError {
    /// Fewer equations than unknowns in some sub-system.
    Underdetermined { sub_system: usize, equations: usize, unknowns: usize },
    /// A square linear system (or the reduced R factor) was singular.
    SingularSystem,
    /// A leakage term had no contributing measurements.
    SingularLeakage { row: usize, column: usize },
    /// The Gauss-Newton Jacobian was rank-deficient.
    SingularJacobian,
    /// The iterative solver exhausted its outer-iteration budget without
    /// converging.
    ConvergenceFailed { outer_iterations: usize },
    /// The measurement-weighted RMS residual exceeded the configured
    /// rejection threshold.
    ExcessError { rms: f64, threshold_sigma: f64 },
}

impl fmt::Display for MathError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MathError::Underdetermined { sub_system, equations, unknowns } => write!(
                f,
                "sub-system {} is under-determined: {} equations for {} unknowns",
                sub_system, equations, unknowns
            ),
            MathError::SingularSystem => write!(f, "linear system is singular"),
            MathError::SingularLeakage { row, column } => write!(
                f,
                "leakage term ({}, {}) has no contributing measurements",
                row, column
            ),
            MathError::SingularJacobian => write!(f, "Gauss-Newton Jacobian is rank-deficient"),
            MathError::ConvergenceFailed { outer_iterations } => {
                write!(f, "iterative solver failed to converge in {} outer iterations", outer_iterations)
            }
            MathError::ExcessError { rms, threshold_sigma } => write!(
                f,
                "solution RMS residual {} exceeds the {} sigma rejection threshold",
                rms, threshold_sigma
            ),
        }
    }
}

/// Top-level error type returned at every public API boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum VnaCalError {
    /// Allocation failure or other host-environment failure. The payload
    /// is a human-readable cause, wrapping an external failure reason as
    /// a string rather than re-exposing the underlying error type at the
    /// API boundary.
    System(String),
    Usage(UsageError),
    Math(MathError),
    /// A malformed save file (reserved for the external save/load layer;
    /// the core never constructs this variant itself).
    Syntax(String),
    /// An unsupported file version (same caveat as `Syntax`).
    Version(String),
}

impl fmt::Display for VnaCalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VnaCalError::System(msg) => write!(f, "system error: {}", msg),
            VnaCalError::Usage(e) => write!(f, "usage error: {}", e),
            VnaCalError::Math(e) => write!(f, "math error: {}", e),
            VnaCalError::Syntax(msg) => write!(f, "syntax error: {}", msg),
            VnaCalError::Version(msg) => write!(f, "version error: {}", msg),
        }
    }
}

impl std::error::Error for VnaCalError {}

impl From<UsageError> for VnaCalError {
    fn from(e: UsageError) -> Self {
        VnaCalError::Usage(e)
    }
}

impl From<MathError> for VnaCalError {
    fn from(e: MathError) -> Self {
        VnaCalError::Math(e)
    }
}

pub type Result<T> = std::result::Result<T, VnaCalError>;

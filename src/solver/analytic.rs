//! The analytic (per-frequency, closed-form) solver.
//!
//! At a single frequency, given concrete values for every unsolved
//! parameter (or none, when the sub-system has no unknown/correlated
//! standards at all), assembling the sub-system's equations produces a
//! linear system in the error terms alone; [`crate::linalg::qrsolve2`]
//! solves it in one shot. This is also the "inner" linear solve the
//! iterative solver calls at every trial parameter vector.

use nalgebra::{DMatrix, DVector};

use crate::complex::C64;
use crate::equation::{self, SubSystemEquations};
use crate::error::Result;
use crate::linalg::{assemble_dense, qrsolve2};
use crate::parameter::ParameterRegistry;
use crate::standard::Standard;

/// The solved error-term vector and residual (`b - A x`) for one
/// sub-system at one frequency.
pub struct SubSystemSolution {
    pub x: DVector<C64>,
    pub residual: DVector<C64>,
}

/// Solves every sub-system's linear system at frequency index
/// `freq_index` / value `f`, substituting `p[sub]` (if present) for that
/// sub-system's unsolved parameters.
pub fn solve_at_frequency(
    systems: &[SubSystemEquations],
    standards: &[Standard],
    registry: &ParameterRegistry,
    freq_index: usize,
    f: f64,
    p: Option<&[Vec<C64>]>,
    unknowns_per_subsystem: usize,
) -> Result<Vec<SubSystemSolution>> {
    systems
        .iter()
        .enumerate()
        .map(|(sub, sys)| {
            let trial = p.map(|all| all[sub].as_slice());
            let mut rows = Vec::with_capacity(sys.equations.len());
            let mut rhs = Vec::with_capacity(sys.equations.len());
            for eq in &sys.equations {
                let standard = &standards[eq.standard_index];
                let (coeffs, b) = equation::evaluate_row(eq, standard, registry, &sys.unsolved_params, trial, freq_index, f)?;
                rows.push(coeffs);
                rhs.push(b);
            }
            let a = assemble_dense(&rows, unknowns_per_subsystem);
            let b = DMatrix::from_column_slice(rhs.len(), 1, &rhs);
            let x_mat = qrsolve2(&a, &b)?;
            let x = DVector::from_column_slice(x_mat.column(0).as_slice());
            let residual = DVector::from_column_slice(b.column(0).as_slice()) - &a * &x;
            Ok(SubSystemSolution { x, residual })
        })
        .collect()
}

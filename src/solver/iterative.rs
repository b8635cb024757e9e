//! The iterative solver for sub-systems with unknown or correlated
//! standards (TRL-style calibrations), and/or a measurement-error model.
//!
//! Variable projection: at a trial value of the nonlinear parameters
//! (`p`, one unknown reflect or line value per unsolved standard
//! parameter), the error terms are a linear least-squares problem.
//! Gauss-Newton with backtracking line search drives `p` to minimize the
//! residual norm of that inner solve. The Jacobian uses Kaufman's
//! approximation: when finite-differencing the residual with respect to
//! `p`, the inner linear solution `x` is held fixed at its value for the
//! current `p` rather than re-optimized at every perturbation, trading
//! the (usually negligible) `S2` cross term of the exact variable
//! projection Jacobian for one inner solve per outer iteration instead of
//! one per parameter per iteration.
//!
//! Correlated parameters contribute an extra residual
//! row per parameter, `(p_i - other) / sigma`, appended to the
//! Gauss-Newton system after the model rows; this is what lets a
//! correlated standard's fitted value be pulled back toward its
//! reference by exactly as much as its declared uncertainty allows.

use nalgebra::{DMatrix, DVector};

use crate::accumulator::{MeasurementNoiseModel, SolverConfig};
use crate::complex::C64;
use crate::equation::{self, SubSystemEquations};
use crate::error::{MathError, Result};
use crate::interp::SegmentHint;
use crate::linalg::{assemble_dense, qrsolve2};
use crate::parameter::ParameterRegistry;
use crate::standard::Standard;

use super::analytic::SubSystemSolution;

/// Builds `(A, b, weights)` for one trial parameter vector `p`: `weights[i]`
/// is the measurement-error weight for row `i` (`1.0` when no error model
/// is set), already baked into neither `A` nor `b` — callers apply it.
fn assemble(
    sys: &SubSystemEquations,
    standards: &[Standard],
    registry: &ParameterRegistry,
    freq_index: usize,
    f: f64,
    p: &[C64],
    ncols: usize,
    weight: f64,
) -> Result<(DMatrix<C64>, DVector<C64>)> {
    let mut rows = Vec::with_capacity(sys.equations.len());
    let mut rhs = Vec::with_capacity(sys.equations.len());
    for eq in &sys.equations {
        let standard = &standards[eq.standard_index];
        let (mut coeffs, mut b) = equation::evaluate_row(eq, standard, registry, &sys.unsolved_params, Some(p), freq_index, f)?;
        if weight != 1.0 {
            for c in coeffs.iter_mut() {
                c.1 *= weight;
            }
            b *= weight;
        }
        rows.push(coeffs);
        rhs.push(b);
    }
    let a = assemble_dense(&rows, ncols);
    let b = DVector::from_column_slice(&rhs);
    Ok((a, b))
}

/// The per-row weight for the measurements feeding `sys` at frequency
/// `f`: the noise model depends only on `f` (not on the individual trace
/// value) under the "noise + tracking*|m|" decomposition, so a single
/// representative magnitude — the mean |m| across the sub-system's
/// measured cells at this frequency — is used. This keeps one weight per
/// (sub-system, frequency) rather than a bespoke one per row, a
/// simplification documented in DESIGN.md.
fn representative_weight(
    sys: &SubSystemEquations,
    standards: &[Standard],
    freq_index: usize,
    f: f64,
    m_error: Option<&MeasurementNoiseModel>,
    hint: &mut SegmentHint,
) -> f64 {
    let model = match m_error {
        Some(m) => m,
        None => return 1.0,
    };
    if sys.equations.is_empty() {
        return 1.0;
    }
    let mean_mag: f64 = sys
        .equations
        .iter()
        .map(|eq| standards[eq.standard_index].measured(eq.full_row, eq.full_column).map(|t| t[freq_index].norm()).unwrap_or(0.0))
        .sum::<f64>()
        / sys.equations.len() as f64;
    model.weight(f, mean_mag, hint)
}

fn residual_given_x(a: &DMatrix<C64>, b: &DVector<C64>, x: &DVector<C64>) -> DVector<C64> {
    b - a * x
}

fn objective(r: &DVector<C64>) -> f64 {
    r.iter().map(|v| v.norm_sqr()).sum()
}

fn to_real(r: &DVector<C64>) -> DVector<f64> {
    let mut out = DVector::from_element(r.len() * 2, 0.0);
    for (i, v) in r.iter().enumerate() {
        out[2 * i] = v.re;
        out[2 * i + 1] = v.im;
    }
    out
}

/// One correlated-parameter constraint row: `(p[target] - reference) /
/// sigma`, with `reference` either a fixed value (the "other" parameter
/// is not itself being solved for) or another entry of `p` (when the
/// correlate is also unsolved).
struct CorrelationRow {
    target: usize,
    reference: CorrelationReference,
    sigma: f64,
}

enum CorrelationReference {
    Fixed(C64),
    Other(usize),
}

fn correlation_rows(sys: &SubSystemEquations, registry: &ParameterRegistry, f: f64) -> Result<Vec<CorrelationRow>> {
    let mut rows = Vec::new();
    for (idx, &handle) in sys.unsolved_params.iter().enumerate() {
        if !registry.is_correlated(handle) {
            continue;
        }
        let (other, sigma) = registry.correlation(handle, f)?;
        let reference = match sys.unsolved_params.iter().position(|&h| h == other) {
            Some(other_idx) => CorrelationReference::Other(other_idx),
            None => CorrelationReference::Fixed(registry.get_value(other, f)?),
        };
        rows.push(CorrelationRow { target: idx, reference, sigma: sigma.max(1e-300) });
    }
    Ok(rows)
}

fn correlation_residual(rows: &[CorrelationRow], p: &[C64]) -> DVector<C64> {
    DVector::from_iterator(
        rows.len(),
        rows.iter().map(|row| {
            let reference = match row.reference {
                CorrelationReference::Fixed(v) => v,
                CorrelationReference::Other(i) => p[i],
            };
            (p[row.target] - reference) / row.sigma
        }),
    )
}

/// Solves one sub-system's nonlinear system at a single frequency.
/// Returns the converged error-term solution and the final parameter
/// vector (in the order of `sys.unsolved_params`).
#[allow(clippy::too_many_arguments)]
pub fn solve_subsystem_at_frequency(
    sys: &SubSystemEquations,
    standards: &[Standard],
    registry: &ParameterRegistry,
    freq_index: usize,
    f: f64,
    ncols: usize,
    config: &SolverConfig,
    m_error: Option<&MeasurementNoiseModel>,
    weight_hint: &mut SegmentHint,
) -> Result<(SubSystemSolution, Vec<C64>)> {
    let weight = representative_weight(sys, standards, freq_index, f, m_error, weight_hint);
    let k = sys.unsolved_params.len();
    if k == 0 {
        let (a, b) = assemble(sys, standards, registry, freq_index, f, &[], ncols, weight)?;
        let x = solve_inner(&a, &b)?;
        let residual = residual_given_x(&a, &b, &x);
        return Ok((SubSystemSolution { x, residual }, Vec::new()));
    }

    let mut p: Vec<C64> = sys.unsolved_params.iter().map(|&h| registry.get_value(h, f)).collect::<Result<_>>()?;

    let (mut a, mut b) = assemble(sys, standards, registry, freq_index, f, &p, ncols, weight)?;
    let mut x = solve_inner(&a, &b)?;
    let mut r = residual_given_x(&a, &b, &x);
    let mut corr = correlation_rows(sys, registry, f)?;
    let mut corr_r = correlation_residual(&corr, &p);
    let mut obj = objective(&r) + corr_r.iter().map(|v| v.norm_sqr()).sum::<f64>();

    for _iter in 0..config.max_iterations {
        if obj.sqrt() < config.convergence_tol {
            return Ok((SubSystemSolution { x, residual: r }, p));
        }

        let jac = jacobian(sys, standards, registry, freq_index, f, &p, &x, ncols, weight, &r, &corr)?;
        let mut stacked_residual = to_real(&r);
        let corr_real = to_real(&corr_r);
        stacked_residual = DVector::from_iterator(stacked_residual.len() + corr_real.len(), stacked_residual.iter().chain(corr_real.iter()).copied());
        let rhs_real = -stacked_residual;
        let dp_real = gauss_newton_step(&jac, &rhs_real)?;

        let mut step = config.initial_step;
        let mut accepted = false;
        let (mut next_p, mut next_a, mut next_b, mut next_x, mut next_r, mut next_corr_r, mut next_obj) =
            (p.clone(), a.clone(), b.clone(), x.clone(), r.clone(), corr_r.clone(), obj);
        while step >= config.min_step {
            let trial_p = apply_step(&p, &dp_real, step);
            let (a_t, b_t) = assemble(sys, standards, registry, freq_index, f, &trial_p, ncols, weight)?;
            let x_t = solve_inner(&a_t, &b_t)?;
            let r_t = residual_given_x(&a_t, &b_t, &x_t);
            let corr_r_t = correlation_residual(&corr, &trial_p);
            let obj_t = objective(&r_t) + corr_r_t.iter().map(|v| v.norm_sqr()).sum::<f64>();
            if obj_t < obj {
                next_p = trial_p;
                next_a = a_t;
                next_b = b_t;
                next_x = x_t;
                next_r = r_t;
                next_corr_r = corr_r_t;
                next_obj = obj_t;
                accepted = true;
                break;
            }
            step *= 0.5;
        }

        if !accepted {
            // Line search stalled: treat the current point as converged.
            return Ok((SubSystemSolution { x, residual: r }, p));
        }

        let step_norm: f64 = (0..p.len()).map(|i| (next_p[i] - p[i]).norm_sqr()).sum::<f64>().sqrt();
        let p_norm: f64 = p.iter().map(|v| v.norm_sqr()).sum::<f64>().sqrt().max(1e-300);

        p = next_p;
        a = next_a;
        b = next_b;
        x = next_x;
        r = next_r;
        corr_r = next_corr_r;
        obj = next_obj;
        corr = correlation_rows(sys, registry, f)?;

        if step_norm / p_norm < config.convergence_tol {
            return Ok((SubSystemSolution { x, residual: r }, p));
        }
    }

    Err(MathError::ConvergenceFailed { outer_iterations: config.max_iterations }.into())
}

fn solve_inner(a: &DMatrix<C64>, b: &DVector<C64>) -> Result<DVector<C64>> {
    let b_mat = DMatrix::from_column_slice(b.len(), 1, b.as_slice());
    let x_mat = qrsolve2(a, &b_mat)?;
    Ok(DVector::from_column_slice(x_mat.column(0).as_slice()))
}

/// Central-difference Jacobian of the real-stacked residual (model rows
/// followed by correlated-parameter rows) with respect to the
/// real-stacked parameter vector, holding `x` fixed (Kaufman's
/// approximation). The correlated rows are linear in `p`, so their
/// Jacobian block is filled analytically rather than by finite
/// difference.
#[allow(clippy::too_many_arguments)]
fn jacobian(
    sys: &SubSystemEquations,
    standards: &[Standard],
    registry: &ParameterRegistry,
    freq_index: usize,
    f: f64,
    p: &[C64],
    x: &DVector<C64>,
    ncols: usize,
    weight: f64,
    r0: &DVector<C64>,
    corr: &[CorrelationRow],
) -> Result<DMatrix<f64>> {
    let k = p.len();
    let neq = r0.len();
    let total_rows = 2 * (neq + corr.len());
    let mut jac = DMatrix::from_element(total_rows, 2 * k, 0.0);

    for (col, dof_is_imag) in (0..k).flat_map(|i| [(i, false), (i, true)]) {
        let scale = (p[col].norm().max(1.0)) * 1e-6;
        let mut perturbed = p.to_vec();
        if dof_is_imag {
            perturbed[col] += C64::new(0.0, scale);
        } else {
            perturbed[col] += C64::new(scale, 0.0);
        }
        let (a_p, b_p) = assemble(sys, standards, registry, freq_index, f, &perturbed, ncols, weight)?;
        let r_p = residual_given_x(&a_p, &b_p, x);
        let dr = to_real(&r_p) - to_real(r0);
        let jac_col = dr / scale;
        let col_index = 2 * col + if dof_is_imag { 1 } else { 0 };
        for row in 0..2 * neq {
            jac[(row, col_index)] = jac_col[row];
        }
    }

    for (i, row) in corr.iter().enumerate() {
        let re_row = 2 * neq + 2 * i;
        let im_row = re_row + 1;
        let inv_sigma = 1.0 / row.sigma;
        jac[(re_row, 2 * row.target)] = inv_sigma;
        jac[(im_row, 2 * row.target + 1)] = inv_sigma;
        if let CorrelationReference::Other(j) = row.reference {
            jac[(re_row, 2 * j)] = -inv_sigma;
            jac[(im_row, 2 * j + 1)] = -inv_sigma;
        }
    }

    Ok(jac)
}

fn gauss_newton_step(jac: &DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
    if jac.nrows() >= jac.ncols() {
        let qr = jac.clone().qr();
        let rhs_mat = DMatrix::from_column_slice(rhs.len(), 1, rhs.as_slice());
        qr.solve(&rhs_mat).map(|m| DVector::from_column_slice(m.column(0).as_slice())).ok_or_else(|| MathError::SingularJacobian.into())
    } else {
        Err(MathError::SingularJacobian.into())
    }
}

fn apply_step(p: &[C64], dp_real: &DVector<f64>, step: f64) -> Vec<C64> {
    p.iter()
        .enumerate()
        .map(|(i, &v)| v + C64::new(step * dp_real[2 * i], step * dp_real[2 * i + 1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{CalType, Layout};
    use crate::parameter::{ParameterRegistry, Sigma};
    use crate::standard::Standard;

    #[test]
    fn no_unknowns_matches_analytic_solution() {
        let layout = Layout::new(CalType::T8, 2, 2).unwrap();
        let reg = ParameterRegistry::new();
        let standards = [through_standard()];
        let systems = equation::build(&layout, &standards, &reg);
        let mut hint = SegmentHint::default();
        let config = SolverConfig::default();
        let (sol, p) = solve_subsystem_at_frequency(&systems[0], &standards, &reg, 0, 1e9, layout.sub_system.unknowns, &config, None, &mut hint).unwrap();
        assert!(p.is_empty(), "no unknown/correlated parameters in this standard set");
        assert!(sol.residual.norm() < 1e-6);
    }

    fn through_standard() -> Standard {
        Standard::new(
            vec![0, 1],
            vec![vec![crate::parameter::VNACAL_ZERO, crate::parameter::VNACAL_MATCH], vec![crate::parameter::VNACAL_MATCH, crate::parameter::VNACAL_ZERO]],
            vec![
                vec![Some(vec![C64::new(0.01, 0.0)]), Some(vec![C64::new(0.9, 0.0)])],
                vec![Some(vec![C64::new(0.9, 0.0)]), Some(vec![C64::new(0.02, 0.0)])],
            ],
        )
    }

    #[test]
    fn correlated_parameter_pulls_toward_reference() {
        let mut reg = ParameterRegistry::new();
        let base = reg.make_scalar(C64::new(0.8, 0.0));
        let corr = reg.make_correlated(base, Sigma::Scalar(0.01)).unwrap();
        assert!(reg.is_correlated(corr));
        let (other, sigma) = reg.correlation(corr, 1e9).unwrap();
        assert_eq!(other, base);
        assert!((sigma - 0.01).abs() < 1e-12);
    }
}

//! Solver dispatch: decides between the analytic and iterative
//! paths, drives both over the full frequency grid,
//! folds in the leakage aggregator and the UE14 -> E12 converter,
//! and assembles the result into a stored [`Calibration`].
//!
//! One function per solver step, called in a fixed order from a single
//! top-level driver (here, [`solve`]) rather than scattering the sequence
//! across call sites.

pub mod analytic;
pub mod iterative;
pub mod leakage;
pub mod ue14_e12;

use log::{debug, info};

use crate::accumulator::{MeasurementNoiseModel, SolverConfig};
use crate::calibration::Calibration;
use crate::complex::C64;
use crate::equation::{self, SubSystemEquations};
use crate::error::{MathError, Result};
use crate::interp::SegmentHint;
use crate::layout::{CalType, Layout};
use crate::parameter::{ParameterRegistry, SolvedTable};
use crate::standard::Standard;

/// Default rejection threshold, in standard deviations of the weighted
/// RMS residual, used when [`crate::accumulator::NewCal::set_pvalue_limit`]
/// was never called.
pub const DEFAULT_RMS_REJECTION_SIGMA: f64 = 6.0;

#[allow(clippy::too_many_arguments)]
pub fn solve(
    cal_type: CalType,
    m_rows: usize,
    m_columns: usize,
    frequency: &[f64],
    z0: &[C64],
    standards: &[Standard],
    registry: &mut ParameterRegistry,
    config: &SolverConfig,
    m_error: Option<&MeasurementNoiseModel>,
    pvalue_limit: Option<f64>,
) -> Result<Calibration> {
    let layout = Layout::new(cal_type, m_rows, m_columns)?;
    let ports = m_rows.max(m_columns);
    let nfreq = frequency.len();

    // Frequency-independent structure: which equations exist, and which
    // unknown/correlated parameters each sub-system must solve for.
    let systems = equation::build(&layout, standards, registry);
    let has_unknowns = systems.iter().any(|s| !s.unsolved_params.is_empty());
    let use_iterative = has_unknowns || m_error.is_some();

    info!(
        "vnacal: solving {:?} ({} sub-systems, {} freqs) via the {} path",
        cal_type,
        systems.len(),
        nfreq,
        if use_iterative { "iterative" } else { "analytic" }
    );

    let ncols = layout.sub_system.unknowns;
    let terms_per_sub = layout.terms_per_subsystem();

    // [sub][term][freq]
    let mut solved_terms: Vec<Vec<Vec<C64>>> = vec![vec![vec![C64::new(0.0, 0.0); nfreq]; terms_per_sub]; layout.sub_systems];
    // [sub][param_position][freq], aligned with systems[sub].unsolved_params.
    let mut solved_params: Vec<Vec<Vec<C64>>> = systems.iter().map(|s| vec![vec![C64::new(0.0, 0.0); nfreq]; s.unsolved_params.len()]).collect();

    let mut weight_hint = SegmentHint::default();
    let mut weighted_sumsq = 0.0f64;
    let mut weighted_count = 0usize;

    for (fi, &f) in frequency.iter().enumerate() {
        for (sub, sys) in systems.iter().enumerate() {
            let unity_index = layout.unity_index_for_column(sub);

            if use_iterative {
                let (solution, p) = iterative::solve_subsystem_at_frequency(sys, standards, registry, fi, f, ncols, config, m_error, &mut weight_hint)?;
                debug!("vnacal: sub-system {} freq[{}]={} converged, residual norm {:.3e}", sub, fi, f, solution.residual.norm());
                store_solution(&mut solved_terms[sub], &solution.x, unity_index, fi);
                for (k, v) in p.iter().enumerate() {
                    solved_params[sub][k][fi] = *v;
                }
                for r in solution.residual.iter() {
                    weighted_sumsq += r.norm_sqr();
                    weighted_count += 1;
                }
            } else {
                let solutions = analytic::solve_at_frequency(std::slice::from_ref(sys), standards, registry, fi, f, None, ncols)?;
                store_solution(&mut solved_terms[sub], &solutions[0].x, unity_index, fi);
            }
        }
    }

    // Record the solved (frequency, gamma) table on every unknown/correlated
    // parameter so later `get_value` calls (and a second `solve` re-entry)
    // see the fitted curve instead of the initial guess.
    for (sub, sys) in systems.iter().enumerate() {
        for (k, &handle) in sys.unsolved_params.iter().enumerate() {
            registry.set_solved(handle, SolvedTable { f: frequency.to_vec(), gamma: solved_params[sub][k].clone() })?;
        }
    }

    if m_error.is_some() {
        let threshold = pvalue_limit.unwrap_or(DEFAULT_RMS_REJECTION_SIGMA);
        let dof = weighted_count.max(1) as f64;
        let rms = (weighted_sumsq / dof).sqrt();
        if rms > threshold {
            return Err(MathError::ExcessError { rms, threshold_sigma: threshold }.into());
        }
        info!("vnacal: weighted RMS residual {:.3e} (threshold {})", rms, threshold);
    }

    let leak = if layout.cal_type.solve_type().has_leakage() || cal_type.has_leakage() {
        Some(leakage::aggregate(standards, m_rows, m_columns, nfreq)?)
    } else {
        None
    };

    let terms = assemble_terms(&layout, ports, &solved_terms, leak.as_deref());

    info!("vnacal: solve complete, {} stored error terms per frequency", terms.len());
    Ok(Calibration::new(cal_type, m_rows, m_columns, frequency.to_vec(), z0.to_vec(), terms))
}

/// Re-inserts the literal unity term at `unity_index` into the
/// `terms_per_sub`-long per-sub-system vector and writes frequency column
/// `fi` of every term.
fn store_solution(dst: &mut [Vec<C64>], x: &nalgebra::DVector<C64>, unity_index: usize, fi: usize) {
    let mut xi = 0usize;
    for (slot, term) in dst.iter_mut().enumerate() {
        term[fi] = if slot == unity_index {
            C64::new(1.0, 0.0)
        } else {
            let v = x[xi];
            xi += 1;
            v
        };
    }
}

/// Assembles the final, publicly-stored error-term vector (one
/// length-`nfreq` complex array per term) from the per-sub-system solved
/// terms and the aggregated leakage terms.
///
/// For `E12`, `solved_terms` holds the intermediate `UE14` solution
/// (`layout.cal_type.solve_type() == UE14`); each column is converted via
/// [`ue14_e12::convert_column`] before being flattened. Every other type
/// is stored directly: the sub-system's terms followed by any leakage
/// terms, sub-system by sub-system.
fn assemble_terms(layout: &Layout, ports: usize, solved_terms: &[Vec<Vec<C64>>], leak: Option<&[Vec<C64>]>) -> Vec<Vec<C64>> {
    let nfreq = solved_terms.first().map(|t| t.first().map(|f| f.len()).unwrap_or(0)).unwrap_or(0);

    if layout.cal_type.requires_ue14_conversion() {
        let mut out = Vec::with_capacity(layout.total_public_terms());
        for col in 0..layout.sub_systems {
            let sub = &solved_terms[col];
            let b = &layout.sub_system;
            let um = &sub[b.block_a.0..b.block_a.0 + b.block_a.1];
            let ui = &sub[b.block_b.0..b.block_b.0 + b.block_b.1];
            let ux = &sub[b.block_c.0..b.block_c.0 + b.block_c.1];
            let us_row = &sub[b.block_d.0];

            let mut el = vec![vec![C64::new(0.0, 0.0); nfreq]; ports];
            let mut er = vec![vec![C64::new(0.0, 0.0); nfreq]; ports];
            let mut em = vec![vec![C64::new(0.0, 0.0); nfreq]; ports];
            for fi in 0..nfreq {
                let um_f: Vec<C64> = um.iter().map(|t| t[fi]).collect();
                let ui_f: Vec<C64> = ui.iter().map(|t| t[fi]).collect();
                let ux_f: Vec<C64> = ux.iter().map(|t| t[fi]).collect();
                let leak_f: Vec<C64> = leak.map(|l| l[fi].clone()).unwrap_or_default();
                let column = ue14_e12::UE14Column { um: &um_f, ui: &ui_f, ux: &ux_f, us: us_row[fi] };
                let converted = ue14_e12::convert_column(layout, col, &column, &leak_f, ports);
                for r in 0..ports {
                    el[r][fi] = converted.el[r];
                    er[r][fi] = converted.er[r];
                    em[r][fi] = converted.em[r];
                }
            }
            out.extend(el);
            out.extend(er);
            out.extend(em);
        }
        out
    } else {
        let mut out = Vec::with_capacity(layout.total_solved_terms());
        for sub in solved_terms {
            out.extend(sub.iter().cloned());
        }
        if let Some(leak) = leak {
            let n_pairs = leak.first().map(|_| ()).map(|_| leak.len()).unwrap_or(0);
            let _ = n_pairs;
            let n_pair_slots = ports * ports.saturating_sub(1);
            for idx in 0..n_pair_slots {
                out.push((0..nfreq).map(|fi| leak[fi][idx]).collect());
            }
        }
        out
    }
}

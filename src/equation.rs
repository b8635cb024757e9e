//! The equation builder.
//!
//! Walks a calibration type's sub-systems and, for every standard, yields
//! the linear equations relating measured traces (M), known or
//! provisional standard parameters (S) and the error terms being solved
//! for. Both the analytic and iterative solvers, and the
//! leakage aggregator, are built on top of this single walk so they
//! never disagree about which measurements feed which equation.
//!
//! One way to picture this is as a state-machine iterator (`Init ->
//! System -> Equation -> Term -> EndTerms -> ... -> EndEquations`). We
//! build the same term stream eagerly instead of lazily: which terms
//! exist, and with which signs, depends only on [`Layout`] and the
//! standards' port maps and reachability, never on a frequency or a
//! candidate parameter vector, so nothing is lost by computing the
//! structure once and evaluating it at many frequencies or trial
//! parameter vectors. See DESIGN.md.
//!
//! Every equation is derived from the classical rational one-port error
//! model `Gamma_m = (e_d + e_r*Gamma) / (1 + e_s*Gamma)`, cleared of its
//! denominator so it is linear in `(e_d, e_r, e_s)` given known `Gamma`
//! and `Gamma_m` (DESIGN.md works through the rearrangement and its
//! two-port transmission analogue in detail).

use crate::complex::C64;
use crate::layout::{CalType, Layout};
use crate::parameter::{ParamHandle, ParameterRegistry, VNACAL_MATCH};
use crate::standard::Standard;

/// How a term's value multiplies into its equation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factor {
    /// Contributes its bare coefficient (the additive, directivity-like role).
    One,
    /// Contributes `coefficient * S`.
    S,
    /// Contributes `coefficient * M` (UE14's shared extra term only).
    M,
    /// Contributes `coefficient * M * S` (the source-match-like role).
    Ms,
}

/// One summand on the left-hand side of an equation.
#[derive(Debug, Clone, Copy)]
pub struct Term {
    /// Column index into the sub-system's *solved* unknown vector (the
    /// unity-substituted slot is never `Some`: its value is folded into
    /// the right-hand side instead).
    pub coeff: Option<usize>,
    pub negative: bool,
    pub factor: Factor,
}

/// One equation: its left-hand side terms, the S-cell they draw from,
/// and the standard/full-cell/M-cell the equation was built from.
#[derive(Debug, Clone)]
pub struct Equation {
    pub terms: Vec<Term>,
    pub standard_index: usize,
    pub full_row: usize,
    pub full_column: usize,
    pub local_row: usize,
    pub local_column: usize,
}

/// A sub-system's full equation list plus the set of distinct unsolved
/// unknown/correlated parameter handles it references, in first-seen
/// order; that order *is* the index space of the iterative solver's `p`
/// vector for this sub-system.
#[derive(Debug, Clone, Default)]
pub struct SubSystemEquations {
    pub equations: Vec<Equation>,
    pub unsolved_params: Vec<ParamHandle>,
}

/// Builds the full (frequency-independent) equation structure for every
/// sub-system of `layout` from the given standards.
///
/// UE14 (and E12, which solves as UE14) builds `m_columns` sub-systems,
/// one per column, each seeing only that column's cells; every other
/// type builds exactly one sub-system seeing the whole M matrix.
pub fn build(layout: &Layout, standards: &[Standard], registry: &ParameterRegistry) -> Vec<SubSystemEquations> {
    let ports = layout.m_rows.max(layout.m_columns);
    let solve_type = layout.cal_type.solve_type();
    let skip_unreachable = !matches!(solve_type, CalType::T16 | CalType::U16);
    let is_ue14 = solve_type == CalType::UE14;

    (0..layout.sub_systems)
        .map(|sub| build_subsystem(layout, standards, registry, sub, ports, skip_unreachable, is_ue14))
        .collect()
}

fn build_subsystem(
    layout: &Layout,
    standards: &[Standard],
    registry: &ParameterRegistry,
    sub: usize,
    ports: usize,
    skip_unreachable: bool,
    is_ue14: bool,
) -> SubSystemEquations {
    let mut out = SubSystemEquations::default();
    let unity_index = layout.unity_index_for_column(sub);
    let columns: Vec<usize> = if is_ue14 { vec![sub] } else { (0..layout.m_columns).collect() };
    let mirror_offset = if matches!(layout.cal_type.solve_type(), CalType::T16 | CalType::U16) {
        Some(layout.sub_system.block_d.0 + layout.sub_system.block_d.1)
    } else {
        None
    };

    for (std_idx, standard) in standards.iter().enumerate() {
        for &full_col in &columns {
            for full_row in 0..layout.m_rows {
                if standard.measured(full_row, full_col).is_none() {
                    continue;
                }
                let (local_row, local_col) = match (standard.local_of(full_row), standard.local_of(full_col)) {
                    (Some(lr), Some(lc)) => (lr, lc),
                    _ => continue,
                };
                let is_diag = full_row == full_col;
                if !is_diag {
                    let reachable = standard.full_reachable(full_row, full_col);
                    if skip_unreachable && !reachable {
                        continue; // routed to leakage aggregation instead.
                    }
                }

                let raw_terms = raw_terms(layout, is_ue14, is_diag, full_row, full_col, ports);
                let mut terms = Vec::with_capacity(raw_terms.len() * if mirror_offset.is_some() { 2 } else { 1 });
                for (offset, negative, factor) in raw_terms {
                    terms.push(to_term(offset, unity_index, negative, factor));
                }
                if let Some(shift) = mirror_offset {
                    let base_len = terms.len();
                    for i in 0..base_len {
                        let (offset, negative, factor) = raw_terms[i];
                        terms.push(to_term(offset + shift, unity_index, negative, factor));
                    }
                }

                register_unsolved(&mut out, standard, local_row, local_col, registry);

                out.equations.push(Equation {
                    terms,
                    standard_index: std_idx,
                    full_row,
                    full_column: full_col,
                    local_row,
                    local_column: local_col,
                });
            }
        }
    }
    out
}

fn to_term(offset: usize, unity_index: usize, negative: bool, factor: Factor) -> Term {
    Term {
        coeff: if offset == unity_index { None } else { Some(if offset > unity_index { offset - 1 } else { offset }) },
        negative,
        factor,
    }
}

/// The raw `(block offset, negative, factor)` triples for one equation,
/// before unity substitution is resolved.
fn raw_terms(layout: &Layout, is_ue14: bool, is_diag: bool, full_row: usize, full_col: usize, ports: usize) -> Vec<(usize, bool, Factor)> {
    let b = &layout.sub_system;
    if is_ue14 {
        let r = full_row;
        return vec![
            (b.block_a.0 + r, false, Factor::One),
            (b.block_b.0 + r, false, Factor::S),
            (b.block_c.0 + r, true, Factor::Ms),
            (b.block_d.0, true, Factor::M),
        ];
    }
    if is_diag {
        let p = full_row;
        vec![(b.block_b.0 + p, false, Factor::One), (b.block_d.0 + p, false, Factor::S), (b.block_a.0 + p, true, Factor::Ms)]
    } else {
        let p = full_row;
        let q = full_col;
        let pairs = ports.saturating_sub(1);
        let local_pair_index = if q > p { q - 1 } else { q };
        vec![(b.block_c.0 + p * pairs + local_pair_index, false, Factor::S)]
    }
}

fn register_unsolved(out: &mut SubSystemEquations, standard: &Standard, local_row: usize, local_col: usize, registry: &ParameterRegistry) {
    let handle = standard.s[local_row][local_col];
    if registry.is_unsolved_unknown(handle) && !out.unsolved_params.contains(&handle) {
        out.unsolved_params.push(handle);
    }
}

/// Resolves a term's `S` or `M*S`-style factor value for a given
/// equation at frequency `f`, optionally substituting `p[k]` for the
/// `k`-th entry of `unsolved_params` in place of the registry's value
/// (used by the iterative solver while `p` is still a trial vector).
///
/// [`VNACAL_MATCH`]'s identity-under-composition rule applies only to
/// off-diagonal (transmission) cells: a through or line standard's
/// `Match` cell means "connected, ideal transmission" and evaluates to 1,
/// never to the bare 0 that `get_value` would return for it.
pub fn eval_s(
    eq: &Equation,
    standard: &Standard,
    registry: &ParameterRegistry,
    unsolved_params: &[ParamHandle],
    p: Option<&[C64]>,
    f: f64,
) -> crate::error::Result<C64> {
    let handle = standard.s[eq.local_row][eq.local_column];
    if eq.full_row != eq.full_column && handle == VNACAL_MATCH {
        return Ok(C64::new(1.0, 0.0));
    }
    if let Some(p) = p {
        if let Some(idx) = unsolved_params.iter().position(|&h| h == handle) {
            return Ok(p[idx]);
        }
    }
    registry.get_value(handle, f)
}

/// Fully evaluates one equation at the frequency index `freq_index`
/// (into the M vectors) / value `f` (into the S parameters), returning
/// the sparse row `(coefficient column, value)` pairs and the
/// right-hand side.
pub fn evaluate_row(
    eq: &Equation,
    standard: &Standard,
    registry: &ParameterRegistry,
    unsolved_params: &[ParamHandle],
    p: Option<&[C64]>,
    freq_index: usize,
    f: f64,
) -> crate::error::Result<(Vec<(usize, C64)>, C64)> {
    let m_value = standard.measured(eq.full_row, eq.full_column).expect("equation built from a measured cell")[freq_index];
    let s_value = eval_s(eq, standard, registry, unsolved_params, p, f)?;

    let mut rhs = m_value;
    let mut coeffs = Vec::with_capacity(eq.terms.len());
    for term in &eq.terms {
        let magnitude = match term.factor {
            Factor::One => C64::new(1.0, 0.0),
            Factor::S => s_value,
            Factor::M => m_value,
            Factor::Ms => m_value * s_value,
        };
        let signed = if term.negative { -magnitude } else { magnitude };
        match term.coeff {
            Some(col) => coeffs.push((col, signed)),
            None => rhs -= signed,
        }
    }
    Ok((coeffs, rhs))
}

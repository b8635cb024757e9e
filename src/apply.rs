//! The applicator.
//!
//! Given a solved calibration, a query frequency grid, and either a raw
//! measurement matrix `M` or a ratio pair `{A, B}` (`M = B * A^-1`),
//! recovers the DUT's S-parameters at each query frequency by inverting
//! the same error-term model the solver built equations from.
//!
//! The inversion is the algebraic mirror image of
//! [`crate::equation::raw_terms`]: that function describes the *forward*
//! identity `error-terms, S -> M`; this module solves each one for `S`
//! given `M` and the (now-known, interpolated) error terms. See
//! DESIGN.md for the per-type derivations.

use nalgebra::DMatrix;

use crate::calibration::Calibration;
use crate::complex::C64;
use crate::error::{MathError, Result, UsageError};
use crate::interp::SegmentHint;
use crate::layout::{CalType, Layout};
use crate::sink::NetworkParameterSink;

/// The measurement supplied for a single query frequency: either a direct
/// `M` matrix, or the `{A, B}` ratio pair the spec's §4.12 allows in
/// place of `M` (`M = B * A^-1`).
pub enum Measurement {
    Direct(DMatrix<C64>),
    Ratio { a: DMatrix<C64>, b: DMatrix<C64> },
}

impl Measurement {
    fn resolve(&self) -> Result<DMatrix<C64>> {
        match self {
            Measurement::Direct(m) => Ok(m.clone()),
            Measurement::Ratio { a, b } => {
                let a_inv = a.clone().try_inverse().ok_or(MathError::SingularSystem)?;
                Ok(b * a_inv)
            }
        }
    }
}

/// Applies `calibration` to one measurement per entry of `query_f`,
/// writing `f`, the recovered S-matrix, and the calibration's `z0` into
/// `sink`.
pub fn apply(calibration: &Calibration, query_f: &[f64], measurements: &[Measurement], sink: &mut dyn NetworkParameterSink) -> Result<()> {
    if query_f.len() != measurements.len() {
        return Err(UsageError::DimensionMismatch {
            context: "apply: query frequency vector and measurement list must be the same length",
            expected: (query_f.len(), query_f.len()),
            found: (query_f.len(), measurements.len()),
        }
        .into());
    }
    let ports = calibration.ports();
    sink.init(crate::sink::NetworkParameterType::S, ports, ports, query_f.len())?;
    sink.set_fz0_vector(&calibration.z0);

    let mut hint = SegmentHint::default();
    for (i, (&f, meas)) in query_f.iter().zip(measurements.iter()).enumerate() {
        calibration.check_frequency(f)?;
        let m = meas.resolve()?;
        if m.nrows() != ports || m.ncols() != ports {
            return Err(UsageError::DimensionMismatch { context: "apply: measurement matrix must be ports x ports", expected: (ports, ports), found: (m.nrows(), m.ncols()) }.into());
        }
        let terms: Vec<C64> = (0..calibration.error_terms.len()).map(|t| calibration.interpolate_term(t, f, &mut hint)).collect();
        let s = recover_s(calibration, &terms, &m)?;

        sink.set_frequency(i, f)?;
        for r in 0..ports {
            for c in 0..ports {
                sink.set_cell(i, r, c, s[(r, c)])?;
            }
        }
    }
    Ok(())
}

fn pair_index(row: usize, col: usize, ports: usize) -> usize {
    crate::solver::leakage::pair_index(row, col, ports)
}

/// Recovers the `ports x ports` S-matrix from a measurement matrix and
/// the calibration's interpolated error terms, dispatching on type.
fn recover_s(calibration: &Calibration, terms: &[C64], m: &DMatrix<C64>) -> Result<DMatrix<C64>> {
    let ports = calibration.ports();
    match calibration.cal_type {
        CalType::T8 | CalType::U8 | CalType::TE10 | CalType::UE10 | CalType::T16 | CalType::U16 => {
            recover_s_generic_form(calibration, ports, terms, m)
        }
        CalType::UE14 => recover_s_ue14(ports, terms, m),
        CalType::E12 => recover_s_e12(ports, terms, m),
    }
}

/// `T8`/`U8`/`TE10`/`UE10`/`T16`/`U16` share one inversion: the classical
/// rational one-port model `M = (Ti + Tm*S) / (1 - (-Ts)*S)` solved for
/// `S` at each diagonal cell, and a direct tracking ratio `S = M / Tx` (or
/// `(M - leak) / Tx` when the type separates leakage) off-diagonal.
/// `T16`/`U16` carry a duplicated (mirrored) copy of the same blocks; the
/// forward copy is authoritative (see DESIGN.md).
fn recover_s_generic_form(calibration: &Calibration, ports: usize, terms: &[C64], m: &DMatrix<C64>) -> Result<DMatrix<C64>> {
    let layout = Layout::new(calibration.cal_type, calibration.m_rows, calibration.m_columns)?;
    let b = &layout.sub_system;
    let ts = &terms[b.block_a.0..b.block_a.0 + b.block_a.1];
    let ti = &terms[b.block_b.0..b.block_b.0 + b.block_b.1];
    let tx = &terms[b.block_c.0..b.block_c.0 + b.block_c.1];
    let tm = &terms[b.block_d.0..b.block_d.0 + b.block_d.1];
    let leak_offset = layout.terms_per_subsystem();
    let has_leak = layout.leakage_terms > 0;

    let mut s = DMatrix::from_element(ports, ports, C64::new(0.0, 0.0));
    for p in 0..ports {
        let mv = m[(p, p)];
        let denom = tm[p] - ts[p] * mv;
        if denom.norm() < 1e-300 {
            return Err(MathError::SingularSystem.into());
        }
        s[(p, p)] = (mv - ti[p]) / denom;
    }
    for row in 0..ports {
        for col in 0..ports {
            if row == col {
                continue;
            }
            let idx = pair_index(row, col, ports);
            let mv = m[(row, col)];
            let eff = if has_leak { mv - terms[leak_offset + idx] } else { mv };
            let tx_v = tx[idx];
            if tx_v.norm() < 1e-300 {
                return Err(MathError::SingularSystem.into());
            }
            s[(row, col)] = eff / tx_v;
        }
    }
    Ok(s)
}

/// `UE14`: per-column inversion of `Um[r] + S*(Ui[r] - Ux[r]*M) = M*(1 +
/// Us)`, i.e. `S = (M*(1+Us) - Um[r]) / (Ui[r] - Ux[r]*M)`.
fn recover_s_ue14(ports: usize, terms: &[C64], m: &DMatrix<C64>) -> Result<DMatrix<C64>> {
    let per_col = 3 * ports + 1;
    let mut s = DMatrix::from_element(ports, ports, C64::new(0.0, 0.0));
    for col in 0..ports {
        let base = col * per_col;
        let um = &terms[base..base + ports];
        let ui = &terms[base + ports..base + 2 * ports];
        let ux = &terms[base + 2 * ports..base + 3 * ports];
        let us = terms[base + 3 * ports];
        for row in 0..ports {
            let mv = m[(row, col)];
            let denom = ui[row] - ux[row] * mv;
            if denom.norm() < 1e-300 {
                return Err(MathError::SingularSystem.into());
            }
            s[(row, col)] = (mv * (C64::new(1.0, 0.0) + us) - um[row]) / denom;
        }
    }
    Ok(s)
}

/// `E12`: per-column, `El`/`Er`/`Em` triples (the normalized
/// output, `Et == 1`): `S = (M - El[row]) / (Er[row] - Em[row]*M)`.
fn recover_s_e12(ports: usize, terms: &[C64], m: &DMatrix<C64>) -> Result<DMatrix<C64>> {
    let per_col = 3 * ports;
    let mut s = DMatrix::from_element(ports, ports, C64::new(0.0, 0.0));
    for col in 0..ports {
        let base = col * per_col;
        let el = &terms[base..base + ports];
        let er = &terms[base + ports..base + 2 * ports];
        let em = &terms[base + 2 * ports..base + 3 * ports];
        for row in 0..ports {
            let mv = m[(row, col)];
            let denom = er[row] - em[row] * mv;
            if denom.norm() < 1e-300 {
                return Err(MathError::SingularSystem.into());
            }
            s[(row, col)] = (mv - el[row]) / denom;
        }
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{NetworkParameterType, VectorSink};

    fn unit_cal(cal_type: CalType, terms: Vec<Vec<C64>>) -> Calibration {
        Calibration::new(cal_type, 2, 2, vec![1e9, 2e9], vec![C64::new(50.0, 0.0); 2], terms)
    }

    #[test]
    fn t8_identity_error_terms_pass_through_measurement() {
        // Ts=Tx=0 off the unity positions, Ti=0, Tm=1 everywhere: the
        // model degenerates to S == M.
        let zero = vec![C64::new(0.0, 0.0); 2];
        let one = vec![C64::new(1.0, 0.0); 2];
        let terms = vec![zero.clone(), zero.clone(), zero.clone(), zero.clone(), zero.clone(), zero.clone(), one.clone(), one];
        let cal = unit_cal(CalType::T8, terms);
        let mut sink = VectorSink::default();
        let m = DMatrix::from_row_slice(2, 2, &[C64::new(0.2, 0.1), C64::new(0.01, 0.0), C64::new(0.01, 0.0), C64::new(0.3, -0.1)]);
        apply(&cal, &[1e9], &[Measurement::Direct(m.clone())], &mut sink).unwrap();
        assert_eq!(sink.network_type, Some(NetworkParameterType::S));
        let recovered = &sink.frames[0];
        for r in 0..2 {
            for c in 0..2 {
                assert!((recovered[(r, c)] - m[(r, c)]).norm() < 1e-9);
            }
        }
    }

    #[test]
    fn out_of_envelope_query_is_rejected() {
        let zero = vec![C64::new(0.0, 0.0); 2];
        let one = vec![C64::new(1.0, 0.0); 2];
        let terms = vec![zero.clone(), zero.clone(), zero.clone(), zero.clone(), zero.clone(), zero.clone(), one.clone(), one];
        let cal = unit_cal(CalType::T8, terms);
        let mut sink = VectorSink::default();
        let m = DMatrix::from_element(2, 2, C64::new(0.0, 0.0));
        let err = apply(&cal, &[5e9], &[Measurement::Direct(m)], &mut sink).unwrap_err();
        assert!(matches!(err, crate::error::VnaCalError::Usage(UsageError::FrequencyOutOfRange { .. })));
    }
}

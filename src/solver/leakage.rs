//! Leakage aggregation.
//!
//! Off-diagonal cells that the equation builder skipped because no
//! standard's S-graph reaches them are isolation
//! measurements: with both ports terminated, whatever the detector sees
//! is leakage, not signal. Averaged across every standard that measured
//! the same cell, at each frequency.

use crate::complex::C64;
use crate::error::{MathError, Result};
use crate::standard::Standard;

/// Index of the `(row, column)` leakage cell within the flat leakage
/// vector, matching the Tx/Ux block's row-major, diagonal-skipping
/// numbering in [`crate::layout::Layout`] so the two stay interchangeable
/// when a cell's reachability status differs across standards.
pub fn pair_index(row: usize, column: usize, ports: usize) -> usize {
    let pairs = ports.saturating_sub(1);
    let local = if column > row { column - 1 } else { column };
    row * pairs + local
}

/// Aggregates every unreachable off-diagonal cell's measurements into a
/// per-frequency mean. Returns `leak[freq_index][pair_index]`.
pub fn aggregate(standards: &[Standard], m_rows: usize, m_columns: usize, nfreq: usize) -> Result<Vec<Vec<C64>>> {
    let ports = m_rows.max(m_columns);
    let n_pairs = ports * ports.saturating_sub(1);
    let mut sums = vec![vec![C64::new(0.0, 0.0); n_pairs]; nfreq];
    let mut counts = vec![0usize; n_pairs];

    for row in 0..m_rows {
        for col in 0..m_columns {
            if row == col {
                continue;
            }
            let idx = pair_index(row, col, ports);
            for standard in standards {
                if standard.full_reachable(row, col) {
                    continue; // handled by the main linear system instead.
                }
                if let Some(trace) = standard.measured(row, col) {
                    counts[idx] += 1;
                    for (f, &v) in trace.iter().enumerate() {
                        sums[f][idx] += v;
                    }
                }
            }
        }
    }

    for row in 0..m_rows {
        for col in 0..m_columns {
            if row == col {
                continue;
            }
            let idx = pair_index(row, col, ports);
            if counts[idx] == 0 {
                return Err(MathError::SingularLeakage { row, column: col }.into());
            }
        }
    }

    for f in 0..nfreq {
        for idx in 0..n_pairs {
            if counts[idx] > 0 {
                sums[f][idx] /= counts[idx] as f64;
            }
        }
    }
    Ok(sums)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{VNACAL_OPEN, VNACAL_ZERO};

    #[test]
    fn averages_multiple_standards_isolation_traces() {
        let s = vec![vec![VNACAL_OPEN, VNACAL_ZERO], vec![VNACAL_ZERO, VNACAL_OPEN]];
        let m1 = vec![
            vec![Some(vec![C64::new(0.9, 0.0)]), Some(vec![C64::new(0.02, 0.0)])],
            vec![Some(vec![C64::new(0.01, 0.0)]), Some(vec![C64::new(0.8, 0.0)])],
        ];
        let m2 = vec![
            vec![Some(vec![C64::new(0.9, 0.0)]), Some(vec![C64::new(0.04, 0.0)])],
            vec![Some(vec![C64::new(0.03, 0.0)]), Some(vec![C64::new(0.8, 0.0)])],
        ];
        let standards = vec![Standard::new(vec![0, 1], s.clone(), m1), Standard::new(vec![0, 1], s, m2)];
        let leak = aggregate(&standards, 2, 2, 1).unwrap();
        let idx01 = pair_index(0, 1, 2);
        assert!((leak[0][idx01] - C64::new(0.03, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn missing_leakage_measurement_is_an_error() {
        let s = vec![vec![VNACAL_OPEN, VNACAL_ZERO], vec![VNACAL_ZERO, VNACAL_OPEN]];
        let m = vec![vec![Some(vec![C64::new(0.9, 0.0)]), None], vec![None, Some(vec![C64::new(0.8, 0.0)])]];
        let standards = vec![Standard::new(vec![0, 1], s, m)];
        assert!(aggregate(&standards, 2, 2, 1).is_err());
    }
}

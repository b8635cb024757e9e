//! Linear algebra kernels over the complex field.
//!
//! Orbit propagators typically lean on `nalgebra`'s compile-time
//! `DimName`/`Allocator` generics because a state dimension is
//! fixed at compile time. A VNA calibration's dimension is the port
//! count, known only at runtime, so these kernels use `nalgebra`'s
//! dynamically-sized `DMatrix`/`DVector` instead, scalars over
//! `num_complex::Complex64` (re-exported as [`crate::complex::C64`]).

use nalgebra::{DMatrix, DVector};

use crate::complex::C64;
use crate::error::{MathError, Result};

/// Solves `A X = B` for `X`ish, analogous to MATLAB's `A \ B`: an exact
/// LU solve when `A` is square, a least-squares QR solve when `A` is
/// overdetermined (more rows than columns). Used directly by the
/// analytic solver on each sub-system's assembled system.
pub fn mldivide(a: &DMatrix<C64>, b: &DMatrix<C64>) -> Result<DMatrix<C64>> {
    if a.nrows() < a.ncols() {
        return Err(MathError::Underdetermined { sub_system: 0, equations: a.nrows(), unknowns: a.ncols() }.into());
    }
    if a.nrows() == a.ncols() {
        let lu = a.clone().lu();
        lu.solve(b).ok_or_else(|| MathError::SingularSystem.into())
    } else {
        qrsolve2(a, b)
    }
}

/// Thin-QR factorization of `a` (`m >= n`): returns `(Q, R)` with `Q`
/// `m x n` having orthonormal columns and `R` `n x n` upper triangular,
/// such that `Q * R == A`.
pub fn qr(a: &DMatrix<C64>) -> Result<(DMatrix<C64>, DMatrix<C64>)> {
    if a.nrows() < a.ncols() {
        return Err(MathError::Underdetermined { sub_system: 0, equations: a.nrows(), unknowns: a.ncols() }.into());
    }
    let decomp = a.clone().qr();
    let q = decomp.q();
    let r = decomp.r();
    Ok((q, r))
}

/// Least-squares solve of `A x = b` for a single right-hand side via QR.
pub fn qrsolve(a: &DMatrix<C64>, b: &DVector<C64>) -> Result<DVector<C64>> {
    let mat = qrsolve2(a, &DMatrix::from_column_slice(b.len(), 1, b.as_slice()))?;
    Ok(DVector::from_column_slice(mat.column(0).as_slice()))
}

/// Least-squares solve of `A X = B` for multiple right-hand side columns,
/// reusing a single QR factorization of `A`. This is the form the
/// Gauss-Newton step and the analytic solver actually want:
/// one factorization of the (possibly shared) design matrix, applied to
/// several right-hand sides (e.g. one per frequency).
pub fn qrsolve2(a: &DMatrix<C64>, b: &DMatrix<C64>) -> Result<DMatrix<C64>> {
    if a.nrows() != b.nrows() {
        return Err(MathError::SingularSystem.into());
    }
    if a.nrows() < a.ncols() {
        return Err(MathError::Underdetermined { sub_system: 0, equations: a.nrows(), unknowns: a.ncols() }.into());
    }
    let decomp = a.clone().qr();
    decomp.solve(b).ok_or_else(|| MathError::SingularSystem.into())
}

/// Builds a dense `DMatrix<C64>` from a sparse row list, as produced by
/// [`crate::equation::evaluate_row`]: one `Vec<(column, value)>` per row.
pub fn assemble_dense(rows: &[Vec<(usize, C64)>], ncols: usize) -> DMatrix<C64> {
    let mut a = DMatrix::from_element(rows.len(), ncols, C64::new(0.0, 0.0));
    for (r, row) in rows.iter().enumerate() {
        for &(c, v) in row {
            a[(r, c)] += v;
        }
    }
    a
}

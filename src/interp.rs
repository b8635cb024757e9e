//! Rational-function interpolation between frequency samples.
//!
//! Given ascending `x` samples and complex `y` samples, evaluate a
//! piecewise Bulirsch-Stoer rational interpolant at an arbitrary query
//! point. This is the frequency-domain workhorse used to evaluate vector,
//! unknown and correlated parameters at a query frequency, and to
//! interpolate solved error terms during application.

use crate::complex::C64;

/// Amortizes repeated ascending queries against the same sample set: the
/// segment start found by the previous call is reused as the initial
/// guess for the next one, so a caller sweeping a frequency grid in order
/// pays O(1) per query instead of O(log n).
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentHint(pub usize);

/// Locates the starting index of the `m`-point window closest to `xq`.
///
/// `x` must be strictly ascending and non-empty. The returned index `s`
/// satisfies `s + m <= x.len()` (clamped at the ends), and `hint` is
/// updated so a subsequent ascending query starts its search nearby.
fn locate_segment(x: &[f64], m: usize, hint: &mut SegmentHint, xq: f64) -> usize {
    let n = x.len();
    let m = m.min(n);
    if n <= m {
        return 0;
    }

    // Start the search near the previous segment: walk forward or
    // backward until xq is bracketed by the window, then re-center.
    let mut lo = hint.0.min(n - m);
    // Walk forward while the window's right edge is still below xq.
    while lo + m < n && xq > x[lo + m / 2] {
        lo += 1;
    }
    // Walk backward while the window's left edge is still above xq.
    while lo > 0 && xq < x[lo + m / 2 - 1] {
        lo -= 1;
    }
    hint.0 = lo;
    lo
}

/// Evaluates the Bulirsch-Stoer diagonal rational interpolant of order
/// `m-1` through `(xs[i], ys[i])` at `xq`.
///
/// This is the classical tableau recurrence (Numerical Recipes §3.2): at
/// each stage a pole is perturbed by a vanishingly small epsilon so that
/// an exact-fit coincidence doesn't produce a division by zero.
fn rational_interp_tableau(xs: &[f64], ys: &[C64], xq: f64) -> C64 {
    let n = xs.len();
    debug_assert!(n > 0);
    if n == 1 {
        return ys[0];
    }

    const TINY: f64 = 1.0e-300;
    let mut c = ys.to_vec();
    let mut d = ys.to_vec();

    // ns = index of the closest sample, used as the starting point for
    // the tableau walk.
    let mut ns = 0usize;
    let mut best = (xq - xs[0]).abs();
    for i in 1..n {
        let dist = (xq - xs[i]).abs();
        if dist < best {
            best = dist;
            ns = i;
        }
    }

    let mut y = ys[ns];
    if ns > 0 {
        ns -= 1;
    }

    for m in 1..n {
        for i in 0..(n - m) {
            let w = c[i + 1] - d[i];
            let h = xs[i + m] - xq;
            let t = (xs[i] - xq) / h * d[i];
            let denom = t - c[i + 1];
            let denom = if denom == C64::new(0.0, 0.0) {
                C64::new(TINY, 0.0)
            } else {
                denom
            };
            let dd = w / denom;
            d[i] = c[i + 1] * dd;
            c[i] = t * dd;
        }
        let correction = if 2 * (ns + 1) < (n - m) { c[ns + 1] } else { d[ns] };
        y += correction;
        if 2 * (ns + 1) >= (n - m) && ns > 0 {
            ns -= 1;
        }
    }
    y
}

/// Evaluates the interpolant at `xq` given `m`-point windowing.
///
/// Preconditions: `x.len() == y.len()`, `x` strictly ascending, `x.len()
/// >= 1`, `m` odd. At `n == 1` returns `y[0]` directly; at `n <= m` the
/// whole sample set is used as a single window.
pub fn rational_interp(x: &[f64], y: &[C64], m: usize, hint: &mut SegmentHint, xq: f64) -> C64 {
    assert_eq!(x.len(), y.len(), "rational_interp: x and y must be the same length");
    assert!(!x.is_empty(), "rational_interp: empty sample set");

    if x.len() == 1 {
        return y[0];
    }

    let window = m.max(1).min(x.len());
    let start = locate_segment(x, window, hint, xq);
    let end = (start + window).min(x.len());
    rational_interp_tableau(&x[start..end], &y[start..end], xq)
}

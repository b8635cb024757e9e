//! UE14 -> E12 conversion.
//!
//! `E12` is never solved directly: it is produced by converting a solved
//! `UE14` result, column by column, into the classical twelve-term shape
//! (`El`/`Er`/`Em` per port). The UE14 forward identity for row `r` of
//! column `col` is `M*(1+Us) = Um[r] + S*Ui[r] - M*S*Ux[r]`; dividing
//! through by `(1+Us)` turns it into the normalized E12 shape `M = El[r]
//! + S*Er[r] - M*S*Em[r]` with `El[r] = Um[r]/(1+Us)`, `Er[r] =
//! Ui[r]/(1+Us)`, `Em[r] = Ux[r]/(1+Us)`. At the self column (`r ==
//! col`), `Um[col]` is the unity-substituted term (`1.0`), so `El[col] =
//! 1/(1+Us)`. Off-diagonal rows never solve `Um[r]` directly when no
//! standard's S-graph reaches that pair; there, the leakage aggregate
//! already *is* `Um[r]/(1+Us)` (it is exactly the isolation measurement
//! the forward identity predicts at `S = 0`), so it is used as `El[r]`
//! unchanged.

use crate::complex::C64;
use crate::layout::Layout;

/// One column's worth of solved UE14 terms, in `[Um(ports), Ui(ports),
/// Ux(ports), Us(1)]` layout order with the unity term re-inserted as a
/// literal 1.0 at its substituted position.
pub struct UE14Column<'a> {
    pub um: &'a [C64],
    pub ui: &'a [C64],
    pub ux: &'a [C64],
    pub us: C64,
}

/// One column's worth of E12 terms: `El`, `Er`, `Em`, each `ports` long.
pub struct E12Column {
    pub el: Vec<C64>,
    pub er: Vec<C64>,
    pub em: Vec<C64>,
}

pub fn convert_column(layout: &Layout, col: usize, ue14: &UE14Column, leak: &[C64], ports: usize) -> E12Column {
    let _ = layout;
    let inv = C64::new(1.0, 0.0) / (C64::new(1.0, 0.0) + ue14.us);
    let mut el = vec![C64::new(0.0, 0.0); ports];
    let mut er = vec![C64::new(0.0, 0.0); ports];
    let mut em = vec![C64::new(0.0, 0.0); ports];
    for r in 0..ports {
        el[r] = if r == col {
            ue14.um[r] * inv
        } else {
            let idx = crate::solver::leakage::pair_index(r, col, ports);
            leak.get(idx).copied().unwrap_or(C64::new(0.0, 0.0))
        };
        er[r] = ue14.ui[r] * inv;
        em[r] = ue14.ux[r] * inv;
    }
    E12Column { el, er, em }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::CalType;

    #[test]
    fn self_column_directivity_is_unity_term_over_one_plus_us() {
        let layout = Layout::new(CalType::UE14, 2, 2).unwrap();
        let ue14 = UE14Column { um: &[C64::new(1.0, 0.0), C64::new(0.3, 0.0)], ui: &[C64::new(0.9, 0.0), C64::new(0.95, 0.0)], ux: &[C64::new(0.8, 0.0), C64::new(0.85, 0.0)], us: C64::new(0.05, 0.01) };
        let inv = C64::new(1.0, 0.0) / (C64::new(1.0, 0.0) + ue14.us);
        let leak = vec![C64::new(0.0, 0.0); 2];
        let e12 = convert_column(&layout, 0, &ue14, &leak, 2);
        assert_eq!(e12.el[0], ue14.um[0] * inv);
        assert_eq!(e12.er[0], ue14.ui[0] * inv);
        assert_eq!(e12.em[0], ue14.ux[0] * inv);
    }

    #[test]
    fn off_diagonal_directivity_comes_from_leakage_unscaled() {
        let layout = Layout::new(CalType::UE14, 2, 2).unwrap();
        let ue14 = UE14Column { um: &[C64::new(1.0, 0.0), C64::new(0.3, 0.0)], ui: &[C64::new(0.9, 0.0), C64::new(0.95, 0.0)], ux: &[C64::new(0.8, 0.0), C64::new(0.85, 0.0)], us: C64::new(0.05, 0.01) };
        let inv = C64::new(1.0, 0.0) / (C64::new(1.0, 0.0) + ue14.us);
        let leak = vec![C64::new(0.02, -0.01)];
        let e12 = convert_column(&layout, 1, &ue14, &leak, 2);
        assert_eq!(e12.el[0], C64::new(0.02, -0.01));
        assert_eq!(e12.er[0], ue14.ui[0] * inv);
        assert_eq!(e12.em[0], ue14.ux[0] * inv);
    }

    #[test]
    fn converted_terms_invert_to_the_same_s_as_the_raw_ue14_model() {
        // Self-column row: apply the UE14 forward model to build M, then
        // check the converted E12 terms invert it back to the same S.
        let layout = Layout::new(CalType::UE14, 2, 2).unwrap();
        let um = [C64::new(1.0, 0.0), C64::new(0.12, -0.03)];
        let ui = [C64::new(0.91, 0.02), C64::new(0.6, 0.1)];
        let ux = [C64::new(0.78, -0.05), C64::new(0.4, 0.2)];
        let us = C64::new(0.04, 0.02);
        let ue14 = UE14Column { um: &um, ui: &ui, ux: &ux, us };
        let leak = vec![C64::new(0.0, 0.0); 2];
        let e12 = convert_column(&layout, 0, &ue14, &leak, 2);

        let s_true = C64::new(0.31, -0.22);
        let one = C64::new(1.0, 0.0);
        let m = (um[0] + s_true * ui[0]) / (one + us + s_true * ux[0]);
        let recovered = (m - e12.el[0]) / (e12.er[0] - e12.em[0] * m);
        assert!((recovered - s_true).norm() < 1e-10);
    }
}

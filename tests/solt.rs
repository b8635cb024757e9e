//! End-to-end SOLT-style (short/open/load/thru) round trip for the `T8`
//! error-term family: synthesize measurements from known "true" error
//! terms and standards, solve, then apply the solved calibration to a
//! synthetic DUT measurement and check the recovered S-parameters match
//! the DUT's true values.

use vnacal::apply::Measurement;
use vnacal::parameter::{ParameterRegistry, VNACAL_MATCH, VNACAL_OPEN, VNACAL_SHORT};
use vnacal::sink::VectorSink;
use vnacal::{apply_calibration, CalType, NewCal, C64};

const FREQ: [f64; 2] = [1.0e9, 2.0e9];

fn diag_forward(ts: C64, ti: C64, tm: C64, s: C64) -> C64 {
    (ti + s * tm) / (C64::new(1.0, 0.0) + s * ts)
}

fn rep(v: C64) -> Vec<C64> {
    vec![v; FREQ.len()]
}

#[test]
fn t8_two_port_recovers_a_known_dut() {
    // Tm[0] is the type's unity-substituted term; its true value must be
    // 1.0 for the synthetic data to be consistent with what the solver
    // will produce.
    let ts = [C64::new(0.05, -0.02), C64::new(0.03, 0.01)];
    let ti = [C64::new(0.02, 0.01), C64::new(0.015, -0.01)];
    let tm = [C64::new(1.0, 0.0), C64::new(0.9, 0.02)];
    let tx01 = C64::new(0.85, 0.05);
    let tx10 = C64::new(0.88, -0.03);

    let open = C64::new(1.0, 0.0);
    let short = C64::new(-1.0, 0.0);
    let zero = C64::new(0.0, 0.0);

    let mut cal = NewCal::new(CalType::T8, 2, 2).unwrap();
    cal.set_frequency_vector(FREQ.to_vec()).unwrap();

    // Port 0: two reflects fully determine Ts0/Ti0 (Tm0 is fixed unity).
    cal.add_single_reflect(0, VNACAL_OPEN, rep(diag_forward(ts[0], ti[0], tm[0], open))).unwrap();
    cal.add_single_reflect(0, VNACAL_SHORT, rep(diag_forward(ts[0], ti[0], tm[0], short))).unwrap();

    // Port 1: three reflects determine Ts1/Ti1/Tm1.
    cal.add_single_reflect(1, VNACAL_OPEN, rep(diag_forward(ts[1], ti[1], tm[1], open))).unwrap();
    cal.add_single_reflect(1, VNACAL_SHORT, rep(diag_forward(ts[1], ti[1], tm[1], short))).unwrap();
    cal.add_single_reflect(1, VNACAL_MATCH, rep(diag_forward(ts[1], ti[1], tm[1], zero))).unwrap();

    // Through: matched at both ports (S=0 diag, S=1 transmission).
    let m11 = rep(diag_forward(ts[0], ti[0], tm[0], zero));
    let m22 = rep(diag_forward(ts[1], ti[1], tm[1], zero));
    let m12 = rep(tx01); // Tx * 1
    let m21 = rep(tx10);
    cal.add_through(0, 1, m11, m12, m21, m22).unwrap();

    let mut registry = ParameterRegistry::new();
    let calibration = cal.solve(&mut registry).unwrap();

    // A synthetic DUT with arbitrary (non-reciprocal) S-parameters.
    let s_dut = [
        [C64::new(0.2, 0.05), C64::new(0.05, -0.02)],
        [C64::new(0.03, 0.01), C64::new(0.25, -0.1)],
    ];
    let m00 = diag_forward(ts[0], ti[0], tm[0], s_dut[0][0]);
    let m11_dut = diag_forward(ts[1], ti[1], tm[1], s_dut[1][1]);
    let m01 = tx01 * s_dut[0][1];
    let m10 = tx10 * s_dut[1][0];

    let m = nalgebra::DMatrix::from_row_slice(2, 2, &[m00, m01, m10, m11_dut]);
    let mut sink = VectorSink::default();
    apply_calibration(&calibration, &[FREQ[0]], &[Measurement::Direct(m)], &mut sink).unwrap();

    let recovered = &sink.frames[0];
    for r in 0..2 {
        for c in 0..2 {
            assert!((recovered[(r, c)] - s_dut[r][c]).norm() < 1e-8, "cell ({},{}) got {:?} want {:?}", r, c, recovered[(r, c)], s_dut[r][c]);
        }
    }
}

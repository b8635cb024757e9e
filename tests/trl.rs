//! TRL-style round trip: a line standard's propagation term is an
//! *unknown* parameter (seeded with an approximate guess, solved by the
//! iterative Gauss-Newton path, C8) rather than a known standard value.

use vnacal::apply::Measurement;
use vnacal::parameter::{ParameterRegistry, VNACAL_MATCH, VNACAL_OPEN, VNACAL_SHORT};
use vnacal::sink::VectorSink;
use vnacal::{apply_calibration, CalType, NewCal, C64};

const FREQ: [f64; 1] = [1.5e9];

fn diag_forward(ts: C64, ti: C64, tm: C64, s: C64) -> C64 {
    (ti + s * tm) / (C64::new(1.0, 0.0) + s * ts)
}

fn rep(v: C64) -> Vec<C64> {
    vec![v; FREQ.len()]
}

#[test]
fn t8_solves_an_unknown_line_standard() {
    let ts = [C64::new(0.04, -0.01), C64::new(0.02, 0.02)];
    let ti = [C64::new(0.015, 0.0), C64::new(0.01, -0.005)];
    let tm = [C64::new(1.0, 0.0), C64::new(0.92, 0.01)];
    let tx01 = C64::new(0.87, 0.02);
    let tx10 = C64::new(0.84, -0.01);
    let true_gamma = C64::new(0.75, 0.08);

    let open = C64::new(1.0, 0.0);
    let short = C64::new(-1.0, 0.0);
    let zero = C64::new(0.0, 0.0);

    let mut cal = NewCal::new(CalType::T8, 2, 2).unwrap();
    cal.set_frequency_vector(FREQ.to_vec()).unwrap();

    cal.add_single_reflect(0, VNACAL_OPEN, rep(diag_forward(ts[0], ti[0], tm[0], open))).unwrap();
    cal.add_single_reflect(0, VNACAL_SHORT, rep(diag_forward(ts[0], ti[0], tm[0], short))).unwrap();
    cal.add_single_reflect(1, VNACAL_OPEN, rep(diag_forward(ts[1], ti[1], tm[1], open))).unwrap();
    cal.add_single_reflect(1, VNACAL_SHORT, rep(diag_forward(ts[1], ti[1], tm[1], short))).unwrap();
    cal.add_single_reflect(1, VNACAL_MATCH, rep(diag_forward(ts[1], ti[1], tm[1], zero))).unwrap();

    // A known through, to pin down Tx0/Tx1 independently of the line.
    let through_m11 = rep(diag_forward(ts[0], ti[0], tm[0], zero));
    let through_m22 = rep(diag_forward(ts[1], ti[1], tm[1], zero));
    cal.add_through(0, 1, through_m11, rep(tx01), rep(tx10), through_m22).unwrap();

    let mut registry = ParameterRegistry::new();
    // Seeded ~15% off the true value; the Gauss-Newton path must correct it.
    let seed = registry.make_scalar(C64::new(0.65, 0.1));
    let gamma = registry.make_unknown(seed).unwrap();

    let line_m11 = rep(diag_forward(ts[0], ti[0], tm[0], zero));
    let line_m22 = rep(diag_forward(ts[1], ti[1], tm[1], zero));
    let line_m12 = rep(tx01 * true_gamma);
    let line_m21 = rep(tx10 * true_gamma);
    cal.add_line(0, 1, gamma, line_m11, line_m12, line_m21, line_m22).unwrap();

    let calibration = cal.solve(&mut registry).unwrap();

    assert!((registry.get_value(gamma, FREQ[0]).unwrap() - true_gamma).norm() < 1e-6, "solved line parameter should converge to its true value");

    let s_dut = [[C64::new(0.1, 0.02), C64::new(0.4, 0.1)], [C64::new(0.35, -0.08), C64::new(0.15, 0.03)]];
    let m00 = diag_forward(ts[0], ti[0], tm[0], s_dut[0][0]);
    let m11_dut = diag_forward(ts[1], ti[1], tm[1], s_dut[1][1]);
    let m01 = tx01 * s_dut[0][1];
    let m10 = tx10 * s_dut[1][0];
    let m = nalgebra::DMatrix::from_row_slice(2, 2, &[m00, m01, m10, m11_dut]);

    let mut sink = VectorSink::default();
    apply_calibration(&calibration, &FREQ, &[Measurement::Direct(m)], &mut sink).unwrap();
    let recovered = &sink.frames[0];
    for r in 0..2 {
        for c in 0..2 {
            assert!((recovered[(r, c)] - s_dut[r][c]).norm() < 1e-5, "cell ({},{}) got {:?} want {:?}", r, c, recovered[(r, c)], s_dut[r][c]);
        }
    }
}

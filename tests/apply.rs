//! Integration-level exercise of the applicator's public surface:
//! the `Ratio` measurement form, and its error paths (singular ratio
//! denominator, mismatched query/measurement lengths, wrong-shaped
//! direct matrix).

use vnacal::apply::Measurement;
use vnacal::calibration::Calibration;
use vnacal::error::{MathError, UsageError, VnaCalError};
use vnacal::sink::VectorSink;
use vnacal::{apply_calibration, CalType, C64};

fn identity_t8() -> Calibration {
    // Ts=Tx_offdiag=0, Ti=0, Tm=1: the model degenerates to S == M.
    let zero = vec![C64::new(0.0, 0.0); 2];
    let one = vec![C64::new(1.0, 0.0); 2];
    let terms = vec![zero.clone(), zero.clone(), zero.clone(), zero.clone(), zero.clone(), zero.clone(), one.clone(), one];
    Calibration::new(CalType::T8, 2, 2, vec![1.0e9, 2.0e9], vec![C64::new(50.0, 0.0); 2], terms)
}

#[test]
fn ratio_measurement_resolves_to_the_same_s_as_the_equivalent_direct_matrix() {
    let cal = identity_t8();
    let m = nalgebra::DMatrix::from_row_slice(2, 2, &[C64::new(0.2, 0.05), C64::new(0.02, 0.0), C64::new(0.03, -0.01), C64::new(0.15, 0.1)]);

    let mut direct_sink = VectorSink::default();
    apply_calibration(&cal, &[1.0e9], &[Measurement::Direct(m.clone())], &mut direct_sink).unwrap();

    // Scale both A and B by the same nonsingular matrix: B*A^-1 is
    // unchanged, so the ratio form must recover the identical S.
    let a = nalgebra::DMatrix::from_row_slice(2, 2, &[C64::new(1.5, 0.1), C64::new(0.1, 0.0), C64::new(-0.05, 0.02), C64::new(0.9, -0.1)]);
    let b = &m * &a;
    let mut ratio_sink = VectorSink::default();
    apply_calibration(&cal, &[1.0e9], &[Measurement::Ratio { a, b }], &mut ratio_sink).unwrap();

    for r in 0..2 {
        for c in 0..2 {
            assert!((direct_sink.frames[0][(r, c)] - ratio_sink.frames[0][(r, c)]).norm() < 1e-9);
        }
    }
}

#[test]
fn singular_ratio_denominator_is_a_math_error() {
    let cal = identity_t8();
    let a = nalgebra::DMatrix::from_element(2, 2, C64::new(0.0, 0.0));
    let b = nalgebra::DMatrix::from_element(2, 2, C64::new(1.0, 0.0));
    let err = apply_calibration(&cal, &[1.0e9], &[Measurement::Ratio { a, b }], &mut VectorSink::default()).unwrap_err();
    assert!(matches!(err, VnaCalError::Math(MathError::SingularSystem)));
}

#[test]
fn mismatched_query_and_measurement_lengths_are_rejected() {
    let cal = identity_t8();
    let m = nalgebra::DMatrix::from_element(2, 2, C64::new(0.1, 0.0));
    let err = apply_calibration(&cal, &[1.0e9, 1.5e9], &[Measurement::Direct(m)], &mut VectorSink::default()).unwrap_err();
    assert!(matches!(err, VnaCalError::Usage(UsageError::DimensionMismatch { .. })));
}

#[test]
fn wrong_shaped_direct_matrix_is_rejected() {
    let cal = identity_t8();
    let m = nalgebra::DMatrix::from_element(3, 3, C64::new(0.1, 0.0));
    let err = apply_calibration(&cal, &[1.0e9], &[Measurement::Direct(m)], &mut VectorSink::default()).unwrap_err();
    assert!(matches!(err, VnaCalError::Usage(UsageError::DimensionMismatch { .. })));
}

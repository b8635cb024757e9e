//! Exercises the parameter registry: predefined handles, hold/release
//! lifetime discipline, unknown/correlated evaluation, and slot reuse.

use vnacal::error::{UsageError, VnaCalError};
use vnacal::parameter::{ParameterRegistry, Sigma, VNACAL_MATCH, VNACAL_OPEN, VNACAL_SHORT, VNACAL_ZERO};
use vnacal::C64;

#[test]
fn predefined_handles_evaluate_to_their_fixed_values() {
    let reg = ParameterRegistry::new();
    assert_eq!(reg.get_value(VNACAL_ZERO, 1e9).unwrap(), C64::new(0.0, 0.0));
    assert_eq!(reg.get_value(VNACAL_MATCH, 1e9).unwrap(), C64::new(0.0, 0.0));
    assert_eq!(reg.get_value(VNACAL_OPEN, 1e9).unwrap(), C64::new(1.0, 0.0));
    assert_eq!(reg.get_value(VNACAL_SHORT, 1e9).unwrap(), C64::new(-1.0, 0.0));
}

#[test]
fn invalid_handle_is_a_usage_error() {
    let reg = ParameterRegistry::new();
    let err = reg.get_value(9999, 1e9).unwrap_err();
    assert!(matches!(err, VnaCalError::Usage(UsageError::InvalidParameter(9999))));
}

#[test]
fn hold_defers_delete_until_release() {
    let mut reg = ParameterRegistry::new();
    let h = reg.make_scalar(C64::new(0.9, 0.0));
    reg.hold(h).unwrap();
    reg.delete(h).unwrap();
    // Still usable: the hold is outstanding.
    assert!(reg.get_value(h, 1e9).is_ok());
    reg.release(h).unwrap();
    assert!(reg.get_value(h, 1e9).is_err());
}

#[test]
fn unknown_parameter_reads_as_its_initial_guess_before_solving() {
    let mut reg = ParameterRegistry::new();
    let seed = reg.make_scalar(C64::new(0.5, 0.1));
    let unknown = reg.make_unknown(seed).unwrap();
    assert!(reg.is_unsolved_unknown(unknown));
    assert_eq!(reg.get_value(unknown, 1e9).unwrap(), C64::new(0.5, 0.1));
}

#[test]
fn correlated_parameter_reports_its_reference_and_sigma() {
    let mut reg = ParameterRegistry::new();
    let base = reg.make_scalar(C64::new(0.8, 0.0));
    let corr = reg.make_correlated(base, Sigma::Scalar(0.02)).unwrap();
    assert!(reg.is_correlated(corr));
    let (other, sigma) = reg.correlation(corr, 1e9).unwrap();
    assert_eq!(other, base);
    assert!((sigma - 0.02).abs() < 1e-12);
}

#[test]
fn deleted_slots_are_reused_by_the_free_list() {
    let mut reg = ParameterRegistry::new();
    let a = reg.make_scalar(C64::new(0.1, 0.0));
    reg.delete(a).unwrap();
    let b = reg.make_scalar(C64::new(0.2, 0.0));
    assert_eq!(a, b);
}

#[test]
fn vector_parameter_out_of_envelope_is_rejected() {
    let mut reg = ParameterRegistry::new();
    let v = reg.make_vector(vec![1e9, 2e9, 3e9], vec![C64::new(0.1, 0.0); 3]).unwrap();
    assert!(reg.get_value(v, 2e9).is_ok());
    assert!(reg.get_value(v, 10e9).is_err());
}

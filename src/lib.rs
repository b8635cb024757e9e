//! A vector network analyzer calibration engine.
//!
//! `vnacal` solves systematic error terms (directivity, source/load match,
//! reflection and transmission tracking, isolation/leakage) from a set of
//! measured calibration standards, then applies the solved calibration to
//! recover a device under test's true S-parameters from raw measurements.
//!
//! The top-level flow:
//!
//! 1. Describe parameters — known, partially-known ("correlated"), or
//!    fully unknown — in a [`parameter::ParameterRegistry`].
//! 2. Build up an [`accumulator::NewCal`] for the calibration type and
//!    port count you're solving, adding standards (`add_through`,
//!    `add_single_reflect`, ...) and their measured traces.
//! 3. Call [`accumulator::NewCal::solve`] to produce a [`calibration::Calibration`],
//!    and store it in a [`calibration::CalibrationStore`] if you want to
//!    keep it around by name.
//! 4. Call [`apply::apply`] with a DUT's measured matrix (or raw ratio
//!    pair) and a [`sink::NetworkParameterSink`] to recover corrected
//!    S-parameters.
//!
//! See each module for the step of the pipeline it implements; [`Vnacal`] below
//! bundles the registry and calibration store into one handle for callers
//! who don't want to own the two pieces separately.

pub mod accumulator;
pub mod apply;
pub mod calibration;
pub mod complex;
pub mod equation;
pub mod error;
pub mod interp;
pub mod layout;
pub mod linalg;
pub mod param_matrix;
pub mod parameter;
pub mod sink;
pub mod solver;
pub mod standard;

pub use accumulator::{MeasurementNoiseModel, NewCal, SolverConfig};
pub use apply::{apply as apply_calibration, Measurement};
pub use calibration::{Calibration, CalibrationStore};
pub use complex::C64;
pub use error::{MathError, Result, UsageError, VnaCalError};
pub use layout::CalType;
pub use parameter::{ParamHandle, ParameterRegistry, Sigma};
pub use sink::{NetworkParameterSink, NetworkParameterType, VectorSink};

/// Callback invoked with a human-readable diagnostic whenever the engine
/// wants to surface something short of an error (e.g. a near-singular but
/// still-solvable sub-system): an optional `Box<dyn FnMut>` hook on
/// long-lived session objects rather than a fixed logging sink, so an
/// embedding application can route diagnostics to its own UI instead of
/// only a log file.
pub type ErrorCallback = Box<dyn FnMut(&str)>;

/// A convenience handle bundling the parameter registry and calibration
/// store a typical caller needs together, plus an optional diagnostic
/// callback (a convenience "library instance" grouping). Using the
/// individual types directly ([`ParameterRegistry`], [`CalibrationStore`])
/// is equally supported; `Vnacal` exists for callers who'd rather not wire
/// the two together themselves.
#[derive(Default)]
pub struct Vnacal {
    pub registry: ParameterRegistry,
    pub calibrations: CalibrationStore,
    on_diagnostic: Option<ErrorCallback>,
}

impl Vnacal {
    pub fn new() -> Self {
        Vnacal { registry: ParameterRegistry::new(), calibrations: CalibrationStore::new(), on_diagnostic: None }
    }

    /// Installs a callback invoked with diagnostic text produced by
    /// [`Self::solve_and_store`]. Replaces any previously installed
    /// callback.
    pub fn set_diagnostic_callback(&mut self, callback: ErrorCallback) {
        self.on_diagnostic = Some(callback);
    }

    fn emit(&mut self, message: &str) {
        if let Some(cb) = self.on_diagnostic.as_mut() {
            cb(message);
        }
    }

    /// Runs `cal.solve`, stores the result under `name`, and returns its
    /// index, routing a one-line summary through the diagnostic callback
    /// (if any) on success.
    pub fn solve_and_store(&mut self, name: &str, cal: &NewCal) -> Result<usize> {
        let calibration = cal.solve(&mut self.registry)?;
        let terms = calibration.error_terms.len();
        let index = self.calibrations.add(name, calibration);
        self.emit(&format!("vnacal: stored calibration '{}' ({} error terms)", name, terms));
        Ok(index)
    }
}

//! The measurement accumulator (`NewCal`).
//!
//! Collects a frequency grid, reference impedances, and the standards
//! measured against a given [`CalType`]/port-count shape, then hands the
//! whole thing to the solver. Mirrors the way a filter's
//! `KF::new`/`KF::with_sncs` constructors build up a filter from named,
//! validated pieces before `time_update`/`measurement_update` ever run.

use log::info;

use crate::calibration::Calibration;
use crate::complex::C64;
use crate::equation;
use crate::error::{MathError, Result, UsageError};
use crate::interp::{rational_interp, SegmentHint};
use crate::layout::{CalType, Layout};
use crate::param_matrix;
use crate::parameter::{ParamHandle, ParameterRegistry, VNACAL_MATCH, VNACAL_ZERO};
use crate::solver;
use crate::standard::Standard;

/// Per-frequency measurement-error model (`set_m_error`):
/// the standard deviation of a measured trace point is modelled as
/// `noise(f) + tracking(f) * |m|`, the classic VNA "noise floor plus
/// signal-proportional tracking error" decomposition. Both components are
/// frequency-vectors interpolated the same way a vector [`crate::parameter::Sigma`]
/// is, since they ride on the same calibration frequency grid.
#[derive(Debug, Clone)]
pub struct MeasurementNoiseModel {
    frequency: Vec<f64>,
    noise: Vec<f64>,
    tracking: Vec<f64>,
}

impl MeasurementNoiseModel {
    pub fn new(frequency: Vec<f64>, noise: Vec<f64>, tracking: Vec<f64>) -> Result<Self> {
        if noise.len() != frequency.len() || tracking.len() != frequency.len() {
            return Err(UsageError::DimensionMismatch {
                context: "MeasurementNoiseModel::new: noise/tracking must match the frequency grid",
                expected: (frequency.len(), frequency.len()),
                found: (noise.len(), tracking.len()),
            }
            .into());
        }
        Ok(MeasurementNoiseModel { frequency, noise, tracking })
    }

    /// Interpolates `(noise(f), tracking(f))` using the same rational
    /// interpolant as any other frequency vector in the registry.
    pub fn at(&self, f: f64, hint: &mut SegmentHint) -> (f64, f64) {
        let noise_y: Vec<C64> = self.noise.iter().map(|&v| C64::new(v, 0.0)).collect();
        let tracking_y: Vec<C64> = self.tracking.iter().map(|&v| C64::new(v, 0.0)).collect();
        let mut h2 = *hint;
        let n = rational_interp(&self.frequency, &noise_y, 5, hint, f).re;
        let t = rational_interp(&self.frequency, &tracking_y, 5, &mut h2, f).re;
        (n, t)
    }

    /// The weight `1/sigma` for a measured sample of magnitude `m_mag` at
    /// frequency `f`; used to left-multiply an equation row so that
    /// noisier measurements contribute less to the least-squares fit.
    pub fn weight(&self, f: f64, m_mag: f64, hint: &mut SegmentHint) -> f64 {
        let (n, t) = self.at(f, hint);
        let sigma = n + t * m_mag;
        if sigma > 0.0 {
            1.0 / sigma
        } else {
            1.0
        }
    }
}

/// Tunable knobs for the solver pass, named per-field rather than bundled
/// as a single opaque options blob, the way a filter's constructor takes
/// named noise-model arguments instead of one untyped options struct.
#[derive(Debug, Clone, Copy)]
pub struct SolverConfig {
    /// Maximum Gauss-Newton outer iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the relative step norm.
    pub convergence_tol: f64,
    /// Initial backtracking line-search step.
    pub initial_step: f64,
    /// Minimum step accepted before declaring the line search stalled.
    pub min_step: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig { max_iterations: 50, convergence_tol: 1e-10, initial_step: 1.0, min_step: 1e-12 }
    }
}

/// Accumulates standards for one calibration solve.
pub struct NewCal {
    cal_type: CalType,
    m_rows: usize,
    m_columns: usize,
    frequency: Option<Vec<f64>>,
    z0: Vec<C64>,
    standards: Vec<Standard>,
    m_error: Option<MeasurementNoiseModel>,
    pvalue_limit: Option<f64>,
    solver_config: SolverConfig,
}

impl NewCal {
    pub fn new(cal_type: CalType, m_rows: usize, m_columns: usize) -> Result<Self> {
        Layout::new(cal_type, m_rows, m_columns)?; // validates dimensions up front.
        let ports = m_rows.max(m_columns);
        Ok(NewCal {
            cal_type,
            m_rows,
            m_columns,
            frequency: None,
            z0: vec![C64::new(50.0, 0.0); ports],
            standards: Vec::new(),
            m_error: None,
            pvalue_limit: None,
            solver_config: SolverConfig::default(),
        })
    }

    pub fn set_frequency_vector(&mut self, f: Vec<f64>) -> Result<()> {
        if self.frequency.is_some() {
            return Err(UsageError::FrequencyGridAlreadySet.into());
        }
        if f.is_empty() {
            return Err(UsageError::DimensionMismatch {
                context: "set_frequency_vector: frequency vector must be non-empty",
                expected: (1, 1),
                found: (0, 0),
            }
            .into());
        }
        for w in f.windows(2) {
            if w[1] <= w[0] {
                return Err(UsageError::DimensionMismatch {
                    context: "set_frequency_vector: frequencies must be strictly ascending",
                    expected: (0, 0),
                    found: (0, 0),
                }
                .into());
            }
        }
        info!("vnacal: frequency grid set, {} points from {} to {}", f.len(), f[0], f[f.len() - 1]);
        self.frequency = Some(f);
        Ok(())
    }

    pub fn set_z0(&mut self, z0: C64) {
        self.z0 = vec![z0; self.z0.len()];
    }

    pub fn set_z0_vector(&mut self, z0: Vec<C64>) -> Result<()> {
        let ports = self.m_rows.max(self.m_columns);
        if z0.len() != ports {
            return Err(UsageError::DimensionMismatch { context: "set_z0_vector", expected: (ports, ports), found: (z0.len(), z0.len()) }.into());
        }
        self.z0 = z0;
        Ok(())
    }

    /// Enables the iterative solve path and measurement-error weighting
    /// `noise` and `tracking` are frequency-vectors, one
    /// entry per point of the (already-set) frequency grid.
    pub fn set_m_error(&mut self, noise: Vec<f64>, tracking: Vec<f64>) -> Result<()> {
        let f = self.frequency.clone().ok_or::<crate::error::VnaCalError>(UsageError::FrequencyGridNotSet.into())?;
        self.m_error = Some(MeasurementNoiseModel::new(f, noise, tracking)?);
        Ok(())
    }

    /// Sets the rejection threshold (in standard deviations of the
    /// weighted residual) above which `solve` fails with
    /// `MathError::ExcessError` (named after its role as a tunable rejection threshold
    /// rather than hard-coding the "6 sigma" magic constant).
    pub fn set_pvalue_limit(&mut self, sigma: f64) {
        self.pvalue_limit = Some(sigma);
    }

    pub fn solver_config_mut(&mut self) -> &mut SolverConfig {
        &mut self.solver_config
    }

    fn nfreq(&self) -> Result<usize> {
        self.frequency.as_ref().map(|f| f.len()).ok_or_else(|| UsageError::FrequencyGridNotSet.into())
    }

    fn check_trace(&self, trace: &[C64]) -> Result<()> {
        let n = self.nfreq()?;
        if trace.len() != n {
            return Err(UsageError::DimensionMismatch { context: "measured trace length must match the frequency grid", expected: (n, 1), found: (trace.len(), 1) }.into());
        }
        Ok(())
    }

    /// General escape hatch: a standard with an arbitrary port map and
    /// S-matrix of parameter handles, with sparse measured cells attached
    /// separately via the returned index and [`NewCal::set_measurement`].
    pub fn add_standard(&mut self, port_map: Vec<usize>, s: Vec<Vec<ParamHandle>>) -> Result<usize> {
        let n = port_map.len();
        if s.len() != n || s.iter().any(|row| row.len() != n) {
            return Err(UsageError::DimensionMismatch { context: "add_standard: s must be square in port_map.len()", expected: (n, n), found: (s.len(), s.get(0).map_or(0, |r| r.len())) }.into());
        }
        param_matrix::validate(&port_map, &s)?;
        let m = vec![vec![None; self.m_columns]; self.m_rows];
        self.standards.push(Standard::new(port_map, s, m));
        Ok(self.standards.len() - 1)
    }

    /// Attaches a measured trace to full-calibration cell `(row, column)`
    /// of a previously added standard.
    pub fn set_measurement(&mut self, standard_index: usize, row: usize, column: usize, trace: Vec<C64>) -> Result<()> {
        self.check_trace(&trace)?;
        let std = self.standards.get_mut(standard_index).ok_or(UsageError::InvalidParameter(standard_index))?;
        if row >= self.m_rows || column >= self.m_columns {
            return Err(UsageError::DimensionMismatch { context: "set_measurement: cell out of bounds", expected: (self.m_rows, self.m_columns), found: (row, column) }.into());
        }
        std.m[row][column] = Some(trace);
        Ok(())
    }

    pub fn add_single_reflect(&mut self, port: usize, param: ParamHandle, measured: Vec<C64>) -> Result<usize> {
        self.check_trace(&measured)?;
        let std = Standard::new(vec![port], vec![vec![param]], vec![vec![Some(measured)]]);
        self.standards.push(std);
        Ok(self.standards.len() - 1)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_double_reflect(
        &mut self,
        port1: usize,
        param1: ParamHandle,
        measured1: Vec<C64>,
        port2: usize,
        param2: ParamHandle,
        measured2: Vec<C64>,
        leakage: Option<(Vec<C64>, Vec<C64>)>,
    ) -> Result<usize> {
        self.check_trace(&measured1)?;
        self.check_trace(&measured2)?;
        let mut m = vec![vec![None, None], vec![None, None]];
        m[0][0] = Some(measured1);
        m[1][1] = Some(measured2);
        if let Some((m12, m21)) = leakage {
            self.check_trace(&m12)?;
            self.check_trace(&m21)?;
            m[0][1] = Some(m12);
            m[1][0] = Some(m21);
        }
        let std = Standard::new(vec![port1, port2], vec![vec![param1, VNACAL_ZERO], vec![VNACAL_ZERO, param2]], m);
        self.standards.push(std);
        Ok(self.standards.len() - 1)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_through(&mut self, port1: usize, port2: usize, m11: Vec<C64>, m12: Vec<C64>, m21: Vec<C64>, m22: Vec<C64>) -> Result<usize> {
        for t in [&m11, &m12, &m21, &m22] {
            self.check_trace(t)?;
        }
        let port_map = vec![port1, port2];
        let s = vec![vec![VNACAL_ZERO, VNACAL_MATCH], vec![VNACAL_MATCH, VNACAL_ZERO]];
        param_matrix::validate(&port_map, &s)?;
        let m = vec![vec![Some(m11), Some(m12)], vec![Some(m21), Some(m22)]];
        let std = Standard::new(port_map, s, m);
        self.standards.push(std);
        Ok(self.standards.len() - 1)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_line(&mut self, port1: usize, port2: usize, param: ParamHandle, m11: Vec<C64>, m12: Vec<C64>, m21: Vec<C64>, m22: Vec<C64>) -> Result<usize> {
        for t in [&m11, &m12, &m21, &m22] {
            self.check_trace(t)?;
        }
        let port_map = vec![port1, port2];
        let s = vec![vec![VNACAL_ZERO, param], vec![param, VNACAL_ZERO]];
        param_matrix::validate(&port_map, &s)?;
        let m = vec![vec![Some(m11), Some(m12)], vec![Some(m21), Some(m22)]];
        let std = Standard::new(port_map, s, m);
        self.standards.push(std);
        Ok(self.standards.len() - 1)
    }

    /// Sanity-checks the accumulated standards against `registry` without
    /// running the solver: every sub-system has at least as many
    /// equations as unknowns, and no measured trace is missing or
    /// mis-sized. A first-class API of its own, since diagnosing an
    /// under-determined system after a failed `solve()` is far less
    /// useful than catching it before.
    pub fn validate_against(&self, registry: &ParameterRegistry) -> Result<()> {
        self.nfreq()?;
        if self.standards.is_empty() {
            return Err(UsageError::NoStandards.into());
        }
        let layout = Layout::new(self.cal_type, self.m_rows, self.m_columns)?;
        let systems = equation::build(&layout, &self.standards, registry);
        for (i, sys) in systems.iter().enumerate() {
            if sys.equations.len() < layout.sub_system.unknowns {
                return Err(MathError::Underdetermined { sub_system: i, equations: sys.equations.len(), unknowns: layout.sub_system.unknowns }.into());
            }
        }
        Ok(())
    }

    pub fn solve(&self, registry: &mut ParameterRegistry) -> Result<Calibration> {
        self.validate_against(registry)?;
        let frequency = self.frequency.clone().ok_or::<crate::error::VnaCalError>(UsageError::FrequencyGridNotSet.into())?;
        info!("vnacal: solving {:?} over {} standards, {} frequencies", self.cal_type, self.standards.len(), frequency.len());
        solver::solve(self.cal_type, self.m_rows, self.m_columns, &frequency, &self.z0, &self.standards, registry, &self.solver_config, self.m_error.as_ref(), self.pvalue_limit)
    }
}

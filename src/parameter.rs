//! The parameter registry.
//!
//! Owns the pool of parameter objects (scalar, vector, unknown,
//! correlated, zero, match), assigns stable integer handles, reference
//! counts them, and evaluates a parameter at a frequency.
//!
//! Handle-based ownership (see DESIGN.md): the registry is a
//! free-list backed by a growable vector of slots, giving stable indices
//! with no raw pointers held across a mutation that might reallocate the
//! backing store. Internal callers borrow a slot only for the duration
//! of a single operation.

use std::cell::Cell;
use std::fmt;

use crate::complex::{within_envelope, C64, EXTRAPOLATION_MARGIN};
use crate::error::{Result, UsageError};
use crate::interp::{rational_interp, SegmentHint};

/// Opaque handle into a [`ParameterRegistry`]. Stable as long as the
/// referenced parameter has not been destroyed.
pub type ParamHandle = usize;

/// The constant zero parameter. Predefined, fixed low handle.
pub const VNACAL_ZERO: ParamHandle = 0;
/// The constant zero parameter with identity-under-composition semantics
/// for standards. Predefined, fixed low handle.
pub const VNACAL_MATCH: ParamHandle = 1;
/// The ideal open standard, Γ = +1. Predefined, fixed low handle.
pub const VNACAL_OPEN: ParamHandle = 2;
/// The ideal short standard, Γ = -1. Predefined, fixed low handle.
pub const VNACAL_SHORT: ParamHandle = 3;

const PREDEFINED_COUNT: usize = 4;

/// A per-frequency standard-deviation descriptor for a correlated
/// parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Sigma {
    Scalar(f64),
    Vector { f: Vec<f64>, sigma: Vec<f64> },
}

impl Sigma {
    /// Evaluate σ(f), extrapolating at the edges the same way a vector
    /// parameter would (but without an extrapolation-envelope check: σ is
    /// an internal weighting input, not a user-facing parameter value).
    pub fn at(&self, f: f64, hint: &mut SegmentHint) -> f64 {
        match self {
            Sigma::Scalar(s) => *s,
            Sigma::Vector { f: fs, sigma } => {
                let ys: Vec<C64> = sigma.iter().map(|&s| C64::new(s, 0.0)).collect();
                rational_interp(fs, &ys, 5, hint, f).re
            }
        }
    }
}

/// A solved (frequency, γ) table recorded onto an unknown/correlated
/// parameter after a successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolvedTable {
    pub f: Vec<f64>,
    pub gamma: Vec<C64>,
}

#[derive(Debug, Clone)]
enum Kind {
    Zero,
    Match,
    Scalar { gamma: C64 },
    Vector { f: Vec<f64>, gamma: Vec<C64> },
    Unknown { other: ParamHandle, solved: Option<SolvedTable> },
    Correlated { other: ParamHandle, sigma: Sigma, solved: Option<SolvedTable> },
}

struct Slot {
    kind: Kind,
    hold_count: u32,
    delete_requested: bool,
    seg_hint: Cell<SegmentHint>,
}

/// Owns every parameter handed out to a [`crate::accumulator::NewCal`] or
/// [`crate::apply`] caller.
///
/// Single-threaded per instance: all mutation must be
/// serialized by the caller, matching the library's single-threaded
/// registry model.
pub struct ParameterRegistry {
    slots: Vec<Option<Slot>>,
    free_list: Vec<usize>,
}

impl fmt::Debug for ParameterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ParameterRegistry")
            .field("live", &self.slots.iter().filter(|s| s.is_some()).count())
            .finish()
    }
}

impl Default for ParameterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterRegistry {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(PREDEFINED_COUNT);
        slots.push(Some(Slot { kind: Kind::Zero, hold_count: 1, delete_requested: false, seg_hint: Cell::new(SegmentHint::default()) }));
        slots.push(Some(Slot { kind: Kind::Match, hold_count: 1, delete_requested: false, seg_hint: Cell::new(SegmentHint::default()) }));
        slots.push(Some(Slot {
            kind: Kind::Scalar { gamma: C64::new(1.0, 0.0) },
            hold_count: 1,
            delete_requested: false,
            seg_hint: Cell::new(SegmentHint::default()),
        }));
        slots.push(Some(Slot {
            kind: Kind::Scalar { gamma: C64::new(-1.0, 0.0) },
            hold_count: 1,
            delete_requested: false,
            seg_hint: Cell::new(SegmentHint::default()),
        }));
        ParameterRegistry { slots, free_list: Vec::new() }
    }

    fn slot(&self, handle: ParamHandle) -> Result<&Slot> {
        self.slots
            .get(handle)
            .and_then(|s| s.as_ref())
            .ok_or(UsageError::InvalidParameter(handle).into())
    }

    fn insert(&mut self, kind: Kind) -> ParamHandle {
        let slot = Slot { kind, hold_count: 0, delete_requested: false, seg_hint: Cell::new(SegmentHint::default()) };
        if let Some(h) = self.free_list.pop() {
            self.slots[h] = Some(slot);
            h
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    /// Returns true if `handle` currently refers to a live parameter.
    pub fn is_valid(&self, handle: ParamHandle) -> bool {
        matches!(self.slots.get(handle), Some(Some(_)))
    }

    pub fn make_scalar(&mut self, gamma: C64) -> ParamHandle {
        self.insert(Kind::Scalar { gamma })
    }

    /// `f` must be ascending and non-empty, `gamma.len() == f.len()`.
    pub fn make_vector(&mut self, f: Vec<f64>, gamma: Vec<C64>) -> Result<ParamHandle> {
        if f.is_empty() || f.len() != gamma.len() {
            return Err(UsageError::DimensionMismatch {
                context: "make_vector: f and gamma must be equal-length and non-empty",
                expected: (f.len(), f.len()),
                found: (f.len(), gamma.len()),
            }
            .into());
        }
        for w in f.windows(2) {
            if w[1] <= w[0] {
                return Err(UsageError::DimensionMismatch {
                    context: "make_vector: f must be strictly ascending",
                    expected: (0, 0),
                    found: (0, 0),
                }
                .into());
            }
        }
        Ok(self.insert(Kind::Vector { f, gamma }))
    }

    pub fn make_unknown(&mut self, other: ParamHandle) -> Result<ParamHandle> {
        self.slot(other)?;
        Ok(self.insert(Kind::Unknown { other, solved: None }))
    }

    pub fn make_correlated(&mut self, other: ParamHandle, sigma: Sigma) -> Result<ParamHandle> {
        self.slot(other)?;
        Ok(self.insert(Kind::Correlated { other, sigma, solved: None }))
    }

    /// Increments the hold count, preventing destruction on `delete`.
    pub fn hold(&mut self, handle: ParamHandle) -> Result<()> {
        let slot = self
            .slots
            .get_mut(handle)
            .and_then(|s| s.as_mut())
            .ok_or::<crate::error::VnaCalError>(UsageError::InvalidParameter(handle).into())?;
        slot.hold_count += 1;
        Ok(())
    }

    /// Decrements the hold count; if it reaches zero and deletion was
    /// already requested, the parameter is destroyed now.
    pub fn release(&mut self, handle: ParamHandle) -> Result<()> {
        {
            let slot = self
                .slots
                .get_mut(handle)
                .and_then(|s| s.as_mut())
                .ok_or::<crate::error::VnaCalError>(UsageError::InvalidParameter(handle).into())?;
            if slot.hold_count > 0 {
                slot.hold_count -= 1;
            }
        }
        self.reap_if_unused(handle);
        Ok(())
    }

    /// Requests deletion. If the hold count is already zero, the
    /// parameter is freed immediately; otherwise deletion is deferred
    /// until the final `release`.
    pub fn delete(&mut self, handle: ParamHandle) -> Result<()> {
        if handle < PREDEFINED_COUNT {
            // Predefined parameters are never destroyed; deletion is a
            // silent no-op, matching their "fixed low handle" guarantee.
            return Ok(());
        }
        {
            let slot = self
                .slots
                .get_mut(handle)
                .and_then(|s| s.as_mut())
                .ok_or::<crate::error::VnaCalError>(UsageError::InvalidParameter(handle).into())?;
            slot.delete_requested = true;
        }
        self.reap_if_unused(handle);
        Ok(())
    }

    fn reap_if_unused(&mut self, handle: ParamHandle) {
        let reap = matches!(&self.slots[handle], Some(s) if s.delete_requested && s.hold_count == 0);
        if reap {
            self.slots[handle] = None;
            self.free_list.push(handle);
        }
    }

    /// Records the solved (frequency, γ) table for an unknown or
    /// correlated parameter, used internally by the solver once it has
    /// produced a value for every non-linear variable.
    pub fn set_solved(&mut self, handle: ParamHandle, table: SolvedTable) -> Result<()> {
        let slot = self
            .slots
            .get_mut(handle)
            .and_then(|s| s.as_mut())
            .ok_or::<crate::error::VnaCalError>(UsageError::InvalidParameter(handle).into())?;
        match &mut slot.kind {
            Kind::Unknown { solved, .. } | Kind::Correlated { solved, .. } => {
                *solved = Some(table);
                Ok(())
            }
            _ => Err(UsageError::InvalidParameter(handle).into()),
        }
    }

    /// True if `handle` names [`VNACAL_ZERO`] or [`VNACAL_MATCH`]: both
    /// evaluate to exactly 0 and require no frequency-range check.
    pub fn is_zero_like(&self, handle: ParamHandle) -> bool {
        matches!(self.slots.get(handle), Some(Some(s)) if matches!(s.kind, Kind::Zero | Kind::Match))
    }

    pub fn is_match(&self, handle: ParamHandle) -> bool {
        matches!(self.slots.get(handle), Some(Some(s)) if matches!(s.kind, Kind::Match))
    }

    /// True if this parameter's value is not yet fixed (i.e. an `Unknown`
    /// or `Correlated` with no solved table): these are the parameters
    /// the iterative solver must estimate.
    pub fn is_unsolved_unknown(&self, handle: ParamHandle) -> bool {
        matches!(
            self.slots.get(handle),
            Some(Some(Slot { kind: Kind::Unknown { solved: None, .. }, .. }))
                | Some(Some(Slot { kind: Kind::Correlated { solved: None, .. }, .. }))
        )
    }

    pub fn is_correlated(&self, handle: ParamHandle) -> bool {
        matches!(self.slots.get(handle), Some(Some(Slot { kind: Kind::Correlated { .. }, .. })))
    }

    /// For a correlated parameter, returns `(other, sigma(f))`.
    pub fn correlation(&self, handle: ParamHandle, f: f64) -> Result<(ParamHandle, f64)> {
        let slot = self.slot(handle)?;
        match &slot.kind {
            Kind::Correlated { other, sigma, .. } => {
                let mut hint = slot.seg_hint.get();
                let s = sigma.at(f, &mut hint);
                slot.seg_hint.set(hint);
                Ok((*other, s))
            }
            _ => Err(UsageError::InvalidParameter(handle).into()),
        }
    }

    /// The `other` reference of an Unknown/Correlated parameter, used to
    /// seed the iterative solver's initial guess.
    pub fn initial_guess_source(&self, handle: ParamHandle) -> Result<ParamHandle> {
        let slot = self.slot(handle)?;
        match &slot.kind {
            Kind::Unknown { other, .. } | Kind::Correlated { other, .. } => Ok(*other),
            _ => Err(UsageError::InvalidParameter(handle).into()),
        }
    }

    /// Evaluates the parameter at frequency `f`.
    ///
    /// Dispatch: scalar -> γ; vector -> rational-function interpolation
    /// with envelope check; unknown/correlated with a solved table ->
    /// interpolation on that table; unknown/correlated without one -> the
    /// `other` reference (the initial guess).
    pub fn get_value(&self, handle: ParamHandle, f: f64) -> Result<C64> {
        let slot = self.slot(handle)?;
        match &slot.kind {
            Kind::Zero | Kind::Match => Ok(C64::new(0.0, 0.0)),
            Kind::Scalar { gamma } => Ok(*gamma),
            Kind::Vector { f: fs, gamma } => {
                let fmin = fs[0];
                let fmax = fs[fs.len() - 1];
                if !within_envelope(f, fmin, fmax, EXTRAPOLATION_MARGIN) {
                    return Err(UsageError::FrequencyOutOfRange { frequency: f, fmin, fmax }.into());
                }
                let mut hint = slot.seg_hint.get();
                let v = rational_interp(fs, gamma, 5, &mut hint, f);
                slot.seg_hint.set(hint);
                Ok(v)
            }
            Kind::Unknown { other, solved } | Kind::Correlated { other, solved, .. } => match solved {
                Some(table) => {
                    let fmin = table.f[0];
                    let fmax = table.f[table.f.len() - 1];
                    if !within_envelope(f, fmin, fmax, EXTRAPOLATION_MARGIN) {
                        return Err(UsageError::FrequencyOutOfRange { frequency: f, fmin, fmax }.into());
                    }
                    let mut hint = slot.seg_hint.get();
                    let v = rational_interp(&table.f, &table.gamma, 5, &mut hint, f);
                    slot.seg_hint.set(hint);
                    Ok(v)
                }
                None => self.get_value(*other, f),
            },
        }
    }
}

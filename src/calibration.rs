//! The calibration store.
//!
//! A solved calibration is immutable once produced by the solver
//! (`{name, type, dims, frequencies, z0, error terms}`). The
//! store itself is a growable, index-addressable array of named
//! calibrations with replace-by-name semantics: a name-indexed registry
//! of immutable, independently constructed records backed by a `Vec`
//! plus a name lookup.

use std::collections::HashMap;

use crate::complex::{within_envelope, C64, EXTRAPOLATION_MARGIN};
use crate::error::{Result, UsageError};
use crate::interp::{rational_interp, SegmentHint};
use crate::layout::CalType;

/// A solved, immutable calibration.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub cal_type: CalType,
    pub m_rows: usize,
    pub m_columns: usize,
    pub frequency: Vec<f64>,
    pub z0: Vec<C64>,
    /// Error-term vectors, one length-`frequency.len()` complex array per
    /// term, in the order [`crate::layout::Layout::total_public_terms`]
    /// lays out.
    pub error_terms: Vec<Vec<C64>>,
}

impl Calibration {
    pub fn new(cal_type: CalType, m_rows: usize, m_columns: usize, frequency: Vec<f64>, z0: Vec<C64>, error_terms: Vec<Vec<C64>>) -> Self {
        Calibration { cal_type, m_rows, m_columns, frequency, z0, error_terms }
    }

    pub fn fmin(&self) -> f64 {
        self.frequency[0]
    }

    pub fn fmax(&self) -> f64 {
        self.frequency[self.frequency.len() - 1]
    }

    pub fn ports(&self) -> usize {
        self.m_rows.max(self.m_columns)
    }

    /// Validates that `f` lies within the ε-extrapolation envelope
    /// before any interpolation is attempted.
    pub fn check_frequency(&self, f: f64) -> Result<()> {
        if within_envelope(f, self.fmin(), self.fmax(), EXTRAPOLATION_MARGIN) {
            Ok(())
        } else {
            Err(UsageError::FrequencyOutOfRange { frequency: f, fmin: self.fmin(), fmax: self.fmax() }.into())
        }
    }

    /// Interpolates term `term_index` to query frequency `f`, using `hint`
    /// to amortize repeated ascending queries.
    pub fn interpolate_term(&self, term_index: usize, f: f64, hint: &mut SegmentHint) -> C64 {
        rational_interp(&self.frequency, &self.error_terms[term_index], 5, hint, f)
    }

    /// Diagnostic dump of the solved error terms to CSV: one row per
    /// frequency, one column per term, in the same header-then-rows shape
    /// as a fitted-parameters export. Not part of the external save-file
    /// format; it's an ambient debugging convenience.
    pub fn write_csv<W: std::io::Write>(&self, w: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(w);
        let mut header = vec!["frequency".to_string()];
        for i in 0..self.error_terms.len() {
            header.push(format!("term_{}_re", i));
            header.push(format!("term_{}_im", i));
        }
        writer.write_record(&header).map_err(|e| crate::error::VnaCalError::System(e.to_string()))?;
        for (fi, &f) in self.frequency.iter().enumerate() {
            let mut row = vec![f.to_string()];
            for term in &self.error_terms {
                row.push(term[fi].re.to_string());
                row.push(term[fi].im.to_string());
            }
            writer.write_record(&row).map_err(|e| crate::error::VnaCalError::System(e.to_string()))?;
        }
        writer.flush().map_err(|e| crate::error::VnaCalError::System(e.to_string()))?;
        Ok(())
    }
}

/// Growable, name-addressable store of solved calibrations
/// `add`/`find_by_name`/`get_*`). Deleted slots are reused, the same
/// free-list discipline as [`crate::parameter::ParameterRegistry`].
#[derive(Debug, Default)]
pub struct CalibrationStore {
    slots: Vec<Option<Calibration>>,
    free_list: Vec<usize>,
    by_name: HashMap<String, usize>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        CalibrationStore::default()
    }

    /// Stores `cal` under `name`, transferring ownership out of the
    /// caller's `New` builder. Replaces (and frees the slot of) any
    /// existing calibration with the same name. Returns the calibration
    /// index.
    pub fn add(&mut self, name: &str, cal: Calibration) -> usize {
        if let Some(&existing) = self.by_name.get(name) {
            self.slots[existing] = Some(cal);
            return existing;
        }
        let index = if let Some(i) = self.free_list.pop() {
            self.slots[i] = Some(cal);
            i
        } else {
            self.slots.push(Some(cal));
            self.slots.len() - 1
        };
        self.by_name.insert(name.to_string(), index);
        index
    }

    pub fn delete(&mut self, index: usize) -> Result<()> {
        let slot = self.slots.get_mut(index).ok_or(UsageError::InvalidParameter(index))?;
        if slot.take().is_some() {
            self.by_name.retain(|_, &mut v| v != index);
            self.free_list.push(index);
        }
        Ok(())
    }

    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, index: usize) -> Result<&Calibration> {
        self.slots.get(index).and_then(|s| s.as_ref()).ok_or(UsageError::InvalidParameter(index).into())
    }

    pub fn get_type(&self, index: usize) -> Result<CalType> {
        Ok(self.get(index)?.cal_type)
    }

    pub fn get_rows(&self, index: usize) -> Result<usize> {
        Ok(self.get(index)?.m_rows)
    }

    pub fn get_columns(&self, index: usize) -> Result<usize> {
        Ok(self.get(index)?.m_columns)
    }

    pub fn get_frequencies(&self, index: usize) -> Result<usize> {
        Ok(self.get(index)?.frequency.len())
    }

    pub fn get_fmin(&self, index: usize) -> Result<f64> {
        Ok(self.get(index)?.fmin())
    }

    pub fn get_fmax(&self, index: usize) -> Result<f64> {
        Ok(self.get(index)?.fmax())
    }

    pub fn get_frequency_vector(&self, index: usize) -> Result<&[f64]> {
        Ok(&self.get(index)?.frequency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cal_type: CalType) -> Calibration {
        Calibration::new(cal_type, 2, 2, vec![1e9, 2e9], vec![C64::new(50.0, 0.0); 2], vec![vec![C64::new(1.0, 0.0), C64::new(1.0, 0.0)]; 8])
    }

    #[test]
    fn add_then_find_by_name() {
        let mut store = CalibrationStore::new();
        let idx = store.add("cal1", sample(CalType::T8));
        assert_eq!(store.find_by_name("cal1"), Some(idx));
        assert_eq!(store.get_type(idx).unwrap(), CalType::T8);
    }

    #[test]
    fn replace_by_name_reuses_the_same_index() {
        let mut store = CalibrationStore::new();
        let idx1 = store.add("cal1", sample(CalType::T8));
        let idx2 = store.add("cal1", sample(CalType::U8));
        assert_eq!(idx1, idx2);
        assert_eq!(store.get_type(idx1).unwrap(), CalType::U8);
    }

    #[test]
    fn deleted_slot_is_reused() {
        let mut store = CalibrationStore::new();
        let idx1 = store.add("a", sample(CalType::T8));
        store.delete(idx1).unwrap();
        assert!(store.find_by_name("a").is_none());
        let idx2 = store.add("b", sample(CalType::T8));
        assert_eq!(idx1, idx2);
    }

    #[test]
    fn frequency_envelope_check() {
        let cal = sample(CalType::T8);
        assert!(cal.check_frequency(1.5e9).is_ok());
        assert!(cal.check_frequency(0.5e9).is_err());
        assert!(cal.check_frequency(0.995e9).is_ok());
    }
}

//! External network-parameter data container interface.
//!
//! The calibration engine never owns a touchstone/native file format or a
//! plotting surface; it only needs somewhere to deposit frequencies and
//! S-matrix cells as it computes them. Call sites (a CLI, a GUI, a file
//! writer) implement [`NetworkParameterSink`] over whatever container they
//! already have, keeping output storage abstract behind a trait rather
//! than hard-coding a writer.

use nalgebra::DMatrix;

use crate::complex::C64;
use crate::error::Result;

/// Which parameter family a sink frame holds. `apply` always produces
/// `S`; the variants for the others are carried so a sink implementation
/// can be reused for future conversions without changing its trait
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkParameterType {
    S,
    Z,
    Y,
    T,
    H,
}

/// Destination for a sequence of frequency-indexed network-parameter
/// matrices. Implementors decide what "sink" means: an in-memory buffer,
/// a touchstone writer, a plot.
pub trait NetworkParameterSink {
    /// Called once, before any `set_*` call, with the final shape.
    fn init(&mut self, kind: NetworkParameterType, rows: usize, columns: usize, frequencies: usize) -> Result<()>;

    /// Records the frequency at grid position `index`.
    fn set_frequency(&mut self, index: usize, f: f64) -> Result<()>;

    /// Records one matrix cell at grid position `index`.
    fn set_cell(&mut self, index: usize, row: usize, column: usize, value: C64) -> Result<()>;

    /// Records the reference impedance used to normalize the parameters,
    /// one value per port, uniform across the frequency grid.
    fn set_z0_vector(&mut self, z0: &[C64]);

    /// Records a reference impedance that varies with frequency. The
    /// default forwards the first entry to [`Self::set_z0_vector`]; sinks
    /// that care about the frequency dependence override this.
    fn set_fz0_vector(&mut self, fz0: &[C64]) {
        self.set_z0_vector(fz0);
    }
}

/// A simple in-memory sink, useful for tests and for callers that just
/// want the matrices back as plain `nalgebra` types without writing a
/// custom implementation.
#[derive(Debug, Default)]
pub struct VectorSink {
    pub network_type: Option<NetworkParameterType>,
    pub frequencies: Vec<f64>,
    pub frames: Vec<DMatrix<C64>>,
    pub z0: Vec<C64>,
}

impl NetworkParameterSink for VectorSink {
    fn init(&mut self, kind: NetworkParameterType, rows: usize, columns: usize, frequencies: usize) -> Result<()> {
        self.network_type = Some(kind);
        self.frequencies = vec![0.0; frequencies];
        self.frames = vec![DMatrix::from_element(rows, columns, C64::new(0.0, 0.0)); frequencies];
        Ok(())
    }

    fn set_frequency(&mut self, index: usize, f: f64) -> Result<()> {
        self.frequencies[index] = f;
        Ok(())
    }

    fn set_cell(&mut self, index: usize, row: usize, column: usize, value: C64) -> Result<()> {
        self.frames[index][(row, column)] = value;
        Ok(())
    }

    fn set_z0_vector(&mut self, z0: &[C64]) {
        self.z0 = z0.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_sink_records_every_cell() {
        let mut sink = VectorSink::default();
        sink.init(NetworkParameterType::S, 2, 2, 1).unwrap();
        sink.set_frequency(0, 1e9).unwrap();
        sink.set_cell(0, 0, 0, C64::new(0.1, 0.0)).unwrap();
        sink.set_cell(0, 1, 1, C64::new(0.2, 0.0)).unwrap();
        sink.set_z0_vector(&[C64::new(50.0, 0.0); 2]);
        assert_eq!(sink.frequencies[0], 1e9);
        assert_eq!(sink.frames[0][(0, 0)], C64::new(0.1, 0.0));
        assert_eq!(sink.z0.len(), 2);
    }
}

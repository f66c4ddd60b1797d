//! Q3D mode: momentum transfer in the crystal frame plus energy transfer.
//!
//! The beam travels along +z. For a bin with energy transfer `E` measured
//! by a detector in direction `d`:
//!
//! ```text
//! ki = sqrt(Ei / C)        kf = sqrt((Ei - E) / C)
//! q  = (-dx·kf, -dy·kf, ki - dz·kf)
//! ```
//!
//! and the event lands at `(Mᵀ·q, E, extras...)` with `M` the orientation
//! matrix.

use rustmd_core::geometry::{Matrix3, V3D};
use rustmd_core::{Error, EventBatch, Result, SpectraSource};

use crate::transform::{emit_bins, CoordinateBounds, CoordinateTransform, SpectrumStats, SpectrumView};
use crate::units::{wavevector_from_energy, SIGNAL_EPSILON};

/// Index of the energy-transfer coordinate.
const ENERGY_DIM: usize = 3;

/// Inelastic momentum-transfer transform.
#[derive(Debug, Clone)]
pub struct Q3dTransform {
    bounds: CoordinateBounds,
    extras: Vec<f64>,
    to_crystal: Matrix3,
    incident_energy: f64,
    ki: f64,
}

impl Q3dTransform {
    /// Creates the transform from the orientation matrix `M` and the
    /// incident energy in meV.
    ///
    /// # Errors
    /// - [`Error::UnsupportedDimension`] for fewer than four dimensions
    /// - [`Error::ConfigurationError`] if `extras` does not fill the rest
    /// - [`Error::InvalidArgument`] for a non-positive incident energy
    pub fn new(
        bounds: CoordinateBounds,
        extras: Vec<f64>,
        orientation: Matrix3,
        incident_energy: f64,
    ) -> Result<Self> {
        let ndims = bounds.ndims();
        if ndims < 4 {
            return Err(Error::UnsupportedDimension { mode: "q3d", ndims });
        }
        if extras.len() != ndims - 4 {
            return Err(Error::ConfigurationError(format!(
                "q3d conversion to {ndims} dimensions needs {} extra values, got {}",
                ndims - 4,
                extras.len()
            )));
        }
        if !incident_energy.is_finite() || incident_energy <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "incident energy must be positive, got {incident_energy} meV"
            )));
        }
        Ok(Self {
            bounds,
            extras,
            to_crystal: orientation.transpose(),
            incident_energy,
            ki: wavevector_from_energy(incident_energy),
        })
    }

    /// Rejects data whose energy transfer reaches the incident energy.
    ///
    /// Only bins that would produce an event are considered: signal above
    /// the threshold and energy transfer inside the target bounds.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] naming the first offending spectrum.
    pub fn check_energy_range<S: SpectraSource + ?Sized>(&self, source: &S) -> Result<()> {
        let lo = self.bounds.min()[ENERGY_DIM];
        let hi = self.bounds.max()[ENERGY_DIM];
        for index in 0..source.num_spectra() {
            let hist = source.histogram(index);
            let max_transfer = (0..hist.bins())
                .filter(|&j| hist.y[j] > SIGNAL_EPSILON)
                .map(|j| hist.bin_center(j))
                .filter(|&e| e >= lo && e < hi)
                .fold(f64::NEG_INFINITY, f64::max);
            if max_transfer >= self.incident_energy {
                return Err(Error::InvalidArgument(format!(
                    "incident energy {} meV is below energy transfer {max_transfer} meV in spectrum {index}",
                    self.incident_energy
                )));
            }
        }
        Ok(())
    }
}

impl CoordinateTransform for Q3dTransform {
    fn name(&self) -> &'static str {
        "q3d"
    }

    fn ndims(&self) -> usize {
        self.bounds.ndims()
    }

    fn incident_energy(&self) -> Option<f64> {
        Some(self.incident_energy)
    }

    fn convert_spectrum(
        &self,
        spectrum: &SpectrumView<'_>,
        run_index: u16,
        out: &mut EventBatch,
    ) -> SpectrumStats {
        let dir = spectrum.detector.direction;
        emit_bins(spectrum, &self.bounds, run_index, out, |energy, coords| {
            if energy >= self.incident_energy {
                return false;
            }
            let kf = wavevector_from_energy(self.incident_energy - energy);
            let q = V3D::new(-dir.x * kf, -dir.y * kf, self.ki - dir.z * kf);
            let crystal = self.to_crystal * q;
            coords[0] = crystal.x;
            coords[1] = crystal.y;
            coords[2] = crystal.z;
            coords[ENERGY_DIM] = energy;
            coords[ENERGY_DIM + 1..].copy_from_slice(&self.extras);
            true
        })
    }
}

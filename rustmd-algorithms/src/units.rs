//! Physical constants and numeric thresholds used by the conversions.

/// Neutron energy in meV per squared wavevector in Å⁻²: `E = C · k²`.
pub const E_MEV_TO_NEUTRON_WAVENUMBER_SQ: f64 = 2.072_124_6;

/// Bins whose signal does not exceed this value never produce an event.
///
/// Single-precision machine epsilon.
pub const SIGNAL_EPSILON: f64 = 1.192_092_9e-7;

/// Wavevector magnitude (Å⁻¹) of a neutron with the given energy (meV).
///
/// Negative energies give `NaN`.
#[inline]
#[must_use]
pub fn wavevector_from_energy(energy_mev: f64) -> f64 {
    (energy_mev / E_MEV_TO_NEUTRON_WAVENUMBER_SQ).sqrt()
}

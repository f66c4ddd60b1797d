//! Crystal orientation matrix for momentum-transfer conversions.
//!
//! The crystal frame is built from two reference directions `u` and `v`
//! given in reciprocal-lattice units:
//!
//! - `e1` along `UB·u`
//! - `e3` along `UB·u × UB·v`
//! - `e2 = e3 × e1`, so `v` lies in the `e1`-`e2` plane
//!
//! With `T` the matrix whose rows are `e1, e2, e3` and `R` the goniometer
//! rotation, the orientation matrix is `M = R · Tᵀ`. A lab-frame momentum
//! transfer `q` maps to the crystal frame as `Mᵀ · q`.

use rustmd_core::geometry::{Goniometer, Matrix3, OrientedLattice, V3D};
use rustmd_core::{Error, Result};

/// Computes the orientation matrix `M = R · Tᵀ`.
///
/// # Errors
/// Returns [`Error::InvalidArgument`] if the lattice is invalid, `u` is zero,
/// or `u` and `v` are parallel.
pub fn transf_matrix(
    lattice: &OrientedLattice,
    goniometer: &Goniometer,
    u: V3D,
    v: V3D,
) -> Result<Matrix3> {
    let ub = lattice.ub_matrix()?;
    let bu = ub * u;
    let bv = ub * v;

    let e1 = bu
        .normalized()
        .ok_or_else(|| Error::InvalidArgument(format!("reference direction u={u:?} is zero")))?;
    let e3 = bu.cross(&bv).normalized().ok_or_else(|| {
        Error::InvalidArgument(format!("reference directions u={u:?} and v={v:?} are parallel"))
    })?;
    let e2 = e3.cross(&e1);

    let t = Matrix3::from_row_vectors(e1, e2, e3);
    Ok(goniometer.rotation_matrix()? * t.transpose())
}

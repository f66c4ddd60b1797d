//! Fixed-capacity coordinate buffer.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::{Error, Result};

/// Maximum number of dimensions an index can carry.
pub const MAX_DIMS: usize = 9;

/// Stack-allocated coordinate vector with a runtime dimension count.
///
/// Holds up to [`MAX_DIMS`] values and dereferences to the first `len`
/// of them, so it can be handed anywhere a `&[f64]` is expected.
#[derive(Clone, Copy, PartialEq)]
pub struct Coords {
    values: [f64; MAX_DIMS],
    len: u8,
}

impl Coords {
    /// Creates a zero-filled buffer with `ndims` dimensions.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if `ndims` is zero or exceeds [`MAX_DIMS`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn zeros(ndims: usize) -> Result<Self> {
        if ndims == 0 || ndims > MAX_DIMS {
            return Err(Error::InvalidArgument(format!(
                "coordinate count must be in 1..={MAX_DIMS}, got {ndims}"
            )));
        }
        Ok(Self {
            values: [0.0; MAX_DIMS],
            len: ndims as u8,
        })
    }

    /// Copies coordinates from a slice.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the slice is empty or too long.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        let mut coords = Self::zeros(values.len())?;
        coords.copy_from_slice(values);
        Ok(coords)
    }

    /// Number of dimensions.
    #[inline]
    #[must_use]
    pub fn ndims(&self) -> usize {
        self.len as usize
    }

    /// Returns the coordinates as a slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.values[..self.len as usize]
    }
}

impl Deref for Coords {
    type Target = [f64];

    #[inline]
    fn deref(&self) -> &[f64] {
        &self.values[..self.len as usize]
    }
}

impl DerefMut for Coords {
    #[inline]
    fn deref_mut(&mut self) -> &mut [f64] {
        &mut self.values[..self.len as usize]
    }
}

impl fmt::Debug for Coords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coords_len_and_access() {
        let mut coords = Coords::zeros(3).unwrap();
        assert_eq!(coords.ndims(), 3);
        coords[1] = 2.5;
        assert_eq!(coords.as_slice(), &[0.0, 2.5, 0.0]);
    }

    #[test]
    fn test_coords_rejects_bad_sizes() {
        assert!(Coords::zeros(0).is_err());
        assert!(Coords::zeros(MAX_DIMS + 1).is_err());
        assert!(Coords::from_slice(&[1.0; MAX_DIMS]).is_ok());
    }
}

//! Dimension descriptions for the target coordinate space.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One axis of an MD workspace with half-open `[min, max)` bounds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MdDimension {
    /// Display name.
    pub name: String,
    /// Stable identifier (defaults to the name).
    #[cfg_attr(feature = "serde", serde(default))]
    pub id: String,
    /// Unit label.
    #[cfg_attr(feature = "serde", serde(default))]
    pub units: String,
    /// Inclusive lower bound.
    pub min: f64,
    /// Exclusive upper bound.
    pub max: f64,
}

impl MdDimension {
    /// Creates a dimension, validating its bounds.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if a bound is not finite or `min >= max`.
    pub fn new(name: impl Into<String>, units: impl Into<String>, min: f64, max: f64) -> Result<Self> {
        let name = name.into();
        let dim = Self {
            id: name.clone(),
            name,
            units: units.into(),
            min,
            max,
        };
        dim.validate()?;
        Ok(dim)
    }

    /// Checks the bounds of a dimension built by other means (e.g. deserialized).
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if a bound is not finite or `min >= max`.
    pub fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "dimension '{}' has non-finite bounds [{}, {})",
                self.name, self.min, self.max
            )));
        }
        if self.min >= self.max {
            return Err(Error::InvalidArgument(format!(
                "dimension '{}' has min {} >= max {}",
                self.name, self.min, self.max
            )));
        }
        Ok(())
    }

    /// Width of the dimension.
    #[inline]
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Half-open membership test.
    #[inline]
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value < self.max
    }
}

//! Splitting policy shared by every box of an index.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Global tree policy: how boxes split and how deep the tree may grow.
///
/// Created once per index and shared read-only (behind an `Arc`) by the
/// index and any conversion workers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BoxController {
    /// Number of subdivisions per dimension when a box splits.
    pub split_into: usize,
    /// A leaf holding more events than this is eligible to split.
    pub split_threshold: usize,
    /// Boxes at this depth never split.
    pub max_depth: usize,
}

impl Default for BoxController {
    fn default() -> Self {
        Self {
            split_into: 5,
            split_threshold: 1500,
            max_depth: 20,
        }
    }
}

impl BoxController {
    /// Creates a validated controller.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if `split_into < 2` or `split_threshold == 0`.
    pub fn new(split_into: usize, split_threshold: usize, max_depth: usize) -> Result<Self> {
        let controller = Self {
            split_into,
            split_threshold,
            max_depth,
        };
        controller.validate()?;
        Ok(controller)
    }

    /// Sets the branching factor.
    #[must_use]
    pub fn with_split_into(mut self, split_into: usize) -> Self {
        self.split_into = split_into;
        self
    }

    /// Sets the per-leaf split threshold.
    #[must_use]
    pub fn with_split_threshold(mut self, threshold: usize) -> Self {
        self.split_threshold = threshold;
        self
    }

    /// Sets the maximum tree depth.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Checks the policy values.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if `split_into < 2` or `split_threshold == 0`.
    pub fn validate(&self) -> Result<()> {
        if self.split_into < 2 {
            return Err(Error::InvalidArgument(format!(
                "split_into must be at least 2, got {}",
                self.split_into
            )));
        }
        if self.split_threshold == 0 {
            return Err(Error::InvalidArgument(
                "split_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of children created when an `ndims`-dimensional box splits.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the count overflows `usize`.
    pub fn children_per_split(&self, ndims: usize) -> Result<usize> {
        u32::try_from(ndims)
            .ok()
            .and_then(|exp| self.split_into.checked_pow(exp))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "{}^{ndims} children per split overflows",
                    self.split_into
                ))
            })
    }

    /// Whether a leaf at `depth` holding `num_events` should split.
    #[inline]
    #[must_use]
    pub fn will_split(&self, num_events: usize, depth: usize) -> bool {
        num_events > self.split_threshold && depth < self.max_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_builder() {
        let bc = BoxController::default()
            .with_split_into(2)
            .with_split_threshold(10)
            .with_max_depth(3);
        assert!(bc.validate().is_ok());
        assert_eq!(bc.children_per_split(3).unwrap(), 8);
    }

    #[test]
    fn test_will_split() {
        let bc = BoxController::new(2, 1, 3).unwrap();
        assert!(!bc.will_split(1, 0));
        assert!(bc.will_split(2, 0));
        assert!(bc.will_split(2, 2));
        assert!(!bc.will_split(100, 3));
    }

    #[test]
    fn test_controller_validation() {
        assert!(BoxController::new(1, 10, 5).is_err());
        assert!(BoxController::new(2, 0, 5).is_err());
        assert!(BoxController::new(usize::MAX, 1, 5)
            .unwrap()
            .children_per_split(2)
            .is_err());
    }
}

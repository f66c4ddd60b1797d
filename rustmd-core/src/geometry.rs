//! Small 3D geometry toolkit: vectors, 3×3 matrices, unit cells, goniometers.
#![allow(clippy::many_single_char_names, clippy::similar_names)]

use std::ops::{Add, Mul, Neg, Sub};

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct V3D {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl V3D {
    /// Creates a vector.
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Dot product.
    #[inline]
    #[must_use]
    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Cross product.
    #[inline]
    #[must_use]
    pub fn cross(&self, other: &Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Euclidean norm.
    #[inline]
    #[must_use]
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, `None` for a (near) zero vector.
    #[must_use]
    pub fn normalized(&self) -> Option<Self> {
        let n = self.norm();
        if n < 1e-12 || !n.is_finite() {
            None
        } else {
            Some(Self::new(self.x / n, self.y / n, self.z / n))
        }
    }

    /// Components as an array.
    #[inline]
    #[must_use]
    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl Add for V3D {
    type Output = V3D;
    fn add(self, rhs: V3D) -> V3D {
        V3D::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for V3D {
    type Output = V3D;
    fn sub(self, rhs: V3D) -> V3D {
        V3D::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for V3D {
    type Output = V3D;
    fn neg(self) -> V3D {
        V3D::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f64> for V3D {
    type Output = V3D;
    fn mul(self, rhs: f64) -> V3D {
        V3D::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Row-major 3×3 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Matrix3 {
    /// Rows of the matrix.
    pub m: [[f64; 3]; 3],
}

impl Default for Matrix3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix3 {
    /// Builds a matrix from rows.
    #[must_use]
    pub const fn from_rows(m: [[f64; 3]; 3]) -> Self {
        Self { m }
    }

    /// Builds a matrix whose rows are the given vectors.
    #[must_use]
    pub fn from_row_vectors(r0: V3D, r1: V3D, r2: V3D) -> Self {
        Self::from_rows([r0.to_array(), r1.to_array(), r2.to_array()])
    }

    /// Identity matrix.
    #[must_use]
    pub const fn identity() -> Self {
        Self::from_rows([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Counter-clockwise rotation by `degrees` about `axis` (right-hand rule).
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for a zero axis.
    pub fn rotation(axis: V3D, degrees: f64) -> Result<Self> {
        let n = axis
            .normalized()
            .ok_or_else(|| Error::InvalidArgument("rotation axis has zero length".to_string()))?;
        let (s, c) = degrees.to_radians().sin_cos();
        let t = 1.0 - c;
        Ok(Self::from_rows([
            [t * n.x * n.x + c, t * n.x * n.y - s * n.z, t * n.x * n.z + s * n.y],
            [t * n.x * n.y + s * n.z, t * n.y * n.y + c, t * n.y * n.z - s * n.x],
            [t * n.x * n.z - s * n.y, t * n.y * n.z + s * n.x, t * n.z * n.z + c],
        ]))
    }

    /// Transposed matrix.
    #[must_use]
    pub fn transpose(&self) -> Self {
        let m = &self.m;
        Self::from_rows([
            [m[0][0], m[1][0], m[2][0]],
            [m[0][1], m[1][1], m[2][1]],
            [m[0][2], m[1][2], m[2][2]],
        ])
    }

    /// Determinant.
    #[must_use]
    pub fn determinant(&self) -> f64 {
        let m = &self.m;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Inverse matrix.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for a singular matrix.
    pub fn inverse(&self) -> Result<Self> {
        let det = self.determinant();
        if det.abs() < 1e-15 {
            return Err(Error::InvalidArgument("matrix is singular".to_string()));
        }
        let m = &self.m;
        let inv = 1.0 / det;
        Ok(Self::from_rows([
            [
                (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv,
                (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv,
                (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv,
            ],
            [
                (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv,
                (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv,
                (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv,
            ],
            [
                (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv,
                (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv,
                (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv,
            ],
        ]))
    }

    /// Element-wise comparison with an absolute tolerance.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.m
            .iter()
            .flatten()
            .zip(other.m.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// Row `i` as a vector.
    #[must_use]
    pub fn row(&self, i: usize) -> V3D {
        V3D::new(self.m[i][0], self.m[i][1], self.m[i][2])
    }
}

impl Mul for Matrix3 {
    type Output = Matrix3;

    fn mul(self, rhs: Matrix3) -> Matrix3 {
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.m[i][k] * rhs.m[k][j]).sum();
            }
        }
        Matrix3::from_rows(out)
    }
}

impl Mul<V3D> for Matrix3 {
    type Output = V3D;

    fn mul(self, v: V3D) -> V3D {
        V3D::new(self.row(0).dot(&v), self.row(1).dot(&v), self.row(2).dot(&v))
    }
}

/// Crystal unit cell with an orientation (`U`) matrix.
///
/// Lengths in Å, angles in degrees.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrientedLattice {
    /// Cell lengths `a`, `b`, `c`.
    pub lengths: [f64; 3],
    /// Cell angles `alpha`, `beta`, `gamma` in degrees.
    pub angles: [f64; 3],
    /// Orientation matrix, identity unless the sample has been aligned.
    #[cfg_attr(feature = "serde", serde(default))]
    pub u: Matrix3,
}

impl OrientedLattice {
    /// Creates a lattice with an identity `U` matrix.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the parameters do not describe a cell.
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Result<Self> {
        let lattice = Self {
            lengths: [a, b, c],
            angles: [alpha, beta, gamma],
            u: Matrix3::identity(),
        };
        lattice.b_matrix()?;
        Ok(lattice)
    }

    /// Sets the orientation matrix.
    #[must_use]
    pub fn with_u(mut self, u: Matrix3) -> Self {
        self.u = u;
        self
    }

    /// Busing–Levy `B` matrix: reciprocal basis in an orthonormal frame with
    /// `a*` along x and `b*` in the xy plane (no 2π factor).
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for non-positive lengths or impossible angles.
    pub fn b_matrix(&self) -> Result<Matrix3> {
        let [a, b, c] = self.lengths;
        if a <= 0.0 || b <= 0.0 || c <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "lattice lengths must be positive, got ({a}, {b}, {c})"
            )));
        }
        let [alpha, beta, gamma] = self.angles.map(f64::to_radians);
        let (ca, cb, cg) = (alpha.cos(), beta.cos(), gamma.cos());

        // metric tensor of the direct cell and its inverse (reciprocal metric)
        let g = Matrix3::from_rows([
            [a * a, a * b * cg, a * c * cb],
            [a * b * cg, b * b, b * c * ca],
            [a * c * cb, b * c * ca, c * c],
        ]);
        if g.determinant() <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "lattice angles ({}, {}, {}) do not form a cell",
                self.angles[0], self.angles[1], self.angles[2]
            )));
        }
        let gs = g.inverse()?;
        let a_star = gs.m[0][0].sqrt();
        let b_star = gs.m[1][1].sqrt();
        let c_star = gs.m[2][2].sqrt();
        let beta_star = (gs.m[0][2] / (a_star * c_star)).clamp(-1.0, 1.0).acos();
        let gamma_star = (gs.m[0][1] / (a_star * b_star)).clamp(-1.0, 1.0).acos();

        Ok(Matrix3::from_rows([
            [a_star, b_star * gamma_star.cos(), c_star * beta_star.cos()],
            [0.0, b_star * gamma_star.sin(), -c_star * beta_star.sin() * ca],
            [0.0, 0.0, 1.0 / c],
        ]))
    }

    /// `U·B`.
    ///
    /// # Errors
    /// See [`OrientedLattice::b_matrix`].
    pub fn ub_matrix(&self) -> Result<Matrix3> {
        Ok(self.u * self.b_matrix()?)
    }
}

/// One goniometer rotation axis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GoniometerAxis {
    /// Axis name (`gl`, `psi`, ...).
    pub name: String,
    /// Rotation axis direction in the lab frame.
    pub direction: V3D,
    /// Rotation angle in degrees (counter-clockwise).
    pub angle: f64,
}

/// Sample goniometer: an ordered chain of rotations.
///
/// The total rotation is `R = R0 · R1 · … · Rn`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Goniometer {
    /// Axes in application order.
    pub axes: Vec<GoniometerAxis>,
}

impl Default for Goniometer {
    /// Three axes at zero: `gl` about y, `psi` about z, `gs` about x.
    fn default() -> Self {
        let axis = |name: &str, direction: V3D| GoniometerAxis {
            name: name.to_string(),
            direction,
            angle: 0.0,
        };
        Self {
            axes: vec![
                axis("gl", V3D::new(0.0, 1.0, 0.0)),
                axis("psi", V3D::new(0.0, 0.0, 1.0)),
                axis("gs", V3D::new(1.0, 0.0, 0.0)),
            ],
        }
    }
}

impl Goniometer {
    /// Sets the angle (degrees) of axis `index`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if there is no such axis.
    pub fn set_rotation_angle(&mut self, index: usize, degrees: f64) -> Result<()> {
        let count = self.axes.len();
        let axis = self.axes.get_mut(index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "goniometer has {count} axes, no axis {index}"
            ))
        })?;
        axis.angle = degrees;
        Ok(())
    }

    /// Combined rotation matrix.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if an axis direction is zero.
    pub fn rotation_matrix(&self) -> Result<Matrix3> {
        self.axes.iter().try_fold(Matrix3::identity(), |acc, axis| {
            Ok(acc * Matrix3::rotation(axis.direction, axis.angle)?)
        })
    }
}

use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CellError {
    #[error("Cell matrix is not invertible")]
    NotInvertible,
    #[error("Box bounds must satisfy lo < hi on every axis")]
    InvalidBounds,
    #[error("Box is not in restricted triclinic form (a along x, b in the xy plane)")]
    NotRestrictedTriclinic,
}

/// Simulation box. Columns of `h` are the box vectors; `origin` is the lower corner.
#[derive(Clone, Debug)]
pub struct Cell {
    h: Matrix3<f64>,
    h_inv: Matrix3<f64>,
    origin: Vector3<f64>,
    pbc: Vector3<bool>,
}

impl Cell {
    pub fn new(h: Matrix3<f64>, pbc: Vector3<bool>) -> Result<Self, CellError> {
        Self::with_origin(h, Vector3::zeros(), pbc)
    }

    pub fn with_origin(
        h: Matrix3<f64>,
        origin: Vector3<f64>,
        pbc: Vector3<bool>,
    ) -> Result<Self, CellError> {
        if h.iter().any(|x| !x.is_finite()) || h.determinant() == 0.0 {
            return Err(CellError::NotInvertible);
        }
        let h_inv = h.try_inverse().ok_or(CellError::NotInvertible)?;
        Ok(Self {
            h,
            h_inv,
            origin,
            pbc,
        })
    }

    /// Orthogonal, fully periodic box from `[lo, hi]` bounds per axis.
    pub fn from_bounds(bounds: [[f64; 2]; 3]) -> Result<Self, CellError> {
        if bounds
            .iter()
            .any(|[lo, hi]| !(lo.is_finite() && hi.is_finite() && hi > lo))
        {
            return Err(CellError::InvalidBounds);
        }
        let h = Matrix3::from_diagonal(&Vector3::new(
            bounds[0][1] - bounds[0][0],
            bounds[1][1] - bounds[1][0],
            bounds[2][1] - bounds[2][0],
        ));
        let origin = Vector3::new(bounds[0][0], bounds[1][0], bounds[2][0]);
        Self::with_origin(h, origin, Vector3::new(true, true, true))
    }

    pub fn to_fractional(&self, cart: &Vector3<f64>) -> Vector3<f64> {
        self.h_inv * (cart - self.origin)
    }

    pub fn to_cartesian(&self, frac: &Vector3<f64>) -> Vector3<f64> {
        self.h * frac + self.origin
    }

    pub fn h(&self) -> &Matrix3<f64> {
        &self.h
    }

    pub fn h_inv(&self) -> &Matrix3<f64> {
        &self.h_inv
    }

    pub fn origin(&self) -> &Vector3<f64> {
        &self.origin
    }

    pub fn pbc(&self) -> &Vector3<bool> {
        &self.pbc
    }

    pub fn is_periodic(&self) -> bool {
        self.pbc.iter().any(|&p| p)
    }

    pub fn volume(&self) -> f64 {
        self.h.determinant().abs()
    }

    /// Returns the perpendicular widths of the cell (distances between parallel faces).
    /// d_i = 1 / |h_inv.row(i)|
    pub fn perpendicular_widths(&self) -> Vector3<f64> {
        Vector3::new(
            1.0 / self.h_inv.row(0).norm(),
            1.0 / self.h_inv.row(1).norm(),
            1.0 / self.h_inv.row(2).norm(),
        )
    }

    /// Wraps a position back into the box along periodic axes.
    pub fn wrap(&self, cart: &Vector3<f64>) -> Vector3<f64> {
        let mut frac = self.to_fractional(cart);
        for k in 0..3 {
            if self.pbc[k] {
                frac[k] -= frac[k].floor();
            }
        }
        self.to_cartesian(&frac)
    }

    /// Minimum image of `r_j` relative to `r_i`: the integer image shift and
    /// the displacement vector `r_j + h * shift - r_i`.
    pub fn get_shift_and_displacement(
        &self,
        r_i: &Vector3<f64>,
        r_j: &Vector3<f64>,
    ) -> (Vector3<i32>, Vector3<f64>) {
        let d_frac = self.h_inv * (r_j - r_i);
        let shift_frac = Vector3::new(
            if self.pbc.x { -d_frac.x.round() } else { 0.0 },
            if self.pbc.y { -d_frac.y.round() } else { 0.0 },
            if self.pbc.z { -d_frac.z.round() } else { 0.0 },
        );
        let shift = shift_frac.map(|s| s as i32);
        let disp = r_j + self.h * shift_frac - r_i;
        (shift, disp)
    }

    /// Cartesian translation of the periodic image `shift`.
    pub fn image_offset(&self, shift: &Vector3<i32>) -> Vector3<f64> {
        self.h * shift.map(|s| s as f64)
    }
}

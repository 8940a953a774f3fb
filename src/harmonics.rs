//! Complex spherical harmonics with the Condon-Shortley phase.

use nalgebra::{Complex, Vector3};
use std::f64::consts::PI;

/// Highest degree supported by [`spherical_harmonics`].
pub const MAX_DEGREE: u32 = 12;

/// Associated Legendre functions `P_l^m(x)` for `m = 0..=l`.
fn associated_legendre(l: usize, x: f64) -> Vec<f64> {
    let somx2 = ((1.0 - x) * (1.0 + x)).max(0.0).sqrt();
    let mut out = vec![0.0; l + 1];
    for (m, slot) in out.iter_mut().enumerate() {
        let mut pmm = 1.0;
        let mut fact = 1.0;
        for _ in 0..m {
            pmm *= -fact * somx2;
            fact += 2.0;
        }
        if l == m {
            *slot = pmm;
            continue;
        }
        let mut pmmp1 = x * (2 * m + 1) as f64 * pmm;
        for ll in (m + 2)..=l {
            let pll = (x * (2 * ll - 1) as f64 * pmmp1 - (ll + m - 1) as f64 * pmm)
                / (ll - m) as f64;
            pmm = pmmp1;
            pmmp1 = pll;
        }
        *slot = pmmp1;
    }
    out
}

/// `sqrt((2l+1)/(4π) · (l-m)!/(l+m)!)`
fn normalization(l: usize, m: usize) -> f64 {
    let ratio: f64 = ((l - m + 1)..=(l + m)).map(|k| 1.0 / k as f64).product();
    ((2 * l + 1) as f64 / (4.0 * PI) * ratio).sqrt()
}

/// `Y_lm` for `m = -l..=l` (index `m + l`) evaluated along `direction`.
///
/// `direction` need not be normalized but must be non-zero. Degrees above
/// [`MAX_DEGREE`] are accepted but lose precision.
pub fn spherical_harmonics(l: u32, direction: &Vector3<f64>) -> Vec<Complex<f64>> {
    let l = l as usize;
    let r = direction.norm();
    let cos_theta = (direction.z / r).clamp(-1.0, 1.0);
    let phi = direction.y.atan2(direction.x);

    let plm = associated_legendre(l, cos_theta);
    let mut out = vec![Complex::new(0.0, 0.0); 2 * l + 1];
    for m in 0..=l {
        let y = Complex::from_polar(normalization(l, m) * plm[m], m as f64 * phi);
        out[l + m] = y;
        if m > 0 {
            let sign = if m % 2 == 0 { 1.0 } else { -1.0 };
            out[l - m] = y.conj() * sign;
        }
    }
    out
}

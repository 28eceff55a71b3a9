use crate::geometry::cart2sphere;
use crate::gradients::GradientTable;
use ndarray::{Array1, Array2, ArrayView1, s};
use std::f64::consts::{PI, SQRT_2};
use thiserror::Error;

/// Value of the degree-0 spherical harmonic, `0.5 / sqrt(pi)`.
///
/// This is both the constant column used for isotropic tissue compartments
/// and the normalization applied when reading volume fractions back out of a
/// fitted coefficient vector.
pub const SH_CONST: f64 = 0.282_094_791_773_878_14;

#[derive(Error, Debug)]
pub enum BasisError {
    #[error(
        "multi-tissue deconvolution requires at least 2 tissue compartments, \
         but only {0} isotropic compartment(s) were requested"
    )]
    InvalidCompartments(usize),
}

/// Degree/order index lists for the symmetric (even-degree) real spherical
/// harmonic basis up to `sh_order`.
///
/// Degrees ascend and orders run `-n..=n` within each degree, giving
/// `(L+1)(L+2)/2` pairs for order `L`. Odd degrees carry no signal for
/// antipodally symmetric functions and are omitted.
pub fn sph_harm_ind_list(sh_order: usize) -> (Vec<i32>, Vec<i32>) {
    let count = (sh_order + 1) * (sh_order + 2) / 2;
    let mut m_list = Vec::with_capacity(count);
    let mut n_list = Vec::with_capacity(count);
    for degree in (0..=sh_order as i32).step_by(2) {
        for order in -degree..=degree {
            m_list.push(order);
            n_list.push(degree);
        }
    }
    (m_list, n_list)
}

/// Real spherical harmonic of order `m` and degree `n` at polar angle
/// `theta` and azimuth `phi`.
///
/// Follows the convention used throughout the crate: `sqrt(2)` times the
/// real part of `Y_n^|m|` for `m < 0`, the imaginary part for `m > 0`, and
/// the plain zonal harmonic for `m = 0`.
pub fn real_sph_harm(m: i32, n: i32, theta: f64, phi: f64) -> f64 {
    let ma = m.abs();
    let norm = ((2.0 * f64::from(n) + 1.0) / (4.0 * PI) * factorial_ratio(n, ma)).sqrt();
    let kp = norm * legendre_p(n, ma, theta.cos());
    if m > 0 {
        SQRT_2 * kp * (f64::from(m) * phi).sin()
    } else if m < 0 {
        SQRT_2 * kp * (f64::from(ma) * phi).cos()
    } else {
        kp
    }
}

/// Dense symmetric real SH basis sampled at the given angles, together with
/// the `(m, n)` index lists describing its columns.
pub fn real_sym_sh_basis(
    sh_order: usize,
    theta: ArrayView1<f64>,
    phi: ArrayView1<f64>,
) -> (Array2<f64>, Vec<i32>, Vec<i32>) {
    let (m_list, n_list) = sph_harm_ind_list(sh_order);
    let mut basis = Array2::zeros((theta.len(), m_list.len()));
    for (i, (&t, &p)) in theta.iter().zip(phi.iter()).enumerate() {
        for (j, (&mj, &nj)) in m_list.iter().zip(&n_list).enumerate() {
            basis[[i, j]] = real_sph_harm(mj, nj, t, p);
        }
    }
    (basis, m_list, n_list)
}

/// SH coefficients of a Dirac delta oriented at `(theta, phi)`, evaluated
/// over the given `(m, n)` index lists.
pub fn gen_dirac(m: &[i32], n: &[i32], theta: f64, phi: f64) -> Array1<f64> {
    Array1::from_iter(
        m.iter()
            .zip(n)
            .map(|(&mj, &nj)| real_sph_harm(mj, nj, theta, phi)),
    )
}

/// Builds the forward basis for multi-tissue deconvolution.
///
/// The leading `iso_comp` columns are the constant `SH_CONST`, one per
/// isotropic tissue compartment; the remaining columns sample the symmetric
/// SH basis at each gradient direction. On unweighted (b0) rows every
/// degree `n > 0` entry is forced to zero so those measurements only see
/// the isotropic part of the model.
pub fn multi_tissue_basis(
    gtab: &GradientTable,
    sh_order: usize,
    iso_comp: usize,
) -> Result<(Array2<f64>, Vec<i32>, Vec<i32>), BasisError> {
    if iso_comp < 1 {
        return Err(BasisError::InvalidCompartments(iso_comp));
    }
    let (m_list, n_list) = sph_harm_ind_list(sh_order);
    let mask = gtab.b0s_mask();
    let mut basis = Array2::zeros((gtab.len(), iso_comp + m_list.len()));
    basis.slice_mut(s![.., ..iso_comp]).fill(SH_CONST);
    for (i, bvec) in gtab.bvecs().rows().into_iter().enumerate() {
        let (_, theta, phi) = cart2sphere(bvec[0], bvec[1], bvec[2]);
        for (j, (&mj, &nj)) in m_list.iter().zip(&n_list).enumerate() {
            basis[[i, iso_comp + j]] = if mask[i] && nj > 0 {
                0.0
            } else {
                real_sph_harm(mj, nj, theta, phi)
            };
        }
    }
    Ok((basis, m_list, n_list))
}

/// Associated Legendre function `P_n^m(x)` including the Condon-Shortley
/// phase, via the standard three-term recurrence.
fn legendre_p(n: i32, m: i32, x: f64) -> f64 {
    debug_assert!(m >= 0 && m <= n);
    let mut pmm = 1.0;
    if m > 0 {
        let somx2 = ((1.0 - x) * (1.0 + x)).sqrt();
        let mut fact = 1.0;
        for _ in 0..m {
            pmm *= -fact * somx2;
            fact += 2.0;
        }
    }
    if n == m {
        return pmm;
    }
    let mut pmmp1 = x * (2.0 * f64::from(m) + 1.0) * pmm;
    if n == m + 1 {
        return pmmp1;
    }
    let mut pnm = 0.0;
    for k in (m + 2)..=n {
        pnm = ((2.0 * f64::from(k) - 1.0) * x * pmmp1 - f64::from(k + m - 1) * pmm)
            / f64::from(k - m);
        pmm = pmmp1;
        pmmp1 = pnm;
    }
    pnm
}

/// `(n - m)! / (n + m)!` as a float, computed without forming either
/// factorial.
fn factorial_ratio(n: i32, m: i32) -> f64 {
    let mut product = 1.0;
    for k in (n - m + 1)..=(n + m) {
        product *= f64::from(k);
    }
    1.0 / product
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradients::GradientTable;
    use ndarray::array;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    #[test]
    fn ind_list_order_and_count() {
        let (m, n) = sph_harm_ind_list(4);
        assert_eq!(m.len(), 15);
        assert_eq!(n[0], 0);
        assert_eq!(&m[1..6], &[-2, -1, 0, 1, 2]);
        assert_eq!(&n[1..6], &[2, 2, 2, 2, 2]);
        assert_eq!(&n[6..15], &[4; 9]);
    }

    #[test]
    fn zonal_harmonics_at_pole() {
        // At the pole only m = 0 terms survive, with value sqrt((2n+1)/4pi).
        for degree in [0, 2, 4, 6] {
            let expected = ((2.0 * f64::from(degree) + 1.0) / (4.0 * PI)).sqrt();
            assert!((real_sph_harm(0, degree, 0.0, 0.0) - expected).abs() < 1e-12);
        }
        assert!(real_sph_harm(2, 2, 0.0, 0.3).abs() < 1e-12);
        assert!(real_sph_harm(-1, 4, 0.0, 1.1).abs() < 1e-12);
    }

    #[test]
    fn degree_zero_is_sh_const() {
        assert!((real_sph_harm(0, 0, 1.2, -0.7) - SH_CONST).abs() < 1e-15);
        assert!((SH_CONST - 0.5 / PI.sqrt()).abs() < 1e-15);
    }

    #[test]
    fn known_values_on_equator() {
        // Y_2^0 at theta = pi/2 is -0.5 * sqrt(5/4pi).
        let expected = -0.5 * (5.0 / (4.0 * PI)).sqrt();
        assert!((real_sph_harm(0, 2, FRAC_PI_2, 0.0) - expected).abs() < 1e-12);

        // The m = 2 sectoral harmonic at theta = pi/2, phi = pi/4 equals
        // (1/4) sqrt(15/pi).
        let expected = 0.25 * (15.0 / PI).sqrt();
        assert!((real_sph_harm(2, 2, FRAC_PI_2, FRAC_PI_4) - expected).abs() < 1e-12);
    }

    #[test]
    fn basis_zeroes_anisotropic_entries_on_b0_rows() {
        let bvals = array![0.0, 1000.0, 2000.0];
        let bvecs = array![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.6, 0.8]];
        let gtab = GradientTable::new(bvals, bvecs).unwrap();
        let (basis, _, n) = multi_tissue_basis(&gtab, 4, 2).unwrap();
        assert_eq!(basis.ncols(), 2 + 15);
        for (j, &nj) in n.iter().enumerate() {
            if nj > 0 {
                assert_eq!(basis[[0, 2 + j]], 0.0, "b0 row leaked degree {nj}");
            }
        }
        // Degree 0 survives on b0 rows, and the iso columns are constant.
        assert!((basis[[0, 2]] - SH_CONST).abs() < 1e-12);
        for i in 0..3 {
            assert!((basis[[i, 0]] - SH_CONST).abs() < 1e-15);
            assert!((basis[[i, 1]] - SH_CONST).abs() < 1e-15);
        }
    }

    #[test]
    fn basis_rejects_zero_compartments() {
        let gtab = GradientTable::new(array![1000.0], array![[1.0, 0.0, 0.0]]).unwrap();
        assert!(matches!(
            multi_tissue_basis(&gtab, 4, 0).unwrap_err(),
            BasisError::InvalidCompartments(0)
        ));
    }
}

use crate::basis::{SH_CONST, gen_dirac, real_sph_harm};
use crate::geometry::{cart2sphere, sphere2cart, vec2vec_rotmat};
use crate::gradients::GradientTable;
use crate::response::MultiShellResponse;
use crate::solver::{ConvexSolver, SolverError};
use crate::sphere::Sphere;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, Axis, array, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Strategy for building the reference single-fiber delta kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaForm {
    /// Directly sample a Dirac response along the reference axis.
    Basic,
    /// Optimize the sampled response so it never dips below zero on the
    /// regularization sphere.
    PositivityConstrained,
}

#[derive(Error, Debug)]
pub enum KernelError {
    #[error(
        "response and target degrees do not match: max target degree {max_degree} \
         is outside the response's sh_order {sh_order}"
    )]
    DegreeMismatch { max_degree: i32, sh_order: usize },

    #[error("target degree {0} is odd; symmetric deconvolution uses even degrees only")]
    OddDegree(i32),

    #[error("positivity-constrained delta optimization failed: {0}")]
    Solver(#[from] SolverError),
}

/// Builds the delta kernel for the requested policy.
///
/// `m` and `n` are the response's zonal index lists and `(theta, phi)` the
/// reference fiber orientation. The returned vector has one entry per
/// isotropic compartment followed by one per even degree.
pub fn delta_kernel(
    form: DeltaForm,
    iso: usize,
    m: &[i32],
    n: &[i32],
    theta: f64,
    phi: f64,
    reg_sphere: &Sphere,
    solver: &dyn ConvexSolver,
) -> Result<Array1<f64>, KernelError> {
    match form {
        DeltaForm::Basic => Ok(basic_delta(iso, m, n, theta, phi)),
        DeltaForm::PositivityConstrained => {
            pos_constrained_delta(iso, m, n, theta, phi, reg_sphere, solver)
        }
    }
}

/// Dirac-like single-fiber response: `iso` copies of the normalization
/// constant followed by the Dirac SH sample at the reference orientation.
pub fn basic_delta(iso: usize, m: &[i32], n: &[i32], theta: f64, phi: f64) -> Array1<f64> {
    let wm = gen_dirac(m, n, theta, phi);
    let mut out = Array1::from_elem(iso + wm.len(), SH_CONST);
    out.slice_mut(s![iso..]).assign(&wm);
    out
}

/// Delta kernel optimized to avoid negative lobes.
///
/// The regularization sphere is rotated so its first vertex lands on the
/// reference orientation, the degree > 0 response basis is sampled at the
/// rotated vertices, and a linear program maximizes the response at the
/// reference direction while keeping the anisotropic part above
/// `-SH_CONST^2` at every vertex. Since the pinned degree-0 term contributes
/// exactly `SH_CONST^2`, that floor keeps the total sampled response
/// non-negative. The cap is enforced per vertex, not analytically.
fn pos_constrained_delta(
    iso: usize,
    m: &[i32],
    n: &[i32],
    theta: f64,
    phi: f64,
    reg_sphere: &Sphere,
    solver: &dyn ConvexSolver,
) -> Result<Array1<f64>, KernelError> {
    let (x, y, z) = sphere2cart(1.0, theta, phi);
    let target = array![x, y, z];
    let rot = vec2vec_rotmat(reg_sphere.vertices().row(0), target.view());
    let rotated = reg_sphere.vertices().dot(&rot.t());

    let mut basis = Array2::zeros((rotated.nrows(), n.len()));
    for (i, vertex) in rotated.rows().into_iter().enumerate() {
        let (_, t, p) = cart2sphere(vertex[0], vertex[1], vertex[2]);
        for (j, (&mj, &nj)) in m.iter().zip(n).enumerate() {
            basis[[i, j]] = real_sph_harm(mj, nj, t, p);
        }
    }

    let aniso: Vec<usize> = n.iter().positions(|&nj| nj != 0).collect();
    let sampled = basis.select(Axis(1), &aniso);
    let at_reference = sampled.row(0).to_owned();
    let constraint = sampled.mapv(|v| -v);
    let bound = Array1::from_elem(sampled.nrows(), SH_CONST * SH_CONST);

    let optimized = solver.linear(at_reference.view(), constraint.view(), bound.view())?;

    let mut out = Array1::from_elem(iso + n.len(), SH_CONST);
    for (k, &j) in aniso.iter().enumerate() {
        out[iso + j] = optimized[k];
    }
    Ok(out)
}

/// Maps the coarse (shell x degree) response onto the dense
/// (gradient direction x basis column) multiplier matrix.
///
/// Every target degree must be even and representable by the response's SH
/// order. Each gradient direction takes its response row from the nearest
/// shell by absolute b-value difference, ties going to the lower shell
/// index, and the gathered values are divided by the delta kernel entry of
/// the same column.
pub fn inflate_response(
    response: &MultiShellResponse,
    gtab: &GradientTable,
    n: &[i32],
    delta: ArrayView1<f64>,
) -> Result<Array2<f64>, KernelError> {
    if let Some(&odd) = n.iter().find(|&&d| d % 2 != 0) {
        return Err(KernelError::OddDegree(odd));
    }
    let max_degree = n.iter().copied().max().unwrap_or(0);
    if (max_degree / 2) as usize >= response.sh_order() {
        return Err(KernelError::DegreeMismatch {
            max_degree,
            sh_order: response.sh_order(),
        });
    }

    let iso = response.iso();
    let mut col_idx = Vec::with_capacity(iso + n.len());
    col_idx.extend(0..iso);
    col_idx.extend(n.iter().map(|&d| (d / 2) as usize + iso));

    let mut kernel = response.response().to_owned();
    for mut row in kernel.rows_mut() {
        row /= &delta;
    }

    let shells = response.shells();
    let mut out = Array2::zeros((gtab.len(), col_idx.len()));
    for (g, &bval) in gtab.bvals().iter().enumerate() {
        let shell = closest_shell(shells, bval);
        for (j, &cj) in col_idx.iter().enumerate() {
            out[[g, j]] = kernel[[shell, cj]];
        }
    }
    Ok(out)
}

/// Index of the shell whose b-value is nearest to `bval`. Ties resolve to
/// the lowest shell index.
fn closest_shell(shells: ArrayView1<f64>, bval: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &shell) in shells.iter().enumerate() {
        let dist = (shell - bval).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::ClarabelSolver;
    use ndarray::array;
    use std::f64::consts::PI;

    fn zonal_lists(sh_order: usize) -> (Vec<i32>, Vec<i32>) {
        let n: Vec<i32> = (0..=sh_order as i32).step_by(2).collect();
        (vec![0; n.len()], n)
    }

    #[test]
    fn basic_delta_shape_and_iso_entries() {
        let (m, n) = zonal_lists(8);
        let delta = basic_delta(2, &m, &n, 0.0, 0.0);
        assert_eq!(delta.len(), 2 + 5);
        assert!((delta[0] - SH_CONST).abs() < 1e-15);
        assert!((delta[1] - SH_CONST).abs() < 1e-15);
        // Dirac entries at the pole are sqrt((2n+1)/4pi).
        for (k, &degree) in n.iter().enumerate() {
            let expected = ((2.0 * f64::from(degree) + 1.0) / (4.0 * PI)).sqrt();
            assert!((delta[2 + k] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn positivity_constrained_delta_respects_floor() {
        let (m, n) = zonal_lists(8);
        let sphere = Sphere::default();
        let delta = delta_kernel(
            DeltaForm::PositivityConstrained,
            2,
            &m,
            &n,
            0.0,
            0.0,
            &sphere,
            &ClarabelSolver,
        )
        .unwrap();
        assert_eq!(delta.len(), 2 + 5);
        // Degree 0 stays pinned at the normalization constant.
        assert!((delta[2] - SH_CONST).abs() < 1e-15);

        // The optimized response must stay above -SH_CONST^2 wherever the
        // constraint was sampled. Vertex 0 is the reference orientation.
        let (theta, phi) = sphere.angles();
        for (i, (&t, &p)) in theta.iter().zip(phi.iter()).enumerate() {
            let mut value = 0.0;
            for (k, &degree) in n.iter().enumerate() {
                if degree != 0 {
                    value += delta[2 + k] * real_sph_harm(0, degree, t, p);
                }
            }
            assert!(
                value >= -SH_CONST * SH_CONST - 1e-6,
                "vertex {i} dipped to {value}"
            );
        }
    }

    #[test]
    fn closest_shell_prefers_nearest() {
        let shells = array![0.0, 1000.0, 2000.0];
        assert_eq!(closest_shell(shells.view(), 1490.0), 1);
        assert_eq!(closest_shell(shells.view(), 1510.0), 2);
        assert_eq!(closest_shell(shells.view(), 30.0), 0);
    }

    #[test]
    fn closest_shell_ties_go_to_lower_index() {
        let shells = array![0.0, 1000.0, 2000.0];
        assert_eq!(closest_shell(shells.view(), 1500.0), 1);
        assert_eq!(closest_shell(shells.view(), 500.0), 0);
    }

    #[test]
    fn inflate_rejects_excess_degree() {
        let response =
            MultiShellResponse::new(Array2::ones((1, 3)), 2, array![1000.0]).unwrap();
        let delta = Array1::ones(3);
        // Degree 4 needs sh_order > 2.
        let err = inflate_response(
            &response,
            &GradientTable::new(array![1000.0], array![[1.0, 0.0, 0.0]]).unwrap(),
            &[0, 2, 4],
            delta.view(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            KernelError::DegreeMismatch { max_degree: 4, sh_order: 2 }
        ));
    }

    #[test]
    fn inflate_rejects_odd_degree() {
        let response =
            MultiShellResponse::new(Array2::ones((1, 4)), 4, array![1000.0]).unwrap();
        let delta = Array1::ones(4);
        let err = inflate_response(
            &response,
            &GradientTable::new(array![1000.0], array![[1.0, 0.0, 0.0]]).unwrap(),
            &[0, 2, 3],
            delta.view(),
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::OddDegree(3)));
    }

    #[test]
    fn inflate_gathers_nearest_shell_and_divides_by_delta() {
        // Two shells, sh_order 2, one iso compartment: columns are
        // [iso, n0, n2].
        let response = MultiShellResponse::new(
            array![[1.0, 2.0, 4.0], [3.0, 6.0, 12.0]],
            2,
            array![1000.0, 2000.0],
        )
        .unwrap();
        let gtab = GradientTable::new(
            array![900.0, 2100.0],
            array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        )
        .unwrap();
        let delta = array![1.0, 2.0, 4.0];
        let out = inflate_response(&response, &gtab, &[0, 2], delta.view()).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        // Row 0 comes from shell 1000: [1/1, 2/2, 4/4].
        assert_eq!(out.row(0).to_vec(), vec![1.0, 1.0, 1.0]);
        // Row 1 comes from shell 2000: [3/1, 6/2, 12/4].
        assert_eq!(out.row(1).to_vec(), vec![3.0, 3.0, 3.0]);
    }
}

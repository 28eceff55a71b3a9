use ndarray::{Array2, ArrayView1};

/// Converts a Cartesian vector to spherical coordinates `(r, theta, phi)`.
///
/// `theta` is the polar (colatitudinal) angle measured from the +z axis and
/// `phi` the azimuthal angle in the x-y plane. The zero vector maps to zero
/// angles so that degenerate rows (unweighted measurements) stay finite.
pub fn cart2sphere(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let r = (x * x + y * y + z * z).sqrt();
    if r == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let theta = (z / r).clamp(-1.0, 1.0).acos();
    let phi = y.atan2(x);
    (r, theta, phi)
}

/// Inverse of [`cart2sphere`].
pub fn sphere2cart(r: f64, theta: f64, phi: f64) -> (f64, f64, f64) {
    let st = theta.sin();
    (r * st * phi.cos(), r * st * phi.sin(), r * theta.cos())
}

/// Returns the rotation matrix that maps the unit vector `u` onto `v`.
///
/// Uses Rodrigues' formula. When `u` and `v` are antiparallel the axis of
/// rotation is underdetermined; any axis orthogonal to `u` gives a valid
/// half-turn, and we pick one deterministically from the coordinate axis
/// least aligned with `u`.
pub fn vec2vec_rotmat(u: ArrayView1<f64>, v: ArrayView1<f64>) -> Array2<f64> {
    let u = normalize(u);
    let v = normalize(v);

    let w = cross(&u, &v);
    let s = (w[0] * w[0] + w[1] * w[1] + w[2] * w[2]).sqrt();
    let c = u[0] * v[0] + u[1] * v[1] + u[2] * v[2];

    if s < 1e-12 {
        if c > 0.0 {
            return Array2::eye(3);
        }
        // Antipodal: half-turn about an axis orthogonal to u.
        let axis = orthogonal_axis(&u);
        let mut rot = Array2::from_elem((3, 3), 0.0);
        for i in 0..3 {
            for j in 0..3 {
                let delta = if i == j { 1.0 } else { 0.0 };
                rot[[i, j]] = 2.0 * axis[i] * axis[j] - delta;
            }
        }
        return rot;
    }

    let k = skew(&w);
    let k2 = k.dot(&k);
    Array2::eye(3) + &k + &(k2 * ((1.0 - c) / (s * s)))
}

fn normalize(v: ArrayView1<f64>) -> [f64; 3] {
    let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    [v[0] / norm, v[1] / norm, v[2] / norm]
}

fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn skew(w: &[f64; 3]) -> Array2<f64> {
    let mut k = Array2::zeros((3, 3));
    k[[0, 1]] = -w[2];
    k[[0, 2]] = w[1];
    k[[1, 0]] = w[2];
    k[[1, 2]] = -w[0];
    k[[2, 0]] = -w[1];
    k[[2, 1]] = w[0];
    k
}

fn orthogonal_axis(u: &[f64; 3]) -> [f64; 3] {
    // Coordinate axis least aligned with u, projected onto u's orthogonal plane.
    let (ax, ay, az) = (u[0].abs(), u[1].abs(), u[2].abs());
    let e: [f64; 3] = if ax <= ay && ax <= az {
        [1.0, 0.0, 0.0]
    } else if ay <= az {
        [0.0, 1.0, 0.0]
    } else {
        [0.0, 0.0, 1.0]
    };
    let d = e[0] * u[0] + e[1] * u[1] + e[2] * u[2];
    let raw = [e[0] - d * u[0], e[1] - d * u[1], e[2] - d * u[2]];
    let norm = (raw[0] * raw[0] + raw[1] * raw[1] + raw[2] * raw[2]).sqrt();
    [raw[0] / norm, raw[1] / norm, raw[2] / norm]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn det3(m: &Array2<f64>) -> f64 {
        m[[0, 0]] * (m[[1, 1]] * m[[2, 2]] - m[[1, 2]] * m[[2, 1]])
            - m[[0, 1]] * (m[[1, 0]] * m[[2, 2]] - m[[1, 2]] * m[[2, 0]])
            + m[[0, 2]] * (m[[1, 0]] * m[[2, 1]] - m[[1, 1]] * m[[2, 0]])
    }

    #[test]
    fn cart2sphere_axes() {
        let (r, theta, phi) = cart2sphere(0.0, 0.0, 1.0);
        assert!((r - 1.0).abs() < 1e-12);
        assert!(theta.abs() < 1e-12);
        assert!(phi.abs() < 1e-12);

        let (_, theta, phi) = cart2sphere(0.0, 2.0, 0.0);
        assert!((theta - FRAC_PI_2).abs() < 1e-12);
        assert!((phi - FRAC_PI_2).abs() < 1e-12);

        let (_, theta, _) = cart2sphere(0.0, 0.0, -3.0);
        assert!((theta - PI).abs() < 1e-12);
    }

    #[test]
    fn cart2sphere_zero_vector_is_finite() {
        let (r, theta, phi) = cart2sphere(0.0, 0.0, 0.0);
        assert_eq!((r, theta, phi), (0.0, 0.0, 0.0));
    }

    #[test]
    fn sphere_round_trip() {
        let (x, y, z) = (0.3, -0.5, 0.81);
        let (r, theta, phi) = cart2sphere(x, y, z);
        let (x2, y2, z2) = sphere2cart(r, theta, phi);
        assert!((x - x2).abs() < 1e-12);
        assert!((y - y2).abs() < 1e-12);
        assert!((z - z2).abs() < 1e-12);
    }

    #[test]
    fn rotmat_maps_u_onto_v() {
        let u = array![1.0, 0.0, 0.0];
        let v = array![0.0, 0.6, 0.8];
        let rot = vec2vec_rotmat(u.view(), v.view());
        let mapped = rot.dot(&u);
        for i in 0..3 {
            assert!((mapped[i] - v[i]).abs() < 1e-12, "component {i} mismatch");
        }
        assert!((det3(&rot) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn rotmat_identity_for_parallel() {
        let u = array![0.0, 0.0, 1.0];
        let rot = vec2vec_rotmat(u.view(), u.view());
        assert!((&rot - &Array2::<f64>::eye(3)).iter().all(|d| d.abs() < 1e-12));
    }

    #[test]
    fn rotmat_antipodal_is_proper_half_turn() {
        let u = array![0.0, 0.0, 1.0];
        let v = array![0.0, 0.0, -1.0];
        let rot = vec2vec_rotmat(u.view(), v.view());
        let mapped = rot.dot(&u);
        for i in 0..3 {
            assert!((mapped[i] - v[i]).abs() < 1e-12);
        }
        assert!((det3(&rot) - 1.0).abs() < 1e-10);
    }
}

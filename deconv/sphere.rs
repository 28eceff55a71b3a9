use crate::geometry::cart2sphere;
use ndarray::{Array1, Array2, ArrayView2};
use std::collections::HashMap;

/// An immutable set of unit vectors on the sphere.
///
/// Used to discretize the fiber orientation distribution for the positivity
/// constraint. Construction normalizes every row, so callers may hand in any
/// non-zero vertex set.
#[derive(Debug, Clone)]
pub struct Sphere {
    vertices: Array2<f64>,
}

impl Sphere {
    pub fn new(mut vertices: Array2<f64>) -> Self {
        assert_eq!(vertices.ncols(), 3, "sphere vertices must be 3-D");
        for mut row in vertices.rows_mut() {
            let norm = (row[0] * row[0] + row[1] * row[1] + row[2] * row[2]).sqrt();
            if norm > 0.0 {
                row /= norm;
            }
        }
        Self { vertices }
    }

    /// Builds a sphere by repeatedly subdividing an icosahedron and
    /// projecting the midpoints back onto the unit sphere.
    ///
    /// Vertex counts grow as 12, 42, 162, 642, ... per subdivision level.
    /// The tessellation is deterministic and antipodally symmetric.
    pub fn icosphere(subdivisions: usize) -> Self {
        let t = (1.0 + 5.0_f64.sqrt()) / 2.0;
        let mut vertices: Vec<[f64; 3]> = vec![
            [-1.0, t, 0.0],
            [1.0, t, 0.0],
            [-1.0, -t, 0.0],
            [1.0, -t, 0.0],
            [0.0, -1.0, t],
            [0.0, 1.0, t],
            [0.0, -1.0, -t],
            [0.0, 1.0, -t],
            [t, 0.0, -1.0],
            [t, 0.0, 1.0],
            [-t, 0.0, -1.0],
            [-t, 0.0, 1.0],
        ];
        let mut faces: Vec<[usize; 3]> = vec![
            [0, 11, 5],
            [0, 5, 1],
            [0, 1, 7],
            [0, 7, 10],
            [0, 10, 11],
            [1, 5, 9],
            [5, 11, 4],
            [11, 10, 2],
            [10, 7, 6],
            [7, 1, 8],
            [3, 9, 4],
            [3, 4, 2],
            [3, 2, 6],
            [3, 6, 8],
            [3, 8, 9],
            [4, 9, 5],
            [2, 4, 11],
            [6, 2, 10],
            [8, 6, 7],
            [9, 8, 1],
        ];

        for _ in 0..subdivisions {
            let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
            let mut next_faces = Vec::with_capacity(faces.len() * 4);
            for face in &faces {
                let ab = midpoint(&mut vertices, &mut midpoints, face[0], face[1]);
                let bc = midpoint(&mut vertices, &mut midpoints, face[1], face[2]);
                let ca = midpoint(&mut vertices, &mut midpoints, face[2], face[0]);
                next_faces.push([face[0], ab, ca]);
                next_faces.push([face[1], bc, ab]);
                next_faces.push([face[2], ca, bc]);
                next_faces.push([ab, bc, ca]);
            }
            faces = next_faces;
        }

        let mut array = Array2::zeros((vertices.len(), 3));
        for (i, v) in vertices.iter().enumerate() {
            let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            array[[i, 0]] = v[0] / norm;
            array[[i, 1]] = v[1] / norm;
            array[[i, 2]] = v[2] / norm;
        }
        Self { vertices: array }
    }

    pub fn vertices(&self) -> ArrayView2<'_, f64> {
        self.vertices.view()
    }

    pub fn len(&self) -> usize {
        self.vertices.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.nrows() == 0
    }

    /// Polar and azimuthal angles of every vertex.
    pub fn angles(&self) -> (Array1<f64>, Array1<f64>) {
        let mut theta = Array1::zeros(self.len());
        let mut phi = Array1::zeros(self.len());
        for (i, row) in self.vertices.rows().into_iter().enumerate() {
            let (_, t, p) = cart2sphere(row[0], row[1], row[2]);
            theta[i] = t;
            phi[i] = p;
        }
        (theta, phi)
    }
}

impl Default for Sphere {
    /// Two icosahedral subdivisions (162 vertices), the crate's default
    /// regularization sphere.
    fn default() -> Self {
        Self::icosphere(2)
    }
}

fn midpoint(
    vertices: &mut Vec<[f64; 3]>,
    cache: &mut HashMap<(usize, usize), usize>,
    a: usize,
    b: usize,
) -> usize {
    let key = (a.min(b), a.max(b));
    if let Some(&idx) = cache.get(&key) {
        return idx;
    }
    let va = vertices[a];
    let vb = vertices[b];
    vertices.push([
        (va[0] + vb[0]) / 2.0,
        (va[1] + vb[1]) / 2.0,
        (va[2] + vb[2]) / 2.0,
    ]);
    let idx = vertices.len() - 1;
    cache.insert(key, idx);
    idx
}

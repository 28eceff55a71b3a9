use crate::solver::{ClarabelSolver, ConvexSolver, SolverError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::SVD;
use thiserror::Error;

/// Relative tolerance on singular values when checking the Gram matrix rank.
const RANK_TOL: f64 = 1e-8;

#[derive(Error, Debug)]
pub enum FitterError {
    #[error(
        "Gram matrix of the forward operator is rank deficient (rank {rank} of {dim}); \
         the model has more basis functions than the acquisition can resolve"
    )]
    RankDeficient { rank: usize, dim: usize },

    #[error("singular value decomposition failed during the rank check: {0}")]
    Svd(#[from] ndarray_linalg::error::LinalgError),

    #[error("signal has {found} measurements but the model was built for {expected}")]
    SignalLength { found: usize, expected: usize },

    #[error("per-voxel deconvolution failed: {0}")]
    Solver(#[from] SolverError),
}

/// Per-voxel quadratic-program fitter.
///
/// Built once per model from the forward operator `X` and the
/// regularization operator; holds only immutable state afterwards, so one
/// instance can serve any number of concurrent voxel fits.
pub struct QpFitter {
    x: Array2<f64>,
    gram: Array2<f64>,
    // Negated regularization operator and zero right-hand side, encoding
    // reg . x >= 0 as an inequality in G x <= h form.
    constraint: Array2<f64>,
    bound: Array1<f64>,
    solver: Box<dyn ConvexSolver>,
}

impl std::fmt::Debug for QpFitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `Box<dyn ConvexSolver>` is not `Debug`; show the data fields and
        // elide the solver so `QpFitter` can satisfy `Debug` bounds (e.g.
        // `Result::unwrap_err`).
        f.debug_struct("QpFitter")
            .field("x", &self.x)
            .field("gram", &self.gram)
            .field("constraint", &self.constraint)
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}

impl QpFitter {
    pub fn new(x: Array2<f64>, reg: ArrayView2<f64>) -> Result<Self, FitterError> {
        Self::with_solver(x, reg, Box::new(ClarabelSolver))
    }

    pub fn with_solver(
        x: Array2<f64>,
        reg: ArrayView2<f64>,
        solver: Box<dyn ConvexSolver>,
    ) -> Result<Self, FitterError> {
        let gram = x.t().dot(&x);

        // Super-resolved configurations are unsupported: every coefficient
        // must be determined by the data.
        let rank = effective_rank(gram.view())?;
        if rank != gram.nrows() {
            return Err(FitterError::RankDeficient {
                rank,
                dim: gram.nrows(),
            });
        }

        let constraint = reg.mapv(|v| -v);
        let bound = Array1::zeros(reg.nrows());
        Ok(Self {
            x,
            gram,
            constraint,
            bound,
            solver,
        })
    }

    /// Solves one voxel: minimize `0.5 x' (X'X) x - (X's)' x` subject to the
    /// FOD staying non-negative on the regularization sphere. Solver
    /// failures surface to the caller untouched; there is no retry.
    pub fn fit(&self, signal: ArrayView1<f64>) -> Result<Array1<f64>, FitterError> {
        if signal.len() != self.x.nrows() {
            return Err(FitterError::SignalLength {
                found: signal.len(),
                expected: self.x.nrows(),
            });
        }
        let q = self.x.t().dot(&signal).mapv(std::ops::Neg::neg);
        let coeff = self.solver.quadratic(
            self.gram.view(),
            q.view(),
            self.constraint.view(),
            self.bound.view(),
        )?;
        Ok(coeff)
    }

    pub fn num_coefficients(&self) -> usize {
        self.gram.nrows()
    }
}

/// Number of singular values above `RANK_TOL` relative to the largest.
fn effective_rank(a: ArrayView2<f64>) -> Result<usize, FitterError> {
    let (_, singular, _) = a.svd(false, false)?;
    let threshold = singular.first().copied().unwrap_or(0.0) * RANK_TOL;
    Ok(singular.iter().filter(|&&v| v > threshold).count())
}

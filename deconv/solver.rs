use clarabel::algebra::CscMatrix;
use clarabel::solver::{DefaultSettings, DefaultSolver, IPSolver, SolverStatus, SupportedConeT};
use ndarray::{Array1, ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("the optimization problem is infeasible ({0})")]
    Infeasible(String),

    #[error("the solver failed to converge ({0})")]
    NonConvergence(String),
}

/// Narrow boundary around the convex optimization backend.
///
/// The deconvolution code only ever poses two problem shapes, so the trait
/// exposes exactly those and nothing else; swapping the backend means
/// implementing these two methods. Implementations must be shareable across
/// threads since one model instance serves many concurrent voxel fits.
pub trait ConvexSolver: Send + Sync {
    /// Minimize `0.5 x' P x + q' x` subject to `G x <= h`.
    fn quadratic(
        &self,
        p: ArrayView2<f64>,
        q: ArrayView1<f64>,
        g: ArrayView2<f64>,
        h: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SolverError>;

    /// Maximize `c . x` subject to `G x <= h`.
    fn linear(
        &self,
        c: ArrayView1<f64>,
        g: ArrayView2<f64>,
        h: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SolverError>;
}

/// Interior-point backend on the pure-Rust Clarabel solver.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClarabelSolver;

impl ClarabelSolver {
    fn solve(
        &self,
        p: &CscMatrix<f64>,
        q: &[f64],
        g: ArrayView2<f64>,
        h: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SolverError> {
        let a = dense_to_csc(g);
        let b: Vec<f64> = h.to_vec();
        let cones = [SupportedConeT::NonnegativeConeT(b.len())];
        let mut settings = DefaultSettings::default();
        settings.verbose = false;

        let mut solver = DefaultSolver::new(p, q, &a, &b, &cones, settings);
        solver.solve();

        match solver.solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {
                Ok(Array1::from_vec(solver.solution.x.clone()))
            }
            status @ (SolverStatus::PrimalInfeasible
            | SolverStatus::DualInfeasible
            | SolverStatus::AlmostPrimalInfeasible
            | SolverStatus::AlmostDualInfeasible) => {
                Err(SolverError::Infeasible(format!("{status:?}")))
            }
            status => Err(SolverError::NonConvergence(format!("{status:?}"))),
        }
    }
}

impl ConvexSolver for ClarabelSolver {
    fn quadratic(
        &self,
        p: ArrayView2<f64>,
        q: ArrayView1<f64>,
        g: ArrayView2<f64>,
        h: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SolverError> {
        let p_triu = dense_to_upper_csc(p);
        self.solve(&p_triu, q.to_vec().as_slice(), g, h)
    }

    fn linear(
        &self,
        c: ArrayView1<f64>,
        g: ArrayView2<f64>,
        h: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SolverError> {
        let nvar = c.len();
        let p = CscMatrix::new(nvar, nvar, vec![0; nvar + 1], vec![], vec![]);
        let q: Vec<f64> = c.iter().map(|v| -v).collect();
        self.solve(&p, &q, g, h)
    }
}

fn dense_to_csc(m: ArrayView2<f64>) -> CscMatrix<f64> {
    let (rows, cols) = m.dim();
    let mut colptr = Vec::with_capacity(cols + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for j in 0..cols {
        for i in 0..rows {
            let v = m[[i, j]];
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr.push(rowval.len());
    }
    CscMatrix::new(rows, cols, colptr, rowval, nzval)
}

/// Clarabel expects the quadratic objective in upper-triangular form.
fn dense_to_upper_csc(m: ArrayView2<f64>) -> CscMatrix<f64> {
    let (rows, cols) = m.dim();
    let mut colptr = Vec::with_capacity(cols + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for j in 0..cols {
        for i in 0..=j.min(rows.saturating_sub(1)) {
            let v = m[[i, j]];
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr.push(rowval.len());
    }
    CscMatrix::new(rows, cols, colptr, rowval, nzval)
}

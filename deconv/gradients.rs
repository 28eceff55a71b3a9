use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

/// b-values at or below this are treated as unweighted (b0) measurements.
pub const DEFAULT_B0_THRESHOLD: f64 = 50.0;

#[derive(Error, Debug)]
pub enum GradientError {
    #[error("gradient table has {bvals} b-values but {bvecs} direction rows")]
    LengthMismatch { bvals: usize, bvecs: usize },

    #[error("gradient directions must have 3 columns, found {0}")]
    NotThreeColumns(usize),
}

/// An ordered multi-shell diffusion acquisition scheme.
///
/// Holds one b-value and one gradient direction per measurement, plus the
/// threshold separating unweighted (b0) rows from diffusion-weighted ones.
/// Immutable once constructed.
#[derive(Debug, Clone)]
pub struct GradientTable {
    bvals: Array1<f64>,
    bvecs: Array2<f64>,
    b0_threshold: f64,
}

impl GradientTable {
    pub fn new(bvals: Array1<f64>, bvecs: Array2<f64>) -> Result<Self, GradientError> {
        Self::with_b0_threshold(bvals, bvecs, DEFAULT_B0_THRESHOLD)
    }

    pub fn with_b0_threshold(
        bvals: Array1<f64>,
        bvecs: Array2<f64>,
        b0_threshold: f64,
    ) -> Result<Self, GradientError> {
        if bvecs.ncols() != 3 {
            return Err(GradientError::NotThreeColumns(bvecs.ncols()));
        }
        if bvals.len() != bvecs.nrows() {
            return Err(GradientError::LengthMismatch {
                bvals: bvals.len(),
                bvecs: bvecs.nrows(),
            });
        }
        Ok(Self {
            bvals,
            bvecs,
            b0_threshold,
        })
    }

    pub fn bvals(&self) -> ArrayView1<'_, f64> {
        self.bvals.view()
    }

    pub fn bvecs(&self) -> ArrayView2<'_, f64> {
        self.bvecs.view()
    }

    pub fn b0_threshold(&self) -> f64 {
        self.b0_threshold
    }

    /// True for every measurement with no effective diffusion weighting.
    pub fn b0s_mask(&self) -> Vec<bool> {
        self.bvals.iter().map(|&b| b <= self.b0_threshold).collect()
    }

    pub fn len(&self) -> usize {
        self.bvals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bvals.is_empty()
    }
}

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("response sh_order must be even, but was {0}")]
    OddShOrder(usize),

    #[error(
        "sh_order and shape of response do not agree: {cols} columns leave no \
         isotropic compartment at sh_order {sh_order}"
    )]
    InvalidCompartments { cols: usize, sh_order: usize },

    #[error("response has {rows} shell rows but {shells} shell b-values")]
    ShellCountMismatch { rows: usize, shells: usize },
}

/// Per-tissue, per-shell signal attenuation model.
///
/// Each row describes one shell; the leading columns hold the isotropic
/// compartment responses and the remaining `sh_order/2 + 1` columns hold the
/// zonal (m = 0) response per even spherical-harmonic degree. The number of
/// isotropic compartments is derived from the shape, and at least one is
/// required.
#[derive(Debug, Clone)]
pub struct MultiShellResponse {
    response: Array2<f64>,
    sh_order: usize,
    shells: Array1<f64>,
}

impl MultiShellResponse {
    pub fn new(
        response: Array2<f64>,
        sh_order: usize,
        shells: Array1<f64>,
    ) -> Result<Self, ResponseError> {
        if sh_order % 2 != 0 {
            return Err(ResponseError::OddShOrder(sh_order));
        }
        let degrees = sh_order / 2 + 1;
        if response.ncols() < degrees + 1 {
            return Err(ResponseError::InvalidCompartments {
                cols: response.ncols(),
                sh_order,
            });
        }
        if response.nrows() != shells.len() {
            return Err(ResponseError::ShellCountMismatch {
                rows: response.nrows(),
                shells: shells.len(),
            });
        }
        Ok(Self {
            response,
            sh_order,
            shells,
        })
    }

    /// Number of isotropic tissue compartments encoded in the shape.
    pub fn iso(&self) -> usize {
        self.response.ncols() - self.sh_order / 2 - 1
    }

    pub fn sh_order(&self) -> usize {
        self.sh_order
    }

    pub fn response(&self) -> ArrayView2<'_, f64> {
        self.response.view()
    }

    pub fn shells(&self) -> ArrayView1<'_, f64> {
        self.shells.view()
    }

    /// Orders of the zonal response basis: all zero.
    pub fn m(&self) -> Vec<i32> {
        vec![0; self.sh_order / 2 + 1]
    }

    /// Degrees of the zonal response basis: even values `0..=sh_order`.
    pub fn n(&self) -> Vec<i32> {
        (0..=self.sh_order as i32).step_by(2).collect()
    }
}

use crate::basis::{BasisError, SH_CONST, multi_tissue_basis, real_sym_sh_basis};
use crate::fitter::{FitterError, QpFitter};
use crate::gradients::GradientTable;
use crate::kernel::{DeltaForm, KernelError, delta_kernel, inflate_response};
use crate::response::MultiShellResponse;
use crate::solver::{ClarabelSolver, ConvexSolver};
use crate::sphere::Sphere;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("basis construction failed: {0}")]
    Basis(#[from] BasisError),

    #[error("deconvolution kernel construction failed: {0}")]
    Kernel(#[from] KernelError),

    #[error("fitting failed: {0}")]
    Fitter(#[from] FitterError),
}

/// Multi-shell multi-tissue constrained spherical deconvolution model.
///
/// Assembly runs once at construction: the multi-tissue basis, the delta
/// kernel, the shell-inflated multiplier matrix, the forward operator, the
/// regularization operator, and finally the per-voxel fitter. Everything is
/// immutable afterwards, so a single model can serve concurrent per-voxel
/// fits without locking.
pub struct MultiShellDeconvModel {
    response: MultiShellResponse,
    reg_sphere: Sphere,
    delta: Array1<f64>,
    forward: Array2<f64>,
    fitter: QpFitter,
}

impl MultiShellDeconvModel {
    /// Builds a model with the isotropic compartment count implied by the
    /// response shape and the default Clarabel solver backend.
    pub fn new(
        gtab: &GradientTable,
        response: MultiShellResponse,
        reg_sphere: Sphere,
        delta_form: DeltaForm,
    ) -> Result<Self, ModelError> {
        Self::with_solver(gtab, response, reg_sphere, delta_form, Box::new(ClarabelSolver))
    }

    pub fn with_solver(
        gtab: &GradientTable,
        response: MultiShellResponse,
        reg_sphere: Sphere,
        delta_form: DeltaForm,
        solver: Box<dyn ConvexSolver>,
    ) -> Result<Self, ModelError> {
        let sh_order = response.sh_order();
        let iso = response.iso();

        let (basis, _m, n) = multi_tissue_basis(gtab, sh_order, iso)?;
        log::info!(
            "multi-tissue basis assembled: {} directions, {} isotropic + {} SH columns",
            basis.nrows(),
            iso,
            basis.ncols() - iso
        );

        // Reference fiber orientation for the delta kernel is the +z pole.
        let delta = delta_kernel(
            delta_form,
            iso,
            &response.m(),
            &response.n(),
            0.0,
            0.0,
            &reg_sphere,
            solver.as_ref(),
        )?;

        let multiplier = inflate_response(&response, gtab, &n, delta.view())?;
        let forward = &basis * &multiplier;

        // Identity over the isotropic block, SH basis on the regularization
        // sphere over the anisotropic block, no cross terms.
        let (theta, phi) = reg_sphere.angles();
        let (odf_reg, _, _) = real_sym_sh_basis(sh_order, theta.view(), phi.view());
        let mut reg = Array2::zeros((odf_reg.nrows() + iso, odf_reg.ncols() + iso));
        for i in 0..iso {
            reg[[i, i]] = 1.0;
        }
        reg.slice_mut(s![iso.., iso..]).assign(&odf_reg);

        let fitter = QpFitter::with_solver(forward.clone(), reg.view(), solver)?;
        log::info!(
            "deconvolution model ready: {} coefficients, {} positivity constraints",
            fitter.num_coefficients(),
            reg.nrows()
        );

        Ok(Self {
            response,
            reg_sphere,
            delta,
            forward,
            fitter,
        })
    }

    pub fn response(&self) -> &MultiShellResponse {
        &self.response
    }

    pub fn reg_sphere(&self) -> &Sphere {
        &self.reg_sphere
    }

    pub fn delta(&self) -> ArrayView1<'_, f64> {
        self.delta.view()
    }

    /// The assembled forward operator `X` (basis times multiplier matrix).
    pub fn forward_operator(&self) -> ArrayView2<'_, f64> {
        self.forward.view()
    }

    /// Predicts the signal generated by the given coefficients.
    ///
    /// Uses the model's own forward operator unless an alternate gradient
    /// table is supplied, in which case the basis and multiplier matrix are
    /// rebuilt for that table. When `s0` is given the prediction is scaled
    /// by it; otherwise the signal is returned in the response's units.
    pub fn predict(
        &self,
        coefficients: ArrayView1<f64>,
        gtab: Option<&GradientTable>,
        s0: Option<f64>,
    ) -> Result<Array1<f64>, ModelError> {
        let predicted = match gtab {
            None => self.forward.dot(&coefficients),
            Some(alternate) => {
                let iso = self.response.iso();
                let (basis, _m, n) =
                    multi_tissue_basis(alternate, self.response.sh_order(), iso)?;
                let multiplier =
                    inflate_response(&self.response, alternate, &n, self.delta.view())?;
                (&basis * &multiplier).dot(&coefficients)
            }
        };
        Ok(match s0 {
            Some(scale) => predicted * scale,
            None => predicted,
        })
    }

    /// Fits a single voxel's signal vector. Multi-voxel iteration lives in
    /// [`crate::volume`]; solver failures surface per voxel.
    pub fn fit(&self, signal: ArrayView1<f64>) -> Result<MSDeconvFit, ModelError> {
        let coefficients = self.fitter.fit(signal)?;
        Ok(MSDeconvFit {
            coefficients,
            iso: self.response.iso(),
            sh_order: self.response.sh_order(),
        })
    }
}

/// One voxel's deconvolution result.
#[derive(Debug, Clone)]
pub struct MSDeconvFit {
    coefficients: Array1<f64>,
    iso: usize,
    sh_order: usize,
}

impl MSDeconvFit {
    /// The raw fitted coefficient vector, isotropic entries first.
    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coefficients.view()
    }

    /// White-matter spherical harmonic coefficients of the FOD.
    pub fn shm_coeff(&self) -> ArrayView1<'_, f64> {
        self.coefficients.slice(s![self.iso..])
    }

    /// Per-tissue volume fraction estimates: the isotropic coefficients and
    /// the first anisotropic term, rescaled out of SH units.
    pub fn volume_fractions(&self) -> Array1<f64> {
        self.coefficients
            .slice(s![..self.iso + 1])
            .mapv(|v| v / SH_CONST)
    }

    /// Samples the fitted FOD on the given sphere.
    pub fn odf(&self, sphere: &Sphere) -> Array1<f64> {
        let (theta, phi) = sphere.angles();
        let (basis, _, _) = real_sym_sh_basis(self.sh_order, theta.view(), phi.view());
        basis.dot(&self.shm_coeff())
    }
}

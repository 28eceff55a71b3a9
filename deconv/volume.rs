use crate::model::{MSDeconvFit, ModelError, MultiShellDeconvModel};
use ndarray::{ArrayView2, Axis};
use rayon::prelude::*;

/// Fits every row of a `(voxels, measurements)` signal block in parallel.
///
/// The model is shared read-only across worker threads; each voxel gets its
/// own result so callers decide what to do with solver failures (skip the
/// voxel, mark it invalid) instead of the crate guessing for them.
pub fn fit_all(
    model: &MultiShellDeconvModel,
    data: ArrayView2<f64>,
) -> Vec<Result<MSDeconvFit, ModelError>> {
    data.axis_iter(Axis(0))
        .into_par_iter()
        .map(|signal| model.fit(signal))
        .collect()
}

use crate::{
    ConcentrationScaling, NmfSolver, NormalizerConfig, ReferenceProfile, StainError, StainFloat,
    StainNormalizer,
};
use ndarray::{Array1, Array2, Array3, ArrayView3, Axis};
use numpy::{IntoPyArray, PyArray1, PyArray2, PyArray3, PyReadonlyArray3};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::pyfunction;

fn to_py_err(e: StainError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn parse_solver(solver: Option<&str>) -> PyResult<NmfSolver> {
    match solver.unwrap_or("kl") {
        "kl" | "kl_divergence" => Ok(NmfSolver::KlDivergence),
        "euclid" | "euclidean" => Ok(NmfSolver::Euclidean),
        other => Err(PyValueError::new_err(format!("unknown solver {other:?}"))),
    }
}

fn build_config(
    solver: Option<&str>,
    region_size: Option<(usize, usize)>,
    percentile: Option<f64>,
) -> PyResult<NormalizerConfig> {
    let defaults = NormalizerConfig::default();
    Ok(NormalizerConfig {
        solver: parse_solver(solver)?,
        region_size: region_size.unwrap_or(defaults.region_size),
        concentration_scaling: percentile
            .map(ConcentrationScaling::Percentile)
            .unwrap_or_default(),
        ..defaults
    })
}

fn normalize_with<F: StainFloat, const C: usize>(
    config: NormalizerConfig,
    image: ArrayView3<F>,
    reference: Option<ArrayView3<F>>,
) -> Result<Array3<F>, StainError> {
    let normalizer = StainNormalizer::<F, C>::new(config)?;
    let profile = normalizer.build_reference_profile(reference.unwrap_or(image))?;
    normalizer.normalize(image, &profile)
}

fn profile_with<F: StainFloat, const C: usize>(
    config: NormalizerConfig,
    image: ArrayView3<F>,
) -> Result<ReferenceProfile<F>, StainError> {
    StainNormalizer::<F, C>::new(config)?.build_reference_profile(image)
}

/// Dispatch on the runtime channel count to a const-generic normalizer.
fn normalize_any<F: StainFloat>(
    config: NormalizerConfig,
    image: ArrayView3<F>,
    reference: Option<ArrayView3<F>>,
) -> Result<Array3<F>, StainError> {
    match image.len_of(Axis(2)) {
        3 => normalize_with::<F, 3>(config, image, reference),
        4 => normalize_with::<F, 4>(config, image, reference),
        found => Err(StainError::ChannelMismatch { expected: 3, found }),
    }
}

fn profile_any<F: StainFloat>(
    config: NormalizerConfig,
    image: ArrayView3<F>,
) -> Result<(Array2<F>, Array1<F>), StainError> {
    let profile = match image.len_of(Axis(2)) {
        3 => profile_with::<F, 3>(config, image)?,
        4 => profile_with::<F, 4>(config, image)?,
        found => return Err(StainError::ChannelMismatch { expected: 3, found }),
    };
    Ok((profile.stain_colors().clone(), profile.unstained().clone()))
}

// ---------------------------------------------------------------------------
// Macro to stamp out typed PyO3 function variants for each float precision.
//
// Each invocation generates:
//   - py_normalize_{suffix}
//   - py_stain_profile_{suffix}
// ---------------------------------------------------------------------------
macro_rules! define_typed_pyfunctions {
    ($suffix:ident, $f:ty) => {
        ::paste::paste! {

        #[pyfunction]
        #[pyo3(signature = (im, reference=None, solver=None, region_size=None, percentile=None))]
        fn [<py_normalize_ $suffix>]<'py>(
            py: Python<'py>,
            im: PyReadonlyArray3<'py, $f>,
            reference: Option<PyReadonlyArray3<'py, $f>>,
            solver: Option<&str>,
            region_size: Option<(usize, usize)>,
            percentile: Option<f64>,
        ) -> PyResult<Bound<'py, PyArray3<$f>>> {
            let config = build_config(solver, region_size, percentile)?;
            let arr = im.as_array();
            let reference_arr = reference.as_ref().map(|r| r.as_array());
            let result = py
                .allow_threads(|| normalize_any(config, arr, reference_arr))
                .map_err(to_py_err)?;
            Ok(result.into_pyarray(py))
        }

        #[pyfunction]
        #[pyo3(signature = (im, solver=None))]
        fn [<py_stain_profile_ $suffix>]<'py>(
            py: Python<'py>,
            im: PyReadonlyArray3<'py, $f>,
            solver: Option<&str>,
        ) -> PyResult<(Bound<'py, PyArray2<$f>>, Bound<'py, PyArray1<$f>>)> {
            let config = build_config(solver, None, None)?;
            let arr = im.as_array();
            let (stain_colors, unstained) = py
                .allow_threads(|| profile_any(config, arr))
                .map_err(to_py_err)?;
            Ok((stain_colors.into_pyarray(py), unstained.into_pyarray(py)))
        }

        } // paste!
    };
}

// Stamp out the concrete f32 and f64 variants.
define_typed_pyfunctions!(f32, f32);
define_typed_pyfunctions!(f64, f64);

// ---------------------------------------------------------------------------
// PyO3 module: register every typed variant.
// ---------------------------------------------------------------------------
#[pymodule]
fn _rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // f64
    m.add_function(wrap_pyfunction!(py_normalize_f64, m)?)?;
    m.add_function(wrap_pyfunction!(py_stain_profile_f64, m)?)?;
    // f32
    m.add_function(wrap_pyfunction!(py_normalize_f32, m)?)?;
    m.add_function(wrap_pyfunction!(py_stain_profile_f32, m)?)?;
    Ok(())
}

use crate::float_trait::StainFloat;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use num_traits::Float;

/// Convert a channels × pixels intensity matrix to optical density relative
/// to `unstained`:
///
/// ```text
/// od = ln(unstained) − ln(intensity)
/// ```
///
/// Intensities and the unstained color are floored at `floor` before the
/// logarithm, and the result is floored at `floor` as well, so pixels brighter
/// than the unstained color carry (almost) no stain.
pub fn intensity_to_od<F: StainFloat>(
    v: ArrayView2<F>,
    unstained: ArrayView1<F>,
    floor: F,
) -> Array2<F> {
    let ln_unstained: Array1<F> = unstained.mapv(|u| Float::ln(Float::max(u, floor)));
    let mut od = v.to_owned();

    Zip::from(od.axis_iter_mut(Axis(0)))
        .and(&ln_unstained)
        .par_for_each(|mut row, &ln_u| {
            row.mapv_inplace(|x| Float::max(ln_u - Float::ln(Float::max(x, floor)), floor));
        });

    od
}

/// Convert optical density back to intensity:
///
/// ```text
/// intensity = unstained × exp(−od)
/// ```
///
/// Negative results are clamped to zero.
pub fn od_to_intensity<F: StainFloat>(od: ArrayView2<F>, unstained: ArrayView1<F>) -> Array2<F> {
    let zero = F::zero();
    let mut intensity = od.to_owned();

    Zip::from(intensity.axis_iter_mut(Axis(0)))
        .and(&unstained)
        .par_for_each(|mut row, &u| {
            row.mapv_inplace(|x| Float::max(u * Float::exp(-x), zero));
        });

    intensity
}

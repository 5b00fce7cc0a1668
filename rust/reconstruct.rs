use crate::color_conversion::od_to_intensity;
use crate::config::ConcentrationScaling;
use crate::float_trait::StainFloat;
use crate::reference_profile::ReferenceProfile;
use crate::EPSILON;
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use num_traits::Float;
use std::cmp::Ordering;

/// Recombine a region's local factorization with the reference palette.
///
/// The local concentrations carry the tissue structure; the reference stain
/// colors and unstained color carry the palette:
///
/// ```text
/// od  = W_ref · H_local
/// out = unstained_ref ⊙ exp(−od)
/// ```
///
/// which is `unstained + stain colors · concentration` in optical density.
/// Before recombining, local stains are matched to the reference stains (see
/// [`align_to_reference`]) and optionally rescaled per `scaling`.
///
/// Returns a channels × pixels intensity matrix.
pub fn reconstruct<F: StainFloat>(
    local_w: &Array2<F>,
    local_h: &Array2<F>,
    reference: &ReferenceProfile<F>,
    scaling: ConcentrationScaling,
) -> Array2<F> {
    let mut h = align_to_reference(local_w, local_h, reference.stain_colors());

    if let ConcentrationScaling::Percentile(p) = scaling {
        match (row_percentiles(&h, p), reference.concentration_percentiles(p)) {
            (Some(local), Some(target)) => scale_concentrations(&mut h, &local, &target),
            _ => tracing::warn!(percentile = p, "no reference concentrations; scaling skipped"),
        }
    }

    let od = reference.stain_colors().dot(&h);
    od_to_intensity(od.view(), reference.unstained().view())
}

/// Reorder the rows of `local_h` so that local stain `k` corresponds to the
/// reference stain its color is most similar to.
///
/// Role classification already orders stains consistently; this guards
/// against regions where it was ambiguous and swapped hematoxylin and eosin.
pub fn align_to_reference<F: StainFloat>(
    local_w: &Array2<F>,
    local_h: &Array2<F>,
    reference_w: &Array2<F>,
) -> Array2<F> {
    let similarity = |i: usize, j: usize| cosine(local_w.column(i), reference_w.column(j));
    let kept = similarity(0, 0) + similarity(1, 1);
    let swapped = similarity(0, 1) + similarity(1, 0);

    if swapped > kept + F::constant(EPSILON) {
        tracing::debug!("local stains swapped to match reference");
        let mut h = local_h.to_owned();
        h.invert_axis(Axis(0));
        h.as_standard_layout().into_owned()
    } else {
        local_h.to_owned()
    }
}

/// Multiply each stain row of `h` by `target[k] / local[k]`. Rows whose local
/// percentile is at the numeric floor are left alone.
pub fn scale_concentrations<F: StainFloat>(
    h: &mut Array2<F>,
    local: &Array1<F>,
    target: &Array1<F>,
) {
    let eps = F::constant(EPSILON);
    Zip::from(h.axis_iter_mut(Axis(0)))
        .and(local)
        .and(target)
        .for_each(|mut row, &l, &t| {
            if l > eps {
                let factor = t / l;
                row.par_mapv_inplace(|x| Float::max(x * factor, eps));
            }
        });
}

/// The `percentile` (a fraction in (0, 1]) of every row of `h`, or `None` when
/// `h` has no columns.
pub(crate) fn row_percentiles<F: StainFloat>(h: &Array2<F>, percentile: f64) -> Option<Array1<F>> {
    if h.ncols() == 0 {
        return None;
    }
    Some(h.rows().into_iter().map(|row| percentile_of(row, percentile)).collect())
}

fn percentile_of<F: StainFloat>(values: ArrayView1<F>, p: f64) -> F {
    let max_idx = values.len() - 1;
    let i = ((p * max_idx as f64).round() as usize).min(max_idx);
    let mut sorted = values.to_vec();
    let (_, nth, _) =
        sorted.select_nth_unstable_by(i, |a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    *nth
}

fn cosine<F: StainFloat>(a: ArrayView1<F>, b: ArrayView1<F>) -> F {
    let denom = Float::sqrt(a.dot(&a) * b.dot(&b));
    if denom > F::zero() {
        a.dot(&b) / denom
    } else {
        F::zero()
    }
}

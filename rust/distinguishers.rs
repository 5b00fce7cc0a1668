use crate::color_conversion::intensity_to_od;
use crate::float_trait::StainFloat;
use crate::linalg::{centroid, normalize, orthonormal_complement, project_out, squared_magnitude};
use crate::{EPSILON, EPSILON2, NUMBER_OF_STAINS};
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use num_traits::Float;
use rayon::prelude::*;

/// Find the `NUMBER_OF_STAINS + 1` extreme colors ("distinguishers") that
/// bound the color cloud of a channels × pixels intensity matrix.
///
/// The search runs in optical density against the brightest value seen in
/// each channel:
///
/// 1. the pixel with the smallest density is the apex of the cloud and the
///    first distinguisher;
/// 2. the cloud is recentered on the apex, pixels closer to it than
///    `minimum_magnitude` are dropped, and the rest are normalized onto the
///    unit sphere;
/// 3. each further distinguisher is the pixel farthest from the centroid (first
///    search) or from the span of the stain directions accepted so far (later
///    searches), after which that direction joins the projection kernel.
///
/// When the cloud runs out of non-degenerate candidates the last accepted
/// distinguisher is repeated, so a uniform region returns its own color
/// `NUMBER_OF_STAINS + 1` times. Columns of the result are the original
/// intensity colors of the chosen pixels. An empty matrix yields zero columns.
pub fn find_distinguishers<F: StainFloat>(v: &Array2<F>, minimum_magnitude: F) -> Array2<F> {
    let (channels, n) = v.dim();
    if n == 0 {
        return Array2::zeros((channels, 0));
    }
    let eps = F::constant(EPSILON);
    let eps2 = F::constant(EPSILON2);

    let background = v.fold_axis(Axis(1), F::zero(), |&a, &b| Float::max(a, b));
    let od = intensity_to_od(v.view(), background.view(), eps);

    let apex = argmin(&squared_magnitude(&od));
    let mut indices = vec![apex];

    // Recenter on the apex and keep pixels that carry enough stain.
    let centered = recenter(&od, od.column(apex));
    let threshold = Float::max(eps2, minimum_magnitude * minimum_magnitude);
    let sq = squared_magnitude(&centered);
    let candidates: Vec<usize> = (0..n).filter(|&j| sq[j] >= threshold).collect();
    let cloud = normalize(&select_columns_parallel(&centered, &candidates));

    let mut kernel: Vec<Array1<F>> = Vec::with_capacity(NUMBER_OF_STAINS);
    for search in 0..NUMBER_OF_STAINS {
        let Some(best) = one_distinguisher(&cloud, &kernel, search == 0, eps2) else {
            break;
        };
        indices.push(candidates[best]);
        match orthonormal_complement(cloud.column(best), &kernel, eps2) {
            Some(basis) => kernel.push(basis),
            None => break,
        }
    }

    let last = indices[indices.len() - 1];
    indices.resize(NUMBER_OF_STAINS + 1, last);
    tracing::trace!(?indices, candidates = candidates.len(), "distinguishers found");

    select_columns_parallel(v, &indices)
}

/// Index of the column of `cloud` farthest from the search center, or `None`
/// when every column is within `sqrt(eps2)` of it.
fn one_distinguisher<F: StainFloat>(
    cloud: &Array2<F>,
    kernel: &[Array1<F>],
    around_centroid: bool,
    eps2: F,
) -> Option<usize> {
    if cloud.ncols() == 0 {
        return None;
    }
    let projected = project_out(cloud, kernel);
    let searched = if around_centroid {
        let center = centroid(&projected);
        recenter(&projected, center.view())
    } else {
        projected
    };
    let distances = squared_magnitude(&searched);
    let best = argmax(&distances);
    if distances[best] >= eps2 {
        Some(best)
    } else if around_centroid {
        // Every candidate points the same way; any of them is the stain.
        Some(0)
    } else {
        None
    }
}

/// Subtract `center` from every column.
fn recenter<F: StainFloat>(m: &Array2<F>, center: ArrayView1<F>) -> Array2<F> {
    let mut result = m.to_owned();
    Zip::from(result.axis_iter_mut(Axis(1))).par_for_each(|mut col| col -= &center);
    result
}

/// First index of the smallest value.
fn argmin<F: StainFloat>(values: &Array1<F>) -> usize {
    let mut best = 0;
    for (i, &x) in values.iter().enumerate() {
        if x < values[best] {
            best = i;
        }
    }
    best
}

/// First index of the largest value.
fn argmax<F: StainFloat>(values: &Array1<F>) -> usize {
    let mut best = 0;
    for (i, &x) in values.iter().enumerate() {
        if x > values[best] {
            best = i;
        }
    }
    best
}

/// Gather `indices` columns, in order, with one parallel pass over the data.
pub(crate) fn select_columns_parallel<F: StainFloat>(
    arr: &Array2<F>,
    indices: &[usize],
) -> Array2<F> {
    let nrows = arr.nrows();
    let ncols = indices.len();
    if ncols == 0 {
        return Array2::zeros((nrows, 0));
    }

    // build one flat Vec in parallel
    let new_data: Vec<F> = (0..nrows * ncols)
        .into_par_iter()
        .map(|flat| {
            let row = flat / ncols;
            let col = indices[flat % ncols];
            arr[[row, col]]
        })
        .collect();

    Array2::from_shape_vec((nrows, ncols), new_data)
        .unwrap_or_else(|_| Array2::zeros((nrows, ncols)))
}

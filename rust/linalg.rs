use crate::float_trait::StainFloat;
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use num_traits::Float;
use rayon::prelude::*;

/// Get the squared magnitude of each column vector in a matrix
pub fn squared_magnitude<F: StainFloat>(m: &Array2<F>) -> Array1<F> {
    let v: Vec<F> = (0..m.ncols())
        .into_par_iter()
        .map(|i| m.column(i).dot(&m.column(i)))
        .collect();
    Array1::from(v)
}

/// Get the magnitude of each column vector in a matrix
pub fn magnitude<F: StainFloat>(m: &Array2<F>) -> Array1<F> {
    squared_magnitude(m).mapv(Float::sqrt)
}

/// Normalize each column vector in a matrix onto the unit sphere.
///
/// Columns with zero magnitude come back as zero columns.
pub fn normalize<F: StainFloat>(m: &Array2<F>) -> Array2<F> {
    let mag = magnitude(m);
    let mut result = m.to_owned();

    Zip::from(result.axis_iter_mut(Axis(1)))
        .and(&mag)
        .par_for_each(|mut col, &norm| {
            if norm != F::zero() {
                col.mapv_inplace(|x| x / norm);
            } else {
                col.fill(F::zero());
            }
        });

    result
}

/// Mean of the column vectors of a matrix.
pub fn centroid<F: StainFloat>(m: &Array2<F>) -> Array1<F> {
    m.mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(m.nrows()))
}

/// Remove from every column its components along an orthonormal `kernel`.
pub fn project_out<F: StainFloat>(m: &Array2<F>, kernel: &[Array1<F>]) -> Array2<F> {
    let mut result = m.to_owned();
    for basis in kernel {
        let coefficients = basis.dot(&result);
        Zip::from(result.axis_iter_mut(Axis(1)))
            .and(&coefficients)
            .par_for_each(|mut col, &c| col.scaled_add(-c, basis));
    }
    result
}

/// Gram-Schmidt step: the part of `v` orthogonal to `kernel`, scaled to unit
/// length. `None` when that part is shorter than `sqrt(min_squared)`.
pub fn orthonormal_complement<F: StainFloat>(
    v: ArrayView1<F>,
    kernel: &[Array1<F>],
    min_squared: F,
) -> Option<Array1<F>> {
    let mut residual = v.to_owned();
    for basis in kernel {
        let c = basis.dot(&residual);
        residual.scaled_add(-c, basis);
    }
    let sq = residual.dot(&residual);
    if sq < min_squared {
        return None;
    }
    let norm = Float::sqrt(sq);
    Some(residual.mapv(|x| x / norm))
}

/// Clamp every entry of `m` to at least `floor`. NaN entries become `floor`.
pub fn floor_in_place<F: StainFloat>(m: &mut Array2<F>, floor: F) {
    m.par_mapv_inplace(|x| Float::max(x, floor));
}

/// Solve `(WᵀW + ridge·I) X = Wᵀ B` for a matrix `W` with exactly two columns.
pub fn ridge_solve_two_columns<F: StainFloat>(w: &Array2<F>, b: &Array2<F>, ridge: F) -> Array2<F> {
    let gram = w.t().dot(w);
    let rhs = w.t().dot(b);
    let a = gram[[0, 0]] + ridge;
    let d = gram[[1, 1]] + ridge;
    let off = gram[[0, 1]];
    let det = a * d - off * off;
    let det = if det.abs() < ridge * ridge { ridge * ridge } else { det };

    let mut x = Array2::<F>::zeros(rhs.raw_dim());
    Zip::from(x.axis_iter_mut(Axis(1)))
        .and(rhs.axis_iter(Axis(1)))
        .par_for_each(|mut out, r| {
            out[0] = (d * r[0] - off * r[1]) / det;
            out[1] = (a * r[1] - off * r[0]) / det;
        });
    x
}

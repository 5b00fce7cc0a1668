use crate::float_trait::StainFloat;
use crate::{EPSILON, LAMBDA, NUMBER_OF_ITERATIONS};
use ndarray::{Array2, Axis, Zip};
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Objective minimized by the multiplicative-update NMF solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NmfSolver {
    /// Generalized Kullback-Leibler divergence between V and WH.
    #[default]
    KlDivergence,
    /// Squared Euclidean error ‖V − WH‖² with an L1 (lasso) penalty of
    /// weight `LAMBDA` on H.
    Euclidean,
}

impl NmfSolver {
    /// Refine `w` and `h` in place for exactly `NUMBER_OF_ITERATIONS`
    /// iterations. There is no convergence check.
    pub fn solve<F: StainFloat>(self, v: &Array2<F>, w: &mut Array2<F>, h: &mut Array2<F>) {
        match self {
            NmfSolver::KlDivergence => virtanen_kl_divergence(v, w, h),
            NmfSolver::Euclidean => virtanen_euclid(v, w, h),
        }
    }
}

/// Multiplicative updates for ‖V − WH‖² + λ‖H‖₁:
///
/// ```text
/// H ← H ⊙ WᵀV ⊘ (WᵀWH + λ)
/// W ← W ⊙ VHᵀ ⊘ WHHᵀ
/// ```
pub fn virtanen_euclid<F: StainFloat>(v: &Array2<F>, w: &mut Array2<F>, h: &mut Array2<F>) {
    let eps = F::constant(EPSILON);
    let lambda = F::constant(LAMBDA);

    for _ in 0..NUMBER_OF_ITERATIONS {
        let numer = w.t().dot(v);
        let denom = w.t().dot(&*w).dot(&*h);
        Zip::from(&mut *h)
            .and(&numer)
            .and(&denom)
            .par_for_each(|h, &n, &d| *h = Float::max(*h * n / (d + lambda), eps));

        let numer = v.dot(&h.t());
        let denom = w.dot(&h.dot(&h.t()));
        Zip::from(&mut *w)
            .and(&numer)
            .and(&denom)
            .for_each(|w, &n, &d| *w = Float::max(*w * n / Float::max(d, eps), eps));

        rescale_stains(w, h, eps);
    }
}

/// Multiplicative updates for the generalized KL divergence D(V ‖ WH):
///
/// ```text
/// H ← H ⊙ Wᵀ(V ⊘ WH) ⊘ Wᵀ1
/// W ← W ⊙ (V ⊘ WH)Hᵀ ⊘ 1Hᵀ
/// ```
pub fn virtanen_kl_divergence<F: StainFloat>(v: &Array2<F>, w: &mut Array2<F>, h: &mut Array2<F>) {
    let eps = F::constant(EPSILON);

    for _ in 0..NUMBER_OF_ITERATIONS {
        let ratio = ratio_to_product(v, w, h, eps);
        let numer = w.t().dot(&ratio);
        let w_sums = w.sum_axis(Axis(0));
        Zip::from(h.axis_iter_mut(Axis(0)))
            .and(numer.axis_iter(Axis(0)))
            .and(&w_sums)
            .for_each(|mut h_row, n_row, &s| {
                let s = Float::max(s, eps);
                Zip::from(&mut h_row)
                    .and(&n_row)
                    .par_for_each(|h, &n| *h = Float::max(*h * n / s, eps));
            });

        let ratio = ratio_to_product(v, w, h, eps);
        let numer = ratio.dot(&h.t());
        let h_sums = h.sum_axis(Axis(1));
        Zip::from(w.axis_iter_mut(Axis(1)))
            .and(numer.axis_iter(Axis(1)))
            .and(&h_sums)
            .for_each(|mut w_col, n_col, &s| {
                let s = Float::max(s, eps);
                Zip::from(&mut w_col)
                    .and(&n_col)
                    .for_each(|w, &n| *w = Float::max(*w * n / s, eps));
            });

        rescale_stains(w, h, eps);
    }
}

/// V ⊘ WH with WH floored at `eps`.
fn ratio_to_product<F: StainFloat>(
    v: &Array2<F>,
    w: &Array2<F>,
    h: &Array2<F>,
    eps: F,
) -> Array2<F> {
    let mut ratio = w.dot(h);
    Zip::from(&mut ratio)
        .and(v)
        .par_for_each(|r, &x| *r = x / Float::max(*r, eps));
    ratio
}

/// Scale each stain column of `w` to unit length and fold the scale into the
/// matching row of `h`, leaving WH unchanged.
fn rescale_stains<F: StainFloat>(w: &mut Array2<F>, h: &mut Array2<F>, eps: F) {
    for (mut col, mut row) in w.columns_mut().into_iter().zip(h.rows_mut()) {
        let norm = Float::sqrt(col.dot(&col));
        if norm > eps {
            col.mapv_inplace(|x| Float::max(x / norm, eps));
            row.par_mapv_inplace(|x| Float::max(x * norm, eps));
        }
    }
}

/// Squared Euclidean reconstruction error ‖V − WH‖².
pub fn euclidean_error<F: StainFloat>(v: &Array2<F>, w: &Array2<F>, h: &Array2<F>) -> F {
    let wh = w.dot(h);
    Zip::from(v)
        .and(&wh)
        .fold(F::zero(), |acc, &a, &b| acc + (a - b) * (a - b))
}

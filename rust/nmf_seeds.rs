use crate::classify_stains::StainRoles;
use crate::color_conversion::intensity_to_od;
use crate::float_trait::StainFloat;
use crate::linalg::{floor_in_place, ridge_solve_two_columns};
use crate::{EPSILON, NUMBER_OF_STAINS};
use ndarray::{Array1, Array2, Axis};
use num_traits::Float;

/// Starting point for the NMF solvers.
#[derive(Debug, Clone)]
pub struct NmfSeeds<F> {
    /// Background color in intensity space.
    pub unstained: Array1<F>,
    /// The target matrix in optical density relative to `unstained`.
    pub v_od: Array2<F>,
    /// Stain color matrix, channels × `NUMBER_OF_STAINS`, unit columns.
    pub w: Array2<F>,
    /// Concentration matrix, `NUMBER_OF_STAINS` × pixels.
    pub h: Array2<F>,
}

/// Turn classified distinguishers into non-negative seeds for `v`.
///
/// Each stain column of W is its distinguisher's optical density relative to
/// the unstained distinguisher, scaled to unit length. H is the ridge-stabilized
/// least-squares projection of the density matrix onto W. Every entry of both
/// is floored at `EPSILON`, since multiplicative updates can never lift an
/// exact zero.
pub fn distinguishers_to_nmf_seeds<F: StainFloat>(
    distinguishers: &Array2<F>,
    roles: &StainRoles,
    v: &Array2<F>,
) -> NmfSeeds<F> {
    let eps = F::constant(EPSILON);
    let unstained = distinguishers
        .column(roles.unstained)
        .mapv(|x| Float::max(x, eps));

    let v_od = intensity_to_od(v.view(), unstained.view(), eps);

    let stains = [roles.first_stain, roles.second_stain];
    let mut w = Array2::<F>::zeros((distinguishers.nrows(), NUMBER_OF_STAINS));
    for (k, &index) in stains.iter().enumerate() {
        let color = distinguishers.column(index).insert_axis(Axis(1));
        let od = intensity_to_od(color, unstained.view(), eps);
        w.column_mut(k).assign(&od.column(0));
    }
    for mut col in w.columns_mut() {
        let norm = Float::sqrt(col.dot(&col));
        col.mapv_inplace(|x| Float::max(x / norm, eps));
    }

    let mut h = ridge_solve_two_columns(&w, &v_od, eps);
    floor_in_place(&mut h, eps);

    NmfSeeds {
        unstained,
        v_od,
        w,
        h,
    }
}

/// Seeds for a region whose own distinguishers cannot anchor a factorization.
///
/// `v` is measured in optical density against `unstained`, W starts from
/// `stain_colors` and H is the ridge projection onto it, floored at `EPSILON`.
pub fn reference_to_nmf_seeds<F: StainFloat>(
    stain_colors: &Array2<F>,
    unstained: &Array1<F>,
    v: &Array2<F>,
) -> NmfSeeds<F> {
    let eps = F::constant(EPSILON);
    let unstained = unstained.mapv(|x| Float::max(x, eps));
    let v_od = intensity_to_od(v.view(), unstained.view(), eps);

    let mut w = stain_colors.to_owned();
    floor_in_place(&mut w, eps);
    let mut h = ridge_solve_two_columns(&w, &v_od, eps);
    floor_in_place(&mut h, eps);

    NmfSeeds {
        unstained,
        v_od,
        w,
        h,
    }
}

use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::{EPSILON, NUMBER_OF_STAINS};
use ndarray::{Array2, ArrayView1};
use num_traits::Float;

/// Column indices of the distinguishers playing each semantic role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StainRoles {
    /// Background color, the brightest distinguisher.
    pub unstained: usize,
    /// Hematoxylin: the blue-leaning stain.
    pub first_stain: usize,
    /// Eosin: the red-leaning stain.
    pub second_stain: usize,
    /// Two candidates were indistinguishable and the lower index won.
    pub ambiguous: bool,
}

/// Assign roles to the `NUMBER_OF_STAINS + 1` distinguisher columns.
///
/// The column with the largest magnitude is unstained. Of the remaining two,
/// the one whose color leans further toward the third channel (blue) relative
/// to the first (red) is the first stain. Neither rule depends on column
/// order, so the result is invariant under permutation unless two candidates
/// tie within `EPSILON`, in which case the lowest index wins and a warning is
/// logged.
///
/// Fails unless `distinguishers` is a channels × `NUMBER_OF_STAINS + 1`
/// matrix with at least three channels.
pub fn classify_stains<F: StainFloat>(distinguishers: &Array2<F>) -> Result<StainRoles> {
    let (channels, found) = distinguishers.dim();
    if channels < 3 || found != NUMBER_OF_STAINS + 1 {
        return Err(StainError::InvalidDistinguishers {
            expected: NUMBER_OF_STAINS + 1,
            channels,
            found,
        });
    }

    let magnitudes: Vec<F> = distinguishers
        .columns()
        .into_iter()
        .map(|c| Float::sqrt(c.dot(&c)))
        .collect();

    let brightest = magnitudes
        .iter()
        .copied()
        .fold(F::neg_infinity(), Float::max);
    let tied: Vec<usize> = (0..magnitudes.len())
        .filter(|&i| indistinguishable(magnitudes[i], brightest))
        .collect();
    let unstained = tied[0];
    let mut ambiguous = tied.len() > 1;

    let rest: Vec<usize> = (0..3).filter(|&i| i != unstained).collect();
    let (a, b) = (rest[0], rest[1]);
    let score_a = channel_balance(distinguishers.column(a));
    let score_b = channel_balance(distinguishers.column(b));
    let (first_stain, second_stain) = if indistinguishable(score_a, score_b) {
        ambiguous = true;
        (a, b)
    } else if score_a > score_b {
        (a, b)
    } else {
        (b, a)
    };

    if ambiguous {
        tracing::warn!(
            unstained,
            first_stain,
            second_stain,
            "stain classification ambiguous; lowest index wins"
        );
    }

    Ok(StainRoles {
        unstained,
        first_stain,
        second_stain,
        ambiguous,
    })
}

/// Blue-minus-red share of a color's total intensity.
fn channel_balance<F: StainFloat>(color: ArrayView1<F>) -> F {
    let total = color.sum();
    if total < F::constant(EPSILON) {
        return F::zero();
    }
    (color[2] - color[0]) / total
}

fn indistinguishable<F: StainFloat>(a: F, b: F) -> bool {
    let scale = Float::max(F::one(), Float::max(a.abs(), b.abs()));
    (a - b).abs() <= F::constant(EPSILON) * scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    const WHITE: [f64; 3] = [250.0, 248.0, 252.0];
    // Hematoxylin-like (blue/purple) and eosin-like (pink).
    const HEMATOXYLIN: [f64; 3] = [133.0, 126.0, 191.0];
    const EOSIN: [f64; 3] = [238.0, 95.0, 228.0];

    fn distinguishers(colors: [[f64; 3]; 3]) -> Array2<f64> {
        Array2::from_shape_fn((3, 3), |(ch, j)| colors[j][ch])
    }

    #[test]
    fn brightest_is_unstained_and_blue_is_first_stain() {
        let roles = classify_stains(&distinguishers([EOSIN, WHITE, HEMATOXYLIN])).unwrap();
        assert_eq!(
            roles,
            StainRoles {
                unstained: 1,
                first_stain: 2,
                second_stain: 0,
                ambiguous: false
            }
        );
    }

    #[test]
    fn roles_do_not_depend_on_discovery_order() {
        let colors = [WHITE, HEMATOXYLIN, EOSIN];
        let permutations = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for p in permutations {
            let d = distinguishers([colors[p[0]], colors[p[1]], colors[p[2]]]);
            let roles = classify_stains(&d).unwrap();
            let color_of = |i: usize| colors[p[i]];
            assert_eq!(color_of(roles.unstained), WHITE, "permutation {p:?}");
            assert_eq!(color_of(roles.first_stain), HEMATOXYLIN, "permutation {p:?}");
            assert_eq!(color_of(roles.second_stain), EOSIN, "permutation {p:?}");
            assert!(!roles.ambiguous);
        }
    }

    #[test]
    fn identical_candidates_resolve_to_lowest_index() {
        let color = [200.0, 100.0, 150.0];
        let roles = classify_stains(&distinguishers([color, color, color])).unwrap();
        assert!(roles.ambiguous);
        assert_eq!(roles.unstained, 0);
        assert_eq!(roles.first_stain, 1);
        assert_eq!(roles.second_stain, 2);
    }

    #[test]
    fn tied_stains_are_flagged() {
        let roles = classify_stains(&distinguishers([HEMATOXYLIN, WHITE, HEMATOXYLIN])).unwrap();
        assert!(roles.ambiguous);
        assert_eq!(roles.unstained, 1);
        assert_eq!((roles.first_stain, roles.second_stain), (0, 2));
    }

    #[test]
    fn malformed_distinguishers_are_rejected() {
        let two_columns = Array2::from_shape_fn((3, 2), |(ch, j)| [WHITE, EOSIN][j][ch]);
        assert!(matches!(
            classify_stains(&two_columns),
            Err(StainError::InvalidDistinguishers { found: 2, .. })
        ));

        let two_channels = Array2::<f64>::ones((2, 3));
        assert!(matches!(
            classify_stains(&two_channels),
            Err(StainError::InvalidDistinguishers { channels: 2, .. })
        ));
    }
}

use ndarray::ScalarOperand;
use num_traits::{Float, FromPrimitive, NumAssign};
use std::fmt::Debug;
use std::iter::Sum;

/// Supertrait combining all bounds needed by the generic normalization pipeline.
///
/// Implemented for `f32` and `f64` only. Both are `numpy::Element`, so the
/// Python layer can hand arrays of either precision straight through.
pub trait StainFloat:
    Float + NumAssign + FromPrimitive + ScalarOperand + Sum + Debug + Send + Sync + 'static
{
    /// Convert an `f64` constant into this precision.
    fn constant(x: f64) -> Self;
}

impl StainFloat for f32 {
    fn constant(x: f64) -> Self {
        x as f32
    }
}

impl StainFloat for f64 {
    fn constant(x: f64) -> Self {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2, Axis};

    fn subtract_from_columns<F: StainFloat>(m: &mut Array2<F>, center: &Array1<F>) {
        for mut col in m.axis_iter_mut(Axis(1)) {
            col -= center;
        }
    }

    #[test]
    fn in_place_array_arithmetic_is_available() {
        let mut m = array![[3.0f32, 4.0], [5.0, 6.0]];
        subtract_from_columns(&mut m, &array![1.0, 2.0]);
        assert_eq!(m, array![[2.0, 3.0], [3.0, 4.0]]);

        let mut m = array![[1.0f64], [1.0]];
        subtract_from_columns(&mut m, &array![0.5, 0.25]);
        assert_eq!(m, array![[0.5], [0.75]]);
    }

    #[test]
    fn constants_convert_to_both_precisions() {
        assert_eq!(<f32 as StainFloat>::constant(0.5), 0.5f32);
        assert_eq!(<f64 as StainFloat>::constant(1e-6), 1e-6);
    }
}

use crate::float_trait::StainFloat;
use ndarray::{Array2, Array3, ArrayView3};
use num_traits::Float;

/// Convert an image block of shape (rows, cols, channels) into a
/// channels × pixels matrix. Pixels are taken in row-major order, so column
/// `r * cols + c` holds pixel (r, c).
///
/// The block may be a strided view into a larger image. Negative and NaN
/// intensities are clamped to zero. A block with no pixels yields a matrix
/// with zero columns.
pub fn convert_image_to_matrix<F: StainFloat>(region: ArrayView3<F>) -> Array2<F> {
    let (rows, cols, channels) = region.dim();
    let zero = F::zero();
    Array2::from_shape_fn((channels, rows * cols), |(ch, j)| {
        Float::max(region[[j / cols, j % cols, ch]], zero)
    })
}

/// Build a channels × pixels matrix from a stream of pixels.
pub fn pixels_to_matrix<F, I, const CHANNELS: usize>(pixels: I) -> Array2<F>
where
    F: StainFloat,
    I: IntoIterator<Item = [F; CHANNELS]>,
{
    let zero = F::zero();
    let flat: Vec<F> = pixels
        .into_iter()
        .flat_map(|p| p.into_iter().map(move |x| Float::max(x, zero)))
        .collect();
    let n = flat.len() / CHANNELS.max(1);
    // The flat buffer is pixels × channels; transpose into channels × pixels.
    Array2::from_shape_fn((CHANNELS, n), |(ch, j)| flat[j * CHANNELS + ch])
}

/// Inverse of [`convert_image_to_matrix`].
pub fn convert_matrix_to_image<F: StainFloat>(
    m: &Array2<F>,
    rows: usize,
    cols: usize,
) -> Array3<F> {
    let channels = m.nrows();
    Array3::from_shape_fn((rows, cols, channels), |(r, c, ch)| m[[ch, r * cols + c]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array3};

    #[test]
    fn columns_follow_row_major_pixel_order() {
        let im = Array3::from_shape_fn((2, 3, 3), |(r, c, ch)| (r * 100 + c * 10 + ch) as f64);
        let m = convert_image_to_matrix(im.view());
        assert_eq!(m.dim(), (3, 6));
        // Pixel (1, 2) is column 5.
        assert_eq!(m.column(5).to_vec(), vec![120.0, 121.0, 122.0]);
        assert_eq!(convert_matrix_to_image(&m, 2, 3), im);
    }

    #[test]
    fn strided_sub_view_is_read_correctly() {
        let im = Array3::from_shape_fn((4, 4, 3), |(r, c, ch)| (r * 100 + c * 10 + ch) as f32);
        let tile = im.slice(s![2..4, 1..3, ..]);
        let m = convert_image_to_matrix(tile);
        assert_eq!(m.column(0).to_vec(), vec![210.0, 211.0, 212.0]);
        assert_eq!(m.column(3).to_vec(), vec![320.0, 321.0, 322.0]);
    }

    #[test]
    fn empty_region_gives_zero_columns() {
        let im = Array3::<f64>::zeros((0, 5, 3));
        let m = convert_image_to_matrix(im.view());
        assert_eq!(m.dim(), (3, 0));
    }

    #[test]
    fn invalid_intensities_are_clamped() {
        let mut im = Array3::<f64>::ones((1, 2, 3));
        im[[0, 0, 1]] = -4.0;
        im[[0, 1, 2]] = f64::NAN;
        let m = convert_image_to_matrix(im.view());
        assert_eq!(m[[1, 0]], 0.0);
        assert_eq!(m[[2, 1]], 0.0);
    }

    #[test]
    fn pixel_stream_matches_image_layout() {
        let m = pixels_to_matrix([[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(m.dim(), (4, 2));
        assert_eq!(m.row(3).to_vec(), vec![4.0, 8.0]);
    }
}

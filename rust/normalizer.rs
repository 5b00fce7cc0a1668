use crate::classify_stains::{classify_stains, StainRoles};
use crate::color_conversion::intensity_to_od;
use crate::config::{ConcentrationScaling, NormalizerConfig};
use crate::distinguishers::find_distinguishers;
use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::nmf_seeds::{distinguishers_to_nmf_seeds, reference_to_nmf_seeds, NmfSeeds};
use crate::reconstruct::reconstruct;
use crate::reference_profile::ReferenceProfile;
use crate::utils::{convert_image_to_matrix, convert_matrix_to_image};
use crate::{EPSILON, EPSILON2};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView3, Axis};
use num_traits::Float;
use rayon::prelude::*;
use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

/// A solved factorization of one image or region.
#[derive(Debug, Clone)]
pub struct Factorization<F> {
    /// Background intensity the optical densities are relative to.
    pub unstained: Array1<F>,
    /// W: channels × `NUMBER_OF_STAINS`, unit optical-density columns.
    pub stain_colors: Array2<F>,
    /// H: `NUMBER_OF_STAINS` × pixels.
    pub concentrations: Array2<F>,
    /// Which distinguisher played which role.
    pub roles: StainRoles,
}

/// Structure-preserving stain normalizer for images with `CHANNELS` color
/// channels.
///
/// The channel count is part of the type: input and output images share it,
/// and it must be at least 3. Anything less is rejected when the normalizer is
/// instantiated, at compile time:
///
/// ```compile_fail
/// use spcn_normalize::{NormalizerConfig, StainNormalizer};
///
/// let normalizer = StainNormalizer::<f64, 2>::new(NormalizerConfig::default());
/// ```
#[derive(Debug, Clone)]
pub struct StainNormalizer<F, const CHANNELS: usize> {
    config: NormalizerConfig,
    _float: PhantomData<F>,
}

impl<F: StainFloat, const CHANNELS: usize> StainNormalizer<F, CHANNELS> {
    const CHANNELS_SUPPORTED: () = assert!(
        CHANNELS >= 3,
        "stain normalization needs pixels with at least 3 channels"
    );

    pub fn new(config: NormalizerConfig) -> Result<Self> {
        #[allow(clippy::let_unit_value)]
        let () = Self::CHANNELS_SUPPORTED;
        config.validate()?;
        Ok(Self {
            config,
            _float: PhantomData,
        })
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Run distinguisher search, role classification, seeding and the NMF
    /// solver on a channels × pixels intensity matrix, anchored on the
    /// matrix's own brightest distinguisher. Fails with `EmptyImage` for a
    /// matrix without pixels.
    pub fn factorize(&self, v: &Array2<F>) -> Result<Factorization<F>> {
        self.factorize_against(v, None)
    }

    /// Like [`factorize`](Self::factorize), but a matrix with no background
    /// pixel, one whose unstained distinguisher is stained relative to
    /// `reference`, is measured against the reference background and seeded
    /// from the reference stain colors.
    fn factorize_against(
        &self,
        v: &Array2<F>,
        reference: Option<&ReferenceProfile<F>>,
    ) -> Result<Factorization<F>> {
        if v.ncols() == 0 {
            return Err(StainError::EmptyImage);
        }
        let distinguishers =
            find_distinguishers(v, F::constant(self.config.minimum_optical_density));
        let roles = classify_stains(&distinguishers)?;

        let seeds = match reference {
            Some(reference)
                if !self.is_background(distinguishers.column(roles.unstained), reference) =>
            {
                tracing::debug!("no background in region; seeding from reference palette");
                reference_to_nmf_seeds(reference.stain_colors(), reference.unstained(), v)
            }
            _ => distinguishers_to_nmf_seeds(&distinguishers, &roles, v),
        };
        let NmfSeeds {
            unstained,
            v_od,
            mut w,
            mut h,
        } = seeds;

        self.config.solver.solve(&v_od, &mut w, &mut h);

        Ok(Factorization {
            unstained,
            stain_colors: w,
            concentrations: h,
            roles,
        })
    }

    /// Whether `color` carries less than the minimum optical density relative
    /// to the reference background.
    fn is_background(&self, color: ArrayView1<F>, reference: &ReferenceProfile<F>) -> bool {
        let eps = F::constant(EPSILON);
        let od = intensity_to_od(
            color.insert_axis(Axis(1)),
            reference.unstained().view(),
            eps,
        );
        let minimum = F::constant(self.config.minimum_optical_density);
        let channels = F::constant(od.len() as f64);
        let threshold = Float::max(minimum * minimum, channels * F::constant(EPSILON2));
        od.iter().map(|&x| x * x).sum::<F>() <= threshold
    }

    /// Factorize a whole image into the profile every region is normalized
    /// to. Run once, before any region work.
    pub fn build_reference_profile(&self, image: ArrayView3<F>) -> Result<ReferenceProfile<F>> {
        self.check_channels(image.len_of(Axis(2)))?;
        let v = convert_image_to_matrix(image);
        let reference = self.factorize(&v)?;

        tracing::debug!(
            pixels = v.ncols(),
            unstained = ?reference.unstained.to_vec(),
            stain_colors = ?reference.stain_colors.as_slice(),
            ambiguous = reference.roles.ambiguous,
            "built reference profile"
        );

        let profile = ReferenceProfile::new(
            reference.stain_colors,
            reference.concentrations,
            reference.unstained,
        );
        Ok(match self.config.concentration_scaling {
            ConcentrationScaling::Percentile(p) => profile.with_cached_percentiles(p),
            ConcentrationScaling::None => profile,
        })
    }

    /// Normalize one region against `reference`. Safe to call concurrently
    /// for different regions with the same profile. A region without pixels
    /// comes back empty.
    pub fn process_region(
        &self,
        region: ArrayView3<F>,
        reference: &ReferenceProfile<F>,
    ) -> Result<Array3<F>> {
        self.check_channels(region.len_of(Axis(2)))?;
        self.check_channels(reference.channels())?;

        let (rows, cols, _) = region.dim();
        let v = convert_image_to_matrix(region);
        if v.ncols() == 0 {
            return Ok(Array3::zeros((rows, cols, CHANNELS)));
        }
        let local = self.factorize_against(&v, Some(reference))?;
        tracing::debug!(rows, cols, ambiguous = local.roles.ambiguous, "region factorized");

        let out = reconstruct(
            &local.stain_colors,
            &local.concentrations,
            reference,
            self.config.concentration_scaling,
        );
        Ok(convert_matrix_to_image(&out, rows, cols))
    }

    /// Normalize a whole image, splitting it into regions of
    /// `config.region_size` that are processed in parallel.
    pub fn normalize(
        &self,
        image: ArrayView3<F>,
        reference: &ReferenceProfile<F>,
    ) -> Result<Array3<F>> {
        self.normalize_with_cancel(image, reference, &AtomicBool::new(false))
    }

    /// Like [`normalize`](Self::normalize), but regions that have not started
    /// when `cancel` becomes true are skipped and `StainError::Cancelled` is
    /// returned. Regions already running finish.
    pub fn normalize_with_cancel(
        &self,
        image: ArrayView3<F>,
        reference: &ReferenceProfile<F>,
        cancel: &AtomicBool,
    ) -> Result<Array3<F>> {
        self.check_channels(image.len_of(Axis(2)))?;
        self.check_channels(reference.channels())?;

        // Compute the reference percentiles once instead of once per region.
        let reference = match self.config.concentration_scaling {
            ConcentrationScaling::Percentile(p) if !reference.caches_percentile(p) => {
                Cow::Owned(reference.clone().with_cached_percentiles(p))
            }
            _ => Cow::Borrowed(reference),
        };
        let reference = reference.as_ref();

        let (region_rows, region_cols) = self.config.region_size;
        let (rows, cols, _) = image.dim();
        tracing::info!(
            rows,
            cols,
            regions = rows.div_ceil(region_rows) * cols.div_ceil(region_cols),
            solver = ?self.config.solver,
            "normalizing image"
        );

        let mut output = Array3::<F>::zeros(image.raw_dim());
        image
            .axis_chunks_iter(Axis(0), region_rows)
            .into_par_iter()
            .zip(output.axis_chunks_iter_mut(Axis(0), region_rows).into_par_iter())
            .try_for_each(|(band_in, mut band_out)| {
                band_in
                    .axis_chunks_iter(Axis(1), region_cols)
                    .into_par_iter()
                    .zip(band_out.axis_chunks_iter_mut(Axis(1), region_cols).into_par_iter())
                    .try_for_each(|(tile_in, mut tile_out)| {
                        if cancel.load(Ordering::Relaxed) {
                            return Err(StainError::Cancelled);
                        }
                        let tile = self.process_region(tile_in, reference)?;
                        tile_out.assign(&tile);
                        Ok(())
                    })
            })?;

        Ok(output)
    }

    /// Normalize `image` to the palette of `reference_image`: the two-input
    /// form, building the profile and normalizing in one call.
    pub fn normalize_to_reference(
        &self,
        image: ArrayView3<F>,
        reference_image: ArrayView3<F>,
    ) -> Result<Array3<F>> {
        let reference = self.build_reference_profile(reference_image)?;
        self.normalize(image, &reference)
    }

    fn check_channels(&self, found: usize) -> Result<()> {
        if found != CHANNELS {
            return Err(StainError::ChannelMismatch {
                expected: CHANNELS,
                found,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmf::NmfSolver;
    use ndarray::{s, Array3};

    const HEMATOXYLIN: [f64; 3] = [0.65, 0.70, 0.29];
    const EOSIN: [f64; 3] = [0.07, 0.99, 0.11];

    fn stain_color(a: f64, b: f64) -> [f64; 3] {
        [0usize, 1, 2].map(|ch| 255.0 * (-(a * HEMATOXYLIN[ch] + b * EOSIN[ch])).exp())
    }

    /// Beer-Lambert mixtures of two stains on a grid of concentrations,
    /// including background and both pure stains.
    fn synthetic_slide(rows: usize, cols: usize) -> Array3<f64> {
        Array3::from_shape_fn((rows, cols, 3), |(r, c, ch)| {
            stain_color((r % 4) as f64 * 0.4, (c % 4) as f64 * 0.4)[ch]
        })
    }

    fn four_pixel_region() -> Array3<f64> {
        let pixels = [
            [255.0, 255.0, 255.0],
            [255.0, 255.0, 255.0],
            stain_color(1.0, 0.0),
            stain_color(0.0, 1.0),
        ];
        Array3::from_shape_fn((2, 2, 3), |(r, c, ch)| pixels[r * 2 + c][ch])
    }

    fn max_abs_diff(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
    }

    #[test]
    fn four_pixel_scenario_round_trips_against_itself() {
        let normalizer = StainNormalizer::<f64, 3>::new(NormalizerConfig::default()).unwrap();
        let image = four_pixel_region();

        let v = convert_image_to_matrix(image.view());
        let local = normalizer.factorize(&v).unwrap();
        assert!(!local.roles.ambiguous);
        assert_eq!(local.unstained.to_vec(), vec![255.0, 255.0, 255.0]);

        let reference = normalizer.build_reference_profile(image.view()).unwrap();
        let out = normalizer.process_region(image.view(), &reference).unwrap();
        assert_eq!(out.dim(), image.dim());
        assert!(max_abs_diff(&out, &image) < 1.0, "{out:?}");
    }

    #[test]
    fn normalizing_against_own_profile_is_near_identity() {
        let image = synthetic_slide(8, 8);
        // The L1 penalty biases Euclidean concentrations down by about
        // LAMBDA / (1 + cos θ) in optical density, a few intensity units here.
        for (solver, tolerance) in [(NmfSolver::KlDivergence, 1.0), (NmfSolver::Euclidean, 8.0)] {
            let config = NormalizerConfig {
                solver,
                region_size: (8, 8),
                ..Default::default()
            };
            let normalizer = StainNormalizer::<f64, 3>::new(config).unwrap();
            let reference = normalizer.build_reference_profile(image.view()).unwrap();
            let out = normalizer.normalize(image.view(), &reference).unwrap();
            let diff = max_abs_diff(&out, &image);
            assert!(diff < tolerance, "{solver:?}: max diff {diff}");
        }
    }

    #[test]
    fn solved_factors_respect_floor() {
        let normalizer = StainNormalizer::<f64, 3>::new(NormalizerConfig::default()).unwrap();
        let image = synthetic_slide(6, 5);
        let local = normalizer.factorize(&convert_image_to_matrix(image.view())).unwrap();
        assert!(local.stain_colors.iter().all(|&x| x >= EPSILON));
        assert!(local.concentrations.iter().all(|&x| x >= EPSILON));
    }

    #[test]
    fn tiled_output_keeps_shape_and_stays_finite() {
        let image = synthetic_slide(10, 7);
        let config = NormalizerConfig {
            region_size: (4, 3),
            ..Default::default()
        };
        let normalizer = StainNormalizer::<f64, 3>::new(config).unwrap();
        let reference = normalizer.build_reference_profile(image.view()).unwrap();
        let out = normalizer.normalize(image.view(), &reference).unwrap();
        assert_eq!(out.dim(), (10, 7, 3));
        assert!(out.iter().all(|x| x.is_finite() && *x >= 0.0));
    }

    #[test]
    fn tiles_without_background_keep_their_colors() {
        let image = synthetic_slide(8, 8);
        let config = NormalizerConfig {
            region_size: (2, 2),
            ..Default::default()
        };
        let normalizer = StainNormalizer::<f64, 3>::new(config).unwrap();
        let reference = normalizer.build_reference_profile(image.view()).unwrap();

        // Every pixel of this tile carries both stains.
        let dense = image.slice(s![2..4, 2..4, ..]);
        let tile = normalizer.process_region(dense, &reference).unwrap();
        assert!(max_abs_diff(&tile, &dense.to_owned()) < 1.0, "{tile:?}");

        let out = normalizer.normalize(image.view(), &reference).unwrap();
        let diff = max_abs_diff(&out, &image);
        assert!(diff < 1.0, "max diff {diff}");
    }

    #[test]
    fn region_matches_standalone_processing() {
        let image = synthetic_slide(8, 8);
        let config = NormalizerConfig {
            region_size: (4, 4),
            ..Default::default()
        };
        let normalizer = StainNormalizer::<f64, 3>::new(config).unwrap();
        let reference = normalizer.build_reference_profile(image.view()).unwrap();
        let whole = normalizer.normalize(image.view(), &reference).unwrap();
        let tile = normalizer
            .process_region(image.slice(s![4..8, 0..4, ..]), &reference)
            .unwrap();
        assert_eq!(whole.slice(s![4..8, 0..4, ..]), tile);
    }

    #[test]
    fn empty_region_is_not_factorized() {
        let normalizer = StainNormalizer::<f64, 3>::new(NormalizerConfig::default()).unwrap();
        let image = synthetic_slide(4, 4);
        let reference = normalizer.build_reference_profile(image.view()).unwrap();
        let empty = Array3::<f64>::zeros((0, 4, 3));
        let out = normalizer.process_region(empty.view(), &reference).unwrap();
        assert_eq!(out.dim(), (0, 4, 3));
        assert!(matches!(
            normalizer.build_reference_profile(empty.view()),
            Err(StainError::EmptyImage)
        ));
    }

    #[test]
    fn wrong_channel_count_is_rejected() {
        let normalizer = StainNormalizer::<f64, 4>::new(NormalizerConfig::default()).unwrap();
        let image = synthetic_slide(4, 4);
        assert!(matches!(
            normalizer.build_reference_profile(image.view()),
            Err(StainError::ChannelMismatch { expected: 4, found: 3 })
        ));
    }

    #[test]
    fn cancelled_run_reports_cancellation() {
        let normalizer = StainNormalizer::<f64, 3>::new(NormalizerConfig {
            region_size: (2, 2),
            ..Default::default()
        })
        .unwrap();
        let image = synthetic_slide(8, 8);
        let reference = normalizer.build_reference_profile(image.view()).unwrap();
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            normalizer.normalize_with_cancel(image.view(), &reference, &cancel),
            Err(StainError::Cancelled)
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = NormalizerConfig {
            region_size: (0, 0),
            ..Default::default()
        };
        assert!(StainNormalizer::<f32, 3>::new(config).is_err());
    }
}

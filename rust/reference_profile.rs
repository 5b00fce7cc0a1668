use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::reconstruct::row_percentiles;
use crate::{EPSILON, NUMBER_OF_STAINS};
use ndarray::{Array1, Array2};
use num_traits::Float;

/// The stain palette every region is normalized to.
///
/// Built once per run, then shared read-only (it is `Send + Sync`) by all
/// region workers.
#[derive(Debug, Clone)]
pub struct ReferenceProfile<F> {
    stain_colors: Array2<F>,
    concentrations: Array2<F>,
    unstained: Array1<F>,
    percentiles: Option<(f64, Array1<F>)>,
}

impl<F: StainFloat> ReferenceProfile<F> {
    pub(crate) fn new(
        stain_colors: Array2<F>,
        concentrations: Array2<F>,
        unstained: Array1<F>,
    ) -> Self {
        Self {
            stain_colors,
            concentrations,
            unstained,
            percentiles: None,
        }
    }

    /// Build a profile from an externally supplied palette.
    ///
    /// `stain_colors` is channels × `NUMBER_OF_STAINS` in optical density,
    /// `unstained` the background intensity, and `concentrations` a
    /// `NUMBER_OF_STAINS` × pixels sample of reference concentrations (it may
    /// have zero columns, which disables percentile scaling). Stain columns are
    /// rescaled to unit length and every entry is floored at `EPSILON`.
    pub fn from_parts(
        stain_colors: Array2<F>,
        concentrations: Array2<F>,
        unstained: Array1<F>,
    ) -> Result<Self> {
        let channels = stain_colors.nrows();
        if channels < 3 {
            return Err(StainError::InvalidProfile(format!(
                "stain colors need at least 3 channels, got {channels}"
            )));
        }
        if stain_colors.ncols() != NUMBER_OF_STAINS {
            return Err(StainError::InvalidProfile(format!(
                "expected {NUMBER_OF_STAINS} stain columns, got {}",
                stain_colors.ncols()
            )));
        }
        if unstained.len() != channels {
            return Err(StainError::InvalidProfile(format!(
                "unstained color has {} channels, stain colors have {channels}",
                unstained.len()
            )));
        }
        if concentrations.nrows() != NUMBER_OF_STAINS {
            return Err(StainError::InvalidProfile(format!(
                "expected {NUMBER_OF_STAINS} concentration rows, got {}",
                concentrations.nrows()
            )));
        }
        let all_finite = stain_colors
            .iter()
            .chain(concentrations.iter())
            .chain(unstained.iter())
            .all(|x| x.is_finite());
        if !all_finite {
            return Err(StainError::InvalidProfile("non-finite entry".into()));
        }

        let eps = F::constant(EPSILON);
        let mut stain_colors = stain_colors.mapv(|x| Float::max(x, eps));
        for mut col in stain_colors.columns_mut() {
            let norm = Float::sqrt(col.dot(&col));
            col.mapv_inplace(|x| Float::max(x / norm, eps));
        }
        let concentrations = concentrations.mapv(|x| Float::max(x, eps));
        let unstained = unstained.mapv(|x| Float::max(x, eps));

        Ok(Self::new(stain_colors, concentrations, unstained))
    }

    /// Precompute the per-stain concentration percentile used by
    /// [`crate::ConcentrationScaling::Percentile`], so regions do not redo it.
    pub fn with_cached_percentiles(mut self, percentile: f64) -> Self {
        self.percentiles =
            row_percentiles(&self.concentrations, percentile).map(|v| (percentile, v));
        self
    }

    /// Per-stain concentration percentile of the reference, or `None` when the
    /// profile carries no concentrations.
    pub fn concentration_percentiles(&self, percentile: f64) -> Option<Array1<F>> {
        match &self.percentiles {
            Some((p, values)) if *p == percentile => Some(values.clone()),
            _ => row_percentiles(&self.concentrations, percentile),
        }
    }

    pub(crate) fn caches_percentile(&self, percentile: f64) -> bool {
        matches!(&self.percentiles, Some((p, _)) if *p == percentile)
    }

    /// Number of color channels.
    pub fn channels(&self) -> usize {
        self.unstained.len()
    }

    /// Reference stain colors, channels × `NUMBER_OF_STAINS`, unit columns in
    /// optical density. Column 0 is hematoxylin, column 1 eosin.
    pub fn stain_colors(&self) -> &Array2<F> {
        &self.stain_colors
    }

    /// Reference concentrations, `NUMBER_OF_STAINS` × pixels.
    pub fn concentrations(&self) -> &Array2<F> {
        &self.concentrations
    }

    /// Reference background intensity.
    pub fn unstained(&self) -> &Array1<F> {
        &self.unstained
    }
}

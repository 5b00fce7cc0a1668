//! Structure-preserving stain normalization for histology images.
//!
//! An image's colors are factorized by non-negative matrix factorization into
//! per-pixel stain concentrations (H) and per-stain colors (W). A reference
//! profile is factorized once from a whole image; every region of the image
//! being normalized is then factorized on its own, and its concentrations are
//! recombined with the reference stain colors. Tissue structure comes from the
//! region, palette from the reference.
//!
//! ```
//! use ndarray::Array3;
//! use spcn_normalize::{NormalizerConfig, StainNormalizer};
//!
//! let image = Array3::<f64>::from_shape_fn((4, 4, 3), |(r, c, ch)| {
//!     255.0 * (-(r as f64 * 0.3 + c as f64 * 0.1 * (ch + 1) as f64)).exp()
//! });
//! let normalizer = StainNormalizer::<f64, 3>::new(NormalizerConfig::default())?;
//! let reference = normalizer.build_reference_profile(image.view())?;
//! let normalized = normalizer.normalize(image.view(), &reference)?;
//! assert_eq!(normalized.dim(), image.dim());
//! # Ok::<(), spcn_normalize::StainError>(())
//! ```

mod classify_stains;
mod color_conversion;
mod config;
mod distinguishers;
mod error;
mod float_trait;
mod linalg;
mod nmf;
mod nmf_seeds;
mod normalizer;
#[cfg(feature = "python")]
mod python;
mod reconstruct;
mod reference_profile;
mod utils;

pub use classify_stains::{classify_stains, StainRoles};
pub use color_conversion::{intensity_to_od, od_to_intensity};
pub use config::{ConcentrationScaling, NormalizerConfig};
pub use distinguishers::find_distinguishers;
pub use error::{Result, StainError};
pub use float_trait::StainFloat;
pub use nmf::{euclidean_error, virtanen_euclid, virtanen_kl_divergence, NmfSolver};
pub use nmf_seeds::{distinguishers_to_nmf_seeds, reference_to_nmf_seeds, NmfSeeds};
pub use normalizer::{Factorization, StainNormalizer};
pub use reconstruct::{align_to_reference, reconstruct, scale_concentrations};
pub use reference_profile::ReferenceProfile;
pub use utils::{convert_image_to_matrix, convert_matrix_to_image, pixels_to_matrix};

// ---------------------------------------------------------------------------
// Fixed numeric constants of the factorization.
// ---------------------------------------------------------------------------

/// Floor for every matrix entry, and scale for "numerically equal" tests.
pub const EPSILON: f64 = 1e-6;
/// Squared magnitude below which a vector is treated as degenerate.
pub const EPSILON2: f64 = EPSILON * EPSILON;
/// Multiplicative-update iterations per NMF solve. There is no early exit.
pub const NUMBER_OF_ITERATIONS: usize = 300;
/// Weight of the L1 (lasso) penalty on H in the Euclidean solver.
pub const LAMBDA: f64 = 0.02;
/// Hematoxylin and eosin.
pub const NUMBER_OF_STAINS: usize = 2;

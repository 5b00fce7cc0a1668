use crate::error::{Result, StainError};
use crate::nmf::NmfSolver;
use serde::{Deserialize, Serialize};

/// How local stain concentrations are rescaled before they are recombined with
/// the reference palette.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum ConcentrationScaling {
    /// Use local concentrations as solved. Normalizing an image against its
    /// own profile is then (near) identity.
    #[default]
    None,
    /// Scale each stain so that its local percentile (a fraction in (0, 1])
    /// matches the same percentile of the reference concentrations. This also
    /// normalizes stain intensity, at the cost of region-dependent scaling.
    Percentile(f64),
}

/// Runtime configuration for [`crate::StainNormalizer`].
///
/// The numeric constants of the factorization (`EPSILON`,
/// `NUMBER_OF_ITERATIONS`, `LAMBDA`, `NUMBER_OF_STAINS`) are fixed and not part
/// of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// NMF objective.
    pub solver: NmfSolver,
    /// Concentration rescaling applied during reconstruction.
    pub concentration_scaling: ConcentrationScaling,
    /// Size of the independently processed output regions, (rows, cols).
    pub region_size: (usize, usize),
    /// Optical density below which a pixel is treated as background when
    /// searching for stain distinguishers.
    pub minimum_optical_density: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            solver: NmfSolver::default(),
            concentration_scaling: ConcentrationScaling::default(),
            region_size: (256, 256),
            minimum_optical_density: 0.15,
        }
    }
}

impl NormalizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.region_size.0 == 0 || self.region_size.1 == 0 {
            return Err(StainError::InvalidConfig(format!(
                "region size must be non-zero, got {:?}",
                self.region_size
            )));
        }
        if let ConcentrationScaling::Percentile(p) = self.concentration_scaling {
            if !(p > 0.0 && p <= 1.0) {
                return Err(StainError::InvalidConfig(format!(
                    "concentration percentile must be in (0, 1], got {p}"
                )));
            }
        }
        if !self.minimum_optical_density.is_finite() || self.minimum_optical_density < 0.0 {
            return Err(StainError::InvalidConfig(format!(
                "minimum optical density must be finite and non-negative, got {}",
                self.minimum_optical_density
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = NormalizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.solver, NmfSolver::KlDivergence);
        assert_eq!(config.concentration_scaling, ConcentrationScaling::None);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: NormalizerConfig =
            serde_json::from_str(r#"{"solver": "Euclidean", "region_size": [64, 32]}"#).unwrap();
        assert_eq!(config.solver, NmfSolver::Euclidean);
        assert_eq!(config.region_size, (64, 32));
        assert_eq!(config.minimum_optical_density, 0.15);
    }

    #[test]
    fn percentile_scaling_parses() {
        let config: NormalizerConfig =
            serde_json::from_str(r#"{"concentration_scaling": {"Percentile": 0.99}}"#).unwrap();
        assert_eq!(config.concentration_scaling, ConcentrationScaling::Percentile(0.99));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_region = NormalizerConfig {
            region_size: (0, 16),
            ..Default::default()
        };
        assert!(matches!(zero_region.validate(), Err(StainError::InvalidConfig(_))));

        let bad_percentile = NormalizerConfig {
            concentration_scaling: ConcentrationScaling::Percentile(1.5),
            ..Default::default()
        };
        assert!(bad_percentile.validate().is_err());

        let nan_density = NormalizerConfig {
            minimum_optical_density: f64::NAN,
            ..Default::default()
        };
        assert!(nan_density.validate().is_err());
    }
}

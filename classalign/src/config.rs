//! Configuration types for the alignment pipeline.
//!
//! All run parameters are consolidated here. The command-line surface lives
//! outside this crate; it only has to produce an [`AlignConfig`].

use std::path::PathBuf;

use crate::error::ConfigError;

// =============================================================================
// Retention policy
// =============================================================================

/// Default number of best matches kept per experimental image (`--keep_best`).
pub const DEFAULT_KEEP_BEST: usize = 2;

/// Default significance level (`--significance`).
pub const DEFAULT_SIGNIFICANCE: f64 = 0.2;

/// How many top-ranked reference matches of an experimental image contribute
/// to the weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Retention {
    /// Keep a fixed number of best matches.
    KeepBest(usize),
    /// Keep `round(alpha * row_length)` best matches, at least one.
    Significance(f64),
}

impl Default for Retention {
    fn default() -> Self {
        Retention::KeepBest(DEFAULT_KEEP_BEST)
    }
}

impl Retention {
    /// Build the policy from the two mutually exclusive optional parameters.
    ///
    /// Neither set falls back to `KeepBest(2)`.
    pub fn from_params(
        keep_best: Option<usize>,
        significance: Option<f64>,
    ) -> Result<Self, ConfigError> {
        let retention = match (keep_best, significance) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingRetention),
            (Some(n), None) => Retention::KeepBest(n),
            (None, Some(alpha)) => Retention::Significance(alpha),
            (None, None) => Retention::default(),
        };
        retention.validate()?;
        Ok(retention)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Retention::KeepBest(n) if n == 0 => Err(ConfigError::InvalidKeepBest(n)),
            Retention::Significance(alpha) if !(alpha > 0.0 && alpha <= 1.0) => {
                Err(ConfigError::InvalidSignificance(alpha))
            }
            _ => Ok(()),
        }
    }

    /// Number of entries retained from a ranked row of `row_length` scores.
    pub fn retained(&self, row_length: usize) -> usize {
        let n = match *self {
            Retention::KeepBest(n) => n,
            Retention::Significance(alpha) => ((row_length as f64 * alpha).round() as usize).max(1),
        };
        n.min(row_length)
    }
}

// =============================================================================
// Capacity planning
// =============================================================================

/// Empirical thresholds used to size reference batches.
///
/// These were tuned on specific hardware; treat them as configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityConfig {
    /// Fraction of free device memory the raw reference images may occupy.
    pub free_memory_fraction: f64,
    /// Fraction of the per-dimension grid limit the padded working set may use.
    pub grid_fraction: f64,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            free_memory_fraction: 0.024,
            grid_fraction: 0.9,
        }
    }
}

impl CapacityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("free_memory_fraction", self.free_memory_fraction),
            ("grid_fraction", self.grid_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidFraction { name, value });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Run configuration
// =============================================================================

/// Default bound on reported translations, in pixels (`--maxShift`).
pub const DEFAULT_MAX_SHIFT: f64 = 20.0;

#[derive(Debug, Clone)]
pub struct AlignConfig {
    pub retention: Retention,
    /// Translations are searched within `[-max_shift, max_shift]` on both axes.
    pub max_shift: f64,
    /// Build the weighted class-average images.
    pub generate_out: bool,
    /// Directory used when composing output locations.
    pub output_dir: PathBuf,
    /// File name of the alignment metadata document inside `output_dir`.
    pub output_root: String,
    pub capacity: CapacityConfig,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            retention: Retention::default(),
            max_shift: DEFAULT_MAX_SHIFT,
            generate_out: false,
            output_dir: PathBuf::from("."),
            output_root: "aligned.json".to_string(),
            capacity: CapacityConfig::default(),
        }
    }
}

impl AlignConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retention.validate()?;
        if !(self.max_shift.is_finite() && self.max_shift >= 0.0) {
            return Err(ConfigError::InvalidMaxShift(self.max_shift));
        }
        if self.output_root.trim().is_empty() {
            return Err(ConfigError::EmptyOutputRoot);
        }
        self.capacity.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_defaults_to_keep_best_two() {
        assert_eq!(
            Retention::from_params(None, None),
            Ok(Retention::KeepBest(2))
        );
    }

    #[test]
    fn test_retention_rejects_both_policies() {
        assert_eq!(
            Retention::from_params(Some(3), Some(0.1)),
            Err(ConfigError::ConflictingRetention)
        );
    }

    #[test]
    fn test_retention_rejects_invalid_values() {
        assert_eq!(
            Retention::from_params(Some(0), None),
            Err(ConfigError::InvalidKeepBest(0))
        );
        assert_eq!(
            Retention::from_params(None, Some(1.5)),
            Err(ConfigError::InvalidSignificance(1.5))
        );
        assert!(Retention::from_params(None, Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_significance_retains_at_least_one() {
        let retention = Retention::Significance(0.01);
        assert_eq!(retention.retained(8), 1);
        assert_eq!(Retention::Significance(0.2).retained(10), 2);
        assert_eq!(Retention::Significance(0.25).retained(10), 3);
    }

    #[test]
    fn test_keep_best_clamped_to_row_length() {
        assert_eq!(Retention::KeepBest(10).retained(4), 4);
    }

    #[test]
    fn test_config_validation() {
        assert!(AlignConfig::default().validate().is_ok());

        let config = AlignConfig {
            max_shift: -1.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxShift(-1.0)));

        let config = AlignConfig {
            output_root: " ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyOutputRoot));

        let config = AlignConfig {
            capacity: CapacityConfig {
                grid_fraction: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFraction {
                name: "grid_fraction",
                ..
            })
        ));
    }
}

//! Error types for the alignment pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Contradictory or missing run parameters. Raised before any device work.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("keep_best and significance are mutually exclusive")]
    ConflictingRetention,

    #[error("keep_best must be at least 1, got {0}")]
    InvalidKeepBest(usize),

    #[error("significance must be in (0, 1], got {0}")]
    InvalidSignificance(f64),

    #[error("maxShift must be finite and non-negative, got {0}")]
    InvalidMaxShift(f64),

    #[error("{name} must be in (0, 1], got {value}")]
    InvalidFraction { name: &'static str, value: f64 },

    #[error("Output root name must not be empty")]
    EmptyOutputRoot,

    #[error("No reference images provided")]
    NoReferences,

    #[error("No experimental images provided")]
    NoExperimentalImages,
}

/// Failures of the device memory layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("Device out of memory: requested {requested} bytes, {free} bytes free")]
    OutOfMemory { requested: usize, free: usize },

    #[error(
        "Device memory cannot hold a single {width}x{height} image batch ({free} bytes free)"
    )]
    InsufficientMemory {
        width: usize,
        height: usize,
        free: usize,
    },

    #[error("Buffer length mismatch: buffer holds {expected} samples, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid device buffer slot {0}")]
    InvalidBuffer(usize),
}

/// Errors that can occur while aligning and classifying images.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Failed to read image '{id}': {reason}")]
    ImageRead { id: String, reason: String },

    #[error("Image '{id}' is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        id: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Images of {width}x{height} are too small to align")]
    ImageTooSmall { width: usize, height: usize },

    #[error("Correlation failed: {0}")]
    Correlation(String),

    #[error("Failed to write '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize output records: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_is_transparent() {
        let err: Error = ConfigError::ConflictingRetention.into();
        assert_eq!(
            err.to_string(),
            "keep_best and significance are mutually exclusive"
        );
    }

    #[test]
    fn test_image_read_names_image() {
        let err = Error::ImageRead {
            id: "exp_003.mrc".to_string(),
            reason: "not found".to_string(),
        };
        assert!(err.to_string().contains("exp_003.mrc"));
    }
}

//! Classalign - rigid 2D alignment of experimental images against references.
//!
//! Every experimental image (and its horizontal mirror) is aligned against every
//! reference by alternating FFT-based translation and polar rotation searches.
//! The best scores are ranked into weights, and the weighted, re-aligned
//! contributors of each reference form its class average.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use classalign::{AlignConfig, Aligner, HostDevice, ImageRef, MemoryImageSource};
//!
//! let mut source = MemoryImageSource::new();
//! source.insert("ref_000", reference);
//! source.insert("exp_000", experimental);
//!
//! let mut device = HostDevice::default();
//! let mut aligner = Aligner::new(AlignConfig::default(), &mut device, &source);
//! let output = aligner.run(&[ImageRef::new("ref_000")], &[ImageRef::new("exp_000")])?;
//! output.write_json("aligned.json".as_ref())?;
//! ```

pub mod capacity;
pub mod channel;
pub mod config;
pub mod correlation;
pub mod device;
pub mod error;
pub mod image;
pub mod mask;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod preprocess;
pub mod refine;
pub mod scores;
pub mod source;
pub mod transform;
pub mod weights;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{AlignConfig, CapacityConfig, Retention};
pub use error::{ConfigError, DeviceError, Error, Result};

// ============================================================================
// Images and geometry
// ============================================================================

pub use image::{BorderMode, Image, ImageBatch};
pub use mask::CircularMask;
pub use transform::Transform;

// ============================================================================
// Device and compute resources
// ============================================================================

pub use capacity::plan_batch_size;
pub use device::{Device, DeviceBuffer, HostDevice, MemoryInfo, ResidentBatch};
pub use plan::ComputePlan;

// ============================================================================
// Correlation and refinement
// ============================================================================

pub use channel::{align_channel, ChannelResult};
pub use correlation::{CorrelationEngine, Peak, NO_SCORE};
pub use preprocess::{PreprocessedBatch, Preprocessor, Stage, Stages};
pub use refine::{refine, BestMatches, RefineContext, RefineState, Refinement};

// ============================================================================
// Scores, weights and output
// ============================================================================

pub use output::{AlignmentOutput, AlignmentRecord, ClassAverage, ClassMembers, ClassRecord};
pub use pipeline::{Aligner, Alignment};
pub use scores::{merge_channel, ChannelMatches, CombinedScores, ScoreMatrix, TransformStore};
pub use source::{ImageRef, ImageSource, MemoryImageSource};
pub use weights::{column_weights, rank_descending, row_weights, WeightMatrix};

//! End-to-end alignment run.
//!
//! ```text
//! validate -> dims + mask -> batch size
//!   for each reference batch:
//!     (re)acquire plan -> upload references -> prepare both stages
//!     for each experimental image: original channel, mirror channel, merge
//!     release references
//! combined scores -> weights -> records and class averages
//! ```


use crate::capacity::plan_batch_size;
use crate::channel::align_channel;
use crate::config::AlignConfig;
use crate::correlation::CorrelationEngine;
use crate::device::{Device, ResidentBatch};
use crate::error::{ConfigError, Error, Result};
use crate::image::{Image, ImageBatch};
use crate::mask::CircularMask;
use crate::output::{AlignmentOutput, OutputBuilder};
use crate::plan::ComputePlan;
use crate::preprocess::{Preprocessor, Stages};
use crate::refine::RefineContext;
use crate::scores::{ChannelMatches, CombinedScores};
use crate::source::{ImageRef, ImageSource};
use crate::weights::WeightMatrix;

/// Smallest image side the mask and polar resampling can work with.
pub const MIN_IMAGE_SIZE: usize = 4;

/// Merged matches of both channels and the weights derived from them.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub original: ChannelMatches,
    pub mirror: ChannelMatches,
    pub combined: CombinedScores,
    pub weights: WeightMatrix,
}

pub struct Aligner<'a> {
    config: AlignConfig,
    device: &'a mut dyn Device,
    source: &'a dyn ImageSource,
}

impl<'a> Aligner<'a> {
    pub fn new(config: AlignConfig, device: &'a mut dyn Device, source: &'a dyn ImageSource) -> Self {
        Self {
            config,
            device,
            source,
        }
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// Align, weight and build the output records.
    pub fn run(
        &mut self,
        references: &[ImageRef],
        experimentals: &[ImageRef],
    ) -> Result<AlignmentOutput> {
        let alignment = self.align(references, experimentals)?;
        OutputBuilder {
            config: &self.config,
            references,
            experimentals,
            original: &alignment.original,
            mirror: &alignment.mirror,
            weights: &alignment.weights,
        }
        .build(self.source)
    }

    /// Score every experimental image against every reference and weight the matches.
    pub fn align(
        &mut self,
        references: &[ImageRef],
        experimentals: &[ImageRef],
    ) -> Result<Alignment> {
        self.config.validate()?;
        if references.is_empty() {
            return Err(ConfigError::NoReferences.into());
        }
        if experimentals.is_empty() {
            return Err(ConfigError::NoExperimentalImages.into());
        }
        tracing::info!(
            "Aligning {} experimental images against {} references",
            experimentals.len(),
            references.len()
        );

        let dims = self.source.read(&references[0])?.dimensions();
        let (width, height) = dims;
        if width.min(height) < MIN_IMAGE_SIZE {
            return Err(Error::ImageTooSmall { width, height });
        }
        let mask = CircularMask::new(width, height);
        let batch_size = plan_batch_size(
            dims,
            references.len(),
            self.device.memory_info(),
            self.device.max_grid_dim(),
            &self.config.capacity,
        )?;

        let mut original = ChannelMatches::new(experimentals.len(), references.len());
        let mut mirror = ChannelMatches::new(experimentals.len(), references.len());

        let mut plan = ComputePlan::acquire(width, height, mask.polar_radius(), batch_size);
        for (b, chunk) in references.chunks(batch_size).enumerate() {
            if plan.batch() != chunk.len() {
                tracing::info!(
                    "Rebuilding compute plan for batch of {} (was {})",
                    chunk.len(),
                    plan.batch()
                );
                plan.release();
                plan = ComputePlan::acquire(width, height, mask.polar_radius(), chunk.len());
            }

            let first = b * batch_size;
            tracing::info!(
                "Reference batch {}: references {}..{}",
                b + 1,
                first + 1,
                first + chunk.len()
            );
            let result = self.align_batch(
                &plan,
                &mask,
                chunk,
                first,
                experimentals,
                &mut original,
                &mut mirror,
            );
            if let Err(e) = result {
                plan.release();
                return Err(e);
            }
        }
        plan.release();

        let combined = CombinedScores::new(&original.scores, &mirror.scores);
        let weights = WeightMatrix::compute(&combined, &self.config.retention);
        Ok(Alignment {
            original,
            mirror,
            combined,
            weights,
        })
    }

    /// Upload one reference batch, align every experimental image against it
    /// and release the device copy.
    #[allow(clippy::too_many_arguments)]
    fn align_batch(
        &mut self,
        plan: &ComputePlan,
        mask: &CircularMask,
        chunk: &[ImageRef],
        first: usize,
        experimentals: &[ImageRef],
        original: &mut ChannelMatches,
        mirror: &mut ChannelMatches,
    ) -> Result<()> {
        let dims = plan.image_dims();
        let images = chunk
            .iter()
            .map(|r| self.read_checked(r, dims))
            .collect::<Result<Vec<Image>>>()?;
        let resident = ResidentBatch::upload(&mut *self.device, &ImageBatch::from_images(&images))?;

        let result = self.align_resident(
            plan,
            mask,
            &resident,
            first,
            experimentals,
            original,
            mirror,
        );
        resident.release(&mut *self.device);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn align_resident(
        &mut self,
        plan: &ComputePlan,
        mask: &CircularMask,
        resident: &ResidentBatch,
        first: usize,
        experimentals: &[ImageRef],
        original: &mut ChannelMatches,
        mirror: &mut ChannelMatches,
    ) -> Result<()> {
        let references = resident.download(&*self.device)?;
        let preprocessor = Preprocessor::new(plan, mask);
        let prepared = preprocessor.prepare(&references, Stages::Both)?;
        let ctx = RefineContext {
            engine: CorrelationEngine::new(plan),
            preprocessor,
            references: &prepared,
            max_shift: self.config.max_shift,
        };

        for (i, experimental) in experimentals.iter().enumerate() {
            let image = self.read_checked(experimental, plan.image_dims())?;
            tracing::debug!(
                "Aligning {} against references {}..{}",
                experimental.id,
                first + 1,
                first + resident.count()
            );

            let plain = align_channel(&mut *self.device, &ctx, &image, false)?;
            original.record(i, first, &plain);
            let flipped = align_channel(&mut *self.device, &ctx, &image, true)?;
            mirror.record(i, first, &flipped);
        }
        Ok(())
    }

    fn read_checked(&self, image: &ImageRef, expected: (usize, usize)) -> Result<Image> {
        let content = self.source.read(image)?;
        if content.dimensions() != expected {
            return Err(Error::DimensionMismatch {
                id: image.id.clone(),
                expected,
                actual: content.dimensions(),
            });
        }
        Ok(content)
    }
}

//! One orientation channel (original or mirrored) of an experimental image.

use crate::device::{Device, ResidentBatch};
use crate::error::{Error, Result};
use crate::image::{Image, ImageBatch};
use crate::refine::{refine, BestMatches, RefineContext, RefineState};

/// Results of both starting orders against the resident references.
#[derive(Debug, Clone)]
pub struct ChannelResult {
    /// Translate-first run.
    pub tr: BestMatches,
    /// Rotate-first run.
    pub rt: BestMatches,
}

/// Align `image` (flipped first when `mirror` is set) with both starting orders.
///
/// The image is replicated once per resident reference and copied through the
/// device; the device copy is released before returning, on success or failure.
pub fn align_channel(
    device: &mut dyn Device,
    ctx: &RefineContext<'_>,
    image: &Image,
    mirror: bool,
) -> Result<ChannelResult> {
    let source = if mirror {
        image.flipped_x()
    } else {
        image.clone()
    };
    let replicated = ImageBatch::replicate(&source, ctx.references.count());
    let resident = ResidentBatch::upload(device, &replicated)?;

    let result = resident
        .download(&*device)
        .map_err(Error::from)
        .and_then(|batch| {
            let tr = refine(ctx, &batch, RefineState::Translate)?;
            let rt = refine(ctx, &batch, RefineState::Rotate)?;
            Ok(ChannelResult { tr, rt })
        });

    resident.release(device);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationEngine;
    use crate::device::HostDevice;
    use crate::mask::CircularMask;
    use crate::plan::ComputePlan;
    use crate::preprocess::{Preprocessor, Stages};
    use crate::testing::blob_image;

    #[test]
    fn test_mirror_channel_matches_flipped_reference() {
        let original = blob_image(32, 5);
        let reference = original.flipped_x();

        let mask = CircularMask::new(32, 32);
        let plan = ComputePlan::acquire(32, 32, mask.polar_radius(), 1);
        let preprocessor = Preprocessor::new(&plan, &mask);
        let references = preprocessor
            .prepare(&ImageBatch::replicate(&reference, 1), Stages::Both)
            .unwrap();
        let ctx = RefineContext {
            engine: CorrelationEngine::new(&plan),
            preprocessor,
            references: &references,
            max_shift: 6.0,
        };

        let mut device = HostDevice::default();
        let plain = align_channel(&mut device, &ctx, &original, false).unwrap();
        let mirrored = align_channel(&mut device, &ctx, &original, true).unwrap();

        let plain_best = plain.tr.score(0).max(plain.rt.score(0));
        let mirror_best = mirrored.tr.score(0).max(mirrored.rt.score(0));
        assert!((mirror_best - 1.0).abs() < 1e-6, "mirror {mirror_best}");
        assert!(mirror_best > plain_best, "plain {plain_best}");
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_device_copy_released_on_failure() {
        let mask = CircularMask::new(16, 16);
        let plan = ComputePlan::acquire(16, 16, mask.polar_radius(), 1);
        let preprocessor = Preprocessor::new(&plan, &mask);
        let references = preprocessor
            .prepare(&ImageBatch::replicate(&blob_image(16, 0), 1), Stages::Both)
            .unwrap();
        let ctx = RefineContext {
            engine: CorrelationEngine::new(&plan),
            preprocessor,
            references: &references,
            max_shift: 4.0,
        };

        let mut device = HostDevice::default();
        let wrong_size = blob_image(32, 0);
        let result = align_channel(&mut device, &ctx, &wrong_size, false);

        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
        assert_eq!(device.live_buffers(), 0);
    }
}

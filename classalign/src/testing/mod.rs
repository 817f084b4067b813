//! Testing utilities for classalign.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::image::{image_center, Image};
use crate::source::{ImageRef, MemoryImageSource};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Square image of a few elongated Gaussian blobs, deterministic per `seed`.
///
/// Blobs stay within `0.25 * size` of the centre so that moderate shifts and
/// any rotation keep them inside the alignment mask. The layout has no mirror
/// or rotational symmetry.
pub fn blob_image(size: usize, seed: usize) -> Image {
    let mut rng = StdRng::seed_from_u64(0x5eed + seed as u64 * 7919);
    let center = image_center(size, size);
    let reach = 0.25 * size as f64;
    let base_sigma = 0.05 * size as f64;

    let mut pixels = vec![0.0; size * size];
    // Fixed off-centre anchor breaks symmetry regardless of the random draws.
    let mut blobs = vec![(0.6 * reach, -0.3 * reach, 1.5, 1.0, 2.0)];
    for _ in 0..4 {
        let angle = rng.random_range(0.0..std::f64::consts::TAU);
        let radius = rng.random_range(0.0..reach);
        blobs.push((
            radius * angle.cos(),
            radius * angle.sin(),
            rng.random_range(0.5..1.2),
            rng.random_range(0.8..1.6),
            rng.random_range(1.0..2.5),
        ));
    }

    for (bx, by, amplitude, sigma_scale, elongation) in blobs {
        let sx = base_sigma * sigma_scale * elongation;
        let sy = base_sigma * sigma_scale;
        for y in 0..size {
            let dy = y as f64 - center.y - by;
            for x in 0..size {
                let dx = x as f64 - center.x - bx;
                pixels[y * size + x] +=
                    amplitude * (-0.5 * (dx * dx / (sx * sx) + dy * dy / (sy * sy))).exp();
            }
        }
    }
    Image::new(size, size, pixels)
}

/// Add approximately Gaussian noise of standard deviation `sigma`.
pub fn add_noise(image: &Image, sigma: f64, seed: u64) -> Image {
    let mut rng = StdRng::seed_from_u64(seed);
    // Sum of three uniforms on [-1, 1] has unit variance.
    let pixels = image
        .pixels()
        .iter()
        .map(|v| {
            let n: f64 = (0..3).map(|_| rng.random_range(-1.0..1.0)).sum();
            v + sigma * n
        })
        .collect();
    Image::new(image.width(), image.height(), pixels)
}

/// Put `images` into a fresh source under `<prefix>_<k>` ids.
pub fn memory_source(prefix: &str, images: &[Image]) -> (MemoryImageSource, Vec<ImageRef>) {
    let mut source = MemoryImageSource::new();
    let refs = register(&mut source, prefix, images);
    (source, refs)
}

/// Add `images` to `source` under `<prefix>_<k>` ids.
pub fn register(source: &mut MemoryImageSource, prefix: &str, images: &[Image]) -> Vec<ImageRef> {
    images
        .iter()
        .enumerate()
        .map(|(k, image)| {
            let id = format!("{prefix}_{k:03}");
            source.insert(id.clone(), image.clone());
            ImageRef::new(id)
        })
        .collect()
}

//! Example: Synthetic Class Alignment
//!
//! Builds a small reference set of random blob images, derives experimental
//! images from it (shifted, rotated, mirrored, all with noise), aligns them and
//! writes the alignment records as JSON.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --example align_synthetic -- [output_dir]
//! ```

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use classalign::{
    AlignConfig, Aligner, BorderMode, HostDevice, Image, ImageRef, MemoryImageSource, Retention,
    Transform,
};
use common::log_setup::{setup_logging_with, LogOptions};
use glam::DVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SIZE: usize = 64;
const REFERENCES: usize = 6;

fn random_blobs(rng: &mut StdRng) -> Image {
    let center = (SIZE / 2) as f64;
    let reach = 0.25 * SIZE as f64;
    let spots: Vec<(f64, f64, f64, f64)> = (0..5)
        .map(|_| {
            (
                rng.random_range(-reach..reach),
                rng.random_range(-reach..reach),
                rng.random_range(0.5..1.5),
                rng.random_range(1.5..4.0),
            )
        })
        .collect();

    let mut pixels = vec![0.0; SIZE * SIZE];
    for y in 0..SIZE {
        for x in 0..SIZE {
            pixels[y * SIZE + x] = spots
                .iter()
                .map(|&(bx, by, amplitude, sigma)| {
                    let dx = x as f64 - center - bx;
                    let dy = y as f64 - center - by;
                    amplitude * (-(dx * dx + 0.5 * dy * dy) / (2.0 * sigma * sigma)).exp()
                })
                .sum();
        }
    }
    Image::new(SIZE, SIZE, pixels)
}

fn with_noise(image: &Image, sigma: f64, rng: &mut StdRng) -> Image {
    let pixels = image
        .pixels()
        .iter()
        .map(|v| v + sigma * rng.random_range(-1.0..1.0))
        .collect();
    Image::new(image.width(), image.height(), pixels)
}

fn main() -> anyhow::Result<()> {
    let output_dir = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("align_synthetic_out"));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    setup_logging_with(LogOptions {
        dir: output_dir.join("logs"),
        ..Default::default()
    });

    let mut rng = StdRng::seed_from_u64(7);
    let mut source = MemoryImageSource::new();

    let mut references = Vec::new();
    let mut reference_images = Vec::new();
    for k in 0..REFERENCES {
        let id = format!("{:06}@references.stk", k + 1);
        let image = random_blobs(&mut rng);
        source.insert(id.clone(), image.clone());
        references.push(ImageRef::new(id).with_angles(k as f64 * 30.0, 90.0));
        reference_images.push(image);
    }

    let mut experimentals = Vec::new();
    for (k, reference) in reference_images.iter().enumerate() {
        let shift = DVec2::new(rng.random_range(-4.0..4.0), rng.random_range(-4.0..4.0));
        let psi = rng.random_range(-180.0..180.0);
        let transform = Transform::translation(shift).then(&Transform::rotation(psi));
        let mut image = reference.warped(&transform, BorderMode::Zero);
        if k % 2 == 1 {
            image.flip_x();
        }
        let id = format!("{:06}@particles.stk", k + 1);
        source.insert(id.clone(), with_noise(&image, 0.05, &mut rng));
        experimentals.push(ImageRef::new(id));
        println!("{}: derived from reference {} by {}", k + 1, k + 1, transform);
    }

    let config = AlignConfig {
        retention: Retention::KeepBest(2),
        max_shift: 8.0,
        generate_out: true,
        output_dir: output_dir.clone(),
        ..Default::default()
    };
    let json_path = output_dir.join(&config.output_root);

    let mut device = HostDevice::default();
    let output = Aligner::new(config, &mut device, &source)
        .run(&references, &experimentals)
        .context("alignment failed")?;

    println!("\nAlignment records:");
    for record in &output.alignments {
        println!(
            "  {} -> ref {} flip={} weight={:.3} shift=({:.2}, {:.2}) psi={:.1}",
            record.image,
            record.reference,
            record.flip,
            record.weight,
            record.shift_x,
            record.shift_y,
            record.psi
        );
    }
    println!("\nClasses:");
    for class in &output.classes {
        println!("  {} ({} contributors)", class.image, class.count);
    }

    output.write_json(&json_path)?;
    println!("\nWrote {}", json_path.display());
    Ok(())
}

//! Alignment records, class records and weighted class averages.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::config::AlignConfig;
use crate::error::{Error, Result};
use crate::image::{BorderMode, Image};
use crate::scores::ChannelMatches;
use crate::source::{ImageRef, ImageSource};
use crate::weights::WeightMatrix;

/// One (experimental image, reference, mirror flag) pair with nonzero weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentRecord {
    /// Running id over the alignment records; absent in class member blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<usize>,
    pub image: String,
    pub weight: f64,
    pub shift_x: f64,
    pub shift_y: f64,
    pub psi: f64,
    pub rot: f64,
    pub tilt: f64,
    pub flip: bool,
    /// 1-based reference number.
    pub reference: usize,
}

/// A populated class: one per reference with at least one contributor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassRecord {
    /// 1-based reference number.
    pub reference: usize,
    /// Location of the class average, `NNNNNN@<dir>/<root>_aligned.stk`.
    pub image: String,
    pub count: usize,
}

/// Contributors of one class, sorted by image identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMembers {
    /// Block name, `classNNNNNN_images@<dir>/<root>_aligned.xmd`.
    pub block: String,
    pub reference: usize,
    pub members: Vec<AlignmentRecord>,
}

/// Weighted average of the re-aligned contributors of one reference.
#[derive(Debug, Clone)]
pub struct ClassAverage {
    /// 0-based reference index.
    pub reference: usize,
    pub location: String,
    pub image: Image,
    /// Raw weight of each contribution, in accumulation order.
    pub weights: Vec<f64>,
}

impl ClassAverage {
    /// Contribution weights divided by their sum.
    pub fn normalized_weights(&self) -> Vec<f64> {
        let total: f64 = self.weights.iter().sum();
        self.weights.iter().map(|w| w / total).collect()
    }
}

/// Everything a run produces.
#[derive(Debug, Clone, Serialize)]
pub struct AlignmentOutput {
    pub alignments: Vec<AlignmentRecord>,
    pub classes: Vec<ClassRecord>,
    pub members: Vec<ClassMembers>,
    #[serde(skip)]
    pub averages: Vec<ClassAverage>,
}

impl AlignmentOutput {
    /// Write the record sets as one pretty-printed JSON document.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let write_err = |source| Error::Write {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush().map_err(write_err)?;

        tracing::info!(
            "Wrote {} alignment records to {}",
            self.alignments.len(),
            path.display()
        );
        Ok(())
    }

    pub fn average(&self, reference: usize) -> Option<&ClassAverage> {
        self.averages.iter().find(|a| a.reference == reference)
    }
}

/// Stack root of an image identity: the file stem after any `NNN@` prefix.
pub fn stack_root(id: &str) -> &str {
    let path = id.rsplit('@').next().unwrap_or(id);
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

/// Assembles [`AlignmentOutput`] from the merged channels and the weights.
#[derive(Debug, Clone, Copy)]
pub struct OutputBuilder<'a> {
    pub config: &'a AlignConfig,
    pub references: &'a [ImageRef],
    pub experimentals: &'a [ImageRef],
    pub original: &'a ChannelMatches,
    pub mirror: &'a ChannelMatches,
    pub weights: &'a WeightMatrix,
}

impl OutputBuilder<'_> {
    pub fn build(&self, source: &dyn ImageSource) -> Result<AlignmentOutput> {
        let alignments = self.alignment_records();

        let mut classes = Vec::new();
        let mut members = Vec::new();
        let mut averages = Vec::new();
        if self.config.generate_out {
            for r in 0..self.references.len() {
                let contributors: Vec<(usize, bool, f64)> = self.weights.contributors(r).collect();
                if contributors.is_empty() {
                    continue;
                }
                averages.push(self.class_average(r, &contributors, source)?);
                classes.push(ClassRecord {
                    reference: r + 1,
                    image: self.average_location(r),
                    count: contributors.len(),
                });
                members.push(self.class_members(r, &contributors));
            }
        }

        tracing::info!(
            "{} alignment records, {} populated classes",
            alignments.len(),
            classes.len()
        );
        Ok(AlignmentOutput {
            alignments,
            classes,
            members,
            averages,
        })
    }

    fn channel(&self, mirror: bool) -> &ChannelMatches {
        if mirror {
            self.mirror
        } else {
            self.original
        }
    }

    fn record(&self, experimental: usize, reference: usize, mirror: bool, weight: f64) -> AlignmentRecord {
        let transform = self.channel(mirror).transforms.get(experimental, reference);
        let shift = transform.shift();
        let orientation = &self.references[reference];
        AlignmentRecord {
            item_id: None,
            image: self.experimentals[experimental].id.clone(),
            weight,
            shift_x: shift.x,
            shift_y: shift.y,
            psi: transform.psi_degrees(),
            rot: orientation.rot,
            tilt: orientation.tilt,
            flip: mirror,
            reference: reference + 1,
        }
    }

    /// Row-major walk over the weights: originals, then mirrors, per image.
    fn alignment_records(&self) -> Vec<AlignmentRecord> {
        let references = self.references.len();
        let mut records = Vec::new();
        for i in 0..self.experimentals.len() {
            for (c, &weight) in self.weights.row(i).iter().enumerate() {
                if weight == 0.0 {
                    continue;
                }
                let (reference, mirror) = if c < references {
                    (c, false)
                } else {
                    (c - references, true)
                };
                let mut record = self.record(i, reference, mirror, weight);
                record.item_id = Some(records.len());
                records.push(record);
            }
        }
        records
    }

    fn class_members(&self, reference: usize, contributors: &[(usize, bool, f64)]) -> ClassMembers {
        let mut members: Vec<AlignmentRecord> = contributors
            .iter()
            .map(|&(i, mirror, weight)| self.record(i, reference, mirror, weight))
            .collect();
        members.sort_by(|a, b| a.image.cmp(&b.image));

        ClassMembers {
            block: format!(
                "class{:06}_images@{}",
                reference + 1,
                self.output_file(reference, "xmd")
            ),
            reference: reference + 1,
            members,
        }
    }

    fn class_average(
        &self,
        reference: usize,
        contributors: &[(usize, bool, f64)],
        source: &dyn ImageSource,
    ) -> Result<ClassAverage> {
        let mut sum: Option<Image> = None;
        let mut weights = Vec::with_capacity(contributors.len());

        for &(i, mirror, weight) in contributors {
            let mut image = source.read(&self.experimentals[i])?;
            if mirror {
                image.flip_x();
            }
            let transform = self.channel(mirror).transforms.get(i, reference);
            let aligned = image.warped(transform, BorderMode::Wrap);

            let acc = sum.get_or_insert_with(|| Image::zeros(aligned.width(), aligned.height()));
            if acc.dimensions() != aligned.dimensions() {
                return Err(Error::DimensionMismatch {
                    id: self.experimentals[i].id.clone(),
                    expected: acc.dimensions(),
                    actual: aligned.dimensions(),
                });
            }
            for (a, v) in acc.pixels_mut().iter_mut().zip(aligned.pixels()) {
                *a += weight * v;
            }
            weights.push(weight);
        }

        let total: f64 = weights.iter().sum();
        let mut image = sum.unwrap_or_else(|| Image::zeros(0, 0));
        image.pixels_mut().iter_mut().for_each(|v| *v /= total);

        Ok(ClassAverage {
            reference,
            location: self.average_location(reference),
            image,
            weights,
        })
    }

    fn average_location(&self, reference: usize) -> String {
        format!("{:06}@{}", reference + 1, self.output_file(reference, "stk"))
    }

    fn output_file(&self, reference: usize, extension: &str) -> String {
        format!(
            "{}/{}_aligned.{}",
            self.config.output_dir.display(),
            stack_root(&self.references[reference].id),
            extension
        )
    }
}

//! Score and transform storage across reference batches, and the combined views.

use crate::channel::ChannelResult;
use crate::correlation::NO_SCORE;
use crate::transform::Transform;

/// Best score per (experimental, reference) pair; [`NO_SCORE`] until evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMatrix {
    experimentals: usize,
    references: usize,
    data: Vec<f64>,
}

impl ScoreMatrix {
    pub fn new(experimentals: usize, references: usize) -> Self {
        Self {
            experimentals,
            references,
            data: vec![NO_SCORE; experimentals * references],
        }
    }

    #[inline]
    pub fn experimentals(&self) -> usize {
        self.experimentals
    }

    #[inline]
    pub fn references(&self) -> usize {
        self.references
    }

    #[inline]
    pub fn get(&self, experimental: usize, reference: usize) -> f64 {
        self.data[experimental * self.references + reference]
    }

    #[inline]
    pub fn set(&mut self, experimental: usize, reference: usize, score: f64) {
        self.data[experimental * self.references + reference] = score;
    }

    pub fn row(&self, experimental: usize) -> &[f64] {
        let start = experimental * self.references;
        &self.data[start..start + self.references]
    }
}

/// Winning transform per pair, one arena slot per experimental index.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformStore {
    slots: Vec<Box<[Transform]>>,
}

impl TransformStore {
    pub fn new(experimentals: usize, references: usize) -> Self {
        Self {
            slots: (0..experimentals)
                .map(|_| vec![Transform::identity(); references].into_boxed_slice())
                .collect(),
        }
    }

    #[inline]
    pub fn get(&self, experimental: usize, reference: usize) -> &Transform {
        &self.slots[experimental][reference]
    }

    #[inline]
    pub fn set(&mut self, experimental: usize, reference: usize, transform: Transform) {
        self.slots[experimental][reference] = transform;
    }

    pub fn slot(&self, experimental: usize) -> &[Transform] {
        &self.slots[experimental]
    }
}

/// Per reference of a batch, the better of the TR and RT runs.
///
/// TR wins only on a strictly higher score.
pub fn merge_channel(result: &ChannelResult) -> Vec<(f64, Transform)> {
    (0..result.tr.len())
        .map(|k| {
            let (tr, rt) = (result.tr.score(k), result.rt.score(k));
            if tr > rt {
                (tr, *result.tr.transform(k))
            } else {
                (rt, *result.rt.transform(k))
            }
        })
        .collect()
}

/// Scores and winning transforms of one orientation channel.
#[derive(Debug, Clone)]
pub struct ChannelMatches {
    pub scores: ScoreMatrix,
    pub transforms: TransformStore,
}

impl ChannelMatches {
    pub fn new(experimentals: usize, references: usize) -> Self {
        Self {
            scores: ScoreMatrix::new(experimentals, references),
            transforms: TransformStore::new(experimentals, references),
        }
    }

    /// Store the merged results of a batch that starts at reference `first`.
    pub fn record(&mut self, experimental: usize, first: usize, result: &ChannelResult) {
        for (k, (score, transform)) in merge_channel(result).into_iter().enumerate() {
            self.scores.set(experimental, first + k, score);
            self.transforms.set(experimental, first + k, transform);
        }
    }
}

/// Original and mirror scores side by side.
///
/// Row view: experimental `i` over `[original refs | mirror refs]`.
/// Column view: reference `r` over `[original exps ; mirror exps]`.
#[derive(Debug, Clone)]
pub struct CombinedScores {
    experimentals: usize,
    references: usize,
    data: Vec<f64>,
}

impl CombinedScores {
    pub fn new(original: &ScoreMatrix, mirror: &ScoreMatrix) -> Self {
        debug_assert_eq!(original.experimentals(), mirror.experimentals());
        debug_assert_eq!(original.references(), mirror.references());

        let experimentals = original.experimentals();
        let references = original.references();
        let mut data = Vec::with_capacity(experimentals * references * 2);
        for i in 0..experimentals {
            data.extend_from_slice(original.row(i));
            data.extend_from_slice(mirror.row(i));
        }
        Self {
            experimentals,
            references,
            data,
        }
    }

    #[inline]
    pub fn experimentals(&self) -> usize {
        self.experimentals
    }

    #[inline]
    pub fn references(&self) -> usize {
        self.references
    }

    /// Row length, twice the reference count.
    #[inline]
    pub fn width(&self) -> usize {
        2 * self.references
    }

    pub fn row(&self, experimental: usize) -> &[f64] {
        let start = experimental * self.width();
        &self.data[start..start + self.width()]
    }

    /// Scores of reference `reference` against every original, then every mirror.
    pub fn column(&self, reference: usize) -> Vec<f64> {
        let original = (0..self.experimentals).map(|i| self.row(i)[reference]);
        let mirror = (0..self.experimentals).map(|i| self.row(i)[reference + self.references]);
        original.chain(mirror).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refine::BestMatches;

    fn matches(scores: &[f64], angle: f64) -> BestMatches {
        let mut best = BestMatches::new(scores.len());
        for (k, &s) in scores.iter().enumerate() {
            best.record(k, s, Transform::rotation(angle));
        }
        best
    }

    #[test]
    fn test_merge_keeps_higher_and_prefers_rt_on_tie() {
        let result = ChannelResult {
            tr: matches(&[0.9, 0.4, 0.5], 10.0),
            rt: matches(&[0.8, 0.6, 0.5], 20.0),
        };
        let merged = merge_channel(&result);

        assert_eq!(merged[0], (0.9, Transform::rotation(10.0)));
        assert_eq!(merged[1], (0.6, Transform::rotation(20.0)));
        assert_eq!(merged[2], (0.5, Transform::rotation(20.0)));
    }

    #[test]
    fn test_record_places_batch_at_offset() {
        let mut channel = ChannelMatches::new(2, 5);
        let result = ChannelResult {
            tr: matches(&[0.3, 0.7], 1.0),
            rt: matches(&[0.2, 0.1], 2.0),
        };
        channel.record(1, 3, &result);

        assert_eq!(channel.scores.row(0), &[NO_SCORE; 5]);
        assert_eq!(channel.scores.row(1), &[NO_SCORE, NO_SCORE, NO_SCORE, 0.3, 0.7]);
        assert_eq!(channel.transforms.get(1, 4), &Transform::rotation(1.0));
        assert_eq!(channel.transforms.get(1, 0), &Transform::identity());
    }

    #[test]
    fn test_combined_views() {
        let mut original = ScoreMatrix::new(2, 2);
        let mut mirror = ScoreMatrix::new(2, 2);
        original.set(0, 0, 0.1);
        original.set(0, 1, 0.2);
        original.set(1, 0, 0.3);
        original.set(1, 1, 0.4);
        mirror.set(0, 0, 0.5);
        mirror.set(0, 1, 0.6);
        mirror.set(1, 0, 0.7);
        mirror.set(1, 1, 0.8);

        let combined = CombinedScores::new(&original, &mirror);
        assert_eq!(combined.width(), 4);
        assert_eq!(combined.row(1), &[0.3, 0.4, 0.7, 0.8]);
        assert_eq!(combined.column(1), vec![0.2, 0.4, 0.6, 0.8]);
    }
}

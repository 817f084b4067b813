//! Alternating translation/rotation refinement of one experimental batch.
//!
//! The experimental image is replicated once per resident reference, so index
//! `k` of every batch pairs with reference `k`. Each of the [`Refinement::STEPS`]
//! steps correlates in the mode of the current [`RefineState`], folds the
//! increments into the per-index composites and keeps the best score seen per
//! index. Between steps the original batch is re-warped by the composites and
//! re-projected for the next state only.


use crate::correlation::{CorrelationEngine, Peak, NO_SCORE};
use crate::error::{Error, Result};
use crate::image::{BorderMode, ImageBatch};
use crate::preprocess::{PreprocessedBatch, Preprocessor, Stage, Stages};
use crate::transform::Transform;

/// Degree of freedom estimated by the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineState {
    Translate,
    Rotate,
}

impl RefineState {
    #[inline]
    pub fn other(self) -> Self {
        match self {
            RefineState::Translate => RefineState::Rotate,
            RefineState::Rotate => RefineState::Translate,
        }
    }

    /// Preprocessing stage the correlation of this state consumes.
    #[inline]
    pub fn stage(self) -> Stage {
        match self {
            RefineState::Translate => Stage::Translation,
            RefineState::Rotate => Stage::Rotation,
        }
    }
}

/// Keep-max accumulator: best score per index and the composite that reached it.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatches {
    scores: Vec<f64>,
    transforms: Vec<Transform>,
}

impl BestMatches {
    pub fn new(count: usize) -> Self {
        Self {
            scores: vec![NO_SCORE; count],
            transforms: vec![Transform::identity(); count],
        }
    }

    /// Record `score` for `index` if it beats the current best.
    pub fn record(&mut self, index: usize, score: f64, transform: Transform) -> bool {
        if score > self.scores[index] {
            self.scores[index] = score;
            self.transforms[index] = transform;
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    #[inline]
    pub fn score(&self, index: usize) -> f64 {
        self.scores[index]
    }

    #[inline]
    pub fn transform(&self, index: usize) -> &Transform {
        &self.transforms[index]
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }
}

/// Six-step `Translate ⇄ Rotate` state machine for one starting order.
#[derive(Debug, Clone)]
pub struct Refinement {
    start: RefineState,
    state: RefineState,
    step: usize,
    composites: Vec<Transform>,
    best: BestMatches,
}

impl Refinement {
    pub const STEPS: usize = 6;

    pub fn new(start: RefineState, count: usize) -> Self {
        Self {
            start,
            state: start,
            step: 0,
            composites: vec![Transform::identity(); count],
            best: BestMatches::new(count),
        }
    }

    #[inline]
    pub fn start(&self) -> RefineState {
        self.start
    }

    #[inline]
    pub fn state(&self) -> RefineState {
        self.state
    }

    /// Steps completed so far.
    #[inline]
    pub fn step(&self) -> usize {
        self.step
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.step >= Self::STEPS
    }

    /// Current composite per index, applied to the original image.
    pub fn composites(&self) -> &[Transform] {
        &self.composites
    }

    pub fn best(&self) -> &BestMatches {
        &self.best
    }

    /// Fold in the peaks of the current step.
    ///
    /// Returns `true` if another step follows; the state has then flipped.
    pub fn advance(&mut self, peaks: &[Peak]) -> Result<bool> {
        if self.is_finished() {
            return Err(Error::Correlation(format!(
                "refinement already completed {} steps",
                Self::STEPS
            )));
        }
        if peaks.len() != self.composites.len() {
            return Err(Error::Correlation(format!(
                "expected {} peaks, got {}",
                self.composites.len(),
                peaks.len()
            )));
        }

        for (k, (composite, peak)) in self.composites.iter_mut().zip(peaks).enumerate() {
            *composite = composite.then(&peak.increment);
            self.best.record(k, peak.score, *composite);
        }

        self.step += 1;
        if self.is_finished() {
            return Ok(false);
        }
        self.state = self.state.other();
        Ok(true)
    }

    pub fn finish(self) -> BestMatches {
        self.best
    }
}

/// Everything a refinement run reads but never mutates.
#[derive(Debug, Clone, Copy)]
pub struct RefineContext<'a> {
    pub engine: CorrelationEngine<'a>,
    pub preprocessor: Preprocessor<'a>,
    /// Resident reference batch, prepared for both stages.
    pub references: &'a PreprocessedBatch,
    pub max_shift: f64,
}

/// Run all steps of one starting order against the resident references.
///
/// `experimental` holds one copy of the experimental image per reference.
pub fn refine(
    ctx: &RefineContext<'_>,
    experimental: &ImageBatch,
    start: RefineState,
) -> Result<BestMatches> {
    let mut refinement = Refinement::new(start, experimental.count());
    let mut prepared = ctx
        .preprocessor
        .prepare(experimental, Stages::Only(start.stage()))?;

    loop {
        let peaks = match refinement.state() {
            RefineState::Translate => {
                ctx.engine
                    .translation(ctx.references, &prepared, ctx.max_shift)?
            }
            RefineState::Rotate => ctx.engine.rotation(ctx.references, &prepared)?,
        };
        let state = refinement.state();
        if !refinement.advance(&peaks)? {
            break;
        }
        tracing::debug!(
            "{:?} step {} of {} done, next {:?}",
            state,
            refinement.step(),
            Refinement::STEPS,
            refinement.state()
        );

        let working = experimental.warped(refinement.composites(), BorderMode::Zero);
        ctx.preprocessor
            .reproject(&mut prepared, &working, refinement.state().stage())?;
    }

    Ok(refinement.finish())
}

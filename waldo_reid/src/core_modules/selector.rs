// THEORY:
// The `FrameSelector` makes the per-frame decision: of everyone the detector saw in
// this frame, who (if anyone) is the enrolled person?
//
// Every detection is cropped, described, and scored against the current pool. The
// single candidate with the strictly largest score wins; ties go to whichever the
// detector listed first. The winner is the tracked target only if its score clears
// the acceptance threshold, which is exclusive: a score exactly at the threshold is
// rejected.
//
// Boxes that crop to nothing are dropped before extraction. A frame with no usable
// candidates is simply a rejected frame.

use crate::core_modules::histogram::{FeatureExtractor, FeatureVector};
use crate::core_modules::matcher::SimilarityMatcher;
use crate::core_modules::region::{BoundingBox, Detection, Frame, Region};
use tracing::debug;

/// One scored detection. Lives for a single frame.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub region: Region,
    pub feature: FeatureVector,
    pub score: f64,
}

/// The frame-level decision.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Highest-scoring candidate of the frame, if any candidate was usable.
    pub best: Option<Candidate>,
    /// Score of `best`, 0.0 when there was none.
    pub score: f64,
    /// Whether `best` cleared the acceptance threshold.
    pub accepted: bool,
    /// Number of candidates that were scored.
    pub candidates_scored: usize,
}

impl MatchResult {
    pub fn rejected_empty() -> Self {
        Self { best: None, score: 0.0, accepted: false, candidates_scored: 0 }
    }

    /// The accepted candidate, if the frame was accepted.
    pub fn accepted_candidate(&self) -> Option<&Candidate> {
        if self.accepted { self.best.as_ref() } else { None }
    }
}

/// Picks the best candidate of a frame against a reference pool.
#[derive(Debug, Clone, Copy)]
pub struct FrameSelector {
    extractor: FeatureExtractor,
    matcher: SimilarityMatcher,
    acceptance_threshold: f64,
}

impl FrameSelector {
    pub fn new(
        extractor: FeatureExtractor,
        matcher: SimilarityMatcher,
        acceptance_threshold: f64,
    ) -> Self {
        Self { extractor, matcher, acceptance_threshold }
    }

    pub fn acceptance_threshold(&self) -> f64 {
        self.acceptance_threshold
    }

    /// `score > threshold`, exclusive.
    pub fn is_accepted(&self, score: f64) -> bool {
        score > self.acceptance_threshold
    }

    /// Scores every usable detection against `pool` and returns the frame decision.
    pub fn select<'a, P>(&self, frame: &Frame, detections: &[Detection], pool: P) -> MatchResult
    where
        P: IntoIterator<Item = &'a FeatureVector> + Clone,
    {
        let mut best: Option<Candidate> = None;
        let mut candidates_scored = 0;

        for detection in detections {
            let Some(region) = detection.bbox.crop(frame) else {
                debug!(bbox = ?detection.bbox, "dropping degenerate box");
                continue;
            };
            let feature = self.extractor.extract(&region);
            let score = self.matcher.score(&feature, pool.clone());
            candidates_scored += 1;

            // Strictly greater: the first of equal scores is kept.
            if best.as_ref().is_none_or(|b| score > b.score) {
                best = Some(Candidate {
                    bbox: detection.bbox,
                    confidence: detection.confidence,
                    region,
                    feature,
                    score,
                });
            }
        }

        let score = best.as_ref().map_or(0.0, |b| b.score);
        MatchResult {
            accepted: best.is_some() && self.is_accepted(score),
            best,
            score,
            candidates_scored,
        }
    }
}

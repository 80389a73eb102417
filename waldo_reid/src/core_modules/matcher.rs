// THEORY:
// The `matcher` module is the comparative lens of the engine, the histogram analogue
// of `SmartPixel`: a `FeatureVector` is meaningless on its own, and its value is in
// how strongly it correlates with the reference pool.
//
// Two levels:
// 1.  **Pairwise**: `correlation` is the Pearson correlation of two histograms taken
//     bin by bin. It lives in [-1, 1], is 1.0 for identical shapes, and ignores
//     uniform scaling of either side.
// 2.  **Against a pool**: `SimilarityMatcher::score` folds the pairwise scores of a
//     candidate against every pool member into one number. The default policy is the
//     *maximum*. The pool holds front, back, and side views, and any one live view is
//     naturally unlike most of them, so resembling any single stored view strongly
//     counts as a match. `Mean` and `TopKMean` exist for comparing policies on
//     labelled sequences.
//
// An empty pool scores 0.0 ("no evidence") rather than failing, so a session with
// nothing enrolled degrades to "never accepts".

use crate::core_modules::histogram::FeatureVector;
use serde::{Deserialize, Serialize};

const VARIANCE_EPSILON: f64 = 1e-12;

/// How a candidate's pairwise scores against the pool become one score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchPolicy {
    /// Best single pool member.
    #[default]
    Max,
    /// Average over the whole pool.
    Mean,
    /// Average over the `k` best pool members.
    TopKMean(usize),
}

/// Pearson correlation of two histograms of the same shape.
///
/// Returns 0.0 when the shapes differ or when either histogram is flat (zero
/// variance), since neither case carries evidence of a match.
pub fn correlation(a: &FeatureVector, b: &FeatureVector) -> f64 {
    if !a.same_shape(b) || a.is_empty() {
        return 0.0;
    }
    let (xs, ys) = (a.as_slice(), b.as_slice());
    let n = xs.len() as f64;
    let mean_x = xs.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_y = ys.iter().map(|&v| v as f64).sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut variance_x = 0.0;
    let mut variance_y = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        let dx = x as f64 - mean_x;
        let dy = y as f64 - mean_y;
        covariance += dx * dy;
        variance_x += dx * dx;
        variance_y += dy * dy;
    }

    let denominator = (variance_x * variance_y).sqrt();
    if denominator < VARIANCE_EPSILON {
        return 0.0;
    }
    (covariance / denominator).clamp(-1.0, 1.0)
}

/// Scores candidates against a reference pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimilarityMatcher {
    policy: MatchPolicy,
}

impl SimilarityMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Folds the candidate's correlation with every pool member into one score.
    /// An empty pool scores 0.0.
    pub fn score<'a, I>(&self, candidate: &FeatureVector, pool: I) -> f64
    where
        I: IntoIterator<Item = &'a FeatureVector>,
    {
        let pool = pool.into_iter();
        match self.policy {
            MatchPolicy::Max => pool
                .map(|reference| correlation(candidate, reference))
                .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))))
                .unwrap_or(0.0),
            MatchPolicy::Mean => {
                let (sum, count) = pool.fold((0.0, 0usize), |(sum, count), reference| {
                    (sum + correlation(candidate, reference), count + 1)
                });
                if count == 0 { 0.0 } else { sum / count as f64 }
            }
            MatchPolicy::TopKMean(k) => {
                let mut scores: Vec<f64> =
                    pool.map(|reference| correlation(candidate, reference)).collect();
                if scores.is_empty() || k == 0 {
                    return 0.0;
                }
                scores.sort_by(|a, b| b.total_cmp(a));
                let take = k.min(scores.len());
                scores[..take].iter().sum::<f64>() / take as f64
            }
        }
    }
}

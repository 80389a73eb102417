// THEORY:
// Every tunable of the engine lives in one plain configuration tree, split along the
// two phases of a session: enrollment (how the reference identity is captured) and
// tracking (how candidates are scored, accepted, and learned from). The defaults are
// the values the engine was calibrated with; a deployment can load a JSON file and
// then override individual values from `WR_*` environment variables.
//
// The one relationship the engine depends on is enforced by `validate`: the bar to
// *learn* from a sample (admission) must sit strictly above the bar to *act* on it
// (acceptance). Otherwise a single false match could teach the cache to accept more
// false matches.

use crate::core_modules::enrollment::PoseFailurePolicy;
use crate::core_modules::matcher::MatchPolicy;
use crate::error::{ReidError, ReidResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Hue bins of the descriptor histogram.
pub const DEFAULT_HUE_BINS: usize = 50;
/// Saturation bins of the descriptor histogram.
pub const DEFAULT_SATURATION_BINS: usize = 60;

/// Tunables for the per-frame matching loop and the adaptive cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// A candidate is the tracked target only if its best score is strictly above this.
    pub acceptance_threshold: f64,
    /// A sample is learned into the adaptive cache only if its score is strictly above this.
    pub admission_threshold: f64,
    /// Minimum time between two cache admissions.
    #[serde(with = "duration_secs")]
    pub admission_interval: Duration,
    /// Maximum number of learned descriptors kept in the adaptive cache.
    pub cache_capacity: usize,
    /// Minimum time between two offset reports to the sink.
    #[serde(with = "duration_secs")]
    pub report_interval: Duration,
    /// Confidence floor handed to the detector on every call.
    pub detector_confidence: f32,
    /// How a candidate's pairwise scores against the pool are folded into one score.
    pub match_policy: MatchPolicy,
    pub hue_bins: usize,
    pub saturation_bins: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.7,
            admission_threshold: 0.8,
            admission_interval: Duration::from_secs(10),
            cache_capacity: 20,
            report_interval: Duration::from_secs(1),
            detector_confidence: 0.5,
            match_policy: MatchPolicy::Max,
            hue_bins: DEFAULT_HUE_BINS,
            saturation_bins: DEFAULT_SATURATION_BINS,
        }
    }
}

/// Tunables for the four-pose enrollment sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    /// Live-preview countdown before each pose is captured.
    #[serde(with = "duration_secs")]
    pub countdown: Duration,
    /// Pause between preview frames during the countdown.
    #[serde(with = "duration_secs")]
    pub preview_interval: Duration,
    /// How long the capture confirmation stays on screen.
    #[serde(with = "duration_secs")]
    pub confirmation_hold: Duration,
    pub pose_failure_policy: PoseFailurePolicy,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(5),
            preview_interval: Duration::from_millis(33),
            confirmation_hold: Duration::from_secs(1),
            pose_failure_policy: PoseFailurePolicy::Skip,
        }
    }
}

/// Top-level configuration for one enrollment + tracking session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReidConfig {
    pub tracking: TrackingConfig,
    pub enrollment: EnrollmentConfig,
}

impl ReidConfig {
    /// Loads a configuration from a JSON file. Missing fields fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> ReidResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `WR_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> ReidResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup. Split out from
    /// `with_env_overrides` so it can be driven without touching the process env.
    pub fn with_overrides<F>(mut self, lookup: F) -> ReidResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let t = &mut self.tracking;
        if let Some(v) = parse_var::<f64>(&lookup, "WR_ACCEPTANCE_THRESHOLD")? {
            t.acceptance_threshold = v;
        }
        if let Some(v) = parse_var::<f64>(&lookup, "WR_ADMISSION_THRESHOLD")? {
            t.admission_threshold = v;
        }
        if let Some(v) = parse_var::<f64>(&lookup, "WR_ADMISSION_INTERVAL_SECS")? {
            t.admission_interval = secs(v, "WR_ADMISSION_INTERVAL_SECS")?;
        }
        if let Some(v) = parse_var::<usize>(&lookup, "WR_CACHE_CAPACITY")? {
            t.cache_capacity = v;
        }
        if let Some(v) = parse_var::<f64>(&lookup, "WR_REPORT_INTERVAL_SECS")? {
            t.report_interval = secs(v, "WR_REPORT_INTERVAL_SECS")?;
        }
        if let Some(v) = parse_var::<f32>(&lookup, "WR_DETECTOR_CONFIDENCE")? {
            t.detector_confidence = v;
        }

        let e = &mut self.enrollment;
        if let Some(v) = parse_var::<f64>(&lookup, "WR_COUNTDOWN_SECS")? {
            e.countdown = secs(v, "WR_COUNTDOWN_SECS")?;
        }
        if let Some(v) = parse_var::<u32>(&lookup, "WR_POSE_RETRIES")? {
            e.pose_failure_policy = if v == 0 {
                PoseFailurePolicy::Skip
            } else {
                PoseFailurePolicy::Retry { max_attempts: v }
            };
        }

        self.validate()?;
        Ok(self)
    }

    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> ReidResult<()> {
        let t = &self.tracking;
        for (name, value) in [
            ("acceptance_threshold", t.acceptance_threshold),
            ("admission_threshold", t.admission_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ReidError::invalid_config(format!(
                    "{name} must be within [-1, 1], got {value}"
                )));
            }
        }
        if t.admission_threshold <= t.acceptance_threshold {
            return Err(ReidError::invalid_config(format!(
                "admission_threshold ({}) must be strictly greater than acceptance_threshold ({})",
                t.admission_threshold, t.acceptance_threshold
            )));
        }
        if t.cache_capacity == 0 {
            return Err(ReidError::invalid_config("cache_capacity must be at least 1"));
        }
        if t.hue_bins == 0 || t.saturation_bins == 0 {
            return Err(ReidError::invalid_config("histogram bin counts must be non-zero"));
        }
        if !(0.0..=1.0).contains(&t.detector_confidence) {
            return Err(ReidError::invalid_config("detector_confidence must be within [0, 1]"));
        }
        if let MatchPolicy::TopKMean(0) = t.match_policy {
            return Err(ReidError::invalid_config("TopKMean needs k >= 1"));
        }
        let e = &self.enrollment;
        if let PoseFailurePolicy::Retry { max_attempts: 0 } = e.pose_failure_policy {
            return Err(ReidError::invalid_config("Retry needs max_attempts >= 1"));
        }
        // The countdown only advances by sleeping between previews.
        if e.preview_interval.is_zero() {
            return Err(ReidError::invalid_config("preview_interval must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> ReidResult<Option<T>> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ReidError::invalid_config(format!("{key}: cannot parse '{raw}'"))),
        _ => Ok(None),
    }
}

fn secs(value: f64, key: &str) -> ReidResult<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ReidError::invalid_config(format!("{key}: invalid duration {value}")))
}

/// Serde helper storing durations as fractional seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

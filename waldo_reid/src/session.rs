// THEORY:
// The `session` module is the top-level API of the tracking phase. It wraps the whole
// per-frame stack into one object that owns all of a session's mutable state: the
// immutable base set, the adaptive cache with its admission gate, and the report
// throttle. Nothing lives in process-wide globals, so two sessions never share
// anything and a test can build as many as it likes.
//
// Per frame (IDLE -> DETECT -> SCORE_ALL -> SELECT_BEST -> ACCEPTED | REJECTED):
//   Stage 1: the caller's detector proposes boxes (at the configured confidence floor).
//   Stage 2: the selector scores every box against base set ∪ cache, rebuilt fresh.
//   Stage 3: an accepted winner may be learned into the cache (gated, stricter bar).
//   Stage 4: the winner's offset from frame center is reported, throttled.
//
// `run` is the reference single-threaded loop. One frame is fully processed before
// the next is read, and the stop signal is checked once per iteration, never
// mid-frame.

use crate::config::TrackingConfig;
use crate::core_modules::adaptive_cache::{AdaptiveCache, AdmissionGate};
use crate::core_modules::enrollment::{BaseFeatureSet, Enrollment};
use crate::core_modules::geometry::{offset_from_center, Offset, ReportThrottle};
use crate::core_modules::histogram::{FeatureExtractor, FeatureVector};
use crate::core_modules::interfaces::{
    Clock, Detector, FrameSource, OffsetReport, ReportSink, StopSignal,
};
use crate::core_modules::matcher::SimilarityMatcher;
use crate::core_modules::region::{Detection, Frame};
use crate::core_modules::selector::{FrameSelector, MatchResult};
use crate::error::ReidResult;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything that came out of processing one frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub result: MatchResult,
    /// Offset of the accepted candidate, computed for every accepted frame.
    pub offset: Option<Offset>,
    /// The throttled report, present only when one was due this frame.
    pub report: Option<OffsetReport>,
    /// Whether the adaptive cache learned from this frame.
    pub cache_updated: bool,
    pub cache_len: usize,
}

/// Running counters of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub frames: u64,
    pub accepted_frames: u64,
    pub admissions: u64,
    pub reports: u64,
}

/// Point-in-time view of a session for telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub stats: SessionStats,
    pub base_features: usize,
    pub cache_features: usize,
    pub last_score: f64,
    pub last_accepted: bool,
    pub last_offset: Option<Offset>,
    /// Frames per second over the session so far.
    pub fps: f64,
}

/// One enrollment's worth of tracking state.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    base: BaseFeatureSet,
    cache: AdaptiveCache,
    gate: AdmissionGate,
    selector: FrameSelector,
    report_throttle: ReportThrottle,
    detector_confidence: f32,
    started_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    stats: SessionStats,
    last_score: f64,
    last_accepted: bool,
    last_offset: Option<Offset>,
}

impl TrackingSession {
    /// Creates a session over `base`. An empty base set is allowed here; it simply
    /// never accepts. Use `from_enrollment` to refuse starting without references.
    pub fn new(base: BaseFeatureSet, config: &TrackingConfig) -> Self {
        let extractor = FeatureExtractor::new(config.hue_bins, config.saturation_bins);
        let matcher = SimilarityMatcher::new(config.match_policy);
        Self {
            base,
            cache: AdaptiveCache::new(config.cache_capacity),
            gate: AdmissionGate::new(config.admission_threshold, config.admission_interval),
            selector: FrameSelector::new(extractor, matcher, config.acceptance_threshold),
            report_throttle: ReportThrottle::new(config.report_interval),
            detector_confidence: config.detector_confidence,
            started_at: None,
            last_frame_at: None,
            stats: SessionStats::default(),
            last_score: 0.0,
            last_accepted: false,
            last_offset: None,
        }
    }

    /// Starts tracking from an enrollment run, refusing cancelled or empty ones.
    pub fn from_enrollment(enrollment: Enrollment, config: &TrackingConfig) -> ReidResult<Self> {
        let base = enrollment.into_base_set()?;
        info!(base_features = base.len(), "starting tracking session");
        Ok(Self::new(base, config))
    }

    pub fn base(&self) -> &BaseFeatureSet {
        &self.base
    }

    pub fn cache(&self) -> &AdaptiveCache {
        &self.cache
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// The comparison pool: base set followed by the cache, oldest first.
    pub fn pool(&self) -> impl Iterator<Item = &FeatureVector> + Clone + '_ {
        self.base.features().chain(self.cache.iter())
    }

    pub fn pool_len(&self) -> usize {
        self.base.len() + self.cache.len()
    }

    /// Runs the decision stack on already-detected boxes.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        now: Instant,
    ) -> FrameReport {
        let started_at = *self.started_at.get_or_insert(now);
        self.last_frame_at = Some(now);
        self.stats.frames += 1;

        // Stage 2: score everyone against a freshly assembled pool.
        let result = self.selector.select(frame, detections, self.pool());
        self.last_score = result.score;
        self.last_accepted = result.accepted;

        let Some(candidate) = result.accepted_candidate() else {
            debug!(score = result.score, candidates = result.candidates_scored, "frame rejected");
            return FrameReport {
                cache_len: self.cache.len(),
                result,
                offset: None,
                report: None,
                cache_updated: false,
            };
        };
        self.stats.accepted_frames += 1;

        // Stage 3: learn from the sample if it clears the stricter, time-gated bar.
        let cache_updated =
            self.gate.try_admit(&mut self.cache, &candidate.feature, candidate.score, now);
        if cache_updated {
            self.stats.admissions += 1;
        }

        // Stage 4: geometry, with throttled reporting.
        let offset = offset_from_center(&candidate.bbox, frame.width(), frame.height());
        self.last_offset = Some(offset);
        let report = self.report_throttle.ready(now).then(|| OffsetReport {
            offset,
            score: candidate.score,
            session_time: now.saturating_duration_since(started_at),
        });
        if report.is_some() {
            self.stats.reports += 1;
        }
        debug!(
            score = candidate.score,
            rel_x = offset.rel_x,
            rel_y = offset.rel_y,
            cache_updated,
            "frame accepted"
        );

        FrameReport {
            cache_len: self.cache.len(),
            result,
            offset: Some(offset),
            report,
            cache_updated,
        }
    }

    /// Detects, decides, and forwards observable output to `sink`.
    pub fn step(
        &mut self,
        frame: &Frame,
        detector: &mut dyn Detector,
        sink: &mut dyn ReportSink,
        now: Instant,
    ) -> FrameReport {
        // Stage 1: detector failures degrade to an empty frame.
        let detections = detector.detect(frame, self.detector_confidence).unwrap_or_else(|err| {
            warn!(error = %err, "detector failed, treating frame as empty");
            Vec::new()
        });
        let report = self.process_frame(frame, &detections, now);
        if let Some(offset_report) = &report.report {
            sink.offset(offset_report);
        }
        if report.cache_updated {
            sink.feature_count(report.cache_len);
        }
        report
    }

    /// Frame loop: runs until the stop signal is raised or the source ends.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn Detector,
        sink: &mut dyn ReportSink,
        clock: &dyn Clock,
        stop: &StopSignal,
    ) -> ReidResult<SessionStats> {
        info!(pool = self.pool_len(), "tracking loop started");
        while !stop.is_stopped() {
            let Some(frame) = source.next_frame()? else {
                info!("frame source ended");
                break;
            };
            self.step(&frame, detector, sink, clock.now());
        }
        info!(
            frames = self.stats.frames,
            accepted = self.stats.accepted_frames,
            admissions = self.stats.admissions,
            "tracking loop stopped"
        );
        Ok(self.stats)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let elapsed = match (self.started_at, self.last_frame_at) {
            (Some(start), Some(last)) => last.saturating_duration_since(start),
            _ => Duration::ZERO,
        };
        // N frames span N-1 intervals.
        let fps = if elapsed.is_zero() || self.stats.frames < 2 {
            0.0
        } else {
            (self.stats.frames - 1) as f64 / elapsed.as_secs_f64()
        };
        SessionSnapshot {
            stats: self.stats,
            base_features: self.base.len(),
            cache_features: self.cache.len(),
            last_score: self.last_score,
            last_accepted: self.last_accepted,
            last_offset: self.last_offset,
            fps,
        }
    }
}

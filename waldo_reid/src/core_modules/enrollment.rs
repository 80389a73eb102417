// THEORY:
// Enrollment is how the engine learns who to follow. The operator stands in front of
// the camera and is guided through four fixed poses (front, back, left, right). For
// each pose the controller runs a small state machine:
//
//     COUNTDOWN (live preview) -> CAPTURE (one frame) -> DETECT -> captured | skipped
//
// The four resulting descriptors form the `BaseFeatureSet`: the permanent,
// never-mutated reference for the rest of the session. Everything the adaptive cache
// learns later is judged against it.
//
// Failure policy: if nobody is detected when a pose is captured, the default policy
// skips to the next pose instead of re-prompting, so the base set can end up with
// fewer than four views. `PoseFailurePolicy::Retry` re-runs the countdown for the
// same pose a bounded number of times instead.
//
// The operator can abort at any time through the `StopSignal`. An aborted enrollment
// produces no base set at all, and tracking refuses to start without one.

use crate::config::{EnrollmentConfig, ReidConfig};
use crate::core_modules::histogram::{FeatureExtractor, FeatureVector};
use crate::core_modules::interfaces::{Clock, Detector, EnrollmentDisplay, FrameSource, StopSignal};
use crate::core_modules::region::{Frame, Region};
use crate::error::{ReidError, ReidResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// The four enrollment orientations, in capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pose {
    Front,
    Back,
    Left,
    Right,
}

impl Pose {
    pub const SEQUENCE: [Pose; 4] = [Pose::Front, Pose::Back, Pose::Left, Pose::Right];
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Pose::Front => "front",
            Pose::Back => "back",
            Pose::Left => "left",
            Pose::Right => "right",
        };
        f.write_str(label)
    }
}

/// What to do when nobody is detected at capture time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoseFailurePolicy {
    /// Give up on the pose and move on to the next one.
    #[default]
    Skip,
    /// Re-run countdown and capture for the same pose, up to `max_attempts` in total.
    Retry { max_attempts: u32 },
}

impl PoseFailurePolicy {
    fn attempts(&self) -> u32 {
        match self {
            PoseFailurePolicy::Skip => 1,
            PoseFailurePolicy::Retry { max_attempts } => (*max_attempts).max(1),
        }
    }
}

/// Immutable reference descriptors captured during enrollment, one per pose.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseFeatureSet {
    entries: Vec<(Pose, FeatureVector)>,
}

/// On-disk diagnostic snapshot of a base set.
#[derive(Debug, Serialize, Deserialize)]
struct BaseSetSnapshot {
    poses: Vec<PoseSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PoseSnapshot {
    pose: Pose,
    hue_bins: usize,
    saturation_bins: usize,
    bins: Vec<f32>,
}

impl BaseFeatureSet {
    pub const MAX_POSES: usize = 4;

    /// Builds a base set from explicit entries. At most one entry per pose.
    pub fn from_entries(entries: Vec<(Pose, FeatureVector)>) -> ReidResult<Self> {
        if entries.len() > Self::MAX_POSES {
            return Err(ReidError::invalid_config(format!(
                "a base set holds at most {} poses, got {}",
                Self::MAX_POSES,
                entries.len()
            )));
        }
        for (i, (pose, _)) in entries.iter().enumerate() {
            if entries[..i].iter().any(|(seen, _)| seen == pose) {
                return Err(ReidError::invalid_config(format!(
                    "duplicate pose '{pose}' in base set"
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn poses(&self) -> impl Iterator<Item = Pose> + '_ {
        self.entries.iter().map(|(pose, _)| *pose)
    }

    pub fn features(&self) -> impl Iterator<Item = &FeatureVector> + Clone + '_ {
        self.entries.iter().map(|(_, feature)| feature)
    }

    pub fn get(&self, pose: Pose) -> Option<&FeatureVector> {
        self.entries.iter().find(|(p, _)| *p == pose).map(|(_, f)| f)
    }

    /// Writes the set as an ordered JSON list of per-pose bin arrays.
    pub fn save(&self, path: impl AsRef<Path>) -> ReidResult<()> {
        let snapshot = BaseSetSnapshot {
            poses: self
                .entries
                .iter()
                .map(|(pose, feature)| PoseSnapshot {
                    pose: *pose,
                    hue_bins: feature.hue_bins(),
                    saturation_bins: feature.saturation_bins(),
                    bins: feature.as_slice().to_vec(),
                })
                .collect(),
        };
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), &snapshot)?;
        Ok(())
    }

    /// Reads a snapshot written by `save`.
    pub fn load(path: impl AsRef<Path>) -> ReidResult<Self> {
        let file = std::fs::File::open(path)?;
        let snapshot: BaseSetSnapshot = serde_json::from_reader(std::io::BufReader::new(file))?;
        let entries = snapshot
            .poses
            .into_iter()
            .map(|p| {
                FeatureVector::from_bins(p.hue_bins, p.saturation_bins, p.bins)
                    .map(|feature| (p.pose, feature))
                    .ok_or_else(|| {
                        ReidError::invalid_config(format!(
                            "snapshot for pose '{}' has a malformed histogram",
                            p.pose
                        ))
                    })
            })
            .collect::<ReidResult<Vec<_>>>()?;
        Self::from_entries(entries)
    }
}

/// How one pose of the sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseOutcome {
    Captured { attempts: u32 },
    Skipped { attempts: u32 },
}

/// A completed enrollment run.
#[derive(Debug, Clone)]
pub struct EnrollmentReport {
    pub base: BaseFeatureSet,
    pub outcomes: Vec<(Pose, PoseOutcome)>,
}

/// Result of running the enrollment sequence.
#[derive(Debug, Clone)]
pub enum Enrollment {
    /// All four poses were attempted. The base set may still hold fewer than four views.
    Completed(EnrollmentReport),
    /// The operator aborted. No base set was produced.
    Cancelled,
}

impl Enrollment {
    /// The captured base set; empty when cancelled.
    pub fn base_set(&self) -> BaseFeatureSet {
        match self {
            Enrollment::Completed(report) => report.base.clone(),
            Enrollment::Cancelled => BaseFeatureSet::default(),
        }
    }

    /// Hands over the base set for tracking, refusing cancelled or empty enrollments.
    pub fn into_base_set(self) -> ReidResult<BaseFeatureSet> {
        match self {
            Enrollment::Cancelled => Err(ReidError::EnrollmentCancelled),
            Enrollment::Completed(report) if report.base.is_empty() => Err(ReidError::EmptyBaseSet),
            Enrollment::Completed(report) => Ok(report.base),
        }
    }
}

/// Drives the four-pose capture sequence.
#[derive(Debug, Clone)]
pub struct EnrollmentController {
    config: EnrollmentConfig,
    extractor: FeatureExtractor,
    detector_confidence: f32,
}

enum CountdownEnd {
    Captured(Frame),
    Cancelled,
}

impl EnrollmentController {
    pub fn new(
        config: EnrollmentConfig,
        extractor: FeatureExtractor,
        detector_confidence: f32,
    ) -> Self {
        Self { config, extractor, detector_confidence }
    }

    pub fn from_config(config: &ReidConfig) -> Self {
        Self::new(
            config.enrollment.clone(),
            FeatureExtractor::new(config.tracking.hue_bins, config.tracking.saturation_bins),
            config.tracking.detector_confidence,
        )
    }

    /// Runs the full sequence. Capture-source failures are returned as errors; a
    /// missing detection only skips (or retries) the pose.
    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        detector: &mut dyn Detector,
        display: &mut dyn EnrollmentDisplay,
        clock: &dyn Clock,
        stop: &StopSignal,
    ) -> ReidResult<Enrollment> {
        let mut entries = Vec::with_capacity(BaseFeatureSet::MAX_POSES);
        let mut outcomes = Vec::with_capacity(Pose::SEQUENCE.len());
        let attempts = self.config.pose_failure_policy.attempts();

        for pose in Pose::SEQUENCE {
            info!(%pose, "enrollment: get ready");
            let mut outcome = PoseOutcome::Skipped { attempts };

            for attempt in 1..=attempts {
                let frame = match self.countdown(pose, source, display, clock, stop)? {
                    CountdownEnd::Captured(frame) => frame,
                    CountdownEnd::Cancelled => {
                        info!(%pose, "enrollment cancelled by operator");
                        return Ok(Enrollment::Cancelled);
                    }
                };

                let region = self.primary_region(&frame, detector);
                if stop.is_stopped() {
                    info!(%pose, "enrollment cancelled by operator during detection");
                    return Ok(Enrollment::Cancelled);
                }
                match region {
                    Some(region) => {
                        entries.push((pose, self.extractor.extract(&region)));
                        display.captured(pose);
                        info!(%pose, attempt, "enrollment: pose captured");
                        clock.sleep(self.config.confirmation_hold);
                        if stop.is_stopped() {
                            info!(%pose, "enrollment cancelled by operator after capture");
                            return Ok(Enrollment::Cancelled);
                        }
                        outcome = PoseOutcome::Captured { attempts: attempt };
                        break;
                    }
                    None if attempt < attempts => {
                        info!(%pose, attempt, "enrollment: nobody detected, retrying pose");
                    }
                    None => {
                        display.skipped(pose);
                        warn!(%pose, attempts, "enrollment: nobody detected, pose skipped");
                    }
                }
            }
            outcomes.push((pose, outcome));
        }

        if stop.is_stopped() {
            info!("enrollment cancelled by operator before completion");
            return Ok(Enrollment::Cancelled);
        }
        let base = BaseFeatureSet::from_entries(entries)?;
        info!(captured = base.len(), "enrollment complete");
        Ok(Enrollment::Completed(EnrollmentReport { base, outcomes }))
    }

    /// Shows the live preview until the countdown runs out, then returns the frame
    /// read at that moment as the capture.
    fn countdown(
        &self,
        pose: Pose,
        source: &mut dyn FrameSource,
        display: &mut dyn EnrollmentDisplay,
        clock: &dyn Clock,
        stop: &StopSignal,
    ) -> ReidResult<CountdownEnd> {
        let deadline = clock.now() + self.config.countdown;
        loop {
            if stop.is_stopped() {
                return Ok(CountdownEnd::Cancelled);
            }
            let frame = source
                .next_frame()?
                .ok_or_else(|| ReidError::capture("frame source ended during enrollment"))?;
            let remaining = deadline.saturating_duration_since(clock.now());
            display.preview(&frame, pose, remaining);
            if remaining.is_zero() {
                return Ok(CountdownEnd::Captured(frame));
            }
            clock.sleep(self.config.preview_interval.min(remaining));
        }
    }

    /// First detection, in detector order, whose box crops to a non-empty region.
    fn primary_region(&self, frame: &Frame, detector: &mut dyn Detector) -> Option<Region> {
        let detections = match detector.detect(frame, self.detector_confidence) {
            Ok(detections) => detections,
            Err(err) => {
                warn!(error = %err, "enrollment: detector failed, treating frame as empty");
                return None;
            }
        };
        detections.iter().find_map(|d| d.bbox.crop(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::interfaces::{ManualClock, NullDisplay};
    use crate::core_modules::region::{BoundingBox, Detection};
    use image::{Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::time::Duration;

    struct EndlessSource;

    impl FrameSource for EndlessSource {
        fn next_frame(&mut self) -> ReidResult<Option<Frame>> {
            Ok(Some(RgbImage::from_pixel(32, 32, Rgb([180, 40, 40]))))
        }
    }

    /// Answers capture-time detect calls from a script; `true` means one person.
    struct ScriptedDetector {
        script: VecDeque<bool>,
        calls: usize,
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame, _min_confidence: f32) -> ReidResult<Vec<Detection>> {
            self.calls += 1;
            let present = self.script.pop_front().unwrap_or(true);
            Ok(if present {
                vec![Detection::new(BoundingBox::new(4.0, 4.0, 20.0, 28.0), 0.9)]
            } else {
                vec![]
            })
        }
    }

    fn fast_config(policy: PoseFailurePolicy) -> EnrollmentConfig {
        EnrollmentConfig {
            countdown: Duration::from_millis(100),
            preview_interval: Duration::from_millis(30),
            confirmation_hold: Duration::from_millis(10),
            pose_failure_policy: policy,
        }
    }

    fn controller(policy: PoseFailurePolicy) -> EnrollmentController {
        EnrollmentController::new(fast_config(policy), FeatureExtractor::new(10, 10), 0.5)
    }

    #[test]
    fn retry_policy_reprompts_the_same_pose() {
        let mut detector = ScriptedDetector {
            script: VecDeque::from([true, false, false, true, true, true]),
            calls: 0,
        };
        let enrollment = controller(PoseFailurePolicy::Retry { max_attempts: 3 })
            .run(
                &mut EndlessSource,
                &mut detector,
                &mut NullDisplay,
                &ManualClock::default(),
                &StopSignal::new(),
            )
            .expect("enrollment runs");
        let Enrollment::Completed(report) = enrollment else { panic!("expected completion") };
        assert_eq!(report.base.len(), 4);
        assert_eq!(report.outcomes[1], (Pose::Back, PoseOutcome::Captured { attempts: 3 }));
        assert_eq!(detector.calls, 6);
    }

    #[test]
    fn countdown_spans_the_configured_duration() {
        let clock = ManualClock::default();
        let start = clock.now();
        let mut detector = ScriptedDetector {
            script: VecDeque::from([false, false, false, false]),
            calls: 0,
        };
        controller(PoseFailurePolicy::Skip)
            .run(&mut EndlessSource, &mut detector, &mut NullDisplay, &clock, &StopSignal::new())
            .expect("enrollment runs");
        // Four countdowns, no confirmation holds since every pose was skipped.
        assert_eq!(clock.now() - start, Duration::from_millis(400));
    }

    /// Raises the stop signal as soon as `trigger` is captured.
    struct StopOnCapture {
        trigger: Pose,
        stop: StopSignal,
        captured: Vec<Pose>,
    }

    impl EnrollmentDisplay for StopOnCapture {
        fn captured(&mut self, pose: Pose) {
            self.captured.push(pose);
            if pose == self.trigger {
                self.stop.stop();
            }
        }
    }

    #[test]
    fn stop_after_a_capture_cancels_the_enrollment() {
        for trigger in [Pose::Front, Pose::Right] {
            let stop = StopSignal::new();
            let mut display = StopOnCapture { trigger, stop: stop.clone(), captured: vec![] };
            let mut detector = ScriptedDetector { script: VecDeque::new(), calls: 0 };
            let enrollment = controller(PoseFailurePolicy::Skip)
                .run(
                    &mut EndlessSource,
                    &mut detector,
                    &mut display,
                    &ManualClock::default(),
                    &stop,
                )
                .expect("enrollment runs");
            assert!(matches!(enrollment, Enrollment::Cancelled), "stopped at {trigger}");
            assert_eq!(display.captured.last(), Some(&trigger));
        }
    }

    /// Detector that raises the stop signal while it runs.
    struct StoppingDetector(StopSignal);

    impl Detector for StoppingDetector {
        fn detect(&mut self, _frame: &Frame, _min_confidence: f32) -> ReidResult<Vec<Detection>> {
            self.0.stop();
            Ok(vec![Detection::new(BoundingBox::new(4.0, 4.0, 20.0, 28.0), 0.9)])
        }
    }

    #[test]
    fn stop_during_detection_captures_nothing() {
        let stop = StopSignal::new();
        let mut display =
            StopOnCapture { trigger: Pose::Back, stop: StopSignal::new(), captured: vec![] };
        let enrollment = controller(PoseFailurePolicy::Skip)
            .run(
                &mut EndlessSource,
                &mut StoppingDetector(stop.clone()),
                &mut display,
                &ManualClock::default(),
                &stop,
            )
            .expect("enrollment runs");
        assert!(matches!(enrollment, Enrollment::Cancelled));
        assert!(display.captured.is_empty());
    }

    #[test]
    fn exhausted_source_is_a_capture_error() {
        struct Empty;
        impl FrameSource for Empty {
            fn next_frame(&mut self) -> ReidResult<Option<Frame>> {
                Ok(None)
            }
        }
        let mut detector = ScriptedDetector { script: VecDeque::new(), calls: 0 };
        let result = controller(PoseFailurePolicy::Skip).run(
            &mut Empty,
            &mut detector,
            &mut NullDisplay,
            &ManualClock::default(),
            &StopSignal::new(),
        );
        assert!(matches!(result, Err(ReidError::Capture(_))));
    }

    #[test]
    fn base_set_rejects_duplicates_and_overflow() {
        let f = FeatureVector::from_bins(1, 2, vec![0.0, 1.0]).expect("shape");
        let twice = vec![(Pose::Front, f.clone()), (Pose::Front, f.clone())];
        assert!(BaseFeatureSet::from_entries(twice).is_err());
        let five = vec![
            (Pose::Front, f.clone()),
            (Pose::Back, f.clone()),
            (Pose::Left, f.clone()),
            (Pose::Right, f.clone()),
            (Pose::Right, f),
        ];
        assert!(BaseFeatureSet::from_entries(five).is_err());
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("base.json");
        let front = FeatureVector::from_bins(2, 2, vec![0.0, 1.0, 0.5, 0.25]).expect("shape");
        let left = FeatureVector::from_bins(2, 2, vec![1.0, 0.0, 0.0, 0.75]).expect("shape");
        let base = BaseFeatureSet::from_entries(vec![(Pose::Front, front), (Pose::Left, left)])
            .expect("valid set");
        base.save(&path).expect("save snapshot");
        let restored = BaseFeatureSet::load(&path).expect("load snapshot");
        assert_eq!(restored, base);
        assert_eq!(restored.poses().collect::<Vec<_>>(), vec![Pose::Front, Pose::Left]);
    }

    #[test]
    fn cancelled_enrollment_refuses_to_hand_over_a_base_set() {
        assert!(Enrollment::Cancelled.base_set().is_empty());
        assert!(matches!(
            Enrollment::Cancelled.into_base_set(),
            Err(ReidError::EnrollmentCancelled)
        ));
        let empty = Enrollment::Completed(EnrollmentReport {
            base: BaseFeatureSet::default(),
            outcomes: vec![],
        });
        assert!(matches!(empty.into_base_set(), Err(ReidError::EmptyBaseSet)));
    }
}

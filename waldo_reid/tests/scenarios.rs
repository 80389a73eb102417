use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use waldo_reid::{
    BaseFeatureSet, BoundingBox, Detection, Detector, Enrollment, EnrollmentConfig,
    EnrollmentController, FeatureExtractor, Frame, FrameSource, ManualClock, NullDisplay, NullSink,
    Offset, Pose, PoseFailurePolicy, RecordingSink, ReidError, ReidResult, StopSignal,
    TrackingConfig, TrackingSession,
};

/// Replays one frame forever.
struct StillCamera(Frame);

impl FrameSource for StillCamera {
    fn next_frame(&mut self) -> ReidResult<Option<Frame>> {
        Ok(Some(self.0.clone()))
    }
}

/// Yields a fixed list of frames, then ends.
struct FrameList(VecDeque<Frame>);

impl FrameSource for FrameList {
    fn next_frame(&mut self) -> ReidResult<Option<Frame>> {
        Ok(self.0.pop_front())
    }
}

/// Same box every call.
struct FixedDetector(BoundingBox);

impl Detector for FixedDetector {
    fn detect(&mut self, _frame: &Frame, _min_confidence: f32) -> ReidResult<Vec<Detection>> {
        Ok(vec![Detection::new(self.0, 0.9)])
    }
}

/// Person present on every call except those listed.
struct AbsentOnCalls {
    bbox: BoundingBox,
    absent: Vec<usize>,
    calls: usize,
}

impl Detector for AbsentOnCalls {
    fn detect(&mut self, _frame: &Frame, _min_confidence: f32) -> ReidResult<Vec<Detection>> {
        let call = self.calls;
        self.calls += 1;
        Ok(if self.absent.contains(&call) { vec![] } else { vec![Detection::new(self.bbox, 0.8)] })
    }
}

fn person_frame() -> Frame {
    RgbImage::from_fn(640, 480, |x, y| {
        let inside = (100..200).contains(&x) && (50..250).contains(&y);
        match (inside, y < 150) {
            (true, true) => Rgb([200, 40, 40]),
            (true, false) => Rgb([30, 60, 170]),
            (false, _) => Rgb([128, 128, 128]),
        }
    })
}

fn quick_enrollment() -> EnrollmentConfig {
    EnrollmentConfig {
        countdown: Duration::from_millis(200),
        preview_interval: Duration::from_millis(33),
        confirmation_hold: Duration::from_millis(50),
        pose_failure_policy: PoseFailurePolicy::Skip,
    }
}

#[test]
fn empty_pool_rejects_every_frame() {
    let frame = person_frame();
    let bbox = BoundingBox::new(100.0, 50.0, 200.0, 250.0);
    let mut session = TrackingSession::new(BaseFeatureSet::default(), &TrackingConfig::default());
    let start = Instant::now();

    for i in 0..30u64 {
        let now = start + Duration::from_millis(i * 33);
        let report = session.process_frame(&frame, &[Detection::new(bbox, 0.9)], now);
        assert!(!report.result.accepted);
        assert_eq!(report.result.score, 0.0);
        assert!(report.report.is_none());
    }
    assert!(session.cache().is_empty());
}

#[test]
fn exact_match_is_accepted_and_offset_is_measured_from_frame_center() {
    let frame = person_frame();
    let bbox = BoundingBox::new(100.0, 50.0, 200.0, 250.0);
    let v = FeatureExtractor::default().extract(&bbox.crop(&frame).expect("box inside frame"));
    let base = BaseFeatureSet::from_entries(vec![(Pose::Front, v.clone())]).expect("one pose");
    let mut session = TrackingSession::new(base, &TrackingConfig::default());

    let report = session.process_frame(&frame, &[Detection::new(bbox, 0.9)], Instant::now());

    assert!(report.result.accepted);
    let best = report.result.best.as_ref().expect("a candidate");
    assert_eq!(best.feature, v);
    assert!((best.score - 1.0).abs() < 1e-9);
    assert_eq!(report.offset, Some(Offset { rel_x: -170, rel_y: -90 }));
    assert_eq!(report.report.map(|r| r.offset), Some(Offset { rel_x: -170, rel_y: -90 }));
}

#[test]
fn missed_pose_is_skipped_and_enrollment_still_completes() {
    let bbox = BoundingBox::new(100.0, 50.0, 200.0, 250.0);
    // Detector is only consulted at capture time, once per pose: call 1 is "Back".
    let mut detector = AbsentOnCalls { bbox, absent: vec![1], calls: 0 };
    let controller =
        EnrollmentController::new(quick_enrollment(), FeatureExtractor::default(), 0.5);

    let enrollment = controller
        .run(
            &mut StillCamera(person_frame()),
            &mut detector,
            &mut NullDisplay,
            &ManualClock::default(),
            &StopSignal::new(),
        )
        .expect("enrollment runs");

    assert!(matches!(enrollment, Enrollment::Completed(_)));
    let base = enrollment.into_base_set().expect("non-empty base");
    assert_eq!(base.len(), 3);
    assert_eq!(base.poses().collect::<Vec<_>>(), vec![Pose::Front, Pose::Left, Pose::Right]);
    assert!(base.get(Pose::Back).is_none());
}

#[test]
fn cancelled_enrollment_refuses_tracking() {
    let stop = StopSignal::new();
    stop.stop();
    let controller =
        EnrollmentController::new(quick_enrollment(), FeatureExtractor::default(), 0.5);
    let enrollment = controller
        .run(
            &mut StillCamera(person_frame()),
            &mut FixedDetector(BoundingBox::new(100.0, 50.0, 200.0, 250.0)),
            &mut NullDisplay,
            &ManualClock::default(),
            &stop,
        )
        .expect("cancel is not an error");

    assert!(enrollment.base_set().is_empty());
    let refused = TrackingSession::from_enrollment(enrollment, &TrackingConfig::default());
    assert!(matches!(refused, Err(ReidError::EnrollmentCancelled)));
}

#[test]
fn enrollment_with_nobody_in_view_cannot_start_tracking() {
    let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let mut detector = AbsentOnCalls { bbox, absent: vec![0, 1, 2, 3], calls: 0 };
    let controller =
        EnrollmentController::new(quick_enrollment(), FeatureExtractor::default(), 0.5);
    let enrollment = controller
        .run(
            &mut StillCamera(person_frame()),
            &mut detector,
            &mut NullDisplay,
            &ManualClock::default(),
            &StopSignal::new(),
        )
        .expect("enrollment runs");

    let refused = TrackingSession::from_enrollment(enrollment, &TrackingConfig::default());
    assert!(matches!(refused, Err(ReidError::EmptyBaseSet)));
}

/// Mostly red, with a thin stripe whose color depends on `tag`.
fn tagged_frame(tag: u32) -> Frame {
    RgbImage::from_fn(200, 100, |x, _| {
        if x < 20 {
            Rgb([(tag * 37 % 200) as u8 + 30, (tag * 91 % 200) as u8 + 30, 220])
        } else {
            Rgb([210, 25, 25])
        }
    })
}

#[test]
fn cache_keeps_the_twenty_most_recent_admissions() {
    let whole = BoundingBox::new(0.0, 0.0, 200.0, 100.0);
    let red = RgbImage::from_pixel(200, 100, Rgb([210, 25, 25]));
    let reference = FeatureExtractor::default().extract(&whole.crop(&red).expect("region"));
    let base = BaseFeatureSet::from_entries(vec![(Pose::Front, reference)]).expect("one pose");
    let mut session = TrackingSession::new(base, &TrackingConfig::default());
    let start = Instant::now();

    let mut admitted = Vec::new();
    for i in 0..25u32 {
        let frame = tagged_frame(i);
        let now = start + Duration::from_secs(10 * i as u64);
        let report = session.process_frame(&frame, &[Detection::new(whole, 0.9)], now);
        assert!(
            report.cache_updated,
            "admission #{} should qualify (score {})",
            i + 1,
            report.result.score
        );
        admitted.push(report.result.best.expect("candidate").feature);
    }

    assert_eq!(session.cache().len(), 20);
    let cached: Vec<_> = session.cache().iter().cloned().collect();
    assert_eq!(cached, admitted[5..].to_vec());
    assert_eq!(session.pool_len(), 21);
}

#[test]
fn tracking_loop_stops_at_end_of_stream_and_counts_frames() {
    let frame = person_frame();
    let bbox = BoundingBox::new(100.0, 50.0, 200.0, 250.0);
    let v = FeatureExtractor::default().extract(&bbox.crop(&frame).expect("box inside frame"));
    let base = BaseFeatureSet::from_entries(vec![(Pose::Front, v)]).expect("one pose");
    let mut session = TrackingSession::new(base, &TrackingConfig::default());
    let clock = ManualClock::default();
    let mut sink = RecordingSink::default();

    let frames: VecDeque<Frame> = std::iter::repeat_n(frame, 5).collect();
    let stats = session
        .run(
            &mut FrameList(frames),
            &mut FixedDetector(bbox),
            &mut sink,
            &clock,
            &StopSignal::new(),
        )
        .expect("loop runs");

    assert_eq!(stats.frames, 5);
    assert_eq!(stats.accepted_frames, 5);
    // Clock never moved: one report, one admission.
    assert_eq!(sink.offsets.len(), 1);
    assert_eq!(sink.feature_counts, vec![1]);
}

#[test]
fn detector_failure_is_an_empty_frame() {
    struct Broken;
    impl Detector for Broken {
        fn detect(&mut self, _frame: &Frame, _min_confidence: f32) -> ReidResult<Vec<Detection>> {
            Err(ReidError::detection("model not loaded"))
        }
    }

    let frame = person_frame();
    let bbox = BoundingBox::new(100.0, 50.0, 200.0, 250.0);
    let v = FeatureExtractor::default().extract(&bbox.crop(&frame).expect("box inside frame"));
    let base = BaseFeatureSet::from_entries(vec![(Pose::Front, v)]).expect("one pose");
    let mut session = TrackingSession::new(base, &TrackingConfig::default());

    let report = session.step(&frame, &mut Broken, &mut NullSink, Instant::now());
    assert!(!report.result.accepted);
    assert_eq!(report.result.candidates_scored, 0);
}

// THEORY:
// The engine never touches a camera, a neural network, or a screen directly. Each of
// those is an external capability that is injected as a trait, so a deployment can
// plug in real hardware and a test can plug in a deterministic fake:
//
// - `FrameSource`  – where frames come from (camera, video file, replay directory).
// - `Detector`     – turns a frame into candidate person boxes with confidences.
// - `EnrollmentDisplay` – renders the countdown preview and the capture feedback.
// - `ReportSink`   – receives throttled offsets and cache-size changes.
// - `Clock`        – wall time and sleeping, so countdowns and gates can be driven
//                    by a virtual clock.
// - `StopSignal`   – cooperative cancellation, checked once per loop iteration.

use crate::core_modules::enrollment::Pose;
use crate::core_modules::geometry::Offset;
use crate::core_modules::region::{Detection, Frame};
use crate::error::ReidResult;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A source of camera frames.
pub trait FrameSource {
    /// Returns the next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> ReidResult<Option<Frame>>;
}

/// External person detector.
pub trait Detector {
    /// Detects candidates in `frame`, keeping only those at or above `min_confidence`.
    fn detect(&mut self, frame: &Frame, min_confidence: f32) -> ReidResult<Vec<Detection>>;
}

/// Operator-facing rendering during enrollment. Every hook defaults to a no-op.
pub trait EnrollmentDisplay {
    fn preview(&mut self, _frame: &Frame, _pose: Pose, _remaining: Duration) {}
    fn captured(&mut self, _pose: Pose) {}
    fn skipped(&mut self, _pose: Pose) {}
}

/// Display that renders nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplay;

impl EnrollmentDisplay for NullDisplay {}

/// A throttled position report for the tracked target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetReport {
    pub offset: Offset,
    pub score: f64,
    /// Time since the tracking session started.
    pub session_time: Duration,
}

/// Receives the session's observable output.
pub trait ReportSink {
    /// Called at most once per report interval, for accepted frames only.
    fn offset(&mut self, report: &OffsetReport);
    /// Called whenever the adaptive cache changes size or content.
    fn feature_count(&mut self, _count: usize) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn offset(&mut self, _report: &OffsetReport) {}
}

/// Collects everything it receives. Handy for replay runs and tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub offsets: Vec<OffsetReport>,
    pub feature_counts: Vec<usize>,
}

impl ReportSink for RecordingSink {
    fn offset(&mut self, report: &OffsetReport) {
        self.offsets.push(*report);
    }

    fn feature_count(&mut self, count: usize) {
        self.feature_counts.push(count);
    }
}

/// Source of time for countdowns, gates, and throttles.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock that only moves when told to. `sleep` advances it instantly.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl ManualClock {
    pub fn new(start: Instant) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Cooperative cancellation flag shared between the operator and the loops.
#[derive(Debug, Default, Clone)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

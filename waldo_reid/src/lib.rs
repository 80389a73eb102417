// THEORY:
// This file is the main entry point for the `waldo_reid` library crate.
//
// The public surface has two layers. The high-level one is `EnrollmentController`
// (capture a person's reference identity from four poses) followed by
// `TrackingSession` or `ParallelSession` (pick that person out of every subsequent
// frame, learn slowly from confident matches, and report where they are). The
// building blocks underneath (`core_modules`) stay public so a deployment can
// recombine them, but most callers only need the re-exports below.
//
// Cameras, detectors, displays, and clocks are never owned by the library. They are
// injected through the traits in `core_modules::interfaces`.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_session;
pub mod session;

pub use config::{EnrollmentConfig, ReidConfig, TrackingConfig};
pub use core_modules::adaptive_cache::{AdaptiveCache, AdmissionGate};
pub use core_modules::enrollment::{
    BaseFeatureSet, Enrollment, EnrollmentController, Pose, PoseFailurePolicy,
};
pub use core_modules::geometry::{offset_from_center, Offset, PanDirection, Steering};
pub use core_modules::histogram::{FeatureExtractor, FeatureVector};
pub use core_modules::interfaces::{
    Clock, Detector, EnrollmentDisplay, FrameSource, ManualClock, NullDisplay, NullSink,
    OffsetReport, RecordingSink, ReportSink, StopSignal, SystemClock,
};
pub use core_modules::matcher::{MatchPolicy, SimilarityMatcher};
pub use core_modules::region::{BoundingBox, Detection, Frame, Region};
pub use core_modules::selector::{FrameSelector, MatchResult};
pub use error::{ReidError, ReidResult};
pub use parallel_session::{ParallelSession, RunSummary, SessionHandle};
pub use session::{FrameReport, SessionSnapshot, SessionStats, TrackingSession};

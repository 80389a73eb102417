// THEORY:
// `ParallelSession` runs the same per-frame decision as `TrackingSession::run`, but
// splits acquisition from processing so a slow camera read never stalls scoring and
// a slow detector never drops the camera's buffer on the floor.
//
//   acquisition task ──(bounded mpsc, FRAME_QUEUE_DEPTH)──▶ processing task
//
// Both halves drive blocking capabilities (camera reads, detector inference), so each
// lives on tokio's blocking pool. The processing task is the only writer of session
// state and consumes frames strictly in capture order, one at a time, so the cache,
// gate, and throttle see exactly the sequence the single-threaded loop would. The
// timestamp is taken at capture and travels with the frame.
//
// The session sits behind `Arc<Mutex<_>>` so a `SessionHandle` can read telemetry
// snapshots or raise the stop signal from anywhere (a web socket, a signal handler).
// Callers that own their capture loop can skip `run` and feed frames through `step`;
// handles observe the session the same way in both cases.

use crate::core_modules::interfaces::{Clock, Detector, FrameSource, ReportSink, StopSignal};
use crate::core_modules::region::Frame;
use crate::error::{ReidError, ReidResult};
use crate::session::{FrameReport, SessionSnapshot, SessionStats, TrackingSession};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Frames that may wait between acquisition and processing before capture blocks.
const FRAME_QUEUE_DEPTH: usize = 4;

/// A frame stamped at the moment it was read.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: Frame,
    pub frame_id: u64,
    pub captured_at: Instant,
}

/// What a finished run hands back.
#[derive(Debug)]
pub struct RunSummary<K> {
    pub stats: SessionStats,
    pub frames_captured: u64,
    /// The sink, returned so its contents can be inspected.
    pub sink: K,
}

fn lock(session: &Mutex<TrackingSession>) -> MutexGuard<'_, TrackingSession> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable view of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<TrackingSession>>,
    stop: StopSignal,
}

impl SessionHandle {
    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.session).snapshot()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }
}

pub struct ParallelSession {
    session: Arc<Mutex<TrackingSession>>,
    stop: StopSignal,
}

impl ParallelSession {
    pub fn new(session: TrackingSession, stop: StopSignal) -> Self {
        Self { session: Arc::new(Mutex::new(session)), stop }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle { session: Arc::clone(&self.session), stop: self.stop.clone() }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Processes one frame on the caller's thread, holding the session lock for the
    /// duration of the step.
    pub fn step(
        &self,
        frame: &Frame,
        detector: &mut dyn Detector,
        sink: &mut dyn ReportSink,
        now: Instant,
    ) -> FrameReport {
        lock(&self.session).step(frame, detector, sink, now)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.session).snapshot()
    }

    /// Runs until the stop signal is raised or the source ends.
    pub async fn run<S, D, K, C>(
        &self,
        mut source: S,
        mut detector: D,
        mut sink: K,
        clock: C,
    ) -> ReidResult<RunSummary<K>>
    where
        S: FrameSource + Send + 'static,
        D: Detector + Send + 'static,
        K: ReportSink + Send + 'static,
        C: Clock + Send + 'static,
    {
        let (frame_tx, mut frame_rx) = mpsc::channel::<CapturedFrame>(FRAME_QUEUE_DEPTH);

        let acquisition_stop = self.stop.clone();
        let acquisition = tokio::task::spawn_blocking(move || -> ReidResult<u64> {
            let mut frame_id = 0u64;
            while !acquisition_stop.is_stopped() {
                let Some(frame) = source.next_frame()? else {
                    info!(frames = frame_id, "frame source ended");
                    break;
                };
                let captured = CapturedFrame { frame, frame_id, captured_at: clock.now() };
                if frame_tx.blocking_send(captured).is_err() {
                    debug!("processing task gone, stopping acquisition");
                    break;
                }
                frame_id += 1;
            }
            Ok(frame_id)
        });

        let session = Arc::clone(&self.session);
        let processing_stop = self.stop.clone();
        let processing = tokio::task::spawn_blocking(move || -> ReidResult<(SessionStats, K)> {
            while let Some(captured) = frame_rx.blocking_recv() {
                if processing_stop.is_stopped() {
                    break;
                }
                let mut session = lock(&session);
                session.step(&captured.frame, &mut detector, &mut sink, captured.captured_at);
            }
            Ok((lock(&session).stats(), sink))
        });

        let (acquired, processed) = futures::future::join(acquisition, processing).await;
        let frames_captured = acquired??;
        let (stats, sink) = processed??;
        info!(
            frames_captured,
            frames = stats.frames,
            admissions = stats.admissions,
            "parallel session finished"
        );
        Ok(RunSummary { stats, frames_captured, sink })
    }

    /// Takes the session back once no handle is left.
    pub fn into_session(self) -> ReidResult<TrackingSession> {
        Arc::try_unwrap(self.session)
            .map(|m| m.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
            .map_err(|_| ReidError::SessionInUse)
    }
}

// THEORY:
// A replay stands in for a live camera and a live detector. Frames are still images
// read in file-name order; detections come from a JSON file holding one list of
// boxes per frame, in the same order. Time is virtual: the clock reads
// `start + frames_read × frame_period` and sleeping is a no-op, so a countdown lasts
// exactly as many frames as it would at the given frame rate and a replay always
// yields the same decisions.
//
// The three pieces share one frame counter so the detector and clock always agree
// with the source about which frame is current.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use waldo_reid::{Clock, Detection, Detector, Frame, FrameSource, ReidResult};

const FRAME_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Number of frames read so far, shared by the replay pieces.
#[derive(Debug, Clone, Default)]
pub struct FrameCounter(Arc<AtomicUsize>);

impl FrameCounter {
    pub fn frames_read(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Index of the frame most recently read.
    pub fn current(&self) -> Option<usize> {
        self.frames_read().checked_sub(1)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Image files of `dir`, sorted by file name.
pub fn list_frames(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("reading frame directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let is_frame = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_frame {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Per-frame detections, one list per frame:
/// `[[{"bbox": {"x1":..,"y1":..,"x2":..,"y2":..}, "confidence": ..}, ..], ..]`.
pub fn load_detections(path: &Path) -> anyhow::Result<Vec<Vec<Detection>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading detections {}", path.display()))?;
    let detections = serde_json::from_str(&text)
        .with_context(|| format!("parsing detections {}", path.display()))?;
    Ok(detections)
}

pub struct ReplaySource {
    frames: Vec<PathBuf>,
    counter: FrameCounter,
}

impl ReplaySource {
    pub fn new(frames: Vec<PathBuf>, counter: FrameCounter) -> Self {
        Self { frames, counter }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> ReidResult<Option<Frame>> {
        let Some(path) = self.frames.get(self.counter.frames_read()) else {
            return Ok(None);
        };
        let frame = image::open(path)?.to_rgb8();
        self.counter.bump();
        Ok(Some(frame))
    }
}

pub struct ReplayDetector {
    detections: Vec<Vec<Detection>>,
    counter: FrameCounter,
}

impl ReplayDetector {
    pub fn new(detections: Vec<Vec<Detection>>, counter: FrameCounter) -> Self {
        Self { detections, counter }
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, _frame: &Frame, min_confidence: f32) -> ReidResult<Vec<Detection>> {
        let Some(listed) = self.counter.current().and_then(|i| self.detections.get(i)) else {
            return Ok(Vec::new());
        };
        Ok(listed.iter().copied().filter(|d| d.confidence >= min_confidence).collect())
    }
}

#[derive(Debug, Clone)]
pub struct ReplayClock {
    start: Instant,
    frame_period: Duration,
    counter: FrameCounter,
}

impl ReplayClock {
    pub fn new(fps: f64, counter: FrameCounter) -> anyhow::Result<Self> {
        anyhow::ensure!(fps.is_finite() && fps > 0.0, "fps must be positive, got {fps}");
        let frame_period = Duration::from_secs_f64(1.0 / fps);
        Ok(Self { start: Instant::now(), frame_period, counter })
    }
}

impl Clock for ReplayClock {
    fn now(&self) -> Instant {
        self.start + self.frame_period * self.counter.frames_read() as u32
    }

    fn sleep(&self, _duration: Duration) {}
}

mod replay;
mod track;

use anyhow::Context;
use replay::{
    list_frames, load_detections, FrameCounter, ReplayClock, ReplayDetector, ReplaySource,
};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use track::{track, TrackOutput};
use waldo_reid::{
    EnrollmentController, EnrollmentDisplay, ParallelSession, Pose, ReidConfig, ReportSink,
    SessionSnapshot, StopSignal, TrackingSession,
};

const USAGE: &str = "Usage: waldo_reid_tester <frames_dir> <detections.json> \
[--fps N] [--config path] [--dump-base path] [--annotate dir]";

struct Args {
    frames_dir: PathBuf,
    detections: PathBuf,
    fps: f64,
    config: Option<PathBuf>,
    dump_base: Option<PathBuf>,
    annotate: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut positional = Vec::new();
    let mut fps = 30.0;
    let (mut config, mut dump_base, mut annotate) = (None, None, None);
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = || args.next().with_context(|| format!("{arg} needs a value"));
        match arg.as_str() {
            "--fps" => fps = value()?.parse().context("--fps expects a number")?,
            "--config" => config = Some(PathBuf::from(value()?)),
            "--dump-base" => dump_base = Some(PathBuf::from(value()?)),
            "--annotate" => annotate = Some(PathBuf::from(value()?)),
            "-h" | "--help" => return Ok(None),
            _ => positional.push(PathBuf::from(arg)),
        }
    }
    let [frames_dir, detections] =
        <[PathBuf; 2]>::try_from(positional).map_err(|_| anyhow::anyhow!(USAGE))?;
    Ok(Some(Args { frames_dir, detections, fps, config, dump_base, annotate }))
}

/// Enrollment feedback as JSON lines.
struct LineDisplay;

impl EnrollmentDisplay for LineDisplay {
    fn captured(&mut self, pose: Pose) {
        println!("{}", serde_json::json!({ "event": "pose_captured", "pose": pose }));
    }

    fn skipped(&mut self, pose: Pose) {
        println!("{}", serde_json::json!({ "event": "pose_skipped", "pose": pose }));
    }
}

#[derive(Serialize)]
struct SummaryLine {
    event: &'static str,
    #[serde(flatten)]
    snapshot: SessionSnapshot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- 1. Argument Parsing & Setup ---
    let Some(args) = parse_args()? else {
        println!("{USAGE}");
        return Ok(());
    };
    let config = match &args.config {
        Some(path) => ReidConfig::from_json_file(path)?,
        None => ReidConfig::default(),
    }
    .with_env_overrides()?;

    // --- 2. Replay Initialization ---
    let counter = FrameCounter::default();
    let mut source = ReplaySource::new(list_frames(&args.frames_dir)?, counter.clone());
    let mut detector = ReplayDetector::new(load_detections(&args.detections)?, counter.clone());
    let clock = ReplayClock::new(args.fps, counter.clone())?;
    let stop = StopSignal::new();
    info!(frames = source.frame_count(), fps = args.fps, "replay loaded");
    if let Some(dir) = &args.annotate {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    // --- 3. Enrollment ---
    let enrollment = EnrollmentController::from_config(&config).run(
        &mut source,
        &mut detector,
        &mut LineDisplay,
        &clock,
        &stop,
    )?;
    let base = enrollment.into_base_set()?;
    if let Some(path) = &args.dump_base {
        base.save(path)?;
        info!(path = %path.display(), "base set written");
    }

    // --- 4. Tracking ---
    let parallel = ParallelSession::new(TrackingSession::new(base, &config.tracking), stop.clone());
    let (mut sink, publisher) = telemetry(&parallel).await?;
    let processed = {
        let mut lines = std::io::stdout().lock();
        let out = TrackOutput {
            lines: &mut lines,
            annotate: args.annotate.as_deref(),
            first_frame: counter.frames_read(),
        };
        track(&parallel, &mut source, &mut detector, sink.as_mut(), &clock, out)?
    };
    info!(processed, stopped = stop.is_stopped(), "tracking finished");

    // --- 5. Shutdown ---
    if let Some(publisher) = publisher {
        stop.stop();
        publisher.await?;
    }
    let summary = SummaryLine { event: "summary", snapshot: parallel.snapshot() };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

type Telemetry = (Box<dyn ReportSink>, Option<tokio::task::JoinHandle<()>>);

/// Streams the session to the visualizer, which can read snapshots and raise the
/// stop signal while the replay runs.
#[cfg(feature = "web")]
async fn telemetry(parallel: &ParallelSession) -> anyhow::Result<Telemetry> {
    use std::time::Duration;
    use waldo_reid_visualizer::{
        spawn_snapshot_publisher, start_server, ControlHandle, ServerConfig, TelemetryBus,
    };
    let bus = TelemetryBus::new(64);
    let handle = parallel.handle();
    let control = ControlHandle { stop: handle.stop_signal(), session: Some(handle.clone()) };
    start_server(bus.clone(), ServerConfig::from_env(), control).await?;
    let publisher = spawn_snapshot_publisher(bus.clone(), handle, Duration::from_millis(500));
    Ok((Box::new(bus), Some(publisher)))
}

#[cfg(not(feature = "web"))]
async fn telemetry(_parallel: &ParallelSession) -> anyhow::Result<Telemetry> {
    Ok((Box::new(waldo_reid::NullSink), None))
}

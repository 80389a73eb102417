// THEORY:
// The tracking half of a replay. Each frame goes through the shared
// `ParallelSession` so that a visualizer holding a `SessionHandle` sees the same
// state this loop does, and so that raising the session's stop signal (ctrl-c, or
// `/control/stop` over HTTP) ends the loop before the next frame is read.
//
// Every processed frame produces one JSON line on `out` and, when an annotation
// directory is set, one PNG with the best candidate outlined.

use image::{Rgb, RgbImage};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use waldo_reid::{
    BoundingBox, Clock, Detector, FrameSource, Offset, ParallelSession, ReportSink, Steering,
};

#[derive(Serialize)]
struct FrameLine {
    event: &'static str,
    frame: usize,
    accepted: bool,
    score: f64,
    candidates: usize,
    offset: Option<Offset>,
    reported: bool,
    cache_len: usize,
    pan: Option<&'static str>,
    angle: f32,
}

/// Where the tracking loop sends its output.
pub struct TrackOutput<'a> {
    pub lines: &'a mut dyn Write,
    pub annotate: Option<&'a Path>,
    /// Index given to the first frame read, so file names follow the replay.
    pub first_frame: usize,
}

/// Feeds frames into `session` until the source ends or the stop signal is raised.
/// Returns the number of frames processed.
pub fn track(
    session: &ParallelSession,
    source: &mut dyn FrameSource,
    detector: &mut dyn Detector,
    sink: &mut dyn ReportSink,
    clock: &dyn Clock,
    mut out: TrackOutput<'_>,
) -> anyhow::Result<usize> {
    let steering = Steering::default();
    let mut angle = (steering.min_angle + steering.max_angle) / 2.0;
    let mut processed = 0;

    while !session.is_stopped() {
        let Some(mut frame) = source.next_frame()? else {
            break;
        };
        let frame_index = out.first_frame + processed;
        let report = session.step(&frame, detector, sink, clock.now());
        processed += 1;

        let pan = report.report.map(|r| {
            angle = steering.target_angle(angle, r.offset, frame.width());
            steering.direction(r.offset).command()
        });

        let line = FrameLine {
            event: "frame",
            frame: frame_index,
            accepted: report.result.accepted,
            score: report.result.score,
            candidates: report.result.candidates_scored,
            offset: report.offset,
            reported: report.report.is_some(),
            cache_len: report.cache_len,
            pan,
            angle,
        };
        serde_json::to_writer(&mut *out.lines, &line)?;
        writeln!(out.lines)?;

        if let (Some(dir), Some(best)) = (out.annotate, &report.result.best) {
            let color = if report.result.accepted {
                Rgb([40, 220, 60])
            } else {
                Rgb([220, 40, 40])
            };
            draw_box(&mut frame, &best.bbox, color);
            frame.save(dir.join(format!("frame_{frame_index:05}.png")))?;
        }
    }
    Ok(processed)
}

/// Draws a two-pixel outline of `bbox`, clipped to the frame.
fn draw_box(frame: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let Some((left, top, width, height)) = bbox.clamped_span(frame.width(), frame.height()) else {
        return;
    };
    let (right, bottom) = (left + width - 1, top + height - 1);
    for t in 0..2u32 {
        for x in left..=right {
            frame.put_pixel(x, (top + t).min(bottom), color);
            frame.put_pixel(x, bottom.saturating_sub(t).max(top), color);
        }
        for y in top..=bottom {
            frame.put_pixel((left + t).min(right), y, color);
            frame.put_pixel(right.saturating_sub(t).max(left), y, color);
        }
    }
}

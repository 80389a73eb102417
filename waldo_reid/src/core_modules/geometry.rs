// THEORY:
// The `geometry` module turns an accepted detection into something an actuator can
// use. It has three small jobs:
// 1.  **Offset**: where the target's box center sits relative to the frame center,
//     in whole pixels. Positive x is right of center, positive y is below.
// 2.  **Throttling**: offsets are reported at most once per interval. Throttling only
//     limits observability volume and never feeds back into matching.
// 3.  **Steering**: the offset becomes a pan command for a rotating device, either a
//     discrete direction with a dead-band or an absolute angle clamped to the
//     device's 0..=180 degree travel.

use crate::core_modules::region::BoundingBox;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Offset of the tracked target from the frame center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
    pub rel_x: i32,
    pub rel_y: i32,
}

/// Offset of `bbox`'s center from the center of a `frame_width` × `frame_height` frame.
pub fn offset_from_center(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> Offset {
    let (center_x, center_y) = bbox.center();
    Offset {
        rel_x: center_x - (frame_width / 2) as i32,
        rel_y: center_y - (frame_height / 2) as i32,
    }
}

/// Wall-clock gate that lets at most one event through per interval.
#[derive(Debug, Clone)]
pub struct ReportThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ReportThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_emit: None }
    }

    /// Returns true (and restarts the interval) if an event may be emitted at `now`.
    pub fn ready(&mut self, now: Instant) -> bool {
        let due = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_emit = Some(now);
        }
        due
    }
}

/// Discrete pan command for the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PanDirection {
    Left,
    Right,
    Hold,
}

impl PanDirection {
    /// Serial command understood by the motor controller.
    pub fn command(&self) -> &'static str {
        match self {
            PanDirection::Left => "MOVE LEFT",
            PanDirection::Right => "MOVE RIGHT",
            PanDirection::Hold => "STOP",
        }
    }
}

/// Converts horizontal offsets into pan commands for a rotating device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Steering {
    /// Camera horizontal field of view in degrees.
    pub horizontal_fov_degrees: f32,
    /// Offsets within this many pixels of center do not move the device.
    pub dead_band_px: i32,
    pub min_angle: f32,
    pub max_angle: f32,
}

impl Default for Steering {
    fn default() -> Self {
        Self {
            horizontal_fov_degrees: 62.0,
            dead_band_px: 40,
            min_angle: 0.0,
            max_angle: 180.0,
        }
    }
}

impl Steering {
    pub fn direction(&self, offset: Offset) -> PanDirection {
        if offset.rel_x > self.dead_band_px {
            PanDirection::Right
        } else if offset.rel_x < -self.dead_band_px {
            PanDirection::Left
        } else {
            PanDirection::Hold
        }
    }

    /// Angular error of the target from the optical axis, in degrees. Positive is right.
    pub fn bearing(&self, offset: Offset, frame_width: u32) -> f32 {
        if frame_width == 0 {
            return 0.0;
        }
        offset.rel_x as f32 / frame_width as f32 * self.horizontal_fov_degrees
    }

    /// Absolute angle the device should turn to, clamped to its travel.
    pub fn target_angle(&self, current_angle: f32, offset: Offset, frame_width: u32) -> f32 {
        (current_angle + self.bearing(offset, frame_width)).clamp(self.min_angle, self.max_angle)
    }
}

// Message and sample types shared across the runtime

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Asynchronous event from perception/timers -> actuation loop.
///
/// `Shutdown` is a poison value: the consumer drains everything queued
/// ahead of it in order, then terminates. Producers must not enqueue
/// after it has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationMessage {
    PlayCue,
    StopCue,
    Shutdown,
}

// Detection event from the external marker detector -> perception task.
// Arrives as one JSON object per line, hence the serde derive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionEvent {
    pub marker_ids: Vec<u32>,
    pub timestamp_ms: u64,
}

/// Raw joystick axes for one tick, before conditioning. All in [-1, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawAxes {
    pub forward: f64,
    pub strafe: f64,
    pub turn: f64,
}

/// Conditioned axes (dead zone + response curve applied), one per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisSample {
    pub forward: f64,
    pub strafe: f64,
    pub turn: f64,
}

/// Button edge events reported by an input source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    TiltUpPressed,
    TiltUpReleased,
    TiltDownPressed,
    TiltDownReleased,
    HornPressed,
    HornReleased,
    RotateLeft,
    RotateRight,
    Quit,
}

/// One tick's worth of input: axis values plus any button edges since
/// the previous poll.
#[derive(Debug, Clone, Default)]
pub struct InputFrame {
    pub axes: RawAxes,
    pub events: Vec<ButtonEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationDirection {
    Left,
    Right,
}

/// An automated in-place rotation maneuver. Consumed by a dedicated
/// rotation task that holds exclusive actuator access for `duration`.
#[derive(Debug, Clone, Copy)]
pub struct RotationRequest {
    pub direction: RotationDirection,
    pub duration: Duration,
    pub speed: i16,
}

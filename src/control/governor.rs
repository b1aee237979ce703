// Safety/state governor: drive state machine, rotation lock, servo
// neutral policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::config::{SERVO_NEUTRAL, SERVO_TILT_DOWN, SERVO_TILT_UP};
use crate::motor::kinematics::WheelCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    Idle,
    Driving,
    RotationLocked,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiltDirection {
    Up,
    Down,
}

/// Exclusive permission to run one rotation maneuver. Dropping the
/// ticket clears the lock flag, so it cannot stay set on an error path.
#[derive(Debug)]
pub struct RotationTicket {
    flag: Arc<AtomicBool>,
}

impl Drop for RotationTicket {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Tracks the actuation thread's drive state and arbitrates access to
/// the actuators. The rotation lock is an atomic flag rather than a
/// blocking lock: the manual loop keeps running and discards conflicting
/// input while a rotation is in flight.
#[derive(Debug)]
pub struct Governor {
    state: DriveState,
    rotation_active: Arc<AtomicBool>,
    tilt_held: Option<TiltDirection>,
}

impl Governor {
    pub fn new() -> Self {
        Self {
            state: DriveState::Idle,
            rotation_active: Arc::new(AtomicBool::new(false)),
            tilt_held: None,
        }
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state == DriveState::ShuttingDown
    }

    /// True while a rotation task holds exclusive actuator access.
    pub fn rotation_locked(&self) -> bool {
        self.rotation_active.load(Ordering::Acquire)
    }

    /// Claim the rotation lock. Returns `None` if a rotation is already
    /// active (later triggers are dropped, not queued) or the governor
    /// is shutting down.
    pub fn try_begin_rotation(&mut self) -> Option<RotationTicket> {
        if self.state == DriveState::ShuttingDown {
            return None;
        }
        if self
            .rotation_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        self.state = DriveState::RotationLocked;
        Some(RotationTicket {
            flag: Arc::clone(&self.rotation_active),
        })
    }

    /// Per-tick state sync from the wheel command about to be applied.
    /// No-op in terminal state; leaves RotationLocked only once the
    /// ticket has been dropped.
    pub fn observe_tick(&mut self, cmd: &WheelCommand) {
        if self.state == DriveState::ShuttingDown {
            return;
        }
        if self.rotation_locked() {
            self.state = DriveState::RotationLocked;
            return;
        }
        self.state = if cmd.is_zero() {
            DriveState::Idle
        } else {
            DriveState::Driving
        };
    }

    /// Terminal transition. Once entered, the only remaining work is the
    /// neutralization path.
    pub fn begin_shutdown(&mut self) {
        if self.state != DriveState::ShuttingDown {
            info!("Governor entering shutdown state");
            self.state = DriveState::ShuttingDown;
        }
    }

    // --- Servo neutral-on-release bookkeeping ---

    /// A tilt button went down; returns the angle to command.
    pub fn tilt_pressed(&mut self, direction: TiltDirection) -> u8 {
        self.tilt_held = Some(direction);
        match direction {
            TiltDirection::Up => SERVO_TILT_UP,
            TiltDirection::Down => SERVO_TILT_DOWN,
        }
    }

    /// A tilt button came up. Returns the neutral angle when the
    /// released button matches the held one; a stale release for a
    /// button that was superseded is ignored.
    pub fn tilt_released(&mut self, direction: TiltDirection) -> Option<u8> {
        if self.tilt_held == Some(direction) {
            self.tilt_held = None;
            Some(SERVO_NEUTRAL)
        } else {
            None
        }
    }

    /// The angle the servo should hold right now. Neutral whenever no
    /// tilt button is logically down, and always neutral on shutdown.
    pub fn servo_angle(&self) -> u8 {
        if self.state == DriveState::ShuttingDown {
            return SERVO_NEUTRAL;
        }
        match self.tilt_held {
            Some(TiltDirection::Up) => SERVO_TILT_UP,
            Some(TiltDirection::Down) => SERVO_TILT_DOWN,
            None => SERVO_NEUTRAL,
        }
    }
}

impl Default for Governor {
    fn default() -> Self {
        Self::new()
    }
}

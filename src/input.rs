// Input sources: gamepad (primary) and keyboard teleop (fallback).
//
// A source is polled once per control tick and returns the current axis
// values plus any button edges since the previous poll. Sources never
// block; absence of input is a neutral frame.

use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use gilrs::{Axis, Button, EventType, Gilrs};
use tracing::{debug, info, warn};

use crate::messages::{ButtonEvent, InputFrame, RawAxes};

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("no gamepad connected")]
    NoGamepad,

    #[error("gamepad disconnected")]
    Disconnected,

    #[error("input backend error: {0}")]
    Backend(String),

    #[error("terminal error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, InputError>;

/// One input device, polled at the control-loop cadence.
pub trait InputSource {
    fn poll(&mut self) -> Result<InputFrame>;
}

impl<T: InputSource + ?Sized> InputSource for Box<T> {
    fn poll(&mut self) -> Result<InputFrame> {
        (**self).poll()
    }
}

// --- Gamepad -------------------------------------------------------------

/// Physical joystick via gilrs. Construction fails when no gamepad is
/// present: an input fault at startup is fatal and the control loop is
/// never entered.
pub struct GamepadSource {
    gilrs: Gilrs,
    pad_id: gilrs::GamepadId,
}

impl GamepadSource {
    pub fn new() -> Result<Self> {
        let gilrs = Gilrs::new().map_err(|e| InputError::Backend(e.to_string()))?;

        let count = gilrs.gamepads().count();
        info!("Number of gamepads connected: {}", count);

        let (pad_id, pad) = gilrs.gamepads().next().ok_or(InputError::NoGamepad)?;
        info!("Gamepad name: {}", pad.name());

        Ok(Self { gilrs, pad_id })
    }

    fn map_button(button: Button, pressed: bool) -> Option<ButtonEvent> {
        match (button, pressed) {
            (Button::RightTrigger2, true) => Some(ButtonEvent::TiltUpPressed),
            (Button::RightTrigger2, false) => Some(ButtonEvent::TiltUpReleased),
            (Button::LeftTrigger2, true) => Some(ButtonEvent::TiltDownPressed),
            (Button::LeftTrigger2, false) => Some(ButtonEvent::TiltDownReleased),
            (Button::South, true) => Some(ButtonEvent::HornPressed),
            (Button::South, false) => Some(ButtonEvent::HornReleased),
            (Button::West, true) => Some(ButtonEvent::RotateLeft),
            (Button::East, true) => Some(ButtonEvent::RotateRight),
            (Button::Select, true) => Some(ButtonEvent::Quit),
            _ => None,
        }
    }
}

impl InputSource for GamepadSource {
    fn poll(&mut self) -> Result<InputFrame> {
        let mut events = Vec::new();

        while let Some(ev) = self.gilrs.next_event() {
            if ev.id != self.pad_id {
                continue;
            }
            match ev.event {
                EventType::ButtonPressed(button, _) => {
                    debug!("Button {:?} pressed", button);
                    events.extend(Self::map_button(button, true));
                }
                EventType::ButtonReleased(button, _) => {
                    events.extend(Self::map_button(button, false));
                }
                EventType::Disconnected => {
                    warn!("Gamepad disconnected");
                    return Err(InputError::Disconnected);
                }
                _ => {}
            }
        }

        let pad = self.gilrs.gamepad(self.pad_id);
        let axes = RawAxes {
            forward: pad.value(Axis::LeftStickY) as f64,
            strafe: pad.value(Axis::LeftStickX) as f64,
            turn: pad.value(Axis::RightStickX) as f64,
        };

        Ok(InputFrame { axes, events })
    }
}

// --- Keyboard ------------------------------------------------------------

/// Keyboard teleop: WASD move, Z/X rotate, R/F speed, U/J tilt, N
/// neutral, Space horn, M mute, O/P spin maneuver, Q quit.
///
/// Terminals do not report key releases, so movement keys set a held
/// velocity that decays to zero after `INPUT_HOLD` without repeats.
pub struct KeyboardSource {
    axes: RawAxes,
    last_movement_input: Instant,
    speed_idx: usize,
}

const SPEED_STEPS: [f64; 3] = [0.3, 0.6, 1.0];
const INPUT_HOLD: Duration = Duration::from_millis(150);

impl KeyboardSource {
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        info!("Keyboard teleop: WASD=move, Z/X=rotate, R/F=speed, U/J=tilt, N=neutral");
        info!("                 Space=horn, M=mute, O/P=spin, Q=quit");
        Ok(Self {
            axes: RawAxes::default(),
            last_movement_input: Instant::now(),
            speed_idx: 0,
        })
    }
}

impl Drop for KeyboardSource {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

impl InputSource for KeyboardSource {
    fn poll(&mut self) -> Result<InputFrame> {
        let mut events = Vec::new();
        let speed = SPEED_STEPS[self.speed_idx];

        while event::poll(Duration::ZERO)? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                if !pressed {
                    continue;
                }
                match code {
                    KeyCode::Char('w') => {
                        self.axes.forward = speed;
                        self.last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') => {
                        self.axes.forward = -speed;
                        self.last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') => {
                        self.axes.strafe = -speed;
                        self.last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') => {
                        self.axes.strafe = speed;
                        self.last_movement_input = Instant::now();
                    }
                    KeyCode::Char('z') => {
                        self.axes.turn = -speed;
                        self.last_movement_input = Instant::now();
                    }
                    KeyCode::Char('x') => {
                        self.axes.turn = speed;
                        self.last_movement_input = Instant::now();
                    }
                    KeyCode::Char('r') => {
                        self.speed_idx = (self.speed_idx + 1).min(SPEED_STEPS.len() - 1);
                        info!("Speed step: {}", SPEED_STEPS[self.speed_idx]);
                    }
                    KeyCode::Char('f') => {
                        self.speed_idx = self.speed_idx.saturating_sub(1);
                        info!("Speed step: {}", SPEED_STEPS[self.speed_idx]);
                    }
                    KeyCode::Char('u') => events.push(ButtonEvent::TiltUpPressed),
                    KeyCode::Char('j') => events.push(ButtonEvent::TiltDownPressed),
                    KeyCode::Char('n') => {
                        events.push(ButtonEvent::TiltUpReleased);
                        events.push(ButtonEvent::TiltDownReleased);
                    }
                    KeyCode::Char(' ') => events.push(ButtonEvent::HornPressed),
                    KeyCode::Char('m') => events.push(ButtonEvent::HornReleased),
                    KeyCode::Char('o') => events.push(ButtonEvent::RotateLeft),
                    KeyCode::Char('p') => events.push(ButtonEvent::RotateRight),
                    KeyCode::Char('q') | KeyCode::Esc => events.push(ButtonEvent::Quit),
                    _ => {}
                }
            }
        }

        // Held velocities decay once key repeats stop arriving
        if self.last_movement_input.elapsed() > INPUT_HOLD {
            self.axes = RawAxes::default();
        }

        Ok(InputFrame {
            axes: self.axes,
            events,
        })
    }
}

// --- Scripted ------------------------------------------------------------

/// Deterministic source replaying a fixed list of frames, then neutral
/// frames with a `Quit` on the first tick past the script. Used by the
/// test suites and dry runs.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    frames: std::collections::VecDeque<InputFrame>,
    quit_sent: bool,
}

impl ScriptedSource {
    pub fn new(frames: Vec<InputFrame>) -> Self {
        Self {
            frames: frames.into(),
            quit_sent: false,
        }
    }
}

impl InputSource for ScriptedSource {
    fn poll(&mut self) -> Result<InputFrame> {
        if let Some(frame) = self.frames.pop_front() {
            return Ok(frame);
        }
        if !self.quit_sent {
            self.quit_sent = true;
            return Ok(InputFrame {
                axes: RawAxes::default(),
                events: vec![ButtonEvent::Quit],
            });
        }
        Ok(InputFrame::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_source_replays_then_quits() {
        let mut source = ScriptedSource::new(vec![InputFrame {
            axes: RawAxes {
                forward: 1.0,
                strafe: 0.0,
                turn: 0.0,
            },
            events: vec![],
        }]);
        assert_eq!(source.poll().unwrap().axes.forward, 1.0);
        assert_eq!(source.poll().unwrap().events, vec![ButtonEvent::Quit]);
        assert!(source.poll().unwrap().events.is_empty());
    }

    #[test]
    fn gamepad_button_map_covers_edges() {
        assert_eq!(
            GamepadSource::map_button(Button::RightTrigger2, true),
            Some(ButtonEvent::TiltUpPressed)
        );
        assert_eq!(
            GamepadSource::map_button(Button::RightTrigger2, false),
            Some(ButtonEvent::TiltUpReleased)
        );
        assert_eq!(
            GamepadSource::map_button(Button::West, true),
            Some(ButtonEvent::RotateLeft)
        );
        // Rotation triggers fire on press only
        assert_eq!(GamepadSource::map_button(Button::West, false), None);
        assert_eq!(GamepadSource::map_button(Button::North, true), None);
    }
}

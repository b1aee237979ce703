// Fixed-rate actuation loop with task supervision
// The loop never blocks on I/O: messages drain with try_recv, the
// gateway is taken with try_lock, and the only suspension point is the
// per-tick sleep. Shutdown propagates through a shared cancellation
// flag plus the Shutdown poison message, and every exit path runs the
// same actuator neutralization.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::audio::AudioBackend;
use crate::config::{IO_BACKOFF, MAX_CONSECUTIVE_IO_FAULTS, Params, SERVO_PAN_INDEX};
use crate::control::governor::{Governor, RotationTicket, TiltDirection};
use crate::control::pid::{Pid, SpeedSensor};
use crate::control::condition_axes;
use crate::input::{InputError, InputSource};
use crate::messages::{ButtonEvent, CoordinationMessage, RotationDirection, RotationRequest};
use crate::motor::driver::ActuatorGateway;
use crate::motor::kinematics::{WheelCommand, mix_to_duties_with_params};
use crate::motor::pca9685::{PwmChip, PwmError};
use crate::perception::{self, DetectionSource};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("input error: {0}")]
    Input(#[from] InputError),

    #[error("actuator error: {0}")]
    Actuator(#[from] PwmError),
}

/// Everything the runtime drives. The gateway sits behind a mutex only
/// so a rotation task can take exclusive actuator access; the atomic
/// rotation lock keeps the manual loop from ever contending on it.
pub struct Runtime<C: PwmChip + Send + 'static, I: InputSource, A: AudioBackend> {
    gateway: Arc<Mutex<ActuatorGateway<C>>>,
    input: I,
    audio: A,
    governor: Governor,
    velocity_loop: Option<(Pid, Box<dyn SpeedSensor + Send>)>,
    params: Params,
    cancel: Arc<AtomicBool>,
    tx: UnboundedSender<CoordinationMessage>,
    rx: UnboundedReceiver<CoordinationMessage>,
    last_servo_angle: Option<u8>,
    consecutive_io_faults: u32,
    fatal: Option<RuntimeError>,
}

impl<C, I, A> Runtime<C, I, A>
where
    C: PwmChip + Send + 'static,
    I: InputSource,
    A: AudioBackend,
{
    pub fn new(gateway: ActuatorGateway<C>, input: I, audio: A, params: Params) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            gateway: Arc::new(Mutex::new(gateway)),
            input,
            audio,
            governor: Governor::new(),
            velocity_loop: None,
            params,
            cancel: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
            last_servo_angle: None,
            consecutive_io_faults: 0,
            fatal: None,
        }
    }

    /// Engage the closed-loop velocity regulator on the forward axis.
    pub fn with_speed_sensor(mut self, sensor: Box<dyn SpeedSensor + Send>) -> Self {
        self.velocity_loop = Some((Pid::new(&self.params.pid), sensor));
        self
    }

    /// Producer handle for the coordination channel.
    pub fn sender(&self) -> UnboundedSender<CoordinationMessage> {
        self.tx.clone()
    }

    /// Shared cancellation flag checked each tick.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the actuation loop to completion, spawning the perception
    /// task and the Ctrl-C watcher. Returns after the actuators have
    /// been neutralized.
    pub async fn run(
        mut self,
        detections: Option<Box<dyn DetectionSource>>,
    ) -> Result<(), RuntimeError> {
        // Ctrl-C propagates like any other shutdown: flag plus poison
        let ctrlc_cancel = Arc::clone(&self.cancel);
        let ctrlc_tx = self.tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                ctrlc_cancel.store(true, Ordering::Release);
                let _ = ctrlc_tx.send(CoordinationMessage::Shutdown);
            }
        });

        if let Some(source) = detections {
            tokio::spawn(perception::run(
                source,
                self.tx.clone(),
                Arc::clone(&self.cancel),
                self.params.cue_policy,
                self.params.cue_hold(),
            ));
        }

        let result = self.control_loop().await;
        self.neutralize().await;
        result
    }

    async fn control_loop(&mut self) -> Result<(), RuntimeError> {
        // Pan servo starts at neutral
        {
            let mut gw = self.gateway.lock().await;
            gw.set_servo_angle(SERVO_PAN_INDEX, self.governor.servo_angle())?;
            self.last_servo_angle = Some(self.governor.servo_angle());
        }

        let mut tick = interval(self.params.tick_period());
        let mut last_time = Instant::now();

        info!(
            "Actuation loop started: {} Hz, rotation {} ms at duty {}",
            self.params.loop_hz,
            self.params.rotation_duration_ms,
            self.params.rotation_speed
        );

        loop {
            tick.tick().await;

            if self.cancel.load(Ordering::Acquire) {
                self.governor.begin_shutdown();
            }

            // 1. Drain pending messages without blocking. Everything
            // queued ahead of a Shutdown is handled first, in order.
            while let Ok(msg) = self.rx.try_recv() {
                match msg {
                    CoordinationMessage::PlayCue => self.audio.play(),
                    CoordinationMessage::StopCue => self.audio.stop(),
                    CoordinationMessage::Shutdown => {
                        info!("Shutdown message received");
                        self.cancel.store(true, Ordering::Release);
                        self.governor.begin_shutdown();
                        break;
                    }
                }
            }
            if self.governor.is_shutting_down() {
                break;
            }

            // 2. Poll input. A dead input device past startup is an
            // unexpected fault: shut down through the same cleanup path.
            let frame = match self.input.poll() {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Input failure, shutting down: {}", e);
                    self.fatal = Some(RuntimeError::Input(e));
                    self.governor.begin_shutdown();
                    break;
                }
            };

            let now = Instant::now();
            let dt = now.duration_since(last_time).as_secs_f64();
            last_time = now;

            // 3. Button edges
            for event in &frame.events {
                self.handle_button(*event);
            }
            if self.governor.is_shutting_down() {
                break;
            }

            // 4. While a rotation maneuver owns the actuators, manual
            // input is discarded, not queued
            if self.governor.rotation_locked() {
                if let Some((pid, _)) = &mut self.velocity_loop {
                    pid.reset();
                }
                continue;
            }

            // 5. Pipeline: condition -> regulate -> mix -> govern -> apply
            let sample = condition_axes(frame.axes, &self.params);
            let forward = match &mut self.velocity_loop {
                Some((pid, sensor)) => match sensor.read() {
                    Ok(measurement) => {
                        pid.compute(sample.forward, measurement, dt).clamp(-1.0, 1.0)
                    }
                    Err(e) => {
                        warn!("Speed sensor read failed, running open loop: {}", e);
                        pid.reset();
                        sample.forward
                    }
                },
                None => sample.forward,
            };

            let cmd = mix_to_duties_with_params(
                forward,
                sample.strafe,
                sample.turn,
                self.params.turn_authority_moving,
                self.params.turn_authority_in_place,
            );
            self.governor.observe_tick(&cmd);

            if let Err(e) = self.apply(&cmd).await {
                self.on_io_fault(e).await;
                if self.governor.is_shutting_down() {
                    break;
                }
            } else {
                self.consecutive_io_faults = 0;
            }
        }

        match self.fatal.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn handle_button(&mut self, event: ButtonEvent) {
        match event {
            ButtonEvent::TiltUpPressed => {
                let angle = self.governor.tilt_pressed(TiltDirection::Up);
                debug!("Pan servo to {} deg", angle);
            }
            ButtonEvent::TiltDownPressed => {
                let angle = self.governor.tilt_pressed(TiltDirection::Down);
                debug!("Pan servo to {} deg", angle);
            }
            ButtonEvent::TiltUpReleased => {
                if self.governor.tilt_released(TiltDirection::Up).is_some() {
                    debug!("Pan servo back to neutral");
                }
            }
            ButtonEvent::TiltDownReleased => {
                if self.governor.tilt_released(TiltDirection::Down).is_some() {
                    debug!("Pan servo back to neutral");
                }
            }
            ButtonEvent::HornPressed => self.audio.play(),
            ButtonEvent::HornReleased => self.audio.stop(),
            ButtonEvent::RotateLeft => self.trigger_rotation(RotationDirection::Left),
            ButtonEvent::RotateRight => self.trigger_rotation(RotationDirection::Right),
            ButtonEvent::Quit => {
                info!("Quit requested from input device");
                self.cancel.store(true, Ordering::Release);
                self.governor.begin_shutdown();
            }
        }
    }

    fn trigger_rotation(&mut self, direction: RotationDirection) {
        let Some(ticket) = self.governor.try_begin_rotation() else {
            debug!("Rotation trigger dropped: maneuver already active");
            return;
        };
        let request = RotationRequest {
            direction,
            duration: self.params.rotation_duration(),
            speed: self.params.rotation_speed,
        };
        info!("Rotation maneuver started: {:?}", request);
        tokio::spawn(rotation_task(
            Arc::clone(&self.gateway),
            request,
            ticket,
            Arc::clone(&self.cancel),
        ));
    }

    /// Write this tick's wheel command and any servo change. All four
    /// wheel channels go out in one gateway call.
    async fn apply(&mut self, cmd: &WheelCommand) -> Result<(), PwmError> {
        let Ok(mut gw) = self.gateway.try_lock() else {
            // Only a rotation task holds the gateway, and the lock flag
            // already diverted us; a miss here is a harmless race
            debug!("Gateway busy, skipping actuation this tick");
            return Ok(());
        };

        gw.set_motor_duties(cmd)?;

        let angle = self.governor.servo_angle();
        if self.last_servo_angle != Some(angle) {
            gw.set_servo_angle(SERVO_PAN_INDEX, angle)?;
            self.last_servo_angle = Some(angle);
        }
        Ok(())
    }

    /// Transient-fault policy: zero the motors, back off, resume. A run
    /// of consecutive failures escalates to the shutdown path.
    async fn on_io_fault(&mut self, e: PwmError) {
        self.consecutive_io_faults += 1;
        warn!(
            "Actuator write failed ({} consecutive): {}",
            self.consecutive_io_faults, e
        );

        if let Ok(mut gw) = self.gateway.try_lock() {
            if let Err(stop_err) = gw.stop_motors() {
                warn!("Zeroing motors after fault also failed: {}", stop_err);
            }
        }

        if self.consecutive_io_faults >= MAX_CONSECUTIVE_IO_FAULTS {
            error!("Actuator fault persists, shutting down");
            self.fatal = Some(RuntimeError::Actuator(e));
            self.governor.begin_shutdown();
            return;
        }

        tokio::time::sleep(IO_BACKOFF).await;
    }

    /// Shutdown posture on every exit path: wheels zero, servo neutral,
    /// cue silenced, chip released.
    async fn neutralize(&mut self) {
        self.audio.stop();
        let mut gw = self.gateway.lock().await;
        if let Err(e) = gw.neutralize(SERVO_PAN_INDEX) {
            error!("Failed to neutralize actuators: {}", e);
        }
        if let Err(e) = gw.release() {
            warn!("Failed to release PWM chip: {}", e);
        }
        info!("Motors stopped and pan servo reset to neutral");
    }
}

/// One automated in-place rotation. Holds the gateway for its whole
/// duration; the ticket (and with it the rotation lock) is released
/// only after the motors have been stopped, on success and failure
/// alike.
async fn rotation_task<C: PwmChip + Send + 'static>(
    gateway: Arc<Mutex<ActuatorGateway<C>>>,
    request: RotationRequest,
    ticket: RotationTicket,
    cancel: Arc<AtomicBool>,
) {
    let mut gw = gateway.lock().await;

    let s = request.speed;
    let cmd = match request.direction {
        // Positive turn spins the chassis clockwise
        RotationDirection::Right => WheelCommand::new(s, -s, s, -s),
        RotationDirection::Left => WheelCommand::new(-s, s, -s, s),
    };

    match gw.set_motor_duties(&cmd) {
        Ok(()) => {
            let deadline = tokio::time::Instant::now() + request.duration;
            // Sleep in slices so a shutdown can cut the maneuver short
            loop {
                let now = tokio::time::Instant::now();
                if now >= deadline || cancel.load(Ordering::Acquire) {
                    break;
                }
                let slice = (deadline - now).min(Duration::from_millis(20));
                tokio::time::sleep(slice).await;
            }
        }
        Err(e) => warn!("Rotation drive write failed: {}", e),
    }

    if let Err(e) = gw.stop_motors() {
        warn!("Failed to stop motors after rotation: {}", e);
    }
    drop(ticket);
    info!("Rotation maneuver complete");
}

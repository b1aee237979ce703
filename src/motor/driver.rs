// Actuator gateway for the mecanum base
//
// Turns wheel duties and servo angles into channel-duty calls on the
// PWM chip. Owns the chassis channel map and the per-unit calibration
// (left-side trim, stiction cutoff).

use tracing::{debug, info, warn};

use super::kinematics::WheelCommand;
use super::pca9685::{COUNTS_PER_FRAME, PwmChip, Result};
use crate::config::{DUTY_MAX, SERVO_NEUTRAL};

/// (forward, reverse) chip channels per wheel, as wired on the chassis
pub const CH_FRONT_LEFT: (u8, u8) = (1, 0);
pub const CH_BACK_LEFT: (u8, u8) = (2, 3);
pub const CH_FRONT_RIGHT: (u8, u8) = (7, 6);
pub const CH_BACK_RIGHT: (u8, u8) = (5, 4);

/// Servos sit on the upper bank of the chip
pub const SERVO_CHANNEL_BASE: u8 = 8;

/// Servo pulse range: 500-2500 us across 0-180 degrees, 20 ms frame
const SERVO_PULSE_MIN_US: f64 = 500.0;
const SERVO_PULSE_RANGE_US: f64 = 2000.0;
const SERVO_FRAME_US: f64 = 20_000.0;

/// High-level gateway over the PWM chip.
///
/// All four wheel channels of a command are written in one call, so no
/// partial actuation state is observable between ticks.
pub struct ActuatorGateway<C: PwmChip> {
    chip: C,
    left_trim: f64,
    min_duty: i16,
    released: bool,
}

impl<C: PwmChip> ActuatorGateway<C> {
    pub fn new(chip: C) -> Self {
        Self::with_calibration(chip, 1.0, 0)
    }

    /// `left_trim` scales the left-side wheels to compensate motor
    /// asymmetry; duties with |duty| <= `min_duty` snap to zero so the
    /// motors are not fed a duty below their stiction threshold.
    pub fn with_calibration(chip: C, left_trim: f64, min_duty: i16) -> Self {
        Self {
            chip,
            left_trim,
            min_duty,
            released: false,
        }
    }

    /// Apply one wheel command, all four wheels.
    pub fn set_motor_duties(&mut self, cmd: &WheelCommand) -> Result<()> {
        debug!(
            "Setting wheel duties: fl={}, fr={}, bl={}, br={}",
            cmd.fl, cmd.fr, cmd.bl, cmd.br
        );

        let fl = self.condition_duty(cmd.fl, true);
        let bl = self.condition_duty(cmd.bl, true);
        let fr = self.condition_duty(cmd.fr, false);
        let br = self.condition_duty(cmd.br, false);

        self.write_wheel(CH_FRONT_LEFT, fl)?;
        self.write_wheel(CH_BACK_LEFT, bl)?;
        self.write_wheel(CH_FRONT_RIGHT, fr)?;
        self.write_wheel(CH_BACK_RIGHT, br)
    }

    /// Command a servo to an angle in 0..=180 degrees.
    pub fn set_servo_angle(&mut self, servo_index: u8, angle: u8) -> Result<()> {
        let angle = angle.min(180);
        let counts = servo_counts(angle);
        debug!("Setting servo {} to {} deg ({} counts)", servo_index, angle, counts);
        self.chip
            .set_channel_duty(SERVO_CHANNEL_BASE + servo_index, counts)
    }

    /// Stop all wheels immediately.
    pub fn stop_motors(&mut self) -> Result<()> {
        info!("Stopping all motors");
        self.write_wheel(CH_FRONT_LEFT, 0)?;
        self.write_wheel(CH_BACK_LEFT, 0)?;
        self.write_wheel(CH_FRONT_RIGHT, 0)?;
        self.write_wheel(CH_BACK_RIGHT, 0)
    }

    /// Shutdown posture: wheels stopped, pan servo at neutral.
    pub fn neutralize(&mut self, servo_index: u8) -> Result<()> {
        self.stop_motors()?;
        self.set_servo_angle(servo_index, SERVO_NEUTRAL)
    }

    /// Drive every chip channel low, releasing servos as well. Final
    /// step of the shutdown path, after `neutralize` has centered the
    /// servo.
    pub fn release(&mut self) -> Result<()> {
        self.released = true;
        self.chip.all_off()
    }

    fn condition_duty(&self, duty: i16, left_side: bool) -> i16 {
        let mut duty = duty.clamp(-DUTY_MAX, DUTY_MAX);
        if left_side {
            duty = (duty as f64 * self.left_trim).round() as i16;
        }
        if duty.abs() <= self.min_duty { 0 } else { duty }
    }

    fn write_wheel(&mut self, (forward, reverse): (u8, u8), duty: i16) -> Result<()> {
        if duty > 0 {
            self.chip.set_channel_duty(reverse, 0)?;
            self.chip.set_channel_duty(forward, duty as u16)
        } else if duty < 0 {
            self.chip.set_channel_duty(forward, 0)?;
            self.chip.set_channel_duty(reverse, duty.unsigned_abs())
        } else {
            self.chip.set_channel_duty(forward, 0)?;
            self.chip.set_channel_duty(reverse, 0)
        }
    }
}

impl<C: PwmChip> Drop for ActuatorGateway<C> {
    fn drop(&mut self) {
        // Try to stop motors when the gateway goes away (safety measure)
        if !self.released {
            if let Err(e) = self.stop_motors() {
                warn!("Failed to stop motors on drop: {}", e);
            }
        }
    }
}

/// Pulse-width counts for a servo angle on a 50 Hz frame.
fn servo_counts(angle: u8) -> u16 {
    let pulse_us = SERVO_PULSE_MIN_US + (angle as f64 / 180.0) * SERVO_PULSE_RANGE_US;
    (pulse_us / SERVO_FRAME_US * COUNTS_PER_FRAME as f64).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::pca9685::SimChip;

    fn gateway() -> ActuatorGateway<SimChip> {
        ActuatorGateway::new(SimChip::new())
    }

    #[test]
    fn forward_duty_energizes_forward_channel_only() {
        let mut gw = gateway();
        gw.set_motor_duties(&WheelCommand::new(2000, 0, 0, 0)).unwrap();
        assert_eq!(gw.chip.channel(CH_FRONT_LEFT.0), 2000);
        assert_eq!(gw.chip.channel(CH_FRONT_LEFT.1), 0);
    }

    #[test]
    fn reverse_duty_swaps_channel_pair() {
        let mut gw = gateway();
        gw.set_motor_duties(&WheelCommand::new(0, -1500, 0, 0)).unwrap();
        assert_eq!(gw.chip.channel(CH_FRONT_RIGHT.0), 0);
        assert_eq!(gw.chip.channel(CH_FRONT_RIGHT.1), 1500);
    }

    #[test]
    fn left_trim_scales_left_side_only() {
        let mut gw = ActuatorGateway::with_calibration(SimChip::new(), 0.7, 0);
        gw.set_motor_duties(&WheelCommand::new(1000, 1000, 1000, 1000))
            .unwrap();
        assert_eq!(gw.chip.channel(CH_FRONT_LEFT.0), 700);
        assert_eq!(gw.chip.channel(CH_BACK_LEFT.0), 700);
        assert_eq!(gw.chip.channel(CH_FRONT_RIGHT.0), 1000);
        assert_eq!(gw.chip.channel(CH_BACK_RIGHT.0), 1000);
    }

    #[test]
    fn stiction_cutoff_snaps_small_duties_to_zero() {
        let mut gw = ActuatorGateway::with_calibration(SimChip::new(), 1.0, 100);
        gw.set_motor_duties(&WheelCommand::new(99, 100, -100, 101)).unwrap();
        assert_eq!(gw.chip.channel(CH_FRONT_LEFT.0), 0);
        assert_eq!(gw.chip.channel(CH_FRONT_RIGHT.0), 0);
        assert_eq!(gw.chip.channel(CH_BACK_LEFT.1), 0);
        assert_eq!(gw.chip.channel(CH_BACK_RIGHT.0), 101);
    }

    #[test]
    fn servo_pulse_math() {
        // 90 deg -> 1500 us -> 307 counts on a 20 ms frame
        assert_eq!(servo_counts(90), 307);
        assert_eq!(servo_counts(0), 102);
        assert_eq!(servo_counts(180), 512);
    }

    #[test]
    fn servo_angle_lands_on_upper_bank() {
        let mut gw = gateway();
        gw.set_servo_angle(1, 90).unwrap();
        assert_eq!(gw.chip.channel(SERVO_CHANNEL_BASE + 1), 307);
    }

    #[test]
    fn neutralize_stops_wheels_and_centers_servo() {
        let mut gw = gateway();
        gw.set_motor_duties(&WheelCommand::new(3000, -3000, 3000, -3000))
            .unwrap();
        gw.set_servo_angle(1, 160).unwrap();
        gw.neutralize(1).unwrap();
        for pair in [CH_FRONT_LEFT, CH_FRONT_RIGHT, CH_BACK_LEFT, CH_BACK_RIGHT] {
            assert_eq!(gw.chip.channel(pair.0), 0);
            assert_eq!(gw.chip.channel(pair.1), 0);
        }
        assert_eq!(gw.chip.channel(SERVO_CHANNEL_BASE + 1), 307);
    }
}

// Loop cadence, duty limits, servo angles, tunable parameters

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Control loop frequency
pub const LOOP_HZ: u64 = 100;

// Full-scale PWM duty for the motor channels
pub const DUTY_MAX: i16 = 4095;

// Input conditioning
pub const DEAD_ZONE_MOVEMENT: f64 = 0.1;
pub const DEAD_ZONE_TURN: f64 = 0.1;
pub const RESPONSE_EXPONENT: f64 = 2.0;

// Turn arbitration: rotation while translating is scaled down so it
// cannot overwhelm translational intent; pure in-place spin gets full
// authority.
pub const TURN_AUTHORITY_MOVING: f64 = 0.75;
pub const TURN_AUTHORITY_IN_PLACE: f64 = 1.0;

// Pan ("neck") servo
pub const SERVO_PAN_INDEX: u8 = 1;
pub const SERVO_NEUTRAL: u8 = 90;
pub const SERVO_TILT_DOWN: u8 = 120;
pub const SERVO_TILT_UP: u8 = 160;

// Automated rotation maneuver
pub const ROTATION_SPEED: i16 = 2000;
pub const ROTATION_DURATION: Duration = Duration::from_millis(1500);

// Buzzer cue hold before the auto StopCue fires
pub const CUE_HOLD: Duration = Duration::from_millis(2000);

// Transient I/O fault recovery
pub const IO_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_CONSECUTIVE_IO_FAULTS: u32 = 5;

// PCA9685 PWM chip. One 50 Hz chip drives both motors and servos, so
// the servo pulse math stays valid.
pub const PWM_I2C_BUS: &str = "/dev/i2c-1";
pub const PWM_ADDRESS: u8 = 0x40;
pub const PWM_FREQ_HZ: f64 = 50.0;

// Buzzer GPIO line
pub const BUZZER_GPIO: u32 = 27;

/// Marker-cue retrigger policy. The original revisions disagree on this,
/// so it is an explicit configuration choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CuePolicy {
    /// Fire the cue once per newly-seen marker ID.
    #[default]
    OncePerMarker,
    /// Fire the cue on every detection event with at least one marker.
    EveryDetection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub integral_limit: f64,
    pub epsilon: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 0.05,
            integral_limit: 10.0,
            epsilon: 0.01,
        }
    }
}

/// Runtime tuning parameters. Defaults mirror the constants above; a
/// JSON file passed with `--config` overrides any subset of fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub loop_hz: u64,
    pub deadzone_movement: f64,
    pub deadzone_turn: f64,
    pub response_exponent: f64,
    pub turn_authority_moving: f64,
    pub turn_authority_in_place: f64,
    pub pid: PidGains,
    pub rotation_speed: i16,
    pub rotation_duration_ms: u64,
    pub cue_policy: CuePolicy,
    pub cue_hold_ms: u64,
    // Gateway calibration: per-side trim and stiction cutoff
    pub left_trim: f64,
    pub min_duty: i16,
    pub i2c_bus: String,
    pub pwm_address: u8,
    pub buzzer_gpio: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            loop_hz: LOOP_HZ,
            deadzone_movement: DEAD_ZONE_MOVEMENT,
            deadzone_turn: DEAD_ZONE_TURN,
            response_exponent: RESPONSE_EXPONENT,
            turn_authority_moving: TURN_AUTHORITY_MOVING,
            turn_authority_in_place: TURN_AUTHORITY_IN_PLACE,
            pid: PidGains::default(),
            rotation_speed: ROTATION_SPEED,
            rotation_duration_ms: ROTATION_DURATION.as_millis() as u64,
            cue_policy: CuePolicy::default(),
            cue_hold_ms: CUE_HOLD.as_millis() as u64,
            left_trim: 1.0,
            min_duty: 100,
            i2c_bus: PWM_I2C_BUS.to_string(),
            pwm_address: PWM_ADDRESS,
            buzzer_gpio: BUZZER_GPIO,
        }
    }
}

impl Params {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let params: Params =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(60..=120).contains(&self.loop_hz) {
            return Err(ConfigError::OutOfRange {
                field: "loop_hz",
                detail: format!("{} not in 60..=120", self.loop_hz),
            });
        }
        if self.response_exponent < 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "response_exponent",
                detail: format!("{} < 1.0", self.response_exponent),
            });
        }
        if !(0.0..=1.0).contains(&self.turn_authority_moving) {
            return Err(ConfigError::OutOfRange {
                field: "turn_authority_moving",
                detail: format!("{} not in 0..=1", self.turn_authority_moving),
            });
        }
        if self.rotation_speed <= 0 || self.rotation_speed > DUTY_MAX {
            return Err(ConfigError::OutOfRange {
                field: "rotation_speed",
                detail: format!("{} not in 1..={}", self.rotation_speed, DUTY_MAX),
            });
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(1000 / self.loop_hz)
    }

    pub fn rotation_duration(&self) -> Duration {
        Duration::from_millis(self.rotation_duration_ms)
    }

    pub fn cue_hold(&self) -> Duration {
        Duration::from_millis(self.cue_hold_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("config field {field} out of range: {detail}")]
    OutOfRange { field: &'static str, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Params::default().validate().unwrap();
    }

    #[test]
    fn partial_config_overrides_single_field() {
        let params: Params = serde_json::from_str(r#"{"loop_hz": 60}"#).unwrap();
        assert_eq!(params.loop_hz, 60);
        assert_eq!(params.deadzone_movement, DEAD_ZONE_MOVEMENT);
        assert_eq!(params.cue_policy, CuePolicy::OncePerMarker);
    }

    #[test]
    fn rejects_out_of_range_loop_rate() {
        let params: Params = serde_json::from_str(r#"{"loop_hz": 500}"#).unwrap();
        assert!(params.validate().is_err());
    }

    #[test]
    fn cue_policy_round_trips_as_snake_case() {
        let params: Params = serde_json::from_str(r#"{"cue_policy": "every_detection"}"#).unwrap();
        assert_eq!(params.cue_policy, CuePolicy::EveryDetection);
    }
}

// Discrete PID velocity regulator with deadband-reset anti-windup.

use crate::config::PidGains;

/// Reads a measured axle speed, normalized to the same [-1, 1] scale as
/// the commanded setpoint. Implemented by whatever encoder hardware the
/// chassis carries; the regulator only engages when one is wired in.
pub trait SpeedSensor {
    fn read(&mut self) -> std::io::Result<f64>;
}

/// Per-axis PID state. Confined to the actuation loop; no locking.
#[derive(Debug, Clone)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    integral: f64,
    integral_limit: f64,
    previous_error: f64,
    epsilon: f64,
}

impl Pid {
    pub fn new(gains: &PidGains) -> Self {
        Self {
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
            integral: 0.0,
            integral_limit: gains.integral_limit,
            previous_error: 0.0,
            epsilon: gains.epsilon,
        }
    }

    /// One regulator step.
    ///
    /// While the error is outside the deadband the integral accumulates
    /// (clamped to +/-integral_limit); once the error falls inside it
    /// the integral resets to zero, which keeps a settled axis from
    /// drifting on residual windup. `dt == 0` (first tick, stalled
    /// clock) produces no derivative kick and no integration.
    pub fn compute(&mut self, setpoint: f64, measurement: f64, dt: f64) -> f64 {
        let error = setpoint - measurement;

        if error.abs() > self.epsilon {
            self.integral += error * dt;
            self.integral = self.integral.clamp(-self.integral_limit, self.integral_limit);
        } else {
            self.integral = 0.0;
        }

        let derivative = if dt > 0.0 {
            (error - self.previous_error) / dt
        } else {
            0.0
        };

        let output = self.kp * error + self.ki * self.integral + self.kd * derivative;
        self.previous_error = error;
        output
    }

    /// Clear accumulated state (used when the loop re-engages after a
    /// rotation maneuver or a fault backoff).
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains(kp: f64, ki: f64, kd: f64) -> PidGains {
        PidGains {
            kp,
            ki,
            kd,
            integral_limit: 10.0,
            epsilon: 0.01,
        }
    }

    #[test]
    fn pure_proportional_step() {
        let mut pid = Pid::new(&gains(1.0, 0.0, 0.0));
        assert_eq!(pid.compute(1.0, 0.0, 1.0), 1.0);
    }

    #[test]
    fn integral_accumulates_and_clamps() {
        let mut pid = Pid::new(&PidGains {
            kp: 0.0,
            ki: 1.0,
            kd: 0.0,
            integral_limit: 2.0,
            epsilon: 0.01,
        });
        // 1.0 of error per second; after 5 s the integral would be 5
        // without the clamp
        let mut out = 0.0;
        for _ in 0..5 {
            out = pid.compute(1.0, 0.0, 1.0);
        }
        assert_eq!(out, 2.0);
    }

    #[test]
    fn integral_resets_inside_deadband() {
        let mut pid = Pid::new(&gains(0.0, 1.0, 0.0));
        pid.compute(1.0, 0.0, 1.0);
        pid.compute(1.0, 0.0, 1.0);
        // Error within epsilon: integral must go to zero, not hold
        let settled = pid.compute(1.0, 1.0, 1.0);
        assert_eq!(settled, 0.0);
        // And the next real error starts integrating from scratch
        let restart = pid.compute(1.0, 0.0, 1.0);
        assert_eq!(restart, 1.0);
    }

    #[test]
    fn zero_dt_is_safe() {
        let mut pid = Pid::new(&gains(1.0, 1.0, 1.0));
        let out = pid.compute(1.0, 0.0, 0.0);
        assert!(out.is_finite());
        // No integration and no derivative on a zero-width step
        assert_eq!(out, 1.0);
    }

    #[test]
    fn derivative_tracks_error_change() {
        let mut pid = Pid::new(&gains(0.0, 0.0, 1.0));
        pid.compute(1.0, 0.0, 1.0);
        // Error went 1.0 -> 0.5 over dt=1: derivative = -0.5
        let out = pid.compute(1.0, 0.5, 1.0);
        assert_eq!(out, -0.5);
    }

    #[test]
    fn reset_clears_history() {
        let mut pid = Pid::new(&gains(0.0, 1.0, 1.0));
        pid.compute(1.0, 0.0, 1.0);
        pid.reset();
        // After reset the derivative sees no previous error
        let out = pid.compute(0.0, 0.0, 1.0);
        assert_eq!(out, 0.0);
    }
}

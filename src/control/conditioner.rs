// Joystick input conditioning: dead zone, then nonlinear response curve.

use crate::config::Params;
use crate::messages::{AxisSample, RawAxes};

/// Condition a single axis value.
///
/// Values inside the dead zone map to exactly 0. Outside it, the value
/// is shaped with `sign(v) * |v|^exponent` so small deflections are
/// proportionally gentler than large ones (0 -> 0, +/-1 -> +/-1, sign
/// preserved). Pure function, safe to call every tick.
pub fn condition(raw: f64, deadzone: f64, exponent: f64) -> f64 {
    if raw.abs() < deadzone {
        return 0.0;
    }
    raw.abs().powf(exponent).copysign(raw)
}

/// Condition all three logical axes for one tick.
pub fn condition_axes(raw: RawAxes, params: &Params) -> AxisSample {
    AxisSample {
        forward: condition(raw.forward, params.deadzone_movement, params.response_exponent),
        strafe: condition(raw.strafe, params.deadzone_movement, params.response_exponent),
        turn: condition(raw.turn, params.deadzone_turn, params.response_exponent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_zone_maps_to_exact_zero() {
        assert_eq!(condition(0.05, 0.1, 2.0), 0.0);
        assert_eq!(condition(-0.099, 0.1, 2.0), 0.0);
        assert_eq!(condition(0.0, 0.1, 2.0), 0.0);
    }

    #[test]
    fn sign_preserved_outside_dead_zone() {
        assert!(condition(0.5, 0.1, 2.0) > 0.0);
        assert!(condition(-0.5, 0.1, 2.0) < 0.0);
    }

    #[test]
    fn endpoints_map_to_endpoints() {
        assert_eq!(condition(1.0, 0.1, 2.0), 1.0);
        assert_eq!(condition(-1.0, 0.1, 2.0), -1.0);
    }

    #[test]
    fn curve_softens_small_deflections() {
        // Squaring pulls mid-range values toward zero
        let out = condition(0.5, 0.1, 2.0);
        assert!((out - 0.25).abs() < 1e-12);
        assert!(out < 0.5);
    }

    #[test]
    fn exponent_one_passes_through() {
        let out = condition(0.5, 0.1, 1.0);
        assert!((out - 0.5).abs() < 1e-12);
    }

    #[test]
    fn axes_use_their_own_dead_zones() {
        let mut params = Params::default();
        params.deadzone_movement = 0.2;
        params.deadzone_turn = 0.05;
        let sample = condition_axes(
            RawAxes {
                forward: 0.1,
                strafe: 0.1,
                turn: 0.1,
            },
            &params,
        );
        assert_eq!(sample.forward, 0.0);
        assert_eq!(sample.strafe, 0.0);
        assert!(sample.turn > 0.0);
    }
}

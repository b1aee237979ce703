// Mecanum mixing for the 4WD base
// Converts conditioned (forward, strafe, turn) intent to four wheel duties.

use crate::config::{DUTY_MAX, TURN_AUTHORITY_IN_PLACE, TURN_AUTHORITY_MOVING};

/// Signed duty commands for the four wheels, one instant of actuation.
/// Recreated every tick, never mutated after creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelCommand {
    pub fl: i16,
    pub fr: i16,
    pub bl: i16,
    pub br: i16,
}

impl WheelCommand {
    pub fn new(fl: i16, fr: i16, bl: i16, br: i16) -> Self {
        Self { fl, fr, bl, br }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    /// Returns duties as array [fl, fr, bl, br]
    pub fn as_array(&self) -> [i16; 4] {
        [self.fl, self.fr, self.bl, self.br]
    }
}

/// Raw mecanum mixing matrix. Output order [fl, fr, bl, br].
///
/// Satisfies, for any input, the structural identities
/// fl+fr+bl+br = 4y, fl-fr-bl+br = 4x, fl-fr+bl-br = 4t.
pub fn mix(y: f64, x: f64, turn: f64) -> [f64; 4] {
    [
        y + x + turn, // front-left
        y - x - turn, // front-right
        y - x + turn, // back-left
        y + x - turn, // back-right
    ]
}

/// Scale turn intent by the arbitration policy: full authority for a
/// pure in-place spin, reduced authority while also translating.
pub fn arbitrate_turn(y: f64, x: f64, turn: f64, moving_factor: f64, in_place_factor: f64) -> f64 {
    if y == 0.0 && x == 0.0 {
        turn * in_place_factor
    } else {
        turn * moving_factor
    }
}

/// Proportional normalization: if any magnitude exceeds 1, divide all
/// four by the max so relative proportions (the commanded direction) are
/// preserved. Idempotent on vectors already within full scale.
pub fn normalize(wheels: [f64; 4]) -> [f64; 4] {
    let max_mag = wheels.iter().fold(1.0f64, |acc, w| acc.max(w.abs()));
    wheels.map(|w| w / max_mag)
}

/// Full pipeline from conditioned axes to clamped integer duties.
pub fn mix_to_duties(y: f64, x: f64, turn: f64) -> WheelCommand {
    mix_to_duties_with_params(y, x, turn, TURN_AUTHORITY_MOVING, TURN_AUTHORITY_IN_PLACE)
}

/// Full pipeline with custom turn-authority factors.
pub fn mix_to_duties_with_params(
    y: f64,
    x: f64,
    turn: f64,
    moving_factor: f64,
    in_place_factor: f64,
) -> WheelCommand {
    let turn = arbitrate_turn(y, x, turn, moving_factor, in_place_factor);
    let wheels = normalize(mix(y, x, turn));
    let [fl, fr, bl, br] = wheels.map(to_duty);
    WheelCommand::new(fl, fr, bl, br)
}

/// Convert a normalized wheel value to a clamped integer duty.
fn to_duty(value: f64) -> i16 {
    let duty = (value * DUTY_MAX as f64).round() as i32;
    duty.clamp(-(DUTY_MAX as i32), DUTY_MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn mixing_identities_hold() {
        // Structural invariants of the matrix, regardless of clamping
        let cases = [
            (0.3, -0.7, 0.2),
            (1.0, 1.0, 1.0),
            (-0.5, 0.25, -0.9),
            (0.0, 0.0, 0.0),
        ];
        for (y, x, t) in cases {
            let [fl, fr, bl, br] = mix(y, x, t);
            assert_close(fl + fr + bl + br, 4.0 * y);
            assert_close(fl - fr - bl + br, 4.0 * x);
            assert_close(fl - fr + bl - br, 4.0 * t);
        }
    }

    #[test]
    fn normalization_preserves_shape() {
        let raw = mix(1.0, 1.0, 0.5);
        let normed = normalize(raw);
        let max = normed.iter().fold(0.0f64, |a, w| a.max(w.abs()));
        assert_close(max, 1.0);
        // Ratios between wheels are unchanged
        for i in 0..4 {
            for j in 0..4 {
                if raw[j] != 0.0 {
                    assert_close(normed[i] / normed[j], raw[i] / raw[j]);
                }
            }
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let within = [0.5, -0.25, 1.0, 0.75];
        assert_eq!(normalize(within), within);
        let over = normalize([2.0, -1.0, 0.5, 1.5]);
        assert_eq!(normalize(over), over);
    }

    #[test]
    fn pure_forward_drives_all_wheels_full_scale() {
        let cmd = mix_to_duties(1.0, 0.0, 0.0);
        assert_eq!(cmd, WheelCommand::new(DUTY_MAX, DUTY_MAX, DUTY_MAX, DUTY_MAX));
    }

    #[test]
    fn pure_spin_uses_full_authority() {
        // In-place rotation keeps full scale with the diagonal pattern
        let cmd = mix_to_duties(0.0, 0.0, 1.0);
        assert_eq!(
            cmd,
            WheelCommand::new(DUTY_MAX, -DUTY_MAX, DUTY_MAX, -DUTY_MAX)
        );
    }

    #[test]
    fn pure_strafe_pattern() {
        let cmd = mix_to_duties(0.0, 1.0, 0.0);
        assert_eq!(
            cmd,
            WheelCommand::new(DUTY_MAX, -DUTY_MAX, -DUTY_MAX, DUTY_MAX)
        );
    }

    #[test]
    fn turn_is_attenuated_while_translating() {
        let combined = mix_to_duties_with_params(0.5, 0.0, 0.4, 0.75, 1.0);
        let [fl, fr, bl, br] = combined.as_array().map(|d| d as f64 / DUTY_MAX as f64);
        // Recover the effective turn from the mixing identity
        let effective_turn = (fl - fr + bl - br) / 4.0;
        // Nothing exceeded full scale here, so no normalization happened
        // and the 0.75 factor is visible directly
        assert!((effective_turn - 0.4 * 0.75).abs() < 1e-3);
    }

    #[test]
    fn saturated_mix_never_exceeds_duty_max() {
        let cmd = mix_to_duties(1.0, 1.0, 1.0);
        for duty in cmd.as_array() {
            assert!(duty.abs() <= DUTY_MAX);
        }
        // At least one wheel rides the rail after normalization
        assert!(cmd.as_array().iter().any(|d| d.abs() == DUTY_MAX));
    }

    #[test]
    fn zero_input_is_zero_command() {
        assert!(mix_to_duties(0.0, 0.0, 0.0).is_zero());
    }
}

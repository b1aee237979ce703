// Motor and servo actuation for the mecanum base
//
// Provides:
// - Mecanum mixing (conditioned intent -> wheel duties)
// - PCA9685 channel-duty access (real chip and simulation)
// - High-level actuator gateway (channel map, calibration, servo pulses)

pub mod driver;
pub mod kinematics;
pub mod pca9685;

pub use driver::ActuatorGateway;
pub use kinematics::{WheelCommand, mix_to_duties};
pub use pca9685::{Pca9685Chip, PwmChip, PwmError, SimChip};

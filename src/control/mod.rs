// Drive command pipeline stages that run inside the actuation loop
//
// Provides:
// - Input conditioning (dead zone + nonlinear response curve)
// - Closed-loop velocity regulation (PID)
// - Safety/state governor (rotation lock, servo neutral policy)

pub mod conditioner;
pub mod governor;
pub mod pid;

pub use conditioner::{condition, condition_axes};
pub use governor::{DriveState, Governor, RotationTicket};
pub use pid::{Pid, SpeedSensor};

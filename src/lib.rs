// Teleop runtime for a four-wheel mecanum base
//
// Drive command pipeline (condition -> mix -> regulate -> govern ->
// actuate) plus the coordination channel linking the perception task to
// the actuation loop.

pub mod audio;
pub mod config;
pub mod control;
pub mod input;
pub mod messages;
pub mod motor;
pub mod perception;
pub mod runtime;

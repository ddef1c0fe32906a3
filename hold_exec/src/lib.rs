//! # Hold robot library
//!
//! Reactive controller for an assistive robot. On hearing the wake phrase the robot drives forward
//! until a palm sensor detects an object, grips it and holds it, while keeping the camera feed
//! serviced and staying responsive to a shutdown request.
//!
//! The robot is reached only through the ports in [`ports`], with implementations for simulation,
//! the console, a V4L2 camera (feature `cam`) and the Raspberry Pi hardware (ARM Linux only).

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

/// Port interfaces to the robot
pub mod ports;

/// Time sources
pub mod clock;

/// Hold control state machine
pub mod hold_ctrl;

/// Release of the robot on every exit path
pub mod shutdown;

/// Command port worker thread
pub mod listener;

/// Main loop
pub mod main_loop;

/// Executable parameters
pub mod params;

/// Port assembly for each run mode
pub mod setup;

/// Simulated ports
pub mod sim;

/// Terminal command port
pub mod console;

/// V4L2 camera perception
#[cfg(feature = "cam")]
pub mod cam;

/// Hardware actuators and sensors
pub mod hw;

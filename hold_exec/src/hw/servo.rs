//! # Servo driver interface
//!
//! Abstracts over servo driver boards so the gripper logic doesn't depend on a particular board.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::ports::MAX_GRIP_ANGLE_DEG;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Servo PWM period at 50 Hz.
///
/// Units: microseconds
pub const SERVO_PERIOD_US: f64 = 20_000.0;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Trait to provide a unified API for accessing servo driver boards.
pub trait ServoDriver {

    /// The type that the underlying driver uses for channel identification
    type Channel: Copy + std::fmt::Debug;

    /// Set the duty cycle of a channel.
    ///
    /// ## Arguments
    /// - `channel` - The channel to set the duty cycle for
    /// - `duty_cycle` - The duty cycle to set. Must be a value between 0.0 and 1.0. Values outside
    ///   this range will be rejected.
    fn set_duty_cycle(&mut self, channel: Self::Channel, duty_cycle: f64) -> Result<(), ServoError>;

    /// Stop driving all outputs.
    fn sleep(&mut self) -> Result<(), ServoError> {
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ServoError {
    #[error("An I2C error occurred")]
    I2c,

    #[error("Duty cycle must be between 0.0 and 1.0")]
    InvalidDutyCycle,

    #[error("Servo channel {0} does not exist on the board")]
    InvalidChannel(u8),
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pulse width calibration of a positional servo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoCalib {
    /// Pulse width at 0 degrees
    ///
    /// Units: microseconds
    pub min_pulse_us: f64,

    /// Pulse width at 180 degrees
    ///
    /// Units: microseconds
    pub max_pulse_us: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ServoCalib {
    /// Duty cycle which puts the servo at the given angle.
    pub fn angle_to_duty(&self, angle_deg: u8) -> f64 {
        let angle_deg = angle_deg.min(MAX_GRIP_ANGLE_DEG);

        let pulse_us = util::maths::lin_map(
            (0.0, MAX_GRIP_ANGLE_DEG as f64),
            (self.min_pulse_us, self.max_pulse_us),
            angle_deg as f64
        );

        util::maths::clamp(pulse_us / SERVO_PERIOD_US, 0.0, 1.0)
    }
}

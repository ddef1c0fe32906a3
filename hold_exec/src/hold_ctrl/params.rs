//! Parameters structure for HoldCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::normalise_phrase;
use crate::ports::MAX_GRIP_ANGLE_DEG;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the hold controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldCtrlParams {

    // ---- TRIGGER ----

    /// Phrase which starts an approach when heard.
    ///
    /// Matching ignores case, commas and full stops.
    pub wake_phrase: String,

    // ---- MOTION ----

    /// Normalised forward speed of both wheels during an approach.
    ///
    /// Units: none, in [0, 1]
    pub move_speed: f64,

    /// Maximum time to drive forward looking for an object.
    ///
    /// Units: seconds
    #[serde(default = "default_approach_timeout_s")]
    pub approach_timeout_s: f64,

    /// Interval between palm sensor samples during an approach.
    ///
    /// Units: seconds
    #[serde(default = "default_sample_interval_s")]
    pub sample_interval_s: f64,

    // ---- GRIP ----

    /// Gripper angle used to grip an object. Acts as the grip strength.
    ///
    /// Units: degrees, in [0, 180]
    pub grip_close_deg: u8,

    /// Gripper angle used to release an object.
    ///
    /// Units: degrees, in [0, 180]
    pub grip_open_deg: u8,

    /// Time an object is held for before returning to idle.
    ///
    /// Units: seconds
    #[serde(default = "default_hold_duration_s")]
    pub hold_duration_s: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParamsError {
    #[error("The wake phrase is empty once punctuation is removed")]
    EmptyWakePhrase,

    #[error("The move speed must be between 0 and 1, found {0}")]
    InvalidMoveSpeed(f64),

    #[error("Gripper angle {0} deg is larger than 180 deg")]
    InvalidGripAngle(u8),

    #[error("Parameter {0} must be a positive number of seconds, found {1}")]
    InvalidDuration(&'static str, f64),

    #[error("Servo channels must be between 0 and 15")]
    InvalidServoChannel,

    #[error("Servo pulse range {0} us to {1} us is empty")]
    InvalidPulseRange(f64, f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl HoldCtrlParams {
    /// Check the parameters are usable.
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        if normalise_phrase(&self.wake_phrase).trim().is_empty() {
            return Err(ParamsError::EmptyWakePhrase)
        }

        if !(0.0..=1.0).contains(&self.move_speed) {
            return Err(ParamsError::InvalidMoveSpeed(self.move_speed))
        }

        for angle in [self.grip_close_deg, self.grip_open_deg].iter() {
            if *angle > MAX_GRIP_ANGLE_DEG {
                return Err(ParamsError::InvalidGripAngle(*angle))
            }
        }

        check_duration("approach_timeout_s", self.approach_timeout_s)?;
        check_duration("sample_interval_s", self.sample_interval_s)?;
        check_duration("hold_duration_s", self.hold_duration_s)?;

        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        util::time::secs_to_duration(self.sample_interval_s)
    }
}

impl Default for HoldCtrlParams {
    fn default() -> Self {
        Self {
            wake_phrase: "josh come hold this".into(),
            move_speed: 0.5,
            approach_timeout_s: default_approach_timeout_s(),
            sample_interval_s: default_sample_interval_s(),
            grip_close_deg: 150,
            grip_open_deg: 30,
            hold_duration_s: default_hold_duration_s(),
        }
    }
}

/// Check a duration parameter is a positive, finite number of seconds.
pub fn check_duration(name: &'static str, value_s: f64) -> Result<(), ParamsError> {
    if value_s.is_finite() && value_s > 0.0 {
        Ok(())
    }
    else {
        Err(ParamsError::InvalidDuration(name, value_s))
    }
}

fn default_approach_timeout_s() -> f64 {
    5.0
}

fn default_sample_interval_s() -> f64 {
    0.1
}

fn default_hold_duration_s() -> f64 {
    2.0
}

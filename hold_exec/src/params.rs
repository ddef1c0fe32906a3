//! # Executable parameters
//!
//! All parameters of the hold executable, loaded from a single TOML file. Only the `[hold_ctrl]`
//! table is required, every other table falls back to its defaults.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::{
    hold_ctrl::{check_duration, HoldCtrlParams, ParamsError},
    listener::ListenParams,
    sim::SimParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the whole executable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoldExecParams {
    pub hold_ctrl: HoldCtrlParams,

    #[serde(default)]
    pub listen: ListenParams,

    #[serde(default)]
    pub sim: SimParams,

    #[serde(default)]
    pub cam: CamParams,

    #[serde(default)]
    pub hw: HwParams,
}

/// Camera parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CamParams {
    /// Index of the video device, i.e. `/dev/video{camera_index}`
    pub camera_index: u32,

    /// Capture resolution
    ///
    /// Units: pixels
    pub resolution: (u32, u32),

    /// Capture rate
    ///
    /// Units: frames/second
    pub fps: u32,

    /// Save every Nth rendered frame into the session directory, 0 disables saving.
    pub save_frame_every: u64,
}

/// Raspberry Pi pin and channel mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HwParams {
    /// BCM pins of the left motor, (forward, backward)
    pub left_motor_pins: (u8, u8),

    /// BCM pins of the right motor, (forward, backward)
    pub right_motor_pins: (u8, u8),

    /// Software PWM frequency of the motor pins
    ///
    /// Units: Hertz
    pub motor_pwm_freq_hz: f64,

    /// BCM pin of the left palm sensor, the sensor pulls the pin low on contact
    pub left_palm_pin: u8,

    /// BCM pin of the right palm sensor
    pub right_palm_pin: u8,

    /// I2C address of the PCA9685 servo board
    pub servo_address: u8,

    /// Servo board channels, in the order left thumb, left mitten, right thumb, right mitten
    pub servo_channels: [u8; 4],

    /// Pulse lengths at 0 and 180 degrees
    ///
    /// Units: microseconds
    pub servo_min_pulse_us: f64,
    pub servo_max_pulse_us: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HoldExecParams {
    /// Check the whole parameter set.
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        self.hold_ctrl.are_valid()?;

        if let Some(t) = self.listen.listen_timeout_s {
            check_duration("listen.listen_timeout_s", t)?;
        }
        check_duration("listen.poll_interval_s", self.listen.poll_interval_s)?;
        check_duration("sim.listen_window_s", self.sim.listen_window_s)?;

        if self.hw.servo_channels.iter().any(|c| *c > 15) {
            return Err(ParamsError::InvalidServoChannel)
        }
        if !(self.hw.servo_min_pulse_us < self.hw.servo_max_pulse_us) {
            return Err(ParamsError::InvalidPulseRange(
                self.hw.servo_min_pulse_us, self.hw.servo_max_pulse_us
            ))
        }

        Ok(())
    }
}

impl Default for CamParams {
    fn default() -> Self {
        Self {
            camera_index: 0,
            resolution: (640, 480),
            fps: 30,
            save_frame_every: 0,
        }
    }
}

impl Default for HwParams {
    fn default() -> Self {
        Self {
            left_motor_pins: (7, 8),
            right_motor_pins: (9, 10),
            motor_pwm_freq_hz: 100.0,
            left_palm_pin: 23,
            right_palm_pin: 24,
            servo_address: 0x40,
            servo_channels: [0, 1, 2, 3],
            servo_min_pulse_us: 750.0,
            servo_max_pulse_us: 2250.0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let params: HoldExecParams = util::params::from_str(r#"
            [hold_ctrl]
            wake_phrase = "josh come hold this"
            move_speed = 0.4
            grip_close_deg = 140
            grip_open_deg = 20
        "#).unwrap();

        assert!(params.are_valid().is_ok());
        assert_eq!(params.hold_ctrl.approach_timeout_s, 5.0);
        assert_eq!(params.hold_ctrl.hold_duration_s, 2.0);
        assert_eq!(params.hold_ctrl.sample_interval_s, 0.1);
        assert_eq!(params.listen.listen_timeout_s, None);
        assert_eq!(params.hw.left_palm_pin, 23);
        assert_eq!(params.cam.camera_index, 0);
    }

    #[test]
    fn test_invalid_sections_rejected() {
        let mut params = HoldExecParams::default();
        assert!(params.are_valid().is_ok());

        params.listen.listen_timeout_s = Some(0.0);
        assert!(params.are_valid().is_err());
        params.listen.listen_timeout_s = None;

        params.hw.servo_channels[2] = 16;
        assert_eq!(params.are_valid(), Err(ParamsError::InvalidServoChannel));
        params.hw.servo_channels[2] = 2;

        params.hw.servo_min_pulse_us = 2500.0;
        assert!(matches!(params.are_valid(), Err(ParamsError::InvalidPulseRange(..))));
    }

    #[test]
    fn test_shipped_params_valid() {
        let params: HoldExecParams = util::params::load_from_path(
            concat!(env!("CARGO_MANIFEST_DIR"), "/../params/hold_exec.toml")
        ).unwrap();
        assert!(params.are_valid().is_ok());
    }
}

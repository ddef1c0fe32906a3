//! # Hardware ports
//!
//! Actuators built from a [`MotorDriver`] for the two drive wheels and a [`ServoDriver`] board for
//! the four grippers. The Raspberry Pi implementations (GPIO motors and palm sensors, PCA9685 servo
//! board) are only built for ARM Linux targets.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod servo;

#[cfg(all(target_arch = "arm", target_os = "linux"))]
pub mod rpi;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};

use crate::ports::{clamp_wheel_speed, ActuatorPort, GripperId, PortError, Side};
use servo::{ServoCalib, ServoDriver};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A pair of drive motors.
pub trait MotorDriver {
    /// Set the normalised speed of one motor, in `[-1, 1]`.
    fn set_speed(&mut self, side: Side, speed: f64) -> Result<(), PortError>;

    /// Stop both motors and release the pins.
    fn release(&mut self) -> Result<(), PortError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Wheels and grippers on real hardware.
pub struct HwActuators<M, D: ServoDriver> {
    motors: M,
    servos: D,

    /// Servo channel of each gripper, in [`GripperId::ALL`] order
    channels: [D::Channel; 4],

    calib: ServoCalib,
    released: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<M, D> HwActuators<M, D>
where
    M: MotorDriver,
    D: ServoDriver
{
    pub fn new(motors: M, servos: D, channels: [D::Channel; 4], calib: ServoCalib) -> Self {
        Self {
            motors,
            servos,
            channels,
            calib,
            released: false,
        }
    }

    fn channel(&self, which: GripperId) -> D::Channel {
        match which {
            GripperId::LeftThumb => self.channels[0],
            GripperId::LeftMitten => self.channels[1],
            GripperId::RightThumb => self.channels[2],
            GripperId::RightMitten => self.channels[3],
        }
    }
}

impl<M, D> ActuatorPort for HwActuators<M, D>
where
    M: MotorDriver,
    D: ServoDriver
{
    fn set_wheel_speeds(&mut self, left: f64, right: f64) -> Result<(), PortError> {
        if self.released {
            return Err(PortError::Released)
        }

        // Both wheels are always commanded, the first error is reported
        let l = self.motors.set_speed(Side::Left, clamp_wheel_speed(left));
        let r = self.motors.set_speed(Side::Right, clamp_wheel_speed(right));
        l.and(r)
    }

    fn set_gripper_angle(&mut self, which: GripperId, angle_deg: u8) -> Result<(), PortError> {
        if self.released {
            return Err(PortError::Released)
        }

        let channel = self.channel(which);
        let duty = self.calib.angle_to_duty(angle_deg);
        debug!("{:?} (channel {:?}) -> {} deg, duty {:.4}", which, channel, angle_deg, duty);

        self.servos.set_duty_cycle(channel, duty)
            .map_err(|e| PortError::Hardware(format!("{:?}: {}", which, e)))
    }

    fn release(&mut self) -> Result<(), PortError> {
        if self.released {
            return Err(PortError::Released)
        }
        self.released = true;

        let motors = self.motors.release();
        let servos = self.servos.sleep()
            .map_err(|e| PortError::Hardware(format!("Servo board: {}", e)));
        info!("Hardware actuators released");

        motors.and(servos)
    }
}

/// Split a signed speed into the (forward, backward) duty cycles of an H-bridge.
pub fn speed_to_duties(speed: f64) -> (f64, f64) {
    let speed = clamp_wheel_speed(speed);

    if speed >= 0.0 {
        (speed, 0.0)
    }
    else {
        (0.0, -speed)
    }
}

/// Release every item in turn, carrying on past failures.
///
/// Returns the first error once all items have been attempted.
pub fn release_each<T, F>(items: &mut [T], mut release: F) -> Result<(), PortError>
where
    F: FnMut(&mut T) -> Result<(), PortError>
{
    let mut first_err = None;

    for (i, item) in items.iter_mut().enumerate() {
        if let Err(e) = release(item) {
            warn!("Could not release item {}: {}", i, e);
            first_err.get_or_insert(e);
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use servo::ServoError;

    #[derive(Default)]
    struct Motors {
        speeds: Vec<(Side, f64)>,
        released: bool,
    }

    impl MotorDriver for Motors {
        fn set_speed(&mut self, side: Side, speed: f64) -> Result<(), PortError> {
            self.speeds.push((side, speed));
            Ok(())
        }

        fn release(&mut self) -> Result<(), PortError> {
            self.released = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Board {
        duties: Vec<(u8, f64)>,
        asleep: bool,
    }

    impl ServoDriver for Board {
        type Channel = u8;

        fn set_duty_cycle(&mut self, channel: u8, duty_cycle: f64) -> Result<(), ServoError> {
            if channel > 15 {
                return Err(ServoError::InvalidChannel(channel))
            }
            self.duties.push((channel, duty_cycle));
            Ok(())
        }

        fn sleep(&mut self) -> Result<(), ServoError> {
            self.asleep = true;
            Ok(())
        }
    }

    fn calib() -> ServoCalib {
        ServoCalib {
            min_pulse_us: 750.0,
            max_pulse_us: 2250.0,
        }
    }

    #[test]
    fn test_release_each_attempts_all() {
        // (fails to release, released)
        let mut pins = [(false, false), (true, false), (false, false), (true, false)];

        let result = release_each(&mut pins, |pin| {
            pin.1 = true;
            if pin.0 {
                Err(PortError::Hardware("pin busy".into()))
            }
            else {
                Ok(())
            }
        });

        assert!(matches!(result, Err(PortError::Hardware(_))));
        assert!(pins.iter().all(|p| p.1));

        assert!(release_each(&mut [(); 0], |_| Ok(())).is_ok());
    }

    #[test]
    fn test_speed_to_duties() {
        assert_eq!(speed_to_duties(0.5), (0.5, 0.0));
        assert_eq!(speed_to_duties(-0.25), (0.0, 0.25));
        assert_eq!(speed_to_duties(-3.0), (0.0, 1.0));
        assert_eq!(speed_to_duties(0.0), (0.0, 0.0));
    }

    #[test]
    fn test_actuators_route_to_drivers() {
        let mut act = HwActuators::new(Motors::default(), Board::default(), [4, 5, 6, 7], calib());

        act.set_wheel_speeds(0.5, 1.5).unwrap();
        act.set_gripper_angle(GripperId::RightThumb, 90).unwrap();

        assert_eq!(act.motors.speeds, vec![(Side::Left, 0.5), (Side::Right, 1.0)]);
        assert_eq!(act.servos.duties.len(), 1);
        assert_eq!(act.servos.duties[0].0, 6);
        assert!((act.servos.duties[0].1 - 0.075).abs() < 1e-9);

        act.release().unwrap();
        assert!(act.motors.released);
        assert!(act.servos.asleep);
        assert!(matches!(act.set_wheel_speeds(0.0, 0.0), Err(PortError::Released)));
    }

    #[test]
    fn test_servo_error_mapped() {
        let mut act = HwActuators::new(Motors::default(), Board::default(), [0, 1, 2, 16], calib());
        assert!(matches!(
            act.set_gripper_angle(GripperId::RightMitten, 30),
            Err(PortError::Hardware(_))
        ));
    }
}

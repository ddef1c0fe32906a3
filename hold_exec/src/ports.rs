//! # Port interfaces
//!
//! The controller only ever talks to the robot through the four ports in this module:
//!
//! - [`ActuatorPort`] - differential drive wheel speeds and the four gripper angles
//! - [`SensorPort`] - the two binary palm proximity sensors
//! - [`PerceptionPort`] - the camera feed and the user cancel signal
//! - [`CommandPort`] - a single listen for a spoken phrase
//!
//! Implementations exist for the simulation ([`crate::sim`]), the console ([`crate::console`]),
//! the camera (`cam`) and the Raspberry Pi hardware (`hw`).

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use image::RgbImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum magnitude of a normalised wheel speed.
pub const MAX_WHEEL_SPEED: f64 = 1.0;

/// Maximum gripper angle in degrees.
pub const MAX_GRIP_ANGLE_DEG: u8 = 180;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Side of the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Reading of a palm sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Contact {
    /// An object is in contact with (or very close to) the palm.
    Detected,
    Clear,
}

/// The four gripper actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GripperId {
    LeftThumb,
    LeftMitten,
    RightThumb,
    RightMitten,
}

/// Errors raised by port implementations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("The device is currently unavailable")]
    Unavailable,

    #[error("The port has already been released")]
    Released,
}

/// Errors that can occur while listening for a phrase.
///
/// The controller treats all of these as "nothing recognised".
#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    #[error("The audio could not be understood")]
    Unintelligible,

    #[error("The recognition engine failed: {0}")]
    Engine(String),

    #[error("The command source has been closed")]
    Closed,

    #[error("I/O error while listening: {0}")]
    Io(#[from] std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Demanded normalised speeds of the left and right wheels, each in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionCommand {
    pub left: f64,
    pub right: f64,
}

/// Demanded angle of a gripper in degrees, in `[0, 180]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GripTarget {
    pub angle_deg: u8,
}

/// A single camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number of the frame from its source
    pub seq: u64,

    /// UTC timestamp at which the frame was acquired
    pub timestamp: DateTime<Utc>,

    /// The image itself
    pub image: RgbImage,
}

/// A latched cancel request shared between whatever observes the user and the perception port.
///
/// Once set it stays set for the remainder of the run.
#[derive(Debug, Clone, Default)]
pub struct CancelLatch(Arc<AtomicBool>);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Wheels and grippers.
pub trait ActuatorPort {
    /// Set the normalised left and right wheel speeds. Values are clamped to `[-1, 1]`.
    fn set_wheel_speeds(&mut self, left: f64, right: f64) -> Result<(), PortError>;

    /// Set the angle of a single gripper. The angle is clamped to `[0, 180]`.
    fn set_gripper_angle(&mut self, which: GripperId, angle_deg: u8) -> Result<(), PortError>;

    /// Release any driver resources held by the port.
    fn release(&mut self) -> Result<(), PortError> {
        Ok(())
    }

    /// Apply a motion command.
    fn drive(&mut self, cmd: MotionCommand) -> Result<(), PortError> {
        self.set_wheel_speeds(cmd.left, cmd.right)
    }

    /// Command all four grippers to the same target.
    ///
    /// Every gripper is commanded even if an earlier one fails, the first error is returned.
    fn grip_all(&mut self, target: GripTarget) -> Result<(), PortError> {
        let mut first_err = None;

        for id in GripperId::ALL.iter() {
            if let Err(e) = self.set_gripper_angle(*id, target.angle_deg) {
                warn!("Could not set {:?} to {} deg: {}", id, target.angle_deg, e);
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Palm proximity sensors.
///
/// Sensors are assumed to always be readable.
pub trait SensorPort {
    fn read_palm(&mut self, side: Side) -> Contact;
}

/// Camera feed and cancel signal.
pub trait PerceptionPort {
    /// Fetch the next frame, or `None` if there isn't one yet.
    fn next_frame(&mut self) -> Result<Option<Frame>, PortError>;

    /// Display (or otherwise consume) a frame.
    fn render(&mut self, frame: Frame);

    /// Returns true if the user has asked for the run to be cancelled.
    fn poll_cancel(&mut self) -> bool;

    /// Release the camera.
    fn release(&mut self) -> Result<(), PortError> {
        Ok(())
    }

    /// Fetch and immediately render one frame.
    ///
    /// Fetch failures are logged and treated as "no frame". Returns true if a frame was rendered.
    fn service(&mut self) -> bool {
        match self.next_frame() {
            Ok(Some(frame)) => {
                self.render(frame);
                true
            }
            Ok(None) => {
                debug!("No frame available this cycle");
                false
            }
            Err(e) => {
                warn!("Could not fetch a frame: {}", e);
                false
            }
        }
    }
}

/// Source of spoken commands.
pub trait CommandPort {
    /// Listen once, returning the recognised phrase if there was one.
    ///
    /// This may block for a long time.
    fn listen_once(&mut self) -> Result<Option<String>, ListenError>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GripperId {
    /// All grippers, left hand first.
    pub const ALL: [GripperId; 4] = [
        GripperId::LeftThumb,
        GripperId::LeftMitten,
        GripperId::RightThumb,
        GripperId::RightMitten,
    ];
}

impl Contact {
    pub fn is_detected(&self) -> bool {
        matches!(self, Contact::Detected)
    }
}

impl MotionCommand {
    /// Create a new command, clamping both speeds to `[-1, 1]`.
    pub fn new(left: f64, right: f64) -> Self {
        Self {
            left: clamp_wheel_speed(left),
            right: clamp_wheel_speed(right),
        }
    }

    /// Both wheels stopped.
    pub fn stop() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Both wheels forward at the same speed.
    pub fn forward(speed: f64) -> Self {
        Self::new(speed, speed)
    }

    pub fn is_stopped(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }
}

impl GripTarget {
    /// Create a new target, clamping the angle to `[0, 180]`.
    pub fn new(angle_deg: u8) -> Self {
        Self {
            angle_deg: clamp_grip_angle(angle_deg),
        }
    }
}

impl CancelLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl<T: ActuatorPort + ?Sized> ActuatorPort for Box<T> {
    fn set_wheel_speeds(&mut self, left: f64, right: f64) -> Result<(), PortError> {
        (**self).set_wheel_speeds(left, right)
    }

    fn set_gripper_angle(&mut self, which: GripperId, angle_deg: u8) -> Result<(), PortError> {
        (**self).set_gripper_angle(which, angle_deg)
    }

    fn release(&mut self) -> Result<(), PortError> {
        (**self).release()
    }
}

impl<T: SensorPort + ?Sized> SensorPort for Box<T> {
    fn read_palm(&mut self, side: Side) -> Contact {
        (**self).read_palm(side)
    }
}

impl<T: PerceptionPort + ?Sized> PerceptionPort for Box<T> {
    fn next_frame(&mut self) -> Result<Option<Frame>, PortError> {
        (**self).next_frame()
    }

    fn render(&mut self, frame: Frame) {
        (**self).render(frame)
    }

    fn poll_cancel(&mut self) -> bool {
        (**self).poll_cancel()
    }

    fn release(&mut self) -> Result<(), PortError> {
        (**self).release()
    }
}

impl<T: CommandPort + ?Sized> CommandPort for Box<T> {
    fn listen_once(&mut self) -> Result<Option<String>, ListenError> {
        (**self).listen_once()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Limit a wheel speed to `[-1, 1]`, NaN is treated as stopped.
pub fn clamp_wheel_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return 0.0;
    }
    util::maths::clamp(speed, -MAX_WHEEL_SPEED, MAX_WHEEL_SPEED)
}

/// Limit a gripper angle to `[0, 180]`.
pub fn clamp_grip_angle(angle_deg: u8) -> u8 {
    angle_deg.min(MAX_GRIP_ANGLE_DEG)
}

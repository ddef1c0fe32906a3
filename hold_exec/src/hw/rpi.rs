//! # Raspberry Pi drivers
//!
//! - Drive motors on GPIO pin pairs with software PWM
//! - Palm sensors on pulled-up GPIO inputs, pulled low on contact
//! - Grippers on a PCA9685 servo board over I2C

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use embedded_hal::blocking::i2c::{Write, WriteRead};
use log::info;
use pwm_pca9685::{Address, Channel, Pca9685};
use rppal::{
    gpio::{Gpio, InputPin, OutputPin},
    i2c::I2c,
};

use super::{
    servo::{ServoCalib, ServoDriver, ServoError, SERVO_PERIOD_US},
    release_each, speed_to_duties, HwActuators, MotorDriver,
};
use crate::{
    params::HwParams,
    ports::{Contact, PortError, SensorPort, Side},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const MAX_PWM: u16 = 4095;

/// PCA9685 internal oscillator frequency.
///
/// Units: Hertz
const PCA9685_OSC_HZ: f64 = 25_000_000.0;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Actuators of the Raspberry Pi robot.
pub type RpiActuators = HwActuators<GpioMotors, Pca9685<I2c>>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Two H-bridge motors, each on a (forward, backward) pin pair.
pub struct GpioMotors {
    left: (OutputPin, OutputPin),
    right: (OutputPin, OutputPin),
    pwm_freq_hz: f64,
}

/// The two palm sensors.
pub struct GpioPalmSensors {
    left: InputPin,
    right: InputPin,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GpioMotors {
    pub fn new(params: &HwParams) -> Result<Self, PortError> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let out = |pin: u8| -> Result<OutputPin, PortError> {
            Ok(gpio.get(pin).map_err(gpio_err)?.into_output_low())
        };

        Ok(Self {
            left: (out(params.left_motor_pins.0)?, out(params.left_motor_pins.1)?),
            right: (out(params.right_motor_pins.0)?, out(params.right_motor_pins.1)?),
            pwm_freq_hz: params.motor_pwm_freq_hz,
        })
    }
}

impl MotorDriver for GpioMotors {
    fn set_speed(&mut self, side: Side, speed: f64) -> Result<(), PortError> {
        let freq = self.pwm_freq_hz;
        let (fwd, back) = match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        };

        let (fwd_duty, back_duty) = speed_to_duties(speed);
        set_pin_duty(fwd, freq, fwd_duty)?;
        set_pin_duty(back, freq, back_duty)
    }

    fn release(&mut self) -> Result<(), PortError> {
        let mut pins = [
            &mut self.left.0, &mut self.left.1, &mut self.right.0, &mut self.right.1
        ];

        // Every pin is driven low even if its PWM could not be cleared
        let result = release_each(&mut pins, |pin| {
            let cleared = pin.clear_pwm().map_err(gpio_err);
            pin.set_low();
            cleared
        });

        info!("Motor pins released");
        result
    }
}

impl GpioPalmSensors {
    pub fn new(params: &HwParams) -> Result<Self, PortError> {
        let gpio = Gpio::new().map_err(gpio_err)?;

        Ok(Self {
            left: gpio.get(params.left_palm_pin).map_err(gpio_err)?.into_input_pullup(),
            right: gpio.get(params.right_palm_pin).map_err(gpio_err)?.into_input_pullup(),
        })
    }
}

impl SensorPort for GpioPalmSensors {
    fn read_palm(&mut self, side: Side) -> Contact {
        let pin = match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        };

        if pin.is_low() {
            Contact::Detected
        }
        else {
            Contact::Clear
        }
    }
}

impl<I2C, E> ServoDriver for Pca9685<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E>
{
    type Channel = Channel;

    fn set_duty_cycle(
        &mut self,
        channel: Self::Channel,
        duty_cycle: f64
    ) -> Result<(), ServoError> {

        // If the duty cycle is out of range return an error
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(ServoError::InvalidDutyCycle)
        }

        // Pulse starts at the beginning of the period and ends at the duty cycle
        self.set_channel_on(channel, 0).map_err(pca_err)?;
        self.set_channel_off(channel, (duty_cycle * MAX_PWM as f64) as u16).map_err(pca_err)
    }

    fn sleep(&mut self) -> Result<(), ServoError> {
        self.disable().map_err(pca_err)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open the motors and servo board.
pub fn build_actuators(params: &HwParams) -> Result<RpiActuators, PortError> {
    let motors = GpioMotors::new(params)?;

    let i2c = I2c::new()
        .map_err(|e| PortError::Hardware(format!("Cannot open I2C bus: {}", e)))?;
    let mut board = Pca9685::new(i2c, Address::from(params.servo_address))
        .map_err(|e| PortError::Hardware(format!("Cannot open servo board: {}", pca_err(e))))?;

    // 50 Hz servo frame
    let prescale = (PCA9685_OSC_HZ / (4096.0 * (1e6 / SERVO_PERIOD_US))).round() - 1.0;
    board.set_prescale(prescale as u8)
        .and_then(|_| board.enable())
        .map_err(|e| PortError::Hardware(format!("Cannot start servo board: {}", pca_err(e))))?;

    let mut channels = [Channel::C0; 4];
    for (c, n) in channels.iter_mut().zip(params.servo_channels.iter()) {
        *c = channel_from_index(*n)
            .map_err(|e| PortError::Hardware(e.to_string()))?;
    }

    info!(
        "Servo board at {:#04x} started, gripper channels {:?}",
        params.servo_address, params.servo_channels
    );

    Ok(HwActuators::new(
        motors,
        board,
        channels,
        ServoCalib {
            min_pulse_us: params.servo_min_pulse_us,
            max_pulse_us: params.servo_max_pulse_us,
        }
    ))
}

fn set_pin_duty(pin: &mut OutputPin, freq_hz: f64, duty: f64) -> Result<(), PortError> {
    if duty <= 0.0 {
        pin.clear_pwm().map_err(gpio_err)?;
        pin.set_low();
        Ok(())
    }
    else {
        pin.set_pwm_frequency(freq_hz, duty).map_err(gpio_err)
    }
}

fn channel_from_index(index: u8) -> Result<Channel, ServoError> {
    Ok(match index {
        0 => Channel::C0,
        1 => Channel::C1,
        2 => Channel::C2,
        3 => Channel::C3,
        4 => Channel::C4,
        5 => Channel::C5,
        6 => Channel::C6,
        7 => Channel::C7,
        8 => Channel::C8,
        9 => Channel::C9,
        10 => Channel::C10,
        11 => Channel::C11,
        12 => Channel::C12,
        13 => Channel::C13,
        14 => Channel::C14,
        15 => Channel::C15,
        n => return Err(ServoError::InvalidChannel(n)),
    })
}

fn pca_err<E>(e: pwm_pca9685::Error<E>) -> ServoError {
    match e {
        pwm_pca9685::Error::I2C(_) => ServoError::I2c,
        pwm_pca9685::Error::InvalidInputData => ServoError::InvalidDutyCycle,
    }
}

fn gpio_err(e: rppal::gpio::Error) -> PortError {
    PortError::Hardware(format!("GPIO: {}", e))
}

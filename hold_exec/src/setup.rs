//! # Port assembly
//!
//! Builds the ports for a run mode and wires them into a [`ShutdownGuard`] and [`ListenWorker`].
//!
//! [`assemble`] fixes the build order: perception first, then the actuators and sensors, then the
//! controller and guard, and the command listener last. A perception failure is fatal and nothing
//! else is built.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fs, path::{Path, PathBuf}, str::FromStr};

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::{
    clock::Clock,
    console::ConsoleCommand,
    hold_ctrl::{HoldCtrl, HoldCtrlError, HoldCtrlParams, ParamsError},
    listener::ListenWorker,
    params::HoldExecParams,
    ports::{ActuatorPort, ListenError, PerceptionPort, PortError, SensorPort},
    shutdown::{InterruptFlag, ShutdownGuard},
    sim::{SimActuators, SimCommand, SimPerception, SimSensors, SimWorld},
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Which ports a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Mode {
    /// Everything simulated, commands from the scenario
    Sim,

    /// Simulated robot, commands typed on the console
    Console,

    /// Raspberry Pi hardware, commands typed on the console
    Hw,
}

/// Errors raised while building the ports for a run.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Unknown mode \"{0}\", expected sim, console or hw")]
    UnknownMode(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(#[from] ParamsError),

    #[error("Failed to initialise perception: {0}")]
    Perception(PortError),

    #[error("Could not create the frames directory: {0}")]
    FramesDir(std::io::Error),

    #[error("Failed to initialise the actuators or sensors: {0}")]
    Robot(PortError),

    #[error("Hardware mode is only available on the Raspberry Pi")]
    HardwareUnavailable,

    #[error("Failed to initialise HoldCtrl: {0}")]
    HoldCtrl(#[from] HoldCtrlError),

    #[error("Failed to start the command listener: {0}")]
    Listener(ListenError),
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything the main loop runs against.
pub struct Assembly<A, S, C, P>
where
    A: ActuatorPort,
    S: SensorPort,
    C: Clock,
    P: PerceptionPort
{
    pub guard: ShutdownGuard<A, S, C, P>,
    pub listener: ListenWorker,
}

/// The ports chosen at runtime.
pub type DynAssembly<C> = Assembly<
    Box<dyn ActuatorPort>, Box<dyn SensorPort>, C, Box<dyn PerceptionPort>
>;

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FromStr for Mode {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sim" => Ok(Mode::Sim),
            "console" => Ok(Mode::Console),
            "hw" => Ok(Mode::Hw),
            other => Err(SetupError::UnknownMode(other.to_string())),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the ports in order and take them under a shutdown guard.
///
/// If the actuators or sensors fail the perception port is released before returning. Once the
/// guard exists every later failure releases the robot through it.
pub fn assemble<A, S, C, P, FP, FR, FL>(
    params: HoldCtrlParams,
    clock: C,
    interrupt: &InterruptFlag,
    build_perception: FP,
    build_robot: FR,
    spawn_listener: FL
) -> Result<Assembly<A, S, C, P>, SetupError>
where
    A: ActuatorPort,
    S: SensorPort,
    C: Clock,
    P: PerceptionPort,
    FP: FnOnce() -> Result<P, SetupError>,
    FR: FnOnce() -> Result<(A, S), SetupError>,
    FL: FnOnce() -> Result<ListenWorker, SetupError>
{
    params.are_valid()?;

    // Must succeed before anything else is started
    let mut perception = build_perception()?;
    info!("Perception initialised");

    let (actuators, sensors) = match build_robot() {
        Ok(r) => r,
        Err(e) => {
            if let Err(re) = perception.release() {
                warn!("Could not release perception: {}", re);
            }
            return Err(e)
        }
    };

    let ctrl = HoldCtrl::new(params, actuators, sensors, clock, interrupt.clone())?;

    // From here the robot is released on every exit path
    let guard = ShutdownGuard::acquire(ctrl, perception);

    let listener = spawn_listener()?;

    Ok(Assembly { guard, listener })
}

/// Build the perception port for a mode.
///
/// Without the `cam` feature every mode uses synthetic frames. Frames are saved under
/// `session_root/frames` when enabled.
pub fn build_perception<C>(
    mode: Mode,
    params: &HoldExecParams,
    session_root: &Path,
    world: &SimWorld<C>
) -> Result<Box<dyn PerceptionPort>, SetupError>
where
    C: Clock + 'static
{
    let save_every = match mode {
        Mode::Sim => params.sim.save_frame_every,
        Mode::Console | Mode::Hw => params.cam.save_frame_every,
    };

    let frame_dir = if save_every > 0 {
        let dir = session_root.join("frames");
        fs::create_dir_all(&dir).map_err(SetupError::FramesDir)?;
        Some(dir)
    }
    else {
        None
    };

    if mode != Mode::Sim {
        #[cfg(feature = "cam")]
        {
            let cam = crate::cam::CamPerception::new(
                params.cam.clone(),
                world.cancel().clone(),
                frame_dir
            ).map_err(SetupError::Perception)?;
            return Ok(Box::new(cam))
        }

        #[cfg(not(feature = "cam"))]
        warn!("Built without camera support, using synthetic frames");
    }

    let mut sim_params = params.sim.clone();
    sim_params.save_frame_every = save_every;

    Ok(Box::new(SimPerception::new(world.clone(), sim_params, frame_dir)))
}

/// Build the actuators and sensors for a mode.
pub fn build_robot<C>(
    mode: Mode,
    params: &HoldExecParams,
    world: &SimWorld<C>
) -> Result<(Box<dyn ActuatorPort>, Box<dyn SensorPort>), SetupError>
where
    C: Clock + 'static
{
    match mode {
        Mode::Sim | Mode::Console => Ok((
            Box::new(SimActuators::new()),
            Box::new(SimSensors::new(world.clone()))
        )),
        Mode::Hw => build_hw(params),
    }
}

/// Start the command listener for a mode.
///
/// Console modes keep their history in `history`.
pub fn spawn_listener<C>(
    mode: Mode,
    params: &HoldExecParams,
    world: &SimWorld<C>,
    interrupt: &InterruptFlag,
    history: PathBuf
) -> Result<ListenWorker, SetupError>
where
    C: Clock + Send + Sync + 'static
{
    match mode {
        Mode::Sim => {
            let world = world.clone();
            let sim_params = params.sim.clone();
            ListenWorker::spawn(
                move || Ok(SimCommand::new(world, sim_params)),
                params.listen.clone()
            )
        }
        Mode::Console | Mode::Hw => {
            let cancel = world.cancel().clone();
            let interrupt = interrupt.clone();
            ListenWorker::spawn(
                move || ConsoleCommand::new(cancel, interrupt, Some(history)),
                params.listen.clone()
            )
        }
    }.map_err(SetupError::Listener)
}

#[cfg(all(target_arch = "arm", target_os = "linux"))]
fn build_hw(
    params: &HoldExecParams
) -> Result<(Box<dyn ActuatorPort>, Box<dyn SensorPort>), SetupError> {
    use crate::hw::rpi;

    let actuators = rpi::build_actuators(&params.hw).map_err(SetupError::Robot)?;
    let sensors = rpi::GpioPalmSensors::new(&params.hw).map_err(SetupError::Robot)?;

    info!("Hardware initialised");

    Ok((Box::new(actuators), Box::new(sensors)))
}

#[cfg(not(all(target_arch = "arm", target_os = "linux")))]
fn build_hw(
    _params: &HoldExecParams
) -> Result<(Box<dyn ActuatorPort>, Box<dyn SensorPort>), SetupError> {
    Err(SetupError::HardwareUnavailable)
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc, sync::Arc};

    use super::*;
    use crate::{
        clock::ManualClock,
        hold_ctrl::RobotState,
        listener::ListenParams,
        ports::{CancelLatch, Frame},
        sim::SimParams,
    };

    type Log = Rc<RefCell<Vec<&'static str>>>;

    /// Perception which records its release.
    struct LoggedPerception(Log);

    impl PerceptionPort for LoggedPerception {
        fn next_frame(&mut self) -> Result<Option<Frame>, PortError> {
            Ok(None)
        }

        fn render(&mut self, _frame: Frame) {}

        fn poll_cancel(&mut self) -> bool {
            false
        }

        fn release(&mut self) -> Result<(), PortError> {
            self.0.borrow_mut().push("perception released");
            Ok(())
        }
    }

    fn world() -> SimWorld<ManualClock> {
        SimWorld::new(Arc::new(ManualClock::new()), CancelLatch::new())
    }

    fn sim_listener(world: &SimWorld<ManualClock>) -> Result<ListenWorker, SetupError> {
        ListenWorker::from_port(SimCommand::new(world.clone(), SimParams::default()), ListenParams::default())
            .map_err(SetupError::Listener)
    }

    #[test]
    fn test_perception_failure_builds_nothing_else() {
        let world = world();
        let log: Log = Rc::default();

        let result = assemble(
            HoldCtrlParams::default(),
            world.clock().clone(),
            &InterruptFlag::new(),
            || -> Result<LoggedPerception, SetupError> {
                Err(SetupError::Perception(PortError::Unavailable))
            },
            || {
                log.borrow_mut().push("robot");
                Ok((SimActuators::new(), SimSensors::new(world.clone())))
            },
            || {
                log.borrow_mut().push("listener");
                sim_listener(&world)
            }
        );

        assert!(matches!(result, Err(SetupError::Perception(PortError::Unavailable))));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_robot_failure_releases_perception() {
        let world = world();
        let log: Log = Rc::default();

        let result = assemble(
            HoldCtrlParams::default(),
            world.clock().clone(),
            &InterruptFlag::new(),
            || Ok(LoggedPerception(log.clone())),
            || -> Result<(SimActuators, SimSensors<ManualClock>), SetupError> {
                Err(SetupError::HardwareUnavailable)
            },
            || {
                log.borrow_mut().push("listener");
                sim_listener(&world)
            }
        );

        assert!(matches!(result, Err(SetupError::HardwareUnavailable)));
        assert_eq!(*log.borrow(), vec!["perception released"]);
    }

    #[test]
    fn test_build_order() {
        let world = world();
        let log: Log = Rc::default();

        let assembly = assemble(
            HoldCtrlParams::default(),
            world.clock().clone(),
            &InterruptFlag::new(),
            || {
                log.borrow_mut().push("perception");
                Ok(LoggedPerception(log.clone()))
            },
            || {
                log.borrow_mut().push("robot");
                Ok((SimActuators::new(), SimSensors::new(world.clone())))
            },
            || {
                log.borrow_mut().push("listener");
                sim_listener(&world)
            }
        ).unwrap();

        assert_eq!(*log.borrow(), vec!["perception", "robot", "listener"]);
        assert_eq!(assembly.guard.ctrl().state(), RobotState::Idle);

        // The guard releases perception when the assembly goes away
        drop(assembly);
        assert_eq!(log.borrow().last(), Some(&"perception released"));
    }

    #[test]
    fn test_invalid_params_build_nothing() {
        let world = world();
        let log: Log = Rc::default();
        let mut params = HoldCtrlParams::default();
        params.wake_phrase = String::new();

        let result = assemble(
            params,
            world.clock().clone(),
            &InterruptFlag::new(),
            || {
                log.borrow_mut().push("perception");
                Ok(LoggedPerception(log.clone()))
            },
            || Ok((SimActuators::new(), SimSensors::new(world.clone()))),
            || sim_listener(&world)
        );

        assert!(matches!(result, Err(SetupError::InvalidParams(_))));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_sim_mode_builds() {
        let world = world();
        let params = HoldExecParams::default();
        let root = std::env::temp_dir().join(format!("hold_setup_{}", std::process::id()));

        let assembly: DynAssembly<Arc<ManualClock>> = assemble(
            params.hold_ctrl.clone(),
            world.clock().clone(),
            &InterruptFlag::new(),
            || build_perception(Mode::Sim, &params, &root, &world),
            || build_robot(Mode::Sim, &params, &world),
            || spawn_listener(Mode::Sim, &params, &world, &InterruptFlag::new(), root.join("history"))
        ).unwrap();

        assert_eq!(assembly.guard.ctrl().state(), RobotState::Idle);
    }

    #[cfg(not(all(target_arch = "arm", target_os = "linux")))]
    #[test]
    fn test_hw_mode_unavailable_off_target() {
        let world = world();
        assert!(matches!(
            build_robot(Mode::Hw, &HoldExecParams::default(), &world),
            Err(SetupError::HardwareUnavailable)
        ));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("SIM".parse::<Mode>().unwrap(), Mode::Sim);
        assert_eq!("console".parse::<Mode>().unwrap(), Mode::Console);
        assert!(matches!("robot".parse::<Mode>(), Err(SetupError::UnknownMode(ref m)) if m == "robot"));
    }
}

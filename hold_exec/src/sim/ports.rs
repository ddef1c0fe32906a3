//! Simulated port implementations

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::Utc;
use image::{Rgb, RgbImage};
use log::{debug, info, trace, warn};
use serde::Serialize;

use super::{Heard, SimParams, SimWorld};
use crate::{
    clock::Clock,
    ports::{
        ActuatorPort, CommandPort, Contact, Frame, GripperId, ListenError, MotionCommand,
        PerceptionPort, PortError, SensorPort, Side,
        clamp_grip_angle,
    },
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Simulated wheels and grippers.
///
/// Clones share the same state, so a clone kept outside the controller can inspect what was
/// commanded.
#[derive(Debug, Clone, Default)]
pub struct SimActuators {
    state: Arc<Mutex<SimActuatorState>>,
}

/// Commanded state of the simulated actuators.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimActuatorState {
    /// Last wheel speeds commanded
    pub wheels: Option<MotionCommand>,

    /// Last angle commanded for each gripper, in [`GripperId::ALL`] order
    pub grippers: [Option<u8>; 4],

    /// Total number of writes accepted
    pub num_writes: u64,

    /// True once the port has been released
    pub released: bool,
}

/// Simulated palm sensors, driven by scenario contact events.
pub struct SimSensors<C> {
    world: SimWorld<C>,
}

/// Simulated camera, producing synthetic frames.
pub struct SimPerception<C> {
    world: SimWorld<C>,
    params: SimParams,

    /// Where to save frames, if anywhere
    frame_dir: Option<PathBuf>,

    seq: u64,
    num_rendered: u64,
    released: bool,
}

/// Simulated microphone, hearing the scenario's phrase events.
pub struct SimCommand<C> {
    world: SimWorld<C>,
    params: SimParams,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimActuators {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the current commanded state.
    pub fn snapshot(&self) -> SimActuatorState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, SimActuatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SimActuatorState {
    pub fn gripper(&self, id: GripperId) -> Option<u8> {
        GripperId::ALL.iter()
            .position(|g| *g == id)
            .and_then(|i| self.grippers[i])
    }
}

impl ActuatorPort for SimActuators {
    fn set_wheel_speeds(&mut self, left: f64, right: f64) -> Result<(), PortError> {
        let mut state = self.lock();
        if state.released {
            return Err(PortError::Released)
        }

        let cmd = MotionCommand::new(left, right);
        if state.wheels != Some(cmd) {
            info!("Sim wheels: left {:.2}, right {:.2}", cmd.left, cmd.right);
        }
        state.wheels = Some(cmd);
        state.num_writes += 1;

        Ok(())
    }

    fn set_gripper_angle(&mut self, which: GripperId, angle_deg: u8) -> Result<(), PortError> {
        let mut state = self.lock();
        if state.released {
            return Err(PortError::Released)
        }

        let angle_deg = clamp_grip_angle(angle_deg);
        if let Some(i) = GripperId::ALL.iter().position(|g| *g == which) {
            state.grippers[i] = Some(angle_deg);
        }
        state.num_writes += 1;
        debug!("Sim gripper {:?} -> {} deg", which, angle_deg);

        Ok(())
    }

    fn release(&mut self) -> Result<(), PortError> {
        let mut state = self.lock();
        if state.released {
            return Err(PortError::Released)
        }
        state.released = true;
        info!("Sim actuators released after {} writes", state.num_writes);

        Ok(())
    }
}

impl<C: Clock> SimSensors<C> {
    pub fn new(world: SimWorld<C>) -> Self {
        Self { world }
    }
}

impl<C: Clock> SensorPort for SimSensors<C> {
    fn read_palm(&mut self, side: Side) -> Contact {
        let (now_s, state) = self.world.update();

        if state.is_contact(side, now_s) {
            Contact::Detected
        }
        else {
            Contact::Clear
        }
    }
}

impl<C: Clock> SimPerception<C> {
    /// Create the camera, saving every Nth frame into `frame_dir` if one is given.
    pub fn new(world: SimWorld<C>, params: SimParams, frame_dir: Option<PathBuf>) -> Self {
        Self {
            world,
            params,
            frame_dir,
            seq: 0,
            num_rendered: 0,
            released: false,
        }
    }

    pub fn num_rendered(&self) -> u64 {
        self.num_rendered
    }

    /// A gradient background with a bar sweeping across it, one pixel per frame.
    fn synthesise(&self) -> RgbImage {
        let (width, height) = self.params.frame_size;
        let bar_x = if width > 0 { (self.seq % width as u64) as u32 } else { 0 };

        RgbImage::from_fn(width, height, |x, y| {
            if x == bar_x {
                Rgb([255, 255, 255])
            }
            else {
                let r = (x * 255 / width.max(1)) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                Rgb([r, g, 64])
            }
        })
    }
}

impl<C: Clock> PerceptionPort for SimPerception<C> {
    fn next_frame(&mut self) -> Result<Option<Frame>, PortError> {
        if self.released {
            return Err(PortError::Released)
        }

        let dropout = {
            let (now_s, state) = self.world.update();
            state.is_dropout(now_s)
        };
        if dropout {
            return Err(PortError::Unavailable)
        }

        let frame = Frame {
            seq: self.seq,
            timestamp: Utc::now(),
            image: self.synthesise(),
        };
        self.seq += 1;

        Ok(Some(frame))
    }

    fn render(&mut self, frame: Frame) {
        self.num_rendered += 1;
        trace!("Rendering sim frame {}", frame.seq);

        let every = self.params.save_frame_every;
        if every == 0 || frame.seq % every != 0 {
            return
        }

        if let Some(ref dir) = self.frame_dir {
            let path = dir.join(format!("frame_{:06}.png", frame.seq));
            match frame.image.save(&path) {
                Ok(_) => debug!("Saved frame to {:?}", path),
                Err(e) => warn!("Could not save frame to {:?}: {}", path, e),
            }
        }
    }

    fn poll_cancel(&mut self) -> bool {
        // Applying due events is what raises a scripted cancel
        drop(self.world.update());
        self.world.cancel.is_set()
    }

    fn release(&mut self) -> Result<(), PortError> {
        if self.released {
            return Err(PortError::Released)
        }
        self.released = true;
        info!("Sim camera released after rendering {} frames", self.num_rendered);

        Ok(())
    }
}

impl<C: Clock> SimCommand<C> {
    pub fn new(world: SimWorld<C>, params: SimParams) -> Self {
        Self { world, params }
    }
}

impl<C: Clock> CommandPort for SimCommand<C> {
    /// Listen for one window, returning the first thing said during it.
    ///
    /// Once the scenario has played out and nothing is left to hear the source is closed.
    fn listen_once(&mut self) -> Result<Option<String>, ListenError> {
        let start_s = self.world.now_s();
        self.world.clock().sleep(util::time::secs_to_duration(self.params.listen_window_s));

        let heard = {
            let (now_s, mut state) = self.world.update();
            state.take_heard(start_s, now_s)
        };

        match heard {
            Some(Heard::Phrase(p)) => Ok(Some(p)),
            Some(Heard::Silence) => Ok(None),
            Some(Heard::Failure) => Err(ListenError::Unintelligible),
            // A pending cancel is left for the main loop to see
            None if self.world.scenario_finished()
                && !self.world.has_pending_speech()
                && !self.world.cancel.is_set() => Err(ListenError::Closed),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use util::script_interpreter::ScriptInterpreter;

    use super::*;
    use crate::{clock::ManualClock, ports::CancelLatch};

    fn world(script: &str) -> (SimWorld<ManualClock>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let world = SimWorld::with_scenario(
            clock.clone(),
            CancelLatch::new(),
            ScriptInterpreter::from_script(script).unwrap()
        );
        (world, clock)
    }

    #[test]
    fn test_world_clones_share_clock_and_events() {
        let (world, clock) = world(r#"0.5: {"Contact": {"side": "Left", "duration_s": 1.0}};"#);

        // ManualClock is not Clone, the world must still be
        let copy = world.clone();
        assert!(Arc::ptr_eq(world.clock(), copy.clock()));

        clock.advance(Duration::from_secs(1));
        assert!(!copy.scenario_finished());

        let mut sensors = SimSensors::new(copy);
        assert_eq!(sensors.read_palm(Side::Left), Contact::Detected);
        assert!(world.scenario_finished());
    }

    #[test]
    fn test_contact_window() {
        let (world, clock) = world(r#"1.0: {"Contact": {"side": "Right", "duration_s": 0.5}};"#);
        let mut sensors = SimSensors::new(world);

        assert_eq!(sensors.read_palm(Side::Right), Contact::Clear);

        clock.advance(Duration::from_millis(1100));
        assert_eq!(sensors.read_palm(Side::Right), Contact::Detected);
        assert_eq!(sensors.read_palm(Side::Left), Contact::Clear);

        clock.advance(Duration::from_millis(500));
        assert_eq!(sensors.read_palm(Side::Right), Contact::Clear);
    }

    #[test]
    fn test_listen_windows() {
        let (world, clock) = world(r#"
            0.5: {"Phrase": "Josh, come hold this."};
            1.5: "ListenFailure";
            2.5: "Silence";
        "#);
        let mut command = SimCommand::new(world, SimParams::default());

        assert_eq!(command.listen_once().unwrap().as_deref(), Some("Josh, come hold this."));
        assert!(matches!(command.listen_once(), Err(ListenError::Unintelligible)));
        assert!(matches!(command.listen_once(), Ok(None)));
        assert!((clock.now_s() - 3.0).abs() < 1e-9);

        // Scenario exhausted
        assert!(matches!(command.listen_once(), Err(ListenError::Closed)));
    }

    #[test]
    fn test_phrase_while_not_listening_is_missed() {
        let (world, clock) = world(r#"
            0.5: {"Phrase": "josh come hold this"};
            5.0: "Silence";
        "#);
        let mut command = SimCommand::new(world, SimParams::default());

        // Busy elsewhere while the phrase is said
        clock.advance(Duration::from_secs(2));
        assert!(matches!(command.listen_once(), Ok(None)));
    }

    #[test]
    fn test_scripted_cancel_and_dropout() {
        let (world, clock) = world(r#"
            1.0: {"CameraDropout": {"duration_s": 1.0}};
            3.0: "Cancel";
        "#);
        let mut perception = SimPerception::new(world, SimParams::default(), None);

        assert!(perception.next_frame().unwrap().is_some());
        assert!(!perception.poll_cancel());

        clock.advance(Duration::from_millis(1500));
        assert!(matches!(perception.next_frame(), Err(PortError::Unavailable)));
        assert!(!perception.service());

        clock.advance(Duration::from_secs(1));
        assert!(perception.service());
        assert!(!perception.poll_cancel());

        clock.advance(Duration::from_secs(1));
        assert!(perception.poll_cancel());

        perception.release().unwrap();
        assert!(matches!(perception.next_frame(), Err(PortError::Released)));
    }

    #[test]
    fn test_actuators_shared_state() {
        let actuators = SimActuators::new();
        let mut port = actuators.clone();

        port.set_wheel_speeds(0.5, 2.0).unwrap();
        port.set_gripper_angle(GripperId::RightMitten, 200).unwrap();

        let state = actuators.snapshot();
        assert_eq!(state.wheels, Some(MotionCommand { left: 0.5, right: 1.0 }));
        assert_eq!(state.gripper(GripperId::RightMitten), Some(180));
        assert_eq!(state.gripper(GripperId::LeftThumb), None);

        port.release().unwrap();
        assert!(matches!(port.set_wheel_speeds(0.0, 0.0), Err(PortError::Released)));
        assert!(matches!(port.release(), Err(PortError::Released)));
    }

    #[test]
    fn test_frames_saved() {
        let dir = std::env::temp_dir().join(format!("hold_sim_frames_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let clock = Arc::new(ManualClock::new());
        let world = SimWorld::new(clock, CancelLatch::new());
        let params = SimParams {
            frame_size: (8, 6),
            save_frame_every: 2,
            ..SimParams::default()
        };
        let mut perception = SimPerception::new(world, params, Some(dir.clone()));

        for _ in 0..3 {
            assert!(perception.service());
        }

        assert_eq!(perception.num_rendered(), 3);
        assert!(dir.join("frame_000000.png").exists());
        assert!(!dir.join("frame_000001.png").exists());
        assert!(dir.join("frame_000002.png").exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}

//! Implementations for the HoldCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, trace, warn};
use std::time::Duration;
use serde::Serialize;

// Internal
use super::{
    normalise_phrase, matches_wake_phrase,
    ApproachSession, HoldCtrlError, HoldCtrlParams, HoldOutcome, RobotState};
use crate::{
    clock::Clock,
    ports::{
        ActuatorPort, GripTarget, ListenError, MotionCommand, PerceptionPort, PortError,
        SensorPort, Side},
    shutdown::InterruptFlag};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Hold control state machine.
///
/// Owns the actuator and sensor ports: nothing else writes to the actuators while the controller
/// exists, and sensors are only ever sampled inside the approach loop.
pub struct HoldCtrl<A, S, C> {
    params: HoldCtrlParams,

    /// Normalised copy of the wake phrase
    wake_phrase: String,

    actuators: A,
    sensors: S,
    clock: C,
    interrupt: InterruptFlag,

    state: RobotState,
    approach: Option<ApproachSession>,
    report: StatusReport,
}

/// Status report for HoldCtrl processing.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StatusReport {
    /// Number of times the wake phrase started an approach
    pub num_approaches: u64,

    /// Number of objects gripped and held
    pub num_holds: u64,

    /// Number of approaches abandoned at the timeout
    pub num_timeouts: u64,

    /// Number of approaches cancelled by the user
    pub num_cancels: u64,

    /// Number of listens which failed
    pub num_listen_failures: u64,

    /// Number of phrases heard which didn't contain the wake phrase
    pub num_phrases_ignored: u64,

    /// Number of failed actuator writes
    pub num_actuator_faults: u64,

    /// Time from the start of the last successful approach to contact
    ///
    /// Units: seconds
    pub last_contact_elapsed_s: Option<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<A, S, C> HoldCtrl<A, S, C>
where
    A: ActuatorPort,
    S: SensorPort,
    C: Clock
{
    /// Create a new controller in the `Idle` state.
    pub fn new(
        params: HoldCtrlParams,
        actuators: A,
        sensors: S,
        clock: C,
        interrupt: InterruptFlag
    ) -> Result<Self, HoldCtrlError> {
        params.are_valid()?;

        let wake_phrase = normalise_phrase(&params.wake_phrase).trim().to_string();

        Ok(Self {
            params,
            wake_phrase,
            actuators,
            sensors,
            clock,
            interrupt,
            state: RobotState::Idle,
            approach: None,
            report: StatusReport::default(),
        })
    }

    pub fn state(&self) -> RobotState {
        self.state
    }

    pub fn report(&self) -> &StatusReport {
        &self.report
    }

    pub fn actuators(&self) -> &A {
        &self.actuators
    }

    /// The approach in progress, only `Some` while `Approaching`.
    pub fn approach_session(&self) -> Option<&ApproachSession> {
        self.approach.as_ref()
    }

    /// Move from `Idle` into `Listening` ahead of a command poll.
    pub fn start_listening(&mut self) {
        if self.state == RobotState::Idle {
            self.set_state(RobotState::Listening);
        }
    }

    /// Process the result of one listen.
    ///
    /// If the wake phrase was heard this runs the whole approach, grip and hold sequence before
    /// returning, servicing the perception port as it goes.
    pub fn handle_listen_result<P>(
        &mut self,
        result: Result<Option<String>, ListenError>,
        perception: &mut P
    ) -> HoldOutcome
    where
        P: PerceptionPort
    {
        if self.state == RobotState::ShuttingDown {
            return HoldOutcome::Interrupted
        }

        // No actuator may be started once an interrupt has been seen
        if self.interrupt.is_set() {
            info!("Interrupted, listen result discarded");
            self.enter_shutdown();
            return HoldOutcome::Interrupted
        }

        self.start_listening();

        let phrase = match result {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!("Nothing heard");
                self.set_state(RobotState::Idle);
                return HoldOutcome::NoCommand
            },
            Err(e) => {
                warn!("Listen failed: {}", e);
                self.report.num_listen_failures += 1;
                self.set_state(RobotState::Idle);
                return HoldOutcome::NoCommand
            }
        };

        info!("Heard \"{}\"", phrase);

        if !matches_wake_phrase(&phrase, &self.wake_phrase) {
            debug!("Phrase does not contain the wake phrase, ignored");
            self.report.num_phrases_ignored += 1;
            self.set_state(RobotState::Idle);
            return HoldOutcome::NoCommand
        }

        self.approach(perception)
    }

    /// Mark the controller as shutting down. No actuator is written.
    pub fn enter_shutdown(&mut self) {
        if self.state != RobotState::ShuttingDown {
            self.approach = None;
            self.set_state(RobotState::ShuttingDown);
        }
    }

    /// Command all grippers to the open angle.
    pub fn open_grippers(&mut self) -> Result<(), PortError> {
        let target = GripTarget::new(self.params.grip_open_deg);
        let result = self.actuators.grip_all(target);
        self.note_fault(&result);
        result
    }

    /// Stop both wheels.
    pub fn stop_motors(&mut self) -> Result<(), PortError> {
        let result = self.actuators.drive(MotionCommand::stop());
        if let Err(ref e) = result {
            warn!("Could not stop the motors: {}", e);
        }
        self.note_fault(&result);
        result
    }

    /// Release the actuator driver resources.
    pub fn release_actuators(&mut self) -> Result<(), PortError> {
        self.actuators.release()
    }

    // ---- STATE SEQUENCES ----

    /// Drive forward until a palm sensor detects an object, the timeout expires, the user cancels
    /// or the process is interrupted.
    fn approach<P: PerceptionPort>(&mut self, perception: &mut P) -> HoldOutcome {
        let session = ApproachSession::start(
            self.clock.now_s(),
            self.params.approach_timeout_s
        );
        self.approach = Some(session);
        self.report.num_approaches += 1;
        self.set_state(RobotState::Approaching);

        let cmd = MotionCommand::forward(self.params.move_speed);
        if let Err(e) = self.actuators.drive(cmd) {
            warn!("Could not start the motors: {}", e);
            self.report.num_actuator_faults += 1;
        }

        let interval = self.params.sample_interval();

        loop {
            if self.interrupt.is_set() {
                info!("Interrupted during approach");
                self.stop_motors().ok();
                self.enter_shutdown();
                return HoldOutcome::Interrupted
            }

            // Read, then act on this iteration's samples only
            let left = self.sensors.read_palm(Side::Left);
            let right = self.sensors.read_palm(Side::Right);
            let now_s = self.clock.now_s();

            trace!(
                "Palm sensors at {:.3} s: left {:?}, right {:?}",
                session.elapsed_s(now_s), left, right
            );

            if left.is_detected() || right.is_detected() {
                info!(
                    "Contact detected after {:.2} s (left: {:?}, right: {:?})",
                    session.elapsed_s(now_s), left, right
                );
                self.report.last_contact_elapsed_s = Some(session.elapsed_s(now_s));
                self.grip();
                return self.hold(perception)
            }

            if session.is_expired(now_s) {
                info!(
                    "No contact within {:.1} s, abandoning approach",
                    self.params.approach_timeout_s
                );
                self.stop_motors().ok();
                self.report.num_timeouts += 1;
                self.approach = None;
                self.set_state(RobotState::Idle);
                return HoldOutcome::TimedOut
            }

            perception.service();

            if perception.poll_cancel() {
                info!("Approach cancelled by the user");
                self.stop_motors().ok();
                self.report.num_cancels += 1;
                self.approach = None;
                self.set_state(RobotState::Idle);
                return HoldOutcome::Cancelled
            }

            self.clock.sleep(interval);
        }
    }

    /// Stop and close all grippers.
    fn grip(&mut self) {
        self.approach = None;

        // The stop always precedes the first gripper write
        self.stop_motors().ok();
        self.set_state(RobotState::Gripping);

        let target = GripTarget::new(self.params.grip_close_deg);
        let result = self.actuators.grip_all(target);
        self.note_fault(&result);
    }

    /// Hold the object for the hold duration, keeping the camera feed alive.
    ///
    /// The grippers are left closed afterwards.
    fn hold<P: PerceptionPort>(&mut self, perception: &mut P) -> HoldOutcome {
        self.set_state(RobotState::Holding);

        let start_s = self.clock.now_s();
        let interval = self.params.sample_interval();

        loop {
            if self.interrupt.is_set() {
                info!("Interrupted while holding");
                self.enter_shutdown();
                return HoldOutcome::Interrupted
            }

            let remaining = util::time::secs_to_duration(
                self.params.hold_duration_s - (self.clock.now_s() - start_s)
            );
            if remaining == Duration::from_secs(0) {
                break
            }

            perception.service();

            self.clock.sleep(interval.min(remaining));
        }

        self.report.num_holds += 1;
        self.set_state(RobotState::Idle);

        HoldOutcome::Held
    }

    // ---- HELPERS ----

    fn set_state(&mut self, state: RobotState) {
        if state != self.state {
            info!("HoldCtrl: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn note_fault(&mut self, result: &Result<(), PortError>) {
        if result.is_err() {
            self.report.num_actuator_faults += 1;
        }
    }
}

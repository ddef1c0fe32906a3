//! # Main loop
//!
//! Each cycle services one camera frame, checks for a user cancel, then listens once and hands the
//! result to the [`HoldCtrl`](crate::hold_ctrl::HoldCtrl). The loop has no fixed rate, the listen
//! dominates the cycle time.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use serde::Serialize;

use crate::{
    clock::Clock,
    hold_ctrl::HoldOutcome,
    listener::{ListenWait, ListenWorker},
    ports::{ActuatorPort, ListenError, PerceptionPort, SensorPort},
    shutdown::{InterruptFlag, ShutdownGuard},
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Why the main loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    /// The user asked for the run to end
    UserCancel,

    /// A process interrupt (SIGINT/SIGTERM) was received
    Interrupted,

    /// The command source has closed and no more commands can arrive
    CommandSourceClosed,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Drives the run until it ends.
#[derive(Debug, Default)]
pub struct MainLoop {
    num_cycles: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ExitReason {
    /// True if this is an ordinary, user-requested end of the run.
    pub fn is_clean(&self) -> bool {
        !matches!(self, ExitReason::Interrupted)
    }
}

impl MainLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_cycles(&self) -> u64 {
        self.num_cycles
    }

    /// Run cycles until the user cancels, the process is interrupted or the command source closes.
    ///
    /// The guard is not released here, that is left to the caller (or the guard's drop).
    pub fn run<A, S, C, P>(
        &mut self,
        guard: &mut ShutdownGuard<A, S, C, P>,
        listener: &mut ListenWorker,
        interrupt: &InterruptFlag
    ) -> ExitReason
    where
        A: ActuatorPort,
        S: SensorPort,
        C: Clock,
        P: PerceptionPort
    {
        info!("Main loop started");

        let reason = loop {
            if let Some(reason) = self.cycle(guard, listener, interrupt) {
                break reason
            }
        };

        info!("Main loop exited after {} cycles: {:?}", self.num_cycles, reason);
        reason
    }

    /// Run a single cycle, returning the exit reason if the run should end.
    pub fn cycle<A, S, C, P>(
        &mut self,
        guard: &mut ShutdownGuard<A, S, C, P>,
        listener: &mut ListenWorker,
        interrupt: &InterruptFlag
    ) -> Option<ExitReason>
    where
        A: ActuatorPort,
        S: SensorPort,
        C: Clock,
        P: PerceptionPort
    {
        self.num_cycles += 1;
        debug!("Main loop cycle {}", self.num_cycles);

        let (ctrl, perception) = guard.parts();

        if interrupt.is_set() {
            ctrl.enter_shutdown();
            return Some(ExitReason::Interrupted)
        }

        perception.service();

        if perception.poll_cancel() {
            info!("Cancel requested");
            return Some(ExitReason::UserCancel)
        }

        ctrl.start_listening();

        let result = match listener.listen(interrupt) {
            ListenWait::Heard(Err(ListenError::Closed)) | ListenWait::Closed => {
                info!("Command source closed");
                return Some(ExitReason::CommandSourceClosed)
            }
            ListenWait::Heard(r) => r,
            ListenWait::TimedOut => Ok(None),
            ListenWait::Interrupted => {
                ctrl.enter_shutdown();
                return Some(ExitReason::Interrupted)
            }
        };

        match ctrl.handle_listen_result(result, perception) {
            HoldOutcome::Interrupted => Some(ExitReason::Interrupted),
            HoldOutcome::Cancelled => Some(ExitReason::UserCancel),
            HoldOutcome::NoCommand | HoldOutcome::Held | HoldOutcome::TimedOut => None,
        }
    }
}

#[cfg(test)]
mod test {
    use std::{collections::VecDeque, sync::Arc};

    use super::*;
    use crate::{
        clock::ManualClock,
        hold_ctrl::{HoldCtrl, HoldCtrlParams, RobotState},
        listener::ListenParams,
        ports::{CommandPort, Contact, Frame, GripperId, PortError, Side},
    };

    #[derive(Default)]
    struct Actuators {
        wheels: Vec<(f64, f64)>,
        grips: usize,
    }

    impl ActuatorPort for Actuators {
        fn set_wheel_speeds(&mut self, left: f64, right: f64) -> Result<(), PortError> {
            self.wheels.push((left, right));
            Ok(())
        }

        fn set_gripper_angle(&mut self, _which: GripperId, _angle_deg: u8) -> Result<(), PortError> {
            self.grips += 1;
            Ok(())
        }
    }

    struct Sensors(Contact);

    impl SensorPort for Sensors {
        fn read_palm(&mut self, _side: Side) -> Contact {
            self.0
        }
    }

    #[derive(Default)]
    struct Perception {
        fetches: usize,
        cancel_at_fetch: Option<usize>,
    }

    impl PerceptionPort for Perception {
        fn next_frame(&mut self) -> Result<Option<Frame>, PortError> {
            self.fetches += 1;
            if self.fetches % 2 == 0 {
                Err(PortError::Unavailable)
            }
            else {
                Ok(None)
            }
        }

        fn render(&mut self, _frame: Frame) {}

        fn poll_cancel(&mut self) -> bool {
            self.cancel_at_fetch.map(|n| self.fetches >= n).unwrap_or(false)
        }
    }

    struct Phrases(VecDeque<Result<Option<String>, ListenError>>);

    impl CommandPort for Phrases {
        fn listen_once(&mut self) -> Result<Option<String>, ListenError> {
            self.0.pop_front().unwrap_or(Err(ListenError::Closed))
        }
    }

    type Guard = ShutdownGuard<Actuators, Sensors, Arc<ManualClock>, Perception>;

    fn setup(
        contact: Contact,
        perception: Perception,
        phrases: Vec<Result<Option<String>, ListenError>>
    ) -> (Guard, ListenWorker, InterruptFlag) {
        let interrupt = InterruptFlag::new();
        let ctrl = HoldCtrl::new(
            HoldCtrlParams::default(),
            Actuators::default(),
            Sensors(contact),
            Arc::new(ManualClock::new()),
            interrupt.clone()
        ).unwrap();

        let listener = ListenWorker::from_port(
            Phrases(phrases.into()),
            ListenParams::default()
        ).unwrap();

        (ShutdownGuard::acquire(ctrl, perception), listener, interrupt)
    }

    #[test]
    fn test_runs_until_source_closed() {
        let (mut guard, mut listener, interrupt) = setup(
            Contact::Detected,
            Perception::default(),
            vec![
                Ok(Some("what time is it".into())),
                Err(ListenError::Engine("no network".into())),
                Ok(None),
                Ok(Some("Josh, come hold this.".into())),
            ]
        );
        let mut main_loop = MainLoop::new();

        let reason = main_loop.run(&mut guard, &mut listener, &interrupt);

        assert_eq!(reason, ExitReason::CommandSourceClosed);
        assert!(reason.is_clean());
        assert_eq!(main_loop.num_cycles(), 5);
        assert_eq!(guard.ctrl().report().num_holds, 1);
        assert_eq!(guard.ctrl().report().num_phrases_ignored, 1);
        assert_eq!(guard.ctrl().report().num_listen_failures, 1);

        // Frame failures never end the run
        assert!(guard.perception().fetches >= 5);
    }

    #[test]
    fn test_cancel_ends_run_before_listen() {
        let (mut guard, mut listener, interrupt) = setup(
            Contact::Clear,
            Perception { fetches: 0, cancel_at_fetch: Some(2) },
            vec![Ok(Some("josh come hold this".into()))]
        );
        let mut main_loop = MainLoop::new();

        // First cycle starts an approach which the cancel ends
        let reason = main_loop.run(&mut guard, &mut listener, &interrupt);

        assert_eq!(reason, ExitReason::UserCancel);
        assert_eq!(main_loop.num_cycles(), 1);
        assert_eq!(guard.ctrl().report().num_cancels, 1);
        assert_eq!(guard.ctrl().actuators().wheels.last(), Some(&(0.0, 0.0)));
        assert_eq!(guard.ctrl().actuators().grips, 0);
    }

    #[test]
    fn test_cancel_checked_each_cycle() {
        let (mut guard, mut listener, interrupt) = setup(
            Contact::Clear,
            Perception { fetches: 0, cancel_at_fetch: Some(1) },
            vec![Ok(Some("josh come hold this".into()))]
        );

        let reason = MainLoop::new().run(&mut guard, &mut listener, &interrupt);

        assert_eq!(reason, ExitReason::UserCancel);
        assert_eq!(guard.ctrl().report().num_approaches, 0);
        assert!(guard.ctrl().actuators().wheels.is_empty());
    }

    #[test]
    fn test_interrupt_ends_run() {
        let (mut guard, mut listener, interrupt) = setup(
            Contact::Clear,
            Perception::default(),
            vec![Ok(None), Ok(None)]
        );
        interrupt.set();

        let reason = MainLoop::new().run(&mut guard, &mut listener, &interrupt);
        assert_eq!(reason, ExitReason::Interrupted);
        assert!(!reason.is_clean());
        assert_eq!(guard.ctrl().state(), RobotState::ShuttingDown);

        let report = guard.release();
        assert!(report.failures.is_empty());
        assert_eq!(guard.ctrl().actuators().wheels.last(), Some(&(0.0, 0.0)));
        assert_eq!(guard.ctrl().actuators().grips, 4);
    }
}

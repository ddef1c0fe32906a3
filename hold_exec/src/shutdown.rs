//! # Shutdown handling
//!
//! [`ShutdownGuard`] owns everything that must be made safe when a run ends and performs the
//! release sequence exactly once, whether the run ends normally, through an error, a panic, or a
//! process interrupt observed via [`InterruptFlag`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use log::{error, info, warn};
use serde::Serialize;
use tokio::signal::unix::{signal, SignalKind};

use crate::{
    clock::Clock,
    hold_ctrl::HoldCtrl,
    ports::{ActuatorPort, PerceptionPort, SensorPort},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Latched process-level interrupt request.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

/// Scoped ownership of a running robot.
///
/// Dropping the guard (or calling [`ShutdownGuard::release`]) performs, in order and each on a
/// best-effort basis:
///
/// 1. Command all grippers to the open angle
/// 2. Stop both motors
/// 3. Release the perception port
/// 4. Release the actuator port
pub struct ShutdownGuard<A, S, C, P>
where
    A: ActuatorPort,
    S: SensorPort,
    C: Clock,
    P: PerceptionPort
{
    ctrl: HoldCtrl<A, S, C>,
    perception: P,
    report: Option<ReleaseReport>,
}

/// What happened during the release sequence.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReleaseReport {
    pub grippers_opened: bool,
    pub motors_stopped: bool,
    pub perception_released: bool,
    pub actuators_released: bool,

    /// Descriptions of any failed steps
    pub failures: Vec<String>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl InterruptFlag {
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

impl<A, S, C, P> ShutdownGuard<A, S, C, P>
where
    A: ActuatorPort,
    S: SensorPort,
    C: Clock,
    P: PerceptionPort
{
    /// Take ownership of the controller and perception port for the duration of a run.
    pub fn acquire(ctrl: HoldCtrl<A, S, C>, perception: P) -> Self {
        info!("Run session acquired");

        Self {
            ctrl,
            perception,
            report: None,
        }
    }

    pub fn ctrl(&self) -> &HoldCtrl<A, S, C> {
        &self.ctrl
    }

    pub fn perception(&self) -> &P {
        &self.perception
    }

    /// Mutable access to the controller and perception port together.
    pub fn parts(&mut self) -> (&mut HoldCtrl<A, S, C>, &mut P) {
        (&mut self.ctrl, &mut self.perception)
    }

    pub fn is_released(&self) -> bool {
        self.report.is_some()
    }

    /// Make the robot safe and release all resources.
    ///
    /// Only the first call does anything, later calls return the original report.
    pub fn release(&mut self) -> ReleaseReport {
        if let Some(ref r) = self.report {
            return r.clone()
        }

        info!("Releasing run session");
        self.ctrl.enter_shutdown();

        let mut report = ReleaseReport::default();

        match self.ctrl.open_grippers() {
            Ok(_) => report.grippers_opened = true,
            Err(e) => report.failures.push(format!("Open grippers: {}", e))
        }

        match self.ctrl.stop_motors() {
            Ok(_) => report.motors_stopped = true,
            Err(e) => report.failures.push(format!("Stop motors: {}", e))
        }

        match self.perception.release() {
            Ok(_) => report.perception_released = true,
            Err(e) => report.failures.push(format!("Release perception: {}", e))
        }

        match self.ctrl.release_actuators() {
            Ok(_) => report.actuators_released = true,
            Err(e) => report.failures.push(format!("Release actuators: {}", e))
        }

        if report.failures.is_empty() {
            info!("Run session released, robot is safe");
        }
        else {
            for f in report.failures.iter() {
                error!("Release step failed: {}", f);
            }
        }

        self.report = Some(report.clone());
        report
    }
}

impl<A, S, C, P> Drop for ShutdownGuard<A, S, C, P>
where
    A: ActuatorPort,
    S: SensorPort,
    C: Clock,
    P: PerceptionPort
{
    fn drop(&mut self) {
        if !self.is_released() {
            if thread::panicking() {
                warn!("Releasing run session while panicking");
            }
            self.release();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Spawn a thread which sets the flag on SIGINT or SIGTERM.
pub fn spawn_interrupt_watcher(flag: InterruptFlag) -> std::io::Result<JoinHandle<()>> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("interrupt_watcher".into())
        .spawn(move || rt.block_on(async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!("Could not register the SIGTERM handler: {}", e);
                    return
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!("Could not register the SIGINT handler: {}", e);
                    return
                }
            };

            loop {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }

                if flag.is_set() {
                    warn!("Already shutting down");
                }
                flag.set();
            }
        }))
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc, sync::Arc};

    use super::*;
    use crate::{
        clock::ManualClock,
        hold_ctrl::{HoldCtrlParams, HoldOutcome, RobotState},
        ports::{Contact, Frame, GripperId, PortError, Side},
    };

    #[derive(Debug, Default)]
    struct Record {
        wheels: (f64, f64),
        grippers: [u8; 4],
        actuator_releases: usize,
        perception_releases: usize,
        order: Vec<&'static str>,
    }

    struct Actuators {
        rec: Rc<RefCell<Record>>,
        fail_grippers: bool,
    }

    impl ActuatorPort for Actuators {
        fn set_wheel_speeds(&mut self, left: f64, right: f64) -> Result<(), PortError> {
            let mut rec = self.rec.borrow_mut();
            rec.wheels = (left, right);
            rec.order.push("wheels");
            Ok(())
        }

        fn set_gripper_angle(&mut self, which: GripperId, angle_deg: u8) -> Result<(), PortError> {
            if self.fail_grippers {
                return Err(PortError::Hardware("servo board not responding".into()))
            }
            let idx = GripperId::ALL.iter().position(|g| *g == which).unwrap();
            let mut rec = self.rec.borrow_mut();
            rec.grippers[idx] = angle_deg;
            rec.order.push("gripper");
            Ok(())
        }

        fn release(&mut self) -> Result<(), PortError> {
            let mut rec = self.rec.borrow_mut();
            rec.actuator_releases += 1;
            rec.order.push("release_actuators");
            Ok(())
        }
    }

    struct Sensors(Contact);

    impl SensorPort for Sensors {
        fn read_palm(&mut self, _side: Side) -> Contact {
            self.0
        }
    }

    struct Perception {
        rec: Rc<RefCell<Record>>,
    }

    impl PerceptionPort for Perception {
        fn next_frame(&mut self) -> Result<Option<Frame>, PortError> {
            Ok(None)
        }

        fn render(&mut self, _frame: Frame) {}

        fn poll_cancel(&mut self) -> bool {
            false
        }

        fn release(&mut self) -> Result<(), PortError> {
            let mut rec = self.rec.borrow_mut();
            rec.perception_releases += 1;
            rec.order.push("release_perception");
            Ok(())
        }
    }

    type Guard = ShutdownGuard<Actuators, Sensors, Arc<ManualClock>, Perception>;

    fn make_guard(contact: Contact, fail_grippers: bool) -> (Guard, Rc<RefCell<Record>>, InterruptFlag) {
        let rec = Rc::new(RefCell::new(Record::default()));
        let interrupt = InterruptFlag::new();
        let ctrl = HoldCtrl::new(
            HoldCtrlParams::default(),
            Actuators { rec: rec.clone(), fail_grippers },
            Sensors(contact),
            Arc::new(ManualClock::new()),
            interrupt.clone()
        ).unwrap();

        (ShutdownGuard::acquire(ctrl, Perception { rec: rec.clone() }), rec, interrupt)
    }

    #[test]
    fn test_release_once_on_drop() {
        let (guard, rec, _) = make_guard(Contact::Clear, false);
        drop(guard);

        let rec = rec.borrow();
        assert_eq!(rec.wheels, (0.0, 0.0));
        assert_eq!(rec.grippers, [30; 4]);
        assert_eq!(rec.actuator_releases, 1);
        assert_eq!(rec.perception_releases, 1);

        // Grippers, then motors, then perception, then actuators
        let first_wheels = rec.order.iter().position(|o| *o == "wheels").unwrap();
        let last_gripper = rec.order.iter().rposition(|o| *o == "gripper").unwrap();
        assert!(last_gripper < first_wheels);
        assert_eq!(
            &rec.order[rec.order.len() - 2..],
            &["release_perception", "release_actuators"]
        );
    }

    #[test]
    fn test_release_idempotent() {
        let (mut guard, rec, _) = make_guard(Contact::Clear, false);

        let first = guard.release();
        let second = guard.release();
        assert_eq!(first, second);
        assert!(guard.is_released());
        assert_eq!(guard.ctrl().state(), RobotState::ShuttingDown);

        drop(guard);
        assert_eq!(rec.borrow().actuator_releases, 1);
        assert_eq!(rec.borrow().perception_releases, 1);
    }

    #[test]
    fn test_release_continues_after_failure() {
        let (mut guard, rec, _) = make_guard(Contact::Clear, true);

        let report = guard.release();
        assert!(!report.grippers_opened);
        assert!(report.motors_stopped);
        assert!(report.perception_released);
        assert!(report.actuators_released);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(rec.borrow().wheels, (0.0, 0.0));
    }

    #[test]
    fn test_interrupt_while_holding() {
        let (mut guard, rec, interrupt) = make_guard(Contact::Detected, false);

        // Raise the interrupt as soon as the grippers have closed, which happens on entry to
        // Holding.
        let (ctrl, perception) = guard.parts();
        struct InterruptingPerception<'a> {
            inner: &'a mut Perception,
            rec: Rc<RefCell<Record>>,
            interrupt: InterruptFlag,
        }
        impl<'a> PerceptionPort for InterruptingPerception<'a> {
            fn next_frame(&mut self) -> Result<Option<Frame>, PortError> {
                if self.rec.borrow().grippers == [150; 4] {
                    self.interrupt.set();
                }
                self.inner.next_frame()
            }
            fn render(&mut self, frame: Frame) {
                self.inner.render(frame)
            }
            fn poll_cancel(&mut self) -> bool {
                false
            }
        }

        let mut p = InterruptingPerception {
            inner: perception,
            rec: rec.clone(),
            interrupt: interrupt.clone()
        };
        let outcome = ctrl.handle_listen_result(Ok(Some("Josh, come hold this.".into())), &mut p);

        assert_eq!(outcome, HoldOutcome::Interrupted);
        assert_eq!(guard.ctrl().state(), RobotState::ShuttingDown);
        assert_eq!(rec.borrow().grippers, [150; 4]);

        drop(guard);

        let rec = rec.borrow();
        assert_eq!(rec.grippers, [30; 4]);
        assert_eq!(rec.wheels, (0.0, 0.0));
        assert_eq!(rec.actuator_releases, 1);
        assert_eq!(rec.perception_releases, 1);
    }

    #[test]
    fn test_interrupt_flag_shared() {
        let flag = InterruptFlag::new();
        let other = flag.clone();
        assert!(!other.is_set());
        flag.set();
        assert!(other.is_set());
    }
}

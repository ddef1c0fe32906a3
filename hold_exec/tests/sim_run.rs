//! Whole runs of the controller against the simulation, on a simulated clock

use std::sync::Arc;

use hold_lib::{
    clock::{Clock, ManualClock},
    hold_ctrl::{HoldCtrl, HoldCtrlParams, RobotState},
    listener::{ListenParams, ListenWorker},
    main_loop::{ExitReason, MainLoop},
    ports::{CancelLatch, GripperId},
    shutdown::{InterruptFlag, ShutdownGuard},
    sim::{SimActuators, SimCommand, SimEvent, SimParams, SimPerception, SimSensors, SimWorld},
};
use util::script_interpreter::ScriptInterpreter;

struct Run {
    exit_reason: ExitReason,
    actuators: SimActuators,
    guard: ShutdownGuard<SimActuators, SimSensors<ManualClock>, Arc<ManualClock>, SimPerception<ManualClock>>,
    clock: Arc<ManualClock>,
}

fn run_scenario(script: &str) -> Run {
    let clock = Arc::new(ManualClock::new());
    let cancel = CancelLatch::new();
    let interrupt = InterruptFlag::new();
    let scenario: ScriptInterpreter<SimEvent> = ScriptInterpreter::from_script(script).unwrap();
    let world = SimWorld::with_scenario(clock.clone(), cancel, scenario);

    let actuators = SimActuators::new();
    let ctrl = HoldCtrl::new(
        HoldCtrlParams::default(),
        actuators.clone(),
        SimSensors::new(world.clone()),
        clock.clone(),
        interrupt.clone()
    ).unwrap();

    let perception = SimPerception::new(world.clone(), SimParams::default(), None);
    let mut guard = ShutdownGuard::acquire(ctrl, perception);

    let mut listener = ListenWorker::from_port(
        SimCommand::new(world, SimParams::default()),
        ListenParams::default()
    ).unwrap();

    let exit_reason = MainLoop::new().run(&mut guard, &mut listener, &interrupt);

    Run {
        exit_reason,
        actuators,
        guard,
        clock,
    }
}

#[test]
fn test_hold_then_cancel() {
    let mut run = run_scenario(r#"
        0.5: {"Phrase": "Josh, come hold this."};
        2.2: {"Contact": {"side": "Left", "duration_s": 0.5}};
        6.0: "Cancel";
    "#);

    assert_eq!(run.exit_reason, ExitReason::UserCancel);

    // Before release the object is still held and the robot is stopped
    let state = run.actuators.snapshot();
    assert_eq!(state.wheels.map(|w| w.is_stopped()), Some(true));
    for id in GripperId::ALL.iter() {
        assert_eq!(state.gripper(*id), Some(150));
    }

    let report = run.guard.ctrl().report().clone();
    assert_eq!(report.num_approaches, 1);
    assert_eq!(report.num_holds, 1);

    // Listening for 1 s from 0 s, the approach starts at 1 s and contact is made at 2.2 s
    let contact_s = report.last_contact_elapsed_s.unwrap();
    assert!(contact_s >= 1.2 - 1e-9 && contact_s <= 1.3 + 1e-9);
    assert!(run.clock.now_s() >= 6.0);

    let release = run.guard.release();
    assert!(release.failures.is_empty());
    assert_eq!(run.guard.ctrl().state(), RobotState::ShuttingDown);

    let state = run.actuators.snapshot();
    assert!(state.released);
    for id in GripperId::ALL.iter() {
        assert_eq!(state.gripper(*id), Some(30));
    }
}

#[test]
fn test_timeout_then_commands_run_out() {
    let run = run_scenario(r#"
        0.5: {"Phrase": "josh come hold this"};
        7.5: {"Phrase": "what time is it"};
        8.5: "ListenFailure";
    "#);

    assert_eq!(run.exit_reason, ExitReason::CommandSourceClosed);

    let report = run.guard.ctrl().report().clone();
    assert_eq!(report.num_approaches, 1);
    assert_eq!(report.num_timeouts, 1);
    assert_eq!(report.num_holds, 0);
    assert_eq!(report.num_phrases_ignored, 1);
    assert_eq!(report.num_listen_failures, 1);

    // Stopped, and the grippers never touched
    let state = run.actuators.snapshot();
    assert_eq!(state.wheels.map(|w| w.is_stopped()), Some(true));
    assert!(state.grippers.iter().all(|g| g.is_none()));

    drop(run.guard);
    let state = run.actuators.snapshot();
    assert!(state.released);
    assert!(state.grippers.iter().all(|g| *g == Some(30)));
}

#[test]
fn test_shipped_scenario_runs() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../params/scenarios/hold_once.txt");
    let script = std::fs::read_to_string(path).unwrap();

    let run = run_scenario(&script);

    assert!(run.exit_reason.is_clean());
    assert_eq!(run.guard.ctrl().report().num_holds, 1);
}

//! # Hold executable
//!
//! Runs the hold controller against simulated, console or hardware ports.
//!
//! # Architecture
//!
//! - Initialise the session, logging and parameters
//! - Start the interrupt watcher
//! - Build the ports for the selected mode, the perception port first as its failure is fatal
//! - Main loop, until the user cancels, the process is interrupted or commands run out:
//!     - Service one camera frame
//!     - Check for a user cancel
//!     - Listen once and hand the result to the controller
//! - Release the robot and save a run summary into the session directory

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::{eyre, WrapErr}, Result};
use log::{error, info, warn};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use structopt::StructOpt;

// Internal
use hold_lib::{
    clock::{Clock, ManualClock, SystemClock},
    hold_ctrl::StatusReport,
    main_loop::{ExitReason, MainLoop},
    params::HoldExecParams,
    ports::CancelLatch,
    setup::{self, Assembly, Mode},
    shutdown::{spawn_interrupt_watcher, InterruptFlag, ReleaseReport},
    sim::SimWorld,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::{self, Session},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Default parameter file, relative to the params directory.
const PARAMS_FILE: &str = "hold_exec.toml";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Command line options.
#[derive(Debug, StructOpt)]
#[structopt(name = "hold_exec", about = "Drive to an object and hold it when asked")]
struct Opts {
    /// Parameter file to load, defaults to `params/hold_exec.toml` in the software root
    #[structopt(short, long, parse(from_os_str))]
    params: Option<PathBuf>,

    /// Which ports to run against: sim, console or hw
    #[structopt(short, long, default_value = "sim")]
    mode: Mode,

    /// Scenario script for the simulation
    #[structopt(short, long, parse(from_os_str))]
    scenario: Option<PathBuf>,

    /// Run the simulation on a simulated clock, as fast as possible
    #[structopt(long)]
    fast: bool,

    /// Log at trace level
    #[structopt(short, long)]
    verbose: bool,
}

/// Summary of a run, saved into the session directory.
#[derive(Debug, Serialize)]
struct RunSummary {
    mode: Mode,
    exit_reason: ExitReason,
    num_cycles: u64,
    duration_s: f64,
    status: StatusReport,
    release: ReleaseReport,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "hold_exec",
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    let level = if opts.verbose { LevelFilter::Trace } else { LevelFilter::Info };
    logger_init(level, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Hold Robot Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: HoldExecParams = match opts.params {
        Some(ref p) => util::params::load_from_path(p),
        None => util::params::load(PARAMS_FILE),
    }.wrap_err("Could not load parameters")?;

    params.are_valid().wrap_err("Invalid parameters")?;

    info!("Parameters loaded, wake phrase is \"{}\"", params.hold_ctrl.wake_phrase);

    // ---- INTERRUPTS ----

    let interrupt = InterruptFlag::new();
    let _watcher = spawn_interrupt_watcher(interrupt.clone())
        .wrap_err("Could not start the interrupt watcher")?;

    // ---- RUN ----

    let summary = if opts.fast && opts.mode == Mode::Sim {
        info!("Using a simulated clock");
        run(Arc::new(ManualClock::new()), &opts, &params, &session, &interrupt)?
    }
    else {
        if opts.fast {
            warn!("--fast only applies in sim mode, ignored");
        }
        run(Arc::new(SystemClock::new()), &opts, &params, &session, &interrupt)?
    };

    session.save_or_warn("run_summary.json", &summary);

    if !summary.release.failures.is_empty() {
        return Err(eyre!(
            "The robot could not be fully released: {:?}", summary.release.failures
        ))
    }

    info!("End of execution");

    Ok(())
}

/// Build the ports for the selected mode and run until the main loop exits.
fn run<C>(
    clock: Arc<C>,
    opts: &Opts,
    params: &HoldExecParams,
    session: &Session,
    interrupt: &InterruptFlag
) -> Result<RunSummary>
where
    C: Clock + Send + Sync + 'static
{
    let start_s = session::get_elapsed_seconds();
    let cancel = CancelLatch::new();

    let world = match opts.scenario {
        Some(ref path) => SimWorld::load_scenario(clock.clone(), cancel.clone(), path)
            .wrap_err("Could not load the simulation scenario")?,
        None => {
            if opts.mode == Mode::Sim {
                warn!("No scenario given, the simulation will hear nothing");
            }
            SimWorld::new(clock.clone(), cancel.clone())
        }
    };

    // ---- PORTS ----

    let mode = opts.mode;
    let history = session.session_root.join("console_history.txt");

    let Assembly { mut guard, mut listener } = setup::assemble(
        params.hold_ctrl.clone(),
        clock,
        interrupt,
        || setup::build_perception(mode, params, &session.session_root, &world),
        || setup::build_robot(mode, params, &world),
        || setup::spawn_listener(mode, params, &world, interrupt, history)
    ).wrap_err("Failed to set up the robot")?;

    // ---- MAIN LOOP ----

    info!("Initialisation complete, entering main loop");

    let mut main_loop = MainLoop::new();
    let exit_reason = main_loop.run(&mut guard, &mut listener, interrupt);

    match exit_reason {
        ExitReason::Interrupted => warn!("Run interrupted"),
        ExitReason::UserCancel => info!("Run cancelled by the user"),
        ExitReason::CommandSourceClosed => info!("No more commands"),
    }

    // ---- SHUTDOWN ----

    let release = guard.release();
    if !release.failures.is_empty() {
        error!("{} release steps failed", release.failures.len());
    }

    Ok(RunSummary {
        mode: opts.mode,
        exit_reason,
        num_cycles: main_loop.num_cycles(),
        duration_s: session::get_elapsed_seconds() - start_s,
        status: guard.ctrl().report().clone(),
        release,
    })
}

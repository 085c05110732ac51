//! # Trajectory control executable
//!
//! Follows a test path with the trajectory controller, using the kinematic simulator in place of
//! the vehicle.
//!
//! # Architecture
//!
//! - The controller runs in a `ControlWorker` thread at the control frequency.
//! - The main loop plays the part of the vehicle and the goal framework:
//!     - Tick reports are drained from the worker, archived, and checked for the end of the goal.
//!     - The simulator is stepped with the worker's last published command, which updates the
//!       pose the worker reads back.
//! - Once the goal is done the final diagnostics are saved into the session and the worker is
//!   joined.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    thread,
    time::{Duration, Instant},
};

use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use ctrl_if::{Frame, GoalOutcome, PathSpec, Pose, Twist};
use log::{info, warn};
use serde::Serialize;
use structopt::StructOpt;

use traj_lib::{
    loc::LocMgr,
    sched::{ControlLoop, ControlWorker, SchedState, TickReport},
    sim::SimVehicle,
    traj_ctrl::{Diagnostics, Params, PolyCoeffs},
};
use util::{
    archive::Archiver,
    logger::{logger_init, LevelFilter},
    session::{self, Session},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Period of the simulation loop.
const SIM_PERIOD: Duration = Duration::from_millis(20);

/// Range and spacing of the fitted curve samples saved with the diagnostics.
const CURVE_SAMPLE_END_M: f64 = 5.0;
const CURVE_SAMPLE_STEP_M: f64 = 0.25;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(
    name = "traj_exec",
    about = "Follow a test path with the trajectory controller in simulation"
)]
struct Opt {
    /// Parameter file, relative to the params directory
    #[structopt(long = "params", default_value = "traj_ctrl.toml")]
    params_file: String,

    /// Give up on the goal after this many seconds
    #[structopt(long = "max-time", default_value = "120")]
    max_time_s: f64,

    /// Override the maximum speed of the vehicle in meters/second
    #[structopt(long = "speed-limit")]
    speed_limit_ms: Option<f64>,

    /// Include the optimiser's per-iteration trace in the log
    #[structopt(long)]
    trace: bool,

    /// The path to follow
    #[structopt(subcommand)]
    path: PathSpec,
}

/// A row of the feedback archive.
#[derive(Debug, Serialize)]
struct FeedbackRecord {
    time_s: f64,
    state: String,
    elapsed_s: f64,
    speed_ms: f64,
    cmd_linear_ms: f64,
    cmd_angular_rads: f64,
    nearest_index: Option<usize>,
    cost: Option<f64>,
    iterations: Option<usize>,
}

/// Diagnostics saved at the end of the run.
#[derive(Debug, Serialize)]
struct DiagnosticsSnapshot {
    diagnostics: Diagnostics,

    /// The fitted curve sampled in the Vehicle frame
    curve: Vec<(f64, f64)>,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("traj_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    let min_level = if opt.trace {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    logger_init(min_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Trajectory Control Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: Params = util::params::load(&opt.params_file)
        .wrap_err("Could not load trajectory control params")?;

    info!("Trajectory control parameters loaded, using {:?}", params.controller);

    // ---- INITIALISE PATH ----

    let start = Pose::origin(Frame::World);
    let path = opt
        .path
        .into_path(&start)
        .wrap_err("Could not build the path to follow")?;

    info!(
        "Following a {:.2} m path with {} points",
        path.get_length().unwrap_or(0.0),
        path.get_num_points()
    );
    session.save("path.json", path.clone());

    // ---- INITIALISE MODULES ----

    let loc = LocMgr::new();
    let mut sim =
        SimVehicle::new(start, loc.clone()).wrap_err("Failed to initialise the simulator")?;

    let control_loop = ControlLoop::from_params(&params, Box::new(loc))
        .wrap_err("Failed to initialise trajectory control")?;
    let worker = ControlWorker::start(
        control_loop,
        Duration::from_secs_f64(params.control_period_s()),
    )
    .wrap_err("Failed to start the control worker")?;

    if let Some(limit_ms) = opt.speed_limit_ms {
        worker
            .set_speed_limit(limit_ms)
            .wrap_err("Invalid speed limit")?;
    }

    worker.set_plan(path).wrap_err("The path was rejected")?;

    let mut sim_arch =
        Archiver::from_path(&session, "sim.csv").wrap_err("Failed to create the sim archive")?;
    let mut fb_arch = Archiver::from_path(&session, "feedback.csv")
        .wrap_err("Failed to create the feedback archive")?;

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let run_start = Instant::now();
    let mut last_step = run_start;
    let mut last_diagnostics = None;
    let mut cancel_sent = false;

    let outcome = loop {
        let cycle_start = Instant::now();

        // ---- TICK REPORTS ----

        let mut done = None;
        for report in worker.reports().try_iter() {
            archive_report(&mut fb_arch, &report)?;

            if report.diagnostics.is_some() {
                last_diagnostics = report.diagnostics;
            }

            if let SchedState::Done(o) = report.state {
                done = Some(o);
                break;
            }
        }

        if let Some(o) = done {
            break o;
        }

        // ---- SIMULATION ----

        let cmd = worker.last_command()?.unwrap_or_else(Twist::zero);
        sim.step(&cmd, cycle_start.duration_since(last_step).as_secs_f64())
            .wrap_err("Failed to step the simulation")?;
        last_step = cycle_start;

        sim_arch
            .serialise(sim.record(session::get_elapsed_seconds()))
            .wrap_err("Failed to archive the simulation state")?;

        // ---- TIMEOUT ----

        if !cancel_sent && run_start.elapsed().as_secs_f64() > opt.max_time_s {
            warn!("Goal not complete after {} s, cancelling", opt.max_time_s);
            worker.cancel();
            cancel_sent = true;
        }

        // ---- CYCLE MANAGEMENT ----

        if let Some(d) = SIM_PERIOD.checked_sub(cycle_start.elapsed()) {
            thread::sleep(d);
        }
    };

    // ---- SHUTDOWN ----

    info!("Goal finished: {:?}", outcome);
    info!("Final pose: {:?}", sim.pose());

    if let Some(diagnostics) = last_diagnostics {
        let curve = PolyCoeffs::new(diagnostics.coeffs.clone()).sample(
            0.0,
            CURVE_SAMPLE_END_M,
            CURVE_SAMPLE_STEP_M,
        );
        session.save("diagnostics.json", DiagnosticsSnapshot { diagnostics, curve });
    }

    worker.join().wrap_err("The control worker failed")?;

    info!("End of execution");
    session.exit();

    match outcome {
        GoalOutcome::Aborted(reason) => Err(eyre!("The goal was aborted: {}", reason)),
        _ => Ok(()),
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn archive_report(arch: &mut Archiver, report: &TickReport) -> Result<()> {
    let (feedback, cmd) = match (report.feedback, report.command) {
        (Some(f), Some(c)) => (f, c),
        _ => return Ok(()),
    };

    let diag = report.diagnostics.as_ref();

    arch.serialise(FeedbackRecord {
        time_s: session::get_elapsed_seconds(),
        state: format!("{:?}", report.state),
        elapsed_s: feedback.elapsed_s,
        speed_ms: feedback.speed_ms,
        cmd_linear_ms: cmd.linear_ms,
        cmd_angular_rads: cmd.angular_rads,
        nearest_index: diag.map(|d| d.nearest_index),
        cost: diag.and_then(|d| d.cost),
        iterations: diag.map(|d| d.iterations),
    })
    .wrap_err("Failed to archive the tick report")
}

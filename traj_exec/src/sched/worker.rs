//! # Control worker
//!
//! Runs a `ControlLoop` on a dedicated thread at a fixed period. The goal side talks to the
//! worker through a small set of shared fields, each written by one side only, and receives the
//! tick reports over a channel.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{channel, Receiver, Sender},
    Arc, PoisonError, RwLock,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ctrl_if::{Path, Twist};
use log::{debug, error, info, warn};

use super::{ControlLoop, SchedError, TickReport};
use crate::traj_ctrl::{check_plan, TrajCtrlError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Handle to a control loop running on its own thread.
pub struct ControlWorker {
    shared: Arc<Shared>,
    reports: Receiver<TickReport>,
    handle: Option<JoinHandle<Result<(), SchedError>>>,
    min_plan_points: usize,
}

/// Fields shared between the worker thread and its handle.
#[derive(Default)]
struct Shared {
    /// Plan waiting to be picked up by the worker
    pending_plan: RwLock<Option<Path>>,

    /// Speed limit waiting to be picked up by the worker
    pending_speed_limit: RwLock<Option<f64>>,

    cancel: AtomicBool,
    stop: AtomicBool,

    /// Last command published by the worker
    last_command: RwLock<Option<Twist>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControlWorker {
    /// Start running `control_loop` every `period`.
    pub fn start(control_loop: ControlLoop, period: Duration) -> Result<Self, SchedError> {
        let shared = Arc::new(Shared::default());
        let (tx, rx) = channel();
        let min_plan_points = control_loop.min_plan_points();

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("traj_ctrl::worker".into())
            .spawn(move || run(control_loop, thread_shared, tx, period))
            .map_err(SchedError::CannotStartWorker)?;

        info!("Control worker started with a period of {:?}", period);

        Ok(Self {
            shared,
            reports: rx,
            handle: Some(handle),
            min_plan_points,
        })
    }

    /// Hand a new plan to the worker, which starts following it on the next tick.
    ///
    /// Plans which can't be followed are rejected here rather than on the worker thread.
    pub fn set_plan(&self, path: Path) -> Result<(), SchedError> {
        check_plan(&path, self.min_plan_points)?;

        *self.shared.pending_plan.write()? = Some(path);
        self.shared.cancel.store(false, Ordering::SeqCst);

        Ok(())
    }

    /// Request a new speed limit. Limits above the configured maximum are capped by the worker.
    pub fn set_speed_limit(&self, limit_ms: f64) -> Result<(), SchedError> {
        if !(limit_ms > 0.0 && limit_ms.is_finite()) {
            return Err(TrajCtrlError::InvalidSpeedLimit(limit_ms).into());
        }

        *self.shared.pending_speed_limit.write()? = Some(limit_ms);
        Ok(())
    }

    /// Cancel the current goal. Takes effect at the start of the next tick.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
    }

    /// The most recently published command.
    pub fn last_command(&self) -> Result<Option<Twist>, SchedError> {
        Ok(*self.shared.last_command.read()?)
    }

    /// Reports from each tick, in order.
    pub fn reports(&self) -> &Receiver<TickReport> {
        &self.reports
    }

    /// Stop the worker and wait for it to exit.
    pub fn join(mut self) -> Result<(), SchedError> {
        self.shared.stop.store(true, Ordering::SeqCst);

        match self.handle.take() {
            Some(h) => h.join().map_err(|_| SchedError::WorkerPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for ControlWorker {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

impl<T> From<PoisonError<T>> for SchedError {
    fn from(_: PoisonError<T>) -> Self {
        SchedError::LockPoisoned
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Worker thread body.
fn run(
    mut control_loop: ControlLoop,
    shared: Arc<Shared>,
    reports: Sender<TickReport>,
    period: Duration,
) -> Result<(), SchedError> {
    while !shared.stop.load(Ordering::SeqCst) {
        let cycle_start = Instant::now();

        // ---- GOAL INPUTS ----

        let pending_plan = shared.pending_plan.write()?.take();
        if let Some(path) = pending_plan {
            if let Err(e) = control_loop.set_plan(path, cycle_start) {
                error!("Could not start the new goal: {}", e);
            }
        }

        let pending_limit = shared.pending_speed_limit.write()?.take();
        if let Some(limit_ms) = pending_limit {
            match control_loop.set_speed_limit(limit_ms) {
                Ok(l) => info!("Speed limit set to {} m/s", l),
                Err(e) => warn!("Could not set the speed limit: {}", e),
            }
        }

        // ---- TICK ----

        let cancel = shared.cancel.swap(false, Ordering::SeqCst);
        let report = control_loop.tick(cancel, cycle_start);

        if let Some(cmd) = report.command {
            *shared.last_command.write()? = Some(cmd);
        }

        if reports.send(report).is_err() {
            debug!("Tick report receiver dropped");
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = cycle_start.elapsed();
        match period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Control cycle overran by {:.06} s",
                (cycle_dur - period).as_secs_f64()
            ),
        }
    }

    info!("Control worker stopped");

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{loc::LocMgr, sched::SchedState, traj_ctrl::params::test::shipped_params};
    use ctrl_if::{Frame, GoalOutcome, Pose};

    const PERIOD: Duration = Duration::from_millis(10);
    const REPORT_TIMEOUT: Duration = Duration::from_secs(5);

    fn worker() -> ControlWorker {
        let loc = LocMgr::new();
        loc.set_pose(Pose::origin(Frame::World), Some(Twist::zero()))
            .unwrap();

        let control_loop = ControlLoop::from_params(&shipped_params(), Box::new(loc)).unwrap();
        ControlWorker::start(control_loop, PERIOD).unwrap()
    }

    fn plan() -> Path {
        Path::direct(
            &Pose::origin(Frame::World),
            &Pose::new(Frame::World, 10.0, 0.0, 0.0),
            0.5,
        )
        .unwrap()
    }

    /// Wait for the first report in the given state.
    fn wait_for(worker: &ControlWorker, state: SchedState) -> TickReport {
        loop {
            let report = worker.reports().recv_timeout(REPORT_TIMEOUT).unwrap();
            if report.state == state {
                return report;
            }
        }
    }

    #[test]
    fn test_start_cancel_join() {
        let worker = worker();

        let idle = worker.reports().recv_timeout(REPORT_TIMEOUT).unwrap();
        assert_eq!(idle.state, SchedState::Idle);
        assert!(idle.command.is_none());

        worker.set_plan(plan()).unwrap();
        let tracking = wait_for(&worker, SchedState::Tracking);
        assert!(tracking.command.is_some());
        assert!(tracking.diagnostics.is_some());
        assert!(worker.last_command().unwrap().is_some());

        worker.cancel();
        wait_for(&worker, SchedState::Cancelling);
        let done = wait_for(&worker, SchedState::Done(GoalOutcome::Cancelled));
        assert!(done.command.is_none());

        // Nothing is published once the cancellation has been observed
        let next = worker.reports().recv_timeout(REPORT_TIMEOUT).unwrap();
        assert!(next.command.is_none());

        worker.join().unwrap();
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let worker = worker();

        let short = Path::direct(
            &Pose::origin(Frame::World),
            &Pose::new(Frame::World, 0.5, 0.0, 0.0),
            0.5,
        )
        .unwrap();
        assert!(matches!(
            worker.set_plan(short),
            Err(SchedError::TrajCtrlError(
                TrajCtrlError::InsufficientPathPoints { .. }
            ))
        ));

        assert!(worker.set_speed_limit(-1.0).is_err());
        assert!(worker.set_speed_limit(0.2).is_ok());

        worker.join().unwrap();
    }
}

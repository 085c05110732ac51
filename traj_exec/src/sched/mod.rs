//! # Control loop scheduling
//!
//! `ControlLoop` drives a `Controller` one tick at a time and tracks the state of the goal being
//! followed:
//!
//! ```text
//!           set_plan                 cancel               next tick
//!   Idle ------------> Tracking -------------> Cancelling -----------> Done(Cancelled)
//!                       |    ^
//!     K divergences     |    | successful solve
//!                       v    |
//!                      Degraded
//! ```
//!
//! `Tracking` and `Degraded` go to `Done` when the goal checker reports completion, the path is
//! exhausted, or the controller returns an error it can't recover from. A new plan may be set
//! from any state.
//!
//! `ControlWorker` runs a `ControlLoop` at a fixed period on its own thread.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod worker;

pub use worker::ControlWorker;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::{Duration, Instant};

use ctrl_if::{Feedback, Frame, GoalOutcome, Path, Pose, Twist};
use log::{error, info, warn};
use serde::Serialize;

use crate::{
    loc::LocSource,
    traj_ctrl::{path::nearest_index, Controller, Diagnostics, Params, TrajCtrlError},
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Decides when a goal has been completed.
pub trait GoalChecker: Send {
    /// Return true if the vehicle at `pose` has completed `path`.
    fn is_complete(&mut self, pose: &Pose, path: &Path) -> bool;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Completes the goal once the vehicle is within a tolerance of the final pose of the path, or has
/// driven past the final pose while staying within the tolerance of the line through the final
/// segment.
#[derive(Debug, Clone, Copy)]
pub struct DistanceGoalChecker {
    pub tolerance_m: f64,
}

/// Drives a controller and tracks the goal state.
pub struct ControlLoop {
    controller: Box<dyn Controller>,
    loc: Box<dyn LocSource>,
    goal_checker: Box<dyn GoalChecker>,

    state: SchedState,

    /// The current goal's path
    path: Option<Path>,

    /// When the current goal was accepted
    goal_start: Option<Instant>,

    /// The last command produced by a successful tick
    last_valid: Option<Twist>,

    consec_failures: usize,
    max_consec_failures: usize,
    pose_timeout: Duration,
}

/// The result of a single tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    /// State after the tick
    pub state: SchedState,

    /// Command to publish, if any
    pub command: Option<Twist>,

    /// Goal feedback, present while a goal is active
    pub feedback: Option<Feedback>,

    /// Diagnostics from the controller, present when it ran successfully
    pub diagnostics: Option<Diagnostics>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SchedState {
    /// No plan has been set
    Idle,

    /// Following the plan
    Tracking,

    /// A cancellation has been observed, the goal ends on the next tick
    Cancelling,

    /// Too many consecutive optimisation failures, the last valid command is being held
    Degraded,

    /// The goal has ended
    Done(GoalOutcome),
}

#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    #[error("Trajectory control error: {0}")]
    TrajCtrlError(#[from] TrajCtrlError),

    #[error("Cannot start the worker thread: {0}")]
    CannotStartWorker(std::io::Error),

    #[error("The worker thread panicked")]
    WorkerPanicked,

    #[error("A lock shared with the worker thread is poisoned")]
    LockPoisoned,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GoalChecker for DistanceGoalChecker {
    fn is_complete(&mut self, pose: &Pose, path: &Path) -> bool {
        let end = match path.last() {
            Some(e) => e,
            None => return false,
        };

        if end.distance(pose) <= self.tolerance_m {
            return true;
        }

        // Overshoot is only counted once the final point is the nearest one, so paths which
        // double back on themselves don't complete early
        match nearest_index(path, pose) {
            Ok(i) if i + 1 == path.get_num_points() => (),
            _ => return false,
        }

        let (dir_x, dir_y) = match final_direction(path) {
            Some(d) => d,
            None => return false,
        };
        let (dx, dy) = (pose.x_m - end.x_m, pose.y_m - end.y_m);

        let along_m = dx * dir_x + dy * dir_y;
        let across_m = (dx * dir_y - dy * dir_x).abs();

        along_m > 0.0 && across_m <= self.tolerance_m
    }
}

impl ControlLoop {
    /// Create a new loop around the given controller.
    ///
    /// Completion defaults to a `DistanceGoalChecker` using the `goal_tolerance_m` parameter.
    pub fn new(
        controller: Box<dyn Controller>,
        loc: Box<dyn LocSource>,
        params: &Params,
    ) -> Self {
        Self {
            controller,
            loc,
            goal_checker: Box::new(DistanceGoalChecker {
                tolerance_m: params.goal_tolerance_m,
            }),
            state: SchedState::Idle,
            path: None,
            goal_start: None,
            last_valid: None,
            consec_failures: 0,
            max_consec_failures: params.max_consec_failures,
            pose_timeout: Duration::from_secs_f64(params.pose_timeout_s),
        }
    }

    /// Build the controller selected in the parameters and create a loop around it.
    pub fn from_params(params: &Params, loc: Box<dyn LocSource>) -> Result<Self, SchedError> {
        let controller = params.controller.build(params)?;
        Ok(Self::new(controller, loc, params))
    }

    /// Replace the goal checker.
    pub fn with_goal_checker(mut self, goal_checker: Box<dyn GoalChecker>) -> Self {
        self.goal_checker = goal_checker;
        self
    }

    pub fn state(&self) -> &SchedState {
        &self.state
    }

    pub fn min_plan_points(&self) -> usize {
        self.controller.min_plan_points()
    }

    /// Start a new goal following `path`, accepted at `now`.
    ///
    /// If the controller rejects the plan the state is unchanged.
    pub fn set_plan(&mut self, path: Path, now: Instant) -> Result<(), SchedError> {
        self.controller.set_plan(path.clone())?;

        info!(
            "Goal accepted with {} points, {:?} -> Tracking",
            path.get_num_points(),
            self.state
        );

        self.path = Some(path);
        self.goal_start = Some(now);
        self.consec_failures = 0;
        self.state = SchedState::Tracking;

        Ok(())
    }

    /// Override the maximum speed, returning the applied limit.
    pub fn set_speed_limit(&mut self, limit_ms: f64) -> Result<f64, SchedError> {
        Ok(self.controller.set_speed_limit(limit_ms)?)
    }

    /// Run one tick at `now`. `cancel` is the state of the cancellation signal.
    pub fn tick(&mut self, cancel: bool, now: Instant) -> TickReport {
        match self.state {
            SchedState::Idle | SchedState::Done(_) => self.report(None, None, now),
            SchedState::Cancelling => {
                info!("Goal cancelled");
                self.finish(GoalOutcome::Cancelled);
                self.report(None, None, now)
            }
            SchedState::Tracking | SchedState::Degraded if cancel => {
                info!("Cancellation requested, {:?} -> Cancelling", self.state);
                self.state = SchedState::Cancelling;
                self.report(None, None, now)
            }
            SchedState::Tracking | SchedState::Degraded => self.track(now),
        }
    }

    fn track(&mut self, now: Instant) -> TickReport {
        let pose = match self
            .loc
            .get_current_pose(Frame::Vehicle, Frame::World, self.pose_timeout)
        {
            Ok(p) if p.is_finite() => p,
            Ok(p) => {
                warn!("Pose estimate {:?} is not finite, republishing the last command", p);
                let held = self.held_command();
                return self.report(Some(held), None, now);
            }
            Err(e) => {
                warn!("Cannot get the vehicle pose, republishing the last command: {}", e);
                let held = self.held_command();
                return self.report(Some(held), None, now);
            }
        };

        let measured = self
            .loc
            .get_current_velocity()
            .unwrap_or_else(|| self.held_command());

        let complete = match self.path {
            Some(ref path) => self.goal_checker.is_complete(&pose, path),
            None => false,
        };
        if complete {
            return self.succeed(now);
        }

        match self.controller.compute_command(&pose, &measured, now) {
            Ok(out) => {
                if self.state == SchedState::Degraded {
                    info!("Optimisation recovered, Degraded -> Tracking");
                }
                self.state = SchedState::Tracking;
                self.consec_failures = 0;
                self.last_valid = Some(out.twist);

                self.report(Some(out.twist), Some(out.diagnostics), now)
            }
            Err(TrajCtrlError::PathExhausted) => self.succeed(now),
            Err(e) if !e.is_fatal() => {
                self.consec_failures += 1;

                if self.consec_failures >= self.max_consec_failures
                    && self.state == SchedState::Tracking
                {
                    warn!(
                        "{} consecutive failures, Tracking -> Degraded: {}",
                        self.consec_failures, e
                    );
                    self.state = SchedState::Degraded;
                } else {
                    warn!("Holding the last command: {}", e);
                }

                let held = self.held_command();
                self.report(Some(held), None, now)
            }
            Err(e) => {
                error!("Aborting the goal: {}", e);
                self.finish(GoalOutcome::Aborted(e.to_string()));
                self.report(Some(Twist::zero()), None, now)
            }
        }
    }

    fn succeed(&mut self, now: Instant) -> TickReport {
        let total_time_s = self.elapsed_s(now);
        info!("Goal complete in {:.2} s", total_time_s);

        // Feedback is reported for the completing tick
        let report = self.report(Some(Twist::zero()), None, now);
        self.finish(GoalOutcome::Succeeded { total_time_s });

        TickReport {
            state: self.state.clone(),
            ..report
        }
    }

    fn finish(&mut self, outcome: GoalOutcome) {
        self.state = SchedState::Done(outcome);
        self.last_valid = Some(Twist::zero());
        self.consec_failures = 0;
    }

    fn held_command(&self) -> Twist {
        self.last_valid.unwrap_or_else(Twist::zero)
    }

    fn elapsed_s(&self, now: Instant) -> f64 {
        self.goal_start
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(0.0)
    }

    fn report(
        &self,
        command: Option<Twist>,
        diagnostics: Option<Diagnostics>,
        now: Instant,
    ) -> TickReport {
        let feedback = match (command, &self.state) {
            (Some(cmd), SchedState::Tracking) | (Some(cmd), SchedState::Degraded) => {
                Some(Feedback {
                    elapsed_s: self.elapsed_s(now),
                    speed_ms: cmd.linear_ms,
                })
            }
            _ => None,
        };

        TickReport {
            state: self.state.clone(),
            command,
            feedback,
            diagnostics,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Unit vector along the last segment of non-zero length in the path.
fn final_direction(path: &Path) -> Option<(f64, f64)> {
    let end = path.last()?;
    let prev = path.poses().iter().rev().find(|p| p.distance(end) > 0.0)?;
    let len_m = prev.distance(end);

    Some(((end.x_m - prev.x_m) / len_m, (end.y_m - prev.y_m) / len_m))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

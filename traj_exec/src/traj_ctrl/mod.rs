//! # Trajectory control module
//!
//! Trajectory control is responsible for keeping the vehicle on the target path. Each control
//! tick it takes the vehicle's pose in the World frame and its measured velocity and produces a
//! velocity command.
//!
//! The primary controller is a receding horizon (model predictive) controller:
//!
//! - The path, a sequence of World frame poses, is searched for the point nearest the vehicle.
//! - A fixed number of points are resampled along the path ahead of that point and moved into the
//!   Vehicle frame, where a low degree polynomial `y = f(x)` is fitted to them.
//! - Reference states are built along the fitted curve, with the reference speed ramping towards
//!   the target speed within the acceleration limit.
//! - A kinematic bicycle model predicts the vehicle's motion over the horizon, and the control
//!   sequence minimising the tracking cost within the actuator limits is found by projected
//!   gradient descent, warm started from the previous tick's solution.
//! - The first control of the solution is integrated into the published command.
//!
//! A PID controller operating on the lateral and heading error to the path is also provided as a
//! baseline. The controller is selected with the `controller` parameter.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod cmd;
pub mod frame;
pub mod model;
mod mpc;
pub mod optimiser;
pub mod params;
pub mod path;
mod pid;
pub mod poly;
mod reference;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Instant;

use ctrl_if::{GeomError, Path, Pose, Twist};
use serde::{Deserialize, Serialize};

pub use cmd::CmdPostProcessor;
pub use model::{ControlInput, StateVector};
pub use mpc::{MpcController, RuntimeState};
pub(crate) use mpc::check_plan;
pub use optimiser::{HorizonOptimiser, OptError, Solution};
pub use params::{ConfigError, CostWeights, HorizonConfig, OptimiserParams, Params, PidParams};
pub use path::PathError;
pub use pid::{PidController, PidTracker};
pub use poly::{FitError, PolyCoeffs};
pub use reference::build_reference;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A trajectory controller.
pub trait Controller: Send {
    /// Create the controller from the parameters, validating them.
    fn configure(params: &Params) -> Result<Self, TrajCtrlError>
    where
        Self: Sized;

    /// Minimum number of points a plan must have to be accepted.
    fn min_plan_points(&self) -> usize;

    /// Replace the path being followed. The path must be in the World frame.
    ///
    /// Any state carried between ticks for the previous plan is reset.
    fn set_plan(&mut self, path: Path) -> Result<(), TrajCtrlError>;

    /// Override the maximum speed. Limits above the configured maximum are capped, the applied
    /// limit is returned.
    fn set_speed_limit(&mut self, limit_ms: f64) -> Result<f64, TrajCtrlError>;

    /// Compute the command for the tick occurring at `now`, given the vehicle's World frame pose
    /// and measured velocity.
    fn compute_command(
        &mut self,
        pose: &Pose,
        measured: &Twist,
        now: Instant,
    ) -> Result<TickOutput, TrajCtrlError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The output of a successful tick.
#[derive(Debug, Clone)]
pub struct TickOutput {
    /// The command to publish
    pub twist: Twist,

    /// Snapshot of the tick's computation
    pub diagnostics: Diagnostics,
}

/// Intermediate values from a tick, for monitoring and visualisation. Fields a controller doesn't
/// compute are left empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    /// Index of the path point nearest the vehicle
    pub nearest_index: usize,

    /// Fitted local curve, lowest power first
    pub coeffs: Vec<f64>,

    /// Reference states for the horizon
    pub reference: Vec<StateVector>,

    /// Predicted states for the optimised controls
    pub predicted: Vec<StateVector>,

    /// Optimised controls
    pub controls: Vec<ControlInput>,

    /// Final cost of the optimisation
    pub cost: Option<f64>,

    /// Number of optimiser iterations
    pub iterations: usize,

    /// Lateral error to the path
    pub lat_error_m: Option<f64>,

    /// Heading error to the path
    pub head_error_rad: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The available controller implementations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    Mpc,
    Pid,
}

#[derive(Debug, thiserror::Error)]
pub enum TrajCtrlError {
    #[error("Invalid parameters: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("No plan has been set")]
    NoPlan,

    #[error("The plan has {num_points} points but at least {min_points} are required")]
    InsufficientPathPoints { num_points: usize, min_points: usize },

    #[error("Invalid speed limit {0}, must be positive and finite")]
    InvalidSpeedLimit(f64),

    #[error(transparent)]
    GeomError(#[from] GeomError),

    #[error("Path error: {0}")]
    PathError(PathError),

    #[error("The end of the path has been reached")]
    PathExhausted,

    #[error("Cannot fit the local path: {0}")]
    FitError(#[from] FitError),

    #[error("Optimisation failed ({consec_failures} consecutive failures): {source}")]
    OptimisationDivergence {
        consec_failures: usize,
        source: OptError,
    },

    #[error("Optimiser error: {0}")]
    OptError(OptError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControllerKind {
    /// Build the selected controller from the parameters.
    pub fn build(self, params: &Params) -> Result<Box<dyn Controller>, TrajCtrlError> {
        Ok(match self {
            ControllerKind::Mpc => Box::new(MpcController::configure(params)?),
            ControllerKind::Pid => Box::new(PidTracker::configure(params)?),
        })
    }
}

impl From<PathError> for TrajCtrlError {
    fn from(e: PathError) -> Self {
        match e {
            PathError::PathExhausted { .. } => Self::PathExhausted,
            PathError::GeomError(g) => Self::GeomError(g),
            e => Self::PathError(e),
        }
    }
}

impl TrajCtrlError {
    /// True for errors which end the goal rather than affecting a single tick.
    ///
    /// Failed solves and curve fits are retried on the next tick.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::OptimisationDivergence { .. } | Self::FitError(_)
        )
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

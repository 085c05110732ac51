//! Trajectory control parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::ControllerKind;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// The shortest horizon the optimiser will accept.
pub const MIN_HORIZON_LEN: usize = 4;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for trajectory control
#[derive(Deserialize, Debug, Clone)]
pub struct Params {
    /// Which controller implementation to run
    pub controller: ControllerKind,

    /// Frequency at which the control loop runs
    pub control_freq_hz: f64,

    /// Horizon and actuator limits
    pub horizon: HorizonConfig,

    /// Weights of each term in the optimiser's cost function
    pub weights: CostWeights,

    /// Settings for the optimiser's iteration
    pub optimiser: OptimiserParams,

    /// Degree of the polynomial fitted to the local path
    pub poly_degree: usize,

    /// Arc length separation between the points of the resampled horizon window
    pub sample_sep_m: f64,

    /// Cruise speed the reference ramps towards
    pub target_speed_ms: f64,

    /// Number of consecutive optimiser failures before the loop is considered degraded
    pub max_consec_failures: usize,

    /// Maximum time to wait for a pose before skipping the tick
    pub pose_timeout_s: f64,

    /// Gaps between ticks longer than this are treated as a stall, with the elapsed time
    /// discarded when integrating the command
    pub max_tick_gap_s: f64,

    /// Distance to the final pose of the path under which the goal is complete
    pub goal_tolerance_m: f64,

    /// Gains for the PID controller, required only if `controller = "pid"`
    #[serde(default)]
    pub pid: Option<PidParams>,
}

/// Horizon configuration. Fixed for the lifetime of a controller.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct HorizonConfig {
    /// Number of steps in the horizon (N)
    pub horizon_len: usize,

    /// Duration of each horizon step (dt)
    pub step_s: f64,

    /// Distance between the front axle and the centre of gravity (Lf)
    pub wheelbase_m: f64,

    /// Maximum absolute linear speed
    pub max_speed_ms: f64,

    /// Maximum absolute acceleration
    pub max_accel_mss: f64,

    /// Maximum absolute steering input
    pub max_steer_rate_rads: f64,
}

/// Cost function weights. All must be finite and non-negative.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct CostWeights {
    pub position: f64,
    pub heading: f64,
    pub speed: f64,
    pub accel: f64,
    pub steer_rate: f64,
    pub accel_change: f64,
    pub steer_rate_change: f64,
}

/// Projected gradient descent settings
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct OptimiserParams {
    /// Maximum number of descent iterations per solve
    pub max_iters: usize,

    /// The solve terminates once the relative cost improvement of an iteration drops below this
    pub rel_cost_tol: f64,

    /// Step length tried first in each line search
    pub init_step: f64,

    /// Factor the step length is multiplied by on each backtrack, in (0, 1)
    pub backtrack_factor: f64,

    /// Armijo sufficient decrease constant, in (0, 1)
    pub armijo_const: f64,

    /// Maximum number of backtracks per line search
    pub max_backtracks: usize,

    /// Projected gradient norm below which the seed is considered stationary
    pub stationary_tol: f64,
}

/// Gains for the PID baseline controller
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PidParams {
    /// Lateral controller proportional gain
    pub lat_k_p: f64,

    /// Lateral controller integral gain
    pub lat_k_i: f64,

    /// Lateral controller derivative gain
    pub lat_k_d: f64,

    /// Heading controller proportional gain
    pub head_k_p: f64,

    /// Heading controller integral gain
    pub head_k_i: f64,

    /// Heading controller derivative gain
    pub head_k_d: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors found when validating the parameters.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Horizon length must be at least 4, found {0}")]
    HorizonTooShort(usize),

    #[error("Horizon step must be positive and finite, found {0}")]
    InvalidStep(f64),

    #[error("Wheelbase must be positive and finite, found {0}")]
    InvalidWheelbase(f64),

    #[error("Maximum speed must be positive and finite, found {0}")]
    InvalidMaxSpeed(f64),

    #[error("Limit {0} must be finite and non-negative, found {1}")]
    NegativeLimit(&'static str, f64),

    #[error("Polynomial degree {degree} must be less than the horizon length {horizon_len}")]
    DegreeTooHigh { degree: usize, horizon_len: usize },

    #[error("Cost weight {0} must be finite and non-negative, found {1}")]
    InvalidWeight(&'static str, f64),

    #[error("Invalid optimiser setting {0}: {1}")]
    InvalidOptimiser(&'static str, f64),

    #[error("Control frequency must be positive and finite, found {0}")]
    InvalidControlFreq(f64),

    #[error("Parameter {0} must be positive and finite, found {1}")]
    NotPositive(&'static str, f64),

    #[error("The PID controller was selected but no [pid] gains were given")]
    MissingPidParams,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Params {
    /// Check all parameters, failing on the first invalid one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.horizon.validate()?;
        self.weights.validate()?;
        self.optimiser.validate()?;

        if !(self.control_freq_hz > 0.0 && self.control_freq_hz.is_finite()) {
            return Err(ConfigError::InvalidControlFreq(self.control_freq_hz));
        }

        if self.poly_degree >= self.horizon.horizon_len {
            return Err(ConfigError::DegreeTooHigh {
                degree: self.poly_degree,
                horizon_len: self.horizon.horizon_len,
            });
        }

        for &(name, value) in &[
            ("sample_sep_m", self.sample_sep_m),
            ("target_speed_ms", self.target_speed_ms),
            ("pose_timeout_s", self.pose_timeout_s),
            ("max_tick_gap_s", self.max_tick_gap_s),
            ("goal_tolerance_m", self.goal_tolerance_m),
        ] {
            check_positive(name, value)?;
        }

        if self.max_consec_failures == 0 {
            return Err(ConfigError::NotPositive(
                "max_consec_failures",
                self.max_consec_failures as f64,
            ));
        }

        if self.controller == ControllerKind::Pid && self.pid.is_none() {
            return Err(ConfigError::MissingPidParams);
        }

        Ok(())
    }

    /// Period of the control loop in seconds.
    pub fn control_period_s(&self) -> f64 {
        1.0 / self.control_freq_hz
    }

    /// Minimum number of points a path must have for the polynomial fit to be possible.
    pub fn min_plan_points(&self) -> usize {
        self.poly_degree + 1
    }
}

impl HorizonConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_len < MIN_HORIZON_LEN {
            return Err(ConfigError::HorizonTooShort(self.horizon_len));
        }
        if !(self.step_s > 0.0 && self.step_s.is_finite()) {
            return Err(ConfigError::InvalidStep(self.step_s));
        }
        if !(self.wheelbase_m > 0.0 && self.wheelbase_m.is_finite()) {
            return Err(ConfigError::InvalidWheelbase(self.wheelbase_m));
        }
        if !(self.max_speed_ms > 0.0 && self.max_speed_ms.is_finite()) {
            return Err(ConfigError::InvalidMaxSpeed(self.max_speed_ms));
        }
        if !(self.max_accel_mss >= 0.0 && self.max_accel_mss.is_finite()) {
            return Err(ConfigError::NegativeLimit("max_accel_mss", self.max_accel_mss));
        }
        if !(self.max_steer_rate_rads >= 0.0 && self.max_steer_rate_rads.is_finite()) {
            return Err(ConfigError::NegativeLimit(
                "max_steer_rate_rads",
                self.max_steer_rate_rads,
            ));
        }

        Ok(())
    }
}

impl CostWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for &(name, value) in &[
            ("position", self.position),
            ("heading", self.heading),
            ("speed", self.speed),
            ("accel", self.accel),
            ("steer_rate", self.steer_rate),
            ("accel_change", self.accel_change),
            ("steer_rate_change", self.steer_rate_change),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ConfigError::InvalidWeight(name, value));
            }
        }

        Ok(())
    }
}

impl OptimiserParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iters == 0 {
            return Err(ConfigError::InvalidOptimiser("max_iters", 0.0));
        }
        if !(self.rel_cost_tol >= 0.0 && self.rel_cost_tol.is_finite()) {
            return Err(ConfigError::InvalidOptimiser(
                "rel_cost_tol",
                self.rel_cost_tol,
            ));
        }
        if !(self.init_step > 0.0 && self.init_step.is_finite()) {
            return Err(ConfigError::InvalidOptimiser("init_step", self.init_step));
        }
        if !(self.backtrack_factor > 0.0 && self.backtrack_factor < 1.0) {
            return Err(ConfigError::InvalidOptimiser(
                "backtrack_factor",
                self.backtrack_factor,
            ));
        }
        if !(self.armijo_const > 0.0 && self.armijo_const < 1.0) {
            return Err(ConfigError::InvalidOptimiser(
                "armijo_const",
                self.armijo_const,
            ));
        }
        if !(self.stationary_tol >= 0.0 && self.stationary_tol.is_finite()) {
            return Err(ConfigError::InvalidOptimiser(
                "stationary_tol",
                self.stationary_tol,
            ));
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotPositive(name, value))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// The parameter file shipped with the software.
    pub(crate) const SHIPPED_PARAMS: &str = include_str!("../../../params/traj_ctrl.toml");

    pub(crate) fn shipped_params() -> Params {
        util::params::parse(SHIPPED_PARAMS).unwrap()
    }

    #[test]
    fn test_shipped_params_are_valid() {
        let params = shipped_params();

        params.validate().unwrap();
        assert_eq!(params.controller, ControllerKind::Mpc);
        assert!(params.pid.is_some());
    }

    #[test]
    fn test_bad_horizon_rejected() {
        let mut params = shipped_params();
        params.horizon.horizon_len = 3;
        assert!(matches!(
            params.validate(),
            Err(ConfigError::HorizonTooShort(3))
        ));

        let mut params = shipped_params();
        params.horizon.step_s = 0.0;
        assert!(matches!(params.validate(), Err(ConfigError::InvalidStep(_))));

        let mut params = shipped_params();
        params.horizon.wheelbase_m = -1.0;
        assert!(matches!(
            params.validate(),
            Err(ConfigError::InvalidWheelbase(_))
        ));

        let mut params = shipped_params();
        params.horizon.max_accel_mss = -0.1;
        assert!(matches!(
            params.validate(),
            Err(ConfigError::NegativeLimit("max_accel_mss", _))
        ));
    }

    #[test]
    fn test_degree_must_fit_in_horizon() {
        let mut params = shipped_params();
        params.poly_degree = params.horizon.horizon_len;

        assert!(matches!(
            params.validate(),
            Err(ConfigError::DegreeTooHigh { .. })
        ));
    }

    #[test]
    fn test_pid_needs_gains() {
        let mut params = shipped_params();
        params.controller = ControllerKind::Pid;
        params.pid = None;

        assert!(matches!(
            params.validate(),
            Err(ConfigError::MissingPidParams)
        ));
    }
}

//! # Receding horizon controller
//!
//! Each tick the controller:
//!
//! 1. Finds the path point nearest the vehicle and resamples the horizon window from it.
//! 2. Moves the window into the Vehicle frame and fits a polynomial to it.
//! 3. Builds the reference states along the fitted curve.
//! 4. Optimises the horizon controls, warm started from the previous solution.
//! 5. Integrates the first control into the published command.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Instant;

use ctrl_if::{Frame, Path, Pose, Twist};
use log::{debug, info, trace, warn};

use super::{
    build_reference, frame,
    optimiser::{shift_warm_start, Problem},
    path::{nearest_index, resample_horizon},
    CmdPostProcessor, ControlInput, Controller, Diagnostics, HorizonOptimiser, OptError, Params,
    PolyCoeffs, StateVector, TickOutput, TrajCtrlError,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The model predictive trajectory controller.
pub struct MpcController {
    params: Params,
    optimiser: HorizonOptimiser,
    post: CmdPostProcessor,
    state: RuntimeState,
}

/// State carried between ticks.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    /// The path being followed, in the World frame
    pub path: Option<Path>,

    /// Seed for the next solve, always `horizon_len` long
    pub warm_start: Vec<ControlInput>,

    /// The first control of the last successful solve
    pub last_control: ControlInput,

    /// The last command this controller produced
    pub last_twist: Twist,

    /// Time of the last tick
    pub last_tick: Option<Instant>,

    /// Number of consecutive failed solves
    pub consec_failures: usize,

    /// Active speed limit
    pub speed_limit_ms: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RuntimeState {
    fn new(params: &Params) -> Self {
        Self {
            path: None,
            warm_start: vec![ControlInput::default(); params.horizon.horizon_len],
            last_control: ControlInput::default(),
            last_twist: Twist::zero(),
            last_tick: None,
            consec_failures: 0,
            speed_limit_ms: params.horizon.max_speed_ms,
        }
    }
}

impl MpcController {
    pub fn runtime_state(&self) -> &RuntimeState {
        &self.state
    }

    /// Fit the local curve to the horizon window around the vehicle.
    fn fit_local_curve(
        &self,
        path: &Path,
        pose: &Pose,
    ) -> Result<(usize, PolyCoeffs), TrajCtrlError> {
        let nearest = nearest_index(path, pose)?;

        let window = resample_horizon(
            path,
            nearest,
            self.params.horizon.horizon_len,
            self.params.sample_sep_m,
        )?;
        let local = frame::poses_to_vehicle(&window, pose)?;

        let xs: Vec<f64> = local.iter().map(|p| p.x_m).collect();
        let ys: Vec<f64> = local.iter().map(|p| p.y_m).collect();

        let curve = PolyCoeffs::fit_reduced(&xs, &ys, self.params.poly_degree)?;

        trace!("Nearest index {}, local curve {:?}", nearest, curve.coeffs());

        Ok((nearest, curve))
    }
}

impl Controller for MpcController {
    fn configure(params: &Params) -> Result<Self, TrajCtrlError> {
        params.validate()?;

        Ok(Self {
            params: params.clone(),
            optimiser: HorizonOptimiser::new(params.horizon, params.weights, params.optimiser),
            post: CmdPostProcessor::new(params.horizon, params.max_tick_gap_s),
            state: RuntimeState::new(params),
        })
    }

    fn min_plan_points(&self) -> usize {
        self.params.min_plan_points()
    }

    fn set_plan(&mut self, path: Path) -> Result<(), TrajCtrlError> {
        check_plan(&path, self.min_plan_points())?;

        info!(
            "New plan with {} points ({:.2} m)",
            path.get_num_points(),
            path.get_length().unwrap_or(0.0)
        );

        self.state.path = Some(path);
        self.state.warm_start = vec![ControlInput::default(); self.params.horizon.horizon_len];
        self.state.last_control = ControlInput::default();
        self.state.consec_failures = 0;
        self.state.last_tick = None;

        Ok(())
    }

    fn set_speed_limit(&mut self, limit_ms: f64) -> Result<f64, TrajCtrlError> {
        let limit_ms = check_speed_limit(limit_ms, self.params.horizon.max_speed_ms)?;
        self.state.speed_limit_ms = limit_ms;
        Ok(limit_ms)
    }

    fn compute_command(
        &mut self,
        pose: &Pose,
        measured: &Twist,
        now: Instant,
    ) -> Result<TickOutput, TrajCtrlError> {
        let elapsed_s = self
            .state
            .last_tick
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(0.0);
        self.state.last_tick = Some(now);

        let path = self.state.path.as_ref().ok_or(TrajCtrlError::NoPlan)?;
        let (nearest, curve) = self.fit_local_curve(path, pose)?;

        let config = self.optimiser.config();
        let target_ms = self.params.target_speed_ms.min(self.state.speed_limit_ms);
        let reference = build_reference(&curve, target_ms, measured.linear_ms, config);

        let problem = Problem {
            initial: StateVector::at_origin(measured.linear_ms),
            reference: &reference,
            last_applied: self.state.last_control,
        };

        let solution = match self.optimiser.solve(&problem, &self.state.warm_start) {
            Ok(s) => s,
            Err(e @ OptError::Divergence { .. }) => {
                // Keep the previous warm start so the next tick retries from the last good solve
                self.state.consec_failures += 1;
                warn!(
                    "Optimisation failed ({} in a row): {}",
                    self.state.consec_failures, e
                );
                return Err(TrajCtrlError::OptimisationDivergence {
                    consec_failures: self.state.consec_failures,
                    source: e,
                });
            }
            Err(e) => return Err(TrajCtrlError::OptError(e)),
        };

        if self.state.consec_failures > 0 {
            info!(
                "Optimisation recovered after {} failures",
                self.state.consec_failures
            );
        }
        self.state.consec_failures = 0;

        let first = solution.controls[0];
        let twist = self.post.process(
            &first,
            &self.state.last_twist,
            elapsed_s,
            self.state.speed_limit_ms,
        );

        debug!(
            "Control {:?} -> command {:?} (cost {:.4e}, {} iterations)",
            first, twist, solution.cost, solution.iterations
        );

        self.state.warm_start = shift_warm_start(&solution.controls, config.horizon_len);
        self.state.last_control = first;
        self.state.last_twist = twist;

        Ok(TickOutput {
            twist,
            diagnostics: Diagnostics {
                nearest_index: nearest,
                coeffs: curve.coeffs().to_vec(),
                reference,
                predicted: solution.predicted,
                controls: solution.controls,
                cost: Some(solution.cost),
                iterations: solution.iterations,
                ..Default::default()
            },
        })
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Check that a plan can be followed: World frame with enough points to fit the curve.
pub(crate) fn check_plan(path: &Path, min_points: usize) -> Result<(), TrajCtrlError> {
    if path.frame() != Frame::World {
        return Err(ctrl_if::GeomError::FrameMismatch {
            expected: Frame::World,
            found: path.frame(),
        }
        .into());
    }
    path.validate()?;

    if path.get_num_points() < min_points {
        return Err(TrajCtrlError::InsufficientPathPoints {
            num_points: path.get_num_points(),
            min_points,
        });
    }

    Ok(())
}

/// Check a requested speed limit, capping it at the configured maximum.
pub(crate) fn check_speed_limit(limit_ms: f64, max_speed_ms: f64) -> Result<f64, TrajCtrlError> {
    if !(limit_ms > 0.0 && limit_ms.is_finite()) {
        return Err(TrajCtrlError::InvalidSpeedLimit(limit_ms));
    }

    if limit_ms > max_speed_ms {
        warn!(
            "Speed limit {} m/s is above the maximum, capping to {} m/s",
            limit_ms, max_speed_ms
        );
    }

    Ok(limit_ms.min(max_speed_ms))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::traj_ctrl::params::test::shipped_params;
    use std::time::Duration;

    fn straight_plan() -> Path {
        Path::direct(
            &Pose::origin(Frame::World),
            &Pose::new(Frame::World, 10.0, 0.0, 0.0),
            0.5,
        )
        .unwrap()
    }

    #[test]
    fn test_no_plan() {
        let mut ctrl = MpcController::configure(&shipped_params()).unwrap();

        assert!(matches!(
            ctrl.compute_command(&Pose::origin(Frame::World), &Twist::zero(), Instant::now()),
            Err(TrajCtrlError::NoPlan)
        ));
    }

    #[test]
    fn test_plan_checks() {
        let mut ctrl = MpcController::configure(&shipped_params()).unwrap();

        let short = Path::direct(
            &Pose::origin(Frame::World),
            &Pose::new(Frame::World, 1.0, 0.0, 0.0),
            0.5,
        )
        .unwrap();
        assert!(matches!(
            ctrl.set_plan(short),
            Err(TrajCtrlError::InsufficientPathPoints {
                num_points: 3,
                min_points: 4
            })
        ));

        let vehicle_frame = Path::new_empty(Frame::Vehicle);
        assert!(matches!(
            ctrl.set_plan(vehicle_frame),
            Err(TrajCtrlError::GeomError(_))
        ));

        assert!(ctrl.set_plan(straight_plan()).is_ok());
    }

    #[test]
    fn test_speed_limit_checks() {
        let mut ctrl = MpcController::configure(&shipped_params()).unwrap();

        assert!(ctrl.set_speed_limit(0.0).is_err());
        assert!(ctrl.set_speed_limit(std::f64::NAN).is_err());
        assert_eq!(ctrl.set_speed_limit(0.3).unwrap(), 0.3);
        assert_eq!(ctrl.set_speed_limit(100.0).unwrap(), 1.0);
    }

    #[test]
    fn test_accelerates_along_straight_path() {
        let params = shipped_params();
        let mut ctrl = MpcController::configure(&params).unwrap();
        ctrl.set_plan(straight_plan()).unwrap();

        let t0 = Instant::now();
        let pose = Pose::origin(Frame::World);

        // First tick of a goal integrates over no time
        let first = ctrl.compute_command(&pose, &Twist::zero(), t0).unwrap();
        assert_eq!(first.twist.linear_ms, 0.0);
        assert!(first.diagnostics.controls[0].accel_mss > 0.0);
        assert_eq!(first.diagnostics.nearest_index, 0);
        assert_eq!(
            first.diagnostics.reference.len(),
            params.horizon.horizon_len
        );

        let second = ctrl
            .compute_command(&pose, &first.twist, t0 + Duration::from_millis(100))
            .unwrap();
        assert!(second.twist.linear_ms > 0.0);
        assert!(second.twist.angular_rads.abs() < 1e-9);
        assert_eq!(ctrl.runtime_state().last_twist, second.twist);
        assert_eq!(
            ctrl.runtime_state().warm_start.len(),
            params.horizon.horizon_len
        );
    }

    #[test]
    fn test_tracks_past_final_point() {
        let mut ctrl = MpcController::configure(&shipped_params()).unwrap();
        ctrl.set_plan(straight_plan()).unwrap();

        // The whole window is the final point, which fits a constant curve
        let past_end = Pose::new(Frame::World, 12.0, 0.0, 0.0);
        let out = ctrl
            .compute_command(&past_end, &Twist::zero(), Instant::now())
            .unwrap();

        assert_eq!(out.diagnostics.nearest_index, 20);
        assert_eq!(&out.diagnostics.coeffs[1..], &[0.0, 0.0, 0.0]);
        assert!(out.twist.is_finite());
    }
}

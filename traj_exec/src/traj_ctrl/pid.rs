//! # PID trajectory controller
//!
//! Baseline controller using a pair of PID controllers operating on the lateral error and heading
//! error to the path segment ahead of the nearest point. The lateral error is the distance between
//! the vehicle and the segment, positive if the vehicle is to the left of it. The heading error is
//! the angle from the vehicle's heading to the segment's heading, positive if the segment points
//! to the left of the vehicle.
//!
//! The controller outputs are summed into a steering demand, while the speed demand is a simple
//! proportional ramp towards the target speed. Both go through the same post-processing as the
//! MPC.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Instant;

use ctrl_if::{Path, Pose, Twist};
use log::debug;
use serde::Serialize;
use util::maths::wrap_to_pi;

use super::{
    frame,
    mpc::{check_plan, check_speed_limit},
    path::nearest_index,
    CmdPostProcessor, ControlInput, Controller, Diagnostics, Params, PidParams, TickOutput,
    TrajCtrlError,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A PID controller
#[derive(Debug, Serialize, Clone)]
pub struct PidController {
    /// Previous instant that the error was passed in
    #[serde(skip)]
    prev_time: Option<Instant>,

    /// Proportional gain
    k_p: f64,

    /// Integral gain
    k_i: f64,

    /// Dervative gain
    k_d: f64,

    /// Previous error
    prev_error: Option<f64>,

    /// The integral accumulation
    integral: f64,
}

/// Path tracker built from a lateral and a heading PID controller.
pub struct PidTracker {
    params: Params,
    gains: PidParams,

    lat_ctrl: PidController,
    head_ctrl: PidController,

    post: CmdPostProcessor,

    path: Option<Path>,
    last_twist: Twist,
    last_tick: Option<Instant>,
    speed_limit_ms: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PidController {
    /// Create a new controller with the given gains.
    pub fn new(k_p: f64, k_i: f64, k_d: f64) -> Self {
        Self {
            k_p,
            k_i,
            k_d,
            integral: 0f64,
            prev_time: None,
            prev_error: None,
        }
    }

    /// Get the value of the controller for the given error measured at `now`.
    pub fn get(&mut self, error: f64, now: Instant) -> f64 {
        let dt = self
            .prev_time
            .map(|t0| now.saturating_duration_since(t0).as_secs_f64())
            .filter(|&t| t > 0.0);

        // Without a time difference neither the integral nor the derivative can be computed, so
        // both are left out rather than producing a spike
        if let Some(t) = dt {
            self.integral += error * t;
        }

        let deriv = match (self.prev_error, dt) {
            (Some(e), Some(t)) => (error - e) / t,
            _ => 0f64,
        };

        let out = self.k_p * error + self.k_i * self.integral + self.k_d * deriv;

        // Remember the previous error and time
        self.prev_error = Some(error);
        self.prev_time = Some(now);

        out
    }
}

impl PidTracker {
    /// Lateral and heading errors of the vehicle to the segment starting at `index`.
    fn segment_errors(
        path: &Path,
        index: usize,
        pose: &Pose,
    ) -> Result<(f64, f64), TrajCtrlError> {
        let poses = path.poses();
        let start = frame::world_to_vehicle(&poses[index], pose)?;
        let end = frame::world_to_vehicle(&poses[index + 1], pose)?;

        let (mut dx, mut dy) = (end.x_m - start.x_m, end.y_m - start.y_m);
        let len = dx.hypot(dy);
        if len > std::f64::EPSILON {
            dx /= len;
            dy /= len;
        } else {
            // Repeated point, fall back on the point's own heading
            let (sin, cos) = start.heading_rad.sin_cos();
            dx = cos;
            dy = sin;
        }

        // The vehicle is at the origin, so this is the cross product of the segment direction
        // with the vector from the segment start to the vehicle
        let lat_err_m = dx * -start.y_m - dy * -start.x_m;
        let head_err_rad = wrap_to_pi(dy.atan2(dx));

        Ok((lat_err_m, head_err_rad))
    }
}

impl Controller for PidTracker {
    fn configure(params: &Params) -> Result<Self, TrajCtrlError> {
        params.validate()?;
        let gains = params.pid.ok_or(super::ConfigError::MissingPidParams)?;

        Ok(Self {
            params: params.clone(),
            gains,
            lat_ctrl: PidController::new(gains.lat_k_p, gains.lat_k_i, gains.lat_k_d),
            head_ctrl: PidController::new(gains.head_k_p, gains.head_k_i, gains.head_k_d),
            post: CmdPostProcessor::new(params.horizon, params.max_tick_gap_s),
            path: None,
            last_twist: Twist::zero(),
            last_tick: None,
            speed_limit_ms: params.horizon.max_speed_ms,
        })
    }

    fn min_plan_points(&self) -> usize {
        2
    }

    fn set_plan(&mut self, path: Path) -> Result<(), TrajCtrlError> {
        check_plan(&path, self.min_plan_points())?;

        self.path = Some(path);
        let g = &self.gains;
        self.lat_ctrl = PidController::new(g.lat_k_p, g.lat_k_i, g.lat_k_d);
        self.head_ctrl = PidController::new(g.head_k_p, g.head_k_i, g.head_k_d);
        self.last_tick = None;

        Ok(())
    }

    fn set_speed_limit(&mut self, limit_ms: f64) -> Result<f64, TrajCtrlError> {
        self.speed_limit_ms = check_speed_limit(limit_ms, self.params.horizon.max_speed_ms)?;
        Ok(self.speed_limit_ms)
    }

    fn compute_command(
        &mut self,
        pose: &Pose,
        measured: &Twist,
        now: Instant,
    ) -> Result<TickOutput, TrajCtrlError> {
        let elapsed_s = self
            .last_tick
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(0.0);
        self.last_tick = Some(now);

        let path = self.path.as_ref().ok_or(TrajCtrlError::NoPlan)?;
        let num_points = path.get_num_points();
        if num_points < 2 {
            return Err(TrajCtrlError::PathExhausted);
        }
        let nearest = nearest_index(path, pose)?;

        // The final point has no segment of its own, so track the one leading into it
        let segment = nearest.min(num_points - 2);
        let (lat_err_m, head_err_rad) = Self::segment_errors(path, segment, pose)?;

        // Steer towards the segment's heading and back onto the segment
        let steer = self.head_ctrl.get(head_err_rad, now) - self.lat_ctrl.get(lat_err_m, now);

        let target_ms = self.params.target_speed_ms.min(self.speed_limit_ms);
        let accel = (target_ms - measured.linear_ms) / self.params.horizon.step_s;

        let control = ControlInput::new(accel, steer).clamped(&self.params.horizon);
        let twist = self
            .post
            .process(&control, &self.last_twist, elapsed_s, self.speed_limit_ms);
        self.last_twist = twist;

        debug!(
            "Lateral error {:.3} m, heading error {:.3} rad -> command {:?}",
            lat_err_m, head_err_rad, twist
        );

        Ok(TickOutput {
            twist,
            diagnostics: Diagnostics {
                nearest_index: nearest,
                controls: vec![control],
                lat_error_m: Some(lat_err_m),
                head_error_rad: Some(head_err_rad),
                ..Default::default()
            },
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::traj_ctrl::{params::test::shipped_params, ControllerKind};
    use approx::assert_relative_eq;
    use ctrl_if::Frame;
    use std::time::Duration;

    #[test]
    fn test_pid_terms() {
        let mut pid = PidController::new(2.0, 1.0, 0.5);
        let t0 = Instant::now();

        // First call has no time difference, so proportional only
        assert_relative_eq!(pid.get(1.0, t0), 2.0);

        // After 0.5 s: integral = 0.5 * 2.0 = 1.0, derivative = (2.0 - 1.0) / 0.5 = 2.0
        let out = pid.get(2.0, t0 + Duration::from_millis(500));
        assert_relative_eq!(out, 2.0 * 2.0 + 1.0 * 1.0 + 0.5 * 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_steers_back_onto_path() {
        let mut params = shipped_params();
        params.controller = ControllerKind::Pid;
        let mut pid = PidTracker::configure(&params).unwrap();

        pid.set_plan(
            Path::direct(
                &Pose::origin(Frame::World),
                &Pose::new(Frame::World, 10.0, 0.0, 0.0),
                0.5,
            )
            .unwrap(),
        )
        .unwrap();

        // Vehicle is 0.5 m to the left of the path, driving parallel to it
        let pose = Pose::new(Frame::World, 2.1, 0.5, 0.0);
        let t0 = Instant::now();
        let moving = Twist::new(0.5, 0.0);

        let out = pid.compute_command(&pose, &moving, t0).unwrap();
        assert_relative_eq!(out.diagnostics.lat_error_m.unwrap(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(out.diagnostics.head_error_rad.unwrap(), 0.0, epsilon = 1e-12);
        assert!(out.diagnostics.controls[0].steer_rate_rads < 0.0);

        let out = pid
            .compute_command(&pose, &out.twist, t0 + Duration::from_millis(100))
            .unwrap();
        assert!(out.twist.linear_ms > 0.0);
        assert!(out.twist.angular_rads < 0.0);
    }

    #[test]
    fn test_tracks_final_segment_near_end() {
        let mut pid = PidTracker::configure(&shipped_params()).unwrap();
        pid.set_plan(
            Path::direct(
                &Pose::origin(Frame::World),
                &Pose::new(Frame::World, 10.0, 0.0, 0.0),
                0.5,
            )
            .unwrap(),
        )
        .unwrap();

        // Nearest the final point but 5 m to the left of the path
        let pose = Pose::new(Frame::World, 10.0, 5.0, 0.0);
        let out = pid
            .compute_command(&pose, &Twist::zero(), Instant::now())
            .unwrap();

        assert_eq!(out.diagnostics.nearest_index, 20);
        assert_relative_eq!(out.diagnostics.lat_error_m.unwrap(), 5.0, epsilon = 1e-12);
        assert!(out.twist.is_finite());
    }
}

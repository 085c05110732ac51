//! # Kinematic simulator
//!
//! Stands in for the vehicle and its localisation when running the controller without hardware.
//! Commands are applied directly to a unicycle model and the resulting pose is pushed into a
//! `LocMgr` for the controller to read back.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use ctrl_if::{Frame, Pose, Twist};
use serde::Serialize;
use util::maths::wrap_to_pi;

use crate::loc::{LocError, LocMgr};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A simulated vehicle.
#[derive(Debug, Clone)]
pub struct SimVehicle {
    pose: Pose,
    twist: Twist,
    loc: LocMgr,
}

/// A single simulated state, as archived by the executable.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SimRecord {
    pub time_s: f64,
    pub x_m: f64,
    pub y_m: f64,
    pub heading_rad: f64,
    pub linear_ms: f64,
    pub angular_rads: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimVehicle {
    /// Create a stationary vehicle at `start`, publishing its pose into `loc`.
    pub fn new(start: Pose, loc: LocMgr) -> Result<Self, LocError> {
        loc.set_pose(start, Some(Twist::zero()))?;

        Ok(Self {
            pose: start,
            twist: Twist::zero(),
            loc,
        })
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn twist(&self) -> &Twist {
        &self.twist
    }

    /// Apply `cmd` for `dt_s` seconds and publish the new pose.
    ///
    /// The heading used for the position update is the midpoint heading over the step.
    pub fn step(&mut self, cmd: &Twist, dt_s: f64) -> Result<(), LocError> {
        let mid_heading = self.pose.heading_rad + 0.5 * cmd.angular_rads * dt_s;

        self.pose = Pose::new(
            Frame::World,
            self.pose.x_m + cmd.linear_ms * mid_heading.cos() * dt_s,
            self.pose.y_m + cmd.linear_ms * mid_heading.sin() * dt_s,
            wrap_to_pi(self.pose.heading_rad + cmd.angular_rads * dt_s),
        );
        self.twist = *cmd;

        self.loc.set_pose(self.pose, Some(self.twist))
    }

    pub fn record(&self, time_s: f64) -> SimRecord {
        SimRecord {
            time_s,
            x_m: self.pose.x_m,
            y_m: self.pose.y_m,
            heading_rad: self.pose.heading_rad,
            linear_ms: self.twist.linear_ms,
            angular_rads: self.twist.angular_rads,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

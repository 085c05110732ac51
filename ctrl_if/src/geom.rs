//! # Geometry interface types
//!
//! Poses and paths are always tagged with the frame they are expressed in. The controller works
//! with two frames:
//!
//! - `World` - the fixed frame the path is planned in (the "map").
//! - `Vehicle` - the frame attached to the vehicle, origin at the vehicle's reference point with
//!   the +ve X axis pointing along the vehicle's heading.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The frame a pose or path is expressed in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    World,
    Vehicle,
}

#[derive(Debug, thiserror::Error)]
pub enum GeomError {
    #[error("Expected a pose in the {expected:?} frame but found one in the {found:?} frame")]
    FrameMismatch { expected: Frame, found: Frame },

    #[error("Point separation must be positive and finite, found {0}")]
    InvalidSeparation(f64),

    #[error("Circle radius must be positive and finite, found {0}")]
    InvalidRadius(f64),

    #[error("Attempted to create a path between two coincident points")]
    CoincidentPoints,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A 2D pose (position and heading) in a given frame.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// The frame this pose is expressed in
    pub frame: Frame,

    /// X position in meters
    pub x_m: f64,

    /// Y position in meters
    pub y_m: f64,

    /// Heading (angle to the +ve X axis) in radians, right hand rule about +ve Z
    pub heading_rad: f64,
}

/// A velocity command or measurement.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    /// Linear speed along the vehicle's +ve X axis in meters/second
    pub linear_ms: f64,

    /// Angular rate about the vehicle's +ve Z axis in radians/second
    pub angular_rads: f64,
}

/// An ordered sequence of poses, all in the same frame. Insertion order is traversal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    frame: Frame,
    poses: Vec<Pose>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Pose {
    pub fn new(frame: Frame, x_m: f64, y_m: f64, heading_rad: f64) -> Self {
        Self {
            frame,
            x_m,
            y_m,
            heading_rad,
        }
    }

    /// The origin of the given frame, pointing along +ve X.
    pub fn origin(frame: Frame) -> Self {
        Self::new(frame, 0.0, 0.0, 0.0)
    }

    /// Squared euclidean distance between the positions of two poses.
    ///
    /// Frames are not checked, callers are responsible for comparing poses in the same frame.
    pub fn distance_sq(&self, other: &Pose) -> f64 {
        (self.x_m - other.x_m).powi(2) + (self.y_m - other.y_m).powi(2)
    }

    /// Euclidean distance between the positions of two poses.
    pub fn distance(&self, other: &Pose) -> f64 {
        self.distance_sq(other).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x_m.is_finite() && self.y_m.is_finite() && self.heading_rad.is_finite()
    }

    /// Returns an error if this pose is not in the expected frame.
    pub fn check_frame(&self, expected: Frame) -> Result<(), GeomError> {
        if self.frame == expected {
            Ok(())
        } else {
            Err(GeomError::FrameMismatch {
                expected,
                found: self.frame,
            })
        }
    }
}

impl Twist {
    pub fn new(linear_ms: f64, angular_rads: f64) -> Self {
        Self {
            linear_ms,
            angular_rads,
        }
    }

    /// A stationary twist.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_finite(&self) -> bool {
        self.linear_ms.is_finite() && self.angular_rads.is_finite()
    }
}

impl Path {
    /// Create a new empty path in the given frame
    pub fn new_empty(frame: Frame) -> Self {
        Self {
            frame,
            poses: Vec::new(),
        }
    }

    /// Create a path from a sequence of poses, all of which must be in `frame`.
    pub fn from_poses(frame: Frame, poses: Vec<Pose>) -> Result<Self, GeomError> {
        for pose in poses.iter() {
            pose.check_frame(frame)?;
        }

        Ok(Self { frame, poses })
    }

    /// Produces a direct path between the two poses, with each point in the path having at most
    /// the given separation. The heading of every point is the heading of the line.
    pub fn direct(from: &Pose, to: &Pose, point_sep_m: f64) -> Result<Self, GeomError> {
        if !(point_sep_m > 0.0 && point_sep_m.is_finite()) {
            return Err(GeomError::InvalidSeparation(point_sep_m));
        }
        to.check_frame(from.frame)?;

        let dist_m = from.distance(to);
        if dist_m <= std::f64::EPSILON {
            return Err(GeomError::CoincidentPoints);
        }

        let heading_rad = (to.y_m - from.y_m).atan2(to.x_m - from.x_m);

        // Number of segments needed so that no two points are further apart than the separation
        let num_segs = (dist_m / point_sep_m).ceil() as usize;

        let poses = (0..=num_segs)
            .map(|i| {
                let frac = i as f64 / num_segs as f64;
                Pose::new(
                    from.frame,
                    from.x_m + frac * (to.x_m - from.x_m),
                    from.y_m + frac * (to.y_m - from.y_m),
                    heading_rad,
                )
            })
            .collect();

        Ok(Self {
            frame: from.frame,
            poses,
        })
    }

    /// Produces a circular arc starting at `start`, tangent to its heading and turning to the
    /// left, sweeping through `sweep_rad` with points separated by `point_sep_m` along the arc.
    pub fn circle(
        start: &Pose,
        radius_m: f64,
        sweep_rad: f64,
        point_sep_m: f64,
    ) -> Result<Self, GeomError> {
        if !(point_sep_m > 0.0 && point_sep_m.is_finite()) {
            return Err(GeomError::InvalidSeparation(point_sep_m));
        }
        if !(radius_m > 0.0 && radius_m.is_finite()) {
            return Err(GeomError::InvalidRadius(radius_m));
        }

        // Centre of rotation is one radius away along the left normal of the start heading
        let centre_x = start.x_m - radius_m * start.heading_rad.sin();
        let centre_y = start.y_m + radius_m * start.heading_rad.cos();

        let num_points = ((sweep_rad.abs() * radius_m) / point_sep_m).ceil() as usize + 1;
        let delta_rad = point_sep_m / radius_m;

        let poses = (0..num_points)
            .map(|i| {
                let head_rad = start.heading_rad + (i as f64 * delta_rad).min(sweep_rad.abs());
                Pose::new(
                    start.frame,
                    centre_x + radius_m * head_rad.sin(),
                    centre_y - radius_m * head_rad.cos(),
                    head_rad,
                )
            })
            .collect();

        Ok(Self {
            frame: start.frame,
            poses,
        })
    }

    /// Append a pose to the end of the path.
    pub fn push(&mut self, pose: Pose) -> Result<(), GeomError> {
        pose.check_frame(self.frame)?;
        self.poses.push(pose);
        Ok(())
    }

    /// Check that every pose in the path is tagged with the path's frame. Paths built through
    /// the constructors always pass, deserialised paths may not.
    pub fn validate(&self) -> Result<(), GeomError> {
        self.poses
            .iter()
            .try_for_each(|pose| pose.check_frame(self.frame))
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn last(&self) -> Option<&Pose> {
        self.poses.last()
    }

    /// Get the number of points in the path
    pub fn get_num_points(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Return the length of the path in meters.
    ///
    /// If the path has fewer than two points `None` is returned.
    pub fn get_length(&self) -> Option<f64> {
        if self.poses.len() < 2 {
            return None;
        }

        Some(self.poses.windows(2).map(|w| w[0].distance(&w[1])).sum())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

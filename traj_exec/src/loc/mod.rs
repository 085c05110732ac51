//! # Localisation module
//!
//! The controller doesn't perform localisation itself, it consumes a pose estimate from a
//! `LocSource`. `LocMgr` is a simple source holding the most recent estimate pushed into it by
//! whatever is doing the localisation (in this workspace, the kinematic simulator).

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use ctrl_if::{Frame, GeomError, Pose, Twist};
use log::trace;

use crate::traj_ctrl::frame;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// How often the pose is polled while waiting for one to become available.
const POSE_POLL_PERIOD: Duration = Duration::from_millis(1);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A source of the vehicle's pose and velocity.
pub trait LocSource: Send {
    /// Get the pose of the origin of the `from` frame expressed in the `to` frame, waiting at most
    /// `timeout` for it to become available.
    fn get_current_pose(
        &self,
        from: Frame,
        to: Frame,
        timeout: Duration,
    ) -> Result<Pose, LocError>;

    /// Get the measured velocity of the vehicle, if there is one.
    fn get_current_velocity(&self) -> Option<Twist>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Holds the latest pose estimate of the vehicle. Clones share the same estimate.
#[derive(Debug, Clone, Default)]
pub struct LocMgr {
    estimate: Arc<RwLock<Option<Estimate>>>,
}

#[derive(Debug, Copy, Clone)]
struct Estimate {
    pose: Pose,
    velocity: Option<Twist>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LocError {
    #[error("The {from:?} to {to:?} transform was not available within {timeout:?}")]
    TransformUnavailable {
        from: Frame,
        to: Frame,
        timeout: Duration,
    },

    #[error("The pose estimate lock is poisoned")]
    LockPoisoned,

    #[error(transparent)]
    GeomError(#[from] GeomError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LocMgr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the World frame pose of the vehicle, along with its measured velocity if known.
    pub fn set_pose(&self, pose: Pose, velocity: Option<Twist>) -> Result<(), LocError> {
        pose.check_frame(Frame::World)?;

        let mut estimate = self.estimate.write().map_err(|_| LocError::LockPoisoned)?;
        *estimate = Some(Estimate { pose, velocity });

        Ok(())
    }

    /// Forget the current estimate.
    pub fn clear(&self) -> Result<(), LocError> {
        *self.estimate.write().map_err(|_| LocError::LockPoisoned)? = None;
        Ok(())
    }

    fn get_estimate(&self) -> Result<Option<Estimate>, LocError> {
        Ok(*self.estimate.read().map_err(|_| LocError::LockPoisoned)?)
    }
}

impl LocSource for LocMgr {
    fn get_current_pose(
        &self,
        from: Frame,
        to: Frame,
        timeout: Duration,
    ) -> Result<Pose, LocError> {
        let deadline = Instant::now() + timeout;

        let estimate = loop {
            if let Some(e) = self.get_estimate()? {
                break e;
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LocError::TransformUnavailable { from, to, timeout });
            }
            thread::sleep(POSE_POLL_PERIOD.min(deadline - now));
        };

        trace!("Vehicle pose estimate: {:?}", estimate.pose);

        match (from, to) {
            (Frame::Vehicle, Frame::World) => Ok(estimate.pose),
            (Frame::World, Frame::Vehicle) => Ok(frame::world_to_vehicle(
                &Pose::origin(Frame::World),
                &estimate.pose,
            )?),
            // Identity
            (_, to) => Ok(Pose::origin(to)),
        }
    }

    fn get_current_velocity(&self) -> Option<Twist> {
        self.get_estimate().ok().flatten().and_then(|e| e.velocity)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_unavailable_until_set() {
        let loc = LocMgr::new();
        let timeout = Duration::from_millis(5);

        assert!(matches!(
            loc.get_current_pose(Frame::Vehicle, Frame::World, timeout),
            Err(LocError::TransformUnavailable { .. })
        ));
        assert!(loc.get_current_velocity().is_none());

        // Clones share the estimate
        let writer = loc.clone();
        writer
            .set_pose(
                Pose::new(Frame::World, 1.0, 2.0, FRAC_PI_2),
                Some(Twist::new(0.5, 0.0)),
            )
            .unwrap();

        let pose = loc
            .get_current_pose(Frame::Vehicle, Frame::World, timeout)
            .unwrap();
        assert_eq!(pose, Pose::new(Frame::World, 1.0, 2.0, FRAC_PI_2));
        assert_eq!(loc.get_current_velocity(), Some(Twist::new(0.5, 0.0)));

        loc.clear().unwrap();
        assert!(loc
            .get_current_pose(Frame::Vehicle, Frame::World, timeout)
            .is_err());
    }

    #[test]
    fn test_inverse_transform() {
        let loc = LocMgr::new();
        loc.set_pose(Pose::new(Frame::World, 1.0, 2.0, FRAC_PI_2), None)
            .unwrap();

        // The World origin seen from the vehicle
        let pose = loc
            .get_current_pose(Frame::World, Frame::Vehicle, Duration::from_millis(5))
            .unwrap();

        assert_eq!(pose.frame, Frame::Vehicle);
        assert_relative_eq!(pose.x_m, -2.0, epsilon = 1e-12);
        assert_relative_eq!(pose.y_m, 1.0, epsilon = 1e-12);
        assert_relative_eq!(pose.heading_rad, -FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_vehicle_frame_pose() {
        let loc = LocMgr::new();
        assert!(matches!(
            loc.set_pose(Pose::origin(Frame::Vehicle), None),
            Err(LocError::GeomError(_))
        ));
    }
}

//! # Frame transforms
//!
//! Moves poses between the World frame and the Vehicle frame. The Vehicle frame has its origin at
//! the vehicle's reference point with +ve X along the vehicle's heading, so expressing the path in
//! it puts the vehicle at `(0, 0, 0)` at the start of every tick.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use ctrl_if::{Frame, GeomError, Path, Pose};
use nalgebra::{Isometry2, Point2, Vector2};
use util::maths::wrap_to_pi;

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Express a World frame pose relative to the vehicle at `vehicle` (also in the World frame).
pub fn world_to_vehicle(pose: &Pose, vehicle: &Pose) -> Result<Pose, GeomError> {
    pose.check_frame(Frame::World)?;
    vehicle.check_frame(Frame::World)?;

    let point = vehicle_isometry(vehicle).inverse_transform_point(&Point2::new(pose.x_m, pose.y_m));

    Ok(Pose::new(
        Frame::Vehicle,
        point.x,
        point.y,
        wrap_to_pi(pose.heading_rad - vehicle.heading_rad),
    ))
}

/// Express a Vehicle frame pose in the World frame, given the vehicle's World frame pose.
pub fn vehicle_to_world(pose: &Pose, vehicle: &Pose) -> Result<Pose, GeomError> {
    pose.check_frame(Frame::Vehicle)?;
    vehicle.check_frame(Frame::World)?;

    let point = vehicle_isometry(vehicle).transform_point(&Point2::new(pose.x_m, pose.y_m));

    Ok(Pose::new(
        Frame::World,
        point.x,
        point.y,
        wrap_to_pi(pose.heading_rad + vehicle.heading_rad),
    ))
}

/// Transform a slice of World frame poses into the Vehicle frame.
pub fn poses_to_vehicle(poses: &[Pose], vehicle: &Pose) -> Result<Vec<Pose>, GeomError> {
    poses.iter().map(|p| world_to_vehicle(p, vehicle)).collect()
}

/// Transform a whole World frame path into the Vehicle frame.
pub fn path_to_vehicle(path: &Path, vehicle: &Pose) -> Result<Path, GeomError> {
    if path.frame() != Frame::World {
        return Err(GeomError::FrameMismatch {
            expected: Frame::World,
            found: path.frame(),
        });
    }

    Path::from_poses(Frame::Vehicle, poses_to_vehicle(path.poses(), vehicle)?)
}

/// The isometry taking Vehicle frame points into the World frame.
fn vehicle_isometry(vehicle: &Pose) -> Isometry2<f64> {
    Isometry2::new(Vector2::new(vehicle.x_m, vehicle.y_m), vehicle.heading_rad)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_point_ahead_of_vehicle() {
        // Vehicle at (1, 1) facing +ve Y, a point at (1, 3) is 2 m straight ahead
        let vehicle = Pose::new(Frame::World, 1.0, 1.0, FRAC_PI_2);
        let point = Pose::new(Frame::World, 1.0, 3.0, FRAC_PI_2);

        let local = world_to_vehicle(&point, &vehicle).unwrap();

        assert_eq!(local.frame, Frame::Vehicle);
        assert_relative_eq!(local.x_m, 2.0, epsilon = 1e-12);
        assert_relative_eq!(local.y_m, 0.0, epsilon = 1e-12);
        assert_relative_eq!(local.heading_rad, 0.0, epsilon = 1e-12);

        // A point to the vehicle's right (+ve X in the World frame) has -ve Y
        let right = Pose::new(Frame::World, 2.0, 1.0, 0.0);
        let local = world_to_vehicle(&right, &vehicle).unwrap();
        assert_relative_eq!(local.x_m, 0.0, epsilon = 1e-12);
        assert_relative_eq!(local.y_m, -1.0, epsilon = 1e-12);
        assert_relative_eq!(local.heading_rad, -FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_headings_are_wrapped() {
        let vehicle = Pose::new(Frame::World, 0.0, 0.0, -3.0);
        let point = Pose::new(Frame::World, 0.0, 0.0, 3.0);

        let local = world_to_vehicle(&point, &vehicle).unwrap();

        assert!(local.heading_rad > -PI && local.heading_rad <= PI);
        assert_relative_eq!(local.heading_rad, 6.0 - 2.0 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip() {
        let vehicle = Pose::new(Frame::World, -4.0, 2.5, 2.2);
        let point = Pose::new(Frame::World, 3.0, -1.0, -0.7);

        let back = vehicle_to_world(&world_to_vehicle(&point, &vehicle).unwrap(), &vehicle).unwrap();

        assert_relative_eq!(back.x_m, point.x_m, epsilon = 1e-9);
        assert_relative_eq!(back.y_m, point.y_m, epsilon = 1e-9);
        assert_relative_eq!(back.heading_rad, point.heading_rad, epsilon = 1e-9);
    }

    #[test]
    fn test_wrong_frame_rejected() {
        let vehicle = Pose::origin(Frame::Vehicle);
        let point = Pose::origin(Frame::World);

        assert!(matches!(
            world_to_vehicle(&point, &vehicle),
            Err(GeomError::FrameMismatch { .. })
        ));

        let path = Path::new_empty(Frame::Vehicle);
        assert!(path_to_vehicle(&path, &Pose::origin(Frame::World)).is_err());
    }
}

//! # Path queries
//!
//! Finding where the vehicle is along the path and extracting the window of the path the horizon
//! covers.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use ctrl_if::{GeomError, Path, Pose};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("The path is empty")]
    EmptyPath,

    #[error("Index {index} is outside of the path, which has {len} points")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("The path has {num_points} points, at least 2 are needed to follow it")]
    PathExhausted { num_points: usize },

    #[error("Cannot locate a non-finite pose on the path: {0:?}")]
    NonFinitePose(Pose),

    #[error("Resample separation must be positive and finite, found {0}")]
    InvalidSeparation(f64),

    #[error(transparent)]
    GeomError(#[from] GeomError),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Find the index of the path point closest to the given pose.
///
/// The full path is scanned. If two points are equally close the lowest index is returned.
pub fn nearest_index(path: &Path, pose: &Pose) -> Result<usize, PathError> {
    pose.check_frame(path.frame())?;
    if !pose.is_finite() {
        return Err(PathError::NonFinitePose(*pose));
    }

    let mut best: Option<(usize, f64)> = None;

    for (i, point) in path.poses().iter().enumerate() {
        let dist_sq = point.distance_sq(pose);

        match best {
            Some((_, best_dist_sq)) if dist_sq >= best_dist_sq => (),
            _ => best = Some((i, dist_sq)),
        }
    }

    best.map(|(i, _)| i).ok_or(PathError::EmptyPath)
}

/// Resample `num_points` poses along the path starting at `start_index`.
///
/// Sample `k` lies `k * sep_m` along the polyline from the start point, linearly interpolated
/// between path points and taking the heading of the segment it lies on. Once the end of the path
/// is reached the final point is repeated, so the result always has exactly `num_points` poses,
/// even when `start_index` is the final point.
///
/// Only a path with fewer than 2 points is exhausted.
pub fn resample_horizon(
    path: &Path,
    start_index: usize,
    num_points: usize,
    sep_m: f64,
) -> Result<Vec<Pose>, PathError> {
    if !(sep_m > 0.0 && sep_m.is_finite()) {
        return Err(PathError::InvalidSeparation(sep_m));
    }

    let poses = path.poses();
    if poses.is_empty() {
        return Err(PathError::EmptyPath);
    }
    if poses.len() < 2 {
        return Err(PathError::PathExhausted {
            num_points: poses.len(),
        });
    }
    if start_index >= poses.len() {
        return Err(PathError::IndexOutOfRange {
            index: start_index,
            len: poses.len(),
        });
    }

    let remaining = &poses[start_index..];

    let mut samples = Vec::with_capacity(num_points);
    if num_points == 0 {
        return Ok(samples);
    }
    samples.push(remaining[0]);

    // Current segment is remaining[seg] -> remaining[seg + 1], which starts seg_start_m along
    // the polyline
    let mut seg = 0;
    let mut seg_start_m = 0.0;

    for k in 1..num_points {
        let target_m = k as f64 * sep_m;

        while seg + 1 < remaining.len() {
            let seg_len_m = remaining[seg].distance(&remaining[seg + 1]);
            if seg_start_m + seg_len_m >= target_m && seg_len_m > 0.0 {
                break;
            }
            seg_start_m += seg_len_m;
            seg += 1;
        }

        if seg + 1 >= remaining.len() {
            // Ran off the end, pad with the final point
            samples.push(remaining[remaining.len() - 1]);
            continue;
        }

        let start = &remaining[seg];
        let end = &remaining[seg + 1];
        let seg_len_m = start.distance(end);
        let frac = (target_m - seg_start_m) / seg_len_m;

        samples.push(Pose::new(
            path.frame(),
            start.x_m + frac * (end.x_m - start.x_m),
            start.y_m + frac * (end.y_m - start.y_m),
            (end.y_m - start.y_m).atan2(end.x_m - start.x_m),
        ));
    }

    Ok(samples)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use ctrl_if::Frame;
    use proptest::prelude::*;

    fn straight_line() -> Path {
        Path::direct(
            &Pose::origin(Frame::World),
            &Pose::new(Frame::World, 10.0, 0.0, 0.0),
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn test_nearest_on_straight_line() {
        let path = straight_line();

        // Exactly between 4 and 5, lowest index wins
        assert_eq!(
            nearest_index(&path, &Pose::new(Frame::World, 4.5, 0.0, 0.0)).unwrap(),
            4
        );
        assert_eq!(
            nearest_index(&path, &Pose::new(Frame::World, 4.6, 1.0, 0.0)).unwrap(),
            5
        );
        assert_eq!(
            nearest_index(&path, &Pose::new(Frame::World, -3.0, 0.0, 0.0)).unwrap(),
            0
        );
    }

    #[test]
    fn test_nearest_errors() {
        assert!(matches!(
            nearest_index(&Path::new_empty(Frame::World), &Pose::origin(Frame::World)),
            Err(PathError::EmptyPath)
        ));
        assert!(matches!(
            nearest_index(&straight_line(), &Pose::origin(Frame::Vehicle)),
            Err(PathError::GeomError(_))
        ));
        assert!(matches!(
            nearest_index(
                &straight_line(),
                &Pose::new(Frame::World, std::f64::NAN, 0.0, 0.0)
            ),
            Err(PathError::NonFinitePose(_))
        ));
    }

    #[test]
    fn test_resample_interpolates() {
        let path = straight_line();
        let samples = resample_horizon(&path, 2, 6, 0.4).unwrap();

        assert_eq!(samples.len(), 6);
        for (k, s) in samples.iter().enumerate() {
            assert_relative_eq!(s.x_m, 2.0 + 0.4 * k as f64, epsilon = 1e-9);
            assert_relative_eq!(s.y_m, 0.0);
            assert_relative_eq!(s.heading_rad, 0.0);
        }
    }

    #[test]
    fn test_resample_pads_with_last_point() {
        let path = straight_line();
        let samples = resample_horizon(&path, 8, 10, 0.5).unwrap();

        assert_eq!(samples.len(), 10);
        assert_relative_eq!(samples[4].x_m, 10.0, epsilon = 1e-9);
        for s in &samples[5..] {
            assert_eq!(s, path.last().unwrap());
        }
    }

    #[test]
    fn test_resample_follows_corners() {
        let mut path = Path::new_empty(Frame::World);
        path.push(Pose::new(Frame::World, 0.0, 0.0, 0.0)).unwrap();
        path.push(Pose::new(Frame::World, 1.0, 0.0, 0.0)).unwrap();
        path.push(Pose::new(Frame::World, 1.0, 0.0, 0.0)).unwrap();
        path.push(Pose::new(Frame::World, 1.0, 1.0, 0.0)).unwrap();

        let samples = resample_horizon(&path, 0, 4, 0.75).unwrap();

        assert_relative_eq!(samples[1].x_m, 0.75, epsilon = 1e-12);
        assert_relative_eq!(samples[1].heading_rad, 0.0);
        assert_relative_eq!(samples[2].x_m, 1.0, epsilon = 1e-12);
        assert_relative_eq!(samples[2].y_m, 0.5, epsilon = 1e-12);
        assert_relative_eq!(samples[2].heading_rad, std::f64::consts::FRAC_PI_2);
        assert_eq!(samples[3], path.poses()[3]);
    }

    #[test]
    fn test_resample_from_final_point() {
        let path = straight_line();
        let samples = resample_horizon(&path, 10, 5, 0.5).unwrap();

        assert_eq!(samples.len(), 5);
        for s in &samples {
            assert_eq!(s, path.last().unwrap());
        }
    }

    #[test]
    fn test_resample_exhausted() {
        let single = Path::from_poses(Frame::World, vec![Pose::origin(Frame::World)]).unwrap();

        assert!(matches!(
            resample_horizon(&single, 0, 5, 0.5),
            Err(PathError::PathExhausted { num_points: 1 })
        ));
        assert!(matches!(
            resample_horizon(&straight_line(), 11, 5, 0.5),
            Err(PathError::IndexOutOfRange { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_nearest_is_minimal(
            points in prop::collection::vec((-50.0..50.0f64, -50.0..50.0f64), 2..40),
            x in -60.0..60.0f64,
            y in -60.0..60.0f64,
        ) {
            let poses = points
                .iter()
                .map(|&(px, py)| Pose::new(Frame::World, px, py, 0.0))
                .collect();
            let path = Path::from_poses(Frame::World, poses).unwrap();
            let pose = Pose::new(Frame::World, x, y, 0.0);

            let nearest = nearest_index(&path, &pose).unwrap();
            prop_assert!(nearest < path.get_num_points());

            let best = path.poses()[nearest].distance_sq(&pose);
            for (i, p) in path.poses().iter().enumerate() {
                let d = p.distance_sq(&pose);
                prop_assert!(d >= best);
                if i < nearest {
                    prop_assert!(d > best);
                }
            }
        }

        #[test]
        fn prop_resample_has_fixed_length(
            start in 0usize..11,
            num_points in 1usize..40,
            sep in 0.05..3.0f64,
        ) {
            let samples = resample_horizon(&straight_line(), start, num_points, sep).unwrap();
            prop_assert_eq!(samples.len(), num_points);
        }
    }
}

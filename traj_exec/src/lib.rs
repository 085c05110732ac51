//! # Trajectory execution library.
//!
//! This library allows the executable, the integration tests and the benchmarks to access the
//! items defined inside the trajectory execution crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Localisation interface - provides the controller with the vehicle's pose and velocity
pub mod loc;

/// Control loop scheduling - drives a controller at a fixed period and tracks the goal's state
pub mod sched;

/// Kinematic simulator - integrates velocity commands into a pose for closed loop testing
pub mod sim;

/// Trajectory control module - keeps the vehicle on the given path
pub mod traj_ctrl;

//! # Control interface crate.
//!
//! Provides the types exchanged between the trajectory controller and the collaborators around
//! it: the localisation source, the goal framework which accepts and cancels paths, and whoever
//! consumes the velocity commands.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Frame-tagged poses, paths and velocity twists
pub mod geom;

/// Goal feedback, outcomes and path specifications
pub mod goal;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use geom::{Frame, GeomError, Path, Pose, Twist};
pub use goal::{Feedback, GoalOutcome, PathSpec, PathSpecError};

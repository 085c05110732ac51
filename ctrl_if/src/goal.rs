//! # Goal interface types
//!
//! The goal framework (accepting, cancelling and reporting on "follow path" goals) lives outside
//! the controller. These are the records exchanged with it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use structopt::StructOpt;

use crate::geom::{Frame, GeomError, Path, Pose};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Feedback published once per control tick while a goal is active.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Time since the goal was accepted in seconds
    pub elapsed_s: f64,

    /// Linear speed of the command issued this tick in meters/second
    pub speed_ms: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How a goal ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GoalOutcome {
    /// The end of the path was reached
    Succeeded {
        /// Total time spent on the goal in seconds
        total_time_s: f64,
    },

    /// The goal was cancelled by the goal framework
    Cancelled,

    /// The goal could not be completed, the reason is given
    Aborted(String),
}

/// Specifies a path to follow.
#[derive(Debug, Clone, Serialize, Deserialize, StructOpt)]
pub enum PathSpec {
    /// A straight line from the start pose to the given point in the World frame
    #[structopt(name = "line")]
    Line {
        /// The x-coordinate of the end of the line
        x_m: f64,

        /// The y-coordinate of the end of the line
        y_m: f64,

        /// The separation between each point in the path
        #[structopt(long = "sep", default_value = "0.5")]
        separation_m: f64,
    },

    /// A left hand circular arc starting at the start pose
    #[structopt(name = "circle")]
    Circle {
        /// The radius of the circle
        radius_m: f64,

        /// The angle swept by the arc, in radians
        #[structopt(long = "sweep", default_value = "4.71238898")]
        sweep_rad: f64,

        /// The separation between each point in the path
        #[structopt(long = "sep", default_value = "0.5")]
        separation_m: f64,
    },

    /// A JSON path file to load
    #[structopt(name = "file")]
    File {
        /// The path to the file to load
        path: PathBuf,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PathSpecError {
    #[error("Invalid path geometry: {0}")]
    GeomError(#[from] GeomError),

    #[error("Cannot read the path file: {0}")]
    FileLoadError(std::io::Error),

    #[error("Cannot parse the path file: {0}")]
    DeserialiseError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GoalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GoalOutcome::Succeeded { .. })
    }
}

impl PathSpec {
    /// Build the World frame path described by this spec. Line and circle paths start at `start`.
    pub fn into_path(self, start: &Pose) -> Result<Path, PathSpecError> {
        match self {
            PathSpec::Line {
                x_m,
                y_m,
                separation_m,
            } => Ok(Path::direct(
                start,
                &Pose::new(Frame::World, x_m, y_m, start.heading_rad),
                separation_m,
            )?),
            PathSpec::Circle {
                radius_m,
                sweep_rad,
                separation_m,
            } => Ok(Path::circle(start, radius_m, sweep_rad, separation_m)?),
            PathSpec::File { path } => {
                let path_str =
                    std::fs::read_to_string(path).map_err(PathSpecError::FileLoadError)?;
                let path: Path =
                    serde_json::from_str(&path_str).map_err(PathSpecError::DeserialiseError)?;
                path.validate()?;
                if path.frame() != Frame::World {
                    return Err(GeomError::FrameMismatch {
                        expected: Frame::World,
                        found: path.frame(),
                    }
                    .into());
                }
                Ok(path)
            }
        }
    }
}

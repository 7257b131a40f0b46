//! Error types for terratin.
//!
//! This module defines all error types used throughout the library.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`TinError`].
pub type Result<T> = std::result::Result<T, TinError>;

/// Errors that can occur during tile mesh generation.
///
/// Only genuine invariant violations surface as errors; recoverable data
/// gaps (missing border files, `NO_DATA` samples, off-mesh queries) degrade
/// to documented fallbacks instead.
#[derive(Error, Debug)]
pub enum TinError {
    /// The DEM is missing elevation data at a tile corner.
    #[error("DEM corner ({x}, {y}) has no data")]
    MissingCorner {
        /// Grid column of the corner.
        x: usize,
        /// Grid row of the corner.
        y: usize,
    },

    /// A point could not be inserted into the triangulation.
    #[error("cannot insert point ({lon}, {lat}) into the triangulation")]
    BadInsertion {
        /// Longitude of the rejected point.
        lon: f64,
        /// Latitude of the rejected point.
        lat: f64,
    },

    /// A burned-in constraint did not materialize as a mesh edge.
    #[error("constraint ({0}, {1}) -> ({2}, {3}) is not a mesh edge")]
    ConstraintNotAnEdge(f64, f64, f64, f64),

    /// Internal bookkeeping no longer matches the triangulation.
    #[error("mesh topology inconsistency: {0}")]
    Topology(&'static str),

    /// A straight-line walk could not cross a triangle boundary.
    #[error("marching walk failed to cross a triangle edge")]
    MarchIntersection,

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error writing a border match file.
    #[error("failed to write border file {path}: {message}")]
    BorderWrite {
        /// The file path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl TinError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        TinError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }
}

//! Error types for point stacking runs.
//!
//! Only conditions that abort a whole run are represented here. Per-feature
//! problems (missing clustering attribute, missing sort value, missing
//! propagated attribute, empty geometry) are logged and skipped inside the
//! clustering passes and never surface as an error.

use thiserror::Error;

/// Result type alias for stacking operations.
pub type StackResult<T> = Result<T, StackError>;

#[derive(Error, Debug)]
pub enum StackError {
    /// No coordinate mapping exists between the data and the output window.
    #[error("no transform path from {from} to {to}")]
    NoTransformPath { from: String, to: String },

    /// A single coordinate could not be mapped.
    #[error("failed to transform coordinate ({x}, {y}): {reason}")]
    TransformFailed { x: f64, y: f64, reason: String },

    /// Grid clustering was requested without a usable cell size.
    #[error("parameter 'clusterSize' must be indicated for cluster basis 'grid'")]
    MissingClusterSize,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The feature source failed while being read.
    #[error("feature source failed: {0}")]
    Source(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

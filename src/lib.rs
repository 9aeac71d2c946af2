// THEORY:
// This file is the main entry point for the `point_stacker` library crate.
// It aggregates a stream of point-like features into a smaller set of
// representative "stacked" points, grouped either by grid cell at a given map
// resolution or by the value of an attribute.
//
// The primary goal is to export `PointStacker` and its associated data
// structures (`StackerConfig`, `OutputWindow`, `StackedRecord`, etc.) as the
// high-level interface. The engine internals (`core_modules`) stay public for
// callers that want to drive a clustering pass or a projection on their own.

pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod stream_pipeline;

pub use error::{StackError, StackResult};
pub use pipeline::{ClusterBasis, OutputWindow, PointStacker, StackerConfig};

//! Hosting the pipeline on a dedicated tracking thread.
//!
//! The tracking thread is the single writer of [`LatestPoses`]; render or
//! application threads read from it without ever touching the pipeline.

pub mod shared_state;
mod tracking_system;

pub use shared_state::{LatestPoses, PoseSnapshot};
pub use tracking_system::TrackingSystem;

pub mod backend;
pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod system;
pub mod tracking;

pub use error::{Result, TrackingError};

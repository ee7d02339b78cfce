//! Error taxonomy shared by backends, the registry, the smoother and the pipeline.
//!
//! Setup-time errors (`Configure`, `AssociateMarker`, `Register`) indicate a
//! misconfiguration and are never retried. "Marker not found" is not an error at
//! all: it is a normal [`TrackingResult`](crate::tracking::TrackingResult) value.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::native::NativeError;

/// Result alias for tracking operations.
pub type Result<T> = std::result::Result<T, TrackingError>;

#[derive(Debug, Error)]
pub enum TrackingError {
    /// Operation attempted before the setup step it depends on.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// Bad or missing calibration / geometry data.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// The backend could not resolve a marker specification.
    #[error("association error: {0}")]
    AssociationError(String),

    #[error("marker '{0}' is already registered")]
    DuplicateRegistration(String),

    #[error("marker '{0}' is not registered")]
    UnknownMarker(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A native detection call failed. Recoverable: the tick can be skipped.
    #[error("native call failed: {0}")]
    NativeFailure(#[source] NativeError),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TrackingError {
    /// True for errors that only invalidate the current frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NativeFailure(_))
    }

    pub(crate) fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_native_failures_are_recoverable() {
        let native = TrackingError::NativeFailure(NativeError::new("detect", "device lost"));
        assert!(native.is_recoverable());

        assert!(!TrackingError::not_initialized("associate").is_recoverable());
        assert!(!TrackingError::UnknownMarker("ground".into()).is_recoverable());
        assert!(!TrackingError::invalid_argument("alpha").is_recoverable());
    }

    #[test]
    fn test_error_messages_name_the_marker() {
        let err = TrackingError::DuplicateRegistration("ground".into());
        assert_eq!(err.to_string(), "marker 'ground' is already registered");
    }
}

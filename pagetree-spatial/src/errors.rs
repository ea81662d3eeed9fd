//! Error type of the spatial trees and its bridge to the core error.

use pagetree::errors::{ErrorKind, PageTreeError};
use std::io;
use thiserror::Error;

/// Errors raised by the spatial and metric trees.
#[derive(Error, Debug)]
pub enum SpatialError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Tree is closed")]
    Closed,
}

impl SpatialError {
    /// Kind of the equivalent core error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpatialError::Io(err) if err.kind() == io::ErrorKind::InvalidData => {
                ErrorKind::Corrupted
            }
            SpatialError::Io(_) => ErrorKind::IOError,
            SpatialError::Serialization(_) => ErrorKind::EncodingError,
            SpatialError::InvalidOperation(_) => ErrorKind::InvalidOperation,
            SpatialError::Configuration(_) => ErrorKind::Configuration,
            SpatialError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            SpatialError::Unsupported(_) => ErrorKind::UnsupportedOperation,
            SpatialError::Closed => ErrorKind::StoreClosed,
        }
    }
}

impl From<SpatialError> for PageTreeError {
    fn from(err: SpatialError) -> Self {
        let kind = err.kind();
        match err {
            SpatialError::Io(io_err) => {
                PageTreeError::new(&format!("Spatial I/O error: {}", io_err), kind)
            }
            SpatialError::Closed => PageTreeError::new("Spatial index is closed", kind),
            SpatialError::Serialization(msg)
            | SpatialError::InvalidOperation(msg)
            | SpatialError::Configuration(msg)
            | SpatialError::InvariantViolation(msg)
            | SpatialError::Unsupported(msg) => PageTreeError::new(&msg, kind),
        }
    }
}

impl From<PageTreeError> for SpatialError {
    fn from(err: PageTreeError) -> Self {
        let message = err.message().to_string();
        match err.kind() {
            ErrorKind::IOError => SpatialError::Io(io::Error::new(io::ErrorKind::Other, message)),
            ErrorKind::Corrupted => {
                SpatialError::Io(io::Error::new(io::ErrorKind::InvalidData, message))
            }
            ErrorKind::EncodingError => SpatialError::Serialization(message),
            ErrorKind::StoreClosed => SpatialError::Closed,
            ErrorKind::Configuration => SpatialError::Configuration(message),
            ErrorKind::InvariantViolation | ErrorKind::InternalError => {
                SpatialError::InvariantViolation(message)
            }
            ErrorKind::UnsupportedOperation => SpatialError::Unsupported(message),
            ErrorKind::InvalidOperation | ErrorKind::NotFound => {
                SpatialError::InvalidOperation(message)
            }
        }
    }
}

/// Result type for spatial operations
pub type SpatialResult<T> = Result<T, SpatialError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_maps_by_kind() {
        let err: SpatialError = PageTreeError::invariant("broken").into();
        assert!(matches!(err, SpatialError::InvariantViolation(ref m) if m == "broken"));

        let err: SpatialError = PageTreeError::new("gone", ErrorKind::NotFound).into();
        assert!(matches!(err, SpatialError::InvalidOperation(_)));

        let err: SpatialError = PageTreeError::new("bad page", ErrorKind::Corrupted).into();
        assert_eq!(err.kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn test_spatial_error_maps_back() {
        let err: PageTreeError = SpatialError::Unsupported("no".into()).into();
        assert_eq!(err.kind(), &ErrorKind::UnsupportedOperation);
        assert_eq!(err.message(), "no");

        let err: PageTreeError = SpatialError::Closed.into();
        assert_eq!(err.kind(), &ErrorKind::StoreClosed);

        let io = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        let err: PageTreeError = SpatialError::from(io).into();
        assert_eq!(err.kind(), &ErrorKind::IOError);
    }
}

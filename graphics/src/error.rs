//! Graphics error types.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors that can occur in the graphics system.
///
/// Everything except [`GraphicsError::Device`] is a usage error: it is detected
/// before any backend call and leaves the affected object in its prior state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsError {
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A write or copy range falls outside its resource.
    #[error("out of bounds: offset {offset} + size {size} exceeds {limit}")]
    OutOfBounds { offset: u64, size: u64, limit: u64 },
    /// An operation was issued in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// An encoded command sequence is illegal.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The request is well formed but not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The backend failed to create an object, submit, or wait.
    #[error("device error: {0}")]
    Device(#[from] BackendError),
}

impl GraphicsError {
    /// Returns true for caller mistakes detected before touching the backend.
    pub fn is_usage_error(&self) -> bool {
        !self.is_device_error()
    }

    /// Returns true for backend failures.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::Device(_))
    }
}

/// Check that `offset + size` fits in `limit` without overflowing.
pub(crate) fn check_range(offset: u64, size: u64, limit: u64) -> Result<(), GraphicsError> {
    match offset.checked_add(size) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(GraphicsError::OutOfBounds {
            offset,
            size,
            limit,
        }),
    }
}

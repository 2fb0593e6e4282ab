//! Error types for the ontop-capture library

use thiserror::Error;

/// Main error type for capture and compositing operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Malformed crop area, zero-sized source or display, out-of-range value.
    /// Retrying with the same input fails again.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Device, frame producer or surface could not be created
    #[error("Device error: {0}")]
    DeviceError(String),

    /// The running session failed mid-stream (source closed, GPU reset)
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// Platform or backend not available
    #[error("Platform error: {0}")]
    PlatformError(String),
}

/// Error type for buffer pool operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferPoolError {
    /// Invalid buffer size
    #[error("Invalid buffer size: {size}")]
    InvalidBufferSize { size: usize },

    /// Requested dimensions overflow the addressable buffer size
    #[error("Buffer dimensions overflow: {width}x{height}")]
    DimensionsOverflow { width: u32, height: u32 },
}

/// Combined result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Combined result type for buffer pool operations
pub type BufferPoolResult<T> = Result<T, BufferPoolError>;

impl CaptureError {
    /// Shorthand for [`CaptureError::InvalidArgument`]
    pub fn invalid(message: impl Into<String>) -> Self {
        CaptureError::InvalidArgument(message.into())
    }

    /// Shorthand for [`CaptureError::DeviceError`]
    pub fn device(message: impl Into<String>) -> Self {
        CaptureError::DeviceError(message.into())
    }

    /// Shorthand for [`CaptureError::DeviceLost`]
    pub fn lost(message: impl Into<String>) -> Self {
        CaptureError::DeviceLost(message.into())
    }

    /// Check if the error is recoverable (worth retrying, possibly with another source)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::DeviceError(_))
    }

    /// Check if the error ends the session that raised it
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, CaptureError::DeviceLost(_))
    }
}

impl From<BufferPoolError> for CaptureError {
    fn from(err: BufferPoolError) -> Self {
        CaptureError::DeviceError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_display() {
        let err = CaptureError::invalid("crop width is zero");
        assert_eq!(err.to_string(), "Invalid argument: crop width is zero");

        let err = CaptureError::lost("source closed");
        assert_eq!(err.to_string(), "Device lost: source closed");
    }

    #[test]
    fn test_is_recoverable() {
        assert!(CaptureError::device("no adapter").is_recoverable());
        assert!(!CaptureError::invalid("zero").is_recoverable());
        assert!(!CaptureError::lost("reset").is_recoverable());
    }

    #[test]
    fn test_is_session_terminal() {
        assert!(CaptureError::lost("reset").is_session_terminal());
        assert!(!CaptureError::device("no adapter").is_session_terminal());
    }

    #[test]
    fn test_pool_error_conversion() {
        let err: CaptureError = BufferPoolError::InvalidBufferSize { size: 0 }.into();
        assert!(matches!(err, CaptureError::DeviceError(_)));
    }
}

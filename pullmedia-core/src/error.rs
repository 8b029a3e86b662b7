//! Error types for the pull-based media pipeline
//!
//! End-of-stream and format changes are not errors: they are reported through
//! [`ReadOutcome`](crate::source::ReadOutcome). Everything here either ends the
//! stream for the caller or rejects a call that violated a precondition.

use std::time::Duration;
use thiserror::Error;

/// Main error type for media pipeline operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// Format constraints cannot be met (unsupported MIME, profile, layer...)
    #[error("Unsupported format: {format}")]
    Unsupported {
        /// Description of the rejected format
        format: String,
    },

    /// Buffer allocation failed
    #[error("Out of memory: could not allocate {size} bytes")]
    NoMemory {
        /// Size of the failed allocation
        size: usize,
    },

    /// I/O operation failed
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Upstream read returned fewer bytes than required
    #[error("Short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Byte offset of the read
        offset: u64,
        /// Requested length
        expected: usize,
        /// Length actually read
        actual: usize,
    },

    /// Corrupt bitstream after bounded resync attempts
    #[error("Malformed stream: {reason}")]
    Malformed {
        /// What was wrong with the stream
        reason: String,
    },

    /// Internal consistency error
    #[error("Unknown error: {reason}")]
    Unknown {
        /// Description of the inconsistency
        reason: String,
    },

    /// A lifecycle precondition was violated (stop twice, read while stopped...)
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// No free buffer in the pool
    #[error("Buffer pool exhausted: {outstanding} of {capacity} buffers outstanding")]
    PoolExhausted {
        /// Buffers currently on loan
        outstanding: usize,
        /// Pool capacity
        capacity: usize,
    },

    /// Payload does not fit the buffer
    #[error("Buffer overflow: {size} bytes into a {capacity}-byte buffer")]
    BufferOverflow {
        /// Bytes requested
        size: usize,
        /// Buffer capacity
        capacity: usize,
    },

    /// A blocking wait timed out
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Codec rejected its input or failed to initialize
    #[error("Decoding failed: {codec} - {reason}")]
    DecodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// The source was stopped while the call was blocked
    #[error("Source stopped")]
    Stopped,
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unsupported formats and malformed bitstreams
    Format,
    /// Allocation and pool errors
    Memory,
    /// Upstream I/O errors
    Io,
    /// Lifecycle and precondition errors
    State,
    /// Codec errors
    Codec,
    /// Configuration errors
    Configuration,
    /// Internal consistency errors
    Internal,
}

impl MediaError {
    /// Shorthand for [`MediaError::Malformed`]
    pub fn malformed(reason: impl Into<String>) -> Self {
        MediaError::Malformed {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`MediaError::Unsupported`]
    pub fn unsupported(format: impl Into<String>) -> Self {
        MediaError::Unsupported {
            format: format.into(),
        }
    }

    /// Shorthand for [`MediaError::InvalidState`]
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        MediaError::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Check if the caller may retry the operation on the same instance
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MediaError::PoolExhausted { .. } | MediaError::Timeout { .. }
        )
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::Unsupported { .. } => ErrorCategory::Format,
            MediaError::Malformed { .. } => ErrorCategory::Format,
            MediaError::NoMemory { .. } => ErrorCategory::Memory,
            MediaError::PoolExhausted { .. } => ErrorCategory::Memory,
            MediaError::BufferOverflow { .. } => ErrorCategory::Memory,
            MediaError::Io { .. } => ErrorCategory::Io,
            MediaError::ShortRead { .. } => ErrorCategory::Io,
            MediaError::Timeout { .. } => ErrorCategory::Io,
            MediaError::InvalidState { .. } => ErrorCategory::State,
            MediaError::Stopped => ErrorCategory::State,
            MediaError::DecodingFailed { .. } => ErrorCategory::Codec,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::Unknown { .. } => ErrorCategory::Internal,
        }
    }

    /// Numeric status code, negative like the platform status values
    pub fn status_code(&self) -> i32 {
        match self {
            MediaError::Unsupported { .. } => -1010,
            MediaError::NoMemory { .. } => -12,
            MediaError::Io { .. } | MediaError::ShortRead { .. } => -1004,
            MediaError::Malformed { .. } => -1007,
            MediaError::PoolExhausted { .. } => -16,
            MediaError::BufferOverflow { .. } => -75,
            MediaError::Timeout { .. } => -110,
            MediaError::InvalidState { .. } => -38,
            MediaError::InvalidConfiguration { .. } => -22,
            MediaError::DecodingFailed { .. } => -1007,
            MediaError::Stopped => -32,
            MediaError::Unknown { .. } => i32::MIN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let io_error = MediaError::Io {
            source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"),
        };
        assert_eq!(io_error.category(), ErrorCategory::Io);
        assert!(!io_error.is_recoverable());

        let busy = MediaError::PoolExhausted {
            outstanding: 2,
            capacity: 2,
        };
        assert_eq!(busy.category(), ErrorCategory::Memory);
        assert!(busy.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = MediaError::ShortRead {
            offset: 7,
            expected: 1024,
            actual: 512,
        };
        assert_eq!(
            error.to_string(),
            "Short read at offset 7: expected 1024 bytes, got 512"
        );
    }

    #[test]
    fn test_status_codes_are_negative() {
        let errors = [
            MediaError::unsupported("audio/x-foo"),
            MediaError::malformed("bad sync"),
            MediaError::invalid_state("started", "stopped"),
            MediaError::Stopped,
        ];
        for error in &errors {
            assert!(error.status_code() < 0, "{error}");
        }
    }
}

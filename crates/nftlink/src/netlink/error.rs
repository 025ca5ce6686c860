//! Error types for netlink operations.

use std::io;

/// Result type for netlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during netlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[cfg(feature = "output")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Kernel returned an error code.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Kernel error with operation context.
    #[error("{operation}: {message} (errno {errno})")]
    KernelWithContext {
        /// The operation that failed.
        operation: String,
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// One or more messages of a batch were rejected.
    ///
    /// The per-message detail is in the error list passed to
    /// [`Session::commit`](crate::Session::commit).
    #[error("batch rejected: {failed} message(s) failed")]
    BatchRejected {
        /// Number of error acknowledgements received for the batch.
        failed: usize,
    },

    /// The ruleset generation changed while a dump was in progress.
    #[error("ruleset changed during dump (generation {expected} -> {actual}), retry")]
    GenerationChanged {
        /// Generation observed before the dump started.
        expected: u16,
        /// Generation reported by the offending page.
        actual: u16,
    },

    /// The kernel flagged a dump as interrupted (NLM_F_DUMP_INTR).
    #[error("dump interrupted by concurrent change, retry")]
    DumpInterrupted,

    /// The socket accepted fewer bytes than the batch holds.
    #[error("short send: {sent} of {expected} bytes")]
    ShortSend {
        /// Bytes the kernel accepted.
        sent: usize,
        /// Bytes the batch holds.
        expected: usize,
    },

    /// Message was truncated.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes received.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid attribute format.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Sequence number mismatch.
    #[error("sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch {
        /// Expected sequence number.
        expected: u32,
        /// Actual sequence number received.
        actual: u32,
    },

    /// Reply addressed to another netlink port.
    #[error("port mismatch: expected {expected}, got {actual}")]
    PortMismatch {
        /// Our local port ID.
        expected: u32,
        /// Port ID carried by the message.
        actual: u32,
    },

    /// Operation not supported.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Parse error.
    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Create a kernel error from an errno value.
    ///
    /// Accepts the negative value carried by `nlmsgerr` as well as a
    /// positive errno.
    pub fn from_errno(errno: i32) -> Self {
        let errno = errno.abs();
        let message = io::Error::from_raw_os_error(errno).to_string();
        Self::Kernel { errno, message }
    }

    /// Create a kernel error with operation context.
    pub fn from_errno_with_context(errno: i32, operation: impl Into<String>) -> Self {
        let errno = errno.abs();
        let message = io::Error::from_raw_os_error(errno).to_string();
        Self::KernelWithContext {
            operation: operation.into(),
            errno,
            message,
        }
    }

    /// Add context to this error.
    ///
    /// Wraps kernel errors with operation context. Other errors are returned unchanged.
    pub fn with_context(self, operation: impl Into<String>) -> Self {
        match self {
            Self::Kernel { errno, message } => Self::KernelWithContext {
                operation: operation.into(),
                errno,
                message,
            },
            other => other,
        }
    }

    /// Check if this is a "not found" error (ENOENT).
    pub fn is_not_found(&self) -> bool {
        self.errno() == Some(libc::ENOENT)
    }

    /// Check if this is a permission error (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.errno(), Some(libc::EPERM | libc::EACCES))
    }

    /// Check if this is a "already exists" error (EEXIST).
    pub fn is_already_exists(&self) -> bool {
        self.errno() == Some(libc::EEXIST)
    }

    /// Check if this is a "device busy" error (EBUSY).
    pub fn is_busy(&self) -> bool {
        self.errno() == Some(libc::EBUSY)
    }

    /// Check if the kernel rejected the request as malformed (EINVAL).
    pub fn is_invalid_argument(&self) -> bool {
        self.errno() == Some(libc::EINVAL)
    }

    /// Check if the operation failed because the ruleset changed underneath
    /// it. The whole read must be restarted from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GenerationChanged { .. } | Self::DumpInterrupted)
    }

    /// Check if this is a receive buffer overrun (ENOBUFS): the kernel
    /// dropped messages because the socket queue was full.
    pub fn is_buffer_overrun(&self) -> bool {
        match self {
            Self::Io(e) => e.raw_os_error() == Some(libc::ENOBUFS),
            _ => false,
        }
    }

    /// Get the errno value if this is a kernel error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_errno() {
        let err = Error::from_errno(-1); // EPERM
        assert!(err.is_permission_denied());
        assert_eq!(err.errno(), Some(1));
    }

    #[test]
    fn test_from_errno_accepts_positive() {
        let err = Error::from_errno(libc::EINVAL);
        assert!(err.is_invalid_argument());
        assert_eq!(err.errno(), Some(libc::EINVAL));
    }

    #[test]
    fn test_from_errno_with_context() {
        let err = Error::from_errno_with_context(-2, "deleting table filter"); // ENOENT
        assert!(err.is_not_found());
        let msg = err.to_string();
        assert!(msg.contains("deleting table filter"));
        assert!(msg.contains("No such file or directory"));
    }

    #[test]
    fn test_with_context() {
        let err = Error::from_errno(-17).with_context("adding chain input");
        assert!(err.is_already_exists());
        assert!(err.to_string().contains("adding chain input"));
    }

    #[test]
    fn test_retryable() {
        assert!(
            Error::GenerationChanged {
                expected: 3,
                actual: 4
            }
            .is_retryable()
        );
        assert!(Error::DumpInterrupted.is_retryable());
        assert!(!Error::from_errno(-16).is_retryable());
    }

    #[test]
    fn test_buffer_overrun() {
        let err = Error::Io(io::Error::from_raw_os_error(libc::ENOBUFS));
        assert!(err.is_buffer_overrun());
        assert!(!Error::Io(io::Error::from_raw_os_error(libc::EBADF)).is_buffer_overrun());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::BatchRejected { failed: 2 };
        assert_eq!(err.to_string(), "batch rejected: 2 message(s) failed");

        let err = Error::GenerationChanged {
            expected: 7,
            actual: 8,
        };
        assert_eq!(
            err.to_string(),
            "ruleset changed during dump (generation 7 -> 8), retry"
        );
    }
}

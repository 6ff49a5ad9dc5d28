/*!
 * Error types for the OSS client
 */

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, OssError>;

#[derive(Debug)]
pub enum OssError {
    /// Invalid arguments or client-side misuse (never retried)
    Client(String),

    /// The service returned a non-2xx status
    Server {
        status: u16,
        code: String,
        message: String,
        request_id: String,
    },

    /// Transport-level failure (DNS, connect, read timeout)
    Request(String),

    /// A conditional request (If-Match / If-Unmodified-Since) failed with 412
    PreconditionFailed(String),

    /// CRC64 mismatch or short read against the declared content length
    Inconsistent { expected: String, actual: String },

    /// The stored upload ID is unknown to the server
    NoSuchUpload(String),

    /// Checkpoint record could not be read or written
    Checkpoint(String),

    /// Key wrap/unwrap or cipher failure
    Crypto(String),

    /// I/O error on a local file
    Io(io::Error),
}

impl OssError {
    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            OssError::Client(_) => true,
            OssError::PreconditionFailed(_) => true,
            OssError::Inconsistent { .. } => true,
            OssError::NoSuchUpload(_) => true,
            OssError::Crypto(_) => true,
            OssError::Server { status, .. } => *status < 500,
            OssError::Request(_) => false,
            OssError::Checkpoint(_) => false,
            OssError::Io(_) => false,
        }
    }

    /// Check if this error is worth retrying within a single HTTP call
    pub fn is_retryable(&self) -> bool {
        match self {
            OssError::Request(_) => true,
            OssError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get error category for logging and instrumentation
    pub fn category(&self) -> ErrorCategory {
        match self {
            OssError::Client(_) => ErrorCategory::Validation,
            OssError::Server { .. } => ErrorCategory::Server,
            OssError::Request(_) => ErrorCategory::Network,
            OssError::PreconditionFailed(_) => ErrorCategory::Precondition,
            OssError::Inconsistent { .. } => ErrorCategory::Integrity,
            OssError::NoSuchUpload(_) => ErrorCategory::Session,
            OssError::Checkpoint(_) => ErrorCategory::Checkpoint,
            OssError::Crypto(_) => ErrorCategory::Crypto,
            OssError::Io(_) => ErrorCategory::IoError,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Argument validation errors
    Validation,
    /// Service-reported errors
    Server,
    /// Network/transport errors
    Network,
    /// Failed conditional requests
    Precondition,
    /// Data integrity errors (CRC64, short reads)
    Integrity,
    /// Multipart session errors
    Session,
    /// Checkpoint persistence errors
    Checkpoint,
    /// Cryptographic errors
    Crypto,
    /// Local I/O errors
    IoError,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Server => write!(f, "server"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Precondition => write!(f, "precondition"),
            ErrorCategory::Integrity => write!(f, "integrity"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Checkpoint => write!(f, "checkpoint"),
            ErrorCategory::Crypto => write!(f, "crypto"),
            ErrorCategory::IoError => write!(f, "io"),
        }
    }
}

impl fmt::Display for OssError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OssError::Client(msg) => {
                write!(f, "Client error: {}", msg)
            }
            OssError::Server {
                status,
                code,
                message,
                request_id,
            } => {
                write!(
                    f,
                    "Server error: status={} code={} message={} request_id={}",
                    status, code, message, request_id
                )
            }
            OssError::Request(msg) => {
                write!(f, "Request error: {}", msg)
            }
            OssError::PreconditionFailed(msg) => {
                write!(f, "Precondition failed: {}", msg)
            }
            OssError::Inconsistent { expected, actual } => {
                write!(
                    f,
                    "Integrity check failed: expected {}, got {}",
                    expected, actual
                )
            }
            OssError::NoSuchUpload(upload_id) => {
                write!(f, "Upload ID {} is unknown to the server", upload_id)
            }
            OssError::Checkpoint(msg) => {
                write!(f, "Checkpoint error: {}", msg)
            }
            OssError::Crypto(msg) => {
                write!(f, "Crypto error: {}", msg)
            }
            OssError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
        }
    }
}

impl std::error::Error for OssError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OssError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for OssError {
    fn from(err: io::Error) -> Self {
        OssError::Io(err)
    }
}

impl From<reqwest::Error> for OssError {
    fn from(err: reqwest::Error) -> Self {
        OssError::Request(err.to_string())
    }
}

//! Engine-wide error type.
//!
//! Every public operation returns [`EngineResult`]. Protocol crates convert
//! their driver errors into an [`EngineError`] at the boundary so that callers
//! only ever deal with one taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Categorised engine error.
#[derive(Debug, Clone, Serialize)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    /// Underlying driver / OS error, if any. Never serialised.
    #[serde(skip)]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Wrong username/password/key, or the stored secret is unreadable.
    AuthFailed,
    /// DNS, TCP connect, reset or refused connection.
    NetworkUnreachable,
    /// Operation timed out.
    Timeout,
    /// Remote (or local) path does not exist.
    NotFound,
    /// Server refused access to the resource.
    PermissionDenied,
    /// No throttle lease could be obtained in time. Retryable.
    Throttled,
    /// Cancelled by the caller.
    Cancelled,
    /// Destination exists and overwrite was not requested.
    AlreadyExists,
    /// Server replied with something unexpected; message carries its text.
    ProtocolError,
    /// Malformed URI, descriptor or configuration.
    InvalidInput,
    /// No client is able to serve the request.
    Unsupported,
    /// Local filesystem failure.
    Io,
}

/// How the UI layer should react to an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    Retry,
    Reauthenticate,
    Confirm,
    Fatal,
}

impl ErrorKind {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::NetworkUnreachable
            | ErrorKind::Timeout
            | ErrorKind::Throttled
            | ErrorKind::Io => ErrorCategory::Retry,
            ErrorKind::AuthFailed | ErrorKind::PermissionDenied => ErrorCategory::Reauthenticate,
            ErrorKind::AlreadyExists => ErrorCategory::Confirm,
            ErrorKind::NotFound
            | ErrorKind::Cancelled
            | ErrorKind::ProtocolError
            | ErrorKind::InvalidInput
            | ErrorKind::Unsupported => ErrorCategory::Fatal,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

// ── Construction helpers ─────────────────────────────────────────────

impl EngineError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Retry
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailed, msg)
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkUnreachable, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, msg)
    }

    pub fn throttled(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Throttled, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, msg)
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, msg)
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match e.kind() {
            Io::NotFound => ErrorKind::NotFound,
            Io::PermissionDenied => ErrorKind::PermissionDenied,
            Io::TimedOut => ErrorKind::Timeout,
            Io::AlreadyExists => ErrorKind::AlreadyExists,
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::AddrNotAvailable
            | Io::BrokenPipe
            | Io::UnexpectedEof => ErrorKind::NetworkUnreachable,
            _ => ErrorKind::Io,
        };
        Self::new(kind, e.to_string()).with_cause(e)
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::cancelled("I/O task was cancelled")
        } else {
            Self::io(format!("I/O task panicked: {}", e))
        }
    }
}

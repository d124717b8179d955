//! Errors raised by the provider.

use std::error::Error as StdError;
use std::fmt;

/// The error taxonomy of the provider.
///
/// Errors are never retried by the crate itself once they reach a caller;
/// retry policy is internal (see [`crate::backoff`]) and only ever produces
/// one of these variants once it gives up.
#[derive(Debug)]
pub enum Error {
    /// User-supplied options or selectors violate a documented constraint.
    ///
    /// Never retried.
    InvalidArgument(String),

    /// The operation is not valid in the provider's current configuration,
    /// e.g. calling `refresh` with no refresh domain enabled, or a
    /// `constructConfigurationObject` key collision.
    InvalidOperation(String),

    /// The initial load exceeded its startup timeout.
    LoadTimeout,

    /// The initial load exhausted its retries without a timeout (e.g. a
    /// non-failoverable transport error, or an explicit abort).
    LoadFailed(Box<Error>),

    /// Every configured client failed for one operation.
    AllFallbackFailed,

    /// A secret reference could not be resolved.
    SecretReferenceError {
        /// The identifier of the secret reference that failed to resolve.
        source_id: String,
        /// The underlying cause.
        cause: Box<dyn StdError + Send + Sync>,
    },

    /// No client or resolver could resolve a given secret identifier.
    SecretUnresolvable(String),

    /// A transport-level failure talking to the store or secret backend.
    Transport(TransportError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::InvalidOperation(msg) => write!(f, "invalid operation: {msg}"),
            Self::LoadTimeout => f.write_str("initial load timed out"),
            Self::LoadFailed(cause) => write!(f, "initial load failed: {cause}"),
            Self::AllFallbackFailed => f.write_str("every configured client failed"),
            Self::SecretReferenceError { source_id, cause } => {
                write!(f, "failed to resolve secret reference '{source_id}': {cause}")
            }
            Self::SecretUnresolvable(source_id) => {
                write!(f, "no client or resolver can resolve secret '{source_id}'")
            }
            Self::Transport(err) => write!(f, "transport error: {err}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::LoadFailed(cause) => Some(cause.as_ref()),
            Self::SecretReferenceError { cause, .. } => Some(cause.as_ref()),
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// A transport-level error, classified as failoverable or not.
#[derive(Debug)]
pub struct TransportError {
    pub(crate) kind: TransportErrorKind,
    pub(crate) cause: Box<dyn StdError + Send + Sync>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, cause: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            kind,
            cause: Box::new(cause),
        }
    }

    /// Whether this error should drive client rotation rather than an
    /// immediate failure.
    pub fn is_failoverable(&self) -> bool {
        self.kind.is_failoverable()
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.cause)
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// The classification of a transport error.
///
/// `ENOTFOUND`, `ENOENT`, `ECONNREFUSED`, `ECONNRESET`, `ETIMEDOUT` and HTTP
/// `401, 403, 408, 429, 5xx` are failoverable: they trigger client rotation.
/// Everything else aborts the calling operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// DNS/name resolution failure (`ENOTFOUND`).
    NotFound,
    /// The remote end refused the connection (`ECONNREFUSED`).
    ConnectionRefused,
    /// The connection was reset mid-flight (`ECONNRESET`).
    ConnectionReset,
    /// The operation timed out (`ETIMEDOUT`).
    TimedOut,
    /// The store returned an HTTP status that is failoverable
    /// (401, 403, 408, 429, or 5xx).
    FailoverableStatus(u16),
    /// The store returned a non-failoverable HTTP status (e.g. 400, 404).
    NonFailoverableStatus(u16),
    /// Any other transport-level failure (malformed response body, etc.).
    Other,
}

impl TransportErrorKind {
    pub fn is_failoverable(self) -> bool {
        match self {
            Self::NotFound
            | Self::ConnectionRefused
            | Self::ConnectionReset
            | Self::TimedOut
            | Self::FailoverableStatus(_) => true,
            Self::NonFailoverableStatus(_) | Self::Other => false,
        }
    }

    /// Classify an HTTP status code as failoverable or not.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 | 408 | 429 => Self::FailoverableStatus(status),
            500..=599 => Self::FailoverableStatus(status),
            other => Self::NonFailoverableStatus(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

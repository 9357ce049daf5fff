use std::error::Error;
use std::fmt::{Display, Formatter};

/// Error kind that represents failures reported by the [`crate::Client`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ErrorKind {
    /// No error occurred.
    NoError,
    /// Initialization of the internal [`reqwest::Client`] failed.
    HttpClientInitFailure,
    /// The evaluation was called before the client finished its initialization.
    ClientNotReady = 1000,
    /// The evaluation failed because the key of the evaluated flag was not found in the store.
    FlagNotFound = 1001,
    /// The evaluation failed due to a malformed flag definition.
    EvaluationFailure = 1002,
    /// The evaluation failed because the given user context has no valid key or name.
    UserNotSpecified = 1003,
    /// The environment secret given at construction is empty or not ASCII.
    InvalidEnvSecret = 1100,
    /// A URL given at construction is malformed or uses an unsupported scheme.
    InvalidUrl = 1101,
    /// The synchronizer shut down before the first successful sync.
    InitializationFailed = 1102,
    /// Waiting for the client initialization timed out.
    ClientInitTimedOut = 1103,
    /// An externally supplied bootstrap payload could not be parsed.
    InvalidBootstrapPayload = 1104,
    /// The type of the evaluated flag's value does not match the requested type.
    FlagValueTypeMismatch = 2002,
    /// The operation requires offline mode.
    OnlineClient = 3201,
}

impl ErrorKind {
    pub(crate) fn code(&self) -> u16 {
        *self as u16
    }
}

/// Error struct that holds the [`ErrorKind`] and message of the reported failure.
#[derive(Debug, PartialEq)]
pub struct ClientError {
    /// Error kind that represents failures reported by the [`crate::Client`].
    pub kind: ErrorKind,
    /// The text representation of the failure.
    pub message: String,
}

impl ClientError {
    pub(crate) fn new(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message.as_str())
    }
}

impl Error for ClientError {}

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input provided to the tool was invalid.
    InvalidInput,
    /// Error occurred while executing the tool.
    ExecutionError,
    /// No tool is registered under the requested name.
    NotFound,
    /// The tool did not resolve within the per-call timeout.
    Timeout,
    /// The call was abandoned before it resolved.
    Cancelled,
    /// The remote server hosting the tool is not running.
    ServerUnavailable,
    /// The remote server answered with something that could not be
    /// understood.
    ProtocolError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "Invalid input",
            ErrorKind::ExecutionError => "Execution error",
            ErrorKind::NotFound => "Tool not found",
            ErrorKind::Timeout => "Timed out",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::ServerUnavailable => "Server unavailable",
            ErrorKind::ProtocolError => "Protocol error",
        };
        f.write_str(s)
    }
}

/// Describes a tool call error.
///
/// Tool errors never abort a run. They are recorded as the tool's result
/// and shown to the model, which decides how to go on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
}

impl Error {
    #[inline]
    fn with_kind(kind: ErrorKind) -> Self {
        Self { kind, reason: None }
    }

    /// Creates a new error with the `InvalidInput` kind.
    #[inline]
    pub fn invalid_input() -> Self {
        Self::with_kind(ErrorKind::InvalidInput)
    }

    /// Creates a new error with the `ExecutionError` kind.
    #[inline]
    pub fn execution_error() -> Self {
        Self::with_kind(ErrorKind::ExecutionError)
    }

    /// Creates a new error with the `NotFound` kind.
    #[inline]
    pub fn not_found() -> Self {
        Self::with_kind(ErrorKind::NotFound)
    }

    /// Creates a new error with the `Timeout` kind.
    #[inline]
    pub fn timeout() -> Self {
        Self::with_kind(ErrorKind::Timeout)
    }

    /// Creates a new error with the `Cancelled` kind.
    #[inline]
    pub fn cancelled() -> Self {
        Self::with_kind(ErrorKind::Cancelled)
    }

    /// Creates a new error with the `ServerUnavailable` kind.
    #[inline]
    pub fn server_unavailable() -> Self {
        Self::with_kind(ErrorKind::ServerUnavailable)
    }

    /// Creates a new error with the `ProtocolError` kind.
    #[inline]
    pub fn protocol_error() -> Self {
        Self::with_kind(ErrorKind::ProtocolError)
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of the error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {reason}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl StdError for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Error::timeout().to_string(), "Timed out");
        assert_eq!(
            Error::server_unavailable()
                .with_reason("server unavailable")
                .to_string(),
            "Server unavailable: server unavailable"
        );
        assert_eq!(Error::not_found().reason(), "Tool not found");
    }
}

use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The content is moderated.
    Moderated,
    /// The model provider is rate limited.
    RateLimitExceeded,
    /// The connection to the provider failed or was reset.
    Network,
    /// The provider failed to serve an otherwise valid request.
    ServerError,
    /// The credentials were rejected.
    Authentication,
    /// The provider refused the request as malformed.
    InvalidRequest,
    /// Any other errors.
    Other,
}

impl ErrorKind {
    /// Returns `true` if a request failing with this kind may succeed when
    /// sent again unchanged.
    #[inline]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimitExceeded
                | ErrorKind::Network
                | ErrorKind::ServerError
        )
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Moderated => "content moderated",
            ErrorKind::RateLimitExceeded => "rate limit exceeded",
            ErrorKind::Network => "network error",
            ErrorKind::ServerError => "provider server error",
            ErrorKind::Authentication => "authentication failed",
            ErrorKind::InvalidRequest => "invalid request",
            ErrorKind::Other => "model error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::RateLimitExceeded.is_transient());
        assert!(ErrorKind::Network.is_transient());
        assert!(ErrorKind::ServerError.is_transient());
        assert!(!ErrorKind::Authentication.is_transient());
        assert!(!ErrorKind::InvalidRequest.is_transient());
        assert!(!ErrorKind::Moderated.is_transient());
        assert!(!ErrorKind::Other.is_transient());
    }
}

//! Unified error type for the Codeduel server.

use codeduel_match::MatchError;
use codeduel_protocol::ProtocolError;
use codeduel_registry::RegistryError;
use codeduel_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The router turns any of these into an `error {code, reason}` frame for
/// the client, so every variant knows its rejection [`code`](Self::code).
#[derive(Debug, thiserror::Error)]
pub enum CodeduelError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A malformed or out-of-place frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Authentication or channel registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A queue or session operation was rejected.
    #[error(transparent)]
    Match(#[from] MatchError),
}

impl CodeduelError {
    /// Rejection code reported to the client.
    pub fn code(&self) -> u16 {
        match self {
            Self::Transport(_) => 500,
            Self::Protocol(ProtocolError::Encode(_)) => 500,
            Self::Protocol(_) => 400,
            Self::Registry(err) => err.code(),
            Self::Match(err) => err.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeduel_protocol::{IdentityId, SessionId, Tier};

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::Closed("gone".into());
        let codeduel_err: CodeduelError = err.into();
        assert!(matches!(codeduel_err, CodeduelError::Transport(_)));
        assert!(codeduel_err.to_string().contains("gone"));
        assert_eq!(codeduel_err.code(), 500);
    }

    #[test]
    fn test_from_protocol_error_is_bad_request() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let codeduel_err: CodeduelError = err.into();
        assert!(matches!(codeduel_err, CodeduelError::Protocol(_)));
        assert_eq!(codeduel_err.code(), 400);
    }

    #[test]
    fn test_from_registry_error_keeps_code() {
        let codeduel_err: CodeduelError = RegistryError::AuthFailed("nope".into()).into();
        assert!(matches!(codeduel_err, CodeduelError::Registry(_)));
        assert_eq!(codeduel_err.code(), 401);
    }

    #[test]
    fn test_from_match_error_keeps_code() {
        let queued: CodeduelError = MatchError::AlreadyQueued(IdentityId(1), Tier::Easy).into();
        let unknown: CodeduelError = MatchError::UnknownSession(SessionId::new("x")).into();
        assert_eq!(queued.code(), 409);
        assert_eq!(unknown.code(), 404);
        assert!(unknown.to_string().contains("x"));
    }
}

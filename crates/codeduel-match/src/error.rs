//! Error types for the match layer.

use codeduel_protocol::{IdentityId, SessionId, Tier};

/// Errors raised by queue, matcher and session operations.
///
/// Each one is reported to the client as a rejected event; none of them
/// closes the channel.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// The identity already holds a queue entry in some tier.
    #[error("{0} is already queued for {1}")]
    AlreadyQueued(IdentityId, Tier),

    /// The identity is a participant of a session that has not ended.
    #[error("{0} is already in session {1}")]
    InSession(IdentityId, SessionId),

    /// No live or archived session has this id.
    #[error("session {0} not found")]
    UnknownSession(SessionId),

    /// The identity is not one of the session's two participants.
    #[error("{0} is not a participant of session {1}")]
    NotAParticipant(IdentityId, SessionId),

    /// The session already completed or was abandoned.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    /// The join buffer elapsed before both participants joined.
    #[error("session {0} timed out waiting for both participants")]
    MatchTimeout(SessionId),

    /// Code was sent before the session became active and its clock
    /// reached the scheduled start.
    #[error("session {0} has not started")]
    NotStarted(SessionId),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

impl MatchError {
    /// Rejection code reported to the client.
    pub fn code(&self) -> u16 {
        match self {
            Self::AlreadyQueued(..) | Self::InSession(..) => 409,
            Self::UnknownSession(_) => 404,
            Self::NotAParticipant(..) => 403,
            Self::SessionClosed(_) => 410,
            Self::MatchTimeout(_) => 408,
            Self::NotStarted(_) => 425,
            Self::Evaluation(_) => 502,
        }
    }
}

/// Failure reported by the code-execution sandbox.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// The sandbox could not be reached or did not answer.
    #[error("evaluator unavailable: {0}")]
    Unavailable(String),

    /// The sandbox rejected the request (unsupported language, bad input).
    #[error("evaluation rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_error_codes() {
        let sid = SessionId::new("a");
        assert_eq!(MatchError::AlreadyQueued(IdentityId(1), Tier::Easy).code(), 409);
        assert_eq!(MatchError::InSession(IdentityId(1), sid.clone()).code(), 409);
        assert_eq!(MatchError::UnknownSession(sid.clone()).code(), 404);
        assert_eq!(MatchError::NotAParticipant(IdentityId(1), sid.clone()).code(), 403);
        assert_eq!(MatchError::SessionClosed(sid.clone()).code(), 410);
        assert_eq!(MatchError::MatchTimeout(sid.clone()).code(), 408);
        assert_eq!(MatchError::NotStarted(sid).code(), 425);
        assert_eq!(
            MatchError::from(EvaluationError::Unavailable("down".into())).code(),
            502
        );
    }

    #[test]
    fn test_match_error_display_names_the_session() {
        let err = MatchError::SessionClosed(SessionId::new("abc"));
        assert_eq!(err.to_string(), "session M-abc is closed");
    }
}

//! Error types for the registry layer.

use codeduel_protocol::IdentityId;

/// Errors raised while authenticating or addressing a channel.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The credential was missing, malformed or rejected by the
    /// [`Authenticator`](crate::Authenticator).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A newer channel registered for the same identity; this one is
    /// being closed.
    #[error("connection superseded by a newer channel")]
    ConnectionSuperseded,

    /// The identity has no live channel.
    #[error("identity {0} has no live channel")]
    NotRegistered(IdentityId),
}

impl RegistryError {
    /// Rejection code reported to the client.
    pub fn code(&self) -> u16 {
        match self {
            Self::AuthFailed(_) => 401,
            Self::ConnectionSuperseded => 409,
            Self::NotRegistered(_) => 404,
        }
    }
}

//! Authentication boundary.
//!
//! Codeduel never parses or validates credentials. Whoever issues them
//! (the account service, a JWT verifier, a test double) implements
//! [`Authenticator`], and the router calls it exactly once per channel.
//! The resulting [`Identity`] is then carried through every handler for
//! the lifetime of that channel.

use codeduel_protocol::Identity;

use crate::RegistryError;

/// Exchanges a credential for an [`Identity`].
///
/// # Example
///
/// ```rust
/// use codeduel_protocol::Identity;
/// use codeduel_registry::{Authenticator, RegistryError};
///
/// /// Accepts `"<id>:<name>"`. Development only.
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn authenticate(
///         &self,
///         credential: &str,
///     ) -> Result<Identity, RegistryError> {
///         let (id, name) = credential.split_once(':').ok_or_else(|| {
///             RegistryError::AuthFailed("expected id:name".into())
///         })?;
///         let id: u64 = id.parse().map_err(|_| {
///             RegistryError::AuthFailed("id must be a number".into())
///         })?;
///         Ok(Identity::new(id, name))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Resolves `credential` to an identity.
    ///
    /// # Returns
    /// - `Ok(Identity)`: the credential is valid
    /// - `Err(RegistryError::AuthFailed)`: it is not
    fn authenticate(
        &self,
        credential: &str,
    ) -> impl std::future::Future<Output = Result<Identity, RegistryError>> + Send;
}

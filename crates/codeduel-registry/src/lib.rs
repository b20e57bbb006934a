//! Connection registry for Codeduel.
//!
//! This crate answers one question for the rest of the core: *which live
//! channel belongs to this identity right now?*
//!
//! 1. **Authentication**: exchanging a credential for an [`Identity`]
//!    ([`Authenticator`] trait, implemented outside the core)
//! 2. **Registration**: one channel per identity; a newer channel
//!    supersedes and closes the older one ([`ConnectionRegistry`])
//! 3. **Presence**: every registration and loss is pushed as a
//!    [`PresenceEvent`] so the queue and session layers can react
//!
//! # How it fits in the stack
//!
//! ```text
//! Match Layer (above)  ← looks up channels, reacts to presence events
//!     ↕
//! Registry Layer (this crate)  ← identity → live channel
//!     ↕
//! Protocol Layer (below)  ← provides Identity, ServerEvent
//! ```
//!
//! [`Identity`]: codeduel_protocol::Identity

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod registry;

pub use auth::Authenticator;
pub use error::RegistryError;
pub use registry::{
    ChannelHandle, ConnectionRegistry, Outbound, OutboundSender, PresenceEvent,
    PresenceReceiver,
};

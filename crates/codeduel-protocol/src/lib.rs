//! Wire protocol for Codeduel.
//!
//! This crate defines the vocabulary that clients and the matchmaking core
//! speak over a channel:
//!
//! - **Identity types** ([`Identity`], [`IdentityId`], [`SessionId`],
//!   [`Tier`]): who is playing, in which match, at which difficulty.
//! - **Events** ([`ClientEvent`], [`ServerEvent`]): the typed frames,
//!   serialized as `{"event": "queue:join", "data": {...}}`.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how events become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (frames) → Protocol (events) → Registry / Match (state)
//! ```
//!
//! Nothing here knows about connections or sessions in flight; it only
//! describes what travels on the wire.

mod codec;
mod error;
mod event;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use event::{
    ClientEvent, OPPONENT_LABEL, ParticipantView, ServerEvent, SessionSnapshot,
};
pub use types::{
    AbandonReason, Identity, IdentityId, MatchOutcome, ProgressMarker,
    SessionId, SessionState, TestOutcome, Tier, Verdict, VerdictStatus,
};

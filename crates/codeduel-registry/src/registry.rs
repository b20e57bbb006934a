//! The connection registry: identity → live channel.
//!
//! Each registered channel is represented by the sending half of an
//! unbounded mpsc channel. The per-connection writer task owns the
//! receiving half and forwards whatever arrives to the socket, so any
//! component can push an event to a user without touching the socket.
//!
//! # Superseding
//!
//! At most one channel per identity. Registering a second one sends
//! `connection:superseded` followed by [`Outbound::Close`] to the old
//! channel and swaps in the new one. When the old connection's handler
//! later unregisters, its [`ConnectionId`] no longer maps to anything and
//! the call is a no-op, so the new channel is never torn down by the old
//! one's cleanup.
//!
//! # Presence
//!
//! Registration and loss are pushed as [`PresenceEvent`]s on the channel
//! returned by [`ConnectionRegistry::new`]. Events are sent while the
//! registry lock is held, so their order matches the order of the
//! registry mutations they describe.

use std::collections::HashMap;

use codeduel_protocol::{Identity, IdentityId, ServerEvent};
use codeduel_transport::ConnectionId;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

use crate::RegistryError;

/// A message for one connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encode and send this event.
    Event(ServerEvent),
    /// Flush and close the socket.
    Close,
}

/// Sending half of a connection's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// A change in whether an identity has a live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    /// The identity registered a channel (first time or as a replacement).
    Connected(IdentityId),
    /// The identity's live channel closed and nothing replaced it.
    Lost(IdentityId),
}

/// Receiving half of the presence notification channel.
pub type PresenceReceiver = mpsc::UnboundedReceiver<PresenceEvent>;

/// A cloneable handle to one registered channel.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    pub conn_id: ConnectionId,
    pub identity: Identity,
    pub connected_at: Instant,
    sender: OutboundSender,
}

impl ChannelHandle {
    /// Queues an event for this channel. Fails if its writer has exited.
    pub fn send(&self, event: ServerEvent) -> Result<(), RegistryError> {
        self.sender
            .send(Outbound::Event(event))
            .map_err(|_| RegistryError::NotRegistered(self.identity.id))
    }

    fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }
}

#[derive(Default)]
struct Inner {
    by_identity: HashMap<IdentityId, ChannelHandle>,
    by_conn: HashMap<ConnectionId, IdentityId>,
}

/// Maps every authenticated identity to its single live channel.
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    presence: mpsc::UnboundedSender<PresenceEvent>,
}

impl ConnectionRegistry {
    /// Creates an empty registry and the receiver its presence events are
    /// pushed to.
    ///
    /// Dropping the receiver is allowed; presence events are then
    /// discarded.
    pub fn new() -> (Self, PresenceReceiver) {
        let (presence, rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Mutex::new(Inner::default()),
                presence,
            },
            rx,
        )
    }

    /// Records `sender` as the live channel for `identity`.
    ///
    /// Any previous channel for the same identity is told it was
    /// superseded and then closed. Returns the superseded connection's id.
    pub async fn register(
        &self,
        identity: Identity,
        conn_id: ConnectionId,
        sender: OutboundSender,
    ) -> Option<ConnectionId> {
        let identity_id = identity.id;
        let handle = ChannelHandle {
            conn_id,
            identity,
            connected_at: Instant::now(),
            sender,
        };

        let mut inner = self.inner.lock().await;
        let previous = inner.by_identity.insert(identity_id, handle);
        inner.by_conn.insert(conn_id, identity_id);

        let superseded = previous.map(|old| {
            inner.by_conn.remove(&old.conn_id);
            let _ = old.send(ServerEvent::ConnectionSuperseded);
            old.close();
            tracing::info!(
                identity = %identity_id,
                old = %old.conn_id,
                new = %conn_id,
                "connection superseded"
            );
            old.conn_id
        });

        if superseded.is_none() {
            tracing::info!(identity = %identity_id, %conn_id, "connection registered");
        }
        let _ = self.presence.send(PresenceEvent::Connected(identity_id));
        superseded
    }

    /// Returns the live channel for `identity`, if any.
    pub async fn lookup(&self, identity: IdentityId) -> Option<ChannelHandle> {
        self.inner.lock().await.by_identity.get(&identity).cloned()
    }

    /// Removes whichever identity currently maps to `conn_id`.
    ///
    /// A no-op returning `None` if the connection was already superseded
    /// or never registered.
    pub async fn unregister(&self, conn_id: ConnectionId) -> Option<IdentityId> {
        let mut inner = self.inner.lock().await;
        let Some(identity) = inner.by_conn.remove(&conn_id) else {
            tracing::debug!(%conn_id, "unregister ignored, connection not live");
            return None;
        };
        inner.by_identity.remove(&identity);

        tracing::info!(%identity, %conn_id, "connection unregistered");
        let _ = self.presence.send(PresenceEvent::Lost(identity));
        Some(identity)
    }

    /// Queues `event` for the live channel of `identity`.
    pub async fn send(
        &self,
        identity: IdentityId,
        event: ServerEvent,
    ) -> Result<(), RegistryError> {
        let inner = self.inner.lock().await;
        let handle = inner
            .by_identity
            .get(&identity)
            .ok_or(RegistryError::NotRegistered(identity))?;
        handle.send(event)
    }

    /// `true` if `identity` has a live channel whose writer is still
    /// running.
    pub async fn is_live(&self, identity: IdentityId) -> bool {
        self.inner
            .lock()
            .await
            .by_identity
            .get(&identity)
            .is_some_and(|h| !h.sender.is_closed())
    }

    /// Number of registered identities.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.by_identity.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// =========================================================================
// Tests
// =========================================================================

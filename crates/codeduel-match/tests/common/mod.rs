//! Shared fixture for the match-layer integration tests.
//!
//! Each simulated user is an identity registered in a real
//! `ConnectionRegistry` with a bare mpsc channel standing in for its
//! socket writer. Tests read what the core pushed with [`Harness::drain`].
//!
//! There is no presence coordinator here; tests call the queue and
//! session manager hooks themselves so each step is explicit.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use codeduel_clock::TimingConfig;
use codeduel_match::{DifficultyQueue, Matcher, SessionManager};
use codeduel_protocol::{Identity, IdentityId, ServerEvent, SessionId};
use codeduel_registry::{ConnectionRegistry, Outbound};
use codeduel_transport::ConnectionId;
use tokio::sync::mpsc;

pub fn uid(id: u64) -> IdentityId {
    IdentityId(id)
}

pub struct Harness {
    pub registry: Arc<ConnectionRegistry>,
    pub queue: Arc<DifficultyQueue>,
    pub sessions: Arc<SessionManager>,
    pub matcher: Arc<Matcher>,
    inboxes: HashMap<u64, mpsc::UnboundedReceiver<Outbound>>,
    live_conn: HashMap<u64, ConnectionId>,
    next_conn: u64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timing(TimingConfig::default())
    }

    pub fn with_timing(timing: TimingConfig) -> Self {
        let (registry, _presence) = ConnectionRegistry::new();
        let registry = Arc::new(registry);
        let queue = Arc::new(DifficultyQueue::new(Arc::clone(&registry)));
        let sessions = Arc::new(SessionManager::new(timing, Arc::clone(&registry), 16));
        let matcher = Arc::new(Matcher::new(
            Arc::clone(&queue),
            Arc::clone(&sessions),
            Arc::clone(&registry),
        ));
        Self {
            registry,
            queue,
            sessions,
            matcher,
            inboxes: HashMap::new(),
            live_conn: HashMap::new(),
            next_conn: 1,
        }
    }

    /// Registers a fresh channel for user `id`.
    pub async fn connect(&mut self, id: u64) {
        let conn = ConnectionId::new(self.next_conn);
        self.next_conn += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry
            .register(Identity::new(id, format!("user{id}")), conn, tx)
            .await;
        self.inboxes.insert(id, rx);
        self.live_conn.insert(id, conn);
    }

    /// Connects users `ids` in order.
    pub async fn connect_all(&mut self, ids: &[u64]) {
        for &id in ids {
            self.connect(id).await;
        }
    }

    /// Closes user `id`'s channel and runs the loss hooks.
    pub async fn disconnect(&mut self, id: u64) {
        if let Some(conn) = self.live_conn.remove(&id) {
            self.registry.unregister(conn).await;
        }
        self.inboxes.remove(&id);
        self.queue.on_connection_lost(uid(id)).await;
        self.sessions.on_identity_lost(uid(id)).await;
    }

    /// Drops user `id`'s receiving end without unregistering, as when a
    /// socket writer dies before the loss is processed.
    pub fn disconnect_channel_only(&mut self, id: u64) {
        self.inboxes.remove(&id);
    }

    /// Registers a new channel for `id` and runs the return hook.
    pub async fn reconnect(&mut self, id: u64) {
        self.connect(id).await;
        self.sessions.on_identity_returned(uid(id)).await;
    }

    /// Every event pushed to user `id` since the last drain.
    pub fn drain(&mut self, id: u64) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        if let Some(rx) = self.inboxes.get_mut(&id) {
            while let Ok(outbound) = rx.try_recv() {
                if let Outbound::Event(event) = outbound {
                    events.push(event);
                }
            }
        }
        events
    }

    /// Queues two users and returns the session they were paired into.
    pub async fn pair(&mut self, a: u64, b: u64) -> SessionId {
        let tier = codeduel_protocol::Tier::Medium;
        self.matcher.enqueue(uid(a), tier).await.expect("enqueue a");
        self.matcher.enqueue(uid(b), tier).await.expect("enqueue b");
        let id = self
            .sessions
            .session_of(uid(a))
            .await
            .expect("pair should form a session");
        self.drain(a);
        self.drain(b);
        id
    }

    /// Pairs two users and has both of them join.
    pub async fn active_pair(&mut self, a: u64, b: u64) -> SessionId {
        let id = self.pair(a, b).await;
        self.sessions.join(&id, uid(a)).await.expect("join a");
        self.sessions.join(&id, uid(b)).await.expect("join b");
        self.drain(a);
        self.drain(b);
        id
    }
}

/// Lets spawned timer tasks run after the clock moved.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Moves the paused clock and lets due timers fire.
pub async fn advance(d: Duration) {
    tokio::time::advance(d).await;
    settle().await;
}

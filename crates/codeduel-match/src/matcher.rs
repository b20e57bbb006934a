//! The matcher: pairs queue entries into sessions.
//!
//! Pairing is first-come-first-served within a tier. An attempt holds the
//! tier lock from the moment it picks the two oldest live entries until
//! their session exists, so two concurrent attempts can never claim the
//! same entry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use codeduel_protocol::{IdentityId, ServerEvent, SessionId, Tier};
use codeduel_registry::ConnectionRegistry;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::{DifficultyQueue, MatchError, SessionManager};

/// What an identity's matchmaking screen should show.
///
/// Derived from queue and session membership on request; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum SearchStatus {
    Idle,
    Searching { difficulty: Tier },
    Found { match_id: SessionId },
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Searching { .. } => write!(f, "searching"),
            Self::Found { .. } => write!(f, "found"),
        }
    }
}

/// Front door for matchmaking: queue membership plus pairing.
pub struct Matcher {
    queue: Arc<DifficultyQueue>,
    sessions: Arc<SessionManager>,
    registry: Arc<ConnectionRegistry>,
}

impl Matcher {
    pub fn new(
        queue: Arc<DifficultyQueue>,
        sessions: Arc<SessionManager>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            queue,
            sessions,
            registry,
        }
    }

    pub fn queue(&self) -> &Arc<DifficultyQueue> {
        &self.queue
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Queues `identity` for `tier`, confirms with `queue:joined`, then
    /// tries to form a match in that tier.
    ///
    /// `queue:joined` is sent before the attempt so a client never sees
    /// `match:found` ahead of its own queue confirmation.
    ///
    /// # Errors
    /// - [`MatchError::InSession`]: the identity is still playing
    /// - [`MatchError::AlreadyQueued`]: it already waits in some tier
    pub async fn enqueue(&self, identity: IdentityId, tier: Tier) -> Result<usize, MatchError> {
        // Checked under the queue locks: a pair is committed only after
        // its session is recorded, so an identity that is no longer queued
        // here is either idle or visible through `session_of`.
        let sessions = &self.sessions;
        let position = self
            .queue
            .enqueue_with(identity, tier, || async move {
                match sessions.session_of(identity).await {
                    Some(session_id) => Err(MatchError::InSession(identity, session_id)),
                    None => Ok(()),
                }
            })
            .await?;
        let confirmation = ServerEvent::QueueJoined {
            difficulty: tier,
            position,
        };
        if let Err(err) = self.registry.send(identity, confirmation).await {
            tracing::debug!(%identity, %err, "queue confirmation dropped");
        }

        self.attempt_match(tier).await;
        Ok(position)
    }

    /// Leaves whichever queue `identity` is in and confirms with
    /// `queue:left`. Idempotent.
    ///
    /// Against a concurrent match attempt exactly one side wins: either
    /// the entry is removed and `Some(tier)` is returned, or the identity
    /// was paired and this returns `None`.
    pub async fn dequeue(&self, identity: IdentityId) -> Option<Tier> {
        let tier = self.queue.dequeue(identity).await;
        let confirmation = ServerEvent::QueueLeft { difficulty: tier };
        if let Err(err) = self.registry.send(identity, confirmation).await {
            tracing::debug!(%identity, %err, "leave confirmation dropped");
        }
        tier
    }

    /// Pairs the two oldest live entries of `tier` into a session, for as
    /// long as at least two remain. Returns the sessions formed.
    pub async fn attempt_match(&self, tier: Tier) -> Vec<SessionId> {
        let mut formed = Vec::new();
        let mut guard = self.queue.lock_tier(tier).await;

        while let Some((a, b)) = guard.take_pair().await {
            let waited_ms = a.enqueued_at.elapsed().as_millis() as u64;
            let session_id = self
                .sessions
                .create_session(a.identity, b.identity, tier)
                .await;
            guard.commit(&a, &b).await;
            tracing::debug!(%session_id, %tier, waited_ms, "pair taken from queue");
            formed.push(session_id);
        }
        formed
    }

    /// Spawns a task that retries [`attempt_match`](Self::attempt_match) on
    /// every tier each `interval`.
    ///
    /// Entries skipped because of a race or a momentarily dead channel are
    /// paired on the next sweep without waiting for another enqueue.
    pub fn run_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for tier in Tier::ALL {
                    let formed = self.attempt_match(tier).await;
                    if !formed.is_empty() {
                        tracing::debug!(%tier, count = formed.len(), "sweep formed matches");
                    }
                }
            }
        })
    }

    /// Projects `identity`'s matchmaking status.
    pub async fn search_status(&self, identity: IdentityId) -> SearchStatus {
        if let Some(match_id) = self.sessions.session_of(identity).await {
            return SearchStatus::Found { match_id };
        }
        match self.queue.tier_of(identity).await {
            Some(difficulty) => SearchStatus::Searching { difficulty },
            None => SearchStatus::Idle,
        }
    }
}

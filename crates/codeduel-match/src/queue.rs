//! Per-tier FIFO queues of waiting identities.
//!
//! # Layout
//!
//! Each tier has its own `Mutex<VecDeque<QueueEntry>>`, so operations on
//! different tiers never contend. A single membership index maps every
//! queued identity to its `(tier, ticket)` and is the source of truth for
//! "is this identity queued": a deque entry whose ticket no longer matches
//! the index is stale and is skipped and purged.
//!
//! # Lock order
//!
//! Tier lock first, then the index, then (for liveness) the registry or
//! (for an admit check) the session manager. Nothing takes the index and
//! then a tier lock, and the session manager never calls into the queue.
//!
//! # Racing a match
//!
//! The matcher holds the tier lock from picking a pair until that pair's
//! session exists and its index entries are cleared
//! ([`TierGuard::commit`]). [`DifficultyQueue::dequeue`] removes an entry
//! only while holding the same tier lock, so a leave and a match attempt
//! on one tier are strictly ordered:
//!
//! - dequeue first: the entry is gone before the matcher looks.
//! - matcher first: the dequeue finds no entry and reports `None`; the
//!   identity has received `match:found`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use codeduel_protocol::{IdentityId, Tier};
use codeduel_registry::ConnectionRegistry;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::MatchError;

/// One waiting identity.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub identity: IdentityId,
    pub tier: Tier,
    pub enqueued_at: Instant,
    ticket: u64,
}

/// The matchmaking queues for every tier.
pub struct DifficultyQueue {
    tiers: [Mutex<VecDeque<QueueEntry>>; 3],
    index: Mutex<HashMap<IdentityId, (Tier, u64)>>,
    next_ticket: AtomicU64,
    registry: Arc<ConnectionRegistry>,
}

impl DifficultyQueue {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            tiers: Default::default(),
            index: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            registry,
        }
    }

    /// Appends `identity` to the `tier` queue and returns its 1-based
    /// position among live entries.
    ///
    /// # Errors
    /// [`MatchError::AlreadyQueued`] if the identity has an entry in any
    /// tier.
    pub async fn enqueue(
        &self,
        identity: IdentityId,
        tier: Tier,
    ) -> Result<usize, MatchError> {
        self.enqueue_with(identity, tier, || async { Ok(()) }).await
    }

    /// Like [`enqueue`](Self::enqueue), but runs `admit` after the
    /// duplicate check and before the insert, with the tier lock and the
    /// index lock held.
    ///
    /// A match commit needs the index lock, so no pair can be committed
    /// between `admit` and the insert. `admit` must not touch the queue.
    pub async fn enqueue_with<F, Fut>(
        &self,
        identity: IdentityId,
        tier: Tier,
        admit: F,
    ) -> Result<usize, MatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), MatchError>>,
    {
        let mut entries = self.tiers[tier.index()].lock().await;
        let mut index = self.index.lock().await;

        if let Some(&(queued_tier, _)) = index.get(&identity) {
            return Err(MatchError::AlreadyQueued(identity, queued_tier));
        }
        admit().await?;

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        index.insert(identity, (tier, ticket));
        entries.push_back(QueueEntry {
            identity,
            tier,
            enqueued_at: Instant::now(),
            ticket,
        });

        let position = entries.iter().filter(|e| is_current(&index, e)).count();
        tracing::info!(%identity, %tier, position, "enqueued");
        Ok(position)
    }

    /// Removes the identity's entry, if any. Returns the tier it was in.
    ///
    /// Idempotent: a late leave after a match formed is not an error.
    /// Runs under the tier lock, so it waits for a match attempt in
    /// progress on that tier and then reports `None` if the identity was
    /// paired.
    pub async fn dequeue(&self, identity: IdentityId) -> Option<Tier> {
        loop {
            let seen = self.index.lock().await.get(&identity).map(|&(tier, _)| tier);
            let Some(tier) = seen else {
                tracing::debug!(%identity, "dequeue ignored, not queued");
                return None;
            };

            let mut entries = self.tiers[tier.index()].lock().await;
            let mut index = self.index.lock().await;
            match index.get(&identity).copied() {
                Some((current, ticket)) if current == tier => {
                    index.remove(&identity);
                    entries.retain(|e| e.ticket != ticket);
                    tracing::info!(%identity, %tier, "dequeued");
                    return Some(tier);
                }
                // Re-queued in another tier meanwhile.
                Some(_) => continue,
                None => {
                    tracing::debug!(%identity, %tier, "dequeue found entry already taken");
                    return None;
                }
            }
        }
    }

    /// Reacts to a lost channel. Same as [`dequeue`](Self::dequeue).
    pub async fn on_connection_lost(&self, identity: IdentityId) -> Option<Tier> {
        self.dequeue(identity).await
    }

    /// The tier `identity` is queued in, if any.
    pub async fn tier_of(&self, identity: IdentityId) -> Option<Tier> {
        self.index.lock().await.get(&identity).map(|&(tier, _)| tier)
    }

    /// Live entries of `tier`, oldest first.
    pub async fn snapshot(&self, tier: Tier) -> Vec<IdentityId> {
        let entries = self.tiers[tier.index()].lock().await;
        let index = self.index.lock().await;
        entries
            .iter()
            .filter(|e| is_current(&index, e))
            .map(|e| e.identity)
            .collect()
    }

    /// Number of live entries in `tier`.
    pub async fn len(&self, tier: Tier) -> usize {
        self.snapshot(tier).await.len()
    }

    /// Takes the exclusive lock on one tier.
    ///
    /// While the guard lives no other enqueue, purge or match attempt can
    /// touch that tier's deque.
    pub async fn lock_tier(&self, tier: Tier) -> TierGuard<'_> {
        TierGuard {
            tier,
            entries: self.tiers[tier.index()].lock().await,
            queue: self,
        }
    }
}

fn is_current(index: &HashMap<IdentityId, (Tier, u64)>, entry: &QueueEntry) -> bool {
    index.get(&entry.identity) == Some(&(entry.tier, entry.ticket))
}

/// Exclusive access to one tier's deque.
pub struct TierGuard<'a> {
    tier: Tier,
    entries: MutexGuard<'a, VecDeque<QueueEntry>>,
    queue: &'a DifficultyQueue,
}

impl TierGuard<'_> {
    /// Removes and returns the two oldest live entries, or `None` if fewer
    /// than two remain.
    ///
    /// Stale entries are purged on the way. Entries whose identity has no
    /// live channel are dropped from the queue entirely. The pair's index
    /// entries stay in place until [`commit`](Self::commit), so the pair
    /// still reads as queued while its session is being created.
    pub async fn take_pair(&mut self) -> Option<(QueueEntry, QueueEntry)> {
        let mut index = self.queue.index.lock().await;
        let mut picked: Vec<usize> = Vec::with_capacity(2);
        let mut i = 0;

        while i < self.entries.len() && picked.len() < 2 {
            let entry = &self.entries[i];
            if !is_current(&index, entry) {
                self.entries.remove(i);
                continue;
            }
            if !self.queue.registry.is_live(entry.identity).await {
                tracing::debug!(
                    identity = %entry.identity,
                    tier = %self.tier,
                    "dropping queue entry without live channel"
                );
                index.remove(&entry.identity);
                self.entries.remove(i);
                continue;
            }
            picked.push(i);
            i += 1;
        }

        let &[first, second] = picked.as_slice() else {
            return None;
        };
        // Remove the later index first so the earlier one stays valid.
        let b = self.entries.remove(second)?;
        let a = self.entries.remove(first)?;
        Some((a, b))
    }

    /// Clears the index entries of a pair returned by
    /// [`take_pair`](Self::take_pair).
    pub async fn commit(&self, a: &QueueEntry, b: &QueueEntry) {
        let mut index = self.queue.index.lock().await;
        for entry in [a, b] {
            if is_current(&index, entry) {
                index.remove(&entry.identity);
            }
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }
}

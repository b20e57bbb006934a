//! Integration tests for queueing and pairing.
//!
//! Covers the queue invariants (one entry per identity, FIFO per tier,
//! idempotent leave) and the matcher's "exactly two, exactly once"
//! consumption under concurrent enqueues.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use codeduel_match::{MatchError, SearchStatus};
use codeduel_protocol::{ServerEvent, Tier};
use common::{Harness, advance, uid};

// =========================================================================
// Pairing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_two_medium_entries_are_paired() {
    let mut h = Harness::new();
    h.connect_all(&[1, 2]).await;

    h.matcher.enqueue(uid(1), Tier::Medium).await.unwrap();
    advance(Duration::from_millis(400)).await;
    h.matcher.enqueue(uid(2), Tier::Medium).await.unwrap();

    let a = h.drain(1);
    let b = h.drain(2);
    assert_eq!(
        a[0],
        ServerEvent::QueueJoined {
            difficulty: Tier::Medium,
            position: 1
        }
    );
    assert_eq!(
        b[0],
        ServerEvent::QueueJoined {
            difficulty: Tier::Medium,
            position: 2
        }
    );

    let ServerEvent::MatchFound {
        match_id: id_a,
        difficulty,
        starts_in_ms,
        scheduled_start,
    } = &a[1]
    else {
        panic!("expected match:found, got {a:?}");
    };
    let ServerEvent::MatchFound {
        match_id: id_b,
        scheduled_start: start_b,
        ..
    } = &b[1]
    else {
        panic!("expected match:found, got {b:?}");
    };
    assert_eq!(id_a, id_b);
    assert_eq!(*difficulty, Tier::Medium);
    assert_eq!(*starts_in_ms, 5000);
    assert_eq!(scheduled_start, start_b);

    assert_eq!(h.queue.len(Tier::Medium).await, 0);
    assert_eq!(h.sessions.session_of(uid(1)).await.as_ref(), Some(id_a));
    assert_eq!(h.sessions.session_of(uid(2)).await.as_ref(), Some(id_a));
}

#[tokio::test(start_paused = true)]
async fn test_lone_entry_stays_queued() {
    let mut h = Harness::new();
    h.connect(1).await;

    h.matcher.enqueue(uid(1), Tier::Easy).await.unwrap();
    advance(Duration::from_secs(30)).await;

    assert_eq!(h.queue.snapshot(Tier::Easy).await, vec![uid(1)]);
    assert_eq!(h.sessions.live_count().await, 0);
    assert_eq!(
        h.matcher.search_status(uid(1)).await,
        SearchStatus::Searching {
            difficulty: Tier::Easy
        }
    );

    assert_eq!(h.matcher.dequeue(uid(1)).await, Some(Tier::Easy));
    assert_eq!(h.queue.len(Tier::Easy).await, 0);
    assert_eq!(h.matcher.search_status(uid(1)).await, SearchStatus::Idle);

    let events = h.drain(1);
    assert_eq!(
        events.last(),
        Some(&ServerEvent::QueueLeft {
            difficulty: Some(Tier::Easy)
        })
    );
}

#[tokio::test]
async fn test_tiers_never_mix() {
    let mut h = Harness::new();
    h.connect_all(&[1, 2]).await;

    h.matcher.enqueue(uid(1), Tier::Easy).await.unwrap();
    h.matcher.enqueue(uid(2), Tier::Hard).await.unwrap();

    assert_eq!(h.sessions.live_count().await, 0);
    assert_eq!(h.queue.len(Tier::Easy).await, 1);
    assert_eq!(h.queue.len(Tier::Hard).await, 1);
}

#[tokio::test]
async fn test_oldest_two_are_paired_first() {
    let mut h = Harness::new();
    h.connect_all(&[1, 2, 3, 4]).await;

    // 1 and 2 are paired on 2's enqueue; 3 waits for 4.
    for id in 1..=3 {
        h.matcher.enqueue(uid(id), Tier::Medium).await.unwrap();
    }
    let first = h.sessions.session_of(uid(1)).await.unwrap();
    assert_eq!(h.sessions.session_of(uid(2)).await, Some(first.clone()));
    assert_eq!(h.sessions.session_of(uid(3)).await, None);
    assert_eq!(h.queue.snapshot(Tier::Medium).await, vec![uid(3)]);

    h.matcher.enqueue(uid(4), Tier::Medium).await.unwrap();
    let second = h.sessions.session_of(uid(3)).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(h.sessions.session_of(uid(4)).await, Some(second));
}

#[tokio::test]
async fn test_leave_before_partner_arrives_prevents_match() {
    let mut h = Harness::new();
    h.connect_all(&[1, 2]).await;

    h.matcher.enqueue(uid(1), Tier::Easy).await.unwrap();
    h.matcher.dequeue(uid(1)).await;
    h.matcher.enqueue(uid(2), Tier::Easy).await.unwrap();

    assert_eq!(h.sessions.live_count().await, 0);
    assert_eq!(h.queue.snapshot(Tier::Easy).await, vec![uid(2)]);
}

#[tokio::test]
async fn test_late_leave_after_match_is_harmless() {
    let mut h = Harness::new();
    h.connect_all(&[1, 2]).await;
    let session = h.pair(1, 2).await;

    assert_eq!(h.matcher.dequeue(uid(1)).await, None);

    assert_eq!(h.sessions.session_of(uid(1)).await, Some(session));
    assert_eq!(
        h.drain(1),
        vec![ServerEvent::QueueLeft { difficulty: None }]
    );
}

// =========================================================================
// Rejections
// =========================================================================

#[tokio::test]
async fn test_second_enqueue_in_any_tier_is_rejected() {
    let mut h = Harness::new();
    h.connect(1).await;
    h.matcher.enqueue(uid(1), Tier::Easy).await.unwrap();

    let err = h.matcher.enqueue(uid(1), Tier::Hard).await.unwrap_err();

    assert!(matches!(err, MatchError::AlreadyQueued(id, Tier::Easy) if id == uid(1)));
    assert_eq!(err.code(), 409);
    assert_eq!(h.queue.len(Tier::Hard).await, 0);
}

#[tokio::test]
async fn test_enqueue_while_in_session_is_rejected() {
    let mut h = Harness::new();
    h.connect_all(&[1, 2]).await;
    let session = h.pair(1, 2).await;

    let err = h.matcher.enqueue(uid(1), Tier::Easy).await.unwrap_err();

    assert!(matches!(err, MatchError::InSession(_, ref s) if *s == session));
    assert_eq!(h.matcher.search_status(uid(1)).await, SearchStatus::Found { match_id: session });
}

// =========================================================================
// Liveness and sweeping
// =========================================================================

#[tokio::test]
async fn test_entry_without_live_channel_is_skipped() {
    let mut h = Harness::new();
    h.connect_all(&[1, 2, 3]).await;
    h.matcher.enqueue(uid(1), Tier::Easy).await.unwrap();

    // 1's socket writer dies before the loss notification is processed.
    h.disconnect_channel_only(1);

    h.matcher.enqueue(uid(2), Tier::Easy).await.unwrap();
    assert_eq!(h.sessions.live_count().await, 0);
    assert_eq!(h.queue.snapshot(Tier::Easy).await, vec![uid(2)]);

    h.matcher.enqueue(uid(3), Tier::Easy).await.unwrap();
    let session = h.sessions.session_of(uid(2)).await.unwrap();
    assert_eq!(h.sessions.session_of(uid(3)).await, Some(session));
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_pairs_entries_queued_without_attempt() {
    let mut h = Harness::new();
    h.connect_all(&[1, 2]).await;
    // Straight into the queue, bypassing the matcher's own attempt.
    h.queue.enqueue(uid(1), Tier::Hard).await.unwrap();
    h.queue.enqueue(uid(2), Tier::Hard).await.unwrap();
    assert_eq!(h.sessions.live_count().await, 0);

    let sweeper = std::sync::Arc::clone(&h.matcher).run_sweeper(Duration::from_secs(1));
    advance(Duration::from_secs(1)).await;

    assert!(h.sessions.session_of(uid(1)).await.is_some());
    assert_eq!(h.queue.len(Tier::Hard).await, 0);
    sweeper.abort();
}

// =========================================================================
// Concurrency
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueues_consume_each_entry_once() {
    const USERS: u64 = 40;

    let mut h = Harness::new();
    for id in 1..=USERS {
        h.connect(id).await;
    }

    let mut tasks = Vec::new();
    for id in 1..=USERS {
        let matcher = std::sync::Arc::clone(&h.matcher);
        tasks.push(tokio::spawn(async move {
            matcher.enqueue(uid(id), Tier::Medium).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    // Racing attempts may leave a pair for the next one.
    h.matcher.attempt_match(Tier::Medium).await;

    let mut sessions = HashSet::new();
    for id in 1..=USERS {
        let found: Vec<_> = h
            .drain(id)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::MatchFound { match_id, .. } => Some(match_id),
                _ => None,
            })
            .collect();
        assert_eq!(found.len(), 1, "user {id} matched {} times", found.len());
        sessions.insert(found[0].clone());
    }
    assert_eq!(sessions.len() as u64, USERS / 2);
    assert_eq!(h.queue.len(Tier::Medium).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_leave_racing_a_match_has_exactly_one_outcome() {
    for round in 0..200 {
        let mut h = Harness::new();
        h.connect_all(&[1, 2]).await;
        h.matcher.enqueue(uid(1), Tier::Medium).await.unwrap();

        let pairing = {
            let matcher = std::sync::Arc::clone(&h.matcher);
            tokio::spawn(async move { matcher.enqueue(uid(2), Tier::Medium).await })
        };
        let leaving = {
            let matcher = std::sync::Arc::clone(&h.matcher);
            tokio::spawn(async move {
                let left = matcher.dequeue(uid(1)).await;
                let requeued = matcher.enqueue(uid(1), Tier::Hard).await;
                (left, requeued)
            })
        };
        pairing.await.unwrap().unwrap();
        let (left, requeued) = leaving.await.unwrap();

        let matched = h.sessions.session_of(uid(1)).await.is_some();
        assert_ne!(left.is_some(), matched, "round {round}: left={left:?} matched={matched}");
        if matched {
            assert!(
                matches!(requeued, Err(MatchError::InSession(..))),
                "round {round}: matched identity queued again: {requeued:?}"
            );
            assert_eq!(h.queue.tier_of(uid(1)).await, None);
        } else {
            assert_eq!(requeued.unwrap(), 1);
            assert_eq!(h.queue.snapshot(Tier::Medium).await, vec![uid(2)]);
        }

        let events = h.drain(1);
        let found = events
            .iter()
            .any(|e| matches!(e, ServerEvent::MatchFound { .. }));
        let left_medium = events.iter().any(|e| {
            matches!(
                e,
                ServerEvent::QueueLeft {
                    difficulty: Some(Tier::Medium)
                }
            )
        });
        assert_ne!(found, left_medium, "round {round}: {events:?}");
    }
}

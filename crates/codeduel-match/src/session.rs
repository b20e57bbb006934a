//! Session types: one paired match between two identities.
//!
//! A [`MatchSession`] only holds data and enforces the state machine. All
//! timers, locking and notifications live in
//! [`SessionManager`](crate::SessionManager).

use codeduel_clock::MatchClock;
use codeduel_protocol::{
    AbandonReason, IdentityId, ParticipantView, ProgressMarker, SessionId,
    SessionSnapshot, SessionState, Tier, Verdict,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::MatchError;

/// One of the two sides of a session.
#[derive(Debug)]
pub struct Participant {
    pub identity: IdentityId,
    /// Sent `match:join` at least once.
    pub joined: bool,
    /// Has a live channel right now.
    pub connected: bool,
    pub progress: Option<ProgressMarker>,
    pub last_verdict: Option<Verdict>,
    /// Bumped on every loss and return; a grace timer only acts if the
    /// epoch it was started with is still current.
    pub(crate) grace_epoch: u64,
    pub(crate) grace_timer: Option<JoinHandle<()>>,
}

impl Participant {
    fn new(identity: IdentityId) -> Self {
        Self {
            identity,
            joined: false,
            connected: true,
            progress: None,
            last_verdict: None,
            grace_epoch: 0,
            grace_timer: None,
        }
    }

    fn view(&self) -> ParticipantView {
        ParticipantView {
            joined: self.joined,
            connected: self.connected,
            progress: self.progress.clone(),
        }
    }
}

/// A paired, time-bounded match.
///
/// Always exactly two distinct participants, fixed at creation.
#[derive(Debug)]
pub struct MatchSession {
    pub id: SessionId,
    pub tier: Tier,
    pub clock: MatchClock,
    pub created_at: Instant,
    state: SessionState,
    participants: [Participant; 2],
    pub winner: Option<IdentityId>,
    pub abandon_reason: Option<AbandonReason>,
    pub(crate) join_timer: Option<JoinHandle<()>>,
    pub(crate) duration_timer: Option<JoinHandle<()>>,
    pub(crate) retention_timer: Option<JoinHandle<()>>,
}

impl MatchSession {
    pub(crate) fn new(
        id: SessionId,
        a: IdentityId,
        b: IdentityId,
        tier: Tier,
        clock: MatchClock,
    ) -> Self {
        debug_assert_ne!(a, b, "a session needs two distinct participants");
        Self {
            id,
            tier,
            clock,
            created_at: Instant::now(),
            state: SessionState::Pending,
            participants: [Participant::new(a), Participant::new(b)],
            winner: None,
            abandon_reason: None,
            join_timer: None,
            duration_timer: None,
            retention_timer: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves to `target` if that is a legal edge.
    ///
    /// # Errors
    /// [`MatchError::SessionClosed`] from a terminal state and
    /// [`MatchError::NotStarted`] for `Pending → Completed`.
    pub(crate) fn transition(&mut self, target: SessionState) -> Result<(), MatchError> {
        if self.state.can_transition_to(target) {
            tracing::debug!(
                session_id = %self.id,
                from = %self.state,
                to = %target,
                "session state transition"
            );
            self.state = target;
            Ok(())
        } else if self.state.is_terminal() {
            Err(MatchError::SessionClosed(self.id.clone()))
        } else {
            Err(MatchError::NotStarted(self.id.clone()))
        }
    }

    /// The error a mutation of this terminal session reports.
    pub(crate) fn closed_error(&self) -> MatchError {
        match self.abandon_reason {
            Some(AbandonReason::JoinTimeout) => MatchError::MatchTimeout(self.id.clone()),
            _ => MatchError::SessionClosed(self.id.clone()),
        }
    }

    /// Both participant ids, in pairing order.
    pub fn identities(&self) -> [IdentityId; 2] {
        [self.participants[0].identity, self.participants[1].identity]
    }

    pub fn participant(&self, identity: IdentityId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.identity == identity)
    }

    pub(crate) fn participant_mut(&mut self, identity: IdentityId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.identity == identity)
    }

    /// The other side of the session from `identity`.
    pub fn opponent_of(&self, identity: IdentityId) -> Option<&Participant> {
        match self.identities() {
            [a, _] if a == identity => Some(&self.participants[1]),
            [_, b] if b == identity => Some(&self.participants[0]),
            _ => None,
        }
    }

    /// Looks up `identity` or reports that it is not a participant.
    pub(crate) fn require_participant(&self, identity: IdentityId) -> Result<(), MatchError> {
        match self.participant(identity) {
            Some(_) => Ok(()),
            None => Err(MatchError::NotAParticipant(identity, self.id.clone())),
        }
    }

    pub fn both_joined(&self) -> bool {
        self.participants.iter().all(|p| p.joined)
    }

    pub fn both_disconnected(&self) -> bool {
        self.participants.iter().all(|p| !p.connected)
    }

    /// Why a `Pending` session that reached its scheduled start is
    /// abandoned: a side that is still without a channel left, otherwise
    /// someone simply did not join in time.
    pub(crate) fn join_deadline_reason(&self) -> AbandonReason {
        if self.participants.iter().any(|p| !p.connected) {
            AbandonReason::OpponentLeft
        } else {
            AbandonReason::JoinTimeout
        }
    }

    /// The session as `identity` sees it at `now`.
    pub fn snapshot_for(&self, identity: IdentityId, now: Instant) -> Option<SessionSnapshot> {
        let you = self.participant(identity)?;
        let opponent = self.opponent_of(identity)?;
        Some(SessionSnapshot {
            match_id: self.id.clone(),
            difficulty: self.tier,
            state: self.state,
            scheduled_start: self.clock.scheduled_start_unix_ms(),
            elapsed_ms: self.clock.reading_at(now).as_millis(),
            you: you.view(),
            opponent: opponent.view(),
        })
    }

    /// Aborts every pending timer. Called on entering a terminal state.
    pub(crate) fn cancel_timers(&mut self) {
        let timers = [
            self.join_timer.take(),
            self.duration_timer.take(),
            self.participants[0].grace_timer.take(),
            self.participants[1].grace_timer.take(),
        ];
        for timer in timers.into_iter().flatten() {
            timer.abort();
        }
    }
}

//! The session manager: owns every match session and its timers.
//!
//! # Locking
//!
//! The live table maps each id to an `Arc<Mutex<MatchSession>>`, so every
//! mutation of one session is serialized by that session's own lock while
//! unrelated sessions proceed in parallel. The table lock itself is only
//! held long enough to clone the `Arc`; it is never held while waiting for
//! a session lock.
//!
//! Order: session → live table → identity index → archive → registry.
//!
//! # Timers
//!
//! Each session gets spawned Tokio tasks that sleep until a deadline and
//! then re-enter the manager:
//!
//! ```text
//! create ──▶ join deadline (= scheduled start) ──▶ abandon if still Pending
//! Active ──▶ match deadline (start + duration)  ──▶ complete with timeout
//! loss   ──▶ reconnect grace                    ──▶ abandon if still gone
//! Completed ─▶ retention                        ──▶ archive
//! ```
//!
//! Every timer re-checks the session state under the lock before acting,
//! and a timer that fires takes its own handle out of the session first so
//! the cleanup it triggers never aborts the task it is running on.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use codeduel_clock::{MatchClock, TimingConfig};
use codeduel_protocol::{
    AbandonReason, IdentityId, MatchOutcome, OPPONENT_LABEL, ProgressMarker,
    ServerEvent, SessionId, SessionSnapshot, SessionState, Tier, Verdict,
};
use codeduel_registry::ConnectionRegistry;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::{EvaluationMode, MatchError, MatchSession};

type SharedSession = Arc<Mutex<MatchSession>>;

/// What remains of a session after it leaves the live table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedSession {
    pub id: SessionId,
    pub tier: Tier,
    pub state: SessionState,
    pub identities: [IdentityId; 2],
    pub winner: Option<IdentityId>,
    pub abandon_reason: Option<AbandonReason>,
}

impl ArchivedSession {
    fn closed_error(&self) -> MatchError {
        match self.abandon_reason {
            Some(AbandonReason::JoinTimeout) => MatchError::MatchTimeout(self.id.clone()),
            _ => MatchError::SessionClosed(self.id.clone()),
        }
    }
}

impl From<&MatchSession> for ArchivedSession {
    fn from(session: &MatchSession) -> Self {
        Self {
            id: session.id.clone(),
            tier: session.tier,
            state: session.state(),
            identities: session.identities(),
            winner: session.winner,
            abandon_reason: session.abandon_reason,
        }
    }
}

/// Bounded FIFO of terminal sessions.
struct Archive {
    capacity: usize,
    order: VecDeque<SessionId>,
    entries: HashMap<SessionId, ArchivedSession>,
}

impl Archive {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn insert(&mut self, archived: ArchivedSession) {
        if self.capacity == 0 {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        self.order.push_back(archived.id.clone());
        self.entries.insert(archived.id.clone(), archived);
    }

    fn get(&self, id: &SessionId) -> Option<&ArchivedSession> {
        self.entries.get(id)
    }
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    JoinDeadline,
    MatchDeadline,
    Grace { identity: IdentityId, epoch: u64 },
    Retention,
}

/// Owns every live session, drives its timers and archives it when done.
///
/// Shared as `Arc<SessionManager>`; methods that start timers take
/// `self: &Arc<Self>` so the spawned task can hold its own reference.
pub struct SessionManager {
    config: TimingConfig,
    registry: Arc<ConnectionRegistry>,
    sessions: Mutex<HashMap<SessionId, SharedSession>>,
    /// Latest session of each identity, live or retained.
    by_identity: Mutex<HashMap<IdentityId, SessionId>>,
    archive: Mutex<Archive>,
}

impl SessionManager {
    pub fn new(
        config: TimingConfig,
        registry: Arc<ConnectionRegistry>,
        archive_capacity: usize,
    ) -> Self {
        Self {
            config: config.validated(),
            registry,
            sessions: Mutex::new(HashMap::new()),
            by_identity: Mutex::new(HashMap::new()),
            archive: Mutex::new(Archive::new(archive_capacity)),
        }
    }

    pub fn config(&self) -> &TimingConfig {
        &self.config
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Allocates a `Pending` session for `a` and `b` and sends both of
    /// them `match:found`.
    ///
    /// The scheduled start is one join buffer from now. If both have not
    /// joined by then the session is abandoned with
    /// [`AbandonReason::JoinTimeout`].
    pub async fn create_session(
        self: &Arc<Self>,
        a: IdentityId,
        b: IdentityId,
        tier: Tier,
    ) -> SessionId {
        let id = SessionId::new(generate_match_id());
        let clock = MatchClock::schedule(self.config.join_buffer);

        let mut session = MatchSession::new(id.clone(), a, b, tier, clock);
        session.join_timer =
            Some(self.spawn_timer(clock.scheduled_start(), id.clone(), Timer::JoinDeadline));

        self.sessions
            .lock()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        {
            let mut by_identity = self.by_identity.lock().await;
            by_identity.insert(a, id.clone());
            by_identity.insert(b, id.clone());
        }

        tracing::info!(session_id = %id, %tier, %a, %b, "match formed");

        let starts_in_ms = clock.starts_in().as_millis() as u64;
        for identity in [a, b] {
            self.notify(
                identity,
                ServerEvent::MatchFound {
                    match_id: id.clone(),
                    difficulty: tier,
                    scheduled_start: clock.scheduled_start_unix_ms(),
                    starts_in_ms,
                },
            )
            .await;
        }
        id
    }

    /// Marks `identity` as joined and returns its view of the session.
    ///
    /// Idempotent: joining again only returns a fresh snapshot, which is
    /// how a reconnecting client resumes. When the second participant
    /// joins the session becomes `Active`; its clock is not re-baselined.
    ///
    /// # Errors
    /// - [`MatchError::UnknownSession`]: no such id
    /// - [`MatchError::NotAParticipant`]: `identity` is not in the session
    /// - [`MatchError::MatchTimeout`]: the join buffer already elapsed
    /// - [`MatchError::SessionClosed`]: completed or abandoned
    pub async fn join(
        self: &Arc<Self>,
        session_id: &SessionId,
        identity: IdentityId,
    ) -> Result<SessionSnapshot, MatchError> {
        let shared = self.live(session_id).await?;
        let mut session = shared.lock().await;
        session.require_participant(identity)?;
        if session.state().is_terminal() {
            return Err(session.closed_error());
        }

        let now = Instant::now();
        if session.state() == SessionState::Pending && now >= session.clock.scheduled_start() {
            // The deadline passed but its timer has not run yet.
            let reason = session.join_deadline_reason();
            self.abandon_locked(&mut session, reason).await;
            return Err(session.closed_error());
        }

        if let Some(participant) = session.participant_mut(identity) {
            if participant.joined {
                tracing::debug!(%session_id, %identity, "repeated join");
            } else {
                participant.joined = true;
                tracing::info!(%session_id, %identity, "participant joined");
            }
        }

        if session.state() == SessionState::Pending && session.both_joined() {
            session.transition(SessionState::Active)?;
            if let Some(timer) = session.join_timer.take() {
                timer.abort();
            }
            let deadline = session.clock.deadline(self.config.match_duration);
            session.duration_timer =
                Some(self.spawn_timer(deadline, session_id.clone(), Timer::MatchDeadline));

            tracing::info!(
                %session_id,
                starts_in_ms = session.clock.starts_in().as_millis() as u64,
                "session active"
            );
            let scheduled_start = session.clock.scheduled_start_unix_ms();
            for participant in session.identities() {
                self.notify(
                    participant,
                    ServerEvent::MatchStarted {
                        match_id: session_id.clone(),
                        scheduled_start,
                    },
                )
                .await;
            }
        }

        session
            .snapshot_for(identity, now)
            .ok_or_else(|| MatchError::NotAParticipant(identity, session_id.clone()))
    }

    /// Stores `identity`'s progress marker and relays it, unchanged, to
    /// the opponent only.
    pub async fn record_progress(
        &self,
        session_id: &SessionId,
        identity: IdentityId,
        marker: ProgressMarker,
    ) -> Result<(), MatchError> {
        let shared = self.live(session_id).await?;
        let mut session = shared.lock().await;
        session.require_participant(identity)?;
        if session.state().is_terminal() {
            return Err(session.closed_error());
        }

        if let Some(participant) = session.participant_mut(identity) {
            participant.progress = Some(marker.clone());
        }
        if let Some(opponent) = session.opponent_of(identity).map(|p| p.identity) {
            self.notify(
                opponent,
                ServerEvent::OpponentProgress {
                    match_id: session_id.clone(),
                    opponent: OPPONENT_LABEL.to_string(),
                    marker,
                },
            )
            .await;
        }
        tracing::debug!(%session_id, %identity, "progress relayed");
        Ok(())
    }

    /// Completes an active session with `winner` and notifies both sides.
    ///
    /// # Errors
    /// [`MatchError::NotStarted`] while `Pending`, and the usual lookup
    /// and closed-session errors.
    pub async fn complete(
        self: &Arc<Self>,
        session_id: &SessionId,
        winner: IdentityId,
        verdict: Verdict,
    ) -> Result<(), MatchError> {
        let shared = self.live(session_id).await?;
        let mut session = shared.lock().await;
        session.require_participant(winner)?;
        match session.state() {
            SessionState::Active => {
                self.finish_locked(&mut session, Some(winner), Some(verdict))
                    .await;
                Ok(())
            }
            SessionState::Pending => Err(MatchError::NotStarted(session_id.clone())),
            SessionState::Completed | SessionState::Abandoned => Err(session.closed_error()),
        }
    }

    /// Checks that `identity` may send code to the sandbox right now: the
    /// session is active and its clock has reached the scheduled start.
    pub async fn check_submittable(
        &self,
        session_id: &SessionId,
        identity: IdentityId,
    ) -> Result<(), MatchError> {
        let shared = self.live(session_id).await?;
        let session = shared.lock().await;
        session.require_participant(identity)?;
        match session.state() {
            SessionState::Active if session.clock.reading().has_started() => Ok(()),
            SessionState::Pending | SessionState::Active => {
                Err(MatchError::NotStarted(session_id.clone()))
            }
            SessionState::Completed | SessionState::Abandoned => Err(session.closed_error()),
        }
    }

    /// Delivers a sandbox verdict.
    ///
    /// A run verdict goes to the sender only. A submit verdict goes to the
    /// sender, the opponent is told a submission happened, and an accepted
    /// verdict completes the session with the sender as winner.
    pub async fn record_submission(
        self: &Arc<Self>,
        session_id: &SessionId,
        identity: IdentityId,
        mode: EvaluationMode,
        verdict: Verdict,
    ) -> Result<(), MatchError> {
        let shared = self.live(session_id).await?;
        let mut session = shared.lock().await;
        session.require_participant(identity)?;
        if session.state().is_terminal() {
            return Err(session.closed_error());
        }

        match mode {
            EvaluationMode::Run => {
                self.notify(
                    identity,
                    ServerEvent::RunResult {
                        match_id: session_id.clone(),
                        verdict,
                    },
                )
                .await;
            }
            EvaluationMode::Submit => {
                if session.state() != SessionState::Active {
                    return Err(MatchError::NotStarted(session_id.clone()));
                }
                if let Some(participant) = session.participant_mut(identity) {
                    participant.last_verdict = Some(verdict.clone());
                }
                tracing::info!(
                    %session_id,
                    %identity,
                    status = ?verdict.status,
                    passed = verdict.test_cases_passed,
                    total = verdict.total_test_cases,
                    "submission graded"
                );

                self.notify(
                    identity,
                    ServerEvent::Submission {
                        match_id: session_id.clone(),
                        verdict: verdict.clone(),
                    },
                )
                .await;
                if let Some(opponent) = session.opponent_of(identity).map(|p| p.identity) {
                    self.notify(
                        opponent,
                        ServerEvent::OpponentSubmitted {
                            match_id: session_id.clone(),
                            status: verdict.status,
                            passed: verdict.test_cases_passed,
                            total: verdict.total_test_cases,
                        },
                    )
                    .await;
                }

                if verdict.is_accepted() {
                    self.finish_locked(&mut session, Some(identity), Some(verdict))
                        .await;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------

    /// Reacts to `identity` losing its channel while in `session_id`.
    ///
    /// - `Pending`: only marked disconnected. A client that swaps sockets
    ///   before joining comes back through
    ///   [`on_identity_returned`](Self::on_identity_returned); one that does
    ///   not is abandoned at the join deadline with
    ///   [`AbandonReason::OpponentLeft`].
    /// - `Active`: a reconnect grace window starts; the opponent is told.
    /// - `Completed`: archived once both sides are gone.
    pub async fn on_participant_lost(self: &Arc<Self>, session_id: &SessionId, identity: IdentityId) {
        let Ok(shared) = self.live(session_id).await else {
            return;
        };
        let mut session = shared.lock().await;
        let state = session.state();
        let grace = self.config.reconnect_grace;

        let Some(participant) = session.participant_mut(identity) else {
            return;
        };
        participant.connected = false;

        match state {
            SessionState::Pending => {
                tracing::info!(%session_id, %identity, "participant lost before start");
            }
            SessionState::Active => {
                participant.grace_epoch += 1;
                let epoch = participant.grace_epoch;
                let timer = self.spawn_timer(
                    Instant::now() + grace,
                    session_id.clone(),
                    Timer::Grace { identity, epoch },
                );
                if let Some(previous) = participant.grace_timer.replace(timer) {
                    previous.abort();
                }
                tracing::info!(
                    %session_id,
                    %identity,
                    grace_ms = grace.as_millis() as u64,
                    "participant lost, grace window started"
                );

                if let Some(opponent) = session.opponent_of(identity).map(|p| p.identity) {
                    self.notify(
                        opponent,
                        ServerEvent::OpponentDisconnected {
                            match_id: session_id.clone(),
                            grace_ms: grace.as_millis() as u64,
                        },
                    )
                    .await;
                }
            }
            SessionState::Completed => {
                if session.both_disconnected() {
                    self.archive_locked(&mut session).await;
                }
            }
            SessionState::Abandoned => {}
        }
    }

    /// Routes a lost channel to the identity's current session, if any.
    pub async fn on_identity_lost(self: &Arc<Self>, identity: IdentityId) {
        let session_id = self.by_identity.lock().await.get(&identity).cloned();
        if let Some(session_id) = session_id {
            self.on_participant_lost(&session_id, identity).await;
        }
    }

    /// Reacts to `identity` registering a channel again.
    ///
    /// Cancels a running grace window and tells the opponent. Before the
    /// start it only clears the disconnected mark. A no-op if the identity
    /// was never marked disconnected.
    pub async fn on_identity_returned(&self, identity: IdentityId) {
        let session_id = self.by_identity.lock().await.get(&identity).cloned();
        let Some(session_id) = session_id else {
            return;
        };
        let Ok(shared) = self.live(&session_id).await else {
            return;
        };
        let mut session = shared.lock().await;
        let state = session.state();

        let Some(participant) = session.participant_mut(identity) else {
            return;
        };
        if participant.connected {
            return;
        }
        participant.connected = true;
        participant.grace_epoch += 1;
        let in_grace = match participant.grace_timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        };

        if state == SessionState::Pending {
            tracing::info!(%session_id, %identity, "participant back before start");
        } else if state == SessionState::Active && in_grace {
            tracing::info!(%session_id, %identity, "participant reconnected within grace");
            if let Some(opponent) = session.opponent_of(identity).map(|p| p.identity) {
                self.notify(
                    opponent,
                    ServerEvent::OpponentReconnected {
                        match_id: session_id.clone(),
                    },
                )
                .await;
            }
        }
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// `identity`'s view of the session without joining it.
    pub async fn snapshot(
        &self,
        session_id: &SessionId,
        identity: IdentityId,
    ) -> Result<SessionSnapshot, MatchError> {
        let shared = self.live(session_id).await?;
        let session = shared.lock().await;
        session
            .snapshot_for(identity, Instant::now())
            .ok_or_else(|| MatchError::NotAParticipant(identity, session_id.clone()))
    }

    /// The session `identity` is playing in, if it has not ended.
    pub async fn session_of(&self, identity: IdentityId) -> Option<SessionId> {
        let session_id = self.by_identity.lock().await.get(&identity).cloned()?;
        let shared = self.live(&session_id).await.ok()?;
        let session = shared.lock().await;
        (!session.state().is_terminal()).then_some(session_id)
    }

    /// Current state of a live or archived session.
    pub async fn state_of(&self, session_id: &SessionId) -> Option<SessionState> {
        let live = self.sessions.lock().await.get(session_id).cloned();
        match live {
            Some(shared) => Some(shared.lock().await.state()),
            None => self.archive.lock().await.get(session_id).map(|a| a.state),
        }
    }

    pub async fn archived(&self, session_id: &SessionId) -> Option<ArchivedSession> {
        self.archive.lock().await.get(session_id).cloned()
    }

    /// Number of sessions in the live table, terminal ones included.
    pub async fn live_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    /// Clones the live session handle, or reports why there is none.
    async fn live(&self, session_id: &SessionId) -> Result<SharedSession, MatchError> {
        let found = self.sessions.lock().await.get(session_id).cloned();
        if let Some(shared) = found {
            return Ok(shared);
        }
        match self.archive.lock().await.get(session_id) {
            Some(archived) => Err(archived.closed_error()),
            None => Err(MatchError::UnknownSession(session_id.clone())),
        }
    }

    async fn notify(&self, identity: IdentityId, event: ServerEvent) {
        if let Err(err) = self.registry.send(identity, event).await {
            tracing::debug!(%identity, %err, "notification dropped");
        }
    }

    /// `Active → Completed`. `winner: None` means the clock ran out.
    async fn finish_locked(
        self: &Arc<Self>,
        session: &mut MatchSession,
        winner: Option<IdentityId>,
        verdict: Option<Verdict>,
    ) {
        if let Err(err) = session.transition(SessionState::Completed) {
            tracing::debug!(session_id = %session.id, %err, "completion ignored");
            return;
        }
        session.winner = winner;
        session.cancel_timers();

        match winner {
            Some(winner) => {
                tracing::info!(session_id = %session.id, %winner, "session completed")
            }
            None => tracing::info!(session_id = %session.id, "session completed on time limit"),
        }

        for identity in session.identities() {
            let result = match winner {
                None => MatchOutcome::Timeout,
                Some(w) if w == identity => MatchOutcome::Win,
                Some(_) => MatchOutcome::Loss,
            };
            self.notify(
                identity,
                ServerEvent::MatchComplete {
                    match_id: session.id.clone(),
                    verdict: verdict.clone(),
                    result,
                },
            )
            .await;
        }

        if session.both_disconnected() {
            self.archive_locked(session).await;
        } else {
            let at = Instant::now() + self.config.completed_retention;
            session.retention_timer = Some(self.spawn_timer(at, session.id.clone(), Timer::Retention));
        }
    }

    /// `Pending | Active → Abandoned`, then archive.
    async fn abandon_locked(&self, session: &mut MatchSession, reason: AbandonReason) {
        if let Err(err) = session.transition(SessionState::Abandoned) {
            tracing::debug!(session_id = %session.id, %err, "abandon ignored");
            return;
        }
        session.abandon_reason = Some(reason);
        session.cancel_timers();
        tracing::warn!(session_id = %session.id, ?reason, "session abandoned");

        for identity in session.identities() {
            self.notify(
                identity,
                ServerEvent::MatchAbandoned {
                    match_id: session.id.clone(),
                    reason,
                },
            )
            .await;
        }
        self.archive_locked(session).await;
    }

    /// Moves a terminal session out of the live table.
    async fn archive_locked(&self, session: &mut MatchSession) {
        if let Some(timer) = session.retention_timer.take() {
            timer.abort();
        }
        self.sessions.lock().await.remove(&session.id);
        {
            let mut by_identity = self.by_identity.lock().await;
            for identity in session.identities() {
                if by_identity.get(&identity) == Some(&session.id) {
                    by_identity.remove(&identity);
                }
            }
        }
        self.archive.lock().await.insert(ArchivedSession::from(&*session));
        tracing::debug!(session_id = %session.id, state = %session.state(), "session archived");
    }

    fn spawn_timer(self: &Arc<Self>, at: Instant, session_id: SessionId, timer: Timer) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            time::sleep_until(at).await;
            manager.on_timer(&session_id, timer).await;
        })
    }

    async fn on_timer(self: &Arc<Self>, session_id: &SessionId, timer: Timer) {
        let Ok(shared) = self.live(session_id).await else {
            return;
        };
        let mut session = shared.lock().await;

        match timer {
            Timer::JoinDeadline => {
                session.join_timer.take();
                if session.state() == SessionState::Pending {
                    let reason = session.join_deadline_reason();
                    self.abandon_locked(&mut session, reason).await;
                }
            }
            Timer::MatchDeadline => {
                session.duration_timer.take();
                if session.state() == SessionState::Active {
                    self.finish_locked(&mut session, None, None).await;
                }
            }
            Timer::Grace { identity, epoch } => {
                let Some(participant) = session.participant_mut(identity) else {
                    return;
                };
                if participant.grace_epoch != epoch || participant.connected {
                    return;
                }
                participant.grace_timer.take();
                if session.state() == SessionState::Active {
                    tracing::warn!(%session_id, %identity, "reconnect grace expired");
                    self.abandon_locked(&mut session, AbandonReason::GraceExpired)
                        .await;
                }
            }
            Timer::Retention => {
                session.retention_timer.take();
                if session.state() == SessionState::Completed {
                    self.archive_locked(&mut session).await;
                }
            }
        }
    }
}

/// Random 32-character hex session id.
///
/// Clients put the id in a URL, so it is unguessable rather than
/// sequential.
fn generate_match_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

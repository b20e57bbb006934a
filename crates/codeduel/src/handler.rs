//! Per-connection handler: authentication, outbound writer and event
//! routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Take the credential from the upgrade URL, or from a first `auth`
//!      frame → exchange it for an `Identity`
//!   2. Start the writer task and register the channel → `connection:ack`
//!   3. Loop: receive frames → dispatch to the matcher or session manager
//!
//! Rejections never close the channel; they come back as
//! `error {code, reason}` and the loop continues.

use std::sync::Arc;

use codeduel_clock::unix_millis;
use codeduel_match::{EvaluationMode, EvaluationRequest, Evaluator, MatchError};
use codeduel_protocol::{
    ClientEvent, Codec, Identity, IdentityId, ProtocolError, ServerEvent, SessionId,
};
use codeduel_registry::{Authenticator, Outbound, OutboundSender, RegistryError};
use codeduel_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::mpsc;

use crate::CodeduelError;
use crate::server::ServerState;

/// Drop guard that unregisters the channel when the handler exits.
///
/// This ensures cleanup happens even if the handler panics. Since `Drop`
/// is synchronous, we spawn a fire-and-forget task for the async lock.
struct RegistrationGuard<A: Authenticator, E: Evaluator, C: Codec> {
    conn_id: ConnectionId,
    state: Arc<ServerState<A, E, C>>,
}

impl<A: Authenticator, E: Evaluator, C: Codec> Drop for RegistrationGuard<A, E, C> {
    fn drop(&mut self) {
        let conn_id = self.conn_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            state.registry.unregister(conn_id).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, E, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, E, C>>,
) -> Result<(), CodeduelError>
where
    A: Authenticator,
    E: Evaluator,
    C: Codec,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Authenticate ---
    let identity = authenticate(&conn, &state).await?;
    let identity_id = identity.id;
    tracing::info!(%conn_id, identity = %identity_id, "identity authenticated");

    // --- Step 2: Writer and registration ---
    let conn = Arc::new(conn);
    let (outbox, outbound) = mpsc::unbounded_channel();
    tokio::spawn(write_outbound(Arc::clone(&conn), outbound, Arc::clone(&state)));

    // Queued before registering so nothing routed to the identity can
    // overtake it.
    let _ = outbox.send(Outbound::Event(ServerEvent::ConnectionAck {
        user_id: identity_id,
        display_name: identity.display_name.clone(),
        server_time: unix_millis(),
    }));
    state
        .registry
        .register(identity, conn_id, outbox.clone())
        .await;
    let _guard = RegistrationGuard {
        conn_id,
        state: Arc::clone(&state),
    };

    // --- Step 3: Event loop ---
    loop {
        let data = match tokio::time::timeout(state.config.idle_timeout, conn.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(identity = %identity_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(identity = %identity_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(identity = %identity_id, "connection idle, closing");
                let _ = outbox.send(Outbound::Close);
                break;
            }
        };

        let result = match state.codec.decode::<ClientEvent>(&data) {
            Ok(event) => {
                let name = event.name();
                tracing::debug!(identity = %identity_id, event = name, "routing event");
                dispatch(&state, identity_id, &outbox, event)
                    .await
                    .map_err(|e| (name, e))
            }
            Err(e) => Err(("frame", e.into())),
        };

        if let Err((name, e)) = result {
            tracing::warn!(identity = %identity_id, event = name, error = %e, "event rejected");
            let rejection = ServerEvent::Error {
                code: e.code(),
                reason: e.to_string(),
            };
            if outbox.send(Outbound::Event(rejection)).is_err() {
                break;
            }
        }
    }

    // _guard drops here → unregister fires.
    Ok(())
}

/// Exchanges the channel's credential for an identity.
///
/// The credential comes from the upgrade URL when present; otherwise the
/// first frame must be `auth {token}` and arrive within the auth timeout.
/// A rejected credential is reported with code 401 and the channel closed.
async fn authenticate<A, E, C>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<A, E, C>>,
) -> Result<Identity, CodeduelError>
where
    A: Authenticator,
    E: Evaluator,
    C: Codec,
{
    let credential = match conn.credential() {
        Some(token) => token.to_owned(),
        None => match first_frame_credential(conn, state).await {
            Ok(token) => token,
            Err(e) => {
                reject(conn, &state.codec, &e).await;
                return Err(e);
            }
        },
    };

    match state.auth.authenticate(&credential).await {
        Ok(identity) => Ok(identity),
        Err(e) => {
            let e = CodeduelError::Registry(e);
            reject(conn, &state.codec, &e).await;
            Err(e)
        }
    }
}

async fn first_frame_credential<A, E, C>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<A, E, C>>,
) -> Result<String, CodeduelError>
where
    A: Authenticator,
    E: Evaluator,
    C: Codec,
{
    let data = match tokio::time::timeout(state.config.auth_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before auth".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(CodeduelError::Transport(e)),
        Err(_) => {
            return Err(RegistryError::AuthFailed("no credential before timeout".into()).into());
        }
    };

    match state.codec.decode::<ClientEvent>(&data)? {
        ClientEvent::Auth { token } => Ok(token),
        other => Err(RegistryError::AuthFailed(format!(
            "expected auth as first frame, got {}",
            other.name()
        ))
        .into()),
    }
}

/// Sends a rejection straight to the socket and closes it. Only used
/// before the writer task exists.
async fn reject(conn: &WebSocketConnection, codec: &impl Codec, error: &CodeduelError) {
    let rejection = ServerEvent::Error {
        code: error.code(),
        reason: error.to_string(),
    };
    if let Ok(bytes) = codec.encode(&rejection) {
        let _ = conn.send(&bytes).await;
    }
    let _ = conn.close().await;
}

/// Drains the outbound queue into the socket until it closes.
async fn write_outbound<A, E, C>(
    conn: Arc<WebSocketConnection>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    state: Arc<ServerState<A, E, C>>,
) where
    A: Authenticator,
    E: Evaluator,
    C: Codec,
{
    let conn_id = conn.id();
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Event(event) => {
                let bytes = match state.codec.encode(&event) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!(%conn_id, error = %e, "failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = conn.send(&bytes).await {
                    tracing::debug!(%conn_id, error = %e, "send failed, writer stopping");
                    break;
                }
            }
            Outbound::Close => {
                let _ = conn.close().await;
                break;
            }
        }
    }
}

/// Routes one client event. Replies go through `outbox`; everything a
/// subsystem pushes goes through the registry.
async fn dispatch<A, E, C>(
    state: &Arc<ServerState<A, E, C>>,
    identity: IdentityId,
    outbox: &OutboundSender,
    event: ClientEvent,
) -> Result<(), CodeduelError>
where
    A: Authenticator,
    E: Evaluator,
    C: Codec,
{
    match event {
        ClientEvent::Auth { .. } => {
            return Err(ProtocolError::InvalidMessage("already authenticated".into()).into());
        }

        ClientEvent::QueueJoin { difficulty } => {
            state.matcher.enqueue(identity, difficulty).await?;
        }

        // A stale difficulty is ignored: the identity has one entry at most.
        ClientEvent::QueueLeave { .. } => {
            state.matcher.dequeue(identity).await;
        }

        ClientEvent::MatchJoin { match_id } => {
            let snapshot = state.sessions.join(&match_id, identity).await?;
            let _ = outbox.send(Outbound::Event(ServerEvent::MatchState(snapshot)));
        }

        ClientEvent::MatchProgress { match_id, marker } => {
            state
                .sessions
                .record_progress(&match_id, identity, marker)
                .await?;
        }

        ClientEvent::MatchRun {
            match_id,
            code,
            language,
        } => {
            evaluate(state, identity, match_id, EvaluationMode::Run, code, language).await?;
        }

        ClientEvent::MatchSubmit {
            match_id,
            code,
            language,
        } => {
            evaluate(state, identity, match_id, EvaluationMode::Submit, code, language).await?;
        }

        ClientEvent::Ping { client_time } => {
            let _ = outbox.send(Outbound::Event(ServerEvent::Pong {
                client_time,
                server_time: unix_millis(),
            }));
        }
    }
    Ok(())
}

/// Checks the session accepts code now, then grades it on its own task.
///
/// The verdict, or the sandbox failure, reaches the identity through the
/// registry once the evaluator returns.
async fn evaluate<A, E, C>(
    state: &Arc<ServerState<A, E, C>>,
    identity: IdentityId,
    match_id: SessionId,
    mode: EvaluationMode,
    code: String,
    language: String,
) -> Result<(), MatchError>
where
    A: Authenticator,
    E: Evaluator,
    C: Codec,
{
    state.sessions.check_submittable(&match_id, identity).await?;

    let state = Arc::clone(state);
    tokio::spawn(async move {
        let request = EvaluationRequest {
            mode,
            code,
            language,
        };
        let outcome = match state.evaluator.evaluate(&match_id, request).await {
            Ok(verdict) => {
                state
                    .sessions
                    .record_submission(&match_id, identity, mode, verdict)
                    .await
            }
            Err(e) => Err(MatchError::from(e)),
        };

        if let Err(e) = outcome {
            tracing::warn!(%identity, session_id = %match_id, error = %e, "evaluation rejected");
            let rejection = ServerEvent::Error {
                code: e.code(),
                reason: e.to_string(),
            };
            let _ = state.registry.send(identity, rejection).await;
        }
    });
    Ok(())
}

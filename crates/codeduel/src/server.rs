//! `CodeduelServer` builder and server loop.
//!
//! This is the entry point for running a Codeduel server. It ties together
//! all the layers: transport → protocol → registry → match.

use std::sync::Arc;
use std::time::Duration;

use codeduel_clock::TimingConfig;
use codeduel_match::{DifficultyQueue, Evaluator, Matcher, SessionManager};
use codeduel_protocol::{Codec, JsonCodec};
use codeduel_registry::{Authenticator, ConnectionRegistry, PresenceEvent, PresenceReceiver};
use codeduel_transport::{Transport, WebSocketTransport};

use crate::CodeduelError;
use crate::handler::handle_connection;

/// Per-connection limits and server-wide sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// How long a channel opened without a `token` query parameter may
    /// take to send its `auth` frame.
    pub auth_timeout: Duration,
    /// A channel that sends nothing for this long is closed.
    pub idle_timeout: Duration,
    /// Terminal sessions kept for late lookups.
    pub archive_capacity: usize,
    /// Period of the matcher's retry sweep.
    pub sweep_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            archive_capacity: 256,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<A: Authenticator, E: Evaluator, C: Codec> {
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) matcher: Arc<Matcher>,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) auth: A,
    pub(crate) evaluator: E,
    pub(crate) codec: C,
    pub(crate) config: RouterConfig,
}

/// Builder for configuring and starting a Codeduel server.
///
/// # Example
///
/// ```rust,ignore
/// use codeduel::prelude::*;
///
/// let server = CodeduelServer::builder()
///     .bind("0.0.0.0:8000")
///     .timing(TimingConfig::default())
///     .build(my_auth, my_evaluator)
///     .await?;
/// server.run().await
/// ```
pub struct CodeduelServerBuilder {
    bind_addr: String,
    timing: TimingConfig,
    router: RouterConfig,
}

impl CodeduelServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            timing: TimingConfig::default(),
            router: RouterConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the match timing. Out-of-range values are clamped on build.
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Sets the per-connection limits.
    pub fn router_config(mut self, config: RouterConfig) -> Self {
        self.router = config;
        self
    }

    /// Binds the listener and wires the layers together.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<A: Authenticator, E: Evaluator>(
        self,
        auth: A,
        evaluator: E,
    ) -> Result<CodeduelServer<A, E, JsonCodec>, CodeduelError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let (registry, presence) = ConnectionRegistry::new();
        let registry = Arc::new(registry);
        let queue = Arc::new(DifficultyQueue::new(Arc::clone(&registry)));
        let sessions = Arc::new(SessionManager::new(
            self.timing,
            Arc::clone(&registry),
            self.router.archive_capacity,
        ));
        let matcher = Arc::new(Matcher::new(
            queue,
            Arc::clone(&sessions),
            Arc::clone(&registry),
        ));

        let state = Arc::new(ServerState {
            registry,
            matcher,
            sessions,
            auth,
            evaluator,
            codec: JsonCodec,
            config: self.router,
        });

        Ok(CodeduelServer {
            transport,
            presence,
            state,
        })
    }
}

impl Default for CodeduelServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Codeduel server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct CodeduelServer<A: Authenticator, E: Evaluator, C: Codec> {
    transport: WebSocketTransport,
    presence: PresenceReceiver,
    state: Arc<ServerState<A, E, C>>,
}

impl<A, E, C> CodeduelServer<A, E, C>
where
    A: Authenticator,
    E: Evaluator,
    C: Codec,
{
    /// Creates a new builder.
    pub fn builder() -> CodeduelServerBuilder {
        CodeduelServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the server accept loop.
    ///
    /// Starts the presence coordinator and the matcher sweep, then accepts
    /// connections and spawns a handler task for each. Runs until the
    /// process is terminated.
    pub async fn run(self) -> Result<(), CodeduelError> {
        let Self {
            mut transport,
            presence,
            state,
        } = self;

        tokio::spawn(coordinate_presence(presence, Arc::clone(&state.matcher)));
        Arc::clone(&state.matcher).run_sweeper(state.config.sweep_interval);

        tracing::info!("Codeduel server running");

        loop {
            match transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Feeds registry presence changes into the queue and the sessions.
///
/// Events arrive in the order the registry produced them, so a loss is
/// always handled before the return that follows it.
async fn coordinate_presence(mut presence: PresenceReceiver, matcher: Arc<Matcher>) {
    while let Some(event) = presence.recv().await {
        match event {
            PresenceEvent::Connected(identity) => {
                matcher.sessions().on_identity_returned(identity).await;
            }
            PresenceEvent::Lost(identity) => {
                if let Some(tier) = matcher.queue().on_connection_lost(identity).await {
                    tracing::debug!(%identity, %tier, "queue entry dropped on loss");
                }
                matcher.sessions().on_identity_lost(identity).await;
            }
        }
    }
    tracing::debug!("presence channel closed");
}

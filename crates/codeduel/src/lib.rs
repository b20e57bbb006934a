//! # Codeduel
//!
//! Real-time 1v1 coding duel server: difficulty-tiered matchmaking,
//! synchronized match sessions and event relay between the two
//! participants.
//!
//! You supply two boundaries, an [`Authenticator`](prelude::Authenticator)
//! that turns a credential into an identity and an
//! [`Evaluator`](prelude::Evaluator) that grades code. The server handles
//! the channels, the queues, the session lifecycle and the timers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use codeduel::prelude::*;
//!
//! // Implement Authenticator and Evaluator, then:
//! // let server = CodeduelServer::builder()
//! //     .bind("0.0.0.0:8000")
//! //     .build(my_auth, my_evaluator)
//! //     .await?;
//! // server.run().await
//! ```

#![allow(async_fn_in_trait)]

mod error;
mod handler;
mod server;

pub use error::CodeduelError;
pub use server::{CodeduelServer, CodeduelServerBuilder, RouterConfig};

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"info"` or `"codeduel=debug"`).
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Everything needed to run a server and implement its boundaries.
pub mod prelude {
    pub use crate::{CodeduelError, CodeduelServer, CodeduelServerBuilder, RouterConfig};
    pub use codeduel_clock::TimingConfig;
    pub use codeduel_match::{
        EvaluationError, EvaluationMode, EvaluationRequest, Evaluator, MatchError,
    };
    pub use codeduel_protocol::{
        ClientEvent, Identity, IdentityId, ServerEvent, SessionId, SessionState, TestOutcome,
        Tier, Verdict, VerdictStatus,
    };
    pub use codeduel_registry::{Authenticator, RegistryError};
}

//! Matchmaking and match sessions for Codeduel.
//!
//! # Key types
//!
//! - [`DifficultyQueue`]: one FIFO per tier, at most one entry per identity
//! - [`Matcher`]: pairs the two oldest entries of a tier into a session
//! - [`SessionManager`]: session state machine, timers and archive
//! - [`MatchSession`]: one paired match between two identities
//! - [`Evaluator`]: the code-execution sandbox boundary
//!
//! # How it fits in the stack
//!
//! ```text
//! Router (above)  ← turns client events into calls on Matcher / SessionManager
//!     ↕
//! Match Layer (this crate)  ← queues, pairing, session lifecycle
//!     ↕
//! Registry Layer (below)  ← delivers events to identities' live channels
//! ```

#![allow(async_fn_in_trait)]

mod error;
mod evaluator;
mod manager;
mod matcher;
mod queue;
mod session;

pub use error::{EvaluationError, MatchError};
pub use evaluator::{EvaluationMode, EvaluationRequest, Evaluator};
pub use manager::{ArchivedSession, SessionManager};
pub use matcher::{Matcher, SearchStatus};
pub use queue::{DifficultyQueue, QueueEntry, TierGuard};
pub use session::{MatchSession, Participant};

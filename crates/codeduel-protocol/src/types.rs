//! Identity, tier, session-state and verdict types shared by every layer.
//!
//! All of these travel on the wire, so their serde shape is part of the
//! contract with the browser client and is pinned down by the tests at the
//! bottom of this file.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The stable id of an authenticated user.
///
/// Newtype over `u64` so an identity can never be confused with a
/// connection id or a count. `#[serde(transparent)]` keeps it a plain
/// number on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IdentityId(pub u64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// An authenticated user: id plus display name.
///
/// Resolved once when a channel opens and held for the lifetime of that
/// connection; handlers never re-resolve it per message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: IdentityId,
    pub display_name: String,
}

impl Identity {
    pub fn new(id: u64, display_name: impl Into<String>) -> Self {
        Self {
            id: IdentityId(id),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.display_name)
    }
}

/// The id of one match session.
///
/// Opaque string on the wire (`matchId`); clients put it in the editor URL,
/// so it is random rather than sequential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Difficulty bucket. Each tier has its own queue and tiers never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Easy,
    Medium,
    Hard,
}

impl Tier {
    /// Every tier, in a fixed order usable as an array index.
    pub const ALL: [Tier; 3] = [Tier::Easy, Tier::Medium, Tier::Hard];

    /// Position of this tier in [`Tier::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::Easy => 0,
            Self::Medium => 1,
            Self::Hard => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Easy => write!(f, "easy"),
            Self::Medium => write!(f, "medium"),
            Self::Hard => write!(f, "hard"),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of a match session.
///
/// ```text
/// Pending ──(both joined)──→ Active ──(accepted / time up)──→ Completed
///    │                          │
///    └──(timeout / left)──→ Abandoned ←──(grace expired)──┘
/// ```
///
/// `Completed` and `Abandoned` are terminal: nothing leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Active,
    Completed,
    Abandoned,
}

impl SessionState {
    /// `true` for `Completed` and `Abandoned`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    /// Returns `true` if moving from `self` to `target` is a legal edge.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Active)
                | (Self::Pending, Self::Abandoned)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Abandoned)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Why a session was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AbandonReason {
    /// The join buffer elapsed before both participants sent `match:join`.
    JoinTimeout,
    /// A participant's channel was lost while the session was pending.
    OpponentLeft,
    /// An active participant did not reconnect within the grace window.
    GraceExpired,
}

/// How a completed session ended, from one participant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOutcome {
    Win,
    Loss,
    /// The match duration elapsed with no accepted submission.
    Timeout,
}

/// Opaque per-participant progress, relayed to the opponent unchanged.
pub type ProgressMarker = serde_json::Value;

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Overall grading status of one run or submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerdictStatus {
    Accepted,
    WrongAnswer,
    RuntimeError,
}

/// The result of evaluating one test case in the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub passed: bool,
    /// Measured runtime in milliseconds, if the sandbox reported one.
    #[serde(default)]
    pub runtime_ms: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The graded result of a run or submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub status: VerdictStatus,
    pub test_cases_passed: u32,
    pub total_test_cases: u32,
    /// Mean runtime across test cases that reported one.
    pub runtime_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Verdict {
    /// Folds per-test outcomes into a verdict.
    ///
    /// Any error makes the verdict `RuntimeError`; otherwise it is
    /// `Accepted` only when every test passed. An empty outcome list is a
    /// `WrongAnswer`: a submission graded against nothing cannot win.
    ///
    /// A plain `passed == total` grader would accept 0/0; this one does
    /// not, so a problem with no test cases can never end a match early.
    pub fn from_outcomes(outcomes: &[TestOutcome]) -> Self {
        let total = outcomes.len() as u32;
        let passed = outcomes.iter().filter(|o| o.passed).count() as u32;
        let error_message = outcomes.iter().find_map(|o| o.error.clone());

        let runtimes: Vec<f64> =
            outcomes.iter().filter_map(|o| o.runtime_ms).collect();
        let runtime_ms = if runtimes.is_empty() {
            0
        } else {
            (runtimes.iter().sum::<f64>() / runtimes.len() as f64) as u64
        };

        let status = if error_message.is_some() {
            VerdictStatus::RuntimeError
        } else if total > 0 && passed == total {
            VerdictStatus::Accepted
        } else {
            VerdictStatus::WrongAnswer
        };

        Self {
            status,
            test_cases_passed: passed,
            total_test_cases: total,
            runtime_ms,
            error_message,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == VerdictStatus::Accepted
    }
}

// =========================================================================
// Tests
// =========================================================================

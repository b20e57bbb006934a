//! Boundary with the code-execution sandbox.
//!
//! The sandbox itself lives outside Codeduel. The router dispatches every
//! `match:run` / `match:submit` to an [`Evaluator`] on a separate task, so
//! a slow sandbox never stalls the connection that sent the code. The
//! verdict comes back through
//! [`SessionManager::record_submission`](crate::SessionManager::record_submission).

use codeduel_protocol::{SessionId, Verdict};

use crate::EvaluationError;

/// Which test set the code runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// Sample tests only. The verdict goes to the sender alone and never
    /// completes the session.
    Run,
    /// Every test. An accepted verdict wins the match.
    Submit,
}

/// One piece of code to grade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub mode: EvaluationMode,
    pub code: String,
    pub language: String,
}

/// Grades submitted code.
///
/// # Example
///
/// ```rust
/// use codeduel_match::{EvaluationError, EvaluationRequest, Evaluator};
/// use codeduel_protocol::{SessionId, TestOutcome, Verdict};
///
/// /// Passes anything that mentions `return`.
/// struct NaiveEvaluator;
///
/// impl Evaluator for NaiveEvaluator {
///     async fn evaluate(
///         &self,
///         _session_id: &SessionId,
///         request: EvaluationRequest,
///     ) -> Result<Verdict, EvaluationError> {
///         let passed = request.code.contains("return");
///         Ok(Verdict::from_outcomes(&[TestOutcome {
///             passed,
///             runtime_ms: Some(1.0),
///             error: None,
///         }]))
///     }
/// }
/// ```
pub trait Evaluator: Send + Sync + 'static {
    fn evaluate(
        &self,
        session_id: &SessionId,
        request: EvaluationRequest,
    ) -> impl std::future::Future<Output = Result<Verdict, EvaluationError>> + Send;
}

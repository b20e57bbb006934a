use std::time::Duration;

use codeduel::prelude::*;

// ---------------------------------------------------------------------------
// Development boundaries
// ---------------------------------------------------------------------------

/// Trusts `"<id>:<display name>"` tokens. Local play only.
struct DevAuthenticator;

impl Authenticator for DevAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<Identity, RegistryError> {
        let (id, name) = credential
            .split_once(':')
            .ok_or_else(|| RegistryError::AuthFailed("token must be id:name".into()))?;
        let id: u64 = id
            .parse()
            .map_err(|_| RegistryError::AuthFailed("id must be a number".into()))?;
        if name.is_empty() {
            return Err(RegistryError::AuthFailed("name must not be empty".into()));
        }
        Ok(Identity::new(id, name))
    }
}

/// Fake judge: a test passes when the code mentions its expected output.
///
/// Runs see the two sample tests, submissions see all of them.
struct DevEvaluator {
    expected: Vec<&'static str>,
    latency: Duration,
}

impl DevEvaluator {
    const SAMPLE_TESTS: usize = 2;

    fn new() -> Self {
        Self {
            expected: vec!["0", "1", "1", "2", "3", "5", "8"],
            latency: Duration::from_millis(300),
        }
    }
}

impl Evaluator for DevEvaluator {
    async fn evaluate(
        &self,
        _session_id: &SessionId,
        request: EvaluationRequest,
    ) -> Result<Verdict, EvaluationError> {
        if request.language != "python" {
            return Err(EvaluationError::Rejected(format!(
                "unsupported language {}",
                request.language
            )));
        }
        tokio::time::sleep(self.latency).await;

        let tests = match request.mode {
            EvaluationMode::Run => &self.expected[..Self::SAMPLE_TESTS],
            EvaluationMode::Submit => &self.expected[..],
        };
        let outcomes: Vec<TestOutcome> = tests
            .iter()
            .enumerate()
            .map(|(i, expected)| TestOutcome {
                passed: request.code.contains(expected),
                runtime_ms: Some(1.5 + i as f64),
                error: request
                    .code
                    .contains("raise")
                    .then(|| "Traceback: raised by user code".to_string()),
            })
            .collect();
        Ok(Verdict::from_outcomes(&outcomes))
    }
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    codeduel::init_tracing("info");

    let bind = std::env::var("CODEDUEL_BIND").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
    eprintln!("starting duel server on {bind} (connect with ws://{bind}/?token=1:alice)");

    let server = CodeduelServerBuilder::new()
        .bind(&bind)
        .build(DevAuthenticator, DevEvaluator::new())
        .await?;

    server.run().await?;
    Ok(())
}

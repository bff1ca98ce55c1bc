//! Deploy-time health gate — bounded retries before registration.

use std::time::Duration;

use tracing::debug;

use crate::probe::{ProbeOutcome, probe};

/// Retry budget for gating a freshly started instance.
///
/// Attempts are strictly serialized: there is no value in concurrent
/// probes against the same target. Ordinary unhealthiness never escalates
/// to an error; the gate only answers "did it become healthy in budget".
#[derive(Debug, Clone)]
pub struct HealthGate {
    pub attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
    pub path: String,
}

impl Default for HealthGate {
    fn default() -> Self {
        Self {
            attempts: 10,
            timeout: Duration::from_secs(5),
            backoff: Duration::from_secs(2),
            path: "/ping".to_string(),
        }
    }
}

impl HealthGate {
    /// Poll the endpoint until it answers 2xx or the budget runs out.
    pub async fn wait_healthy(&self, endpoint: &str) -> bool {
        for attempt in 1..=self.attempts {
            let outcome = probe(endpoint, &self.path, self.timeout).await;
            debug!(%endpoint, attempt, ?outcome, "health gate attempt");
            if outcome.is_healthy() {
                return true;
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }
        false
    }
}

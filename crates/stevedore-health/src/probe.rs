//! Single-shot HTTP liveness probe.

use std::time::Duration;

use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

/// Outcome of one probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The endpoint answered 2xx.
    Healthy,
    /// The endpoint answered, but with a non-2xx status.
    Unhealthy,
    /// The endpoint could not be reached, or the attempt timed out.
    Unreachable,
}

impl ProbeOutcome {
    pub fn is_healthy(self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Probe `GET http://{endpoint}{path}` with an overall deadline.
///
/// Opens a fresh connection per attempt; a probe must observe the real
/// connectability of the instance, not the state of a pooled connection.
/// Any transport failure or timeout maps to [`ProbeOutcome::Unreachable`];
/// probes never surface errors.
pub async fn probe(endpoint: &str, path: &str, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, probe_once(endpoint, path)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(%endpoint, %path, "probe timed out");
            ProbeOutcome::Unreachable
        }
    }
}

async fn probe_once(endpoint: &str, path: &str) -> ProbeOutcome {
    let stream = match TcpStream::connect(endpoint).await {
        Ok(stream) => stream,
        Err(err) => {
            debug!(%endpoint, error = %err, "probe connect failed");
            return ProbeOutcome::Unreachable;
        }
    };

    let io = TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(err) => {
            debug!(%endpoint, error = %err, "probe handshake failed");
            return ProbeOutcome::Unreachable;
        }
    };

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(path)
        .header(http::header::HOST, endpoint)
        .header(http::header::USER_AGENT, "stevedore-health/0.1")
        .body(Empty::<bytes::Bytes>::new())
        .expect("static probe request");

    match sender.send_request(req).await {
        Ok(resp) if resp.status().is_success() => ProbeOutcome::Healthy,
        Ok(resp) => {
            debug!(%endpoint, status = %resp.status(), "probe non-2xx");
            ProbeOutcome::Unhealthy
        }
        Err(err) => {
            debug!(%endpoint, error = %err, "probe request failed");
            ProbeOutcome::Unreachable
        }
    }
}

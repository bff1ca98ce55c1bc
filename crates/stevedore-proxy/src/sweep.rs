//! Background health sweep over routed instances.
//!
//! Advisory and eventually consistent: a sweep in progress never blocks
//! request routing, which always reads the health map's latest state.
//! Proxy-time transport failures mark instances unhealthy immediately;
//! the sweep is what clears them once they answer again.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::join_all;
use futures_util::stream;
use tracing::debug;

use stevedore_health::{HealthMap, probe};

use crate::table::RoutingTable;

/// Sweep cadence and per-probe budget.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Per-probe timeout.
    pub timeout: Duration,
    /// Concurrent probes per app; bounds the fan-out against any one host.
    pub fanout: usize,
    pub path: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            fanout: 5,
            path: "/ping".to_string(),
        }
    }
}

/// Probe every routed instance once, updating the health map.
///
/// Also drops marks for endpoints no longer in the table: once an
/// instance leaves the routing table nothing will ever probe it again,
/// so its mark would otherwise outlive it forever.
pub async fn sweep_once(table: &RoutingTable, health: &HealthMap, config: &SweepConfig) {
    let snapshot = table.snapshot();
    join_all(snapshot.iter().map(|(app, instances)| async move {
        stream::iter(instances)
            .for_each_concurrent(config.fanout, |instance| async move {
                let endpoint = instance.endpoint();
                let outcome = probe(&endpoint, &config.path, config.timeout).await;
                if outcome.is_healthy() {
                    health.mark_healthy(&endpoint);
                } else {
                    debug!(%app, %endpoint, ?outcome, "sweep probe failed");
                    health.mark_unhealthy(&endpoint);
                }
            })
            .await;
    }))
    .await;

    let routed: std::collections::HashSet<String> = snapshot
        .values()
        .flatten()
        .map(|instance| instance.endpoint())
        .collect();
    health.retain_known(&routed);
}

/// Run the sweep forever on the configured interval.
pub async fn run_sweep(table: &RoutingTable, health: &HealthMap, config: SweepConfig) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sweep_once(table, health, &config).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::net::SocketAddr;

    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::Response;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    use stevedore_store::Instance;

    fn fast_config() -> SweepConfig {
        SweepConfig {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(500),
            fanout: 5,
            path: "/ping".to_string(),
        }
    }

    async fn spawn_ping_server(status: u16) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let svc = service_fn(move |_req| async move {
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(status)
                                .body(Full::new(Bytes::from_static(b"pong")))
                                .unwrap(),
                        )
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });
        addr
    }

    fn dead_addr() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    fn table_of(app: &str, addrs: &[SocketAddr]) -> RoutingTable {
        let table = RoutingTable::new();
        let mut snapshot = HashMap::new();
        snapshot.insert(
            app.to_string(),
            addrs
                .iter()
                .map(|a| Instance::new(a.ip().to_string(), a.port()))
                .collect(),
        );
        table.replace(snapshot);
        table
    }

    #[tokio::test]
    async fn sweep_marks_dead_instances_and_spares_live_ones() {
        let live = spawn_ping_server(200).await;
        let dead = dead_addr();
        let table = table_of("app", &[live, dead]);
        let health = HealthMap::new();

        sweep_once(&table, &health, &fast_config()).await;

        assert!(!health.is_unhealthy(&live.to_string()));
        assert!(health.is_unhealthy(&dead.to_string()));
    }

    #[tokio::test]
    async fn sweep_clears_marks_once_instance_answers_again() {
        let live = spawn_ping_server(200).await;
        let table = table_of("app", &[live]);
        let health = HealthMap::new();

        // Simulate an earlier failure (e.g. a proxy-time transport error).
        health.mark_unhealthy(&live.to_string());
        sweep_once(&table, &health, &fast_config()).await;

        assert!(!health.is_unhealthy(&live.to_string()));
    }

    #[tokio::test]
    async fn sweep_drops_marks_for_endpoints_that_left_the_table() {
        let live = spawn_ping_server(200).await;
        let table = table_of("app", &[live]);
        let health = HealthMap::new();

        // An instance from a previous generation, gone after a redeploy.
        health.mark_unhealthy("10.9.9.9:8000");
        sweep_once(&table, &health, &fast_config()).await;

        assert!(!health.is_unhealthy("10.9.9.9:8000"));
    }

    #[tokio::test]
    async fn sweep_keeps_marks_for_routed_dead_instances() {
        let dead = dead_addr();
        let table = table_of("app", &[dead]);
        let health = HealthMap::new();

        sweep_once(&table, &health, &fast_config()).await;
        sweep_once(&table, &health, &fast_config()).await;

        assert!(health.is_unhealthy(&dead.to_string()));
    }

    #[tokio::test]
    async fn sweep_treats_non_2xx_as_unhealthy() {
        let failing = spawn_ping_server(500).await;
        let table = table_of("app", &[failing]);
        let health = HealthMap::new();

        sweep_once(&table, &health, &fast_config()).await;

        assert!(health.is_unhealthy(&failing.to_string()));
    }
}

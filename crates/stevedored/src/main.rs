//! stevedored — the Stevedore daemon.
//!
//! Single binary that assembles the whole system:
//! - Metadata store client (Redis)
//! - Deployment orchestrator
//! - Routing table + invalidation subscription
//! - Background health sweep
//! - Gateway listener dispatching between the admin API and the proxy
//!
//! # Usage
//!
//! ```text
//! stevedored --controller-host ctl.example.com --redis-url redis://127.0.0.1/
//! ```

mod gateway;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use stevedore_deploy::Orchestrator;
use stevedore_health::HealthMap;
use stevedore_proxy::{RoutingTable, SweepConfig, refresh_table, run_invalidation_loop, run_sweep};
use stevedore_store::MetaStore;

use crate::gateway::Gateway;

#[derive(Parser)]
#[command(name = "stevedored", about = "Stevedore daemon")]
struct Cli {
    /// Port the gateway listens on.
    #[arg(long, default_value = "3000", env = "PORT")]
    port: u16,

    /// URL of the shared Redis metadata store.
    #[arg(long, default_value = "redis://127.0.0.1/", env = "REDIS_URL")]
    redis_url: String,

    /// Hostname whose requests go to the admin API instead of an app.
    #[arg(long, env = "CONTROLLER_HOST")]
    controller_host: String,

    /// Container engine port on every host.
    #[arg(long, default_value = "2375", env = "ENGINE_PORT")]
    engine_port: u16,

    /// Seconds between background health sweeps.
    #[arg(long, default_value = "10")]
    sweep_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stevedored=debug,stevedore=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("stevedore daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let store = MetaStore::connect(&cli.redis_url)
        .await
        .context("failed to connect to the metadata store")?;
    // Make sure the token exists before the API starts answering. The
    // value itself stays out of the logs; read the store's `token` key
    // to retrieve it.
    store.auth_token().await?;
    info!("admin auth token ready");

    let orchestrator = Orchestrator::new(store.clone()).with_engine_port(cli.engine_port);
    let table = Arc::new(RoutingTable::new());
    let health = Arc::new(HealthMap::new());

    refresh_table(&store, &table)
        .await
        .context("initial routing table refresh failed")?;

    // ── Start background tasks ─────────────────────────────────

    // Invalidation subscription. Losing it means the routing table can
    // no longer be trusted, so the process exits and a supervisor
    // restarts it with a fresh table.
    {
        let store = store.clone();
        let table = table.clone();
        tokio::spawn(async move {
            let err = run_invalidation_loop(store, &table).await;
            error!(error = %err, "store subscription lost; exiting");
            std::process::exit(1);
        });
    }

    // Health sweep.
    {
        let table = table.clone();
        let health = health.clone();
        let config = SweepConfig {
            interval: Duration::from_secs(cli.sweep_interval),
            ..SweepConfig::default()
        };
        tokio::spawn(async move {
            run_sweep(&table, &health, config).await;
        });
    }

    // ── Gateway listener ───────────────────────────────────────

    let admin = stevedore_api::build_router(store, orchestrator);
    let gateway = Arc::new(Gateway::new(cli.controller_host, admin, table, health));
    serve(gateway, cli.port).await
}

/// Accept loop: one spawned task per connection, until ctrl-c.
async fn serve(gateway: Arc<Gateway>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind gateway listener")?;
    info!(%addr, "gateway listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted.context("accept failed")?;
                let gateway = gateway.clone();

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let gateway = gateway.clone();
                        async move { Ok::<_, Infallible>(gateway.dispatch(req).await) }
                    });

                    if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                        debug!(%peer_addr, error = %e, "connection error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("stevedore daemon stopped");
    Ok(())
}

//! stevedore-proxy — the routing table and data-plane reverse proxy.
//!
//! The routing table is a process-local cache of the store's per-app
//! instance sets, rebuilt wholesale on startup and on every invalidation
//! event. The proxy resolves the target app from each request's Host
//! header, picks a healthy instance at random, and streams the exchange
//! byte-for-byte. A background sweep keeps the [`stevedore_health::HealthMap`]
//! current so selection skips dead instances between refreshes.
//!
//! # Components
//!
//! - **`table`** — snapshot-swapped app → instances mapping and selection
//! - **`sync`** — store → table rebuild and the invalidation subscription
//! - **`sweep`** — periodic background health sweep over routed instances
//! - **`server`** — the request handler and upstream forwarding

pub mod server;
pub mod sweep;
pub mod sync;
pub mod table;

pub use server::{BoxError, ProxyBody, handle};
pub use sweep::{SweepConfig, run_sweep, sweep_once};
pub use sync::{refresh_table, run_invalidation_loop};
pub use table::RoutingTable;

//! stevedore-runtime — per-host container runtime client.
//!
//! Thin, typed transport over one host's Docker Engine API. No policy
//! lives here: the deployment orchestrator decides what to run where,
//! this crate only issues the calls (pull, create/start, list, inspect,
//! stop, kill, remove, logs) and the port bookkeeping derived from the
//! host's running-container list.

pub mod client;
pub mod error;

pub use client::{RuntimeClient, DEFAULT_ENGINE_PORT, APP_CONTAINER_PORT};
pub use error::{RuntimeError, RuntimeResult};

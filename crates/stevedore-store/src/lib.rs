//! stevedore-store — shared metadata store client for Stevedore.
//!
//! Wraps a Redis connection with typed operations over the durable state
//! every other subsystem consumes: the app and host sets, per-app instance
//! and env sets, the per-app deployment history list, the admin auth token,
//! and the `updates` pub/sub channel that signals routers to rebuild their
//! routing tables.
//!
//! The store is the single source of truth for durable state. Multi-step
//! updates (register-then-notify) are best-effort sequences, not
//! transactions; see [`MetaStore::register_instance`].

pub mod error;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::{MetaStore, UPDATES_CHANNEL};
pub use types::{DeploymentRecord, ImageRef, Instance};

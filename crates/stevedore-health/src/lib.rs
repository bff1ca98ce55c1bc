//! stevedore-health — liveness checking for app instances.
//!
//! One primitive, two consumers:
//!
//! - the deploy-time **health gate**: a newly started instance must answer
//!   `GET /ping` within a bounded retry budget before it may be registered;
//! - the router's **background sweep** (in `stevedore-proxy`), which probes
//!   every routed instance on an interval and records failures in the
//!   [`HealthMap`].
//!
//! The [`HealthMap`] is process-local and advisory: instance selection
//! consults it, only probes (and proxy-time transport failures) mutate it,
//! and it is never persisted.

pub mod gate;
pub mod map;
pub mod probe;

pub use gate::HealthGate;
pub use map::HealthMap;
pub use probe::{ProbeOutcome, probe};

//! HealthMap — the set of endpoints currently believed unhealthy.

use std::collections::HashSet;
use std::sync::RwLock;

use tracing::debug;

/// Process-local, concurrency-safe set of `host:port` endpoints that
/// failed their most recent probe (or a proxy attempt).
///
/// Mutated only by the health sweep and by proxy-time transport failures;
/// instance selection reads it and never writes. An entry clears the
/// moment a later probe succeeds — there is no decay or persistence.
#[derive(Debug, Default)]
pub struct HealthMap {
    unhealthy: RwLock<HashSet<String>>,
}

impl HealthMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed probe for an endpoint.
    pub fn mark_unhealthy(&self, endpoint: &str) {
        let mut set = self.unhealthy.write().expect("health map lock");
        if set.insert(endpoint.to_string()) {
            debug!(%endpoint, "endpoint marked unhealthy");
        }
    }

    /// Record a successful probe, clearing any unhealthy mark.
    pub fn mark_healthy(&self, endpoint: &str) {
        let mut set = self.unhealthy.write().expect("health map lock");
        if set.remove(endpoint) {
            debug!(%endpoint, "endpoint recovered");
        }
    }

    pub fn is_unhealthy(&self, endpoint: &str) -> bool {
        self.unhealthy
            .read()
            .expect("health map lock")
            .contains(endpoint)
    }

    /// Drop marks for endpoints outside `known`.
    ///
    /// Without this, marks for instances that left the routing table after
    /// a redeploy would pin memory forever in a long-lived process.
    pub fn retain_known(&self, known: &HashSet<String>) {
        let mut set = self.unhealthy.write().expect("health map lock");
        set.retain(|endpoint| {
            let keep = known.contains(endpoint);
            if !keep {
                debug!(%endpoint, "dropping mark for unrouted endpoint");
            }
            keep
        });
    }

    /// Snapshot of all currently-unhealthy endpoints.
    pub fn snapshot(&self) -> HashSet<String> {
        self.unhealthy.read().expect("health map lock").clone()
    }

    pub fn len(&self) -> usize {
        self.unhealthy.read().expect("health map lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Routing table — snapshot-swapped mapping from app to instances.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rand::seq::SliceRandom;
use tracing::debug;

use stevedore_health::HealthMap;
use stevedore_store::Instance;

type Snapshot = HashMap<String, Vec<Instance>>;

/// In-memory cache of the store's per-app instance sets.
///
/// Refreshes build a complete new snapshot and swap it in atomically:
/// readers observe either the fully-old or the fully-new table, never a
/// partial mix. Reads clone an `Arc`, so the per-request cost is one
/// lock acquisition and a refcount bump.
#[derive(Debug, Default)]
pub struct RoutingTable {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly built snapshot.
    pub fn replace(&self, next: Snapshot) {
        let apps = next.len();
        *self.snapshot.write().expect("routing table lock") = Arc::new(next);
        debug!(apps, "routing table swapped");
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().expect("routing table lock").clone()
    }

    /// Instances routed for `app`; `None` means the app is unknown (as
    /// opposed to known with no instances).
    pub fn lookup(&self, app: &str) -> Option<Vec<Instance>> {
        self.snapshot().get(app).cloned()
    }

    /// All apps currently in the table.
    pub fn apps(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }

    /// Pick one instance of `app` uniformly at random, skipping any
    /// endpoint currently marked unhealthy. `None` when the app is
    /// unknown, empty, or fully unhealthy.
    pub fn select_instance(&self, app: &str, health: &HealthMap) -> Option<Instance> {
        let snapshot = self.snapshot();
        let candidates: Vec<&Instance> = snapshot
            .get(app)?
            .iter()
            .filter(|inst| !health.is_unhealthy(&inst.endpoint()))
            .collect();
        candidates
            .choose(&mut rand::thread_rng())
            .map(|inst| (*inst).clone())
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

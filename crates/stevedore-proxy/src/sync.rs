//! Store → routing table synchronization.
//!
//! The table rebuilds wholesale from the store: on process start, and on
//! every message on the `updates` channel. Losing that subscription means
//! the router would silently serve a stale table forever, so the loop
//! surfaces it as an error and the daemon exits (fail-fast; a supervisor
//! restarts the process).

use futures_util::StreamExt;
use tracing::{debug, info};

use stevedore_store::{MetaStore, StoreError, StoreResult};

use crate::table::RoutingTable;

/// Rebuild the routing table from the store and swap it in.
pub async fn refresh_table(store: &MetaStore, table: &RoutingTable) -> StoreResult<()> {
    let apps = store.apps().await?;
    let mut next = std::collections::HashMap::with_capacity(apps.len());
    for app in apps {
        let instances = store.app_instances(&app).await?;
        next.insert(app, instances);
    }
    let apps = next.len();
    table.replace(next);
    info!(apps, "routing table refreshed");
    Ok(())
}

/// Subscribe to invalidation events and refresh the table on each one.
///
/// Only returns on failure: either the subscription stream ended
/// ([`StoreError::SubscriptionLost`]) or a refresh hit a store error.
/// Both mean the process can no longer trust its table.
pub async fn run_invalidation_loop(store: MetaStore, table: &RoutingTable) -> StoreError {
    let mut pubsub = match store.subscribe_updates().await {
        Ok(pubsub) => pubsub,
        Err(err) => return err,
    };

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        // The payload is an opaque freshness token; only arrival matters.
        let token: String = message.get_payload().unwrap_or_default();
        debug!(%token, "invalidation received");
        if let Err(err) = refresh_table(&store, table).await {
            return err;
        }
    }

    StoreError::SubscriptionLost
}

//! MetaStore — typed operations over the shared Redis metadata store.
//!
//! Every durable fact in the system lives here: which apps exist, which
//! hosts run a container engine, which instances of an app currently
//! receive traffic, app env vars, and the append-only deployment history.
//! Mutations to the instance sets are followed by a best-effort publish on
//! the `updates` channel so routers rebuild their tables.

use std::time::{SystemTime, UNIX_EPOCH};

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::types::{DeploymentRecord, Instance};

/// Pub/sub channel carrying routing-table invalidation events. The payload
/// is an opaque freshness token; only its arrival matters.
pub const UPDATES_CHANNEL: &str = "updates";

/// How many history entries a single read returns.
const HISTORY_PAGE: isize = 100;

/// Shared metadata store client. Cheap to clone; all clones multiplex the
/// same managed connection.
#[derive(Clone)]
pub struct MetaStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl MetaStore {
    /// Connect to the store at the given URL (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        debug!(%url, "metadata store connected");
        Ok(Self { client, conn })
    }

    // ── Apps ───────────────────────────────────────────────────────

    /// All known app identifiers.
    pub async fn apps(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers("apps").await?)
    }

    pub async fn add_app(&self, app: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd("apps", app).await?;
        Ok(())
    }

    pub async fn remove_app(&self, app: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem("apps", app).await?;
        Ok(())
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// All hosts known to run a container engine endpoint.
    pub async fn hosts(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers("hosts").await?)
    }

    pub async fn add_host(&self, host: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd("hosts", host).await?;
        Ok(())
    }

    pub async fn remove_host(&self, host: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem("hosts", host).await?;
        Ok(())
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Instances currently registered for an app.
    pub async fn app_instances(&self, app: &str) -> StoreResult<Vec<Instance>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(instances_key(app)).await?;
        members.iter().map(|m| m.parse()).collect()
    }

    /// Add an instance to the app's set and notify routers.
    ///
    /// The notify is best-effort: a publish failure is logged but does not
    /// fail the registration. The next invalidation reconciles routers.
    pub async fn register_instance(&self, app: &str, instance: &Instance) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(instances_key(app), instance.to_string()).await?;
        debug!(%app, %instance, "instance registered");
        self.notify_routers_best_effort().await;
        Ok(())
    }

    /// Remove an instance from the app's set and notify routers.
    pub async fn deregister_instance(&self, app: &str, instance: &Instance) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(instances_key(app), instance.to_string()).await?;
        debug!(%app, %instance, "instance deregistered");
        self.notify_routers_best_effort().await;
        Ok(())
    }

    // ── Env vars ───────────────────────────────────────────────────

    /// `KEY=VALUE` entries for an app, in set order.
    pub async fn app_envs(&self, app: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(envs_key(app)).await?)
    }

    pub async fn add_app_env(&self, app: &str, env: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(envs_key(app), env).await?;
        Ok(())
    }

    /// Remove env entries by **prefix** match.
    ///
    /// Removing `BOO` drops `BOO=baz`, but so does removing `B` — the match
    /// is a plain prefix, not an exact key comparison. Sharp edge, kept for
    /// compatibility.
    pub async fn remove_app_env(&self, app: &str, prefix: &str) -> StoreResult<usize> {
        let envs = self.app_envs(app).await?;
        let matches = envs_matching_prefix(&envs, prefix);
        let mut conn = self.conn.clone();
        for entry in &matches {
            let _: () = conn.srem(envs_key(app), *entry).await?;
        }
        Ok(matches.len())
    }

    // ── Deployment history ─────────────────────────────────────────

    /// Append a deployment record to the head of the app's history.
    pub async fn save_deployment(&self, app: &str, image: &str, count: u32) -> StoreResult<()> {
        let record = DeploymentRecord {
            timestamp: unix_timestamp(),
            app: app.to_string(),
            image: image.to_string(),
            count,
        };
        let payload = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(deployments_key(app), payload).await?;
        Ok(())
    }

    /// Most-recent-first deployment history (one page).
    pub async fn deployments(&self, app: &str) -> StoreResult<Vec<DeploymentRecord>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(deployments_key(app), 0, HISTORY_PAGE).await?;
        raw.iter()
            .map(|item| serde_json::from_str(item).map_err(StoreError::from))
            .collect()
    }

    /// The most recent deployment record, if any.
    pub async fn most_recent_deployment(&self, app: &str) -> StoreResult<Option<DeploymentRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.lindex(deployments_key(app), 0).await?;
        match raw {
            Some(item) => Ok(Some(serde_json::from_str(&item)?)),
            None => Ok(None),
        }
    }

    /// Drop the app's entire deployment history.
    pub async fn clear_deployments(&self, app: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(deployments_key(app)).await?;
        Ok(())
    }

    // ── Auth token ─────────────────────────────────────────────────

    /// The admin auth token, created lazily on first read.
    pub async fn auth_token(&self) -> StoreResult<String> {
        let mut conn = self.conn.clone();
        let existing: Option<String> = conn.get("token").await?;
        if let Some(token) = existing {
            return Ok(token);
        }
        let token = hex::encode(Sha256::digest(unix_timestamp().to_string()));
        let _: () = conn.set("token", &token).await?;
        Ok(token)
    }

    /// Whether a caller-supplied token matches the stored one.
    pub async fn check_token(&self, candidate: Option<&str>) -> StoreResult<bool> {
        let token = self.auth_token().await?;
        Ok(candidate == Some(token.as_str()))
    }

    // ── Invalidation ───────────────────────────────────────────────

    /// Publish an invalidation event on the `updates` channel.
    pub async fn notify_routers(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .publish(UPDATES_CHANNEL, unix_timestamp_millis().to_string())
            .await?;
        Ok(())
    }

    async fn notify_routers_best_effort(&self) {
        if let Err(err) = self.notify_routers().await {
            warn!(error = %err, "router notification failed; routers reconcile on next event");
        }
    }

    /// Subscribe to the `updates` channel. The returned pub/sub handle is
    /// already subscribed; the caller drains its message stream. Stream
    /// termination means the store connection is gone and the process
    /// should treat its routing table as unrecoverably stale.
    pub async fn subscribe_updates(&self) -> StoreResult<redis::aio::PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(UPDATES_CHANNEL).await?;
        Ok(pubsub)
    }
}

fn instances_key(app: &str) -> String {
    format!("{app}:instances")
}

fn envs_key(app: &str) -> String {
    format!("{app}:envs")
}

fn deployments_key(app: &str) -> String {
    format!("deployments:{app}")
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn unix_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Entries whose text starts with `prefix`. The env-removal contract.
fn envs_matching_prefix<'a>(envs: &'a [String], prefix: &str) -> Vec<&'a String> {
    envs.iter().filter(|e| e.starts_with(prefix)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_prefix_match_is_a_plain_prefix() {
        let envs = vec![
            "BOO=baz".to_string(),
            "BAR=1".to_string(),
            "OTHER=x".to_string(),
        ];

        // Exact key prefix removes the entry.
        let matches = envs_matching_prefix(&envs, "BOO");
        assert_eq!(matches, vec![&envs[0]]);

        // A shorter prefix matches more than the caller may expect.
        let matches = envs_matching_prefix(&envs, "B");
        assert_eq!(matches, vec![&envs[0], &envs[1]]);
    }

    #[test]
    fn env_prefix_match_empty_prefix_matches_everything() {
        let envs = vec!["A=1".to_string(), "B=2".to_string()];
        assert_eq!(envs_matching_prefix(&envs, "").len(), 2);
    }

    #[test]
    fn store_keys_are_scoped_per_app() {
        assert_eq!(instances_key("example.com"), "example.com:instances");
        assert_eq!(envs_key("example.com"), "example.com:envs");
        assert_eq!(deployments_key("example.com"), "deployments:example.com");
    }
}

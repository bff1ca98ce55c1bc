//! Collaborator seams between the orchestrator and the outside world.
//!
//! Deploy control flow — phase stepping, compensation, deploy-then-drain
//! ordering — does not care how the store or the container engines are
//! reached. These traits are that seam: production wires [`MetaStore`]
//! and one [`RuntimeClient`] per host, tests wire in-memory fakes and
//! drive the failure paths deliberately.

// The orchestrator is always instantiated with concrete backends, so the
// returned futures' auto traits are known at every call site.
#![allow(async_fn_in_trait)]

use stevedore_runtime::{DEFAULT_ENGINE_PORT, RuntimeClient, RuntimeResult};
use stevedore_store::{DeploymentRecord, ImageRef, Instance, MetaStore, StoreResult};

use crate::error::DeployResult;

/// Store operations the orchestrator depends on.
pub trait DeployStore: Clone + Send + Sync + 'static {
    async fn apps(&self) -> StoreResult<Vec<String>>;
    async fn hosts(&self) -> StoreResult<Vec<String>>;
    async fn app_instances(&self, app: &str) -> StoreResult<Vec<Instance>>;
    async fn app_envs(&self, app: &str) -> StoreResult<Vec<String>>;
    async fn register_instance(&self, app: &str, instance: &Instance) -> StoreResult<()>;
    async fn deregister_instance(&self, app: &str, instance: &Instance) -> StoreResult<()>;
    async fn save_deployment(&self, app: &str, image: &str, count: u32) -> StoreResult<()>;
    async fn most_recent_deployment(&self, app: &str) -> StoreResult<Option<DeploymentRecord>>;
}

impl DeployStore for MetaStore {
    async fn apps(&self) -> StoreResult<Vec<String>> {
        MetaStore::apps(self).await
    }

    async fn hosts(&self) -> StoreResult<Vec<String>> {
        MetaStore::hosts(self).await
    }

    async fn app_instances(&self, app: &str) -> StoreResult<Vec<Instance>> {
        MetaStore::app_instances(self, app).await
    }

    async fn app_envs(&self, app: &str) -> StoreResult<Vec<String>> {
        MetaStore::app_envs(self, app).await
    }

    async fn register_instance(&self, app: &str, instance: &Instance) -> StoreResult<()> {
        MetaStore::register_instance(self, app, instance).await
    }

    async fn deregister_instance(&self, app: &str, instance: &Instance) -> StoreResult<()> {
        MetaStore::deregister_instance(self, app, instance).await
    }

    async fn save_deployment(&self, app: &str, image: &str, count: u32) -> StoreResult<()> {
        MetaStore::save_deployment(self, app, image, count).await
    }

    async fn most_recent_deployment(&self, app: &str) -> StoreResult<Option<DeploymentRecord>> {
        MetaStore::most_recent_deployment(self, app).await
    }
}

/// Container engine operations the orchestrator issues against one host.
pub trait ContainerRuntime: Clone + Send + Sync + 'static {
    async fn running_count(&self) -> RuntimeResult<u32>;
    async fn find_available_port(&self, reserved: &[u16]) -> RuntimeResult<u16>;
    async fn pull_image(&self, image: &ImageRef) -> RuntimeResult<()>;
    async fn run_container(
        &self,
        external_port: u16,
        image: &str,
        envs: Vec<String>,
    ) -> RuntimeResult<String>;
    async fn stop_by_port(&self, external_port: u16) -> RuntimeResult<()>;
    /// Logs of the container publishing `external_port`; `None` when no
    /// container is bound to it.
    async fn logs_by_port(&self, external_port: u16) -> RuntimeResult<Option<String>>;
}

impl ContainerRuntime for RuntimeClient {
    async fn running_count(&self) -> RuntimeResult<u32> {
        RuntimeClient::running_count(self).await
    }

    async fn find_available_port(&self, reserved: &[u16]) -> RuntimeResult<u16> {
        RuntimeClient::find_available_port(self, reserved).await
    }

    async fn pull_image(&self, image: &ImageRef) -> RuntimeResult<()> {
        RuntimeClient::pull_image(self, image).await
    }

    async fn run_container(
        &self,
        external_port: u16,
        image: &str,
        envs: Vec<String>,
    ) -> RuntimeResult<String> {
        RuntimeClient::run_container(self, external_port, image, envs).await
    }

    async fn stop_by_port(&self, external_port: u16) -> RuntimeResult<()> {
        RuntimeClient::stop_by_port(self, external_port).await
    }

    async fn logs_by_port(&self, external_port: u16) -> RuntimeResult<Option<String>> {
        let Some(container) = self.container_by_port(external_port).await? else {
            return Ok(None);
        };
        match container.id {
            Some(id) => Ok(Some(self.logs(&id).await?)),
            None => Ok(None),
        }
    }
}

/// Hands out a runtime handle per host.
pub trait RuntimePool: Clone + Send + Sync + 'static {
    type Runtime: ContainerRuntime;

    fn runtime(&self, host: &str) -> DeployResult<Self::Runtime>;
}

/// Production pool: every host runs its engine on the same port.
#[derive(Debug, Clone)]
pub struct EnginePool {
    engine_port: u16,
}

impl EnginePool {
    pub fn new(engine_port: u16) -> Self {
        Self { engine_port }
    }
}

impl Default for EnginePool {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_PORT)
    }
}

impl RuntimePool for EnginePool {
    type Runtime = RuntimeClient;

    fn runtime(&self, host: &str) -> DeployResult<RuntimeClient> {
        Ok(RuntimeClient::connect_on_port(host, self.engine_port)?)
    }
}

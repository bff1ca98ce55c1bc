//! RuntimeClient — one host's Docker Engine API endpoint.
//!
//! Containers are created from a fixed template: tty on, stdout/stderr
//! attached, stdin closed, app port `3000/tcp` exposed and bound to the
//! external port chosen by the orchestrator.

use std::collections::HashMap;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, ContainerSummary, HostConfig, PortBinding};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures_util::StreamExt;
use rand::seq::SliceRandom;
use tracing::debug;

use stevedore_store::ImageRef;

use crate::error::{RuntimeError, RuntimeResult};

/// Port the container engine API listens on.
pub const DEFAULT_ENGINE_PORT: u16 = 2375;

/// Every app container serves on this port inside the container; the
/// orchestrator maps it to an external host port.
pub const APP_CONTAINER_PORT: u16 = 3000;

/// External ports handed out to instances.
const PORT_RANGE_LOW: u16 = 8000;
const PORT_RANGE_HIGH: u16 = 8999;

const ENGINE_TIMEOUT_SECS: u64 = 30;
const STOP_GRACE_SECS: i64 = 10;

/// Typed client for a single host's container engine.
#[derive(Clone)]
pub struct RuntimeClient {
    host: String,
    docker: Docker,
}

impl RuntimeClient {
    /// Connect to `host` on the default engine port.
    pub fn connect(host: &str) -> RuntimeResult<Self> {
        Self::connect_on_port(host, DEFAULT_ENGINE_PORT)
    }

    /// Connect to `host` on an explicit engine port.
    pub fn connect_on_port(host: &str, engine_port: u16) -> RuntimeResult<Self> {
        let addr = format!("http://{host}:{engine_port}");
        let docker = Docker::connect_with_http(&addr, ENGINE_TIMEOUT_SECS, API_DEFAULT_VERSION)?;
        Ok(Self {
            host: host.to_string(),
            docker,
        })
    }

    /// The host this client talks to.
    pub fn host(&self) -> &str {
        &self.host
    }

    // ── Images ─────────────────────────────────────────────────────

    /// Pull an image, draining the engine's progress stream.
    pub async fn pull_image(&self, image: &ImageRef) -> RuntimeResult<()> {
        debug!(host = %self.host, image = %image, "pulling image");
        let options = CreateImageOptions {
            from_image: image.name.clone(),
            tag: image.tag.clone(),
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(item) = progress.next().await {
            item?;
        }
        Ok(())
    }

    // ── Containers ─────────────────────────────────────────────────

    /// Create and start an app container bound to `external_port`.
    /// Returns the new container id.
    pub async fn run_container(
        &self,
        external_port: u16,
        image: &str,
        envs: Vec<String>,
    ) -> RuntimeResult<String> {
        let container_port = format!("{APP_CONTAINER_PORT}/tcp");

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(container_port.clone(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            container_port,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(external_port.to_string()),
            }]),
        );

        let config = Config::<String> {
            image: Some(image.to_string()),
            env: Some(envs),
            tty: Some(true),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(false),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;
        debug!(host = %self.host, port = external_port, id = %created.id, "container started");
        Ok(created.id)
    }

    /// Running containers on this host.
    pub async fn containers(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        Ok(self.docker.list_containers(Some(options)).await?)
    }

    /// The running container publishing `external_port`, if any.
    pub async fn container_by_port(
        &self,
        external_port: u16,
    ) -> RuntimeResult<Option<ContainerSummary>> {
        let containers = self.containers().await?;
        Ok(containers.into_iter().find(|c| {
            c.ports
                .as_ref()
                .is_some_and(|ports| ports.iter().any(|p| p.public_port == Some(external_port)))
        }))
    }

    pub async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerInspectResponse> {
        Ok(self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?)
    }

    pub async fn stop(&self, container_id: &str) -> RuntimeResult<()> {
        self.docker
            .stop_container(container_id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await?;
        Ok(())
    }

    /// Stop whichever container publishes `external_port`. A missing
    /// container is a no-op: rollback uses this and must tolerate a deploy
    /// that failed before the container started.
    pub async fn stop_by_port(&self, external_port: u16) -> RuntimeResult<()> {
        match self.container_by_port(external_port).await? {
            Some(container) => match container.id {
                Some(id) => self.stop(&id).await,
                None => Ok(()),
            },
            None => {
                debug!(host = %self.host, port = external_port, "no container bound; nothing to stop");
                Ok(())
            }
        }
    }

    pub async fn kill(&self, container_id: &str) -> RuntimeResult<()> {
        self.docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await?;
        Ok(())
    }

    /// Force-remove a container together with its volumes.
    pub async fn remove(&self, container_id: &str) -> RuntimeResult<()> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    /// Collected stdout+stderr of a container.
    pub async fn logs(&self, container_id: &str) -> RuntimeResult<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(container_id, Some(options));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            output.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        }
        Ok(output)
    }

    // ── Port bookkeeping ───────────────────────────────────────────

    /// Number of running containers on this host.
    pub async fn running_count(&self) -> RuntimeResult<u32> {
        Ok(self.containers().await?.len() as u32)
    }

    /// External ports currently published by running containers.
    pub async fn ports_in_use(&self) -> RuntimeResult<Vec<u16>> {
        let containers = self.containers().await?;
        Ok(containers
            .iter()
            .flat_map(|c| c.ports.iter().flatten())
            .filter_map(|p| p.public_port)
            .collect())
    }

    /// A random free external port, excluding `reserved` (ports already
    /// claimed by an in-flight deploy but not yet visible in the engine).
    pub async fn find_available_port(&self, reserved: &[u16]) -> RuntimeResult<u16> {
        let in_use = self.ports_in_use().await?;
        pick_free_port(&in_use, reserved).ok_or_else(|| RuntimeError::NoFreePort {
            host: self.host.clone(),
            low: PORT_RANGE_LOW,
            high: PORT_RANGE_HIGH,
        })
    }
}

/// Uniformly sample a port from the configured range minus occupied ones.
fn pick_free_port(in_use: &[u16], reserved: &[u16]) -> Option<u16> {
    let free: Vec<u16> = (PORT_RANGE_LOW..=PORT_RANGE_HIGH)
        .filter(|p| !in_use.contains(p) && !reserved.contains(p))
        .collect();
    free.choose(&mut rand::thread_rng()).copied()
}

//! Orchestrator — executes deploys, rollback, and teardown against the
//! store and the per-host container runtimes.

use std::collections::BTreeMap;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use stevedore_health::HealthGate;
use stevedore_placement::{AllocationPlan, allocate};
use stevedore_store::{ImageRef, Instance, MetaStore};

use crate::backends::{ContainerRuntime, DeployStore, EnginePool, RuntimePool};
use crate::error::{DeployError, DeployResult};
use crate::machine::{Compensation, DeployPhase, compensation};

/// Per-app summary for the admin `describe` surface.
#[derive(Debug, Clone, Serialize)]
pub struct AppDescription {
    pub instances: Vec<String>,
    pub envs: Vec<String>,
    /// Image of the most recent successful deploy, if any.
    pub image: Option<String>,
}

/// Deployment orchestrator over the shared store and per-host runtimes.
#[derive(Clone)]
pub struct Orchestrator<S = MetaStore, P = EnginePool> {
    store: S,
    runtimes: P,
    gate: HealthGate,
}

impl Orchestrator {
    pub fn new(store: MetaStore) -> Self {
        Self {
            store,
            runtimes: EnginePool::default(),
            gate: HealthGate::default(),
        }
    }

    /// Override the container engine port (every host uses the same one).
    pub fn with_engine_port(mut self, port: u16) -> Self {
        self.runtimes = EnginePool::new(port);
        self
    }
}

impl<S: DeployStore, P: RuntimePool> Orchestrator<S, P> {
    /// Build an orchestrator over explicit collaborators.
    pub fn with_backends(store: S, runtimes: P) -> Self {
        Self {
            store,
            runtimes,
            gate: HealthGate::default(),
        }
    }

    /// Override the deploy-time health gate budget.
    pub fn with_gate(mut self, gate: HealthGate) -> Self {
        self.gate = gate;
        self
    }

    // ── Distribution ───────────────────────────────────────────────

    /// Live running-container count per known host. Every host appears,
    /// including those with nothing running.
    pub async fn container_distribution(&self) -> DeployResult<BTreeMap<String, u32>> {
        let hosts = self.store.hosts().await?;
        let counts = join_all(hosts.iter().map(|host| async move {
            let count = self.runtimes.runtime(host)?.running_count().await?;
            Ok::<_, DeployError>((host.clone(), count))
        }))
        .await;

        let mut distribution = BTreeMap::new();
        for entry in counts {
            let (host, count) = entry?;
            distribution.insert(host, count);
        }
        Ok(distribution)
    }

    // ── Per-instance deploy ────────────────────────────────────────

    /// Deploy one instance, driving the state machine to `Done` or rolling
    /// back from whatever phase failed.
    pub async fn deploy_instance(
        &self,
        app: &str,
        host: &str,
        port: u16,
        image: &str,
    ) -> DeployResult<()> {
        let instance = Instance::new(host, port);
        let mut deploy = InstanceDeploy {
            orch: self,
            app,
            image,
            instance: instance.clone(),
            runtime: self.runtimes.runtime(host)?,
            envs: Vec::new(),
        };

        let mut phase = DeployPhase::PullingImage;
        loop {
            match deploy.step(phase).await {
                Ok(DeployPhase::Done) => {
                    info!(%app, %instance, %image, "instance deployed");
                    return Ok(());
                }
                Ok(next) => phase = next,
                Err(cause) => {
                    return self
                        .roll_back(app, &instance, &deploy.runtime, phase, cause)
                        .await;
                }
            }
        }
    }

    /// Apply the compensating actions for the phase a deploy failed in.
    ///
    /// Returns `Failed` carrying the original cause, or `RollbackFailed`
    /// when compensation itself errors — the latter wins because it is
    /// strictly worse and must not be masked by the original error.
    async fn roll_back(
        &self,
        app: &str,
        instance: &Instance,
        runtime: &P::Runtime,
        reached: DeployPhase,
        cause: DeployError,
    ) -> DeployResult<()> {
        warn!(%app, %instance, ?reached, error = %cause, "deploy failed; rolling back");

        for action in compensation(reached) {
            let outcome = match action {
                Compensation::StopContainer => runtime
                    .stop_by_port(instance.port)
                    .await
                    .map_err(DeployError::from),
                Compensation::Deregister => self
                    .store
                    .deregister_instance(app, instance)
                    .await
                    .map_err(DeployError::from),
            };
            if let Err(rollback_cause) = outcome {
                error!(
                    %app, %instance, ?action, error = %rollback_cause,
                    "rollback failed; system may be in an inconsistent state"
                );
                return Err(DeployError::RollbackFailed {
                    instance: instance.to_string(),
                    original: cause.to_string(),
                    cause: Box::new(rollback_cause),
                });
            }
        }

        Err(DeployError::Failed {
            instance: instance.to_string(),
            cause: Box::new(cause),
        })
    }

    // ── App-level workflow ─────────────────────────────────────────

    /// Deploy `count` new instances of `image`, then drain the previous
    /// generation.
    ///
    /// The old instances are torn down together only after every new
    /// instance has passed its health gate. If any new instance fails
    /// (after its own rollback), the old generation is left serving and
    /// the first error is surfaced.
    pub async fn deploy_app_instances(
        &self,
        app: &str,
        image: &str,
        count: u32,
    ) -> DeployResult<AllocationPlan> {
        let previous = self.store.app_instances(app).await?;
        let distribution = self.container_distribution().await?;
        let plan = allocate(count, &distribution)?;
        debug!(%app, %image, count, plan = ?plan.per_host, "deploying new generation");

        // Claim an external port per new instance up front so concurrent
        // launches on one host cannot race for the same port.
        let mut jobs: Vec<(String, u16)> = Vec::new();
        for (host, n) in plan.assignments() {
            let runtime = self.runtimes.runtime(host)?;
            let mut reserved = Vec::new();
            for _ in 0..n {
                let port = runtime.find_available_port(&reserved).await?;
                reserved.push(port);
                jobs.push((host.to_string(), port));
            }
        }

        // Every instance deploy runs to completion (including its own
        // rollback) even when a sibling fails; errors are collected after.
        let results = join_all(
            jobs.iter()
                .map(|(host, port)| self.deploy_instance(app, host, *port, image)),
        )
        .await;
        if let Some(err) = results.into_iter().find_map(Result::err) {
            warn!(%app, error = %err, "deploy failed; previous generation left serving");
            return Err(err);
        }

        // History is a log, not a ledger; failing to append must not fail
        // a deploy that already succeeded.
        if let Err(err) = self.store.save_deployment(app, image, count).await {
            warn!(%app, error = %err, "failed to record deployment history");
        }

        if !previous.is_empty() {
            info!(%app, old = previous.len(), "draining previous generation");
            let results = join_all(
                previous
                    .iter()
                    .map(|instance| self.kill_app_instance(app, instance)),
            )
            .await;
            for result in results {
                result?;
            }
        }

        Ok(plan)
    }

    /// Stop one instance's container and deregister it.
    pub async fn kill_app_instance(&self, app: &str, instance: &Instance) -> DeployResult<()> {
        debug!(%app, %instance, "killing instance");
        self.runtimes
            .runtime(&instance.host)?
            .stop_by_port(instance.port)
            .await?;
        self.store.deregister_instance(app, instance).await?;
        Ok(())
    }

    /// Full teardown: stop and deregister every current instance.
    pub async fn kill_app_instances(&self, app: &str) -> DeployResult<()> {
        let instances = self.store.app_instances(app).await?;
        let results = join_all(
            instances
                .iter()
                .map(|instance| self.kill_app_instance(app, instance)),
        )
        .await;
        for result in results {
            result?;
        }
        Ok(())
    }

    // ── Introspection ──────────────────────────────────────────────

    /// Container logs per instance of an app.
    pub async fn app_logs(&self, app: &str) -> DeployResult<BTreeMap<String, String>> {
        let instances = self.store.app_instances(app).await?;
        let mut logs = BTreeMap::new();
        for instance in &instances {
            let runtime = self.runtimes.runtime(&instance.host)?;
            let Some(output) = runtime.logs_by_port(instance.port).await? else {
                continue;
            };
            logs.insert(instance.to_string(), output);
        }
        Ok(logs)
    }

    /// Per-app summary: instances, envs, most recently deployed image.
    pub async fn describe(&self) -> DeployResult<BTreeMap<String, AppDescription>> {
        let apps = self.store.apps().await?;
        let mut output = BTreeMap::new();
        for app in apps {
            let instances = self.store.app_instances(&app).await?;
            let envs = self.store.app_envs(&app).await?;
            let image = self
                .store
                .most_recent_deployment(&app)
                .await?
                .map(|record| record.image);
            output.insert(
                app,
                AppDescription {
                    instances: instances.iter().map(Instance::to_string).collect(),
                    envs,
                    image,
                },
            );
        }
        Ok(output)
    }
}

/// Mutable context for one instance's trip through the state machine.
struct InstanceDeploy<'a, S, P: RuntimePool> {
    orch: &'a Orchestrator<S, P>,
    app: &'a str,
    image: &'a str,
    instance: Instance,
    runtime: P::Runtime,
    envs: Vec<String>,
}

impl<S: DeployStore, P: RuntimePool> InstanceDeploy<'_, S, P> {
    /// The single transition function: perform the phase's work, return
    /// the next phase.
    async fn step(&mut self, phase: DeployPhase) -> DeployResult<DeployPhase> {
        match phase {
            DeployPhase::PullingImage => {
                debug!(instance = %self.instance, image = %self.image, "pulling image");
                self.runtime.pull_image(&ImageRef::parse(self.image)).await?;
            }
            DeployPhase::LoadingConfig => {
                debug!(instance = %self.instance, "loading app envs");
                self.envs = self.orch.store.app_envs(self.app).await?;
            }
            DeployPhase::Starting => {
                debug!(instance = %self.instance, "starting container");
                self.runtime
                    .run_container(self.instance.port, self.image, self.envs.clone())
                    .await?;
            }
            DeployPhase::HealthGating => {
                debug!(instance = %self.instance, "health-gating");
                let healthy = self.orch.gate.wait_healthy(&self.instance.endpoint()).await;
                if !healthy {
                    return Err(DeployError::HealthGateFailed {
                        instance: self.instance.to_string(),
                    });
                }
            }
            DeployPhase::Registering => {
                debug!(instance = %self.instance, "registering instance");
                self.orch
                    .store
                    .register_instance(self.app, &self.instance)
                    .await?;
            }
            DeployPhase::Done => {}
        }
        Ok(phase.next().unwrap_or(DeployPhase::Done))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{HashMap, VecDeque};
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::Response;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    use stevedore_runtime::{RuntimeError, RuntimeResult};
    use stevedore_store::{DeploymentRecord, StoreError, StoreResult};

    /// Shared record of store and runtime calls, in the order they landed.
    type Journal = Arc<Mutex<Vec<String>>>;

    fn position(journal: &Journal, entry: &str) -> Option<usize> {
        journal
            .lock()
            .unwrap()
            .iter()
            .position(|e| e == entry)
    }

    // ── Fakes ──────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeStoreState {
        hosts: Vec<String>,
        instances: HashMap<String, Vec<Instance>>,
        envs: HashMap<String, Vec<String>>,
        history: Vec<DeploymentRecord>,
        fail_register: bool,
    }

    #[derive(Clone)]
    struct FakeStore {
        state: Arc<Mutex<FakeStoreState>>,
        journal: Journal,
    }

    impl FakeStore {
        fn new(journal: &Journal, hosts: &[&str]) -> Self {
            let state = FakeStoreState {
                hosts: hosts.iter().map(|h| h.to_string()).collect(),
                ..Default::default()
            };
            Self {
                state: Arc::new(Mutex::new(state)),
                journal: journal.clone(),
            }
        }

        fn register_fails(&self) {
            self.state.lock().unwrap().fail_register = true;
        }

        fn seed_instance(&self, app: &str, instance: Instance) {
            self.state
                .lock()
                .unwrap()
                .instances
                .entry(app.to_string())
                .or_default()
                .push(instance);
        }

        fn instances_of(&self, app: &str) -> Vec<Instance> {
            self.state
                .lock()
                .unwrap()
                .instances
                .get(app)
                .cloned()
                .unwrap_or_default()
        }

        fn history_len(&self) -> usize {
            self.state.lock().unwrap().history.len()
        }
    }

    impl DeployStore for FakeStore {
        async fn apps(&self) -> StoreResult<Vec<String>> {
            Ok(self.state.lock().unwrap().instances.keys().cloned().collect())
        }

        async fn hosts(&self) -> StoreResult<Vec<String>> {
            Ok(self.state.lock().unwrap().hosts.clone())
        }

        async fn app_instances(&self, app: &str) -> StoreResult<Vec<Instance>> {
            Ok(self.instances_of(app))
        }

        async fn app_envs(&self, app: &str) -> StoreResult<Vec<String>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .envs
                .get(app)
                .cloned()
                .unwrap_or_default())
        }

        async fn register_instance(&self, app: &str, instance: &Instance) -> StoreResult<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_register {
                return Err(StoreError::BadInstance("injected register failure".into()));
            }
            state
                .instances
                .entry(app.to_string())
                .or_default()
                .push(instance.clone());
            self.journal
                .lock()
                .unwrap()
                .push(format!("register {instance}"));
            Ok(())
        }

        async fn deregister_instance(&self, app: &str, instance: &Instance) -> StoreResult<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(set) = state.instances.get_mut(app) {
                set.retain(|i| i != instance);
            }
            self.journal
                .lock()
                .unwrap()
                .push(format!("deregister {instance}"));
            Ok(())
        }

        async fn save_deployment(&self, app: &str, image: &str, count: u32) -> StoreResult<()> {
            self.state.lock().unwrap().history.push(DeploymentRecord {
                timestamp: 0,
                app: app.to_string(),
                image: image.to_string(),
                count,
            });
            Ok(())
        }

        async fn most_recent_deployment(&self, app: &str) -> StoreResult<Option<DeploymentRecord>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .history
                .iter()
                .rev()
                .find(|r| r.app == app)
                .cloned())
        }
    }

    #[derive(Default)]
    struct FakeRuntimeState {
        /// Ports handed out by `find_available_port`, in order.
        ports: VecDeque<u16>,
        running: Vec<u16>,
        fail_stop: bool,
    }

    #[derive(Clone)]
    struct FakeRuntime {
        state: Arc<Mutex<FakeRuntimeState>>,
        journal: Journal,
    }

    impl FakeRuntime {
        fn new(journal: &Journal, ports: &[u16]) -> Self {
            let state = FakeRuntimeState {
                ports: ports.iter().copied().collect(),
                ..Default::default()
            };
            Self {
                state: Arc::new(Mutex::new(state)),
                journal: journal.clone(),
            }
        }

        fn stop_fails(&self) {
            self.state.lock().unwrap().fail_stop = true;
        }
    }

    impl ContainerRuntime for FakeRuntime {
        async fn running_count(&self) -> RuntimeResult<u32> {
            Ok(self.state.lock().unwrap().running.len() as u32)
        }

        async fn find_available_port(&self, _reserved: &[u16]) -> RuntimeResult<u16> {
            self.state
                .lock()
                .unwrap()
                .ports
                .pop_front()
                .ok_or(RuntimeError::NoFreePort {
                    host: "fake".into(),
                    low: 8000,
                    high: 8999,
                })
        }

        async fn pull_image(&self, image: &ImageRef) -> RuntimeResult<()> {
            self.journal.lock().unwrap().push(format!("pull {image}"));
            Ok(())
        }

        async fn run_container(
            &self,
            external_port: u16,
            _image: &str,
            _envs: Vec<String>,
        ) -> RuntimeResult<String> {
            self.state.lock().unwrap().running.push(external_port);
            self.journal
                .lock()
                .unwrap()
                .push(format!("start {external_port}"));
            Ok(format!("c-{external_port}"))
        }

        async fn stop_by_port(&self, external_port: u16) -> RuntimeResult<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_stop {
                return Err(RuntimeError::Api {
                    status: 500,
                    message: "injected stop failure".into(),
                });
            }
            state.running.retain(|p| *p != external_port);
            self.journal
                .lock()
                .unwrap()
                .push(format!("stop {external_port}"));
            Ok(())
        }

        async fn logs_by_port(&self, external_port: u16) -> RuntimeResult<Option<String>> {
            let running = self.state.lock().unwrap().running.contains(&external_port);
            Ok(running.then(|| format!("logs for {external_port}")))
        }
    }

    /// One shared runtime regardless of host; tests use a single host.
    #[derive(Clone)]
    struct FakePool {
        runtime: FakeRuntime,
    }

    impl RuntimePool for FakePool {
        type Runtime = FakeRuntime;

        fn runtime(&self, _host: &str) -> DeployResult<FakeRuntime> {
            Ok(self.runtime.clone())
        }
    }

    // ── Harness ────────────────────────────────────────────────────

    fn fast_gate() -> HealthGate {
        HealthGate {
            attempts: 2,
            timeout: Duration::from_millis(300),
            backoff: Duration::from_millis(10),
            path: "/ping".to_string(),
        }
    }

    fn orchestrator(
        store: &FakeStore,
        runtime: &FakeRuntime,
    ) -> Orchestrator<FakeStore, FakePool> {
        Orchestrator::with_backends(
            store.clone(),
            FakePool {
                runtime: runtime.clone(),
            },
        )
        .with_gate(fast_gate())
    }

    /// A live instance endpoint: answers `GET /ping` with 200.
    async fn spawn_ping_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let svc = service_fn(move |_req| async move {
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(200)
                                .body(Full::new(Bytes::from_static(b"pong")))
                                .unwrap(),
                        )
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });
        addr
    }

    /// A port nothing listens on: the health gate can never pass.
    fn dead_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    // ── Per-instance deploy ────────────────────────────────────────

    #[tokio::test]
    async fn failed_health_gate_rolls_the_instance_back() {
        let journal = Journal::default();
        let store = FakeStore::new(&journal, &["127.0.0.1"]);
        let port = dead_port();
        let runtime = FakeRuntime::new(&journal, &[]);
        let orch = orchestrator(&store, &runtime);

        let err = orch
            .deploy_instance("example.com", "127.0.0.1", port, "acme/web:v1")
            .await
            .unwrap_err();

        match err {
            DeployError::Failed { cause, .. } => {
                assert!(matches!(*cause, DeployError::HealthGateFailed { .. }));
            }
            other => panic!("expected Failed, got {other}"),
        }
        // The started container was stopped and nothing got registered.
        assert!(position(&journal, &format!("stop {port}")).is_some());
        assert!(store.instances_of("example.com").is_empty());
    }

    #[tokio::test]
    async fn rollback_failure_outranks_the_deploy_error() {
        let journal = Journal::default();
        let store = FakeStore::new(&journal, &["127.0.0.1"]);
        let port = dead_port();
        let runtime = FakeRuntime::new(&journal, &[]);
        runtime.stop_fails();
        let orch = orchestrator(&store, &runtime);

        let err = orch
            .deploy_instance("example.com", "127.0.0.1", port, "acme/web:v1")
            .await
            .unwrap_err();

        match err {
            DeployError::RollbackFailed { original, cause, .. } => {
                assert!(original.contains("never became healthy"), "{original}");
                assert!(matches!(*cause, DeployError::Runtime(_)));
            }
            other => panic!("expected RollbackFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn registration_failure_stops_and_deregisters() {
        let journal = Journal::default();
        let store = FakeStore::new(&journal, &["127.0.0.1"]);
        store.register_fails();
        let addr = spawn_ping_server().await;
        let runtime = FakeRuntime::new(&journal, &[]);
        let orch = orchestrator(&store, &runtime);

        let err = orch
            .deploy_instance("example.com", "127.0.0.1", addr.port(), "acme/web:v1")
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Failed { .. }));
        // Registration-phase compensation: stop the container, then clear
        // any registration that may have landed.
        let stop = position(&journal, &format!("stop {}", addr.port())).unwrap();
        let dereg = position(&journal, &format!("deregister 127.0.0.1:{}", addr.port())).unwrap();
        assert!(stop < dereg);
    }

    // ── App-level workflow ─────────────────────────────────────────

    #[tokio::test]
    async fn old_generation_drains_only_after_new_one_is_healthy() {
        let journal = Journal::default();
        let store = FakeStore::new(&journal, &["127.0.0.1"]);
        let old = Instance::new("127.0.0.1", 9555);
        store.seed_instance("example.com", old.clone());

        let addr = spawn_ping_server().await;
        let runtime = FakeRuntime::new(&journal, &[addr.port()]);
        let orch = orchestrator(&store, &runtime);

        let plan = orch
            .deploy_app_instances("example.com", "acme/web:v2", 1)
            .await
            .unwrap();
        assert_eq!(plan.total(), 1);

        // Only the new instance remains registered.
        assert_eq!(
            store.instances_of("example.com"),
            vec![Instance::new("127.0.0.1", addr.port())]
        );
        // The new instance registered before the old one was touched.
        let register = position(&journal, &format!("register 127.0.0.1:{}", addr.port())).unwrap();
        let drain = position(&journal, "stop 9555").unwrap();
        assert!(register < drain);
        assert_eq!(store.history_len(), 1);
    }

    #[tokio::test]
    async fn failed_deploy_leaves_previous_generation_serving() {
        let journal = Journal::default();
        let store = FakeStore::new(&journal, &["127.0.0.1"]);
        let old = Instance::new("127.0.0.1", 9555);
        store.seed_instance("example.com", old.clone());

        let port = dead_port();
        let runtime = FakeRuntime::new(&journal, &[port]);
        let orch = orchestrator(&store, &runtime);

        let err = orch
            .deploy_app_instances("example.com", "acme/web:v2", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Failed { .. }));

        // The old instance is untouched and still registered; no history
        // entry was recorded for the failed deploy.
        assert_eq!(store.instances_of("example.com"), vec![old]);
        assert!(position(&journal, "stop 9555").is_none());
        assert_eq!(store.history_len(), 0);
    }

    #[tokio::test]
    async fn teardown_clears_every_instance() {
        let journal = Journal::default();
        let store = FakeStore::new(&journal, &["127.0.0.1"]);
        store.seed_instance("example.com", Instance::new("127.0.0.1", 9001));
        store.seed_instance("example.com", Instance::new("127.0.0.1", 9002));
        let runtime = FakeRuntime::new(&journal, &[]);
        let orch = orchestrator(&store, &runtime);

        orch.kill_app_instances("example.com").await.unwrap();

        assert!(store.instances_of("example.com").is_empty());
        assert!(position(&journal, "stop 9001").is_some());
        assert!(position(&journal, "stop 9002").is_some());
    }
}

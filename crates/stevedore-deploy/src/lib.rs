//! stevedore-deploy — the deployment orchestrator.
//!
//! Drives the per-instance deploy state machine (pull image → load config
//! → start container → health gate → register) with compensating rollback
//! on failure, and the app-level deploy-then-drain workflow: old instances
//! are torn down together only after every new instance has passed its
//! health gate.
//!
//! # Pipeline
//!
//! ```text
//! deploy_app_instances(app, image, count)
//!   ├── snapshot current instances (old generation)
//!   ├── allocate(count, live distribution)      — stevedore-placement
//!   ├── per instance, concurrently:
//!   │     PullingImage → LoadingConfig → Starting
//!   │       → HealthGating → Registering → Done
//!   │     (failure → compensation keyed by the phase reached)
//!   ├── append DeploymentRecord (best-effort)
//!   └── tear down the old generation
//! ```

pub mod backends;
pub mod error;
pub mod machine;
pub mod orchestrator;

pub use backends::{ContainerRuntime, DeployStore, EnginePool, RuntimePool};
pub use error::{DeployError, DeployResult};
pub use machine::{Compensation, DeployPhase};
pub use orchestrator::{AppDescription, Orchestrator};

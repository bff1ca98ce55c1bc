//! Deployment error taxonomy.

use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors surfaced by deployment operations.
///
/// A failed instance deploy rolls itself back and reports [`DeployError::Failed`]
/// with the underlying cause attached. If the rollback itself errors the
/// instance reports [`DeployError::RollbackFailed`] instead — strictly worse,
/// because the system may now hold an orphaned container or a registered-but-dead
/// instance, and it must be surfaced loudly.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Placement(#[from] stevedore_placement::PlacementError),

    #[error("store error: {0}")]
    Store(#[from] stevedore_store::StoreError),

    #[error("container runtime error: {0}")]
    Runtime(#[from] stevedore_runtime::RuntimeError),

    #[error("instance {instance} never became healthy within the retry budget")]
    HealthGateFailed { instance: String },

    #[error("deployment of {instance} failed and was rolled back: {cause}")]
    Failed {
        instance: String,
        #[source]
        cause: Box<DeployError>,
    },

    #[error(
        "rollback of {instance} failed (after: {original}); system may be in an inconsistent state"
    )]
    RollbackFailed {
        instance: String,
        original: String,
        #[source]
        cause: Box<DeployError>,
    },
}

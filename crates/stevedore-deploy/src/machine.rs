//! The per-instance deploy state machine.
//!
//! Phases are an explicit tagged enum driven by a single transition
//! function ([`orchestrator`](crate::orchestrator)); rollback is driven by
//! a compensating-action table keyed by the phase a failed deploy reached,
//! not by nested error branches.

/// Phase of a single instance's deploy. Strictly sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeployPhase {
    /// Pulling the image on the target host.
    PullingImage,
    /// Loading the app's env vars from the store.
    LoadingConfig,
    /// Creating and starting the container.
    Starting,
    /// Waiting for the instance to pass its health gate.
    HealthGating,
    /// Adding the instance to the app's set and notifying routers.
    Registering,
    /// Registered and serving.
    Done,
}

impl DeployPhase {
    /// The phase that follows a successful step, or `None` from `Done`.
    pub fn next(self) -> Option<DeployPhase> {
        match self {
            DeployPhase::PullingImage => Some(DeployPhase::LoadingConfig),
            DeployPhase::LoadingConfig => Some(DeployPhase::Starting),
            DeployPhase::Starting => Some(DeployPhase::HealthGating),
            DeployPhase::HealthGating => Some(DeployPhase::Registering),
            DeployPhase::Registering => Some(DeployPhase::Done),
            DeployPhase::Done => None,
        }
    }
}

/// A compensating action applied during rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    /// Stop the container bound to the instance's external port.
    StopContainer,
    /// Remove the instance from the app's set and notify routers.
    Deregister,
}

/// Compensating actions for a deploy that failed in `reached`.
///
/// Nothing to undo before a container may exist; once `Starting` has begun
/// the container must be stopped; a failure in `Registering` additionally
/// clears any registration that may have landed.
pub fn compensation(reached: DeployPhase) -> &'static [Compensation] {
    match reached {
        DeployPhase::PullingImage | DeployPhase::LoadingConfig => &[],
        DeployPhase::Starting | DeployPhase::HealthGating => &[Compensation::StopContainer],
        DeployPhase::Registering => &[Compensation::StopContainer, Compensation::Deregister],
        DeployPhase::Done => &[],
    }
}

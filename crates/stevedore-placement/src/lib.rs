//! stevedore-placement — the allocation engine.
//!
//! Given a desired number of new instances and the current per-host
//! running-container distribution, computes how many instances each host
//! should launch, balancing toward an even count per host. Pure: no I/O,
//! no hidden iteration state; the caller fetches the distribution and
//! executes the plan.

pub mod allocator;

pub use allocator::{AllocationPlan, PlacementError, allocate};

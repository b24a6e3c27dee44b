//! Harvest module - time-gated scan loop over a remote artifact inventory.
//!
//! This module provides the core abstractions for the radar harvester:
//! - **Traits**: [`DataSource`], [`ArtifactStore`] and friends, the seams to the outside world
//! - **Gate**: Cycle pacing within a time window via [`WallClockGate`]
//! - **Backlog**: Pending/retry bookkeeping via [`Backlog`]
//! - **Errors**: A single error type, [`HarvestError`], classified for the loop
//! - **Orchestrator**: Async session driver via [`pipeline::HarvestOrchestrator`]

pub mod backlog;
pub mod gate;
pub mod pipeline;
pub mod traits;

// Re-export commonly used types
pub use traits::{
    ArtifactFetcher, ArtifactStore, ArtifactStream, CredentialProvider, DataSource, HarvestError,
    InventorySource, LifecycleHooks,
};

pub use backlog::Backlog;
pub use gate::WallClockGate;
pub use pipeline::{HarvestOrchestrator, HarvestStats};

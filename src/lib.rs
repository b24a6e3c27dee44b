pub mod cli;
pub mod config;
pub mod executor;
pub mod harvest;
pub mod model;
pub mod sources;
pub mod store;
pub mod timing;

// Re-export common types for convenience
pub use config::HarvesterConfig;
pub use executor::{HarvestExecutor, SessionOutcome};
pub use harvest::{HarvestError, HarvestOrchestrator, HarvestStats, WallClockGate};
pub use model::*;
pub use store::FlatFileStore;
pub use timing::{Clock, ManualClock, SystemClock};

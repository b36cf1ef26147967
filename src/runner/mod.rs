pub mod collector;
pub mod events;
pub mod orchestrator;
pub mod state;

pub use collector::{CollectedArtifacts, ResultCollector};
pub use events::*;
pub use orchestrator::Orchestrator;
pub use state::*;

pub mod assertion;
pub mod discovery;
pub mod error;
pub mod parser;
pub mod report;
pub mod runner;
pub mod transport;
pub mod utils;

// Re-export common items
pub use discovery::{discover, AppEndpoint};
pub use error::{E2eError, E2eResult, FailureKind};
pub use parser::{parse_scenario_file, Scenario};
pub use runner::{ExecutionResult, Orchestrator, RunOutcome};
pub use transport::TransportClient;
pub use utils::RunConfig;

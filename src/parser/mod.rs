pub mod types;
pub mod validator;
pub mod yaml;

pub use types::{Assertion, AssertionKind, Platform, Scenario, ScenarioMeta, Step};
pub use validator::{validate_scenario, Severity, ValidationIssue, ValidationReport};
pub use yaml::{parse_scenario_file, parse_scenario_str};

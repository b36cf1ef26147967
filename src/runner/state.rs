use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::assertion::AssertionReport;
use crate::discovery::AppEndpoint;
use crate::error::{E2eError, FailureKind};
use crate::parser::{Platform, Scenario};
use crate::transport::LogEntry;

/// Orchestration stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Init,
    Discovering,
    Submitting,
    Polling,
    Collecting,
    Asserting,
    Done,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStage::Init => "init",
            RunStage::Discovering => "discovering",
            RunStage::Submitting => "submitting",
            RunStage::Polling => "polling",
            RunStage::Collecting => "collecting",
            RunStage::Asserting => "asserting",
            RunStage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Final verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Passed,
    Failed,
    Interrupted,
}

impl RunOutcome {
    /// Process exit code: 0 passed, 1 failed, 130 interrupted
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Passed => 0,
            RunOutcome::Failed => 1,
            RunOutcome::Interrupted => 130,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Passed => "passed",
            RunOutcome::Failed => "failed",
            RunOutcome::Interrupted => "interrupted",
        }
    }
}

/// Run-level failure recorded on the result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&E2eError> for RunError {
    fn from(err: &E2eError) -> Self {
        Self {
            kind: err.kind(),
            message: err.user_message(),
        }
    }
}

/// Everything known about one orchestrated run.
///
/// Fields are filled in stage by stage, so a run that stops early still carries whatever the
/// completed stages produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub run_id: String,
    pub scenario_name: String,
    pub platform: Platform,
    pub all_passed: bool,
    pub assertion_report: AssertionReport,
    pub duration_ms: u64,
    pub logs: Vec<LogEntry>,
    pub screenshots_saved: Vec<PathBuf>,
    pub error: Option<RunError>,
    pub endpoint: Option<AppEndpoint>,
    pub session_id: Option<String>,
    /// `Done` when every stage ran, otherwise the stage that stopped the run
    pub stage: RunStage,
    pub collection_warnings: Vec<String>,
    pub report_path: Option<PathBuf>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl ExecutionResult {
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            scenario_name: scenario.meta.app.clone(),
            platform: scenario.meta.platform,
            all_passed: false,
            assertion_report: AssertionReport::default(),
            duration_ms: 0,
            logs: Vec::new(),
            screenshots_saved: Vec::new(),
            error: None,
            endpoint: None,
            session_id: None,
            stage: RunStage::Init,
            collection_warnings: Vec::new(),
            report_path: None,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn fail(&mut self, err: &E2eError) {
        self.all_passed = false;
        self.error = Some(RunError::from(err));
    }

    pub fn outcome(&self) -> RunOutcome {
        match self.error {
            Some(ref e) if e.kind == FailureKind::Interrupted => RunOutcome::Interrupted,
            Some(_) => RunOutcome::Failed,
            None if self.all_passed => RunOutcome::Passed,
            None => RunOutcome::Failed,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome().exit_code()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_scenario_str;

    fn result() -> ExecutionResult {
        ExecutionResult::new(&parse_scenario_str("meta: {app: demo, platform: unity}\n", "t").unwrap())
    }

    #[test]
    fn test_outcome_and_exit_codes() {
        let mut r = result();
        assert_eq!(r.outcome(), RunOutcome::Failed);

        r.all_passed = true;
        assert_eq!(r.exit_code(), 0);

        r.fail(&E2eError::PollTimeout(std::time::Duration::from_secs(5)));
        assert_eq!(r.outcome(), RunOutcome::Failed);
        assert_eq!(r.error_message(), Some("Timeout: Test did not complete within 5.0s"));

        r.fail(&E2eError::Interrupted);
        assert_eq!(r.exit_code(), 130);
    }

    #[test]
    fn test_new_result_identity() {
        let r = result();
        assert_eq!(r.scenario_name, "demo");
        assert_eq!(r.platform, Platform::Unity);
        assert_eq!(r.stage, RunStage::Init);
        assert!(!r.run_id.is_empty());
        assert!(RunStage::Polling > RunStage::Submitting);
    }
}

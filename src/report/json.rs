use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::E2eResult;
use crate::runner::state::ExecutionResult;
use crate::transport::LogEntry;

/// Structured report of one run, as written to `e2e_report_<app>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub timestamp: String,
    pub run_id: String,
    pub scenario: String,
    pub platform: String,
    /// `passed`, `failed` or `interrupted`
    pub status: String,
    pub summary: ReportSummary,
    pub assertions: Vec<AssertionEntry>,
    pub logs: Vec<LogEntry>,
    pub screenshots: Vec<PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// `pass` or `fail`
    pub status: String,
    pub confidence: Option<f64>,
    pub reason: String,
    pub warning: Option<String>,
}

impl JsonReport {
    pub fn from_result(result: &ExecutionResult) -> Self {
        let report = &result.assertion_report;
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            run_id: result.run_id.clone(),
            scenario: result.scenario_name.clone(),
            platform: result.platform.to_string(),
            status: result.outcome().as_str().to_string(),
            summary: ReportSummary {
                total: report.total(),
                passed: report.passed(),
                failed: report.failed(),
                duration_ms: result.duration_ms,
            },
            assertions: report
                .results
                .iter()
                .map(|r| AssertionEntry {
                    name: r.assertion.name.clone(),
                    kind: r.assertion.kind.to_string(),
                    status: if r.passed { "pass" } else { "fail" }.to_string(),
                    confidence: r.oracle_result.as_ref().map(|v| v.confidence),
                    reason: r.details.clone(),
                    warning: r.oracle_result.as_ref().and_then(|v| v.warning.clone()),
                })
                .collect(),
            logs: result.logs.clone(),
            screenshots: result.screenshots_saved.clone(),
            error: result.error_message().map(|s| s.to_string()),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == "passed"
    }
}

/// Envelope printed on stdout for the flow CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowOutput {
    pub success: bool,
    pub command: String,
    pub data: Option<FlowData>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowData {
    pub scenario: String,
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

impl FlowOutput {
    pub fn from_report(report: &JsonReport, report_path: Option<&Path>) -> Self {
        let summary = &report.summary;
        let success = report.passed();

        let message = match report.error {
            Some(ref error) if report.status == "interrupted" => error.clone(),
            Some(ref error) if !success && error.starts_with("Test failed") => error.clone(),
            Some(ref error) if !success => format!("Test failed: {}", error),
            _ if !success => format!(
                "{} of {} assertions failed",
                summary.failed, summary.total
            ),
            _ => "All tests passed".to_string(),
        };

        Self {
            success,
            command: "test".to_string(),
            data: Some(FlowData {
                scenario: report.scenario.clone(),
                total_tests: summary.total,
                passed: summary.passed,
                failed: summary.failed,
                duration_ms: summary.duration_ms,
                report_path: report_path.map(|p| p.to_path_buf()),
            }),
            message,
        }
    }

    pub fn from_result(result: &ExecutionResult) -> Self {
        Self::from_report(
            &JsonReport::from_result(result),
            result.report_path.as_deref(),
        )
    }

    /// Failure envelope for errors that happen before a run starts
    pub fn error(message: &str) -> Self {
        Self {
            success: false,
            command: "test".to_string(),
            data: None,
            message: message.to_string(),
        }
    }

    pub fn to_json(&self, pretty: bool) -> E2eResult<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }
}

pub fn report_file_name(app: &str) -> String {
    format!("e2e_report_{}.json", app)
}

/// Write a report as pretty JSON, creating parent directories
pub fn save_report(report: &JsonReport, path: &Path) -> E2eResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::{AssertionResult, OracleVerdict};
    use crate::error::E2eError;
    use crate::parser::{parse_scenario_str, Assertion};

    fn result() -> ExecutionResult {
        let scenario = parse_scenario_str("meta: {app: flow-editor, platform: unity}\n", "t").unwrap();
        ExecutionResult::new(&scenario)
    }

    fn assertion_result(name: &str, passed: bool, confidence: f64) -> AssertionResult {
        let mut verdict = OracleVerdict::new(passed, confidence, "judged");
        if confidence < 0.8 {
            verdict.warning = Some("Low confidence".into());
        }
        AssertionResult {
            assertion: Assertion::screenshot(name, None),
            passed,
            details: "judged".into(),
            oracle_result: Some(verdict),
        }
    }

    #[test]
    fn test_report_and_envelope_for_passing_run() {
        let mut r = result();
        r.assertion_report.results.push(assertion_result("login", true, 0.95));
        r.all_passed = true;
        r.duration_ms = 1234;

        let report = JsonReport::from_result(&r);
        assert_eq!(report.status, "passed");
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.assertions[0].status, "pass");
        assert_eq!(report.assertions[0].confidence, Some(0.95));
        assert!(report.assertions[0].warning.is_none());

        let envelope = FlowOutput::from_report(&report, None);
        assert!(envelope.success);
        assert_eq!(envelope.message, "All tests passed");
        let json = envelope.to_json(false).unwrap();
        assert!(json.contains(r#""command":"test""#));
        assert!(!json.contains("report_path"));
    }

    #[test]
    fn test_envelope_messages_for_failures() {
        let mut r = result();
        r.assertion_report.results.push(assertion_result("a", true, 0.9));
        r.assertion_report.results.push(assertion_result("b", false, 0.3));
        let envelope = FlowOutput::from_result(&r);
        assert!(!envelope.success);
        assert_eq!(envelope.message, "1 of 2 assertions failed");

        let mut r = result();
        r.fail(&E2eError::RemoteTestFailure("button missing".into()));
        let envelope = FlowOutput::from_result(&r);
        assert_eq!(envelope.message, "Test failed: button missing");

        let mut r = result();
        r.fail(&E2eError::PollTimeout(std::time::Duration::from_secs(5)));
        let envelope = FlowOutput::from_result(&r);
        assert_eq!(
            envelope.message,
            "Test failed: Timeout: Test did not complete within 5.0s"
        );

        let mut r = result();
        r.fail(&E2eError::Interrupted);
        assert_eq!(JsonReport::from_result(&r).status, "interrupted");
        let envelope = FlowOutput::from_result(&r);
        assert!(!envelope.success);
        assert_eq!(envelope.message, "Test interrupted by user");
    }

    #[test]
    fn test_save_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join(report_file_name("flow-editor"));
        save_report(&JsonReport::from_result(&result()), &path).unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["scenario"], "flow-editor");
        assert_eq!(saved["platform"], "unity");
        assert!(saved["error"].is_null());
    }
}

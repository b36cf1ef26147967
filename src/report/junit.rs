use crate::error::{E2eError, E2eResult};
use crate::runner::state::ExecutionResult;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Generate JUnit XML for one run: a testcase per assertion, plus a `run` testcase
/// carrying the run-level error when there is one
pub fn generate_junit_xml(result: &ExecutionResult) -> E2eResult<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let report = &result.assertion_report;
    let run_failed = result.error.is_some();
    let tests = report.total() + usize::from(run_failed);
    let failures = report.failed() + usize::from(run_failed);
    let seconds = (result.duration_ms as f64 / 1000.0).to_string();
    let suite_name = format!("{}.{}", result.platform, result.scenario_name);

    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", "flow-e2e-run"));
    suites_start.push_attribute(("tests", tests.to_string().as_str()));
    suites_start.push_attribute(("failures", failures.to_string().as_str()));
    suites_start.push_attribute(("time", seconds.as_str()));
    write(&mut writer, Event::Start(suites_start))?;

    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", suite_name.as_str()));
    suite_start.push_attribute(("tests", tests.to_string().as_str()));
    suite_start.push_attribute(("failures", failures.to_string().as_str()));
    suite_start.push_attribute(("skipped", "0"));
    suite_start.push_attribute(("id", result.run_id.as_str()));
    suite_start.push_attribute(("time", seconds.as_str()));
    suite_start.push_attribute(("timestamp", result.started_at.to_rfc3339().as_str()));
    write(&mut writer, Event::Start(suite_start))?;

    for assertion_result in &report.results {
        let failure = (!assertion_result.passed).then_some(assertion_result.details.as_str());
        write_test_case(
            &mut writer,
            &assertion_result.assertion.name,
            &suite_name,
            failure,
            "AssertionError",
        )?;
    }

    if let Some(ref error) = result.error {
        let kind = serde_json::to_value(error.kind)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| "error".to_string());
        write_test_case(&mut writer, "run", &suite_name, Some(&error.message), &kind)?;
    }

    write(&mut writer, Event::End(BytesEnd::new("testsuite")))?;
    write(&mut writer, Event::End(BytesEnd::new("testsuites")))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| E2eError::Unexpected(e.to_string()))
}

fn write_test_case<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    classname: &str,
    failure: Option<&str>,
    failure_type: &str,
) -> E2eResult<()> {
    let mut case_start = BytesStart::new("testcase");
    case_start.push_attribute(("name", name));
    case_start.push_attribute(("classname", classname));
    write(writer, Event::Start(case_start))?;

    if let Some(message) = failure {
        let mut fail_start = BytesStart::new("failure");
        fail_start.push_attribute(("message", message));
        fail_start.push_attribute(("type", failure_type));
        write(writer, Event::Start(fail_start))?;
        write(writer, Event::Text(BytesText::new(message)))?;
        write(writer, Event::End(BytesEnd::new("failure")))?;
    }

    write(writer, Event::End(BytesEnd::new("testcase")))
}

fn write<W: std::io::Write>(writer: &mut Writer<W>, event: Event<'_>) -> E2eResult<()> {
    writer
        .write_event(event)
        .map_err(|e| E2eError::Unexpected(format!("Failed to write JUnit XML: {}", e)))
}

/// Write `junit.xml` into `output_dir`
pub fn write_report(result: &ExecutionResult, output_dir: &Path) -> E2eResult<PathBuf> {
    let xml = generate_junit_xml(result)?;
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join("junit.xml");
    std::fs::write(&path, xml)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::AssertionResult;
    use crate::error::E2eError;
    use crate::parser::{parse_scenario_str, Assertion};

    fn result() -> ExecutionResult {
        let scenario =
            parse_scenario_str("meta: {app: flow-editor, platform: unity}\n", "t").unwrap();
        ExecutionResult::new(&scenario)
    }

    #[test]
    fn test_generate_junit_xml() {
        let mut r = result();
        r.duration_ms = 1500;
        r.assertion_report.results = vec![
            AssertionResult {
                assertion: Assertion::screenshot("login", Some("login form")),
                passed: true,
                details: "form visible".into(),
                oracle_result: None,
            },
            AssertionResult {
                assertion: Assertion::screenshot("home", None),
                passed: false,
                details: "Screenshot 'home' not found in results.".into(),
                oracle_result: None,
            },
        ];

        let xml = generate_junit_xml(&r).unwrap();

        assert!(xml.contains(r#"<testsuites name="flow-e2e-run""#));
        assert!(xml.contains(r#"tests="2""#));
        assert!(xml.contains(r#"failures="1""#));
        assert!(xml.contains(r#"<testsuite name="unity.flow-editor""#));
        assert!(xml.contains(r#"<testcase name="login""#));
        assert!(xml.contains(r#"message="Screenshot &apos;home&apos; not found in results.""#));
    }

    #[test]
    fn test_run_error_becomes_testcase() {
        let mut r = result();
        r.fail(&E2eError::PollTimeout(std::time::Duration::from_secs(5)));

        let xml = generate_junit_xml(&r).unwrap();
        assert!(xml.contains(r#"tests="1""#));
        assert!(xml.contains(r#"<testcase name="run""#));
        assert!(xml.contains(r#"type="poll_timeout""#));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&result(), &dir.path().join("out")).unwrap();
        assert!(path.ends_with("junit.xml"));
        assert!(std::fs::read_to_string(path).unwrap().starts_with("<?xml"));
    }
}

//! Business-rule validation for parsed scenarios.
//!
//! The parser only guarantees shape; this pass checks values (resolution format, positive
//! timeouts, non-empty targets) and flags scenarios that would pass without checking anything.

use super::types::{AssertionKind, Scenario, Step};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single validation finding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
            severity: Severity::Error,
        });
    }

    fn warning(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
            severity: Severity::Warning,
        });
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "Valid")?;
            if !self.warnings.is_empty() {
                write!(f, " ({} warnings)", self.warning_count())?;
            }
            Ok(())
        } else {
            write!(
                f,
                "Invalid: {} errors, {} warnings",
                self.error_count(),
                self.warning_count()
            )
        }
    }
}

/// Validate a parsed scenario
pub fn validate_scenario(scenario: &Scenario) -> ValidationReport {
    let mut report = ValidationReport::default();

    validate_meta(scenario, &mut report);
    validate_steps(scenario, &mut report);
    validate_assertions(scenario, &mut report);

    if scenario.assertions.is_empty() {
        report.warning(
            "assert",
            "No assertions defined. Test will pass without validation.",
        );
    }
    if scenario.steps.is_empty() {
        report.warning("steps", "No steps defined.");
    }

    report
}

fn validate_meta(scenario: &Scenario, report: &mut ValidationReport) {
    let meta = &scenario.meta;

    if meta.app.trim().is_empty() {
        report.error("meta.app", "'app' is required and must not be empty.");
    }

    if !meta.resolution.is_empty() {
        let resolution = meta.resolution.to_lowercase();
        if resolution.split('x').count() != 2 {
            report.error(
                "meta.resolution",
                format!(
                    "Invalid resolution format '{}'. Expected 'WIDTHxHEIGHT' (e.g., '1920x1080').",
                    meta.resolution
                ),
            );
        } else if !matches!(parse_resolution(&resolution), Some((w, h)) if w > 0 && h > 0) {
            report.error(
                "meta.resolution",
                format!(
                    "Invalid resolution '{}'. Width and height must be positive integers.",
                    meta.resolution
                ),
            );
        }
    }

    if meta.timeout <= 0 {
        report.error(
            "meta.timeout",
            format!("Timeout must be positive, got {}.", meta.timeout),
        );
    }
}

fn parse_resolution(resolution: &str) -> Option<(i64, i64)> {
    let (w, h) = resolution.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn validate_steps(scenario: &Scenario, report: &mut ValidationReport) {
    for (i, step) in scenario.steps.iter().enumerate() {
        let path = format!("steps[{}]", i);
        match step {
            Step::Input { target, .. } | Step::Click { target, .. } | Step::Select { target, .. } => {
                if target.trim().is_empty() {
                    report.error(
                        format!("{}.target", path),
                        format!("'{}' step requires 'target'.", step.kind()),
                    );
                }
            }
            Step::Wait { ms, .. } => {
                if *ms <= 0 {
                    report.error(
                        format!("{}.ms", path),
                        format!("'wait' ms must be positive, got {}.", ms),
                    );
                }
            }
            Step::Screenshot { .. } => {
                let has_target = step.target().is_some_and(|t| !t.is_empty());
                let has_description = step.description().is_some_and(|d| !d.is_empty());
                if !has_target && !has_description {
                    report.warning(path, "'screenshot' step has no target or description.");
                }
            }
        }
    }
}

fn validate_assertions(scenario: &Scenario, report: &mut ValidationReport) {
    for (i, assertion) in scenario.assertions.iter().enumerate() {
        let path = format!("assert[{}]", i);

        if !assertion.kind.is_known() {
            report.error(
                format!("{}.type", path),
                format!(
                    "Invalid assertion type '{}'. Must be one of: element, screenshot, text",
                    assertion.kind
                ),
            );
        }

        if assertion.name.trim().is_empty() {
            report.error(
                format!("{}.name", path),
                "Assertion 'name' is required and must not be empty.",
            );
        }

        let has_description = assertion.description.as_deref().is_some_and(|d| !d.is_empty());
        if assertion.kind == AssertionKind::Screenshot && !has_description {
            report.warning(
                format!("{}.description", path),
                "Screenshot assertion without 'description' limits visual validation accuracy.",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::yaml::parse_scenario_str;

    fn validate(yaml: &str) -> ValidationReport {
        validate_scenario(&parse_scenario_str(yaml, "test.yaml").unwrap())
    }

    #[test]
    fn test_valid_scenario() {
        let report = validate(
            r#"
meta: {app: flow-editor, platform: unity, resolution: 1280X720}
steps:
  - {type: click, target: ok}
assert:
  - {type: screenshot, name: home, description: home screen visible}
"#,
        );
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
        assert_eq!(report.to_string(), "Valid");
    }

    #[test]
    fn test_meta_rules() {
        let report = validate("meta: {app: '', platform: unity, resolution: big, timeout: 0}\n");
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["meta.app", "meta.resolution", "meta.timeout"]);
        assert!(report.errors[1].message.contains("format"));

        let report = validate("meta: {app: a, platform: unity, resolution: 0x720}\n");
        assert!(report.errors[0].message.contains("positive integers"));

        let report = validate("meta: {app: a, platform: unity, resolution: 1x2x3}\n");
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn test_step_rules() {
        let report = validate(
            r#"
meta: {app: a, platform: flutter}
steps:
  - {type: click, target: ''}
  - {type: wait, ms: -5}
  - {type: screenshot}
assert:
  - {type: screenshot, name: x, description: y}
"#,
        );
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["steps[0].target", "steps[1].ms"]);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].path, "steps[2]");
    }

    #[test]
    fn test_assertion_rules() {
        let report = validate(
            r#"
meta: {app: a, platform: unity}
steps:
  - {type: wait, ms: 10}
assert:
  - {type: audio, name: beep}
  - {type: screenshot, name: ''}
"#,
        );
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["assert[0].type", "assert[1].name"]);
        assert_eq!(report.warnings[0].path, "assert[1].description");
        assert_eq!(report.to_string(), "Invalid: 2 errors, 1 warnings");
    }

    #[test]
    fn test_empty_scenario_warns() {
        let report = validate("meta: {app: a, platform: unity}\n");
        assert!(report.is_valid());
        let paths: Vec<_> = report.warnings.iter().map(|w| w.path.as_str()).collect();
        assert_eq!(paths, vec!["assert", "steps"]);
    }
}
